//! Coercion of raw narratives into task payloads.
//!
//! A narrative that starts with `{` must deserialize into the task's payload
//! shape. Anything else is read heuristically from labelled lines such as
//! `City: Springfield` or `Confidence: low` and bullet lists. A narrative
//! that cannot be coerced still yields a success, with the default payload,
//! the raw narrative and a `failed` validation note.

use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::warn;

use crate::schema::{
    Confidence, Coordinates, GeolocationPayload, Location, ObjectPayload, TaskKind, TaskPayload,
    TaskSuccess, TextPayload, Validation, VisionPayload,
};

/// Maximum number of key clues kept from a geolocation answer
pub const MAX_KEY_CLUES: usize = 5;

lazy_static! {
    static ref CONFIDENCE: Regex =
        Regex::new(r"(?im)confidence[^:\n]*:\s*\**\s*(very[ _-]?high|very[ _-]?low|high|medium|moderate|low)")
            .expect("valid confidence regex");
    static ref LOCATION_LABEL: Regex =
        Regex::new(r"(?im)^\s*[-*]?\s*\**(country|city|district|neighbou?rhood|street|plaza)\**\s*:\s*(.+?)\s*$")
            .expect("valid location label regex");
    static ref BULLET: Regex =
        Regex::new(r"(?m)^\s*(?:[-*•]|\d+[.)])\s+(.+?)\s*$").expect("valid bullet regex");
    static ref QUOTED: Regex = Regex::new(r#""([^"\n]+)""#).expect("valid quote regex");
    static ref NO_TEXT: Regex =
        Regex::new(r"(?i)\bno\s+(?:visible\s+|legible\s+|readable\s+)?text\b").expect("valid no-text regex");
    static ref COORDINATES: Regex =
        Regex::new(r"(?i)coordinates[^:\n]*:\s*\[?\s*(-?\d+(?:\.\d+)?)\s*,\s*(-?\d+(?:\.\d+)?)")
            .expect("valid coordinates regex");
    static ref LAT_LON: Regex =
        Regex::new(r"(?i)lat(?:itude)?\s*[:=]\s*(-?\d+(?:\.\d+)?).*?lon(?:gitude)?\s*[:=]\s*(-?\d+(?:\.\d+)?)")
            .expect("valid lat/lon regex");
    static ref CLUE_SECTION: Regex = Regex::new(r"(?is)key\s+clues[^:\n]*:(.*)").expect("valid clue section regex");
}

/// Build the success result for a narrative returned by the service
pub fn validate(task: TaskKind, narrative: String) -> TaskSuccess {
    match coerce(task, &narrative) {
        Ok((payload, confidence)) => TaskSuccess {
            task,
            narrative,
            confidence,
            payload,
            validation: Validation::Passed,
        },
        Err(note) => {
            warn!(task = %task, note = %note, "Result failed validation, degrading to defaults");
            TaskSuccess {
                task,
                narrative,
                confidence: Confidence::Unknown,
                payload: TaskPayload::default_for(task),
                validation: Validation::schema_mismatch(note),
            }
        }
    }
}

fn coerce(task: TaskKind, narrative: &str) -> Result<(TaskPayload, Confidence), String> {
    let trimmed = narrative.trim();
    if trimmed.is_empty() {
        return Err("empty narrative".to_string());
    }

    if trimmed.starts_with('{') {
        from_json(task, trimmed)
    } else {
        from_text(task, trimmed)
    }
}

#[derive(Deserialize)]
struct WithConfidence<T> {
    #[serde(flatten)]
    payload: T,
    #[serde(default)]
    confidence: Option<String>,
}

fn parse_json<T: DeserializeOwned>(task: TaskKind, raw: &str) -> Result<(T, Confidence), String> {
    serde_json::from_str::<WithConfidence<T>>(raw)
        .map(|parsed| {
            let confidence = parsed
                .confidence
                .as_deref()
                .map(Confidence::parse_label)
                .unwrap_or_default();
            (parsed.payload, confidence)
        })
        .map_err(|e| format!("response does not match the {} shape: {}", task, e))
}

fn from_json(task: TaskKind, raw: &str) -> Result<(TaskPayload, Confidence), String> {
    match task {
        TaskKind::Vision => {
            parse_json::<VisionPayload>(task, raw).map(|(p, c)| (TaskPayload::Vision(p), c))
        }
        TaskKind::TextExtraction => {
            parse_json::<TextPayload>(task, raw).map(|(p, c)| (TaskPayload::TextExtraction(p), c))
        }
        TaskKind::ObjectDetection => {
            parse_json::<ObjectPayload>(task, raw).map(|(p, c)| (TaskPayload::ObjectDetection(p), c))
        }
        TaskKind::Geolocation => {
            let mut payload: GeolocationPayload = serde_json::from_str(raw)
                .map_err(|e| format!("response does not match the {} shape: {}", task, e))?;
            check_coordinates(payload.coordinates)?;
            payload.key_clues.truncate(MAX_KEY_CLUES);
            let confidence = payload.confidence;
            Ok((TaskPayload::Geolocation(payload), confidence))
        }
    }
}

fn from_text(task: TaskKind, text: &str) -> Result<(TaskPayload, Confidence), String> {
    let confidence = stated_confidence(text);

    let payload = match task {
        TaskKind::Vision => TaskPayload::Vision(VisionPayload {
            summary: first_paragraph(text),
        }),
        TaskKind::TextExtraction => TaskPayload::TextExtraction(parse_text(text)),
        TaskKind::ObjectDetection => TaskPayload::ObjectDetection(ObjectPayload {
            objects: bullets(text),
        }),
        TaskKind::Geolocation => {
            let payload = parse_geolocation(text, confidence)?;
            TaskPayload::Geolocation(payload)
        }
    };

    Ok((payload, confidence))
}

fn stated_confidence(text: &str) -> Confidence {
    CONFIDENCE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| Confidence::parse_label(m.as_str()))
        .unwrap_or_default()
}

fn first_paragraph(text: &str) -> String {
    text.split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty())
        .unwrap_or_default()
        .to_string()
}

fn bullets(text: &str) -> Vec<String> {
    BULLET
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim_matches('*').trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn parse_text(text: &str) -> TextPayload {
    if NO_TEXT.is_match(text) {
        return TextPayload {
            has_text: false,
            snippets: Vec::new(),
        };
    }

    let mut snippets: Vec<String> = QUOTED
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if snippets.is_empty() {
        snippets = bullets(text);
    }

    TextPayload {
        has_text: true,
        snippets,
    }
}

fn parse_geolocation(text: &str, confidence: Confidence) -> Result<GeolocationPayload, String> {
    let mut location = Location::default();
    for caps in LOCATION_LABEL.captures_iter(text) {
        if let (Some(name), Some(value)) = (caps.get(1), caps.get(2)) {
            let value = value.as_str().trim_matches('*').trim();
            if !value.eq_ignore_ascii_case("unknown") {
                location.set_component(name.as_str(), value);
            }
        }
    }

    let coordinates = parse_coordinates(text)?;

    let key_clues = CLUE_SECTION
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|section| bullets(section.as_str()))
        .unwrap_or_default()
        .into_iter()
        .take(MAX_KEY_CLUES)
        .collect();

    Ok(GeolocationPayload {
        location,
        coordinates,
        key_clues,
        confidence,
    })
}

fn parse_coordinates(text: &str) -> Result<Option<Coordinates>, String> {
    let caps = COORDINATES
        .captures(text)
        .or_else(|| LAT_LON.captures(text));

    let Some(caps) = caps else {
        return Ok(None);
    };

    let lat = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok());
    let lon = caps.get(2).and_then(|m| m.as_str().parse::<f64>().ok());

    match (lat, lon) {
        (Some(lat), Some(lon)) => {
            let coordinates = Some(Coordinates { lat, lon });
            check_coordinates(coordinates)?;
            Ok(coordinates)
        }
        _ => Ok(None),
    }
}

fn check_coordinates(coordinates: Option<Coordinates>) -> Result<(), String> {
    match coordinates {
        Some(c) if !c.is_valid() => Err(format!(
            "coordinates out of range: lat={}, lon={}",
            c.lat, c.lon
        )),
        _ => Ok(()),
    }
}
