//! Cross-frame merge of geolocation results.
//!
//! The most likely location is the candidate corroborated by the most
//! frames, with ties going to the earliest frame. Confidence grows with the
//! number of distinct clues and with corroboration; the clue-count
//! thresholds are settings, not fixed cutoffs.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::GeoConfidenceThresholds;
use crate::schema::{Confidence, GeolocationPayload, Location};

/// One frame's successful geolocation answer
#[derive(Debug, Clone, PartialEq)]
pub struct GeoObservation {
    /// 1-based frame number
    pub frame: usize,
    pub payload: GeolocationPayload,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedLocation {
    pub frame: usize,
    pub location: Location,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedGeolocation {
    pub most_likely_location: Option<Location>,
    /// Frames whose candidate matches the most likely location
    pub supporting_frames: usize,
    pub all_detected_locations: Vec<DetectedLocation>,
    /// Distinct clues in order of first appearance
    pub combined_clues: Vec<String>,
    pub total_clues_found: usize,
    pub confidence: Confidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Candidate location for one frame: the stated location, else the
/// `key=value` clues naming location components.
pub fn candidate_location(payload: &GeolocationPayload) -> Option<Location> {
    if !payload.location.is_empty() {
        return Some(payload.location.clone());
    }

    let mut location = Location::default();
    for clue in &payload.key_clues {
        if let Some((key, value)) = clue.split_once('=') {
            location.set_component(key, value);
        }
    }

    (!location.is_empty()).then_some(location)
}

/// Confidence implied by the number of distinct clues alone
pub fn clue_count_confidence(count: usize, thresholds: &GeoConfidenceThresholds) -> Confidence {
    if count == 0 {
        Confidence::VeryLow
    } else if count >= thresholds.high_clue_count {
        Confidence::High
    } else if count >= thresholds.medium_clue_count {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

struct Candidate {
    identity: String,
    location: Location,
    frames: usize,
    best_confidence: Confidence,
}

/// Merge per-frame observations, given in frame order
pub fn merge_geolocation(observations: &[GeoObservation], thresholds: &GeoConfidenceThresholds) -> MergedGeolocation {
    let mut seen = HashSet::new();
    let mut combined_clues = Vec::new();
    let mut detected = Vec::new();
    let mut candidates: Vec<Candidate> = Vec::new();

    for observation in observations {
        for clue in &observation.payload.key_clues {
            let clue = clue.trim();
            if !clue.is_empty() && seen.insert(clue.to_lowercase()) {
                combined_clues.push(clue.to_string());
            }
        }

        let Some(location) = candidate_location(&observation.payload) else {
            continue;
        };

        detected.push(DetectedLocation {
            frame: observation.frame,
            location: location.clone(),
            confidence: observation.confidence,
        });

        let identity = location.identity();
        match candidates.iter_mut().find(|c| c.identity == identity) {
            Some(candidate) => {
                candidate.frames += 1;
                candidate.best_confidence = candidate.best_confidence.max(observation.confidence);
            }
            None => candidates.push(Candidate {
                identity,
                location,
                frames: 1,
                best_confidence: observation.confidence,
            }),
        }
    }

    let by_clues = clue_count_confidence(combined_clues.len(), thresholds);

    // Candidates are in order of first appearance, so the first maximum
    // wins ties.
    let winner = candidates
        .iter()
        .fold(None::<&Candidate>, |best, candidate| match best {
            Some(best) if best.frames >= candidate.frames => Some(best),
            _ => Some(candidate),
        });

    let (most_likely_location, supporting_frames, confidence, note) = match winner {
        Some(winner) => {
            let corroborated = if winner.frames >= 2 {
                winner.best_confidence.raised()
            } else {
                winner.best_confidence
            };
            (
                Some(winner.location.clone()),
                winner.frames,
                by_clues.max(winner.best_confidence).max(corroborated),
                None,
            )
        }
        None => (
            None,
            0,
            by_clues,
            Some(format!(
                "No location could be determined from {} geolocation result(s)",
                observations.len()
            )),
        ),
    };

    MergedGeolocation {
        most_likely_location,
        supporting_frames,
        all_detected_locations: detected,
        total_clues_found: combined_clues.len(),
        combined_clues,
        confidence,
        note,
    }
}
