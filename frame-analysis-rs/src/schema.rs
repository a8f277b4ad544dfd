//! Result shapes shared by the runner, the combiner and the session.

use std::fmt;
use std::str::FromStr;

use resilience::{ErrorKind, ServiceError};
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// The fixed set of analyses run against an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    Vision,
    TextExtraction,
    ObjectDetection,
    Geolocation,
}

impl TaskKind {
    /// Every task kind, in report order
    pub const ALL: [TaskKind; 4] = [
        TaskKind::Vision,
        TaskKind::TextExtraction,
        TaskKind::ObjectDetection,
        TaskKind::Geolocation,
    ];

    /// Stable label used in logs, metrics and cache keys
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Vision => "vision",
            TaskKind::TextExtraction => "text-extraction",
            TaskKind::ObjectDetection => "object-detection",
            TaskKind::Geolocation => "geolocation",
        }
    }

    /// Position in [`TaskKind::ALL`]
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Human readable heading
    pub fn title(&self) -> &'static str {
        match self {
            TaskKind::Vision => "Visual description",
            TaskKind::TextExtraction => "Extracted text",
            TaskKind::ObjectDetection => "Detected objects",
            TaskKind::Geolocation => "Estimated location",
        }
    }

    /// Whether the task depends on the output of the other tasks
    pub fn is_enrichment_stage(&self) -> bool {
        matches!(self, TaskKind::Geolocation)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "vision" => Ok(TaskKind::Vision),
            "text-extraction" | "text" | "ocr" => Ok(TaskKind::TextExtraction),
            "object-detection" | "objects" => Ok(TaskKind::ObjectDetection),
            "geolocation" | "geo" => Ok(TaskKind::Geolocation),
            other => Err(AnalysisError::validation(format!("unknown task kind: {}", other))),
        }
    }
}

/// Ordered confidence label
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    #[default]
    Unknown,
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Unknown => "unknown",
            Confidence::VeryLow => "very_low",
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
            Confidence::VeryHigh => "very_high",
        }
    }

    /// The next level up, saturating at `very_high`
    pub fn raised(&self) -> Confidence {
        match self {
            Confidence::Unknown => Confidence::VeryLow,
            Confidence::VeryLow => Confidence::Low,
            Confidence::Low => Confidence::Medium,
            Confidence::Medium => Confidence::High,
            Confidence::High | Confidence::VeryHigh => Confidence::VeryHigh,
        }
    }

    /// Lenient parse of labels such as `Very High`, `very-high` or `MEDIUM`.
    /// Anything unrecognised is `unknown`.
    pub fn parse_label(label: &str) -> Confidence {
        let normalized: String = label
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c })
            .collect();

        match normalized.as_str() {
            "very_low" => Confidence::VeryLow,
            "low" => Confidence::Low,
            "medium" | "moderate" => Confidence::Medium,
            "high" => Confidence::High,
            "very_high" => Confidence::VeryHigh,
            _ => Confidence::Unknown,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured location, every component optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
}

impl Location {
    pub fn is_empty(&self) -> bool {
        self.country.is_none() && self.city.is_none() && self.district.is_none() && self.street.is_none()
    }

    /// Set a component by name; unknown names are ignored
    pub fn set_component(&mut self, name: &str, value: &str) -> bool {
        let value = value.trim();
        if value.is_empty() {
            return false;
        }

        let slot = match name.trim().to_lowercase().as_str() {
            "country" => &mut self.country,
            "city" => &mut self.city,
            "district" | "neighborhood" | "neighbourhood" => &mut self.district,
            "street" | "plaza" => &mut self.street,
            _ => return false,
        };
        *slot = Some(value.to_string());
        true
    }

    /// Case and whitespace insensitive identity used to group candidates
    pub fn identity(&self) -> String {
        [&self.country, &self.city, &self.district, &self.street]
            .iter()
            .map(|part| part.as_deref().unwrap_or("").trim().to_lowercase())
            .collect::<Vec<_>>()
            .join("|")
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = [&self.street, &self.district, &self.city, &self.country]
            .iter()
            .filter_map(|part| part.as_deref())
            .collect();

        if parts.is_empty() {
            f.write_str("unknown")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionPayload {
    pub summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextPayload {
    pub has_text: bool,
    #[serde(default)]
    pub snippets: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectPayload {
    pub objects: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeolocationPayload {
    #[serde(default)]
    pub location: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub key_clues: Vec<String>,
    #[serde(default, deserialize_with = "lenient_confidence")]
    pub confidence: Confidence,
}

fn lenient_confidence<'de, D>(deserializer: D) -> Result<Confidence, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let label = Option::<String>::deserialize(deserializer)?;
    Ok(label.as_deref().map(Confidence::parse_label).unwrap_or_default())
}

/// Task-specific structured fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TaskPayload {
    Vision(VisionPayload),
    TextExtraction(TextPayload),
    ObjectDetection(ObjectPayload),
    Geolocation(GeolocationPayload),
}

impl TaskPayload {
    /// Empty payload of the right shape
    pub fn default_for(kind: TaskKind) -> Self {
        match kind {
            TaskKind::Vision => TaskPayload::Vision(VisionPayload::default()),
            TaskKind::TextExtraction => TaskPayload::TextExtraction(TextPayload::default()),
            TaskKind::ObjectDetection => TaskPayload::ObjectDetection(ObjectPayload::default()),
            TaskKind::Geolocation => TaskPayload::Geolocation(GeolocationPayload::default()),
        }
    }

    pub fn as_text(&self) -> Option<&TextPayload> {
        match self {
            TaskPayload::TextExtraction(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn as_geolocation(&self) -> Option<&GeolocationPayload> {
        match self {
            TaskPayload::Geolocation(payload) => Some(payload),
            _ => None,
        }
    }
}

/// Outcome of coercing a narrative into its payload shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Validation {
    Passed,
    Failed { error_kind: ErrorKind, note: String },
}

impl Validation {
    /// A response that did not match its task's shape
    pub fn schema_mismatch(note: impl Into<String>) -> Self {
        Validation::Failed {
            error_kind: ErrorKind::SchemaValidation,
            note: note.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSuccess {
    pub task: TaskKind,
    pub narrative: String,
    pub confidence: Confidence,
    pub payload: TaskPayload,
    pub validation: Validation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub task: TaskKind,
    pub error_kind: ErrorKind,
    pub message: String,
}

/// Outcome of one task. Every task boundary produces one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskResult {
    Success(TaskSuccess),
    Error(TaskFailure),
    Timeout(TaskFailure),
    CircuitOpen(TaskFailure),
}

impl TaskResult {
    /// Convert a failed call chain into a result
    pub fn from_error(task: TaskKind, error: &ServiceError) -> Self {
        let failure = TaskFailure {
            task,
            error_kind: error.kind(),
            message: error.to_string(),
        };

        match error {
            ServiceError::CircuitOpen(_) => TaskResult::CircuitOpen(failure),
            ServiceError::Timeout(_) | ServiceError::DeadlineExceeded(_) => TaskResult::Timeout(failure),
            _ => TaskResult::Error(failure),
        }
    }

    /// A task that was still pending when the request deadline expired
    pub fn deadline_expired(task: TaskKind) -> Self {
        TaskResult::Timeout(TaskFailure {
            task,
            error_kind: ErrorKind::DeadlineExceeded,
            message: "request deadline expired before the task completed".to_string(),
        })
    }

    pub fn task(&self) -> TaskKind {
        match self {
            TaskResult::Success(success) => success.task,
            TaskResult::Error(failure) | TaskResult::Timeout(failure) | TaskResult::CircuitOpen(failure) => {
                failure.task
            }
        }
    }

    /// Status label matching the serialized tag
    pub fn status(&self) -> &'static str {
        match self {
            TaskResult::Success(_) => "success",
            TaskResult::Error(_) => "error",
            TaskResult::Timeout(_) => "timeout",
            TaskResult::CircuitOpen(_) => "circuit_open",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskResult::Success(_))
    }

    pub fn success(&self) -> Option<&TaskSuccess> {
        match self {
            TaskResult::Success(success) => Some(success),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&TaskFailure> {
        match self {
            TaskResult::Success(_) => None,
            TaskResult::Error(failure) | TaskResult::Timeout(failure) | TaskResult::CircuitOpen(failure) => {
                Some(failure)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_task_kind_round_trip_labels() {
        for kind in TaskKind::ALL {
            assert_eq!(kind.as_str().parse::<TaskKind>().unwrap(), kind);
            assert_eq!(serde_json::to_string(&kind).unwrap(), format!("\"{}\"", kind.as_str()));
        }
        assert_eq!("OCR".parse::<TaskKind>().unwrap(), TaskKind::TextExtraction);
        assert!("weather".parse::<TaskKind>().is_err());
    }

    #[test]
    fn test_confidence_ordering() {
        assert!(Confidence::Unknown < Confidence::VeryLow);
        assert!(Confidence::Low < Confidence::Medium);
        assert!(Confidence::High < Confidence::VeryHigh);
        assert_eq!(Confidence::Low.raised(), Confidence::Medium);
        assert_eq!(Confidence::VeryHigh.raised(), Confidence::VeryHigh);
        assert_eq!(Confidence::parse_label("Very High"), Confidence::VeryHigh);
        assert_eq!(Confidence::parse_label("very-low"), Confidence::VeryLow);
        assert_eq!(Confidence::parse_label("certain"), Confidence::Unknown);
    }

    #[test]
    fn test_error_mapping() {
        let open = TaskResult::from_error(TaskKind::Vision, &ServiceError::circuit_open("open"));
        assert_eq!(open.status(), "circuit_open");

        let slow = TaskResult::from_error(TaskKind::Vision, &ServiceError::DeadlineExceeded(Duration::from_secs(1)));
        assert_eq!(slow.status(), "timeout");

        let auth = TaskResult::from_error(TaskKind::Geolocation, &ServiceError::permanent("401"));
        assert_eq!(auth.status(), "error");
        assert_eq!(auth.failure().unwrap().error_kind, ErrorKind::Permanent);
        assert_eq!(auth.task(), TaskKind::Geolocation);
    }

    #[test]
    fn test_result_serialization_tag() {
        let result = TaskResult::from_error(TaskKind::ObjectDetection, &ServiceError::rate_limited("429"));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["task"], "object-detection");
        assert_eq!(value["error_kind"], "rate_limited");
    }

    #[test]
    fn test_location_components() {
        let mut location = Location::default();
        assert!(location.is_empty());
        assert!(location.set_component("City", "Springfield"));
        assert!(!location.set_component("landmark", "Oak St Bridge"));
        assert_eq!(location.to_string(), "Springfield");
        assert_eq!(location.identity(), "|springfield||");
    }
}
