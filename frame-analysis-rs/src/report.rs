//! Fan-in: combines task results into one report.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::schema::{TaskKind, TaskPayload, TaskResult, Validation};

/// How much of the requested work succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Every requested task succeeded
    Complete,
    /// At least one task succeeded
    Partial,
    /// No task succeeded
    Degraded,
}

/// Result of one single-frame analysis.
///
/// Holds exactly one result per requested task kind. Contains no
/// timestamps or timings, so identical inputs served from cache serialize
/// to identical bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub status: ReportStatus,
    pub tasks: BTreeMap<TaskKind, TaskResult>,
    pub narrative: String,
}

impl AnalysisReport {
    /// Combine whatever results are available into a report
    pub fn combine(tasks: BTreeMap<TaskKind, TaskResult>) -> Self {
        let succeeded = tasks.values().filter(|r| r.is_success()).count();
        let status = if succeeded == tasks.len() && !tasks.is_empty() {
            ReportStatus::Complete
        } else if succeeded > 0 {
            ReportStatus::Partial
        } else {
            ReportStatus::Degraded
        };

        let narrative = render_narrative(&tasks);

        Self {
            status,
            tasks,
            narrative,
        }
    }

    pub fn get(&self, kind: TaskKind) -> Option<&TaskResult> {
        self.tasks.get(&kind)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

fn render_narrative(tasks: &BTreeMap<TaskKind, TaskResult>) -> String {
    let mut out = String::new();

    for (kind, result) in tasks {
        let _ = writeln!(out, "## {}", kind.title());

        match result {
            TaskResult::Success(success) => {
                let text = success.narrative.trim();
                if text.is_empty() {
                    out.push_str("(no narrative returned)\n");
                } else {
                    let _ = writeln!(out, "{}", text);
                }

                if let TaskPayload::Geolocation(ref geo) = success.payload {
                    if let Some(coordinates) = geo.coordinates {
                        let _ = writeln!(out, "Coordinates: {:.5}, {:.5}", coordinates.lat, coordinates.lon);
                    }
                }

                if let Validation::Failed { ref note, .. } = success.validation {
                    let _ = writeln!(out, "(validation failed: {})", note);
                }
            }
            other => {
                if let Some(failure) = other.failure() {
                    let _ = writeln!(out, "Status: {} ({})", other.status(), failure.message);
                }
            }
        }

        out.push('\n');
    }

    out.trim_end().to_string()
}
