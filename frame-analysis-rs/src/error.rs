//! Caller-facing errors.
//!
//! Failures of individual tasks never surface here; they are reported as
//! task results inside the analysis report. Only problems with the request
//! itself or with the settings reach the caller.

use thiserror::Error;

/// A type alias for Result with the error type defaulting to [`AnalysisError`]
pub type Result<T, E = AnalysisError> = std::result::Result<T, E>;

/// Errors returned by the orchestrator entry points
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    /// Malformed input: bad image, bad task set, bad frame count
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or invalid settings
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl AnalysisError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        AnalysisError::Validation(message.into())
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        AnalysisError::Configuration(message.into())
    }
}
