//! # Error Taxonomy
//!
//! Errors raised by the external reasoning service and by the resilience
//! layer wrapped around it.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A type alias for Result with the error type defaulting to [`ServiceError`]
pub type Result<T, E = ServiceError> = std::result::Result<T, E>;

/// Classification label attached to every failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The service throttled the request
    RateLimited,
    /// The remote call itself timed out
    Timeout,
    /// Connection reset, DNS hiccup, 5xx and friends
    TransientNetwork,
    /// Authentication, malformed request and other non-recoverable failures
    Permanent,
    /// The circuit breaker rejected the call without contacting the service
    CircuitOpen,
    /// The local deadline expired before the call completed
    DeadlineExceeded,
    /// A response arrived but did not match the expected shape
    SchemaValidation,
}

impl ErrorKind {
    /// Stable label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Timeout => "timeout",
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::Permanent => "permanent",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::SchemaValidation => "schema_validation",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a call to the reasoning service, as seen by the orchestrator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Rate limiting errors
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Remote timeout errors
    #[error("Remote timeout: {0}")]
    Timeout(String),

    /// Network or connection errors
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// Validation, authentication and other permanent errors
    #[error("Permanent error: {0}")]
    Permanent(String),

    /// Circuit breaker open errors
    #[error("Circuit open: {0}")]
    CircuitOpen(String),

    /// Local deadline expiry
    #[error("Deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

impl ServiceError {
    /// Create a rate limit error
    pub fn rate_limited(message: impl Into<String>) -> Self {
        ServiceError::RateLimited(message.into())
    }

    /// Create a remote timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        ServiceError::Timeout(message.into())
    }

    /// Create a transient network error
    pub fn transient(message: impl Into<String>) -> Self {
        ServiceError::TransientNetwork(message.into())
    }

    /// Create a permanent error
    pub fn permanent(message: impl Into<String>) -> Self {
        ServiceError::Permanent(message.into())
    }

    /// Create a circuit open error
    pub fn circuit_open(message: impl Into<String>) -> Self {
        ServiceError::CircuitOpen(message.into())
    }

    /// Classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::RateLimited(_) => ErrorKind::RateLimited,
            ServiceError::Timeout(_) => ErrorKind::Timeout,
            ServiceError::TransientNetwork(_) => ErrorKind::TransientNetwork,
            ServiceError::Permanent(_) => ErrorKind::Permanent,
            ServiceError::CircuitOpen(_) => ErrorKind::CircuitOpen,
            ServiceError::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
        }
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::RateLimited(_) | ServiceError::Timeout(_) | ServiceError::TransientNetwork(_)
        )
    }
}
