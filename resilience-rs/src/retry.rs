//! # Retry Mechanism
//!
//! Retries a fallible async operation with exponential backoff and jitter.
//! Only errors for which [`ServiceError::is_retryable`] holds are retried;
//! everything else is returned after the first attempt. When a retry is
//! rejected by a circuit breaker that the earlier attempts tripped, the
//! caller sees the error those attempts produced.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::types::{Result, ServiceError};

/// Configuration for a retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one (at least 1)
    pub max_attempts: u32,

    /// Lower bound and base of the exponential backoff
    pub min_backoff: Duration,

    /// Upper bound of any single backoff
    pub max_backoff: Duration,

    /// Jitter factor (0.0 - 1.0) added on top of the exponential step
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(10),
            jitter_factor: 0.1,
        }
    }
}

/// A retry policy that determines how to handle retries
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Configuration for this policy
    config: RetryConfig,

    /// Name of the policy (for logs)
    name: String,
}

impl RetryPolicy {
    /// Creates a new retry policy with the given name and configuration
    pub fn new<S: Into<String>>(name: S, config: RetryConfig) -> Self {
        let mut config = config;
        config.max_attempts = config.max_attempts.max(1);
        config.jitter_factor = config.jitter_factor.clamp(0.0, 1.0);

        Self {
            config,
            name: name.into(),
        }
    }

    /// Get the current retry configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Calculates the sleep before the retry that follows failed attempt
    /// number `attempt` (zero based): `min(max, min * 2^attempt + jitter)`.
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.config.min_backoff.as_millis() as f64;
        let max_ms = self.config.max_backoff.as_millis() as f64;

        let exp_backoff = base_ms * 2.0_f64.powi(attempt.min(30) as i32);

        let jitter_range = exp_backoff * self.config.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(0.0..jitter_range)
        } else {
            0.0
        };

        let final_ms = (exp_backoff + jitter).min(max_ms).max(base_ms.min(max_ms));
        Duration::from_millis(final_ms as u64)
    }

    /// Executes `operation` until it succeeds, fails permanently, or the
    /// attempt budget is spent. The last dependency error is propagated
    /// unchanged.
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        let mut last_error: Option<ServiceError> = None;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(
                            policy = %self.name,
                            operation = %operation_name,
                            attempts = attempt + 1,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(ServiceError::CircuitOpen(message)) if last_error.is_some() => {
                    debug!(
                        policy = %self.name,
                        operation = %operation_name,
                        attempts = attempt + 1,
                        reason = %message,
                        "Circuit opened during retries"
                    );
                    return Err(last_error.unwrap_or(ServiceError::CircuitOpen(message)));
                }
                Err(error) => {
                    let exhausted = attempt + 1 >= self.config.max_attempts;

                    if !error.is_retryable() {
                        debug!(
                            policy = %self.name,
                            operation = %operation_name,
                            error = %error,
                            "Not retrying permanent error"
                        );
                        return Err(error);
                    }

                    if exhausted {
                        warn!(
                            policy = %self.name,
                            operation = %operation_name,
                            attempts = attempt + 1,
                            error = %error,
                            "Giving up after retries"
                        );
                        return Err(error);
                    }

                    let backoff = self.calculate_backoff(attempt);
                    warn!(
                        policy = %self.name,
                        operation = %operation_name,
                        attempt = attempt + 1,
                        max_attempts = self.config.max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "Retrying after error"
                    );

                    last_error = Some(error);
                    sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl fmt::Display for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RetryPolicy({}, max_attempts={})", self.name, self.config.max_attempts)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new("default", RetryConfig::default())
    }
}
