//! # Resilience
//!
//! Building blocks wrapped around every call to the external reasoning
//! service:
//!
//! - [`timeout`]: deadlines that stop waiting on slow calls
//! - [`retry`]: exponential backoff with jitter for transient failures
//! - [`circuit_breaker`]: a shared fail-fast guard with half-open probing
//! - [`monitoring`]: per-task counters and latency
//! - [`logging`]: global `tracing` subscriber setup
//!
//! Callers compose them outermost to innermost as metrics, timeout, retry,
//! circuit breaker, call. Retries therefore share one deadline, and the
//! breaker sees every retried attempt as its own success or failure.

pub mod circuit_breaker;
pub mod logging;
pub mod monitoring;
pub mod retry;
pub mod timeout;
pub mod types;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, Permit};
pub use logging::{init_logging, LoggingConfig};
pub use monitoring::{TaskMetrics, TaskStats};
pub use retry::{RetryConfig, RetryPolicy};
pub use timeout::{with_deadline, Deadline};
pub use types::{ErrorKind, Result, ServiceError};
