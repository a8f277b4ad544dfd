//! # Circuit Breaker
//!
//! Consecutive-failure circuit breaker shared by every caller of one
//! dependency. States move `Closed -> Open -> HalfOpen -> Closed`; while open
//! the breaker fails fast, and once the recovery timeout has elapsed a single
//! probe call decides whether it closes again or reopens.
//!
//! A breaker must be created once and handed out as `Arc<CircuitBreaker>`.
//! Creating one per request silently disables it, since every instance starts
//! with a zero failure count.

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::{Result, ServiceError};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation, requests allowed
    Closed,
    /// Failing, requests blocked
    Open,
    /// Testing recovery, a single probe allowed
    HalfOpen,
}

impl CircuitState {
    /// Stable label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker (at least 1)
    pub failure_threshold: u32,

    /// Time spent open before a probe is let through
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    /// Bumped on every state change; permits carry the value they were
    /// issued under.
    generation: u64,
}

impl BreakerState {
    fn enter(&mut self, state: CircuitState) {
        self.state = state;
        self.generation = self.generation.wrapping_add(1);
    }
}

/// Admission ticket returned by [`CircuitBreaker::acquire`].
///
/// The holder reports the outcome with [`Permit::success`] or
/// [`Permit::failure`]. Dropping the probe permit of a
/// half-open breaker without reporting counts as a failed probe, so an
/// abandoned probe cannot wedge the breaker in `HalfOpen`.
///
/// Outcomes reported after the breaker has changed state since the permit
/// was issued are ignored.
#[derive(Debug)]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
    generation: u64,
}

impl<'a> Permit<'a> {
    /// Whether this permit is the single half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Report a successful call
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.settle(self.generation, true);
    }

    /// Report a failed call
    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.settle(self.generation, false);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            debug!(breaker = %self.breaker.name, "Probe abandoned before completion");
            self.breaker.settle(self.generation, false);
        }
    }
}

/// Shared consecutive-failure circuit breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker in the closed state
    pub fn new<S: Into<String>>(name: S, config: CircuitBreakerConfig) -> Self {
        let mut config = config;
        config.failure_threshold = config.failure_threshold.max(1);

        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                probe_in_flight: false,
                generation: 0,
            }),
        }
    }

    /// Name of the protected dependency
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // State updates are single assignments, so a poisoned lock still
        // holds a consistent value.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current state. An open breaker whose recovery timeout has elapsed is
    /// still reported as `Open` until a caller is admitted as the probe.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Current consecutive failure count
    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Ask for permission to call the dependency.
    pub fn acquire(&self) -> Result<Permit<'_>> {
        let mut inner = self.lock();
        let state = inner.state;

        match state {
            CircuitState::Closed => Ok(Permit {
                breaker: self,
                probe: false,
                settled: false,
                generation: inner.generation,
            }),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|opened| opened.elapsed())
                    .unwrap_or_default();

                if elapsed >= self.config.recovery_timeout {
                    inner.enter(CircuitState::HalfOpen);
                    inner.probe_in_flight = true;
                    let generation = inner.generation;
                    drop(inner);
                    self.on_transition(CircuitState::HalfOpen);

                    Ok(Permit {
                        breaker: self,
                        probe: true,
                        settled: false,
                        generation,
                    })
                } else {
                    drop(inner);
                    self.on_rejected();
                    Err(ServiceError::circuit_open(format!(
                        "circuit '{}' is open, retry in {:?}",
                        self.name,
                        self.config.recovery_timeout.saturating_sub(elapsed)
                    )))
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    drop(inner);
                    self.on_rejected();
                    Err(ServiceError::circuit_open(format!(
                        "circuit '{}' is half-open, probe in flight",
                        self.name
                    )))
                } else {
                    inner.probe_in_flight = true;
                    Ok(Permit {
                        breaker: self,
                        probe: true,
                        settled: false,
                        generation: inner.generation,
                    })
                }
            }
        }
    }

    /// Apply the outcome of a permit issued under `generation`
    fn settle(&self, generation: u64, succeeded: bool) {
        let inner = self.lock();
        if inner.generation != generation {
            let state = inner.state;
            drop(inner);
            debug!(
                breaker = %self.name,
                state = %state,
                succeeded,
                "Ignoring outcome of a call admitted before the last state change"
            );
            return;
        }

        if succeeded {
            self.apply_success(inner);
        } else {
            self.apply_failure(inner);
        }
    }

    /// Record a failed call against the current state
    pub fn record_failure(&self) {
        self.apply_failure(self.lock());
    }

    fn apply_success(&self, mut inner: MutexGuard<'_, BreakerState>) {
        inner.failure_count = 0;
        inner.probe_in_flight = false;

        if inner.state != CircuitState::Closed {
            inner.enter(CircuitState::Closed);
            inner.opened_at = None;
            drop(inner);
            self.on_transition(CircuitState::Closed);
        }
    }

    fn apply_failure(&self, mut inner: MutexGuard<'_, BreakerState>) {
        inner.failure_count = inner.failure_count.saturating_add(1);

        let state = inner.state;
        let reopen = match state {
            CircuitState::Closed => inner.failure_count >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            // Already open; the recovery clock keeps running.
            CircuitState::Open => false,
        };

        if reopen {
            inner.enter(CircuitState::Open);
            inner.opened_at = Some(Instant::now());
            inner.probe_in_flight = false;
            let failures = inner.failure_count;
            drop(inner);

            warn!(
                breaker = %self.name,
                failures,
                threshold = self.config.failure_threshold,
                "Circuit breaker opened"
            );
            self.on_transition(CircuitState::Open);
        }
    }

    /// Run `operation` through the breaker. Rejected calls never invoke
    /// `operation`; every error it returns counts as one failure.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = self.acquire()?;

        match operation().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(error) => {
                debug!(breaker = %self.name, probe = permit.is_probe(), error = %error, "Call failed");
                permit.failure();
                Err(error)
            }
        }
    }

    fn on_transition(&self, to: CircuitState) {
        info!(breaker = %self.name, state = %to, "Circuit breaker state changed");
        counter!(
            "circuit_breaker_transitions_total",
            1,
            "breaker" => self.name.clone(),
            "state" => to.as_str()
        );
    }

    fn on_rejected(&self) {
        debug!(breaker = %self.name, "Call rejected by open circuit");
        counter!(
            "circuit_breaker_rejections_total",
            1,
            "breaker" => self.name.clone()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32, recovery: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: recovery,
            },
        )
    }

    async fn fail(cb: &CircuitBreaker) -> Result<()> {
        cb.call(|| async { Err(ServiceError::transient("boom")) }).await
    }

    #[tokio::test]
    async fn test_circuit_breaker_starts_closed() {
        let cb = breaker(3, Duration::from_secs(60));
        assert_eq!(cb.state(), CircuitState::Closed);

        let result = cb.call(|| async { Ok::<_, ServiceError>("ok") }).await;
        assert_eq!(result, Ok("ok"));
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_circuit_opens_at_threshold() {
        let cb = breaker(3, Duration::from_secs(60));

        for _ in 0..2 {
            let _ = fail(&cb).await;
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        let invoked = AtomicU32::new(0);
        let result = cb
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(ServiceError::CircuitOpen(_))));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let cb = breaker(3, Duration::from_secs(60));

        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.failure_count(), 2);

        let _ = cb.call(|| async { Ok::<_, ServiceError>(()) }).await;
        assert_eq!(cb.failure_count(), 0);

        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_success_closes() {
        let cb = breaker(1, Duration::from_millis(20));
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;

        let result = cb.call(|| async { Ok::<_, ServiceError>(7) }).await;
        assert_eq!(result, Ok(7));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(1, Duration::from_millis(20));
        let _ = fail(&cb).await;

        tokio::time::sleep(Duration::from_millis(30)).await;

        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        // Reopening restarts the recovery clock.
        let result = cb.call(|| async { Ok::<_, ServiceError>(()) }).await;
        assert!(matches!(result, Err(ServiceError::CircuitOpen(_))));
    }

    #[tokio::test]
    async fn test_half_open_admits_single_probe() {
        let cb = breaker(1, Duration::from_millis(10));
        let _ = fail(&cb).await;

        tokio::time::sleep(Duration::from_millis(20)).await;

        let probe = cb.acquire().expect("probe admitted");
        assert!(probe.is_probe());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert!(matches!(cb.acquire(), Err(ServiceError::CircuitOpen(_))));

        probe.success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.acquire().is_ok());
    }

    #[tokio::test]
    async fn test_outcomes_from_before_a_state_change_are_ignored() {
        let cb = breaker(2, Duration::from_millis(10));

        let slow_success = cb.acquire().expect("closed breaker admits");
        let slow_failure = cb.acquire().expect("closed breaker admits");
        assert!(!slow_success.is_probe());

        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;

        let probe = cb.acquire().expect("probe admitted");
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // Calls admitted while closed finish during the half-open trial.
        slow_success.success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(matches!(cb.acquire(), Err(ServiceError::CircuitOpen(_))));

        slow_failure.failure();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // Only the half-open call decides.
        probe.failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_abandoned_probe_reopens() {
        let cb = breaker(1, Duration::from_millis(10));
        let _ = fail(&cb).await;

        tokio::time::sleep(Duration::from_millis(20)).await;

        {
            let _probe = cb.acquire().expect("probe admitted");
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
