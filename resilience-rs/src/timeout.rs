//! # Deadlines
//!
//! Bounds the time spent waiting on a future. Expiry drops the future, which
//! stops waiting for it; work it already handed to a remote service may
//! still complete there, and its result is discarded.

use std::future::Future;
use std::time::Duration;

use tokio::time::{timeout, Instant};

use crate::types::{Result, ServiceError};

/// Await `fut` for at most `limit`, mapping expiry to
/// [`ServiceError::DeadlineExceeded`].
pub async fn with_deadline<F, T>(limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::DeadlineExceeded(limit)),
    }
}

// Ten years stands in for "never" when `now + budget` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// An absolute point in time shared by several concurrent operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// A deadline `budget` from now, saturating at a far-future instant
    pub fn after(budget: Duration) -> Self {
        let now = Instant::now();
        let at = now
            .checked_add(budget)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);

        Self { at }
    }

    /// The instant at which the deadline expires
    pub fn instant(&self) -> Instant {
        self.at
    }

    /// Time left before expiry, zero once expired
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }
}
