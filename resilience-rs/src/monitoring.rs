//! # Task Metrics
//!
//! Per-task call counters and latency, published through the `metrics`
//! facade and mirrored into an in-memory snapshot for callers that have no
//! recorder installed.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Accumulated statistics for one task name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStats {
    /// Total observed calls
    pub calls: u64,
    /// Calls per final status label
    pub by_status: BTreeMap<String, u64>,
    /// Sum of observed latencies
    pub total_latency_ms: u64,
    /// Fastest observed call
    pub min_latency_ms: u64,
    /// Slowest observed call
    pub max_latency_ms: u64,
}

impl TaskStats {
    /// Mean latency over all observed calls
    pub fn mean_latency_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.calls as f64
        }
    }

    /// Number of calls that ended with `status`
    pub fn count(&self, status: &str) -> u64 {
        self.by_status.get(status).copied().unwrap_or(0)
    }

    /// Share of calls that ended with `success`, in `0.0..=1.0`
    pub fn success_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.count("success") as f64 / self.calls as f64
        }
    }
}

/// Metrics sink shared by all task runners
#[derive(Debug, Default)]
pub struct TaskMetrics {
    enabled: bool,
    stats: Mutex<HashMap<String, TaskStats>>,
}

impl TaskMetrics {
    /// Create a metrics sink. A disabled sink records nothing.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Whether recording is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record one finished call
    pub fn record(&self, task: &str, status: &'static str, latency: Duration) {
        if !self.enabled {
            return;
        }

        let latency_ms = latency.as_millis() as u64;

        counter!(
            "frame_analysis_task_calls_total",
            1,
            "task" => task.to_string(),
            "status" => status
        );
        histogram!(
            "frame_analysis_task_latency_ms",
            latency_ms as f64,
            "task" => task.to_string()
        );

        let mut stats = self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = stats.entry(task.to_string()).or_default();
        entry.min_latency_ms = if entry.calls == 0 {
            latency_ms
        } else {
            entry.min_latency_ms.min(latency_ms)
        };
        entry.calls += 1;
        *entry.by_status.entry(status.to_string()).or_insert(0) += 1;
        entry.total_latency_ms += latency_ms;
        entry.max_latency_ms = entry.max_latency_ms.max(latency_ms);

        debug!(task, status, latency_ms, "Task call recorded");
    }

    /// Await `fut`, then record its latency under the status chosen by
    /// `classify`.
    pub async fn observe<Fut, T, C>(&self, task: &str, fut: Fut, classify: C) -> T
    where
        Fut: Future<Output = T>,
        C: FnOnce(&T) -> &'static str,
    {
        let started = Instant::now();
        let output = fut.await;
        self.record(task, classify(&output), started.elapsed());
        output
    }

    /// Snapshot of all statistics, keyed by task name
    pub fn snapshot(&self) -> BTreeMap<String, TaskStats> {
        let stats = self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        stats.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}
