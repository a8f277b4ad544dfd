//! Process-lifetime task instances.
//!
//! Each [`AnalysisTask`] receives its circuit breaker through the
//! constructor and the registry builds exactly one task per kind at
//! startup. Request handling only ever borrows these instances, so breaker
//! state accumulates across every request that touches a task kind.

use std::sync::Arc;

use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use tracing::info;

use crate::config::AnalysisSettings;
use crate::schema::TaskKind;

/// One analysis task kind and the breaker guarding its calls
#[derive(Debug)]
pub struct AnalysisTask {
    kind: TaskKind,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl AnalysisTask {
    /// A task guarded by `breaker`; `None` disables circuit breaking
    pub fn new(kind: TaskKind, breaker: Option<Arc<CircuitBreaker>>) -> Self {
        Self { kind, breaker }
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    /// Breaker state, `None` when circuit breaking is disabled
    pub fn circuit_state(&self) -> Option<CircuitState> {
        self.breaker.as_ref().map(|breaker| breaker.state())
    }
}

/// The fixed set of task instances
#[derive(Debug)]
pub struct TaskRegistry {
    tasks: Vec<AnalysisTask>,
}

impl TaskRegistry {
    /// Build one task per kind, each with its own breaker when enabled
    pub fn from_settings(settings: &AnalysisSettings) -> Self {
        let config = settings.circuit_breaker_enabled.then(|| settings.circuit_breaker.clone());
        Self::with_breaker_config(config)
    }

    /// Build one task per kind from an optional breaker configuration
    pub fn with_breaker_config(config: Option<CircuitBreakerConfig>) -> Self {
        let tasks = TaskKind::ALL
            .iter()
            .map(|&kind| {
                let breaker = config
                    .clone()
                    .map(|config| Arc::new(CircuitBreaker::new(kind.as_str(), config)));
                AnalysisTask::new(kind, breaker)
            })
            .collect();

        info!(
            tasks = TaskKind::ALL.len(),
            circuit_breaking = config.is_some(),
            "Task registry initialized"
        );

        Self { tasks }
    }

    /// The task instance for `kind`
    pub fn get(&self, kind: TaskKind) -> &AnalysisTask {
        &self.tasks[kind.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnalysisTask> {
        self.tasks.iter()
    }
}
