//! Single-frame orchestration.
//!
//! First-stage tasks (vision, text extraction, object detection) fan out
//! concurrently and join at a barrier bounded by the request deadline.
//! Geolocation is a second-stage node: it starts once the first stage has
//! converged and receives excerpts of the successful first-stage narratives
//! in its context. Both stages share the one request deadline, and any task
//! still pending when it expires is reported as `timeout`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use resilience::{Deadline, RetryPolicy, TaskMetrics, TaskStats};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cache::{CacheStats, ResultCache};
use crate::client::{DefaultPrompts, PromptBuilder, ReasoningClient};
use crate::config::AnalysisSettings;
use crate::error::{AnalysisError, Result};
use crate::image::ImageInput;
use crate::registry::TaskRegistry;
use crate::report::AnalysisReport;
use crate::runner::TaskRunner;
use crate::schema::{TaskKind, TaskResult};

/// Longest excerpt of a first-stage narrative passed to geolocation
const ENRICHMENT_EXCERPT_CHARS: usize = 300;

/// Entry point for analysis requests
pub struct Orchestrator {
    settings: AnalysisSettings,
    registry: TaskRegistry,
    runner: TaskRunner,
    cache: Option<Arc<ResultCache>>,
    metrics: Arc<TaskMetrics>,
}

impl Orchestrator {
    /// Build an orchestrator with the default prompts
    pub fn new(settings: AnalysisSettings, client: Arc<dyn ReasoningClient>) -> Result<Self> {
        Self::with_prompts(settings, client, Arc::new(DefaultPrompts))
    }

    /// Build an orchestrator with custom prompts
    pub fn with_prompts(
        settings: AnalysisSettings,
        client: Arc<dyn ReasoningClient>,
        prompts: Arc<dyn PromptBuilder>,
    ) -> Result<Self> {
        settings.validate()?;

        let registry = TaskRegistry::from_settings(&settings);
        let cache = settings
            .cache_enabled
            .then(|| Arc::new(ResultCache::new(settings.cache_max_entries, settings.cache_ttl)));
        let metrics = Arc::new(TaskMetrics::new(settings.metrics_enabled));

        let runner = TaskRunner::new(
            client,
            prompts,
            cache.clone(),
            RetryPolicy::new("reasoning-service", settings.retry.clone()),
            metrics.clone(),
            settings.task_timeout,
        );

        Ok(Self {
            settings,
            registry,
            runner,
            cache,
            metrics,
        })
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Per-task call statistics
    pub fn task_stats(&self) -> BTreeMap<String, TaskStats> {
        self.metrics.snapshot()
    }

    /// Cache statistics, `None` when caching is disabled
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|cache| cache.stats())
    }

    /// Validate `image` and analyze it with `tasks`
    pub async fn analyze(&self, image: &str, context: &str, tasks: &[TaskKind]) -> Result<AnalysisReport> {
        let input = ImageInput::parse(image, self.settings.max_image_bytes)?;
        self.analyze_input(&input, context, tasks).await
    }

    /// Analyze an already validated image
    pub async fn analyze_input(
        &self,
        input: &ImageInput,
        context: &str,
        tasks: &[TaskKind],
    ) -> Result<AnalysisReport> {
        let requested: BTreeSet<TaskKind> = tasks.iter().copied().collect();
        if requested.is_empty() {
            return Err(AnalysisError::validation("at least one task must be requested"));
        }

        let request_id = Uuid::new_v4();
        let span = info_span!("analyze", %request_id, tasks = requested.len());

        async move {
            let deadline = Deadline::after(self.settings.request_timeout);

            let first_stage: Vec<TaskKind> = requested
                .iter()
                .copied()
                .filter(|kind| !kind.is_enrichment_stage())
                .collect();

            let mut results = self.run_stage(&first_stage, input, context, &deadline).await;

            let second_stage: Vec<TaskKind> = requested
                .iter()
                .copied()
                .filter(|kind| kind.is_enrichment_stage())
                .collect();

            if !second_stage.is_empty() {
                let enriched = enrichment_context(context, &results);
                let enriched_results = self.run_stage(&second_stage, input, &enriched, &deadline).await;
                results.extend(enriched_results);
            }

            let report = AnalysisReport::combine(results);
            info!(status = ?report.status, "Analysis finished");
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Run `kinds` concurrently until all finish or `deadline` expires
    async fn run_stage(
        &self,
        kinds: &[TaskKind],
        input: &ImageInput,
        context: &str,
        deadline: &Deadline,
    ) -> BTreeMap<TaskKind, TaskResult> {
        let mut results = BTreeMap::new();
        if kinds.is_empty() {
            return results;
        }

        if deadline.is_expired() {
            warn!(tasks = kinds.len(), "Request deadline expired before the stage started");
            return kinds
                .iter()
                .map(|&kind| (kind, TaskResult::deadline_expired(kind)))
                .collect();
        }

        debug!(
            tasks = kinds.len(),
            remaining_ms = deadline.remaining().as_millis() as u64,
            "Starting stage"
        );

        let mut pending: FuturesUnordered<_> = kinds
            .iter()
            .map(|&kind| {
                let task = self.registry.get(kind);
                async move { (kind, self.runner.run(task, input, context).await) }
            })
            .collect();

        loop {
            match tokio::time::timeout_at(deadline.instant(), pending.next()).await {
                Ok(Some((kind, result))) => {
                    results.insert(kind, result);
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        pending = kinds.len() - results.len(),
                        "Request deadline expired with tasks still running"
                    );
                    break;
                }
            }
        }

        for &kind in kinds {
            results
                .entry(kind)
                .or_insert_with(|| TaskResult::deadline_expired(kind));
        }

        results
    }
}

/// Caller context plus excerpts of the successful first-stage narratives
fn enrichment_context(context: &str, first_stage: &BTreeMap<TaskKind, TaskResult>) -> String {
    let mut enriched = context.trim().to_string();

    let findings: Vec<(TaskKind, String)> = first_stage
        .iter()
        .filter_map(|(kind, result)| result.success().map(|success| (*kind, success)))
        .filter(|(_, success)| !success.narrative.trim().is_empty())
        .map(|(kind, success)| (kind, excerpt(&success.narrative, ENRICHMENT_EXCERPT_CHARS)))
        .collect();

    if findings.is_empty() {
        return enriched;
    }

    if !enriched.is_empty() {
        enriched.push_str("\n\n");
    }
    enriched.push_str("Findings from the other analyses of this image:");
    for (kind, text) in findings {
        let _ = write!(enriched, "\n- {}: {}", kind, text);
    }

    enriched
}

/// First `max_chars` characters of `text` on a single line
pub(crate) fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut.trim_end())
    }
}
