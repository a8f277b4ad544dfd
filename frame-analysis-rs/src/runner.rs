//! Runs one analysis task through cache, deadline, retry and breaker.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use resilience::{with_deadline, ErrorKind, RetryPolicy, ServiceError, TaskMetrics};
use tracing::{debug, warn};

use crate::cache::{cache_key, ResultCache};
use crate::client::{PromptBuilder, ReasoningClient};
use crate::image::ImageInput;
use crate::registry::AnalysisTask;
use crate::schema::TaskResult;
use crate::validate::validate;

fn status_of(outcome: &Result<String, ServiceError>) -> &'static str {
    match outcome {
        Ok(_) => "success",
        Err(error) => match error.kind() {
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Timeout | ErrorKind::DeadlineExceeded => "timeout",
            _ => "error",
        },
    }
}

/// Executes tasks against the reasoning service.
///
/// Layers, outermost first: metrics, task deadline, retry, circuit breaker,
/// service call. Retries share the one deadline, and each retried attempt
/// is a separate success or failure for the breaker, so a flapping backend
/// trips it sooner under retry.
pub struct TaskRunner {
    client: Arc<dyn ReasoningClient>,
    prompts: Arc<dyn PromptBuilder>,
    cache: Option<Arc<ResultCache>>,
    retry: RetryPolicy,
    metrics: Arc<TaskMetrics>,
    task_timeout: Duration,
}

impl TaskRunner {
    pub fn new(
        client: Arc<dyn ReasoningClient>,
        prompts: Arc<dyn PromptBuilder>,
        cache: Option<Arc<ResultCache>>,
        retry: RetryPolicy,
        metrics: Arc<TaskMetrics>,
        task_timeout: Duration,
    ) -> Self {
        Self {
            client,
            prompts,
            cache,
            retry,
            metrics,
            task_timeout,
        }
    }

    /// Run `task` on `input`. Never fails: every outcome is a [`TaskResult`].
    pub async fn run(&self, task: &AnalysisTask, input: &ImageInput, context: &str) -> TaskResult {
        let kind = task.kind();
        let key = cache_key(input, kind, context);

        if let Some(ref cache) = self.cache {
            if let Some(hit) = cache.get(&key) {
                debug!(task = %kind, "Cache hit");
                counter!("frame_analysis_cache_hits_total", 1, "task" => kind.as_str());
                return hit;
            }
        }

        let prompt = self.prompts.build(kind, context);
        let client = self.client.as_ref();
        let breaker = task.breaker().map(|breaker| breaker.as_ref());
        let image = input.data_uri();
        let prompt = prompt.as_str();

        let call_chain = with_deadline(
            self.task_timeout,
            self.retry.execute(kind.as_str(), move || async move {
                match breaker {
                    Some(breaker) => breaker.call(|| client.infer(image, prompt)).await,
                    None => client.infer(image, prompt).await,
                }
            }),
        );

        let outcome = self.metrics.observe(kind.as_str(), call_chain, status_of).await;

        match outcome {
            Ok(narrative) => {
                let result = TaskResult::Success(validate(kind, narrative));

                // Degraded successes are cached as well.
                if let Some(ref cache) = self.cache {
                    cache.insert(key, result.clone());
                }

                result
            }
            Err(error) => {
                warn!(task = %kind, error = %error, "Task failed");
                TaskResult::from_error(kind, &error)
            }
        }
    }
}
