#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use frame_analysis::{AnalysisSettings, Orchestrator, PromptBuilder, ReasoningClient, TaskKind};
use resilience::{RetryConfig, ServiceError};

type Handler = dyn Fn(TaskKind, &str, usize) -> Result<String, ServiceError> + Send + Sync;

/// Prompts of the form `<task>|<context>` so the fake can route by task
pub struct TaggedPrompts;

impl PromptBuilder for TaggedPrompts {
    fn build(&self, task: TaskKind, context: &str) -> String {
        format!("{}|{}", task.as_str(), context)
    }
}

/// Reasoning service fake answering through a handler that receives the
/// task, the context and the 1-based call number for that task.
pub struct ScriptedClient {
    handler: Box<Handler>,
    delays: HashMap<TaskKind, Duration>,
    calls: Mutex<Vec<(TaskKind, String)>>,
}

impl ScriptedClient {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(TaskKind, &str, usize) -> Result<String, ServiceError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            delays: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, kind: TaskKind, delay: Duration) -> Self {
        self.delays.insert(kind, delay);
        self
    }

    pub fn calls(&self, kind: TaskKind) -> usize {
        self.calls.lock().unwrap().iter().filter(|(k, _)| *k == kind).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn contexts(&self, kind: TaskKind) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, context)| context.clone())
            .collect()
    }
}

#[async_trait]
impl ReasoningClient for ScriptedClient {
    async fn infer(&self, image: &str, prompt: &str) -> Result<String, ServiceError> {
        assert!(image.starts_with("data:image/"), "image must be a data URI");

        let (task, context) = prompt.split_once('|').expect("tagged prompt");
        let kind: TaskKind = task.parse().expect("known task");

        let call_number = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((kind, context.to_string()));
            calls.iter().filter(|(k, _)| *k == kind).count()
        };

        if let Some(delay) = self.delays.get(&kind) {
            tokio::time::sleep(*delay).await;
        }

        (self.handler)(kind, context, call_number)
    }
}

/// A tiny PNG-signed payload; `seed` makes distinct images
pub fn png_image(seed: u8) -> String {
    let bytes = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, seed];
    STANDARD.encode(bytes)
}

/// Fast settings: one attempt, tiny backoff, generous deadlines
pub fn test_settings() -> AnalysisSettings {
    AnalysisSettings {
        task_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_secs(5),
        retry: RetryConfig {
            max_attempts: 1,
            min_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            jitter_factor: 0.0,
        },
        ..AnalysisSettings::default()
    }
}

pub fn orchestrator(settings: AnalysisSettings, client: Arc<ScriptedClient>) -> Orchestrator {
    Orchestrator::with_prompts(settings, client, Arc::new(TaggedPrompts)).expect("valid settings")
}

/// Plain successful answer for every task kind
pub fn default_answer(kind: TaskKind) -> String {
    match kind {
        TaskKind::Vision => "A narrow street with a tram at dusk.".to_string(),
        TaskKind::TextExtraction => "The sign reads \"OAK ST\".".to_string(),
        TaskKind::ObjectDetection => "- tram\n- street lamp".to_string(),
        TaskKind::Geolocation => "City: Springfield\nConfidence: low\nKey clues:\n- city=Springfield".to_string(),
    }
}
