//! # Frame Analysis
//!
//! Runs a fixed set of analysis tasks (visual description, text extraction,
//! object detection, geolocation) against a multimodal reasoning service and
//! combines their results into one report, degrading per task instead of
//! failing as a whole.
//!
//! - [`Orchestrator::analyze`] handles one image: concurrent first-stage
//!   tasks, then geolocation enriched with their findings.
//! - [`Orchestrator::analyze_sequence`] handles 2 or more images in order,
//!   carrying clues from earlier frames into later ones, and merges the
//!   per-frame geolocation results.
//!
//! Every task call is wrapped, outermost first, in metrics, a deadline,
//! retries and a per-task circuit breaker from the `resilience` crate, and
//! fully validated results are memoized in a TTL + LRU cache.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod geo_merge;
pub mod image;
pub mod openai;
pub mod orchestrator;
pub mod registry;
pub mod report;
pub mod runner;
pub mod schema;
pub mod session;
pub mod validate;

pub use cache::{cache_key, CacheStats, ResultCache, TtlLruCache};
pub use client::{DefaultPrompts, PromptBuilder, ReasoningClient};
pub use config::{
    AnalysisSettings, ConfigProvider, ConfigProviderExt, ContextCaps, EnvConfigProvider,
    GeoConfidenceThresholds, MemoryConfigProvider, ReasoningSettings,
};
pub use error::{AnalysisError, Result};
pub use geo_merge::{merge_geolocation, DetectedLocation, GeoObservation, MergedGeolocation};
pub use image::{ImageFormat, ImageInput};
pub use openai::OpenAiReasoningClient;
pub use orchestrator::Orchestrator;
pub use registry::{AnalysisTask, TaskRegistry};
pub use report::{AnalysisReport, ReportStatus};
pub use runner::TaskRunner;
pub use schema::{
    Confidence, Coordinates, GeolocationPayload, Location, ObjectPayload, TaskFailure, TaskKind,
    TaskPayload, TaskResult, TaskSuccess, TextPayload, Validation, VisionPayload,
};
pub use session::{Frame, FrameContext, FrameReport, MultiFrameReport, MultiFrameSession, SequenceOptions};
