//! # Structured Logging
//!
//! Installs the global `tracing` subscriber used by the orchestrator and its
//! CLI. Filtering honours `RUST_LOG` and falls back to the configured level.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

// Flag to track if logging has been initialized
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Configuration for the logging system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// The log level to use (trace, debug, info, warn, error)
    pub level: String,
    /// The service name attached to the startup event
    pub service_name: String,
    /// Whether to use JSON formatting
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            service_name: "frame-analysis".to_string(),
            json_format: false,
        }
    }
}

/// Initializes the global subscriber.
///
/// Returns `true` when this call installed the subscriber and `false` when
/// logging was already set up, either by an earlier call or by someone else
/// (test harnesses commonly install their own).
pub fn init_logging(config: LoggingConfig) -> bool {
    if LOGGING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return false;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hyper=warn,reqwest=warn", config.level)));

    let json_layer = config.json_format.then(|| {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
            .with_span_list(true)
    });
    let text_layer = (!config.json_format).then(|| fmt::layer().with_target(true));

    let installed = Registry::default()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(
            service = %config.service_name,
            level = %config.level,
            json = config.json_format,
            "Structured logging initialized"
        );
    }

    installed
}
