//! Settings for the orchestrator.
//!
//! Values are read as plain key/value strings through a [`ConfigProvider`]
//! and assembled into a validated [`AnalysisSettings`].

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use resilience::{CircuitBreakerConfig, RetryConfig};

use crate::error::{AnalysisError, Result};

/// Prefix used by [`EnvConfigProvider::default`]
pub const ENV_PREFIX: &str = "FRAME_ANALYSIS";

/// Upper bound for every timeout and backoff setting
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Upper bound for `cache_ttl_seconds`
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Base trait for configuration providers
pub trait ConfigProvider: Send + Sync {
    /// Raw value for `key`, `None` when unset
    fn lookup(&self, key: &str) -> Option<String>;
}

/// Typed reads on top of [`ConfigProvider::lookup`].
///
/// The `_or` variants fall back to the default only when the key is unset;
/// a value that is present but unparsable is a configuration error.
pub trait ConfigProviderExt: ConfigProvider {
    /// Get a string value with a default
    fn get_string_or(&self, key: &str, default: &str) -> String {
        self.lookup(key).unwrap_or_else(|| default.to_string())
    }

    /// Get an unsigned integer value with a default
    fn get_u64_or(&self, key: &str, default: u64) -> Result<u64> {
        parse_or(self.lookup(key), key, default)
    }

    /// Get a 32-bit unsigned integer value with a default. Values that do
    /// not fit are rejected rather than truncated.
    fn get_u32_or(&self, key: &str, default: u32) -> Result<u32> {
        let value = self.get_u64_or(key, u64::from(default))?;
        u32::try_from(value).map_err(|_| {
            AnalysisError::configuration(format!("Value for key {} is out of range: {}", key, value))
        })
    }

    /// Get a float value with a default
    fn get_f64_or(&self, key: &str, default: f64) -> Result<f64> {
        parse_or(self.lookup(key), key, default)
    }

    /// Get a boolean value with a default
    fn get_bool_or(&self, key: &str, default: bool) -> Result<bool> {
        match self.lookup(key) {
            None => Ok(default),
            Some(value) => match value.trim().to_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Ok(true),
                "false" | "no" | "0" | "off" => Ok(false),
                _ => Err(AnalysisError::configuration(format!(
                    "Invalid boolean value for key {}: {}",
                    key, value
                ))),
            },
        }
    }
}

impl<T: ConfigProvider + ?Sized> ConfigProviderExt for T {}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| {
            AnalysisError::configuration(format!("Invalid value for key {}: {}", key, e))
        }),
    }
}

/// Environment variable based configuration provider
#[derive(Debug, Clone)]
pub struct EnvConfigProvider {
    prefix: Option<String>,
}

impl Default for EnvConfigProvider {
    fn default() -> Self {
        Self {
            prefix: Some(ENV_PREFIX.to_string()),
        }
    }
}

impl EnvConfigProvider {
    /// Provider reading `FRAME_ANALYSIS_<KEY>` variables
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider reading `<prefix>_<KEY>` variables
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    /// Provider reading unprefixed `<KEY>` variables
    pub fn unprefixed() -> Self {
        Self { prefix: None }
    }

    fn format_key(&self, key: &str) -> String {
        let key = key
            .to_uppercase()
            .replace(|c: char| !c.is_ascii_alphanumeric(), "_");

        match self.prefix {
            Some(ref prefix) => format!("{}_{}", prefix, key),
            None => key,
        }
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn lookup(&self, key: &str) -> Option<String> {
        env::var(self.format_key(key)).ok()
    }
}

/// In-memory config provider for tests and static configuration
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigProvider {
    values: HashMap<String, String>,
}

impl MemoryConfigProvider {
    /// Create a new empty provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a configuration value
    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: ToString,
    {
        self.values.insert(key.into(), value.to_string());
    }

    /// Builder-style variant of [`MemoryConfigProvider::set`]
    pub fn with<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: ToString,
    {
        self.set(key, value);
        self
    }
}

impl ConfigProvider for MemoryConfigProvider {
    fn lookup(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Connection settings for the external reasoning service
#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
}

impl Default for ReasoningSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 1024,
        }
    }
}

/// Thresholds for escalating merged geolocation confidence by clue count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeoConfidenceThresholds {
    /// Distinct clues needed for `medium`
    pub medium_clue_count: usize,
    /// Distinct clues needed for `high`
    pub high_clue_count: usize,
}

impl Default for GeoConfidenceThresholds {
    fn default() -> Self {
        Self {
            medium_clue_count: 2,
            high_clue_count: 6,
        }
    }
}

/// Caps of the rolling lists carried between frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextCaps {
    pub geo_clues: usize,
    pub text_snippets: usize,
    pub object_mentions: usize,
}

impl Default for ContextCaps {
    fn default() -> Self {
        Self {
            geo_clues: 10,
            text_snippets: 5,
            object_mentions: 5,
        }
    }
}

/// Complete, validated orchestrator settings
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSettings {
    /// Bound on one task's call chain, retries included
    pub task_timeout: Duration,
    /// Bound on one whole single-frame analysis
    pub request_timeout: Duration,
    pub retry: RetryConfig,
    pub circuit_breaker_enabled: bool,
    pub circuit_breaker: CircuitBreakerConfig,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub max_frames: usize,
    pub max_image_bytes: usize,
    pub context_caps: ContextCaps,
    pub geo_thresholds: GeoConfidenceThresholds,
    pub metrics_enabled: bool,
    pub reasoning: ReasoningSettings,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(90),
            retry: RetryConfig {
                max_attempts: 3,
                min_backoff: Duration::from_millis(2000),
                max_backoff: Duration::from_millis(10000),
                jitter_factor: 0.1,
            },
            circuit_breaker_enabled: true,
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 5,
                recovery_timeout: Duration::from_secs(60),
            },
            cache_enabled: true,
            cache_ttl: Duration::from_secs(3600),
            cache_max_entries: 500,
            max_frames: 10,
            max_image_bytes: 10 * 1024 * 1024,
            context_caps: ContextCaps::default(),
            geo_thresholds: GeoConfidenceThresholds::default(),
            metrics_enabled: true,
            reasoning: ReasoningSettings::default(),
        }
    }
}

impl AnalysisSettings {
    /// Load settings from a provider, falling back to defaults for unset keys
    pub fn from_provider<P: ConfigProvider + ?Sized>(provider: &P) -> Result<Self> {
        let defaults = Self::default();

        let settings = Self {
            task_timeout: Duration::from_secs(
                provider.get_u64_or("task_timeout_seconds", defaults.task_timeout.as_secs())?,
            ),
            request_timeout: Duration::from_secs(
                provider.get_u64_or("request_timeout_seconds", defaults.request_timeout.as_secs())?,
            ),
            retry: RetryConfig {
                max_attempts: provider.get_u32_or("retry_max_attempts", defaults.retry.max_attempts)?,
                min_backoff: Duration::from_millis(provider.get_u64_or(
                    "retry_min_wait_ms",
                    defaults.retry.min_backoff.as_millis() as u64,
                )?),
                max_backoff: Duration::from_millis(provider.get_u64_or(
                    "retry_max_wait_ms",
                    defaults.retry.max_backoff.as_millis() as u64,
                )?),
                jitter_factor: provider.get_f64_or("retry_jitter", defaults.retry.jitter_factor)?,
            },
            circuit_breaker_enabled: provider
                .get_bool_or("circuit_breaker_enabled", defaults.circuit_breaker_enabled)?,
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: provider.get_u32_or(
                    "circuit_breaker_failure_threshold",
                    defaults.circuit_breaker.failure_threshold,
                )?,
                recovery_timeout: Duration::from_secs(provider.get_u64_or(
                    "circuit_breaker_recovery_timeout_seconds",
                    defaults.circuit_breaker.recovery_timeout.as_secs(),
                )?),
            },
            cache_enabled: provider.get_bool_or("cache_enabled", defaults.cache_enabled)?,
            cache_ttl: Duration::from_secs(
                provider.get_u64_or("cache_ttl_seconds", defaults.cache_ttl.as_secs())?,
            ),
            cache_max_entries: provider
                .get_u64_or("cache_max_entries", defaults.cache_max_entries as u64)?
                as usize,
            max_frames: provider.get_u64_or("max_frames", defaults.max_frames as u64)? as usize,
            max_image_bytes: provider
                .get_u64_or("max_image_bytes", defaults.max_image_bytes as u64)?
                as usize,
            context_caps: ContextCaps {
                geo_clues: provider
                    .get_u64_or("context_geo_clues", defaults.context_caps.geo_clues as u64)?
                    as usize,
                text_snippets: provider.get_u64_or(
                    "context_text_snippets",
                    defaults.context_caps.text_snippets as u64,
                )? as usize,
                object_mentions: provider.get_u64_or(
                    "context_object_mentions",
                    defaults.context_caps.object_mentions as u64,
                )? as usize,
            },
            geo_thresholds: GeoConfidenceThresholds {
                medium_clue_count: provider.get_u64_or(
                    "geo_medium_clue_count",
                    defaults.geo_thresholds.medium_clue_count as u64,
                )? as usize,
                high_clue_count: provider.get_u64_or(
                    "geo_high_clue_count",
                    defaults.geo_thresholds.high_clue_count as u64,
                )? as usize,
            },
            metrics_enabled: provider.get_bool_or("metrics_enabled", defaults.metrics_enabled)?,
            reasoning: ReasoningSettings {
                base_url: provider.get_string_or("reasoning_base_url", &defaults.reasoning.base_url),
                api_key: provider.lookup("reasoning_api_key").filter(|key| !key.is_empty()),
                model: provider.get_string_or("reasoning_model", &defaults.reasoning.model),
                max_tokens: provider.get_u32_or("reasoning_max_tokens", defaults.reasoning.max_tokens)?,
            },
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from `FRAME_ANALYSIS_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_provider(&EnvConfigProvider::new())
    }

    /// Check invariants between fields
    pub fn validate(&self) -> Result<()> {
        if self.task_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(AnalysisError::configuration("timeouts must be greater than zero"));
        }

        for (key, value) in [
            ("task_timeout_seconds", self.task_timeout),
            ("request_timeout_seconds", self.request_timeout),
            ("circuit_breaker_recovery_timeout_seconds", self.circuit_breaker.recovery_timeout),
            ("retry_max_wait_ms", self.retry.max_backoff),
        ] {
            if value > MAX_TIMEOUT {
                return Err(AnalysisError::configuration(format!(
                    "{} must not exceed {} seconds",
                    key,
                    MAX_TIMEOUT.as_secs()
                )));
            }
        }

        if self.cache_ttl > MAX_CACHE_TTL {
            return Err(AnalysisError::configuration(format!(
                "cache_ttl_seconds must not exceed {} seconds",
                MAX_CACHE_TTL.as_secs()
            )));
        }

        if self.retry.max_attempts < 1 {
            return Err(AnalysisError::configuration("retry_max_attempts must be at least 1"));
        }

        if self.retry.min_backoff > self.retry.max_backoff {
            return Err(AnalysisError::configuration(
                "retry_min_wait_ms must not exceed retry_max_wait_ms",
            ));
        }

        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(AnalysisError::configuration("retry_jitter must be within 0.0..=1.0"));
        }

        if self.circuit_breaker.failure_threshold < 1 {
            return Err(AnalysisError::configuration(
                "circuit_breaker_failure_threshold must be at least 1",
            ));
        }

        if self.circuit_breaker.recovery_timeout.is_zero() {
            return Err(AnalysisError::configuration(
                "circuit_breaker_recovery_timeout_seconds must be greater than zero",
            ));
        }

        if self.cache_enabled && (self.cache_max_entries < 1 || self.cache_ttl.is_zero()) {
            return Err(AnalysisError::configuration(
                "cache needs at least one entry and a non-zero TTL when enabled",
            ));
        }

        if self.max_frames < 2 {
            return Err(AnalysisError::configuration("max_frames must be at least 2"));
        }

        if self.max_image_bytes == 0 {
            return Err(AnalysisError::configuration("max_image_bytes must be greater than zero"));
        }

        if self.geo_thresholds.medium_clue_count > self.geo_thresholds.high_clue_count {
            return Err(AnalysisError::configuration(
                "geo_medium_clue_count must not exceed geo_high_clue_count",
            ));
        }

        Ok(())
    }
}
