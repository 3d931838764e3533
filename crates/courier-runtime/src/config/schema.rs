//! Configuration schema definitions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::error::{ConfigError, ConfigResult};
use courier_ingest::IngestConfig;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CourierConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Ingestion pipeline settings.
    #[serde(default)]
    pub ingest: IngestSettings,
}

impl CourierConfig {
    /// Rejects configurations that would deadlock or do nothing at runtime.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.ingest.workers == 0 {
            return Err(ConfigError::Invalid(
                "ingest.workers must be at least 1".to_string(),
            ));
        }
        if self.ingest.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "ingest.queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Ingestion pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSettings {
    /// Capacity of the producer/worker hand-off queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Number of worker tasks dispatching concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Long-poll timeout the update source should use, in seconds.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    /// Per-item budget to enqueue an in-flight update during drain.
    #[serde(default = "default_enqueue_budget_ms")]
    pub enqueue_budget_ms: u64,

    /// Overall drain budget once shutdown begins.
    #[serde(default = "default_drain_budget_ms")]
    pub drain_budget_ms: u64,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
            poll_timeout_secs: default_poll_timeout_secs(),
            enqueue_budget_ms: default_enqueue_budget_ms(),
            drain_budget_ms: default_drain_budget_ms(),
        }
    }
}

impl IngestSettings {
    /// Converts to the pipeline's config type.
    pub fn to_ingest_config(&self) -> IngestConfig {
        IngestConfig {
            queue_capacity: self.queue_capacity,
            workers: self.workers,
            enqueue_budget: Duration::from_millis(self.enqueue_budget_ms),
            drain_budget: Duration::from_millis(self.drain_budget_ms),
        }
    }
}

fn default_queue_capacity() -> usize {
    256
}

fn default_workers() -> usize {
    4
}

fn default_poll_timeout_secs() -> u64 {
    60
}

fn default_enqueue_budget_ms() -> u64 {
    2000
}

fn default_drain_budget_ms() -> u64 {
    5000
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Output destination.
    #[serde(default)]
    pub output: LogOutput,

    /// Log file path, used when `output` is `file`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Per-module level overrides, e.g. `courier_router = "trace"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            file_path: None,
            filters: HashMap::new(),
        }
    }
}

/// Log verbosity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Maps to the tracing level.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }

    /// The lowercase directive spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Log output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    #[cfg(feature = "json-log")]
    Json,
}

/// Log output destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}
