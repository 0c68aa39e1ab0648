//! Configuration structures
//!
//! Every section has serde defaults so a partial TOML/JSON file (or an
//! environment that only overrides a few values) still yields a complete
//! [`Config`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_MAX_RETRIES, DEFAULT_POLL_INTERVAL_SECS,
    DEFAULT_PROCESSING_TIMEOUT_SECS, DEFAULT_RETRY_BACKOFF_SECS, DEFAULT_RETRY_BATCH_SIZE,
    DEFAULT_RETRY_INTERVAL_SECS,
};

/// Root configuration for a DualSync worker process.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub message_store: MessageStoreConfig,
    pub processor: ProcessorConfig,
    pub worker: WorkerConfig,
    pub relational: RelationalConfig,
    pub timeseries: TimeSeriesConfig,
    pub logging: LoggingConfig,
}

/// SQLite database holding the sync message table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "dualsync.db".to_string(), pool_size: 4 }
    }
}

/// Retry policy owned by the message store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MessageStoreConfig {
    /// Failed attempts allowed after the first one before dead-lettering.
    pub max_retries: u32,
    /// Base delay before a failed message becomes retryable again.
    pub retry_backoff_secs: u64,
}

impl Default for MessageStoreConfig {
    fn default() -> Self {
        Self { max_retries: DEFAULT_MAX_RETRIES, retry_backoff_secs: DEFAULT_RETRY_BACKOFF_SECS }
    }
}

/// Per-instance processor settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProcessorConfig {
    pub batch_size: usize,
    pub retry_batch_size: usize,
    /// Unique label for this processor instance. Generated when absent.
    pub worker_id: Option<String>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            retry_batch_size: DEFAULT_RETRY_BATCH_SIZE,
            worker_id: None,
        }
    }
}

impl ProcessorConfig {
    /// Returns the configured worker id or a fresh `worker-<uuid>` label.
    pub fn resolve_worker_id(&self) -> String {
        match &self.worker_id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => format!("worker-{}", uuid::Uuid::new_v4().simple()),
        }
    }
}

/// Polling cadence for the background worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    pub poll_interval_secs: u64,
    pub retry_interval_secs: u64,
    pub processing_timeout_secs: u64,
    pub join_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            retry_interval_secs: DEFAULT_RETRY_INTERVAL_SECS,
            processing_timeout_secs: DEFAULT_PROCESSING_TIMEOUT_SECS,
            join_timeout_secs: 5,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs.max(1))
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs.max(1))
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }
}

/// Relational (PostgreSQL) target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RelationalConfig {
    pub url: String,
    pub use_tls: bool,
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self { url: "postgres://localhost/dualsync".to_string(), use_tls: false }
    }
}

/// Time-series store location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeSeriesConfig {
    pub path: String,
    pub pool_size: u32,
}

impl Default for TimeSeriesConfig {
    fn default() -> Self {
        Self { path: "dualsync-timeseries.db".to_string(), pool_size: 4 }
    }
}

/// Tracing output settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}
