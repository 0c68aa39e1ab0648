//! Domain-level constants shared by the executor, the stores and the worker.

/// Identifier attributes every addressable record must carry.
pub const REQUIRED_IDENTIFIER_FIELDS: [&str; 3] = ["symbol", "kind", "granularity"];

// Processor defaults
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_RETRY_BATCH_SIZE: usize = 50;

// Message store defaults (retry policy lives in the store, not the processor)
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_SECS: u64 = 30;
pub const MAX_RETRY_BACKOFF_SECS: u64 = 3_600;

// Worker cadence defaults
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_PROCESSING_TIMEOUT_SECS: u64 = 300;

/// Longest error message persisted against a message.
pub const MAX_ERROR_MESSAGE_LEN: usize = 1_024;
