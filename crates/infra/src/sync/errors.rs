//! Sync-specific error types
//!
//! Classifies the store error behind a failed worker pass so the loop knows
//! whether, and how long, to back off.

use dualsync_domain::DualSyncError;
use thiserror::Error;

/// Categories of sync errors for retry logic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncErrorCategory {
    /// Network/connection errors - retryable
    Network,
    /// Store errors (locked, busy, unavailable) - retryable
    Database,
    /// Another worker owns the row - retry on the next pass
    Contention,
    /// Bad message content - non-retryable
    Client,
    /// Configuration errors - non-retryable
    Config,
}

/// Errors surfaced by a worker pass.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Get the error category for this error
    pub fn category(&self) -> SyncErrorCategory {
        match self {
            Self::Network(_) => SyncErrorCategory::Network,
            Self::Database(_) => SyncErrorCategory::Database,
            Self::Conflict(_) => SyncErrorCategory::Contention,
            Self::InvalidInput(_) => SyncErrorCategory::Client,
            Self::Config(_) => SyncErrorCategory::Config,
        }
    }

    /// Check if this error should be retried
    pub fn should_retry(&self) -> bool {
        matches!(
            self.category(),
            SyncErrorCategory::Network | SyncErrorCategory::Database | SyncErrorCategory::Contention
        )
    }

    /// Get suggested retry delay in seconds
    pub fn retry_delay_secs(&self) -> u64 {
        match self.category() {
            SyncErrorCategory::Network => 5,
            SyncErrorCategory::Database => 2,
            SyncErrorCategory::Contention => 1,
            SyncErrorCategory::Client | SyncErrorCategory::Config => 0, // No retry
        }
    }
}

impl From<DualSyncError> for SyncError {
    fn from(err: DualSyncError) -> Self {
        match err {
            DualSyncError::Database(message) | DualSyncError::Internal(message) => {
                Self::Database(message)
            }
            DualSyncError::Config(message) => Self::Config(message),
            DualSyncError::Network(message) => Self::Network(message),
            DualSyncError::Conflict(message) => Self::Conflict(message),
            DualSyncError::NotFound(message) | DualSyncError::InvalidInput(message) => {
                Self::InvalidInput(message)
            }
        }
    }
}
