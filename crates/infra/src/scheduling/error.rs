//! Lifecycle error types for background workers

use dualsync_domain::DualSyncError;
use thiserror::Error;

use crate::errors::InfraError;

/// Start/stop errors for long-running workers
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Worker is already running
    #[error("Worker already running")]
    AlreadyRunning,

    /// Worker is not running
    #[error("Worker not running")]
    NotRunning,

    /// Operation timed out
    #[error("Operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Task join failed
    #[error("Task join failed: {0}")]
    TaskJoinFailed(String),
}

impl From<SchedulerError> for InfraError {
    fn from(err: SchedulerError) -> Self {
        let domain_err = match err {
            SchedulerError::AlreadyRunning | SchedulerError::NotRunning => {
                DualSyncError::InvalidInput(err.to_string())
            }
            _ => DualSyncError::Internal(err.to_string()),
        };
        InfraError(domain_err)
    }
}

impl From<SchedulerError> for DualSyncError {
    fn from(err: SchedulerError) -> Self {
        InfraError::from(err).into()
    }
}

/// Convenience type alias for worker lifecycle operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;
