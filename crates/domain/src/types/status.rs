//! Message lifecycle states and the status writes the processor issues.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a sync message.
///
/// `pending → in_progress → success | partial_success | failed`, and
/// `failed → in_progress → …` until the store escalates to `dead_letter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    InProgress,
    Success,
    /// Bulk insert where some elements were skipped as invalid.
    PartialSuccess,
    Failed,
    DeadLetter,
}

crate::impl_domain_status_conversions!(SyncStatus {
    Pending => "pending",
    InProgress => "in_progress",
    Success => "success",
    PartialSuccess => "partial_success",
    Failed => "failed",
    DeadLetter => "dead_letter",
});

impl SyncStatus {
    /// Terminal states are never picked up again by either batch operation.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::PartialSuccess | Self::DeadLetter)
    }

    /// States a worker may claim.
    pub const fn is_claimable(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

/// A status transition plus the telemetry recorded with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: SyncStatus,
    pub processed_by: Option<String>,
    pub error_message: Option<String>,
    pub error_details: Option<Value>,
    pub sync_latency_ms: Option<i64>,
    pub processing_duration_ms: Option<i64>,
    pub rows_affected: Option<i64>,
}

impl StatusUpdate {
    fn bare(status: SyncStatus, worker_id: &str) -> Self {
        Self {
            status,
            processed_by: Some(worker_id.to_string()),
            error_message: None,
            error_details: None,
            sync_latency_ms: None,
            processing_duration_ms: None,
            rows_affected: None,
        }
    }

    /// Claim: pending/failed → in_progress, tagged with the worker.
    pub fn in_progress(worker_id: &str) -> Self {
        Self::bare(SyncStatus::InProgress, worker_id)
    }

    /// Successful (or partially successful) terminal write.
    pub fn completed(
        worker_id: &str,
        partial: bool,
        sync_latency_ms: i64,
        processing_duration_ms: i64,
        rows_affected: i64,
    ) -> Self {
        let status = if partial { SyncStatus::PartialSuccess } else { SyncStatus::Success };
        Self {
            sync_latency_ms: Some(sync_latency_ms),
            processing_duration_ms: Some(processing_duration_ms),
            rows_affected: Some(rows_affected),
            ..Self::bare(status, worker_id)
        }
    }

    /// Failed write; the store increments `retry_count` and may escalate.
    pub fn failed(worker_id: &str, error_message: impl Into<String>) -> Self {
        Self { error_message: Some(error_message.into()), ..Self::bare(SyncStatus::Failed, worker_id) }
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.error_details = Some(details);
        self
    }

    #[must_use]
    pub fn with_timing(mut self, sync_latency_ms: i64, processing_duration_ms: i64) -> Self {
        self.sync_latency_ms = Some(sync_latency_ms);
        self.processing_duration_ms = Some(processing_duration_ms);
        self
    }
}

/// Queue depth per status, for operators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub in_progress: u64,
    pub success: u64,
    pub partial_success: u64,
    pub failed: u64,
    pub dead_letter: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: SyncStatus, count: u64) {
        let slot = match status {
            SyncStatus::Pending => &mut self.pending,
            SyncStatus::InProgress => &mut self.in_progress,
            SyncStatus::Success => &mut self.success,
            SyncStatus::PartialSuccess => &mut self.partial_success,
            SyncStatus::Failed => &mut self.failed,
            SyncStatus::DeadLetter => &mut self.dead_letter,
        };
        *slot = slot.saturating_add(count);
    }

    pub const fn total(&self) -> u64 {
        self.pending
            + self.in_progress
            + self.success
            + self.partial_success
            + self.failed
            + self.dead_letter
    }
}
