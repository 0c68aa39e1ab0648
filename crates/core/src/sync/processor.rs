//! Sync processor: message lifecycle orchestration.
//!
//! Pulls pending (or retryable) messages from the [`MessageStore`], claims
//! each one, hands it to the executor and writes the terminal status back.
//! Batch calls never return errors; every failure is logged and reflected in
//! the returned summary and in the message row itself.
//!
//! A batch may be given a time budget. The budget is checked between
//! messages, never inside one: once it is spent the remaining messages are
//! left untouched for the next pass.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dualsync_domain::constants::MAX_ERROR_MESSAGE_LEN;
use dualsync_domain::{DualSyncError, ProcessorConfig, StatusUpdate, SyncMessage, SyncStatus};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::sync::executor::{ExecutionResult, FailureKind, MessageExecutor};
use crate::sync::ports::MessageStore;

/// Processor identity and batch limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorSettings {
    /// Written to `processed_by` on every claim
    pub worker_id: String,
    /// Pending messages fetched per pass
    pub batch_size: usize,
    /// Retryable messages fetched per pass
    pub retry_batch_size: usize,
}

impl ProcessorSettings {
    /// Batch sizes are clamped to at least 1.
    pub fn from_config(config: &ProcessorConfig) -> Self {
        Self {
            worker_id: config.resolve_worker_id(),
            batch_size: config.batch_size.max(1),
            retry_batch_size: config.retry_batch_size.max(1),
        }
    }
}

/// What happened to a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Written as `success`.
    Succeeded,
    /// Written as `partial_success`.
    PartiallySucceeded,
    /// Written (or attempted) as `failed`.
    Failed,
    /// Claimed by another worker or no longer claimable.
    Skipped,
}

/// Result of one pending-batch pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    /// Messages fetched and attempted.
    pub processed: usize,
    /// Includes partial successes.
    pub succeeded: usize,
    pub failed: usize,
    /// Claimed by another worker first.
    pub skipped: usize,
    /// Subset of `succeeded` written as `partial_success`.
    pub partial: usize,
    /// Fetched but left pending because the time budget ran out.
    pub deferred: usize,
    pub elapsed_seconds: f64,
    /// Set when the batch could not be fetched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<DualSyncError>,
}

impl BatchSummary {
    /// Messages attempted per second of wall time.
    pub fn throughput_per_sec(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.processed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    fn record(&mut self, outcome: MessageOutcome) {
        match outcome {
            MessageOutcome::Succeeded => self.succeeded += 1,
            MessageOutcome::PartiallySucceeded => {
                self.succeeded += 1;
                self.partial += 1;
            }
            MessageOutcome::Failed => self.failed += 1,
            MessageOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Result of one retry pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrySummary {
    /// Messages fetched and attempted.
    pub processed: usize,
    pub succeeded: usize,
    /// Includes messages that were escalated to dead-letter.
    pub failed: usize,
    /// Failed attempts after which the store reported `dead_letter`.
    pub moved_to_dlq: usize,
    pub skipped: usize,
    /// Fetched but left for a later pass because the time budget ran out.
    pub deferred: usize,
    pub elapsed_seconds: f64,
    /// Set when the batch could not be fetched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<DualSyncError>,
}

/// Lifetime counters for one processor instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessorStats {
    pub worker_id: String,
    /// Set while a worker loop drives this processor.
    pub running: bool,
    /// Messages that ended in `success` or `partial_success`.
    pub total_processed: u64,
    pub total_failed: u64,
    /// Percentage in `0.0..=100.0`; `0.0` before any message was handled.
    pub success_rate: f64,
}

/// Orchestrates claim, execution and status bookkeeping.
pub struct SyncProcessor {
    store: Arc<dyn MessageStore>,
    executor: Arc<dyn MessageExecutor>,
    settings: ProcessorSettings,
    running: AtomicBool,
    total_processed: AtomicU64,
    total_failed: AtomicU64,
}

impl SyncProcessor {
    pub fn new(
        store: Arc<dyn MessageStore>,
        executor: Arc<dyn MessageExecutor>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            store,
            executor,
            settings,
            running: AtomicBool::new(false),
            total_processed: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.settings.worker_id
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    /// Set by the owning worker loop; reported through [`Self::stats`].
    pub fn mark_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Process up to `batch_size` pending messages, one at a time.
    pub async fn process_pending_batch(&self) -> BatchSummary {
        self.pending_batch(None).await
    }

    /// Like [`Self::process_pending_batch`], but stops claiming new messages
    /// once `budget` has elapsed. The message in flight always finishes.
    pub async fn process_pending_batch_within(&self, budget: Duration) -> BatchSummary {
        self.pending_batch(Instant::now().checked_add(budget)).await
    }

    /// Re-attempt failed messages that the store reports as due.
    ///
    /// After every failed attempt the message is re-read so escalation to
    /// dead-letter (decided by the store) is reflected in `moved_to_dlq`.
    pub async fn process_retryable_batch(&self) -> RetrySummary {
        self.retry_batch(None).await
    }

    /// Like [`Self::process_retryable_batch`], bounded by `budget` between
    /// messages.
    pub async fn process_retryable_batch_within(&self, budget: Duration) -> RetrySummary {
        self.retry_batch(Instant::now().checked_add(budget)).await
    }

    #[instrument(skip(self), fields(worker_id = %self.settings.worker_id))]
    async fn pending_batch(&self, deadline: Option<Instant>) -> BatchSummary {
        let started = Instant::now();
        let mut summary = BatchSummary::default();

        let messages = match self.store.get_pending_messages(self.settings.batch_size).await {
            Ok(messages) => messages,
            Err(err) => {
                warn!(error = %err, "Failed to fetch pending messages");
                summary.error = Some(err);
                summary.elapsed_seconds = started.elapsed().as_secs_f64();
                return summary;
            }
        };

        if messages.is_empty() {
            debug!("No pending sync messages");
            summary.elapsed_seconds = started.elapsed().as_secs_f64();
            return summary;
        }

        debug!(count = messages.len(), "Processing pending sync batch");

        for (index, message) in messages.iter().enumerate() {
            if index > 0 && budget_spent(deadline) {
                summary.deferred = messages.len() - index;
                break;
            }
            let outcome = self.process_message(message).await;
            summary.processed += 1;
            summary.record(outcome);
        }

        summary.elapsed_seconds = started.elapsed().as_secs_f64();
        info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            partial = summary.partial,
            deferred = summary.deferred,
            elapsed_seconds = summary.elapsed_seconds,
            throughput_per_sec = summary.throughput_per_sec(),
            "Pending sync batch completed"
        );
        summary
    }

    #[instrument(skip(self), fields(worker_id = %self.settings.worker_id))]
    async fn retry_batch(&self, deadline: Option<Instant>) -> RetrySummary {
        let started = Instant::now();
        let mut summary = RetrySummary::default();

        let messages = match self.store.get_retryable_messages(self.settings.retry_batch_size).await
        {
            Ok(messages) => messages,
            Err(err) => {
                warn!(error = %err, "Failed to fetch retryable messages");
                summary.error = Some(err);
                summary.elapsed_seconds = started.elapsed().as_secs_f64();
                return summary;
            }
        };

        for (index, message) in messages.iter().enumerate() {
            if index > 0 && budget_spent(deadline) {
                summary.deferred = messages.len() - index;
                break;
            }
            summary.processed += 1;
            match self.process_message(message).await {
                MessageOutcome::Succeeded | MessageOutcome::PartiallySucceeded => {
                    summary.succeeded += 1;
                }
                MessageOutcome::Skipped => summary.skipped += 1,
                MessageOutcome::Failed => {
                    summary.failed += 1;
                    if self.was_dead_lettered(&message.id).await {
                        summary.moved_to_dlq += 1;
                    }
                }
            }
        }

        summary.elapsed_seconds = started.elapsed().as_secs_f64();
        if summary.processed > 0 {
            info!(
                processed = summary.processed,
                succeeded = summary.succeeded,
                failed = summary.failed,
                moved_to_dlq = summary.moved_to_dlq,
                deferred = summary.deferred,
                elapsed_seconds = summary.elapsed_seconds,
                "Retry batch completed"
            );
        }
        summary
    }

    /// Claim, execute and record one message. Never propagates errors.
    pub async fn process_message(&self, message: &SyncMessage) -> MessageOutcome {
        let worker_id = self.settings.worker_id.as_str();

        match self.store.update_message_status(&message.id, &StatusUpdate::in_progress(worker_id)).await
        {
            Ok(()) => {}
            Err(DualSyncError::Conflict(reason)) => {
                debug!(message_id = %message.id, reason = %reason, "Message already claimed; skipping");
                return MessageOutcome::Skipped;
            }
            Err(err) => {
                warn!(message_id = %message.id, error = %err, "Failed to claim message");
                self.best_effort_mark_failed(&message.id, &format!("claim failed: {err}")).await;
                return self.count(MessageOutcome::Failed);
            }
        }

        debug!(
            message_id = %message.id,
            direction = %message.sync_direction,
            operation = %message.operation_type,
            retry_count = message.retry_count,
            "Executing sync message"
        );

        let result = self.executor.execute(message).await;
        let latency_ms = (Utc::now() - message.created_at).num_milliseconds().max(0);
        let duration_ms = clamp_i64(result.duration_ms);

        if result.success {
            let partial = result.is_partial();
            let update = StatusUpdate::completed(
                worker_id,
                partial,
                latency_ms,
                duration_ms,
                clamp_i64(result.rows_affected),
            );
            if let Err(err) = self.store.update_message_status(&message.id, &update).await {
                warn!(message_id = %message.id, error = %err, "Failed to record sync success");
                self.best_effort_mark_failed(
                    &message.id,
                    &format!("failed to record success: {err}"),
                )
                .await;
                return self.count(MessageOutcome::Failed);
            }

            debug!(
                message_id = %message.id,
                latency_ms,
                duration_ms,
                rows_affected = result.rows_affected,
                partial,
                "Sync message completed"
            );
            let outcome =
                if partial { MessageOutcome::PartiallySucceeded } else { MessageOutcome::Succeeded };
            return self.count(outcome);
        }

        let reason = truncate_reason(result.error.as_deref().unwrap_or("sync execution failed"));
        let update = StatusUpdate::failed(worker_id, reason.clone())
            .with_details(self.failure_details(&result, &reason))
            .with_timing(latency_ms, duration_ms);

        if let Err(err) = self.store.update_message_status(&message.id, &update).await {
            warn!(message_id = %message.id, error = %err, "Failed to record sync failure");
            self.best_effort_mark_failed(&message.id, &reason).await;
        }
        self.count(MessageOutcome::Failed)
    }

    /// Last-resort status write after a bookkeeping failure.
    ///
    /// Returns whether the write landed. A second failure is logged and
    /// swallowed so one unreachable store cannot abort the batch.
    pub async fn best_effort_mark_failed(&self, message_id: &str, reason: &str) -> bool {
        let update = StatusUpdate::failed(&self.settings.worker_id, truncate_reason(reason));
        match self.store.update_message_status(message_id, &update).await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    message_id = %message_id,
                    error = %err,
                    "Best-effort mark-failed also failed; message may stay in progress"
                );
                false
            }
        }
    }

    /// Hand abandoned claims back to the pending queue.
    ///
    /// Best-effort: a store failure is logged and reported as 0 released.
    pub async fn release_stale_claims(&self, older_than: Duration) -> u64 {
        let Ok(threshold) = chrono::Duration::from_std(older_than) else {
            warn!(older_than_secs = older_than.as_secs(), "Stale-claim threshold out of range");
            return 0;
        };
        match self.store.release_stale_claims(threshold).await {
            Ok(released) => {
                if released > 0 {
                    info!(released, worker_id = %self.settings.worker_id, "Released stale claims");
                }
                released
            }
            Err(err) => {
                warn!(error = %err, "Failed to release stale claims");
                0
            }
        }
    }

    /// Lifetime counters for this instance.
    pub fn stats(&self) -> ProcessorStats {
        let total_processed = self.total_processed.load(Ordering::Relaxed);
        let total_failed = self.total_failed.load(Ordering::Relaxed);
        let attempts = total_processed + total_failed;
        let success_rate =
            if attempts == 0 { 0.0 } else { total_processed as f64 / attempts as f64 * 100.0 };

        ProcessorStats {
            worker_id: self.settings.worker_id.clone(),
            running: self.running.load(Ordering::SeqCst),
            total_processed,
            total_failed,
            success_rate,
        }
    }

    fn count(&self, outcome: MessageOutcome) -> MessageOutcome {
        match outcome {
            MessageOutcome::Succeeded | MessageOutcome::PartiallySucceeded => {
                self.total_processed.fetch_add(1, Ordering::Relaxed);
            }
            MessageOutcome::Failed => {
                self.total_failed.fetch_add(1, Ordering::Relaxed);
            }
            MessageOutcome::Skipped => {}
        }
        outcome
    }

    async fn was_dead_lettered(&self, message_id: &str) -> bool {
        match self.store.get_message_by_id(message_id).await {
            Ok(Some(message)) => message.status == SyncStatus::DeadLetter,
            Ok(None) => false,
            Err(err) => {
                warn!(message_id = %message_id, error = %err, "Failed to re-read message after retry");
                false
            }
        }
    }

    fn failure_details(&self, result: &ExecutionResult, reason: &str) -> serde_json::Value {
        json!({
            "kind": result.failure_kind.unwrap_or(FailureKind::Store).as_str(),
            "message": reason,
            "duration_ms": result.duration_ms,
            "rows_affected": result.rows_affected,
            "worker_id": self.settings.worker_id,
        })
    }
}

fn budget_spent(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Cap persisted error text, keeping char boundaries intact.
pub fn truncate_reason(reason: &str) -> String {
    if reason.chars().count() <= MAX_ERROR_MESSAGE_LEN {
        return reason.to_string();
    }

    let mut truncated =
        reason.chars().take(MAX_ERROR_MESSAGE_LEN.saturating_sub(3)).collect::<String>();
    truncated.push_str("...");
    truncated
}
