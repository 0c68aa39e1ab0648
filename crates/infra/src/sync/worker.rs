//! Sync worker: periodic driver for the sync processor.
//!
//! Runs two cadences on one background task: a pending pass every
//! `poll_interval` and a retry pass every `retry_interval`. The retry cadence
//! also hands abandoned claims back to the queue. Join handles are tracked and
//! cancellation is explicit.
//!
//! Each pass gets `processing_timeout` as a time budget. The processor checks
//! it between messages, so a message that has been claimed always reaches its
//! terminal write; unclaimed work waits for the next tick.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dualsync_core::SyncProcessor;
//! use dualsync_domain::WorkerConfig;
//! use dualsync_infra::observability::metrics::WorkerMetrics;
//! use dualsync_infra::sync::{SyncWorker, SyncWorkerConfig};
//!
//! # async fn example(processor: Arc<SyncProcessor>) -> dualsync_infra::scheduling::SchedulerResult<()> {
//! let mut worker = SyncWorker::new(
//!     processor,
//!     SyncWorkerConfig::from(&WorkerConfig::default()),
//!     Arc::new(WorkerMetrics::new()),
//! );
//!
//! worker.start().await?;
//! // ... application runs ...
//! worker.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use dualsync_core::{BatchSummary, RetrySummary, SyncProcessor};
use dualsync_domain::{DualSyncError, WorkerConfig};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::observability::metrics::WorkerMetrics;
use crate::observability::MetricsResult;
use crate::scheduling::{SchedulerError, SchedulerResult};
use crate::sync::errors::SyncError;

/// Configuration for the sync worker.
#[derive(Debug, Clone)]
pub struct SyncWorkerConfig {
    /// Interval between pending passes
    pub poll_interval: Duration,
    /// Interval between retry passes
    pub retry_interval: Duration,
    /// Time budget for a single pass, checked between messages
    pub processing_timeout: Duration,
    /// Join timeout when stopping
    pub join_timeout: Duration,
    /// Claims untouched for this long are returned to `pending`
    pub stale_claim_after: Duration,
}

impl Default for SyncWorkerConfig {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for SyncWorkerConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            retry_interval: config.retry_interval(),
            processing_timeout: config.processing_timeout(),
            join_timeout: config.join_timeout(),
            stale_claim_after: config.processing_timeout().saturating_mul(2),
        }
    }
}

/// Background worker with explicit lifecycle management.
pub struct SyncWorker {
    processor: Arc<SyncProcessor>,
    config: SyncWorkerConfig,
    cancellation: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
    metrics: Arc<WorkerMetrics>,
}

impl SyncWorker {
    pub fn new(
        processor: Arc<SyncProcessor>,
        config: SyncWorkerConfig,
        metrics: Arc<WorkerMetrics>,
    ) -> Self {
        Self {
            processor,
            config,
            cancellation: CancellationToken::new(),
            task_handle: None,
            metrics,
        }
    }

    /// Start the worker, spawning the background processing task.
    #[instrument(skip(self), fields(worker_id = %self.processor.worker_id()))]
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        info!(
            poll_interval_secs = self.config.poll_interval.as_secs_f64(),
            retry_interval_secs = self.config.retry_interval.as_secs_f64(),
            "Starting sync worker"
        );

        // Create fresh cancellation token
        self.cancellation = CancellationToken::new();

        let processor = Arc::clone(&self.processor);
        let config = self.config.clone();
        let cancel = self.cancellation.clone();
        let metrics = Arc::clone(&self.metrics);

        self.processor.mark_running(true);
        let handle = tokio::spawn(async move {
            Self::process_loop(processor, config, cancel, metrics).await;
        });

        self.task_handle = Some(handle);
        info!("Sync worker started");
        Ok(())
    }

    /// Stop the worker and wait for the processing task to finish.
    #[instrument(skip(self), fields(worker_id = %self.processor.worker_id()))]
    pub async fn stop(&mut self) -> SchedulerResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        info!("Stopping sync worker");
        self.cancellation.cancel();

        let outcome = match self.task_handle.take() {
            Some(handle) => match tokio::time::timeout(self.config.join_timeout, handle).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    warn!("Worker task panicked: {}", e);
                    Err(SchedulerError::TaskJoinFailed(e.to_string()))
                }
                Err(_) => {
                    warn!("Worker task did not complete within timeout");
                    Err(SchedulerError::Timeout { seconds: self.config.join_timeout.as_secs() })
                }
            },
            None => Ok(()),
        };

        self.processor.mark_running(false);
        self.cancellation = CancellationToken::new();
        if outcome.is_ok() {
            info!(stats = ?self.processor.stats(), "Sync worker stopped");
        }
        outcome
    }

    /// Returns true when a worker instance is active.
    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }

    pub fn metrics(&self) -> &Arc<WorkerMetrics> {
        &self.metrics
    }

    pub fn processor(&self) -> &Arc<SyncProcessor> {
        &self.processor
    }

    /// One pending pass followed by one retry pass, outside the loop.
    pub async fn run_once(&self) -> Result<(BatchSummary, RetrySummary), SyncError> {
        let pending = Self::run_pending(&self.processor, &self.config, &self.metrics).await?;
        let retried = Self::run_retry(&self.processor, &self.config, &self.metrics).await?;
        Ok((pending, retried))
    }

    /// Background processing loop.
    async fn process_loop(
        processor: Arc<SyncProcessor>,
        config: SyncWorkerConfig,
        cancel: CancellationToken,
        metrics: Arc<WorkerMetrics>,
    ) {
        let mut poll = tokio::time::interval(config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut retry = tokio::time::interval(config.retry_interval);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Sync worker process loop cancelled");
                    break;
                }
                _ = poll.tick() => {
                    log_metric(metrics.record_tick(), "sync_worker.tick");
                    Self::run_pending(&processor, &config, &metrics).await.map(|_| ())
                }
                _ = retry.tick() => {
                    Self::run_retry(&processor, &config, &metrics).await.map(|_| ())
                }
            };

            let Err(err) = result else { continue };
            if !err.should_retry() {
                continue;
            }

            // Back off before hammering a store that just failed.
            let delay = Duration::from_secs(err.retry_delay_secs());
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Sync worker process loop cancelled during backoff");
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        processor.mark_running(false);
    }

    async fn run_pending(
        processor: &Arc<SyncProcessor>,
        config: &SyncWorkerConfig,
        metrics: &Arc<WorkerMetrics>,
    ) -> Result<BatchSummary, SyncError> {
        let started = Instant::now();
        let summary = processor.process_pending_batch_within(config.processing_timeout).await;
        log_metric(
            metrics.record_pending_batch(&summary, started.elapsed()),
            "sync_worker.pending.batch",
        );
        Self::note_deferred(summary.deferred, config, metrics, "pending");
        Self::check_summary(summary.error.clone(), metrics, "pending")?;
        Ok(summary)
    }

    async fn run_retry(
        processor: &Arc<SyncProcessor>,
        config: &SyncWorkerConfig,
        metrics: &Arc<WorkerMetrics>,
    ) -> Result<RetrySummary, SyncError> {
        let released = processor.release_stale_claims(config.stale_claim_after).await;
        if released > 0 {
            log_metric(metrics.record_claims_released(released), "sync_worker.claims.released");
        }

        let started = Instant::now();
        let summary = processor.process_retryable_batch_within(config.processing_timeout).await;
        log_metric(
            metrics.record_retry_batch(&summary, started.elapsed()),
            "sync_worker.retry.batch",
        );
        Self::note_deferred(summary.deferred, config, metrics, "retry");
        Self::check_summary(summary.error.clone(), metrics, "retry")?;
        Ok(summary)
    }

    /// A summary error means the batch could not be fetched from the store.
    fn check_summary(
        error: Option<DualSyncError>,
        metrics: &Arc<WorkerMetrics>,
        pass: &'static str,
    ) -> Result<(), SyncError> {
        let Some(source) = error else { return Ok(()) };
        let err = SyncError::from(source);
        error!(
            pass,
            error = %err,
            category = ?err.category(),
            retry_in_secs = err.retry_delay_secs(),
            "Sync pass failed"
        );
        log_metric(metrics.record_batch_error(), "sync_worker.batch.error");
        Err(err)
    }

    fn note_deferred(
        deferred: usize,
        config: &SyncWorkerConfig,
        metrics: &Arc<WorkerMetrics>,
        pass: &'static str,
    ) {
        if deferred == 0 {
            return;
        }
        warn!(
            pass,
            deferred,
            budget_secs = config.processing_timeout.as_secs_f64(),
            "Sync pass ran out of time; remaining messages wait for the next tick"
        );
        log_metric(metrics.record_budget_exhausted(), "sync_worker.batch.budget_exhausted");
    }
}

fn log_metric(result: MetricsResult<()>, metric: &'static str) {
    if let Err(err) = result {
        warn!(metric = metric, error = ?err, "Failed to record worker metric");
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("SyncWorker dropped while running; cancelling tasks");
            self.cancellation.cancel();
            self.processor.mark_running(false);
        }
    }
}
