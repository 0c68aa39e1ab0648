//! Worker metrics for sync batch processing
//!
//! Counts ticks, batches and per-message outcomes, and keeps a ring buffer of
//! batch durations for P50/P95 reporting.
//!
//! ## Design
//! - **VecDeque ring buffer** for O(1) eviction (max 1000 samples)
//! - **Poison-safe locking** with explicit match pattern (no .expect())
//! - **Relaxed ordering** for independent counters

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use dualsync_core::{BatchSummary, RetrySummary};
use serde::Serialize;

use crate::observability::{MetricsError, MetricsResult};

const MAX_DURATION_SAMPLES: usize = 1_000;

/// Counters and duration samples for one [`crate::sync::SyncWorker`].
#[derive(Debug)]
pub struct WorkerMetrics {
    ticks: AtomicU64,
    pending_batches: AtomicU64,
    retry_batches: AtomicU64,
    messages_succeeded: AtomicU64,
    messages_partial: AtomicU64,
    messages_failed: AtomicU64,
    messages_skipped: AtomicU64,
    messages_dead_lettered: AtomicU64,
    batch_errors: AtomicU64,
    budget_exhausted: AtomicU64,
    claims_released: AtomicU64,
    batch_durations_ms: Mutex<VecDeque<u64>>,
    started_at: Instant,
}

/// Point-in-time copy of [`WorkerMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerMetricsSnapshot {
    pub ticks: u64,
    pub pending_batches: u64,
    pub retry_batches: u64,
    pub messages_succeeded: u64,
    pub messages_partial: u64,
    pub messages_failed: u64,
    pub messages_skipped: u64,
    pub messages_dead_lettered: u64,
    pub batch_errors: u64,
    /// Passes that stopped early and left work for the next tick.
    pub budget_exhausted: u64,
    pub claims_released: u64,
    pub p50_batch_ms: Option<u64>,
    pub p95_batch_ms: Option<u64>,
    pub throughput_per_sec: f64,
}

impl Default for WorkerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            pending_batches: AtomicU64::new(0),
            retry_batches: AtomicU64::new(0),
            messages_succeeded: AtomicU64::new(0),
            messages_partial: AtomicU64::new(0),
            messages_failed: AtomicU64::new(0),
            messages_skipped: AtomicU64::new(0),
            messages_dead_lettered: AtomicU64::new(0),
            batch_errors: AtomicU64::new(0),
            budget_exhausted: AtomicU64::new(0),
            claims_released: AtomicU64::new(0),
            batch_durations_ms: Mutex::new(VecDeque::with_capacity(MAX_DURATION_SAMPLES)),
            started_at: Instant::now(),
        }
    }

    pub fn record_tick(&self) -> MetricsResult<()> {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Record a completed pending-batch pass.
    pub fn record_pending_batch(&self, summary: &BatchSummary, elapsed: Duration) -> MetricsResult<()> {
        self.pending_batches.fetch_add(1, Ordering::Relaxed);
        // Partial successes are also counted as succeeded.
        self.messages_succeeded.fetch_add(as_u64(summary.succeeded), Ordering::Relaxed);
        self.messages_partial.fetch_add(as_u64(summary.partial), Ordering::Relaxed);
        self.messages_failed.fetch_add(as_u64(summary.failed), Ordering::Relaxed);
        self.messages_skipped.fetch_add(as_u64(summary.skipped), Ordering::Relaxed);
        self.record_duration(elapsed)
    }

    /// Record a completed retry pass.
    pub fn record_retry_batch(&self, summary: &RetrySummary, elapsed: Duration) -> MetricsResult<()> {
        self.retry_batches.fetch_add(1, Ordering::Relaxed);
        self.messages_succeeded.fetch_add(as_u64(summary.succeeded), Ordering::Relaxed);
        self.messages_failed.fetch_add(as_u64(summary.failed), Ordering::Relaxed);
        self.messages_skipped.fetch_add(as_u64(summary.skipped), Ordering::Relaxed);
        self.messages_dead_lettered.fetch_add(as_u64(summary.moved_to_dlq), Ordering::Relaxed);
        self.record_duration(elapsed)
    }

    pub fn record_batch_error(&self) -> MetricsResult<()> {
        self.batch_errors.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn record_budget_exhausted(&self) -> MetricsResult<()> {
        self.budget_exhausted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn record_claims_released(&self, released: u64) -> MetricsResult<()> {
        self.claims_released.fetch_add(released, Ordering::Relaxed);
        Ok(())
    }

    /// Median batch duration.
    pub fn p50_batch_ms(&self) -> MetricsResult<u64> {
        self.percentile(0.50, "P50")
    }

    /// 95th percentile batch duration.
    pub fn p95_batch_ms(&self) -> MetricsResult<u64> {
        self.percentile(0.95, "P95")
    }

    /// Messages handled (succeeded + failed) per second since creation.
    pub fn throughput_per_sec(&self) -> f64 {
        let handled = self.messages_succeeded.load(Ordering::Relaxed)
            + self.messages_failed.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            handled as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn snapshot(&self) -> WorkerMetricsSnapshot {
        WorkerMetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            pending_batches: self.pending_batches.load(Ordering::Relaxed),
            retry_batches: self.retry_batches.load(Ordering::Relaxed),
            messages_succeeded: self.messages_succeeded.load(Ordering::Relaxed),
            messages_partial: self.messages_partial.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            messages_skipped: self.messages_skipped.load(Ordering::Relaxed),
            messages_dead_lettered: self.messages_dead_lettered.load(Ordering::Relaxed),
            batch_errors: self.batch_errors.load(Ordering::Relaxed),
            budget_exhausted: self.budget_exhausted.load(Ordering::Relaxed),
            claims_released: self.claims_released.load(Ordering::Relaxed),
            p50_batch_ms: self.p50_batch_ms().ok(),
            p95_batch_ms: self.p95_batch_ms().ok(),
            throughput_per_sec: self.throughput_per_sec(),
        }
    }

    fn record_duration(&self, elapsed: Duration) -> MetricsResult<()> {
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let mut samples = self.lock_samples();
        samples.push_back(ms);
        if samples.len() > MAX_DURATION_SAMPLES {
            samples.pop_front();
        }
        Ok(())
    }

    fn percentile(&self, percentile: f64, metric: &'static str) -> MetricsResult<u64> {
        if !(0.0..=1.0).contains(&percentile) {
            return Err(MetricsError::InvalidPercentile { metric, value: percentile });
        }

        let samples = self.lock_samples();
        if samples.is_empty() {
            return Err(MetricsError::EmptyData { metric });
        }

        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();
        let index = ((sorted.len() as f64 * percentile) as usize).min(sorted.len() - 1);
        Ok(sorted[index])
    }

    fn lock_samples(&self) -> MutexGuard<'_, VecDeque<u64>> {
        match self.batch_durations_ms.lock() {
            Ok(guard) => guard,
            Err(poison_err) => {
                tracing::warn!(
                    metric = "WorkerMetrics::batch_durations_ms",
                    "Mutex poisoned, recovering data"
                );
                poison_err.into_inner()
            }
        }
    }
}

fn as_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}
