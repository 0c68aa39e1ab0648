//! Worker context - dependency wiring for the sync process

use std::sync::Arc;

use anyhow::Context;
use dualsync_core::{MessageStore, ProcessorSettings, SyncExecutor, SyncProcessor};
use dualsync_domain::Config;
use dualsync_infra::database::{DbManager, RetryPolicy, SqliteMessageStore, SqliteTimeSeriesStore};
use dualsync_infra::observability::metrics::WorkerMetrics;
use dualsync_infra::relational::PostgresRelationalStore;
use dualsync_infra::sync::{SyncWorker, SyncWorkerConfig};

/// Everything one worker process owns.
pub struct WorkerContext {
    pub config: Config,
    pub message_store: Arc<SqliteMessageStore>,
    pub processor: Arc<SyncProcessor>,
    pub metrics: Arc<WorkerMetrics>,
}

impl WorkerContext {
    /// Open both SQLite databases, connect to PostgreSQL and wire the
    /// processor.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let message_db = open_sqlite(&config.database.path, config.database.pool_size)
            .context("failed to open message store database")?;
        let timeseries_db = open_sqlite(&config.timeseries.path, config.timeseries.pool_size)
            .context("failed to open time-series database")?;

        let relational = PostgresRelationalStore::connect(&config.relational)
            .await
            .context("failed to connect to relational store")?;
        relational.health_check().await.context("relational store health check failed")?;

        let message_store = Arc::new(SqliteMessageStore::new(
            message_db,
            RetryPolicy::from_config(&config.message_store),
        ));
        let timeseries = Arc::new(SqliteTimeSeriesStore::new(timeseries_db));
        let executor = Arc::new(SyncExecutor::new(timeseries, Arc::new(relational)));

        let settings = ProcessorSettings::from_config(&config.processor);
        tracing::info!(
            worker_id = %settings.worker_id,
            batch_size = settings.batch_size,
            retry_batch_size = settings.retry_batch_size,
            "Sync processor configured"
        );
        let processor = Arc::new(SyncProcessor::new(
            Arc::clone(&message_store) as _,
            executor,
            settings,
        ));

        Ok(Self { config, message_store, processor, metrics: Arc::new(WorkerMetrics::new()) })
    }

    /// Return claims left `in_progress` by a worker that died mid-message.
    ///
    /// Uses the same threshold as the worker's retry cadence: twice the
    /// processing timeout.
    pub async fn release_stale_claims(&self) -> anyhow::Result<u64> {
        let threshold =
            chrono::Duration::from_std(self.config.worker.processing_timeout().saturating_mul(2))
                .context("processing timeout out of range")?;
        let released = self
            .message_store
            .release_stale_claims(threshold)
            .await
            .context("failed to release stale claims")?;
        if released > 0 {
            tracing::warn!(released, "Released stale in-progress claims");
        }
        Ok(released)
    }

    pub fn build_worker(&self) -> SyncWorker {
        SyncWorker::new(
            Arc::clone(&self.processor),
            SyncWorkerConfig::from(&self.config.worker),
            Arc::clone(&self.metrics),
        )
    }
}

fn open_sqlite(path: &str, pool_size: u32) -> anyhow::Result<Arc<DbManager>> {
    let manager = DbManager::new(path, pool_size)?;
    manager.run_migrations()?;
    manager.health_check()?;
    tracing::info!(path, pool_size, "SQLite database ready");
    Ok(Arc::new(manager))
}
