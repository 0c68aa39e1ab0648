//! DualSync worker
//!
//! Drains the sync message queue into the time-series and relational stores
//! until interrupted.

mod context;

use std::time::Duration;

use anyhow::Context as _;
use dualsync_infra::config;
use dualsync_infra::observability::init_tracing;

use crate::context::WorkerContext;

const START_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before config so DUALSYNC_* variables are visible
    let dotenv = dotenvy::dotenv();

    let config = config::load().context("failed to load configuration")?;
    init_tracing(&config.logging).context("failed to initialise tracing")?;

    match dotenv {
        Ok(path) => tracing::info!(path = %path.display(), "Loaded .env"),
        Err(e) => tracing::debug!(error = %e, "No .env file loaded"),
    }

    let ctx = WorkerContext::new(config).await?;
    ctx.release_stale_claims().await?;

    let mut worker = ctx.build_worker();

    // Fail fast if the worker cannot start
    tokio::time::timeout(START_TIMEOUT, worker.start())
        .await
        .map_err(|_| anyhow::anyhow!("sync worker start timed out after {}s", START_TIMEOUT.as_secs()))?
        .context("failed to start sync worker")?;

    tracing::info!("DualSync worker running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;

    tracing::info!("Shutdown requested");
    worker.stop().await.context("failed to stop sync worker")?;

    match ctx.message_store.status_counts().await {
        Ok(counts) => tracing::info!(?counts, "Queue depth at shutdown"),
        Err(e) => tracing::warn!(error = %e, "Could not read queue depth at shutdown"),
    }
    tracing::info!(metrics = ?worker.metrics().snapshot(), "DualSync worker stopped");

    Ok(())
}
