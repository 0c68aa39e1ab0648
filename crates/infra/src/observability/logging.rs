//! Tracing subscriber setup for the worker binary.

use dualsync_domain::{DualSyncError, LoggingConfig, Result as DomainResult};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level when it is set and parses.
/// Fails if a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> DomainResult<()> {
    let filter = build_filter(config)?;

    let installed = if config.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .try_init()
    };

    installed.map_err(|e| DualSyncError::Internal(format!("failed to install tracing subscriber: {e}")))
}

fn build_filter(config: &LoggingConfig) -> DomainResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    EnvFilter::try_new(&config.level).map_err(|e| {
        DualSyncError::Config(format!("invalid logging level {:?}: {e}", config.level))
    })
}
