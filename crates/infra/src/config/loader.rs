//! Configuration loader
//!
//! Loads worker configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If the required variables are missing, falls back to loading from file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! Required:
//! - `DUALSYNC_DB_PATH`: Message store SQLite file
//! - `DUALSYNC_RELATIONAL_URL`: PostgreSQL connection string
//!
//! Optional (defaults from [`Config::default`]):
//! - `DUALSYNC_DB_POOL_SIZE`, `DUALSYNC_TIMESERIES_PATH`,
//!   `DUALSYNC_TIMESERIES_POOL_SIZE`, `DUALSYNC_RELATIONAL_TLS`
//! - `DUALSYNC_MAX_RETRIES`, `DUALSYNC_RETRY_BACKOFF_SECS`
//! - `DUALSYNC_BATCH_SIZE`, `DUALSYNC_RETRY_BATCH_SIZE`, `DUALSYNC_WORKER_ID`
//! - `DUALSYNC_POLL_INTERVAL_SECS`, `DUALSYNC_RETRY_INTERVAL_SECS`,
//!   `DUALSYNC_PROCESSING_TIMEOUT_SECS`
//! - `DUALSYNC_LOG_LEVEL`, `DUALSYNC_LOG_JSON`
//!
//! ## File Locations
//! The loader searches the following paths (in order):
//! 1. `./config.{json,toml}` or `./dualsync.{json,toml}`
//! 2. `../config.{json,toml}` and `../../config.{json,toml}`
//! 3. The same names relative to the executable location

use std::path::{Path, PathBuf};
use std::str::FromStr;

use dualsync_domain::{Config, DualSyncError, Result};

const CONFIG_FILE_NAMES: [&str; 4] = ["config.json", "config.toml", "dualsync.json", "dualsync.toml"];

/// Load configuration with automatic fallback strategy
///
/// First attempts to load from environment variables. If any required
/// variables are missing, falls back to loading from a config file.
///
/// # Errors
/// Returns `DualSyncError::Config` if:
/// - Configuration cannot be loaded from either source
/// - File format is invalid
pub fn load() -> Result<Config> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables
///
/// # Errors
/// Returns `DualSyncError::Config` if a required variable is missing or any
/// variable has an invalid value.
pub fn load_from_env() -> Result<Config> {
    let mut config = Config::default();

    config.database.path = env_var("DUALSYNC_DB_PATH")?;
    config.relational.url = env_var("DUALSYNC_RELATIONAL_URL")?;

    config.database.pool_size = env_parse("DUALSYNC_DB_POOL_SIZE", config.database.pool_size)?;
    if let Ok(path) = std::env::var("DUALSYNC_TIMESERIES_PATH") {
        config.timeseries.path = path;
    }
    config.timeseries.pool_size =
        env_parse("DUALSYNC_TIMESERIES_POOL_SIZE", config.timeseries.pool_size)?;
    config.relational.use_tls = env_bool("DUALSYNC_RELATIONAL_TLS", config.relational.use_tls);

    config.message_store.max_retries =
        env_parse("DUALSYNC_MAX_RETRIES", config.message_store.max_retries)?;
    config.message_store.retry_backoff_secs =
        env_parse("DUALSYNC_RETRY_BACKOFF_SECS", config.message_store.retry_backoff_secs)?;

    config.processor.batch_size = env_parse("DUALSYNC_BATCH_SIZE", config.processor.batch_size)?;
    config.processor.retry_batch_size =
        env_parse("DUALSYNC_RETRY_BATCH_SIZE", config.processor.retry_batch_size)?;
    config.processor.worker_id = std::env::var("DUALSYNC_WORKER_ID").ok();

    config.worker.poll_interval_secs =
        env_parse("DUALSYNC_POLL_INTERVAL_SECS", config.worker.poll_interval_secs)?;
    config.worker.retry_interval_secs =
        env_parse("DUALSYNC_RETRY_INTERVAL_SECS", config.worker.retry_interval_secs)?;
    config.worker.processing_timeout_secs =
        env_parse("DUALSYNC_PROCESSING_TIMEOUT_SECS", config.worker.processing_timeout_secs)?;

    if let Ok(level) = std::env::var("DUALSYNC_LOG_LEVEL") {
        config.logging.level = level;
    }
    config.logging.json = env_bool("DUALSYNC_LOG_JSON", config.logging.json);

    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, searches multiple locations for config files.
/// Format is detected by file extension.
///
/// # Errors
/// Returns `DualSyncError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(DualSyncError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => discover_config_paths().ok_or_else(|| {
            DualSyncError::Config(
                "No config file found in any of the standard locations".to_string(),
            )
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| DualSyncError::Config(format!("Failed to read config file: {}", e)))?;

    parse_config(&contents, &config_path)
}

/// Parse configuration from string content (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| DualSyncError::Config(format!("Invalid TOML format: {}", e))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| DualSyncError::Config(format!("Invalid JSON format: {}", e))),
        _ => Err(DualSyncError::Config(format!("Unsupported config format: {}", extension))),
    }
}

/// Probe multiple paths for configuration files
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn discover_config_paths() -> Option<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd);
    }
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            roots.push(exe_dir.to_path_buf());
        }
    }

    roots.iter().flat_map(|root| candidates_under(root)).find(|path| path.exists())
}

fn candidates_under(root: &Path) -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> =
        CONFIG_FILE_NAMES.iter().map(|name| root.join(name)).collect();
    for parent in ["..", "../.."] {
        candidates.push(root.join(parent).join("config.json"));
        candidates.push(root.join(parent).join("config.toml"));
    }
    candidates
}

/// Get required environment variable
fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| {
        DualSyncError::Config(format!("Missing required environment variable: {}", key))
    })
}

/// Parse an optional environment variable, falling back to `default` when
/// it is unset.
fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| DualSyncError::Config(format!("Invalid value for {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
