//! SQLite pool helpers
//!
//! Builds the r2d2 pool shared by the message store and the time-series
//! store. Every pooled connection gets the same pragmas.

use std::path::Path;
use std::time::Duration;

use dualsync_domain::{DualSyncError, Result as DomainResult};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::warn;

/// Pool of SQLite connections.
pub type SqlitePool = Pool<SqliteConnectionManager>;

/// Connection checked out of a [`SqlitePool`].
pub type SqliteConnection = PooledConnection<SqliteConnectionManager>;

/// Pool tuning.
#[derive(Debug, Clone)]
pub struct SqlitePoolConfig {
    pub max_size: u32,
    pub connection_timeout: Duration,
    pub busy_timeout: Duration,
    pub enable_wal: bool,
}

impl Default for SqlitePoolConfig {
    fn default() -> Self {
        Self {
            max_size: 4,
            connection_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(5),
            enable_wal: true,
        }
    }
}

/// Create a pool over the database file at `path`.
pub fn create_sqlite_pool<P: AsRef<Path>>(
    path: P,
    config: &SqlitePoolConfig,
) -> DomainResult<SqlitePool> {
    let pragma_config = config.clone();
    let manager = SqliteConnectionManager::file(path.as_ref())
        .with_init(move |conn| apply_connection_pragmas(conn, &pragma_config));

    Pool::builder()
        .max_size(config.max_size.max(1))
        .connection_timeout(config.connection_timeout)
        .build(manager)
        .map_err(|e| {
            warn!(error = %e, "Failed to create sqlite connection pool");
            DualSyncError::Database(format!("failed to create pool: {e}"))
        })
}

/// Per-connection pragmas: WAL journal, NORMAL sync, busy timeout.
fn apply_connection_pragmas(conn: &mut Connection, config: &SqlitePoolConfig) -> rusqlite::Result<()> {
    let mut pragma_sql = String::new();

    if config.enable_wal {
        pragma_sql.push_str("PRAGMA journal_mode=WAL;\n");
        pragma_sql.push_str("PRAGMA wal_autocheckpoint=1000;\n");
    }
    pragma_sql.push_str("PRAGMA synchronous=NORMAL;\n");

    conn.execute_batch(&pragma_sql)?;
    conn.busy_timeout(config.busy_timeout)
}
