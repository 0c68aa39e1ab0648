//! Versioned time-series library on SQLite
//!
//! Libraries hold symbols (`AAA/quote/1d`); every write appends a new
//! version of the symbol's data and reads return the newest one. Deleting a
//! symbol drops all of its versions.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dualsync_core::TimeSeriesStore;
use dualsync_domain::{DualSyncError, RecordKey, Result as DomainResult};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use tokio::task;
use tracing::debug;

use super::manager::DbManager;
use super::pool::SqliteConnection;
use crate::errors::conversions::{map_join_error, map_sql_error};

/// SQLite implementation of [`TimeSeriesStore`].
pub struct SqliteTimeSeriesStore {
    db: Arc<DbManager>,
}

impl SqliteTimeSeriesStore {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    /// Read a specific version of a symbol.
    pub async fn read_version(
        &self,
        library: &str,
        key: &RecordKey,
        version: u64,
    ) -> DomainResult<Option<Value>> {
        let library = library.to_string();
        let symbol = key.storage_symbol();
        let version = to_sql_version(version)?;

        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> DomainResult<Option<Value>> {
            let conn = db.get_connection()?;
            select_data(&conn, &library, &symbol, Some(version))
        })
        .await
        .map_err(map_join_error)?
    }

    /// Stored versions of a symbol, oldest first.
    pub async fn list_versions(&self, library: &str, key: &RecordKey) -> DomainResult<Vec<u64>> {
        let library = library.to_string();
        let symbol = key.storage_symbol();

        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> DomainResult<Vec<u64>> {
            let conn = db.get_connection()?;
            select_versions(&conn, &library, &symbol)
        })
        .await
        .map_err(map_join_error)?
    }

    /// Symbols present in a library.
    pub async fn list_symbols(&self, library: &str) -> DomainResult<Vec<String>> {
        let library = library.to_string();

        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> DomainResult<Vec<String>> {
            let conn = db.get_connection()?;
            select_symbols(&conn, &library)
        })
        .await
        .map_err(map_join_error)?
    }
}

#[async_trait]
impl TimeSeriesStore for SqliteTimeSeriesStore {
    async fn write(&self, library: &str, key: &RecordKey, data: &Value) -> DomainResult<u64> {
        let library = library.to_string();
        let symbol = key.storage_symbol();
        let data = serde_json::to_string(data)
            .map_err(|e| DualSyncError::InvalidInput(format!("data is not serializable: {e}")))?;

        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> DomainResult<u64> {
            let mut conn = db.get_connection()?;
            append_version(&mut conn, &library, &symbol, &data)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn read(&self, library: &str, key: &RecordKey) -> DomainResult<Option<Value>> {
        let library = library.to_string();
        let symbol = key.storage_symbol();

        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> DomainResult<Option<Value>> {
            let conn = db.get_connection()?;
            select_data(&conn, &library, &symbol, None)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn delete(&self, library: &str, key: &RecordKey) -> DomainResult<u64> {
        let library = library.to_string();
        let symbol = key.storage_symbol();

        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> DomainResult<u64> {
            let conn = db.get_connection()?;
            delete_symbol(&conn, &library, &symbol)
        })
        .await
        .map_err(map_join_error)?
    }
}

// ============================================================================
// SQL Operations (synchronous)
// ============================================================================

fn append_version(
    conn: &mut SqliteConnection,
    library: &str,
    symbol: &str,
    data: &str,
) -> DomainResult<u64> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).map_err(map_sql_error)?;

    let latest: i64 = tx
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM ts_versions WHERE library = ?1 AND symbol = ?2",
            params![library, symbol],
            |row| row.get(0),
        )
        .map_err(map_sql_error)?;
    let version = latest + 1;

    tx.execute(
        "INSERT INTO ts_versions (library, symbol, version, data, written_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![library, symbol, version, data, Utc::now().timestamp_millis()],
    )
    .map_err(map_sql_error)?;
    tx.commit().map_err(map_sql_error)?;

    debug!(library, symbol, version, "Time-series version written");
    Ok(u64::try_from(version).unwrap_or(0))
}

fn select_data(
    conn: &SqliteConnection,
    library: &str,
    symbol: &str,
    version: Option<i64>,
) -> DomainResult<Option<Value>> {
    let text: Option<String> = match version {
        Some(version) => conn
            .query_row(
                "SELECT data FROM ts_versions WHERE library = ?1 AND symbol = ?2 AND version = ?3",
                params![library, symbol, version],
                |row| row.get(0),
            )
            .optional(),
        None => conn
            .query_row(
                "SELECT data FROM ts_versions WHERE library = ?1 AND symbol = ?2
                 ORDER BY version DESC LIMIT 1",
                params![library, symbol],
                |row| row.get(0),
            )
            .optional(),
    }
    .map_err(map_sql_error)?;

    text.map(|text| {
        serde_json::from_str(&text)
            .map_err(|e| DualSyncError::Database(format!("corrupt data for {library}/{symbol}: {e}")))
    })
    .transpose()
}

fn select_versions(conn: &SqliteConnection, library: &str, symbol: &str) -> DomainResult<Vec<u64>> {
    let mut stmt = conn
        .prepare(
            "SELECT version FROM ts_versions WHERE library = ?1 AND symbol = ?2 ORDER BY version ASC",
        )
        .map_err(map_sql_error)?;
    let rows = stmt
        .query_map(params![library, symbol], |row| row.get::<_, i64>(0))
        .map_err(map_sql_error)?;

    rows.map(|row| row.map(|v| u64::try_from(v).unwrap_or(0)).map_err(map_sql_error)).collect()
}

fn select_symbols(conn: &SqliteConnection, library: &str) -> DomainResult<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT DISTINCT symbol FROM ts_versions WHERE library = ?1 ORDER BY symbol ASC")
        .map_err(map_sql_error)?;
    let rows = stmt.query_map(params![library], |row| row.get(0)).map_err(map_sql_error)?;
    rows.collect::<Result<Vec<String>, _>>().map_err(map_sql_error)
}

fn delete_symbol(conn: &SqliteConnection, library: &str, symbol: &str) -> DomainResult<u64> {
    let removed = conn
        .execute(
            "DELETE FROM ts_versions WHERE library = ?1 AND symbol = ?2",
            params![library, symbol],
        )
        .map_err(map_sql_error)?;
    debug!(library, symbol, removed, "Time-series symbol deleted");
    Ok(removed as u64)
}

fn to_sql_version(version: u64) -> DomainResult<i64> {
    i64::try_from(version)
        .map_err(|_| DualSyncError::InvalidInput(format!("version out of range: {version}")))
}
