//! PostgreSQL relational store
//!
//! Each sync target table stores one row per `(symbol, kind, granularity)`
//! with the record body in a JSONB `data` column. Writes are full-row
//! upserts, so replaying a message overwrites rather than duplicates.
//!
//! Table names come from message rows, so they are validated against a
//! strict identifier pattern before being interpolated into SQL.
//!
//! A table that does not exist yet holds no rows: reads return nothing and
//! deletes remove nothing, the same as on the time-series side.

use std::collections::HashSet;

use async_trait::async_trait;
use dualsync_core::RelationalStore;
use dualsync_domain::{DualSyncError, RecordKey, RelationalConfig, Result as DomainResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, info, instrument, warn};

use crate::errors::conversions::map_pg_error;

static TABLE_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}(\.[A-Za-z_][A-Za-z0-9_]{0,62})?$")
        .expect("TABLE_NAME_REGEX should compile - this is a bug")
});

/// Reject anything that is not a plain (optionally schema-qualified)
/// identifier.
pub fn validate_table_name(table: &str) -> DomainResult<&str> {
    if TABLE_NAME_REGEX.is_match(table) {
        Ok(table)
    } else {
        Err(DualSyncError::InvalidInput(format!("invalid relational table name: {table:?}")))
    }
}

/// `tokio-postgres` implementation of [`RelationalStore`].
pub struct PostgresRelationalStore {
    client: Client,
    connection_task: JoinHandle<()>,
    auto_create_tables: bool,
    ensured_tables: TokioMutex<HashSet<String>>,
}

impl PostgresRelationalStore {
    /// Connect using the configured URL, over TLS when `use_tls` is set.
    #[instrument(skip(config), fields(use_tls = config.use_tls))]
    pub async fn connect(config: &RelationalConfig) -> DomainResult<Self> {
        let (client, connection_task) = if config.use_tls {
            let connector = native_tls::TlsConnector::builder()
                .build()
                .map_err(|e| DualSyncError::Config(format!("failed to build TLS connector: {e}")))?;
            let tls = postgres_native_tls::MakeTlsConnector::new(connector);
            let (client, connection) =
                tokio_postgres::connect(&config.url, tls).await.map_err(map_pg_error)?;
            (client, spawn_connection(connection))
        } else {
            let (client, connection) =
                tokio_postgres::connect(&config.url, NoTls).await.map_err(map_pg_error)?;
            (client, spawn_connection(connection))
        };

        info!("Connected to relational store");
        Ok(Self {
            client,
            connection_task,
            auto_create_tables: true,
            ensured_tables: TokioMutex::new(HashSet::new()),
        })
    }

    /// Disable lazy `CREATE TABLE IF NOT EXISTS` on first write.
    #[must_use]
    pub fn without_auto_create(mut self) -> Self {
        self.auto_create_tables = false;
        self
    }

    /// Create the sync table layout if it does not exist.
    pub async fn ensure_table(&self, table: &str) -> DomainResult<()> {
        let table = validate_table_name(table)?;
        let mut ensured = self.ensured_tables.lock().await;
        if ensured.contains(table) {
            return Ok(());
        }

        self.client.batch_execute(&create_table_sql(table)).await.map_err(map_pg_error)?;
        debug!(table, "Relational sync table ensured");
        ensured.insert(table.to_string());
        Ok(())
    }

    /// Round-trip a trivial query.
    pub async fn health_check(&self) -> DomainResult<()> {
        self.client.simple_query("SELECT 1").await.map_err(map_pg_error)?;
        Ok(())
    }
}

impl Drop for PostgresRelationalStore {
    fn drop(&mut self) {
        self.connection_task.abort();
    }
}

#[async_trait]
impl RelationalStore for PostgresRelationalStore {
    async fn upsert(&self, table: &str, key: &RecordKey, data: &Value) -> DomainResult<()> {
        let table = validate_table_name(table)?;
        if self.auto_create_tables {
            self.ensure_table(table).await?;
        }

        self.client
            .execute(&upsert_sql(table), &[&key.symbol, &key.kind, &key.granularity, data])
            .await
            .map_err(map_pg_error)?;
        debug!(table, key = %key, "Relational row upserted");
        Ok(())
    }

    async fn fetch(&self, table: &str, key: &RecordKey) -> DomainResult<Option<Value>> {
        let table = validate_table_name(table)?;
        let row = match self
            .client
            .query_opt(&select_sql(table), &[&key.symbol, &key.kind, &key.granularity])
            .await
        {
            Ok(row) => row,
            Err(e) if is_undefined_table(&e) => return Ok(None),
            Err(e) => return Err(map_pg_error(e)),
        };

        row.map(|row| row.try_get::<_, Value>(0).map_err(map_pg_error)).transpose()
    }

    async fn delete(&self, table: &str, key: &RecordKey) -> DomainResult<u64> {
        let table = validate_table_name(table)?;
        let removed = match self
            .client
            .execute(&delete_sql(table), &[&key.symbol, &key.kind, &key.granularity])
            .await
        {
            Ok(removed) => removed,
            Err(e) if is_undefined_table(&e) => {
                debug!(table, key = %key, "Relational table absent; nothing to delete");
                return Ok(0);
            }
            Err(e) => return Err(map_pg_error(e)),
        };
        debug!(table, key = %key, removed, "Relational row deleted");
        Ok(removed)
    }
}

fn is_undefined_table(err: &tokio_postgres::Error) -> bool {
    err.code() == Some(&SqlState::UNDEFINED_TABLE)
}

fn spawn_connection<C>(connection: C) -> JoinHandle<()>
where
    C: std::future::Future<Output = Result<(), tokio_postgres::Error>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            warn!(error = %err, "Relational store connection closed with error");
        }
    })
}

// ============================================================================
// SQL builders (table names must already be validated)
// ============================================================================

fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            symbol TEXT NOT NULL,
            kind TEXT NOT NULL,
            granularity TEXT NOT NULL,
            data JSONB NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (symbol, kind, granularity)
        )"
    )
}

fn upsert_sql(table: &str) -> String {
    format!(
        "INSERT INTO {table} (symbol, kind, granularity, data, updated_at)
         VALUES ($1, $2, $3, $4, now())
         ON CONFLICT (symbol, kind, granularity)
         DO UPDATE SET data = EXCLUDED.data, updated_at = now()"
    )
}

fn select_sql(table: &str) -> String {
    format!("SELECT data FROM {table} WHERE symbol = $1 AND kind = $2 AND granularity = $3")
}

fn delete_sql(table: &str) -> String {
    format!("DELETE FROM {table} WHERE symbol = $1 AND kind = $2 AND granularity = $3")
}
