//! Conversions from external infrastructure errors into domain errors.

use dualsync_domain::DualSyncError;
use r2d2::Error as PoolError;
use rusqlite::Error as SqlError;
use tokio_postgres::Error as PgError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub DualSyncError);

impl From<InfraError> for DualSyncError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<DualSyncError> for InfraError {
    fn from(value: DualSyncError) -> Self {
        InfraError(value)
    }
}

/// Extension trait to make the conversion logic explicit in tests and within
/// this module.
trait IntoDualSyncError {
    fn into_dualsync(self) -> DualSyncError;
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → DualSyncError */
/* -------------------------------------------------------------------------- */

impl IntoDualSyncError for SqlError {
    fn into_dualsync(self) -> DualSyncError {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error as RE;

        match self {
            RE::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match (err.code, err.extended_code) {
                    (ErrorCode::DatabaseBusy, _) => {
                        DualSyncError::Database("database is busy".into())
                    }
                    (ErrorCode::DatabaseLocked, _) => {
                        DualSyncError::Database("database is locked".into())
                    }
                    (ErrorCode::ConstraintViolation, 1555 | 2067) => {
                        DualSyncError::Conflict(format!("unique constraint violation: {message}"))
                    }
                    _ => DualSyncError::Database(format!(
                        "sqlite failure {:?} (code {}): {}",
                        err.code, err.extended_code, message
                    )),
                }
            }
            RE::QueryReturnedNoRows => DualSyncError::NotFound("no rows returned by query".into()),
            RE::FromSqlConversionFailure(_, _, cause) => {
                DualSyncError::Database(format!("failed to convert sqlite value: {cause}"))
            }
            RE::InvalidColumnType(_, _, ty) => {
                DualSyncError::Database(format!("invalid column type: {ty}"))
            }
            RE::InvalidPath(path) => DualSyncError::Database(format!(
                "invalid database path: {}",
                path.to_string_lossy()
            )),
            other => DualSyncError::Database(other.to_string()),
        }
    }
}

impl From<SqlError> for InfraError {
    fn from(value: SqlError) -> Self {
        InfraError(value.into_dualsync())
    }
}

/* -------------------------------------------------------------------------- */
/* r2d2::Error → DualSyncError */
/* -------------------------------------------------------------------------- */

impl IntoDualSyncError for PoolError {
    fn into_dualsync(self) -> DualSyncError {
        DualSyncError::Database(format!("connection pool error: {self}"))
    }
}

impl From<PoolError> for InfraError {
    fn from(value: PoolError) -> Self {
        InfraError(value.into_dualsync())
    }
}

/* -------------------------------------------------------------------------- */
/* tokio_postgres::Error → DualSyncError */
/* -------------------------------------------------------------------------- */

impl IntoDualSyncError for PgError {
    fn into_dualsync(self) -> DualSyncError {
        use tokio_postgres::error::SqlState;

        if self.is_closed() {
            return DualSyncError::Network("postgres connection closed".into());
        }

        match self.code() {
            Some(code) if *code == SqlState::UNIQUE_VIOLATION => {
                DualSyncError::Conflict(format!("postgres unique violation: {self}"))
            }
            Some(code) if *code == SqlState::UNDEFINED_TABLE => {
                DualSyncError::NotFound(format!("postgres table missing: {self}"))
            }
            Some(code) if code.code().starts_with("08") => {
                DualSyncError::Network(format!("postgres connection failure: {self}"))
            }
            Some(_) => DualSyncError::Database(format!("postgres error: {self}")),
            None => DualSyncError::Network(format!("postgres client error: {self}")),
        }
    }
}

impl From<PgError> for InfraError {
    fn from(value: PgError) -> Self {
        InfraError(value.into_dualsync())
    }
}

/// Shorthand used by the SQLite adapters.
pub(crate) fn map_sql_error(err: SqlError) -> DualSyncError {
    DualSyncError::from(InfraError::from(err))
}

/// Shorthand used by the pooled adapters.
pub(crate) fn map_pool_error(err: PoolError) -> DualSyncError {
    DualSyncError::from(InfraError::from(err))
}

/// Shorthand used by the PostgreSQL adapter.
pub(crate) fn map_pg_error(err: PgError) -> DualSyncError {
    DualSyncError::from(InfraError::from(err))
}

/// Blocking-pool join failure.
pub(crate) fn map_join_error(err: tokio::task::JoinError) -> DualSyncError {
    if err.is_cancelled() {
        DualSyncError::Internal("blocking task cancelled".into())
    } else {
        DualSyncError::Internal(format!("blocking task failed: {err}"))
    }
}
