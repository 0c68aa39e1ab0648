//! SQLite-backed stores: the sync message queue and the versioned
//! time-series library.

pub mod manager;
pub mod message_store;
pub mod pool;
pub mod timeseries_store;

pub use manager::DbManager;
pub use message_store::{RetryPolicy, SqliteMessageStore};
pub use pool::{create_sqlite_pool, SqliteConnection, SqlitePool, SqlitePoolConfig};
pub use timeseries_store::SqliteTimeSeriesStore;
