//! Relational (PostgreSQL) store adapter

pub mod postgres;

pub use postgres::{validate_table_name, PostgresRelationalStore};
