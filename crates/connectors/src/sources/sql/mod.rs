//! SQL database executors.
//!
//! Provides `SqlExecutor` implementations for PostgreSQL, MySQL and SQLite.
//! Executors only move rows off the wire; type mapping lives with each
//! backend's `TypeSystem` in `fanload-core`.

pub mod common;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

pub use common::ConnectOptions;
pub use mysql::MySqlExecutor;
pub use postgres::PostgresExecutor;
pub use sqlite::SqliteExecutor;
