//! Backend connectors for fanload.
//!
//! Each connector implements [`fanload_core::SqlExecutor`] and opens a fresh
//! session per `execute` call, so the dispatcher can run partitions on
//! independent connections.

pub mod sources;

pub use sources::executor_for_url;
pub use sources::sql::{ConnectOptions, MySqlExecutor, PostgresExecutor, SqliteExecutor};
