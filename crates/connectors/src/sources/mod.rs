//! Connection URL routing.
//!
//! # Supported Backends
//!
//! | Scheme | Implementation | Driver |
//! |--------|----------------|--------|
//! | `sqlite://<path>` | `SqliteExecutor` | `rusqlite` (blocking pool) |
//! | `postgres://`, `postgresql://` | `PostgresExecutor` | `tokio-postgres` |
//! | `mysql://` | `MySqlExecutor` | `mysql_async` |
//!
//! # Adding a New Backend
//!
//! 1. Implement `SqlExecutor` for a struct under `sql/`.
//! 2. Give it a `TypeSystem` in `fanload-core::decode`.
//! 3. Route its scheme in `executor_for_url`.

use fanload_core::SqlExecutor;
use fanload_error::{ErrorCode, ErrorContext, FanloadError, Result};
use std::sync::Arc;

pub mod sql;

use sql::{ConnectOptions, MySqlExecutor, PostgresExecutor, SqliteExecutor};

/// Schemes accepted by [`executor_for_url`].
pub const SUPPORTED_SCHEMES: &[&str] = &["sqlite", "postgres", "postgresql", "mysql"];

fn scheme_of(url: &str) -> Result<&str> {
    match url.split_once("://") {
        Some((scheme, _)) if !scheme.is_empty() => Ok(scheme),
        _ => Err(FanloadError::new(
            ErrorCode::InvalidConnectionUrl,
            "Connection URL must have the form <scheme>://...",
        )
        .with_context(ErrorContext::Config {
            field: Some("connection_url".to_string()),
        })),
    }
}

/// Build the executor for a connection URL.
pub fn executor_for_url(url: &str, options: ConnectOptions) -> Result<Arc<dyn SqlExecutor>> {
    let scheme = scheme_of(url)?;
    let executor: Arc<dyn SqlExecutor> = match scheme.to_ascii_lowercase().as_str() {
        "sqlite" => Arc::new(SqliteExecutor::from_url(url, options)?),
        "postgres" | "postgresql" => Arc::new(PostgresExecutor::from_url(url, options)?),
        "mysql" => Arc::new(MySqlExecutor::from_url(url, options)?),
        other => {
            return Err(FanloadError::new(
                ErrorCode::UnsupportedBackend,
                format!("Unsupported backend '{}'", other),
            )
            .with_hint(format!(
                "Supported schemes: {}",
                SUPPORTED_SCHEMES.join(", ")
            )))
        }
    };
    tracing::debug!(backend = executor.name(), "Created executor");
    Ok(executor)
}
