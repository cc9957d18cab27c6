//! SQLite executor.
//!
//! `rusqlite` is synchronous, so every execution runs on the blocking pool
//! with its own read-only connection. Cancellation interrupts the running
//! statement through the connection's interrupt handle.

use super::common::{connect_with_retry, connection_error, query_error, ConnectOptions};
use async_trait::async_trait;
use fanload_core::{
    ColumnMeta, RawResultSet, SqlDialect, SqlExecutor, SqliteTypes, TypeSystem, TypeTag,
    WireValue,
};
use fanload_error::{ErrorCode, ErrorContext, FanloadError, Result};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, InterruptHandle, OpenFlags};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const BACKEND: &str = "sqlite";

#[derive(Debug, Clone)]
pub struct SqliteExecutor {
    path: String,
    options: ConnectOptions,
}

impl SqliteExecutor {
    pub fn new(path: impl Into<String>, options: ConnectOptions) -> Self {
        Self {
            path: path.into(),
            options,
        }
    }

    /// `sqlite://<path>`; the remainder after the scheme is the file path.
    pub fn from_url(url: &str, options: ConnectOptions) -> Result<Self> {
        let path = url
            .strip_prefix("sqlite://")
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                FanloadError::new(
                    ErrorCode::InvalidConnectionUrl,
                    "SQLite URL must have the form sqlite://<path>",
                )
                .with_context(ErrorContext::Config {
                    field: Some("connection_url".to_string()),
                })
            })?;
        Ok(Self::new(path, options))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    async fn open(&self) -> Result<Connection> {
        connect_with_retry(BACKEND, self.options.retry, || {
            let path = self.path.clone();
            async move {
                tokio::task::spawn_blocking(move || {
                    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
                        | OpenFlags::SQLITE_OPEN_URI
                        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
                    Connection::open_with_flags(&path, flags)
                        .map_err(|e| connection_error(BACKEND, &path, e))
                })
                .await
                .map_err(|e| FanloadError::internal(format!("SQLite open task failed: {}", e)))?
            }
        })
        .await
    }
}

/// Declared type, else the storage class of the first non-null value.
fn infer_tag(declared: Option<&str>, rows: &[Vec<WireValue>], column: usize) -> TypeTag {
    if let Some(declared) = declared.filter(|d| !d.trim().is_empty()) {
        return TypeTag::native(declared);
    }
    rows.iter()
        .find_map(|row| match &row[column] {
            WireValue::Null => None,
            WireValue::Int(_) => Some(TypeTag::native("INTEGER")),
            WireValue::Float(_) => Some(TypeTag::native("REAL")),
            WireValue::Bytes(_) => Some(TypeTag::native("BLOB")),
            _ => Some(TypeTag::native("TEXT")),
        })
        .unwrap_or(TypeTag::Unknown)
}

fn wire_value(value: ValueRef<'_>) -> WireValue {
    match value {
        ValueRef::Null => WireValue::Null,
        ValueRef::Integer(v) => WireValue::Int(v),
        ValueRef::Real(v) => WireValue::Float(v),
        ValueRef::Text(v) => WireValue::Text(v.to_vec()),
        ValueRef::Blob(v) => WireValue::Bytes(v.to_vec()),
    }
}

fn run_query(conn: &Connection, query: &str, cancel: &CancellationToken) -> Result<RawResultSet> {
    if cancel.is_cancelled() {
        return Err(FanloadError::cancelled("SQLite query cancelled"));
    }
    let mut stmt = conn.prepare(query).map_err(|e| query_error(BACKEND, e))?;

    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let declared: Vec<Option<String>> = stmt
        .columns()
        .iter()
        .map(|c| c.decl_type().map(String::from))
        .collect();

    if names.is_empty() {
        stmt.execute([]).map_err(|e| query_error(BACKEND, e))?;
        return Ok(RawResultSet::default());
    }

    let mut rows = Vec::new();
    let mut cursor = stmt.query([]).map_err(|e| query_error(BACKEND, e))?;
    while let Some(row) = cursor.next().map_err(|e| query_error(BACKEND, e))? {
        if cancel.is_cancelled() {
            return Err(FanloadError::cancelled("SQLite query cancelled"));
        }
        let values = (0..names.len())
            .map(|i| row.get_ref(i).map(wire_value))
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| query_error(BACKEND, e))?;
        rows.push(values);
    }

    let columns = names
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            // SQLite does not report NOT NULL through the statement API.
            ColumnMeta::new(name, infer_tag(declared[i].as_deref(), &rows, i), true)
        })
        .collect();
    Ok(RawResultSet::new(columns, rows))
}

#[async_trait]
impl SqlExecutor for SqliteExecutor {
    fn name(&self) -> &str {
        BACKEND
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    fn type_system(&self) -> &'static dyn TypeSystem {
        &SqliteTypes
    }

    async fn execute(&self, query: &str, cancel: CancellationToken) -> Result<RawResultSet> {
        let conn = self.open().await?;
        let interrupt = Arc::new(conn.get_interrupt_handle());

        // Interrupt the statement if the caller cancels while it runs.
        let abort = cancel.child_token();
        let done = CancellationToken::new();
        let watch_abort = abort.clone();
        let watch_done = done.clone();
        let watch_interrupt = Arc::clone(&interrupt);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = watch_abort.cancelled() => watch_interrupt.interrupt(),
                _ = watch_done.cancelled() => {}
            }
        });
        let mut guard = StatementGuard {
            interrupt,
            abort: abort.clone(),
            done,
            finished: false,
        };

        tracing::debug!(target: "sqlite", db = %self.path, "Executing query");
        let query = query.to_string();
        let task_abort = abort.clone();
        let joined =
            tokio::task::spawn_blocking(move || run_query(&conn, &query, &task_abort)).await;
        guard.finished = true;
        let outcome = joined
            .map_err(|e| FanloadError::internal(format!("SQLite query task failed: {}", e)))?;

        match outcome {
            Err(_) if abort.is_cancelled() => {
                Err(FanloadError::cancelled("SQLite query interrupted"))
            }
            other => other,
        }
    }
}

/// Interrupts the running statement when `execute` is dropped before the
/// blocking task finished, e.g. by a timeout around it.
struct StatementGuard {
    interrupt: Arc<InterruptHandle>,
    abort: CancellationToken,
    done: CancellationToken,
    finished: bool,
}

impl Drop for StatementGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.abort.cancel();
            self.interrupt.interrupt();
        }
        self.done.cancel();
    }
}
