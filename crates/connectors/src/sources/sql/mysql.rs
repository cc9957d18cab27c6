//! MySQL executor.
//!
//! Binary protocol runs the query as a prepared statement, text protocol as a
//! plain query. Column tags are rebuilt from the column type, flags and
//! character set, so `BIGINT UNSIGNED` and `VARBINARY` reach the type system
//! as distinct names.

use super::common::{connect_with_retry, connection_error, query_error, ConnectOptions};
use async_trait::async_trait;
use fanload_common::scrubber::redact_url;
use fanload_common::Protocol;
use fanload_core::{
    CalendarValue, ClockValue, ColumnMeta, MySqlTypes, RawResultSet, SqlDialect, SqlExecutor,
    TypeSystem, TypeTag, WireValue,
};
use fanload_error::{ErrorCode, ErrorContext, FanloadError, Result};
use mysql_async::consts::{ColumnFlags, ColumnType};
use mysql_async::prelude::Queryable;
use mysql_async::{Column, Conn, Opts, Row, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const BACKEND: &str = "mysql";

/// Character set id MySQL reports for binary strings.
const BINARY_CHARSET: u16 = 63;

#[derive(Debug, Clone)]
pub struct MySqlExecutor {
    opts: Opts,
    target: String,
    options: ConnectOptions,
}

impl MySqlExecutor {
    pub fn from_url(url: &str, options: ConnectOptions) -> Result<Self> {
        let opts = Opts::from_url(url).map_err(|e| {
            FanloadError::new(
                ErrorCode::InvalidConnectionUrl,
                format!("Invalid MySQL connection URL: {}", e),
            )
            .with_context(ErrorContext::Config {
                field: Some("connection_url".to_string()),
            })
        })?;
        Ok(Self {
            opts,
            target: redact_url(url),
            options,
        })
    }

    async fn connect(&self) -> Result<Conn> {
        connect_with_retry(BACKEND, self.options.retry, || {
            let opts = self.opts.clone();
            async move {
                Conn::new(opts)
                    .await
                    .map_err(|e| connection_error(BACKEND, &self.target, e))
            }
        })
        .await
    }

    async fn fetch(&self, conn: &mut Conn, query: &str) -> Result<RawResultSet> {
        let (columns, rows) = match self.options.protocol {
            Protocol::Binary => {
                let mut result = conn
                    .exec_iter(query, ())
                    .await
                    .map_err(|e| query_error(BACKEND, e))?;
                let columns = result.columns();
                let rows = result
                    .collect_and_drop::<Row>()
                    .await
                    .map_err(|e| query_error(BACKEND, e))?;
                (columns, rows)
            }
            Protocol::Text => {
                let mut result = conn
                    .query_iter(query)
                    .await
                    .map_err(|e| query_error(BACKEND, e))?;
                let columns = result.columns();
                let rows = result
                    .collect_and_drop::<Row>()
                    .await
                    .map_err(|e| query_error(BACKEND, e))?;
                (columns, rows)
            }
        };

        let columns: Arc<[Column]> = columns.unwrap_or_else(|| Arc::from(Vec::new()));
        let binary: Vec<bool> = columns.iter().map(is_binary).collect();
        let rows: Vec<Vec<WireValue>> = rows
            .into_iter()
            .map(|row| {
                row.unwrap()
                    .into_iter()
                    .zip(&binary)
                    .map(|(value, binary)| wire_value(value, *binary))
                    .collect()
            })
            .collect();
        let meta: Vec<ColumnMeta> = columns
            .iter()
            .map(|c| {
                ColumnMeta::new(
                    c.name_str().into_owned(),
                    type_tag(c),
                    !c.flags().contains(ColumnFlags::NOT_NULL_FLAG),
                )
            })
            .collect();
        Ok(RawResultSet::new(meta, rows))
    }

    /// Best-effort `KILL QUERY` from a second session.
    async fn kill(&self, connection_id: u32) {
        let mut killer = match Conn::new(self.opts.clone()).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Failed to open MySQL session to cancel query: {}", e);
                return;
            }
        };
        if let Err(e) = killer
            .query_drop(format!("KILL QUERY {}", connection_id))
            .await
        {
            warn!("Failed to cancel MySQL query {}: {}", connection_id, e);
        }
        let _ = killer.disconnect().await;
    }
}

/// Binary strings and blobs. Numeric and temporal columns also report the
/// binary charset, so the column type is checked first.
fn is_binary(column: &Column) -> bool {
    matches!(
        column.column_type(),
        ColumnType::MYSQL_TYPE_STRING
            | ColumnType::MYSQL_TYPE_VARCHAR
            | ColumnType::MYSQL_TYPE_VAR_STRING
            | ColumnType::MYSQL_TYPE_TINY_BLOB
            | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
            | ColumnType::MYSQL_TYPE_LONG_BLOB
            | ColumnType::MYSQL_TYPE_BLOB
    ) && column.character_set() == BINARY_CHARSET
}

fn type_tag(column: &Column) -> TypeTag {
    let flags = column.flags();
    let binary = is_binary(column);
    let name = match column.column_type() {
        ColumnType::MYSQL_TYPE_TINY => "TINYINT",
        ColumnType::MYSQL_TYPE_SHORT => "SMALLINT",
        ColumnType::MYSQL_TYPE_INT24 => "MEDIUMINT",
        ColumnType::MYSQL_TYPE_LONG => "INT",
        ColumnType::MYSQL_TYPE_LONGLONG => "BIGINT",
        ColumnType::MYSQL_TYPE_YEAR => "YEAR",
        ColumnType::MYSQL_TYPE_BIT => "BIT",
        ColumnType::MYSQL_TYPE_FLOAT => "FLOAT",
        ColumnType::MYSQL_TYPE_DOUBLE => "DOUBLE",
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => "DECIMAL",
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => "DATE",
        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => "TIME",
        ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_DATETIME2 => "DATETIME",
        ColumnType::MYSQL_TYPE_TIMESTAMP | ColumnType::MYSQL_TYPE_TIMESTAMP2 => "TIMESTAMP",
        ColumnType::MYSQL_TYPE_JSON => "JSON",
        ColumnType::MYSQL_TYPE_ENUM => "ENUM",
        ColumnType::MYSQL_TYPE_SET => "SET",
        ColumnType::MYSQL_TYPE_STRING if flags.contains(ColumnFlags::ENUM_FLAG) => "ENUM",
        ColumnType::MYSQL_TYPE_STRING if flags.contains(ColumnFlags::SET_FLAG) => "SET",
        ColumnType::MYSQL_TYPE_STRING if binary => "BINARY",
        ColumnType::MYSQL_TYPE_STRING => "CHAR",
        ColumnType::MYSQL_TYPE_VARCHAR | ColumnType::MYSQL_TYPE_VAR_STRING if binary => {
            "VARBINARY"
        }
        ColumnType::MYSQL_TYPE_VARCHAR | ColumnType::MYSQL_TYPE_VAR_STRING => "VARCHAR",
        ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB
        | ColumnType::MYSQL_TYPE_BLOB
            if binary =>
        {
            "BLOB"
        }
        ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB
        | ColumnType::MYSQL_TYPE_BLOB => "TEXT",
        // Type of a bare NULL literal.
        ColumnType::MYSQL_TYPE_NULL => return TypeTag::Unknown,
        other => return TypeTag::native(format!("{:?}", other)),
    };
    if flags.contains(ColumnFlags::UNSIGNED_FLAG) {
        TypeTag::native(format!("{} UNSIGNED", name))
    } else {
        TypeTag::native(name)
    }
}

fn wire_value(value: Value, binary: bool) -> WireValue {
    match value {
        Value::NULL => WireValue::Null,
        Value::Bytes(bytes) if binary => WireValue::Bytes(bytes),
        Value::Bytes(bytes) => WireValue::Text(bytes),
        Value::Int(v) => WireValue::Int(v),
        Value::UInt(v) => WireValue::UInt(v),
        Value::Float(v) => WireValue::Float(v as f64),
        Value::Double(v) => WireValue::Float(v),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            WireValue::Calendar(CalendarValue {
                year: year as i32,
                month: month as u32,
                day: day as u32,
                hour: hour as u32,
                minute: minute as u32,
                second: second as u32,
                micros,
            })
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            WireValue::Clock(ClockValue {
                negative,
                days,
                hours: hours as u32,
                minutes: minutes as u32,
                seconds: seconds as u32,
                micros,
            })
        }
    }
}

#[async_trait]
impl SqlExecutor for MySqlExecutor {
    fn name(&self) -> &str {
        BACKEND
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::MySql
    }

    fn type_system(&self) -> &'static dyn TypeSystem {
        &MySqlTypes
    }

    async fn execute(&self, query: &str, cancel: CancellationToken) -> Result<RawResultSet> {
        let mut conn = self.connect().await?;
        let connection_id = conn.id();
        debug!(target: "mysql", db = %self.target, protocol = ?self.options.protocol, "Executing query");

        let outcome = tokio::select! {
            result = self.fetch(&mut conn, query) => result,
            _ = cancel.cancelled() => Err(FanloadError::cancelled("MySQL query cancelled")),
        };

        if outcome.as_ref().is_err_and(FanloadError::is_cancellation) {
            self.kill(connection_id).await;
        } else if let Err(e) = conn.disconnect().await {
            debug!("MySQL disconnect failed: {}", e);
        }
        outcome
    }
}
