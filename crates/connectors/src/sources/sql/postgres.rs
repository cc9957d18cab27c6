//! PostgreSQL executor.
//!
//! Binary protocol: the statement is prepared and each cell is handed to the
//! decoder as raw wire bytes. Text protocol: the statement is prepared only to
//! learn column types, then run through the simple query protocol.

use super::common::{connect_with_retry, connection_error, query_error, ConnectOptions};
use async_trait::async_trait;
use fanload_common::scrubber::redact_url;
use fanload_common::Protocol;
use fanload_core::{
    ColumnMeta, PostgresTypes, RawResultSet, SqlDialect, SqlExecutor, TypeSystem, TypeTag,
    WireValue,
};
use fanload_error::{ErrorCode, ErrorContext, FanloadError, Result};
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, Statement};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

const BACKEND: &str = "postgres";

/// Undecoded cell bytes; decoding happens in the core type system.
struct RawValue(Vec<u8>);

impl<'a> FromSql<'a> for RawValue {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(RawValue(raw.to_vec()))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub struct PostgresExecutor {
    config: Config,
    target: String,
    options: ConnectOptions,
}

impl PostgresExecutor {
    pub fn from_url(url: &str, options: ConnectOptions) -> Result<Self> {
        let config = url.parse::<Config>().map_err(|e| {
            FanloadError::new(
                ErrorCode::InvalidConnectionUrl,
                format!("Invalid PostgreSQL connection string: {}", e),
            )
            .with_context(ErrorContext::Config {
                field: Some("connection_url".to_string()),
            })
        })?;
        Ok(Self {
            config,
            target: redact_url(url),
            options,
        })
    }

    async fn connect(&self) -> Result<Client> {
        connect_with_retry(BACKEND, self.options.retry, || async {
            let (client, connection) = self
                .config
                .connect(NoTls)
                .await
                .map_err(|e| connection_error(BACKEND, &self.target, e))?;

            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    error!("PostgreSQL connection error: {}", e);
                }
            });
            Ok(client)
        })
        .await
    }

    async fn run(&self, client: &Client, query: &str) -> Result<RawResultSet> {
        let statement = client
            .prepare(query)
            .await
            .map_err(|e| pg_query_error(&e))?;
        let columns = column_meta(&statement);

        let rows = match self.options.protocol {
            Protocol::Binary => binary_rows(client, &statement).await?,
            Protocol::Text => text_rows(client, query, columns.len()).await?,
        };
        Ok(RawResultSet::new(columns, rows))
    }
}

fn pg_query_error(err: &tokio_postgres::Error) -> FanloadError {
    match err.as_db_error() {
        Some(db) => query_error(BACKEND, format!("{}: {}", db.code().code(), db.message())),
        None => query_error(BACKEND, err),
    }
}

fn column_meta(statement: &Statement) -> Vec<ColumnMeta> {
    statement
        .columns()
        .iter()
        .map(|c| ColumnMeta::new(c.name(), TypeTag::native(c.type_().name()), true))
        .collect()
}

async fn binary_rows(client: &Client, statement: &Statement) -> Result<Vec<Vec<WireValue>>> {
    let rows = client
        .query(statement, &[])
        .await
        .map_err(|e| pg_query_error(&e))?;
    let width = statement.columns().len();

    rows.iter()
        .map(|row| -> Result<Vec<WireValue>> {
            (0..width)
                .map(|i| -> Result<WireValue> {
                    let cell: Option<RawValue> = row.try_get(i).map_err(|e| {
                        FanloadError::query(format!("Failed to read column {}: {}", i, e))
                    })?;
                    Ok(cell.map_or(WireValue::Null, |raw| WireValue::Bytes(raw.0)))
                })
                .collect()
        })
        .collect()
}

async fn text_rows(client: &Client, query: &str, width: usize) -> Result<Vec<Vec<WireValue>>> {
    let messages = client
        .simple_query(query)
        .await
        .map_err(|e| pg_query_error(&e))?;

    let mut rows = Vec::new();
    for message in messages {
        if let SimpleQueryMessage::Row(row) = message {
            if row.len() != width {
                return Err(FanloadError::internal(format!(
                    "simple query returned {} columns, prepared statement described {}",
                    row.len(),
                    width
                )));
            }
            rows.push(
                (0..width)
                    .map(|i| {
                        row.get(i)
                            .map_or(WireValue::Null, |text| WireValue::Text(text.as_bytes().to_vec()))
                    })
                    .collect(),
            );
        }
    }
    Ok(rows)
}

#[async_trait]
impl SqlExecutor for PostgresExecutor {
    fn name(&self) -> &str {
        BACKEND
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Postgres
    }

    fn type_system(&self) -> &'static dyn TypeSystem {
        &PostgresTypes
    }

    async fn execute(&self, query: &str, cancel: CancellationToken) -> Result<RawResultSet> {
        let client = self.connect().await?;
        let cancel_token = client.cancel_token();
        debug!(target: "postgres", db = %self.target, protocol = ?self.options.protocol, "Executing query");

        tokio::select! {
            result = self.run(&client, query) => result,
            _ = cancel.cancelled() => {
                if let Err(e) = cancel_token.cancel_query(NoTls).await {
                    warn!("Failed to send PostgreSQL cancel request: {}", e);
                }
                Err(FanloadError::cancelled("PostgreSQL query cancelled"))
            }
        }
    }
}
