//! fanload: partitioned, parallel SQL loading into Arrow columns.
//!
//! A query is optionally split into range partitions over an integer column,
//! each partition runs on its own backend session, and the decoded results
//! are concatenated in partition order.
//!
//! ```text
//!   ReadRequest ──► QueryPartitioner ──► ConnectionDispatcher ──► TypeSystem ──► ResultAssembler
//!                   (probe MIN/MAX)      (P sessions at once)     (decode)        (concat)
//! ```
//!
//! # Example
//!
//! ```no_run
//! # async fn run() -> fanload::Result<()> {
//! use fanload::ReadRequest;
//!
//! let request = ReadRequest::query("SELECT * FROM lineitem").partition_on("l_orderkey", 4);
//! let frame = fanload::read_sql("postgres://loader@localhost/tpch", &request).await?;
//! println!("{} rows", frame.row_count());
//! # Ok(())
//! # }
//! ```

use fanload_connectors::{executor_for_url, ConnectOptions};
use fanload_core::partition::{check_partitionable, strip_statement, PartitionSpec};
use fanload_core::Loader;
use std::sync::Arc;

pub mod blocking;

pub use fanload_common::telemetry::init_logging;
pub use fanload_common::{BinaryEncoding, LoaderConfig, LoggingConfig, Protocol, RetrySettings};
pub use fanload_core::{
    CanonicalType, ColumnSchema, DataFrameResult, Partition, ReadRequest, SqlDialect, SqlExecutor,
    TypedColumn,
};
pub use fanload_error::{ErrorCode, ErrorContext, FanloadError, Result};

/// Build a loader for `conn` using `config`.
pub fn loader(conn: &str, config: &LoaderConfig) -> Result<Loader> {
    let executor = executor_for_url(conn, ConnectOptions::from(config))?;
    Ok(Loader::new(executor, config.clone()))
}

/// Build a loader around an existing executor.
pub fn loader_with_executor(executor: Arc<dyn SqlExecutor>, config: &LoaderConfig) -> Loader {
    Loader::new(executor, config.clone())
}

/// Read with the default configuration.
pub async fn read_sql(conn: &str, request: &ReadRequest) -> Result<DataFrameResult> {
    read_sql_with_config(conn, request, &LoaderConfig::default()).await
}

pub async fn read_sql_with_config(
    conn: &str,
    request: &ReadRequest,
    config: &LoaderConfig,
) -> Result<DataFrameResult> {
    loader(conn, config)?.read(request).await
}

/// Partition SQL for `query`, probing `MIN/MAX(column)` when `range` is absent.
pub async fn partition_sql(
    conn: &str,
    query: &str,
    column: &str,
    num: usize,
    range: Option<(i64, i64)>,
) -> Result<Vec<String>> {
    let mut request = ReadRequest::query(query).partition_on(column, num);
    if let Some((min, max)) = range {
        request = request.partition_range(min, max);
    }
    loader(conn, &LoaderConfig::default())?
        .partition_sql(&request)
        .await
}

/// Partition SQL without contacting a backend. A range is required unless
/// `num` is 1.
pub fn partition_queries(
    query: &str,
    column: &str,
    num: usize,
    range: Option<(i64, i64)>,
) -> Result<Vec<String>> {
    let spec = PartitionSpec::new(column, num, range)?;
    let base = strip_statement(query);
    check_partitionable(base, SqlDialect::Generic)?;

    let partitions = match (spec.num, spec.range) {
        (_, Some(range)) => fanload_core::partition_queries(base, &spec.column, spec.num, range)?,
        (1, None) => vec![Partition::verbatim(0, base)],
        (_, None) => {
            return Err(FanloadError::config(
                "partition_range is required to partition without a connection",
            )
            .with_context(ErrorContext::Config {
                field: Some("partition_range".to_string()),
            })
            .with_hint("Pass (min, max) or use partition_sql to probe the backend"))
        }
    };
    Ok(partitions.into_iter().map(|p| p.sql).collect())
}

/// Schema of `query`'s result, resolved from at most one row.
pub async fn get_meta(conn: &str, query: &str) -> Result<Vec<ColumnSchema>> {
    loader(conn, &LoaderConfig::default())?
        .fetch_schema(query)
        .await
}

/// Load configuration from an optional file overlaid with `FANLOAD__*` variables.
pub fn load_config(path: Option<&str>) -> Result<LoaderConfig> {
    let loaded = match path {
        Some(path) => LoaderConfig::from_file(path),
        None => LoaderConfig::from_env(),
    };
    loaded.map_err(|e| FanloadError::new(ErrorCode::ConfigLoad, format!("{:#}", e)))
}
