//! Synchronous wrappers over the async API.
//!
//! Calls run on one lazily created multi-threaded runtime shared by the
//! process. They must not be made from inside a Tokio runtime.

use crate::{ColumnSchema, DataFrameResult, FanloadError, LoaderConfig, ReadRequest, Result};
use std::future::Future;
use std::sync::{Mutex, OnceLock};

static GLOBAL_RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();

fn runtime() -> Result<&'static tokio::runtime::Runtime> {
    if let Some(runtime) = GLOBAL_RUNTIME.get() {
        return Ok(runtime);
    }

    static INIT_LOCK: Mutex<()> = Mutex::new(());
    let _lock = INIT_LOCK
        .lock()
        .map_err(|e| FanloadError::internal(format!("Runtime init lock poisoned: {}", e)))?;

    if let Some(runtime) = GLOBAL_RUNTIME.get() {
        return Ok(runtime);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("fanload-runtime")
        .build()
        .map_err(|e| FanloadError::internal(format!("Failed to create runtime: {}", e)))?;

    let _ = GLOBAL_RUNTIME.set(runtime);
    GLOBAL_RUNTIME
        .get()
        .ok_or_else(|| FanloadError::internal("Runtime was not set after initialization"))
}

/// `block_on` panics inside a runtime; report it as an error instead.
fn block_on<F: Future>(method: &str, future: F) -> Result<F::Output> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(FanloadError::internal(format!(
            "fanload::blocking::{method}() must not be called from within a Tokio runtime; \
             use the async fanload::{method}() instead"
        )));
    }
    Ok(runtime()?.block_on(future))
}

pub fn read_sql(conn: &str, request: &ReadRequest) -> Result<DataFrameResult> {
    block_on("read_sql", crate::read_sql(conn, request))?
}

pub fn read_sql_with_config(
    conn: &str,
    request: &ReadRequest,
    config: &LoaderConfig,
) -> Result<DataFrameResult> {
    block_on(
        "read_sql_with_config",
        crate::read_sql_with_config(conn, request, config),
    )?
}

pub fn partition_sql(
    conn: &str,
    query: &str,
    column: &str,
    num: usize,
    range: Option<(i64, i64)>,
) -> Result<Vec<String>> {
    block_on(
        "partition_sql",
        crate::partition_sql(conn, query, column, num, range),
    )?
}

pub fn get_meta(conn: &str, query: &str) -> Result<Vec<ColumnSchema>> {
    block_on("get_meta", crate::get_meta(conn, query))?
}
