//! End-to-end read orchestration.
//!
//! `plan -> execute (concurrently) -> reconcile metadata -> resolve schema ->
//! decode (per partition, on the blocking pool) -> assemble`.

use crate::assemble::{DataFrameResult, PartitionResult, ResultAssembler};
use crate::backend::{ColumnMeta, SqlExecutor};
use crate::decode::{decode_partition, resolve_schema};
use crate::dispatch::{reconcile_metadata, ConnectionDispatcher};
use crate::partition::{strip_statement, Partition, QueryPartitioner, ReadRequest};
use crate::types::ColumnSchema;
use fanload_common::LoaderConfig;
use fanload_error::{FanloadError, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub const META_ALIAS: &str = "fanload_meta";

#[derive(Debug)]
pub struct Loader {
    executor: Arc<dyn SqlExecutor>,
    config: LoaderConfig,
}

impl Loader {
    pub fn new(executor: Arc<dyn SqlExecutor>, config: LoaderConfig) -> Self {
        Self { executor, config }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    fn partitioner(&self) -> QueryPartitioner {
        QueryPartitioner::new(self.executor.dialect(), self.config.query_timeout())
    }

    /// Partition descriptors for a request, probing the backend if needed.
    pub async fn plan(&self, request: &ReadRequest) -> Result<Vec<Partition>> {
        self.partitioner().plan(request, self.executor.as_ref()).await
    }

    pub async fn read(&self, request: &ReadRequest) -> Result<DataFrameResult> {
        let started = Instant::now();
        let partitions = self.plan(request).await?;
        let count = partitions.len();

        let dispatcher = ConnectionDispatcher::new(
            Arc::clone(&self.executor),
            self.config.effective_parallelism(count),
            self.config.query_timeout(),
        );
        let raw = dispatcher.execute(&partitions).await?;

        let meta = reconcile_metadata(&raw)?;
        let schema = resolve_schema(
            &meta,
            self.executor.type_system(),
            self.config.binary_encoding,
        )?;
        debug!(columns = schema.len(), "Resolved result schema");

        let results = self.decode_all(raw, meta, schema).await?;
        let frame = ResultAssembler::new(count).assemble(results)?;

        info!(
            backend = self.executor.name(),
            partitions = count,
            rows = frame.row_count(),
            columns = frame.num_columns(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Read complete"
        );
        Ok(frame)
    }

    async fn decode_all(
        &self,
        raw: Vec<crate::dispatch::RawPartition>,
        meta: Vec<ColumnMeta>,
        schema: Vec<ColumnSchema>,
    ) -> Result<Vec<PartitionResult>> {
        let meta = Arc::new(meta);
        let schema = Arc::new(schema);
        let types = self.executor.type_system();

        let handles: Vec<_> = raw
            .into_iter()
            .map(|partition| {
                let meta = Arc::clone(&meta);
                let schema = Arc::clone(&schema);
                tokio::task::spawn_blocking(move || {
                    decode_partition(partition, &meta, &schema, types)
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for joined in futures::future::join_all(handles).await {
            let result = joined.map_err(|e| {
                FanloadError::internal(format!("Decode task failed: {}", e))
            })??;
            results.push(result);
        }
        Ok(results)
    }

    /// Resolve the schema of `query` without materializing its rows.
    pub async fn fetch_schema(&self, query: &str) -> Result<Vec<ColumnSchema>> {
        let sql = format!(
            "SELECT * FROM ({}) AS {} LIMIT 1",
            strip_statement(query),
            META_ALIAS
        );
        let frame = self.read(&ReadRequest::query(sql)).await?;
        Ok(frame.schema().to_vec())
    }

    /// The SQL of every partition a request would execute.
    pub async fn partition_sql(&self, request: &ReadRequest) -> Result<Vec<String>> {
        Ok(self
            .plan(request)
            .await?
            .into_iter()
            .map(|p| p.sql)
            .collect())
    }
}
