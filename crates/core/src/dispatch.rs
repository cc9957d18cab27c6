//! Concurrent partition execution.
//!
//! Partitions run on a `JoinSet`, bounded by a semaphore. The first real
//! failure cancels the shared token so siblings abort; execution still waits
//! for every task before returning, so no work outlives the read.

use crate::backend::{ColumnMeta, RawResultSet, SqlExecutor, TypeTag};
use crate::partition::Partition;
use fanload_common::scrubber::scrub_sql;
use fanload_error::{ErrorCode, ErrorContext, FanloadError, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Rows and metadata of one executed partition, not yet decoded.
#[derive(Debug, Clone)]
pub struct RawPartition {
    pub index: usize,
    pub sql: String,
    pub result: RawResultSet,
}

#[derive(Debug, Clone)]
pub struct ConnectionDispatcher {
    executor: Arc<dyn SqlExecutor>,
    parallelism: usize,
    timeout: Duration,
}

impl ConnectionDispatcher {
    pub fn new(executor: Arc<dyn SqlExecutor>, parallelism: usize, timeout: Duration) -> Self {
        Self {
            executor,
            parallelism,
            timeout,
        }
    }

    /// Permits actually granted for `partitions` partitions.
    pub fn effective_parallelism(&self, partitions: usize) -> usize {
        let requested = self.parallelism.clamp(1, partitions.max(1));
        match self.executor.max_sessions() {
            Some(limit) => requested.min(limit.max(1)),
            None => requested,
        }
    }

    /// Execute every partition and return the raw results in partition order.
    pub async fn execute(&self, partitions: &[Partition]) -> Result<Vec<RawPartition>> {
        if partitions.is_empty() {
            return Err(FanloadError::internal("no partitions to execute"));
        }

        let permits = self.effective_parallelism(partitions.len());
        debug!(
            backend = self.executor.name(),
            partitions = partitions.len(),
            permits,
            "Dispatching partitions"
        );

        let semaphore = Arc::new(Semaphore::new(permits));
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        for (slot, partition) in partitions.iter().enumerate() {
            let executor = Arc::clone(&self.executor);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let partition = partition.clone();
            let timeout = self.timeout;
            tasks.spawn(async move {
                let outcome = run_partition(executor, semaphore, cancel, partition, timeout).await;
                (slot, outcome)
            });
        }

        let mut completed: Vec<Option<RawPartition>> = vec![None; partitions.len()];
        let mut first_error: Option<FanloadError> = None;

        while let Some(joined) = tasks.join_next().await {
            let (slot, outcome) = match joined {
                Ok(pair) => pair,
                Err(join_err) => (
                    usize::MAX,
                    Err(FanloadError::internal(format!(
                        "Partition task failed: {}",
                        join_err
                    ))),
                ),
            };
            match outcome {
                Ok(raw) => completed[slot] = Some(raw),
                Err(err) if first_error.is_none() => {
                    if err.is_cancellation() {
                        // Cancellation without a recorded cause is still a failure.
                        debug!("Partition reported cancellation before any other failure");
                    } else {
                        warn!(code = %err.code, "Partition failed, cancelling siblings: {}", err.message);
                    }
                    cancel.cancel();
                    first_error = Some(err);
                }
                Err(err) => {
                    debug!(code = %err.code, "Suppressing secondary partition error: {}", err.message);
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        completed
            .into_iter()
            .enumerate()
            .map(|(slot, raw)| {
                raw.ok_or_else(|| {
                    FanloadError::internal(format!("Partition {} produced no result", slot))
                })
            })
            .collect()
    }
}

fn with_partition_context(err: FanloadError, partition: &Partition) -> FanloadError {
    if err.context.is_some() {
        return err;
    }
    err.with_context(ErrorContext::Partition {
        index: partition.index,
        sql: scrub_sql(&partition.sql),
    })
}

async fn run_partition(
    executor: Arc<dyn SqlExecutor>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    partition: Partition,
    timeout: Duration,
) -> Result<RawPartition> {
    let cancelled = || {
        FanloadError::cancelled(format!(
            "Partition {} cancelled after a sibling failed",
            partition.index
        ))
    };

    let _permit = tokio::select! {
        _ = cancel.cancelled() => return Err(cancelled()),
        permit = Arc::clone(&semaphore).acquire_owned() => permit
            .map_err(|_| FanloadError::internal("dispatcher semaphore closed"))?,
    };
    if cancel.is_cancelled() {
        return Err(cancelled());
    }

    debug!(
        partition = partition.index,
        sql = %scrub_sql(&partition.sql),
        "Executing partition"
    );
    let started = Instant::now();
    let token = cancel.child_token();

    let result = match tokio::time::timeout(timeout, executor.execute(&partition.sql, token.clone()))
        .await
    {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => return Err(with_partition_context(err, &partition)),
        Err(_) => {
            token.cancel();
            return Err(with_partition_context(
                FanloadError::timeout(format!(
                    "Partition {} exceeded the query timeout of {:?}",
                    partition.index, timeout
                )),
                &partition,
            ));
        }
    };

    debug!(
        partition = partition.index,
        rows = result.row_count(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Partition finished"
    );

    Ok(RawPartition {
        index: partition.index,
        sql: partition.sql,
        result,
    })
}

/// Reconcile column metadata across partitions.
///
/// Partition 0 is authoritative. Every other partition must report the same
/// column names and native type tags. An `Unknown` tag carries no information
/// and is replaced by the first determined tag another partition reports.
pub fn reconcile_metadata(partitions: &[RawPartition]) -> Result<Vec<ColumnMeta>> {
    let Some((first, rest)) = partitions.split_first() else {
        return Err(FanloadError::internal("no partitions to reconcile"));
    };
    let mut columns = first.result.columns.clone();

    for partition in rest {
        let actual = &partition.result.columns;
        let mut mismatches = Vec::new();
        if actual.len() != columns.len() {
            mismatches.push(format!(
                "expected {} columns, found {}",
                columns.len(),
                actual.len()
            ));
        }
        for (pos, (expected, found)) in columns.iter_mut().zip(actual).enumerate() {
            if expected.name != found.name {
                mismatches.push(format!(
                    "column {}: name '{}' vs '{}'",
                    pos, expected.name, found.name
                ));
                continue;
            }
            match (&expected.type_tag, &found.type_tag) {
                (a, b) if a == b => {}
                (TypeTag::Unknown, TypeTag::Native(_)) => expected.type_tag = found.type_tag.clone(),
                (TypeTag::Native(_), TypeTag::Unknown) => {}
                (a, b) => mismatches.push(format!(
                    "column '{}': type {} vs {}",
                    expected.name, a, b
                )),
            }
            expected.nullable |= found.nullable;
        }

        if !mismatches.is_empty() {
            return Err(FanloadError::new(
                ErrorCode::SchemaMismatch,
                format!(
                    "Partition {} returned a different schema than partition {}",
                    partition.index, first.index
                ),
            )
            .with_context(ErrorContext::SchemaMismatch {
                partition: partition.index,
                expected_columns: first.result.columns.iter().map(|c| c.name.clone()).collect(),
                actual_columns: actual.iter().map(|c| c.name.clone()).collect(),
                mismatches,
            })
            .with_hint("Every partition must select the same columns with the same types"));
        }
    }

    Ok(columns)
}
