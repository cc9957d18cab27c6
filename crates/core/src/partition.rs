//! Query partitioning.
//!
//! A base query plus a numeric partition column is split into `num`
//! sub-queries, each wrapping the base query with a half-open range filter:
//!
//! ```text
//! SELECT * FROM (<base>) AS fanload_part
//!   WHERE fanload_part.<col> >= <lo> AND fanload_part.<col> < <hi>
//! ```
//!
//! The last partition closes the range with `<= max`. Rows whose partition
//! column is NULL match no range filter and are therefore not returned by a
//! partitioned read.

use crate::backend::{ColumnMeta, SqlDialect, SqlExecutor, TypeTag, WireValue};
use crate::decode::TypeSystem;
use crate::types::{CanonicalType, Value, DECIMAL_SCALE};
use fanload_common::scrubber::scrub_sql;
use fanload_error::{ErrorContext, FanloadError, Result};
use sqlparser::ast::Statement;
use sqlparser::parser::Parser;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const PARTITION_ALIAS: &str = "fanload_part";
pub const RANGE_ALIAS: &str = "fanload_range";

/// Value range selected by one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionBounds {
    /// Inclusive lower bound
    pub lower: i64,
    pub upper: i64,
    /// `true` only for the last partition of a range split
    pub upper_inclusive: bool,
}

impl PartitionBounds {
    pub fn contains(&self, value: i64) -> bool {
        value >= self.lower
            && if self.upper_inclusive {
                value <= self.upper
            } else {
                value < self.upper
            }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub index: usize,
    pub sql: String,
    /// `None` for verbatim queries
    pub bounds: Option<PartitionBounds>,
}

impl Partition {
    pub fn verbatim(index: usize, sql: impl Into<String>) -> Self {
        Self {
            index,
            sql: sql.into(),
            bounds: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuerySource {
    Single(String),
    /// Caller-supplied partitions, executed verbatim
    List(Vec<String>),
}

/// Parameters of a read, as the caller supplied them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub source: QuerySource,
    pub partition_on: Option<String>,
    pub partition_num: Option<usize>,
    pub partition_range: Option<(i64, i64)>,
}

impl ReadRequest {
    pub fn query(sql: impl Into<String>) -> Self {
        Self {
            source: QuerySource::Single(sql.into()),
            partition_on: None,
            partition_num: None,
            partition_range: None,
        }
    }

    pub fn queries<I, S>(queries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            source: QuerySource::List(queries.into_iter().map(Into::into).collect()),
            partition_on: None,
            partition_num: None,
            partition_range: None,
        }
    }

    pub fn partition_on(mut self, column: impl Into<String>, num: usize) -> Self {
        self.partition_on = Some(column.into());
        self.partition_num = Some(num);
        self
    }

    pub fn partition_range(mut self, min: i64, max: i64) -> Self {
        self.partition_range = Some((min, max));
        self
    }

    fn has_partition_params(&self) -> bool {
        self.partition_on.is_some() || self.partition_num.is_some() || self.partition_range.is_some()
    }

    /// Check the parameters for consistency and decide how the read is planned.
    pub fn validate(&self, dialect: SqlDialect) -> Result<PlanKind> {
        let base = match &self.source {
            QuerySource::List(queries) if queries.is_empty() => {
                return Err(config_error("Query list is empty", "queries"));
            }
            QuerySource::List(queries) if queries.len() > 1 => {
                if self.has_partition_params() {
                    return Err(config_error(
                        "An explicit query list cannot be combined with partition parameters",
                        "partition_on",
                    )
                    .with_hint("Either pass one query with partition_on, or pre-split the queries yourself"));
                }
                return Ok(PlanKind::Verbatim(queries.clone()));
            }
            QuerySource::List(queries) => queries[0].clone(),
            QuerySource::Single(sql) => sql.clone(),
        };

        let Some(column) = &self.partition_on else {
            if self.partition_num.is_some() || self.partition_range.is_some() {
                return Err(config_error(
                    "partition_num and partition_range require partition_on",
                    "partition_on",
                ));
            }
            return Ok(PlanKind::Verbatim(vec![base]));
        };

        let num = self.partition_num.ok_or_else(|| {
            config_error("partition_num is required with partition_on", "partition_num")
        })?;
        let spec = PartitionSpec::new(column.clone(), num, self.partition_range)?;
        check_partitionable(&base, dialect)?;
        Ok(PlanKind::Range { base, spec })
    }
}

/// Validated range partitioning parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSpec {
    pub column: String,
    pub num: usize,
    pub range: Option<(i64, i64)>,
}

impl PartitionSpec {
    pub fn new(column: impl Into<String>, num: usize, range: Option<(i64, i64)>) -> Result<Self> {
        let column = column.into();
        let trimmed = column.trim();
        if trimmed.is_empty() {
            return Err(config_error("Partition column is empty", "partition_on"));
        }
        if trimmed.contains(';') || trimmed.contains("--") || trimmed.contains("/*") {
            return Err(config_error(
                format!("Partition column '{}' is not a plain column reference", trimmed),
                "partition_on",
            ));
        }
        if num == 0 {
            return Err(config_error("partition_num must be at least 1", "partition_num"));
        }
        if let Some((min, max)) = range {
            if min > max {
                return Err(config_error(
                    format!("partition_range min {} is greater than max {}", min, max),
                    "partition_range",
                ));
            }
        }
        Ok(Self {
            column: trimmed.to_string(),
            num,
            range,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanKind {
    Verbatim(Vec<String>),
    Range { base: String, spec: PartitionSpec },
}

fn config_error(message: impl Into<String>, field: &str) -> FanloadError {
    FanloadError::config(message).with_context(ErrorContext::Config {
        field: Some(field.to_string()),
    })
}

/// Trim whitespace and trailing semicolons so the query can be nested.
pub fn strip_statement(sql: &str) -> &str {
    sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}

/// Only single queries can be wrapped in a subquery. Statements the parser
/// does not understand are passed through and left to the backend.
pub fn check_partitionable(sql: &str, dialect: SqlDialect) -> Result<()> {
    let parser_dialect = dialect.parser();
    match Parser::parse_sql(parser_dialect.as_ref(), sql) {
        Ok(statements) => match statements.as_slice() {
            [Statement::Query(_)] => Ok(()),
            [_] => Err(config_error(
                "Only SELECT queries can be partitioned",
                "partition_on",
            )),
            _ => Err(config_error(
                format!(
                    "Expected a single statement to partition, found {}",
                    statements.len()
                ),
                "partition_on",
            )),
        },
        Err(e) => {
            warn!(
                sql = %scrub_sql(sql),
                "Could not parse query before partitioning, passing it through: {}",
                e
            );
            Ok(())
        }
    }
}

fn verbatim(queries: Vec<String>) -> Vec<Partition> {
    queries
        .into_iter()
        .enumerate()
        .map(|(index, sql)| Partition::verbatim(index, sql))
        .collect()
}

/// Split `base` into `num` range-filtered partitions over `[min, max]`.
///
/// Width is `ceil((max - min + 1) / num)`. Bounds are clamped past `max`, so
/// when the range is narrower than `num` the trailing partitions select nothing.
/// A single partition still filters on `[min, max]`; only a read without a
/// range is left unfiltered.
pub fn partition_queries(
    base: &str,
    column: &str,
    num: usize,
    range: (i64, i64),
) -> Result<Vec<Partition>> {
    let spec = PartitionSpec::new(column, num, Some(range))?;
    let (min, max) = range;
    let base = strip_statement(base);

    let span = max as i128 - min as i128 + 1;
    let num = spec.num as i128;
    let width = (span + num - 1) / num;
    // Exclusive bounds stop at max + 1; saturate where that leaves i64.
    let ceiling = (max as i128 + 1).min(i64::MAX as i128);
    let bound = |k: i128| -> i64 { (min as i128 + k * width).min(ceiling) as i64 };

    let column = spec.column.as_str();
    let partitions = (0..spec.num)
        .map(|index| {
            let lower = bound(index as i128);
            let last = index + 1 == spec.num;
            let (upper, op) = if last {
                (max, "<=")
            } else {
                (bound(index as i128 + 1), "<")
            };
            let sql = format!(
                "SELECT * FROM ({base}) AS {alias} WHERE {alias}.{column} >= {lower} AND {alias}.{column} {op} {upper}",
                alias = PARTITION_ALIAS,
            );
            Partition {
                index,
                sql,
                bounds: Some(PartitionBounds {
                    lower,
                    upper,
                    upper_inclusive: last,
                }),
            }
        })
        .collect();
    Ok(partitions)
}

/// MIN/MAX probe over the base query.
pub fn probe_query(base: &str, column: &str) -> String {
    format!(
        "SELECT MIN({alias}.{column}), MAX({alias}.{column}) FROM ({base}) AS {alias}",
        alias = RANGE_ALIAS,
        base = strip_statement(base),
    )
}

/// Single partition used when the partition column has no non-NULL values.
fn empty_range_partition(base: &str, column: &str) -> Partition {
    Partition::verbatim(
        0,
        format!(
            "SELECT * FROM ({base}) AS {alias} WHERE {alias}.{column} IS NOT NULL",
            alias = PARTITION_ALIAS,
            base = strip_statement(base),
        ),
    )
}

fn probe_bound(
    types: &dyn TypeSystem,
    meta: &ColumnMeta,
    value: WireValue,
    column: &str,
    round_up: bool,
) -> Result<Option<i64>> {
    if matches!(value, WireValue::Null) {
        return Ok(None);
    }
    let non_numeric = |found: &str| {
        config_error(
            format!("Partition column '{}' must be numeric, found {}", column, found),
            "partition_on",
        )
    };
    let canonical = match &meta.type_tag {
        TypeTag::Native(native) => types
            .canonical_type(native)
            .ok_or_else(|| non_numeric(native))?,
        TypeTag::Unknown => CanonicalType::Int64,
    };
    let decoded = types
        .decode(value, &meta.type_tag, canonical)
        .map_err(|f| non_numeric(&f.to_string()))?;

    let out_of_range = || {
        config_error(
            format!("Range of partition column '{}' does not fit in int64", column),
            "partition_on",
        )
    };
    match decoded {
        None => Ok(None),
        Some(Value::Int64(v)) => Ok(Some(v)),
        Some(Value::Float64(f)) => {
            let rounded = if round_up { f.ceil() } else { f.floor() };
            if !rounded.is_finite() || rounded < i64::MIN as f64 || rounded >= i64::MAX as f64 {
                return Err(out_of_range());
            }
            Ok(Some(rounded as i64))
        }
        Some(Value::Decimal(d)) => {
            let scale = 10_i128.pow(DECIMAL_SCALE as u32);
            let mut whole = d.div_euclid(scale);
            if round_up && d.rem_euclid(scale) != 0 {
                whole += 1;
            }
            i64::try_from(whole).map(Some).map_err(|_| out_of_range())
        }
        Some(other) => Err(non_numeric(other.canonical_type().name())),
    }
}

/// Plans the partitions of a read, probing the backend for a range if needed.
#[derive(Debug, Clone, Copy)]
pub struct QueryPartitioner {
    dialect: SqlDialect,
    timeout: Duration,
}

impl QueryPartitioner {
    pub fn new(dialect: SqlDialect, timeout: Duration) -> Self {
        Self { dialect, timeout }
    }

    pub async fn plan(
        &self,
        request: &ReadRequest,
        executor: &dyn SqlExecutor,
    ) -> Result<Vec<Partition>> {
        let (base, spec) = match request.validate(self.dialect)? {
            PlanKind::Verbatim(queries) => return Ok(verbatim(queries)),
            PlanKind::Range { base, spec } => (base, spec),
        };

        if spec.num == 1 && spec.range.is_none() {
            return Ok(verbatim(vec![strip_statement(&base).to_string()]));
        }

        let range = match spec.range {
            Some(range) => Some(range),
            None => self.probe_range(&base, &spec.column, executor).await?,
        };

        match range {
            Some(range) => partition_queries(&base, &spec.column, spec.num, range),
            None => {
                info!(
                    column = %spec.column,
                    "Partition column has no non-NULL values; reading a single empty partition"
                );
                Ok(vec![empty_range_partition(&base, &spec.column)])
            }
        }
    }

    /// Run the MIN/MAX probe. `None` when the column has no non-NULL values.
    pub async fn probe_range(
        &self,
        base: &str,
        column: &str,
        executor: &dyn SqlExecutor,
    ) -> Result<Option<(i64, i64)>> {
        let sql = probe_query(base, column);
        debug!(sql = %scrub_sql(&sql), "Probing partition range");

        let cancel = CancellationToken::new();
        let result = match tokio::time::timeout(self.timeout, executor.execute(&sql, cancel.clone()))
            .await
        {
            Ok(result) => result?,
            Err(_) => {
                cancel.cancel();
                return Err(FanloadError::timeout(format!(
                    "Range probe on '{}' exceeded {:?}",
                    column, self.timeout
                )));
            }
        };

        let Some(row) = result.rows.into_iter().next() else {
            return Ok(None);
        };
        let mut cells = row.into_iter();
        let (Some(min), Some(max)) = (cells.next(), cells.next()) else {
            return Err(FanloadError::query(format!(
                "Range probe on '{}' returned fewer than two columns",
                column
            )));
        };
        if result.columns.len() < 2 {
            return Err(FanloadError::query(format!(
                "Range probe on '{}' returned {} column descriptions",
                column,
                result.columns.len()
            )));
        }

        let types = executor.type_system();
        let min = probe_bound(types, &result.columns[0], min, column, false)?;
        let max = probe_bound(types, &result.columns[1], max, column, true)?;
        match (min, max) {
            (Some(min), Some(max)) => {
                debug!(column, min, max, "Probed partition range");
                Ok(Some((min, max)))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanload_error::ErrorCode;
    use proptest::prelude::*;

    #[test]
    fn test_even_split() {
        let parts = partition_queries("SELECT * FROM t", "id", 2, (0, 9)).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts[0].sql,
            "SELECT * FROM (SELECT * FROM t) AS fanload_part WHERE fanload_part.id >= 0 AND fanload_part.id < 5"
        );
        assert_eq!(
            parts[1].sql,
            "SELECT * FROM (SELECT * FROM t) AS fanload_part WHERE fanload_part.id >= 5 AND fanload_part.id <= 9"
        );
    }

    #[test]
    fn test_single_partition_keeps_range_filter() {
        let parts = partition_queries("SELECT * FROM t;", "id", 1, (0, 100)).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(
            parts[0].sql,
            "SELECT * FROM (SELECT * FROM t) AS fanload_part WHERE fanload_part.id >= 0 AND fanload_part.id <= 100"
        );
        let bounds = parts[0].bounds.unwrap();
        assert!(bounds.contains(100));
        assert!(!bounds.contains(101));
    }

    #[test]
    fn test_more_partitions_than_values() {
        let parts = partition_queries("SELECT * FROM t", "id", 4, (0, 1)).unwrap();
        assert_eq!(parts.len(), 4);
        let bounds: Vec<_> = parts.iter().map(|p| p.bounds.unwrap()).collect();
        assert!(bounds[0].contains(0));
        assert!(bounds[1].contains(1));
        assert!(!bounds[2].contains(1));
        assert!(!bounds[3].contains(0) && !bounds[3].contains(1));
    }

    #[test]
    fn test_extreme_range_does_not_overflow() {
        let parts = partition_queries("SELECT * FROM t", "id", 3, (i64::MIN, i64::MAX)).unwrap();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].bounds.unwrap().contains(i64::MIN));
        assert!(parts[2].bounds.unwrap().contains(i64::MAX));
    }

    #[test]
    fn test_invalid_specs_are_configuration_errors() {
        let cases = [
            partition_queries("SELECT 1", "id", 0, (0, 1)),
            partition_queries("SELECT 1", "id", 2, (5, 1)),
            partition_queries("SELECT 1", "  ", 2, (0, 1)),
            partition_queries("SELECT 1", "id; DROP TABLE t", 2, (0, 1)),
        ];
        for case in cases {
            assert_eq!(case.unwrap_err().code, ErrorCode::InvalidConfiguration);
        }
    }

    #[test]
    fn test_request_validation() {
        let dialect = SqlDialect::Generic;
        let err = ReadRequest::queries(Vec::<String>::new())
            .validate(dialect)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidConfiguration);

        let err = ReadRequest::queries(["SELECT 1", "SELECT 2"])
            .partition_on("id", 2)
            .validate(dialect)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidConfiguration);

        let err = ReadRequest::query("SELECT 1")
            .partition_range(0, 10)
            .validate(dialect)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidConfiguration);

        let plan = ReadRequest::queries(["SELECT * FROM t"])
            .partition_on("id", 2)
            .validate(dialect)
            .unwrap();
        assert!(matches!(plan, PlanKind::Range { ref spec, .. } if spec.num == 2));

        let plan = ReadRequest::queries(["SELECT 1", "SELECT 2"])
            .validate(dialect)
            .unwrap();
        assert_eq!(
            plan,
            PlanKind::Verbatim(vec!["SELECT 1".to_string(), "SELECT 2".to_string()])
        );
    }

    #[test]
    fn test_non_query_statement_cannot_be_partitioned() {
        let err = ReadRequest::query("DELETE FROM t")
            .partition_on("id", 2)
            .partition_range(0, 10)
            .validate(SqlDialect::Sqlite)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidConfiguration);

        // Unparseable SQL is left for the backend to reject.
        assert!(check_partitionable("SELEKT nonsense", SqlDialect::Postgres).is_ok());
    }

    #[test]
    fn test_probe_query_shape() {
        assert_eq!(
            probe_query("SELECT * FROM t;", "id"),
            "SELECT MIN(fanload_range.id), MAX(fanload_range.id) FROM (SELECT * FROM t) AS fanload_range"
        );
    }

    proptest! {
        #[test]
        fn prop_partitions_cover_range_exactly_once(
            min in -1_000_i64..1_000,
            span in 0_i64..2_000,
            num in 1_usize..40,
        ) {
            let max = min + span;
            let parts = partition_queries("SELECT * FROM t", "v", num, (min, max)).unwrap();
            prop_assert_eq!(parts.len(), num);
            for value in min..=max {
                let hits = parts
                    .iter()
                    .filter(|p| p.bounds.map(|b| b.contains(value)).unwrap_or(true))
                    .count();
                prop_assert_eq!(hits, 1, "value {} matched {} partitions", value, hits);
            }
        }

        #[test]
        fn prop_partitioning_is_deterministic(
            min in any::<i32>(),
            span in 0_i64..1_000_000,
            num in 1_usize..64,
        ) {
            let range = (min as i64, min as i64 + span);
            let a = partition_queries("SELECT * FROM t", "v", num, range).unwrap();
            let b = partition_queries("SELECT * FROM t", "v", num, range).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
