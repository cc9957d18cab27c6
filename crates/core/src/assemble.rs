//! Merging partition results into the final columnar frame.

use crate::column::TypedColumn;
use crate::types::ColumnSchema;
use arrow::array::{Array, ArrayRef};
use arrow::datatypes::{Schema, SchemaRef};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use fanload_error::{find_closest_match, ErrorCode, ErrorContext, FanloadError, Result};
use std::sync::Arc;
use tracing::debug;

/// Decoded output of one partition.
#[derive(Debug, Clone)]
pub struct PartitionResult {
    pub index: usize,
    pub schema: Vec<ColumnSchema>,
    pub columns: Vec<TypedColumn>,
    pub row_count: usize,
}

impl PartitionResult {
    pub fn new(
        index: usize,
        schema: Vec<ColumnSchema>,
        columns: Vec<TypedColumn>,
        row_count: usize,
    ) -> Result<Self> {
        if schema.len() != columns.len() {
            return Err(FanloadError::internal(format!(
                "partition {} has {} schema entries but {} columns",
                index,
                schema.len(),
                columns.len()
            )));
        }
        for (column, values) in schema.iter().zip(&columns) {
            if values.len() != row_count {
                return Err(FanloadError::internal(format!(
                    "partition {} column '{}' has {} values, expected {}",
                    index,
                    column.name,
                    values.len(),
                    row_count
                )));
            }
        }
        Ok(Self {
            index,
            schema,
            columns,
            row_count,
        })
    }
}

/// The result of a read: one schema, one typed column per schema entry.
#[derive(Debug, Clone)]
pub struct DataFrameResult {
    schema: Vec<ColumnSchema>,
    columns: Vec<TypedColumn>,
    row_count: usize,
}

impl DataFrameResult {
    pub fn schema(&self) -> &[ColumnSchema] {
        &self.schema
    }

    pub fn columns(&self) -> &[TypedColumn] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.schema.iter().map(|c| c.name.clone()).collect()
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Result<&TypedColumn> {
        match self.schema.iter().position(|c| c.name == name) {
            Some(pos) => Ok(&self.columns[pos]),
            None => {
                let available = self.column_names();
                let mut err = FanloadError::new(
                    ErrorCode::ColumnNotFound,
                    format!("Column '{}' not found in result", name),
                )
                .with_context(ErrorContext::ColumnNotFound {
                    column: name.to_string(),
                    available_columns: available.clone(),
                });
                if let Some(suggestion) = find_closest_match(name, &available) {
                    err = err.with_hint(format!("Did you mean '{}'?", suggestion));
                }
                Err(err)
            }
        }
    }

    pub fn arrow_schema(&self) -> SchemaRef {
        Arc::new(Schema::new(
            self.schema.iter().map(ColumnSchema::field).collect::<Vec<_>>(),
        ))
    }

    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let arrays: Vec<ArrayRef> = self.columns.iter().map(|c| c.array().clone()).collect();
        let options = RecordBatchOptions::new().with_row_count(Some(self.row_count));
        Ok(RecordBatch::try_new_with_options(
            self.arrow_schema(),
            arrays,
            &options,
        )?)
    }
}

/// Validates partition schemas and concatenates their columns in partition order.
#[derive(Debug, Clone, Copy)]
pub struct ResultAssembler {
    expected_partitions: usize,
}

fn describe_mismatches(expected: &[ColumnSchema], actual: &[ColumnSchema]) -> Vec<String> {
    let mut mismatches = Vec::new();
    if expected.len() != actual.len() {
        mismatches.push(format!(
            "expected {} columns, found {}",
            expected.len(),
            actual.len()
        ));
    }
    for (pos, (e, a)) in expected.iter().zip(actual).enumerate() {
        if e.name != a.name {
            mismatches.push(format!("column {}: name '{}' vs '{}'", pos, e.name, a.name));
        }
        if e.canonical != a.canonical {
            mismatches.push(format!(
                "column '{}': type {} vs {}",
                e.name, e.canonical, a.canonical
            ));
        }
        if e.nullable != a.nullable {
            mismatches.push(format!(
                "column '{}': nullable {} vs {}",
                e.name, e.nullable, a.nullable
            ));
        }
        if e.encoding != a.encoding {
            mismatches.push(format!(
                "column '{}': binary encoding {:?} vs {:?}",
                e.name, e.encoding, a.encoding
            ));
        }
    }
    mismatches
}

fn names(schema: &[ColumnSchema]) -> Vec<String> {
    schema.iter().map(|c| c.name.clone()).collect()
}

impl ResultAssembler {
    pub fn new(expected_partitions: usize) -> Self {
        Self {
            expected_partitions,
        }
    }

    pub fn assemble(&self, mut results: Vec<PartitionResult>) -> Result<DataFrameResult> {
        results.sort_by_key(|r| r.index);

        if results.len() != self.expected_partitions {
            return Err(FanloadError::internal(format!(
                "expected {} partition results, received {}",
                self.expected_partitions,
                results.len()
            )));
        }
        for (pos, result) in results.iter().enumerate() {
            if result.index != pos {
                return Err(FanloadError::internal(format!(
                    "partition indices are not contiguous: expected {}, found {}",
                    pos, result.index
                )));
            }
        }

        let Some(first) = results.first() else {
            return Err(FanloadError::internal("no partition results to assemble"));
        };
        let schema = first.schema.clone();

        for result in &results[1..] {
            if result.schema != schema {
                return Err(FanloadError::new(
                    ErrorCode::SchemaMismatch,
                    format!(
                        "Partition {} schema differs from partition 0",
                        result.index
                    ),
                )
                .with_context(ErrorContext::SchemaMismatch {
                    partition: result.index,
                    expected_columns: names(&schema),
                    actual_columns: names(&result.schema),
                    mismatches: describe_mismatches(&schema, &result.schema),
                }));
            }
        }

        let row_count: usize = results.iter().map(|r| r.row_count).sum();
        let columns = if results.len() == 1 {
            results.pop().map(|r| r.columns).unwrap_or_default()
        } else {
            (0..schema.len())
                .map(|col| -> Result<TypedColumn> {
                    let parts: Vec<&dyn Array> = results
                        .iter()
                        .map(|r| r.columns[col].array().as_ref())
                        .collect();
                    let merged = arrow::compute::concat(&parts)?;
                    Ok(TypedColumn::new(merged))
                })
                .collect::<Result<Vec<_>>>()?
        };

        for (column, values) in schema.iter().zip(&columns) {
            if values.len() != row_count {
                return Err(FanloadError::internal(format!(
                    "column '{}' has {} values after assembly, expected {}",
                    column.name,
                    values.len(),
                    row_count
                )));
            }
        }

        debug!(
            partitions = self.expected_partitions,
            rows = row_count,
            columns = schema.len(),
            "assembled partition results"
        );

        Ok(DataFrameResult {
            schema,
            columns,
            row_count,
        })
    }
}
