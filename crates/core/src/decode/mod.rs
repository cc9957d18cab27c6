//! Mapping from backend wire values to canonical values.
//!
//! Each backend owns a [`TypeSystem`] that maps its native type names onto
//! [`CanonicalType`] and decodes individual cells. Decoding runs after every
//! partition has finished executing, against the reconciled metadata, so all
//! partitions of a read share one resolved schema.

pub mod mysql;
pub mod postgres;
pub mod sqlite;
pub mod text;

use crate::assemble::PartitionResult;
use crate::backend::{ColumnMeta, TypeTag, WireValue};
use crate::column::ColumnBuilder;
use crate::dispatch::RawPartition;
use crate::types::{CanonicalType, ColumnSchema, Value, DECIMAL_SCALE};
use fanload_common::BinaryEncoding;
use fanload_error::{ErrorCode, ErrorContext, FanloadError, Result};
use thiserror::Error;

pub use mysql::MySqlTypes;
pub use postgres::PostgresTypes;
pub use sqlite::SqliteTypes;

/// Why a single cell could not be decoded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeFailure {
    #[error("invalid UTF-8 sequence after {valid_up_to} bytes")]
    InvalidUtf8 { valid_up_to: usize },

    #[error("cannot convert a {wire} value to {target}")]
    Incompatible {
        wire: &'static str,
        target: CanonicalType,
    },

    #[error("malformed {target} value '{text}'")]
    Malformed { target: CanonicalType, text: String },

    #[error("expected {expected} bytes for {native}, got {actual}")]
    WireLength {
        native: String,
        expected: usize,
        actual: usize,
    },

    #[error("{0}")]
    OutOfRange(String),

    #[error("NULL in a column reported as NOT NULL")]
    UnexpectedNull,
}

/// Type mapping and cell decoding for one backend.
pub trait TypeSystem: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Canonical type for a native type name, or `None` if it cannot be represented.
    fn canonical_type(&self, native: &str) -> Option<CanonicalType>;

    /// Decode one cell. `Ok(None)` is SQL NULL.
    fn decode(
        &self,
        value: WireValue,
        tag: &TypeTag,
        target: CanonicalType,
    ) -> std::result::Result<Option<Value>, DecodeFailure>;
}

pub(crate) fn utf8(bytes: Vec<u8>) -> std::result::Result<String, DecodeFailure> {
    String::from_utf8(bytes).map_err(|e| DecodeFailure::InvalidUtf8 {
        valid_up_to: e.utf8_error().valid_up_to(),
    })
}

fn scale_factor() -> i128 {
    10_i128.pow(DECIMAL_SCALE as u32)
}

fn out_of_range(value: impl std::fmt::Display, target: CanonicalType) -> DecodeFailure {
    DecodeFailure::OutOfRange(format!("{} does not fit in {}", value, target))
}

/// Conversions that are the same for every backend.
///
/// Type systems handle their protocol specific encodings first and fall back
/// to this for plain integers, floats, text and broken-down temporal values.
pub fn decode_generic(
    value: WireValue,
    target: CanonicalType,
) -> std::result::Result<Option<Value>, DecodeFailure> {
    let incompatible = |wire: &WireValue| DecodeFailure::Incompatible {
        wire: wire.kind(),
        target,
    };

    let decoded = match (target, value) {
        (_, WireValue::Null) => return Ok(None),

        (CanonicalType::Int64, WireValue::Int(v)) => Value::Int64(v),
        (CanonicalType::Int64, WireValue::UInt(v)) => {
            Value::Int64(i64::try_from(v).map_err(|_| out_of_range(v, target))?)
        }
        (CanonicalType::Int64, WireValue::Float(v)) => {
            if v.fract() != 0.0 || v < i64::MIN as f64 || v >= i64::MAX as f64 {
                return Err(out_of_range(v, target));
            }
            Value::Int64(v as i64)
        }
        (CanonicalType::Int64, WireValue::Text(bytes)) => {
            Value::Int64(text::parse_i64(&utf8(bytes)?)?)
        }

        (CanonicalType::Float64, WireValue::Int(v)) => Value::Float64(v as f64),
        (CanonicalType::Float64, WireValue::UInt(v)) => Value::Float64(v as f64),
        (CanonicalType::Float64, WireValue::Float(v)) => Value::Float64(v),
        (CanonicalType::Float64, WireValue::Text(bytes)) => {
            Value::Float64(text::parse_f64(&utf8(bytes)?)?)
        }

        (CanonicalType::Boolean, WireValue::Int(v)) => Value::Boolean(v != 0),
        (CanonicalType::Boolean, WireValue::UInt(v)) => Value::Boolean(v != 0),
        (CanonicalType::Boolean, WireValue::Text(bytes)) => {
            Value::Boolean(text::parse_bool(&utf8(bytes)?)?)
        }

        (CanonicalType::Utf8, WireValue::Text(bytes) | WireValue::Bytes(bytes)) => {
            Value::Utf8(utf8(bytes)?)
        }
        (CanonicalType::Utf8, WireValue::Int(v)) => Value::Utf8(v.to_string()),
        (CanonicalType::Utf8, WireValue::UInt(v)) => Value::Utf8(v.to_string()),
        (CanonicalType::Utf8, WireValue::Float(v)) => Value::Utf8(v.to_string()),

        (CanonicalType::Binary, WireValue::Bytes(bytes) | WireValue::Text(bytes)) => {
            Value::Binary(bytes)
        }

        (CanonicalType::Date, WireValue::Text(bytes)) => {
            Value::Date(text::parse_date(&utf8(bytes)?)?)
        }
        (CanonicalType::Date, WireValue::Calendar(c)) => Value::Date(text::calendar_to_days(&c)?),

        (CanonicalType::Time, WireValue::Text(bytes)) => {
            Value::Time(text::parse_time(&utf8(bytes)?)?)
        }
        (CanonicalType::Time, WireValue::Clock(c)) => Value::Time(text::clock_to_micros(&c)?),

        (CanonicalType::DateTime, WireValue::Text(bytes)) => {
            Value::DateTime(text::parse_datetime(&utf8(bytes)?)?)
        }
        (CanonicalType::DateTime, WireValue::Calendar(c)) => {
            Value::DateTime(text::calendar_to_micros(&c, target)?)
        }
        (CanonicalType::Timestamp, WireValue::Text(bytes)) => {
            Value::Timestamp(text::parse_timestamp(&utf8(bytes)?)?)
        }
        (CanonicalType::Timestamp, WireValue::Calendar(c)) => {
            Value::Timestamp(text::calendar_to_micros(&c, target)?)
        }
        // Integers in temporal columns are Unix seconds.
        (CanonicalType::DateTime, WireValue::Int(secs)) => Value::DateTime(
            secs.checked_mul(1_000_000)
                .ok_or_else(|| out_of_range(secs, target))?,
        ),
        (CanonicalType::Timestamp, WireValue::Int(secs)) => Value::Timestamp(
            secs.checked_mul(1_000_000)
                .ok_or_else(|| out_of_range(secs, target))?,
        ),

        (CanonicalType::Decimal, WireValue::Int(v)) => Value::Decimal(
            (v as i128)
                .checked_mul(scale_factor())
                .ok_or_else(|| out_of_range(v, target))?,
        ),
        (CanonicalType::Decimal, WireValue::UInt(v)) => Value::Decimal(
            (v as i128)
                .checked_mul(scale_factor())
                .ok_or_else(|| out_of_range(v, target))?,
        ),
        (CanonicalType::Decimal, WireValue::Float(v)) => {
            let scaled = (v * scale_factor() as f64).round();
            if !scaled.is_finite() || scaled.abs() >= 1e38 {
                return Err(out_of_range(v, target));
            }
            Value::Decimal(scaled as i128)
        }
        (CanonicalType::Decimal, WireValue::Text(bytes)) => {
            Value::Decimal(text::parse_decimal(&utf8(bytes)?)?)
        }

        (_, other) => return Err(incompatible(&other)),
    };
    Ok(Some(decoded))
}

/// Resolve the output schema from reconciled metadata.
///
/// Columns whose type stayed undetermined across every partition contain only
/// NULLs and resolve to nullable `Utf8`.
pub fn resolve_schema(
    columns: &[ColumnMeta],
    types: &dyn TypeSystem,
    encoding: BinaryEncoding,
) -> Result<Vec<ColumnSchema>> {
    columns
        .iter()
        .map(|column| {
            let (canonical, nullable) = match &column.type_tag {
                TypeTag::Unknown => (CanonicalType::Utf8, true),
                TypeTag::Native(native) => {
                    let canonical = types.canonical_type(native).ok_or_else(|| {
                        FanloadError::new(
                            ErrorCode::UnsupportedType,
                            format!(
                                "Column '{}' has {} type '{}' which has no canonical mapping",
                                column.name,
                                types.backend(),
                                native
                            ),
                        )
                        .with_context(ErrorContext::UnsupportedType {
                            column: column.name.clone(),
                            native_type: native.clone(),
                            backend: types.backend().to_string(),
                        })
                        .with_hint("Cast the column to a supported type in the query")
                    })?;
                    (canonical, column.nullable)
                }
            };
            Ok(ColumnSchema::new(&column.name, canonical, nullable).with_encoding(encoding))
        })
        .collect()
}

fn decode_error(
    failure: DecodeFailure,
    column: &ColumnMeta,
    partition: usize,
    row: usize,
) -> FanloadError {
    FanloadError::new(
        ErrorCode::DecodeFailed,
        format!(
            "Failed to decode column '{}' ({}) at row {} of partition {}: {}",
            column.name, column.type_tag, row, partition, failure
        ),
    )
    .with_context(ErrorContext::Decode {
        column: column.name.clone(),
        partition,
        row,
        native_type: column.type_tag.to_string(),
    })
}

/// Decode one partition's rows into typed columns.
pub fn decode_partition(
    raw: RawPartition,
    meta: &[ColumnMeta],
    schema: &[ColumnSchema],
    types: &dyn TypeSystem,
) -> Result<PartitionResult> {
    let RawPartition { index, result, .. } = raw;
    let row_count = result.rows.len();
    let mut builders: Vec<ColumnBuilder> = schema
        .iter()
        .map(|column| ColumnBuilder::new(column, row_count))
        .collect();

    for (row_idx, row) in result.rows.into_iter().enumerate() {
        if row.len() != builders.len() {
            return Err(FanloadError::internal(format!(
                "Partition {} row {} has {} values, expected {}",
                index,
                row_idx,
                row.len(),
                builders.len()
            )));
        }
        for (col_idx, value) in row.into_iter().enumerate() {
            let column = &meta[col_idx];
            let decoded = types
                .decode(value, &column.type_tag, schema[col_idx].canonical)
                .map_err(|f| decode_error(f, column, index, row_idx))?;
            builders[col_idx]
                .append(decoded)
                .map_err(|f| decode_error(f, column, index, row_idx))?;
        }
    }

    let columns = builders
        .into_iter()
        .map(ColumnBuilder::finish)
        .collect::<Result<Vec<_>>>()?;
    PartitionResult::new(index, schema.to_vec(), columns, row_count)
}
