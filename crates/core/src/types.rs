//! Canonical column types and the values decoders produce for them.

use arrow::datatypes::{DataType, Field, TimeUnit};
use fanload_common::BinaryEncoding;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Precision of every `Decimal` column.
pub const DECIMAL_PRECISION: u8 = 38;
/// Scale of every `Decimal` column. Values with more fractional digits are rounded.
pub const DECIMAL_SCALE: i8 = 10;

/// Time zone attached to `Timestamp` columns.
pub const UTC: &str = "UTC";

/// Backend-independent column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalType {
    Int64,
    Float64,
    Boolean,
    Utf8,
    Binary,
    /// Calendar date, days since 1970-01-01
    Date,
    /// Time of day, microseconds since midnight
    Time,
    /// Date and time without time zone, microseconds since the epoch
    DateTime,
    /// Instant in UTC, microseconds since the epoch
    Timestamp,
    /// Fixed point with [`DECIMAL_SCALE`] fractional digits
    Decimal,
}

impl CanonicalType {
    pub fn name(&self) -> &'static str {
        match self {
            CanonicalType::Int64 => "int64",
            CanonicalType::Float64 => "float64",
            CanonicalType::Boolean => "boolean",
            CanonicalType::Utf8 => "utf8",
            CanonicalType::Binary => "binary",
            CanonicalType::Date => "date",
            CanonicalType::Time => "time",
            CanonicalType::DateTime => "datetime",
            CanonicalType::Timestamp => "timestamp",
            CanonicalType::Decimal => "decimal",
        }
    }

    /// Arrow type of the output column. Binary columns become strings when
    /// base64 encoding is selected.
    pub fn arrow_type(&self, encoding: BinaryEncoding) -> DataType {
        match self {
            CanonicalType::Int64 => DataType::Int64,
            CanonicalType::Float64 => DataType::Float64,
            CanonicalType::Boolean => DataType::Boolean,
            CanonicalType::Utf8 => DataType::Utf8,
            CanonicalType::Binary => match encoding {
                BinaryEncoding::Raw => DataType::Binary,
                BinaryEncoding::Base64 => DataType::Utf8,
            },
            CanonicalType::Date => DataType::Date32,
            CanonicalType::Time => DataType::Time64(TimeUnit::Microsecond),
            CanonicalType::DateTime => DataType::Timestamp(TimeUnit::Microsecond, None),
            CanonicalType::Timestamp => {
                DataType::Timestamp(TimeUnit::Microsecond, Some(UTC.into()))
            }
            CanonicalType::Decimal => DataType::Decimal128(DECIMAL_PRECISION, DECIMAL_SCALE),
        }
    }
}

impl fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded, non-null cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int64(i64),
    Float64(f64),
    Boolean(bool),
    Utf8(String),
    Binary(Vec<u8>),
    Date(i32),
    Time(i64),
    DateTime(i64),
    Timestamp(i64),
    /// Unscaled value; the real number is `v / 10^DECIMAL_SCALE`
    Decimal(i128),
}

impl Value {
    pub fn canonical_type(&self) -> CanonicalType {
        match self {
            Value::Int64(_) => CanonicalType::Int64,
            Value::Float64(_) => CanonicalType::Float64,
            Value::Boolean(_) => CanonicalType::Boolean,
            Value::Utf8(_) => CanonicalType::Utf8,
            Value::Binary(_) => CanonicalType::Binary,
            Value::Date(_) => CanonicalType::Date,
            Value::Time(_) => CanonicalType::Time,
            Value::DateTime(_) => CanonicalType::DateTime,
            Value::Timestamp(_) => CanonicalType::Timestamp,
            Value::Decimal(_) => CanonicalType::Decimal,
        }
    }
}

/// Resolved schema entry for one output column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSchema {
    pub name: String,
    pub canonical: CanonicalType,
    pub nullable: bool,
    /// Only meaningful for `Binary` columns.
    #[serde(skip)]
    pub encoding: BinaryEncoding,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, canonical: CanonicalType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            canonical,
            nullable,
            encoding: BinaryEncoding::Raw,
        }
    }

    pub fn with_encoding(mut self, encoding: BinaryEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn arrow_type(&self) -> DataType {
        self.canonical.arrow_type(self.encoding)
    }

    pub fn field(&self) -> Field {
        Field::new(&self.name, self.arrow_type(), self.nullable)
    }
}
