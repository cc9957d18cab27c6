//! Typed, append-only column construction.

use crate::decode::DecodeFailure;
use crate::types::{CanonicalType, ColumnSchema, Value, DECIMAL_PRECISION, DECIMAL_SCALE, UTC};
use arrow::array::{
    Array, ArrayRef, BinaryBuilder, BooleanBuilder, Date32Builder, Decimal128Builder,
    Float64Builder, Int64Builder, StringBuilder, Time64MicrosecondBuilder,
    TimestampMicrosecondBuilder,
};
use arrow::buffer::NullBuffer;
use arrow::datatypes::DataType;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use fanload_common::BinaryEncoding;
use fanload_error::{FanloadError, Result};
use std::sync::Arc;

/// Bytes reserved per row for variable-width columns.
const VARIABLE_WIDTH_HINT: usize = 16;

enum Inner {
    Int64(Int64Builder),
    Float64(Float64Builder),
    Boolean(BooleanBuilder),
    Utf8(StringBuilder),
    Binary(BinaryBuilder),
    Base64(StringBuilder),
    Date(Date32Builder),
    Time(Time64MicrosecondBuilder),
    DateTime(TimestampMicrosecondBuilder),
    Timestamp(TimestampMicrosecondBuilder),
    Decimal(Decimal128Builder),
}

/// Builds one output column. Capacity is reserved up front from the row count.
pub struct ColumnBuilder {
    canonical: CanonicalType,
    nullable: bool,
    len: usize,
    inner: Inner,
}

impl ColumnBuilder {
    pub fn new(column: &ColumnSchema, capacity: usize) -> Self {
        let bytes = capacity * VARIABLE_WIDTH_HINT;
        let inner = match column.canonical {
            CanonicalType::Int64 => Inner::Int64(Int64Builder::with_capacity(capacity)),
            CanonicalType::Float64 => Inner::Float64(Float64Builder::with_capacity(capacity)),
            CanonicalType::Boolean => Inner::Boolean(BooleanBuilder::with_capacity(capacity)),
            CanonicalType::Utf8 => Inner::Utf8(StringBuilder::with_capacity(capacity, bytes)),
            CanonicalType::Binary => match column.encoding {
                BinaryEncoding::Raw => Inner::Binary(BinaryBuilder::with_capacity(capacity, bytes)),
                BinaryEncoding::Base64 => {
                    Inner::Base64(StringBuilder::with_capacity(capacity, bytes))
                }
            },
            CanonicalType::Date => Inner::Date(Date32Builder::with_capacity(capacity)),
            CanonicalType::Time => Inner::Time(Time64MicrosecondBuilder::with_capacity(capacity)),
            CanonicalType::DateTime => {
                Inner::DateTime(TimestampMicrosecondBuilder::with_capacity(capacity))
            }
            CanonicalType::Timestamp => Inner::Timestamp(
                TimestampMicrosecondBuilder::with_capacity(capacity).with_timezone(UTC),
            ),
            CanonicalType::Decimal => Inner::Decimal(
                Decimal128Builder::with_capacity(capacity)
                    .with_data_type(DataType::Decimal128(DECIMAL_PRECISION, DECIMAL_SCALE)),
            ),
        };
        Self {
            canonical: column.canonical,
            nullable: column.nullable,
            len: 0,
            inner,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a decoded cell. `None` appends NULL.
    pub fn append(&mut self, value: Option<Value>) -> std::result::Result<(), DecodeFailure> {
        let Some(value) = value else {
            if !self.nullable {
                return Err(DecodeFailure::UnexpectedNull);
            }
            self.append_null();
            self.len += 1;
            return Ok(());
        };

        match (&mut self.inner, value) {
            (Inner::Int64(b), Value::Int64(v)) => b.append_value(v),
            (Inner::Float64(b), Value::Float64(v)) => b.append_value(v),
            (Inner::Boolean(b), Value::Boolean(v)) => b.append_value(v),
            (Inner::Utf8(b), Value::Utf8(v)) => b.append_value(v),
            (Inner::Binary(b), Value::Binary(v)) => b.append_value(v),
            (Inner::Base64(b), Value::Binary(v)) => b.append_value(STANDARD.encode(v)),
            (Inner::Date(b), Value::Date(v)) => b.append_value(v),
            (Inner::Time(b), Value::Time(v)) => b.append_value(v),
            (Inner::DateTime(b), Value::DateTime(v)) => b.append_value(v),
            (Inner::Timestamp(b), Value::Timestamp(v)) => b.append_value(v),
            (Inner::Decimal(b), Value::Decimal(v)) => b.append_value(v),
            (_, other) => {
                return Err(DecodeFailure::Incompatible {
                    wire: other.canonical_type().name(),
                    target: self.canonical,
                })
            }
        }
        self.len += 1;
        Ok(())
    }

    fn append_null(&mut self) {
        match &mut self.inner {
            Inner::Int64(b) => b.append_null(),
            Inner::Float64(b) => b.append_null(),
            Inner::Boolean(b) => b.append_null(),
            Inner::Utf8(b) | Inner::Base64(b) => b.append_null(),
            Inner::Binary(b) => b.append_null(),
            Inner::Date(b) => b.append_null(),
            Inner::Time(b) => b.append_null(),
            Inner::DateTime(b) | Inner::Timestamp(b) => b.append_null(),
            Inner::Decimal(b) => b.append_null(),
        }
    }

    pub fn finish(self) -> Result<TypedColumn> {
        let array: ArrayRef = match self.inner {
            Inner::Int64(mut b) => Arc::new(b.finish()),
            Inner::Float64(mut b) => Arc::new(b.finish()),
            Inner::Boolean(mut b) => Arc::new(b.finish()),
            Inner::Utf8(mut b) | Inner::Base64(mut b) => Arc::new(b.finish()),
            Inner::Binary(mut b) => Arc::new(b.finish()),
            Inner::Date(mut b) => Arc::new(b.finish()),
            Inner::Time(mut b) => Arc::new(b.finish()),
            Inner::DateTime(mut b) | Inner::Timestamp(mut b) => Arc::new(b.finish()),
            Inner::Decimal(mut b) => Arc::new(b.finish()),
        };
        if array.len() != self.len {
            return Err(FanloadError::internal(format!(
                "column builder produced {} values, expected {}",
                array.len(),
                self.len
            )));
        }
        Ok(TypedColumn::new(array))
    }
}

/// A finished column: values plus validity, backed by an Arrow array.
#[derive(Debug, Clone)]
pub struct TypedColumn {
    array: ArrayRef,
}

impl TypedColumn {
    pub fn new(array: ArrayRef) -> Self {
        Self { array }
    }

    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    pub fn null_count(&self) -> usize {
        self.array.null_count()
    }

    pub fn is_null(&self, index: usize) -> bool {
        self.array.is_null(index)
    }

    /// Validity bitmap; `None` when every value is present.
    pub fn validity(&self) -> Option<&NullBuffer> {
        self.array.nulls()
    }

    pub fn data_type(&self) -> &DataType {
        self.array.data_type()
    }

    pub fn array(&self) -> &ArrayRef {
        &self.array
    }

    pub fn into_array(self) -> ArrayRef {
        self.array
    }
}
