//! MySQL type mapping.
//!
//! The connector reports column types by their SQL name with an ` UNSIGNED`
//! suffix where the column flag is set. Text-protocol values arrive as
//! `WireValue::Text`; the binary protocol delivers integers, floats and
//! broken-down temporal values directly.

use super::{decode_generic, DecodeFailure, TypeSystem};
use crate::backend::{TypeTag, WireValue};
use crate::types::{CanonicalType, Value};

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlTypes;

/// `BIT(n)` arrives as up to eight big-endian bytes.
fn decode_bit(bytes: &[u8]) -> Result<i64, DecodeFailure> {
    if bytes.len() > 8 {
        return Err(DecodeFailure::WireLength {
            native: "BIT".to_string(),
            expected: 8,
            actual: bytes.len(),
        });
    }
    let value = bytes.iter().fold(0_u64, |acc, b| (acc << 8) | *b as u64);
    i64::try_from(value)
        .map_err(|_| DecodeFailure::OutOfRange(format!("BIT value {} does not fit in int64", value)))
}

impl TypeSystem for MySqlTypes {
    fn backend(&self) -> &'static str {
        "mysql"
    }

    fn canonical_type(&self, native: &str) -> Option<CanonicalType> {
        let base = native.strip_suffix(" UNSIGNED").unwrap_or(native);
        let canonical = match base {
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" | "BIT" => {
                CanonicalType::Int64
            }
            "FLOAT" | "DOUBLE" => CanonicalType::Float64,
            "DECIMAL" => CanonicalType::Decimal,
            "CHAR" | "VARCHAR" | "TEXT" | "ENUM" | "SET" | "JSON" => CanonicalType::Utf8,
            "BINARY" | "VARBINARY" | "BLOB" => CanonicalType::Binary,
            "DATE" => CanonicalType::Date,
            "TIME" => CanonicalType::Time,
            "DATETIME" => CanonicalType::DateTime,
            // Session time zone is assumed to be UTC.
            "TIMESTAMP" => CanonicalType::Timestamp,
            _ => return None,
        };
        Some(canonical)
    }

    fn decode(
        &self,
        value: WireValue,
        tag: &TypeTag,
        target: CanonicalType,
    ) -> Result<Option<Value>, DecodeFailure> {
        match (tag.as_native(), value) {
            (Some("BIT"), WireValue::Bytes(bytes) | WireValue::Text(bytes)) => {
                Ok(Some(Value::Int64(decode_bit(&bytes)?)))
            }
            (_, value) => decode_generic(value, target),
        }
    }
}
