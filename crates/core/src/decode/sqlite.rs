//! SQLite type mapping.
//!
//! Declared column types are mapped with SQLite's affinity rules (substring
//! matching on the declared name). Expression columns carry no declared type;
//! the connector tags them with the storage class of their first non-NULL
//! value (`INTEGER`, `REAL`, `TEXT`, `BLOB`).

use super::{decode_generic, DecodeFailure, TypeSystem};
use crate::backend::{TypeTag, WireValue};
use crate::types::{CanonicalType, Value};

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteTypes;

impl TypeSystem for SqliteTypes {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn canonical_type(&self, native: &str) -> Option<CanonicalType> {
        let upper = native.to_ascii_uppercase();
        let has = |needle: &str| upper.contains(needle);

        // Order matters: "DATETIME" contains both "DATE" and "TIME", and
        // "BOOLEAN" must win over the generic numeric rule.
        if has("INT") {
            Some(CanonicalType::Int64)
        } else if has("BOOL") {
            Some(CanonicalType::Boolean)
        } else if has("DATETIME") || has("TIMESTAMP") {
            Some(CanonicalType::DateTime)
        } else if has("DATE") {
            Some(CanonicalType::Date)
        } else if has("TIME") {
            Some(CanonicalType::Time)
        } else if has("CHAR") || has("CLOB") || has("TEXT") {
            Some(CanonicalType::Utf8)
        } else if has("BLOB") {
            Some(CanonicalType::Binary)
        } else if has("REAL") || has("FLOA") || has("DOUB") {
            Some(CanonicalType::Float64)
        } else if has("DECIMAL") || has("NUMERIC") {
            Some(CanonicalType::Decimal)
        } else {
            None
        }
    }

    fn decode(
        &self,
        value: WireValue,
        _tag: &TypeTag,
        target: CanonicalType,
    ) -> Result<Option<Value>, DecodeFailure> {
        match (target, value) {
            // SQLite has no boolean storage class; affinity may leave text behind.
            (CanonicalType::Boolean, WireValue::Float(v)) => Ok(Some(Value::Boolean(v != 0.0))),
            (CanonicalType::Utf8, WireValue::Bytes(bytes)) => {
                Ok(Some(Value::Utf8(super::utf8(bytes)?)))
            }
            (target, value) => decode_generic(value, target),
        }
    }
}
