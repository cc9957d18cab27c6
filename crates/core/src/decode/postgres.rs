//! PostgreSQL type mapping.
//!
//! Values arrive either as binary-format payloads (`WireValue::Bytes`, from the
//! extended query protocol) or as text (`WireValue::Text`, from the simple
//! query protocol). Binary payloads are decoded per native type here.

use super::{decode_generic, text, utf8, DecodeFailure, TypeSystem};
use crate::backend::{TypeTag, WireValue};
use crate::types::{CanonicalType, Value, DECIMAL_SCALE};

/// Days between 1970-01-01 and the PostgreSQL epoch, 2000-01-01.
pub const PG_EPOCH_DAYS: i32 = 10_957;
/// Microseconds between 1970-01-01 and 2000-01-01.
pub const PG_EPOCH_MICROS: i64 = 946_684_800_000_000;

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresTypes;

fn fixed<const N: usize>(native: &str, bytes: &[u8]) -> Result<[u8; N], DecodeFailure> {
    bytes.try_into().map_err(|_| DecodeFailure::WireLength {
        native: native.to_string(),
        expected: N,
        actual: bytes.len(),
    })
}

fn read_i16(native: &str, bytes: &[u8], offset: usize) -> Result<i16, DecodeFailure> {
    let slice = bytes
        .get(offset..offset + 2)
        .ok_or_else(|| DecodeFailure::WireLength {
            native: native.to_string(),
            expected: offset + 2,
            actual: bytes.len(),
        })?;
    Ok(i16::from_be_bytes([slice[0], slice[1]]))
}

/// Decode the binary `numeric` format into an unscaled value at `DECIMAL_SCALE`.
///
/// Layout: ndigits, weight, sign, dscale (all i16) followed by `ndigits`
/// base-10000 digits, most significant first. Digits below the scale are
/// rounded half away from zero, matching [`text::parse_decimal`].
pub fn decode_numeric(bytes: &[u8]) -> Result<i128, DecodeFailure> {
    let ndigits = read_i16("numeric", bytes, 0)?;
    let weight = read_i16("numeric", bytes, 2)? as i32;
    let sign = read_i16("numeric", bytes, 4)? as u16;
    let expected = 8 + 2 * ndigits.max(0) as usize;
    if bytes.len() != expected {
        return Err(DecodeFailure::WireLength {
            native: "numeric".to_string(),
            expected,
            actual: bytes.len(),
        });
    }

    match sign {
        NUMERIC_POS | NUMERIC_NEG => {}
        NUMERIC_NAN => return Err(DecodeFailure::OutOfRange("numeric NaN".to_string())),
        NUMERIC_PINF | NUMERIC_NINF => {
            return Err(DecodeFailure::OutOfRange("numeric infinity".to_string()))
        }
        other => {
            return Err(DecodeFailure::OutOfRange(format!(
                "unknown numeric sign 0x{:04X}",
                other
            )))
        }
    }

    let overflow = || DecodeFailure::OutOfRange("numeric exceeds 38 digits".to_string());
    let mut unscaled: i128 = 0;
    let mut round_up = false;
    for i in 0..ndigits as i32 {
        let digit = read_i16("numeric", bytes, 8 + 2 * i as usize)? as i128;
        // digit * 10000^(weight - i), expressed in units of 10^-DECIMAL_SCALE
        let exponent = 4 * (weight - i) + DECIMAL_SCALE as i32;
        let contribution = if exponent >= 0 {
            10_i128
                .checked_pow(exponent as u32)
                .and_then(|f| digit.checked_mul(f))
                .ok_or_else(overflow)?
        } else if exponent > -4 {
            // The first dropped decimal digit always lives in this group.
            let divisor = 10_i128.pow((-exponent) as u32);
            round_up = (digit % divisor) / (divisor / 10) >= 5;
            digit / divisor
        } else {
            0
        };
        unscaled = unscaled.checked_add(contribution).ok_or_else(overflow)?;
    }
    if round_up {
        unscaled = unscaled.checked_add(1).ok_or_else(overflow)?;
    }

    Ok(if sign == NUMERIC_NEG { -unscaled } else { unscaled })
}

fn decode_binary(
    native: &str,
    bytes: Vec<u8>,
    target: CanonicalType,
) -> Result<Option<Value>, DecodeFailure> {
    let value = match (native, target) {
        ("bool", CanonicalType::Boolean) => Value::Boolean(fixed::<1>(native, &bytes)?[0] != 0),
        ("int2", CanonicalType::Int64) => {
            Value::Int64(i16::from_be_bytes(fixed(native, &bytes)?) as i64)
        }
        ("int4", CanonicalType::Int64) => {
            Value::Int64(i32::from_be_bytes(fixed(native, &bytes)?) as i64)
        }
        ("oid", CanonicalType::Int64) => {
            Value::Int64(u32::from_be_bytes(fixed(native, &bytes)?) as i64)
        }
        ("int8", CanonicalType::Int64) => Value::Int64(i64::from_be_bytes(fixed(native, &bytes)?)),
        ("float4", CanonicalType::Float64) => {
            Value::Float64(f32::from_be_bytes(fixed(native, &bytes)?) as f64)
        }
        ("float8", CanonicalType::Float64) => {
            Value::Float64(f64::from_be_bytes(fixed(native, &bytes)?))
        }
        ("numeric", CanonicalType::Decimal) => Value::Decimal(decode_numeric(&bytes)?),
        ("jsonb", CanonicalType::Utf8) => match bytes.split_first() {
            Some((1, rest)) => Value::Utf8(utf8(rest.to_vec())?),
            Some((version, _)) => {
                return Err(DecodeFailure::OutOfRange(format!(
                    "unsupported jsonb version {}",
                    version
                )))
            }
            None => {
                return Err(DecodeFailure::WireLength {
                    native: native.to_string(),
                    expected: 1,
                    actual: 0,
                })
            }
        },
        ("uuid", CanonicalType::Utf8) => {
            let uuid = uuid::Uuid::from_bytes(fixed::<16>(native, &bytes)?);
            Value::Utf8(uuid.hyphenated().to_string())
        }
        ("date", CanonicalType::Date) => {
            let days = i32::from_be_bytes(fixed(native, &bytes)?);
            if days == i32::MAX || days == i32::MIN {
                return Err(DecodeFailure::OutOfRange("date infinity".to_string()));
            }
            Value::Date(
                days.checked_add(PG_EPOCH_DAYS)
                    .ok_or_else(|| DecodeFailure::OutOfRange(format!("date {} days", days)))?,
            )
        }
        ("time", CanonicalType::Time) => Value::Time(i64::from_be_bytes(fixed(native, &bytes)?)),
        ("timestamp", CanonicalType::DateTime) | ("timestamptz", CanonicalType::Timestamp) => {
            let micros = i64::from_be_bytes(fixed(native, &bytes)?);
            if micros == i64::MAX || micros == i64::MIN {
                return Err(DecodeFailure::OutOfRange(format!("{} infinity", native)));
            }
            let shifted = micros.checked_add(PG_EPOCH_MICROS).ok_or_else(|| {
                DecodeFailure::OutOfRange(format!("{} {} out of range", native, micros))
            })?;
            match target {
                CanonicalType::DateTime => Value::DateTime(shifted),
                _ => Value::Timestamp(shifted),
            }
        }
        ("bytea", CanonicalType::Binary) => Value::Binary(bytes),
        // text, varchar, bpchar, name, char, json: raw UTF-8 in binary format
        (_, CanonicalType::Utf8) => Value::Utf8(utf8(bytes)?),
        _ => {
            return Err(DecodeFailure::Incompatible {
                wire: "bytes",
                target,
            })
        }
    };
    Ok(Some(value))
}

fn decode_text(
    native: &str,
    bytes: Vec<u8>,
    target: CanonicalType,
) -> Result<Option<Value>, DecodeFailure> {
    match (native, target) {
        ("bytea", CanonicalType::Binary) => {
            let text = utf8(bytes)?;
            let hex_digits = text.strip_prefix("\\x").ok_or_else(|| DecodeFailure::Malformed {
                target,
                text: text.clone(),
            })?;
            hex::decode(hex_digits)
                .map(|b| Some(Value::Binary(b)))
                .map_err(|_| DecodeFailure::Malformed { target, text })
        }
        ("timestamptz", CanonicalType::Timestamp) => {
            Ok(Some(Value::Timestamp(text::parse_timestamp(&utf8(bytes)?)?)))
        }
        _ => decode_generic(WireValue::Text(bytes), target),
    }
}

impl TypeSystem for PostgresTypes {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    fn canonical_type(&self, native: &str) -> Option<CanonicalType> {
        let canonical = match native {
            "bool" => CanonicalType::Boolean,
            "int2" | "int4" | "int8" | "oid" => CanonicalType::Int64,
            "float4" | "float8" => CanonicalType::Float64,
            "numeric" => CanonicalType::Decimal,
            "text" | "varchar" | "bpchar" | "name" | "char" | "json" | "jsonb" | "uuid" => {
                CanonicalType::Utf8
            }
            "bytea" => CanonicalType::Binary,
            "date" => CanonicalType::Date,
            "time" => CanonicalType::Time,
            "timestamp" => CanonicalType::DateTime,
            "timestamptz" => CanonicalType::Timestamp,
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
        let native = tag.as_native().unwrap_or_default();
        match value {
            WireValue::Null => Ok(None),
            WireValue::Bytes(bytes) => decode_binary(native, bytes, target),
            WireValue::Text(bytes) => decode_text(native, bytes, target),
            other => decode_generic(other, target),
        }
    }
}
