//! Textual value parsing shared by every type system.

use super::DecodeFailure;
use crate::backend::{CalendarValue, ClockValue};
use crate::types::{CanonicalType, DECIMAL_SCALE};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_DAY: i64 = 86_400 * MICROS_PER_SECOND;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

const TIMESTAMP_TZ_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"];

fn malformed(target: CanonicalType, text: &str) -> DecodeFailure {
    DecodeFailure::Malformed {
        target,
        text: text.to_string(),
    }
}

pub(crate) fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

pub fn parse_bool(text: &str) -> Result<bool, DecodeFailure> {
    match text.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "1" | "y" | "yes" | "on" => Ok(true),
        "f" | "false" | "0" | "n" | "no" | "off" => Ok(false),
        _ => Err(malformed(CanonicalType::Boolean, text)),
    }
}

pub fn parse_i64(text: &str) -> Result<i64, DecodeFailure> {
    text.trim()
        .parse::<i64>()
        .map_err(|_| malformed(CanonicalType::Int64, text))
}

pub fn parse_f64(text: &str) -> Result<f64, DecodeFailure> {
    let trimmed = text.trim();
    // PostgreSQL spells these out; Rust's parser only knows "inf"/"NaN" forms.
    match trimmed {
        "Infinity" => Ok(f64::INFINITY),
        "-Infinity" => Ok(f64::NEG_INFINITY),
        _ => trimmed
            .parse::<f64>()
            .map_err(|_| malformed(CanonicalType::Float64, text)),
    }
}

/// Parse a decimal literal into an unscaled `i128` at [`DECIMAL_SCALE`].
///
/// Accepts an optional sign, a fractional part and an exponent. Digits beyond
/// the scale are rounded half away from zero.
pub fn parse_decimal(text: &str) -> Result<i128, DecodeFailure> {
    let fail = || malformed(CanonicalType::Decimal, text);
    let trimmed = text.trim();
    let (negative, body) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let (mantissa, exponent) = match body.find(['e', 'E']) {
        Some(pos) => {
            let exp = body[pos + 1..].parse::<i32>().map_err(|_| fail())?;
            (&body[..pos], exp)
        }
        None => (body, 0),
    };

    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(fail());
    }
    if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(fail());
    }

    // value = digits * 10^(exponent - frac_len); rescale to DECIMAL_SCALE
    let shift = exponent as i64 - frac_part.len() as i64 + DECIMAL_SCALE as i64;
    let digits = int_part.bytes().chain(frac_part.bytes());
    let overflow = || DecodeFailure::OutOfRange(format!("decimal '{}' exceeds 38 digits", text));

    let mut unscaled: i128 = 0;
    let all_digits: Vec<u8> = digits.map(|b| b - b'0').collect();
    let keep = if shift >= 0 {
        all_digits.len()
    } else {
        all_digits.len().saturating_sub((-shift) as usize)
    };

    for digit in &all_digits[..keep] {
        unscaled = unscaled
            .checked_mul(10)
            .and_then(|v| v.checked_add(*digit as i128))
            .ok_or_else(overflow)?;
    }
    if shift > 0 {
        let factor = 10_i128.checked_pow(shift as u32).ok_or_else(overflow)?;
        unscaled = unscaled.checked_mul(factor).ok_or_else(overflow)?;
    } else if (-shift) as usize <= all_digits.len()
        && keep < all_digits.len()
        && all_digits[keep] >= 5
    {
        unscaled = unscaled.checked_add(1).ok_or_else(overflow)?;
    }

    Ok(if negative { -unscaled } else { unscaled })
}

/// Days since 1970-01-01.
pub fn date_to_days(date: NaiveDate) -> i32 {
    (date - epoch()).num_days() as i32
}

pub fn time_to_micros(time: NaiveTime) -> i64 {
    time.num_seconds_from_midnight() as i64 * MICROS_PER_SECOND
        + (time.nanosecond() / 1_000) as i64
}

pub fn datetime_to_micros(datetime: NaiveDateTime) -> i64 {
    datetime.and_utc().timestamp_micros()
}

pub fn parse_date(text: &str) -> Result<i32, DecodeFailure> {
    let trimmed = text.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(date_to_days(date));
    }
    parse_naive_datetime(trimmed)
        .map(|dt| date_to_days(dt.date()))
        .ok_or_else(|| malformed(CanonicalType::Date, text))
}

pub fn parse_time(text: &str) -> Result<i64, DecodeFailure> {
    let trimmed = text.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
        .map(time_to_micros)
        .map_err(|_| malformed(CanonicalType::Time, text))
}

fn parse_naive_datetime(text: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

pub fn parse_datetime(text: &str) -> Result<i64, DecodeFailure> {
    parse_naive_datetime(text.trim())
        .map(datetime_to_micros)
        .ok_or_else(|| malformed(CanonicalType::DateTime, text))
}

/// Parse an instant. Text without an offset is taken to be UTC.
pub fn parse_timestamp(text: &str) -> Result<i64, DecodeFailure> {
    let trimmed = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.timestamp_micros());
    }
    if let Some(dt) = TIMESTAMP_TZ_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(trimmed, fmt).ok())
    {
        return Ok(dt.timestamp_micros());
    }
    parse_naive_datetime(trimmed)
        .map(datetime_to_micros)
        .ok_or_else(|| malformed(CanonicalType::Timestamp, text))
}

fn calendar_datetime(value: &CalendarValue, target: CanonicalType) -> Result<NaiveDateTime, DecodeFailure> {
    let describe = || {
        format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
            value.year, value.month, value.day, value.hour, value.minute, value.second, value.micros
        )
    };
    NaiveDate::from_ymd_opt(value.year, value.month, value.day)
        .and_then(|d| d.and_hms_micro_opt(value.hour, value.minute, value.second, value.micros))
        .ok_or_else(|| DecodeFailure::Malformed {
            target,
            text: describe(),
        })
}

pub fn calendar_to_days(value: &CalendarValue) -> Result<i32, DecodeFailure> {
    calendar_datetime(value, CanonicalType::Date).map(|dt| date_to_days(dt.date()))
}

pub fn calendar_to_micros(value: &CalendarValue, target: CanonicalType) -> Result<i64, DecodeFailure> {
    calendar_datetime(value, target).map(datetime_to_micros)
}

/// Time of day from a signed duration. Only values inside one day are valid.
pub fn clock_to_micros(value: &ClockValue) -> Result<i64, DecodeFailure> {
    let micros = (value.days as i64 * 24 + value.hours as i64) * 3_600 * MICROS_PER_SECOND
        + value.minutes as i64 * 60 * MICROS_PER_SECOND
        + value.seconds as i64 * MICROS_PER_SECOND
        + value.micros as i64;
    if value.negative || micros >= MICROS_PER_DAY {
        return Err(DecodeFailure::OutOfRange(format!(
            "time value {}{} days {:02}:{:02}:{:02} is outside a single day",
            if value.negative { "-" } else { "" },
            value.days,
            value.hours,
            value.minutes,
            value.seconds
        )));
    }
    Ok(micros)
}
