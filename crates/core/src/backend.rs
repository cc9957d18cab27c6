//! Backend execution interface.
//!
//! A backend executes one SQL statement per call on its own session and hands
//! back column metadata plus rows of wire values. It never decodes into the
//! canonical model; that happens once for all partitions after metadata has
//! been reconciled.

use crate::decode::TypeSystem;
use async_trait::async_trait;
use fanload_error::Result;
use serde::Deserialize;
use sqlparser::dialect::{Dialect, GenericDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use std::fmt;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    Postgres,
    MySql,
    Sqlite,
    Generic,
}

impl SqlDialect {
    /// Parser dialect used to classify statements before partitioning.
    pub fn parser(&self) -> Box<dyn Dialect> {
        match self {
            SqlDialect::Postgres => Box::new(PostgreSqlDialect {}),
            SqlDialect::MySql => Box::new(MySqlDialect {}),
            SqlDialect::Sqlite => Box::new(SQLiteDialect {}),
            SqlDialect::Generic => Box::new(GenericDialect {}),
        }
    }
}

/// Native type reported by the backend for a result column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Native(String),
    /// The backend could not determine a type, e.g. an expression column in
    /// SQLite over an empty or all-NULL result.
    Unknown,
}

impl TypeTag {
    pub fn native(name: impl Into<String>) -> Self {
        TypeTag::Native(name.into())
    }

    pub fn as_native(&self) -> Option<&str> {
        match self {
            TypeTag::Native(name) => Some(name),
            TypeTag::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, TypeTag::Unknown)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Native(name) => f.write_str(name),
            TypeTag::Unknown => f.write_str("unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    pub type_tag: TypeTag,
    pub nullable: bool,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, type_tag: TypeTag, nullable: bool) -> Self {
        Self {
            name: name.into(),
            type_tag,
            nullable,
        }
    }
}

/// Broken-down calendar value as sent by protocols that do not use strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CalendarValue {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub micros: u32,
}

/// Signed duration as sent by the MySQL binary protocol for `TIME` columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockValue {
    pub negative: bool,
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
    pub micros: u32,
}

/// A single cell exactly as the backend delivered it.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    /// Textual bytes; not yet validated as UTF-8
    Text(Vec<u8>),
    /// Opaque bytes; binary protocol payloads or blobs
    Bytes(Vec<u8>),
    Calendar(CalendarValue),
    Clock(ClockValue),
}

impl WireValue {
    pub fn kind(&self) -> &'static str {
        match self {
            WireValue::Null => "null",
            WireValue::Int(_) => "integer",
            WireValue::UInt(_) => "unsigned integer",
            WireValue::Float(_) => "float",
            WireValue::Text(_) => "text",
            WireValue::Bytes(_) => "bytes",
            WireValue::Calendar(_) => "calendar",
            WireValue::Clock(_) => "clock",
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        WireValue::Text(value.into().into_bytes())
    }
}

/// Everything one statement produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResultSet {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<WireValue>>,
}

impl RawResultSet {
    pub fn new(columns: Vec<ColumnMeta>, rows: Vec<Vec<WireValue>>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Executes SQL against one backend.
///
/// Every call to [`SqlExecutor::execute`] opens its own session, so calls may
/// run concurrently. Implementations must stop and return a `Cancelled` error
/// promptly once `cancel` fires.
#[async_trait]
pub trait SqlExecutor: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn dialect(&self) -> SqlDialect;

    fn type_system(&self) -> &'static dyn TypeSystem;

    /// Upper bound on concurrent sessions, if the backend has one.
    fn max_sessions(&self) -> Option<usize> {
        None
    }

    async fn execute(&self, query: &str, cancel: CancellationToken) -> Result<RawResultSet>;
}
