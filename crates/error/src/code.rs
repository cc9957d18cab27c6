use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric error codes following FANLOAD-XXXX format.
///
/// ## Code Ranges
/// - **1000-1999**: Connection errors
/// - **2000-2999**: Query execution errors
/// - **3000-3999**: Configuration errors
/// - **4000-4999**: Schema and type errors
/// - **5000-5999**: Internal errors
///
/// Codes are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
#[non_exhaustive]
pub enum ErrorCode {
    // === Connection Errors (1000-1999) ===
    /// FANLOAD-1001: Session could not be established
    ConnectionFailed = 1001,
    /// FANLOAD-1002: Backend operation exceeded its time budget
    OperationTimeout = 1002,
    /// FANLOAD-1003: No connector for the connection URL scheme
    UnsupportedBackend = 1003,

    // === Query Errors (2000-2999) ===
    /// FANLOAD-2001: Backend rejected or failed the SQL
    QueryExecution = 2001,
    /// FANLOAD-2002: Execution aborted because a sibling partition failed
    Cancelled = 2002,
    /// FANLOAD-2003: Column lookup on a result failed
    ColumnNotFound = 2003,

    // === Configuration Errors (3000-3999) ===
    /// FANLOAD-3001: Invalid or contradictory parameters
    InvalidConfiguration = 3001,
    /// FANLOAD-3002: Connection URL could not be parsed
    InvalidConnectionUrl = 3002,
    /// FANLOAD-3003: Configuration file or environment could not be loaded
    ConfigLoad = 3003,

    // === Schema / Type Errors (4000-4999) ===
    /// FANLOAD-4001: Partitions disagree on result shape
    SchemaMismatch = 4001,
    /// FANLOAD-4002: Native type has no canonical mapping
    UnsupportedType = 4002,
    /// FANLOAD-4003: Malformed wire value
    DecodeFailed = 4003,

    // === Internal Errors (5000-5999) ===
    /// FANLOAD-5001: Unexpected internal state
    Internal = 5001,
    /// FANLOAD-5002: Arrow array construction failed
    Arrow = 5002,
    /// FANLOAD-5003: Serialization/deserialization failed
    Serialization = 5003,

    /// FANLOAD-9999: Unknown/unclassified error
    Unknown = 9999,
}

impl ErrorCode {
    /// Get the numeric code value
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Get the formatted code string (e.g., "FANLOAD-2001")
    pub fn as_str(&self) -> String {
        format!("FANLOAD-{:04}", self.as_u16())
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self.as_u16() {
            1000..=1999 => ErrorCategory::Connection,
            2000..=2999 => ErrorCategory::Query,
            3000..=3999 => ErrorCategory::Config,
            4000..=4999 => ErrorCategory::Schema,
            _ => ErrorCategory::Internal,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> String {
        code.as_str()
    }
}

impl TryFrom<String> for ErrorCode {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        let num: u16 = s
            .strip_prefix("FANLOAD-")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| "Invalid format".to_string())?;
        Self::try_from(num).map_err(|_| "Unknown code".to_string())
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = String;

    fn try_from(n: u16) -> std::result::Result<Self, Self::Error> {
        match n {
            1001 => Ok(Self::ConnectionFailed),
            1002 => Ok(Self::OperationTimeout),
            1003 => Ok(Self::UnsupportedBackend),
            2001 => Ok(Self::QueryExecution),
            2002 => Ok(Self::Cancelled),
            2003 => Ok(Self::ColumnNotFound),
            3001 => Ok(Self::InvalidConfiguration),
            3002 => Ok(Self::InvalidConnectionUrl),
            3003 => Ok(Self::ConfigLoad),
            4001 => Ok(Self::SchemaMismatch),
            4002 => Ok(Self::UnsupportedType),
            4003 => Ok(Self::DecodeFailed),
            5001 => Ok(Self::Internal),
            5002 => Ok(Self::Arrow),
            5003 => Ok(Self::Serialization),
            9999 => Ok(Self::Unknown),
            _ => Err(format!("Unknown error code: {}", n)),
        }
    }
}

/// High-level error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ErrorCategory {
    Connection,
    Query,
    Config,
    Schema,
    Internal,
}
