//! # fanload-error
//!
//! Unified error types for the fanload partitioned SQL loader.
//!
//! Every failure carries:
//! - A numeric error code (FANLOAD-XXXX) whose range identifies its category
//! - Structured JSON context (partition index, column, row offset, ...)
//! - An optional hint for the caller

mod code;
mod context;
mod convert;

pub use code::{ErrorCategory, ErrorCode};
pub use context::ErrorContext;
pub use convert::find_closest_match;

use serde::{Deserialize, Serialize};
use std::fmt;

/// The unified error type for all fanload operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanloadError {
    /// Numeric error code (e.g., "FANLOAD-4001")
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Structured context for programmatic handling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ErrorContext>,

    /// Suggestion for fixing the call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl FanloadError {
    /// Create a new error with code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
            hint: None,
        }
    }

    /// ConfigurationError: invalid or contradictory parameters.
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message)
    }

    /// ConnectionError: a session could not be established.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConnectionFailed, message)
    }

    /// QueryExecutionError: the backend rejected or failed the SQL.
    pub fn query(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::QueryExecution, message)
    }

    /// CancelledError: execution aborted because a sibling partition failed.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, message)
    }

    /// OperationTimeoutError
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::OperationTimeout, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Add structured context
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Add a hint
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// True for errors produced by cancelling an in-flight operation.
    pub fn is_cancellation(&self) -> bool {
        self.code == ErrorCode::Cancelled
    }

    /// True when retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        self.code == ErrorCode::ConnectionFailed
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::warn!("Failed to serialize FanloadError: {}", e);
            format!(
                r#"{{"code":"{}","message":"Serialization failed"}}"#,
                self.code
            )
        })
    }

    /// Serialize to pretty JSON for logging
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| self.to_json())
    }
}

impl fmt::Display for FanloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, " (Hint: {})", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for FanloadError {}

/// Result type alias for fanload operations
pub type Result<T> = std::result::Result<T, FanloadError>;
