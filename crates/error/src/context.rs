//! # Error Contexts
//!
//! Structured metadata attached to errors so callers can react programmatically.

use serde::{Deserialize, Serialize};

/// Structured context for errors.
///
/// Each variant provides the fields relevant to one failure class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorContext {
    /// The partition whose execution failed
    Partition { index: usize, sql: String },

    /// Context for FANLOAD-4001 (SchemaMismatch)
    SchemaMismatch {
        /// Index of the partition that disagrees with the authoritative schema
        partition: usize,
        /// Columns reported by the authoritative partition
        expected_columns: Vec<String>,
        /// Columns reported by the offending partition
        actual_columns: Vec<String>,
        /// Human-readable per-column differences
        mismatches: Vec<String>,
    },

    /// Context for FANLOAD-4002 (UnsupportedType)
    UnsupportedType {
        column: String,
        native_type: String,
        backend: String,
    },

    /// Context for FANLOAD-4003 (DecodeFailed)
    Decode {
        column: String,
        partition: usize,
        /// Row offset within the partition
        row: usize,
        native_type: String,
    },

    /// Context for connection errors (FANLOAD-1001, 1002)
    Connection {
        backend: String,
        /// Connection target with credentials removed
        target: String,
    },

    /// Context for FANLOAD-3001..3003
    Config { field: Option<String> },

    /// Context for FANLOAD-2003 (ColumnNotFound)
    ColumnNotFound {
        column: String,
        available_columns: Vec<String>,
    },
}
