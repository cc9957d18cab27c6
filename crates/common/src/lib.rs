//! Common utilities and configuration shared across fanload crates.
//!
//! - **Configuration**: Strongly typed loader configuration (`config`).
//! - **Resilience**: Exponential backoff for session establishment (`retry`).
//! - **Logging**: `tracing` subscriber setup (`telemetry`).
//! - **Scrubbing**: Credential and literal redaction for log lines (`scrubber`).
pub mod config;
pub mod retry;
pub mod scrubber;
pub mod telemetry;

pub use crate::config::{BinaryEncoding, LoaderConfig, LoggingConfig, Protocol, RetrySettings};
