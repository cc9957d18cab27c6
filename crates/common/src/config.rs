use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use validator::Validate;

// Default constants
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 200;
pub const DEFAULT_MAX_DELAY_MS: u64 = 5000;
pub const DEFAULT_LOG_FILTER: &str = "info";
pub const ENV_PREFIX: &str = "FANLOAD";

/// Wire protocol used when talking to a backend.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Binary/prepared protocol (PostgreSQL extended query, MySQL prepared statements)
    #[default]
    Binary,
    /// Textual protocol (PostgreSQL simple query, MySQL text protocol)
    Text,
}

/// Output encoding for binary columns. Fixed per column at schema resolution.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BinaryEncoding {
    #[default]
    Raw,
    Base64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Validate)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1))]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetrySettings {
    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Validate)]
pub struct LoaderConfig {
    /// Maximum partitions executing at once. Defaults to the partition count.
    #[serde(default)]
    #[validate(range(min = 1))]
    pub parallelism: Option<usize>,

    /// Upper bound for each partition execution and for the range probe.
    #[serde(default = "default_query_timeout_secs")]
    #[validate(range(min = 1))]
    pub query_timeout_secs: u64,

    #[serde(default)]
    pub protocol: Protocol,

    #[serde(default)]
    pub binary_encoding: BinaryEncoding,

    #[serde(default)]
    #[validate(nested)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            parallelism: None,
            query_timeout_secs: default_query_timeout_secs(),
            protocol: Protocol::default(),
            binary_encoding: BinaryEncoding::default(),
            retry: RetrySettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_query_timeout_secs() -> u64 {
    DEFAULT_QUERY_TIMEOUT_SECS
}

impl LoaderConfig {
    /// Load from an optional file, then overlay `FANLOAD__*` environment variables.
    ///
    /// `FANLOAD__RETRY__MAX_ATTEMPTS=5` maps to `retry.max_attempts`, etc.
    pub fn from_file(path: &str) -> Result<Self> {
        let builder = config::Config::builder();

        let builder = if std::path::Path::new(path).exists() {
            builder.add_source(config::File::with_name(path))
        } else {
            builder
        };

        Self::from_builder(builder)
    }

    /// Defaults overlaid with `FANLOAD__*` environment variables only.
    pub fn from_env() -> Result<Self> {
        Self::from_builder(config::Config::builder())
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().context("Failed to build configuration")?;

        let loader_config: LoaderConfig = cfg
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        loader_config
            .validate()
            .map_err(|e| anyhow::anyhow!("Configuration validation failed: {}", e))?;

        Ok(loader_config)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    /// Degree of parallelism for `partitions` partitions, clamped to `1..=partitions`.
    pub fn effective_parallelism(&self, partitions: usize) -> usize {
        let requested = self.parallelism.unwrap_or(partitions);
        requested.clamp(1, partitions.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = LoaderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.protocol, Protocol::Binary);
        assert_eq!(config.binary_encoding, BinaryEncoding::Raw);
        assert_eq!(config.query_timeout(), Duration::from_secs(3600));
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let config = LoaderConfig {
            parallelism: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_retry_attempts_rejected() {
        let config = LoaderConfig {
            retry: RetrySettings {
                max_attempts: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_effective_parallelism_is_clamped() {
        let mut config = LoaderConfig::default();
        assert_eq!(config.effective_parallelism(4), 4);
        config.parallelism = Some(16);
        assert_eq!(config.effective_parallelism(4), 4);
        config.parallelism = Some(2);
        assert_eq!(config.effective_parallelism(4), 2);
        assert_eq!(config.effective_parallelism(0), 1);
    }

    #[test]
    fn test_from_file_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "parallelism: 3\nquery_timeout_secs: 10\nprotocol: text\nbinary_encoding: base64\nretry:\n  max_attempts: 2"
        )
        .unwrap();

        let config = LoaderConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.parallelism, Some(3));
        assert_eq!(config.query_timeout_secs, 10);
        assert_eq!(config.protocol, Protocol::Text);
        assert_eq!(config.binary_encoding, BinaryEncoding::Base64);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.base_delay_ms, DEFAULT_BASE_DELAY_MS);
    }

    #[test]
    fn test_from_file_missing_uses_defaults() {
        let config = LoaderConfig::from_file("/nonexistent/fanload.yaml").unwrap();
        assert_eq!(config.query_timeout_secs, DEFAULT_QUERY_TIMEOUT_SECS);
    }

    #[test]
    fn test_from_file_invalid_values_fail_validation() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "query_timeout_secs: 0").unwrap();
        assert!(LoaderConfig::from_file(file.path().to_str().unwrap()).is_err());
    }
}
