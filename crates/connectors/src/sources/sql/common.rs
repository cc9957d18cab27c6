use fanload_common::retry::retry_async;
use fanload_common::scrubber::redact_url;
use fanload_common::{LoaderConfig, Protocol, RetrySettings};
use fanload_error::{ErrorContext, FanloadError, Result};
use std::future::Future;

/// Options shared by every connector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    pub protocol: Protocol,
    /// Backoff for session establishment. Queries are never retried.
    pub retry: RetrySettings,
}

impl From<&LoaderConfig> for ConnectOptions {
    fn from(config: &LoaderConfig) -> Self {
        Self {
            protocol: config.protocol,
            retry: config.retry,
        }
    }
}

/// Session establishment failure, tagged with the redacted target.
pub fn connection_error(
    backend: &str,
    target: &str,
    err: impl std::fmt::Display,
) -> FanloadError {
    let target = redact_url(target);
    FanloadError::connection(format!(
        "Failed to connect to {} at {}: {}",
        backend, target, err
    ))
    .with_context(ErrorContext::Connection {
        backend: backend.to_string(),
        target,
    })
}

/// The backend rejected or failed a statement.
pub fn query_error(backend: &str, err: impl std::fmt::Display) -> FanloadError {
    FanloadError::query(format!("{} query failed: {}", backend, err))
}

/// Open a session, retrying connection failures with backoff.
pub async fn connect_with_retry<T, F, Fut>(
    backend: &str,
    settings: RetrySettings,
    connect: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_async(
        &format!("connect({})", backend),
        settings,
        FanloadError::is_retryable,
        connect,
    )
    .await
}
