use crate::config::RetrySettings;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Calculate the delay for the next retry attempt with exponential backoff.
///
/// Jitter is bounded by the base delay so short test settings stay short.
pub fn next_retry_delay(attempt: usize, base_ms: u64, max_ms: u64) -> Duration {
    let multiplier = 2_u64.saturating_pow(attempt as u32);
    let delay = base_ms.saturating_mul(multiplier);
    let jitter = if base_ms == 0 {
        0
    } else {
        rand::random::<u64>() % base_ms
    };
    let total = delay.saturating_add(jitter);
    Duration::from_millis(total.min(max_ms))
}

/// Execute an async operation with retries.
///
/// `retryable` decides whether a failure is worth another attempt; anything
/// else is returned immediately.
pub async fn retry_async<T, E, F, Fut, R>(
    operation_name: &str,
    settings: RetrySettings,
    retryable: R,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = settings.max_attempts.max(1) as usize;
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempt += 1;
                if !retryable(&e) {
                    return Err(e);
                }
                if attempt >= max_attempts {
                    error!(
                        "Failed to execute '{}' after {} attempts: {}",
                        operation_name, max_attempts, e
                    );
                    return Err(e);
                }
                let delay =
                    next_retry_delay(attempt, settings.base_delay_ms, settings.max_delay_ms);
                warn!(
                    "Operation '{}' failed. Retrying in {:?} (Attempt {}/{}): {}",
                    operation_name, delay, attempt, max_attempts, e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
