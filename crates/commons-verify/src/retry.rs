//! Deadline and retry helpers for identity agent calls.
//!
//! Only transient errors ([`VerifyError::is_transient`]) are retried.
//! Permanent errors are returned immediately.

use std::future::Future;
use std::time::Duration;

use crate::error::VerifyError;

/// Run `fut` with a deadline, mapping expiry to [`VerifyError::Timeout`].
pub async fn bounded<T, Fut>(timeout: Duration, operation: &str, fut: Fut) -> Result<T, VerifyError>
where
    Fut: Future<Output = Result<T, VerifyError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(VerifyError::Timeout(format!(
            "{} did not complete within {:?}",
            operation, timeout
        ))),
    }
}

/// Call `f` up to `max_retries + 1` times with exponential backoff.
///
/// Delays double from `base_delay`: 200ms, 400ms, 800ms with the defaults.
pub async fn retry_transient<T, F, Fut>(
    max_retries: u32,
    base_delay: Duration,
    operation: &str,
    f: F,
) -> Result<T, VerifyError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, VerifyError>>,
{
    for attempt in 0..max_retries {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                let delay = base_delay * 2u32.saturating_pow(attempt);
                tracing::warn!(
                    operation,
                    attempt = attempt + 1,
                    max_retries,
                    "transient failure, retrying in {delay:?}: {e}"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
    // Final attempt, no more retries.
    f().await
}
