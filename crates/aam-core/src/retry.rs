//! Bounded exponential backoff with a per-attempt timeout.

use std::future::Future;

use crate::config::RetryPolicy;
use crate::error::{Error, Result};

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are exhausted.
///
/// Each attempt is bounded by `policy.timeout()`; a timeout counts as a
/// retryable failure. `on_retry` is called with the failed attempt number
/// and its error before sleeping.
pub async fn with_retry<T, F, Fut, R>(
    policy: &RetryPolicy,
    subject: &str,
    mut on_retry: R,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: FnMut(u32, &Error),
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        let outcome = match tokio::time::timeout(policy.timeout(), op()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                subject: subject.to_string(),
                secs: policy.timeout().as_secs(),
            }),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < attempts => {
                let delay = policy.delay(attempt);
                tracing::warn!(
                    subject,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying"
                );
                on_retry(attempt, &err);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if attempt > 1 {
                    tracing::debug!(subject, attempt, "Giving up");
                }
                return Err(err);
            }
        }
    }
}
