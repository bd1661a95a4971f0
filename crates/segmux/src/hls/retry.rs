// HLS Retry Utility: Shared bounded-retry logic for manifest, key and segment requests.
//
// Every request gets a hard attempt ceiling. Transient failures sleep and try again;
// fatal failures return immediately.

use crate::DownloadError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry.
    #[default]
    Fixed,
    /// `delay * 2^attempt`, capped at `max_delay`.
    Exponential,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub delay: Duration,
    /// Hard cap on the computed delay.
    pub max_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            max_delay: delay,
            backoff: Backoff::Fixed,
        }
    }

    /// Compute the delay after a failed attempt (0-indexed).
    pub(crate) fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                // Checked shift so attempts >= 32 saturate instead of overflowing.
                let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                self.delay
                    .checked_mul(multiplier)
                    .unwrap_or(self.max_delay)
                    .min(self.max_delay)
            }
        }
    }
}

/// Result of a single attempt, used by the caller to signal retryability.
pub enum RetryAction<T> {
    /// Operation succeeded.
    Success(T),
    /// Operation failed with a retryable error (network, 5xx, timeout).
    Retry(DownloadError),
    /// Operation failed with a non-retryable error (4xx, bad URL).
    Fail(DownloadError),
}

impl<T> RetryAction<T> {
    /// Sort an error into `Retry` or `Fail` using [`DownloadError::is_retryable`].
    pub fn from_error(err: DownloadError) -> Self {
        if err.is_retryable() {
            Self::Retry(err)
        } else {
            Self::Fail(err)
        }
    }
}

/// Execute an async operation until it succeeds, fails fatally, or runs out of attempts.
///
/// The `operation` closure receives the current attempt number (0-indexed).
/// Running out of attempts yields [`DownloadError::FetchExhausted`] wrapping the
/// last transient error.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    url: &str,
    operation: F,
) -> Result<T, DownloadError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = RetryAction<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation(attempt).await {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(err) => return Err(err),
            RetryAction::Retry(err) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(DownloadError::FetchExhausted {
                        url: url.to_string(),
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                let delay = policy.delay_for_attempt(attempt - 1);
                warn!(
                    url,
                    attempt,
                    max = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after transient error"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
