//! Bounded timeout + exponential back-off around blocking I/O

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};

use crate::error::{Error, Result};

/// Timeout and back-off settings for one kind of operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first
    pub max_attempts: u32,
    /// Limit for a single attempt
    pub attempt_timeout: Duration,
    /// Sleep before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for any sleep
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(30),
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// No retries, only the timeout
    pub fn once(attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            attempt_timeout,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Sleep after the given failed attempt (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Longest time `with_retry` can take: every attempt times out
    pub fn worst_case(&self) -> Duration {
        let attempts = self.max_attempts.max(1);
        let mut total = self.attempt_timeout * attempts;
        for attempt in 1..attempts {
            total += self.backoff_for(attempt);
        }
        total
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
///
/// Each attempt is bounded by `policy.attempt_timeout`; only errors with
/// [`Error::is_transient`] are retried.
pub async fn with_retry<T, F, Fut>(operation: &str, policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = match timeout(policy.attempt_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: operation.to_string(),
                secs: policy.attempt_timeout.as_secs_f64(),
            }),
        };

        match result {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!("{} succeeded on attempt {}/{}", operation, attempt, max_attempts);
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let backoff = policy.backoff_for(attempt);
                tracing::warn!(
                    "{} failed (attempt {}/{}): {}, retrying in {}ms",
                    operation,
                    attempt,
                    max_attempts,
                    e,
                    backoff.as_millis()
                );
                sleep(backoff).await;
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::error!("{} failed after {} attempts: {}", operation, attempt, e);
                } else {
                    tracing::debug!("{} failed permanently: {}", operation, e);
                }
                return Err(e);
            }
        }
    }
}
