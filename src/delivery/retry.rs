//! Generic retry driver.
//!
//! An operation reports each attempt as an [`Attempt`]: done, retryable or
//! fatal. The driver sleeps `base * 2^(n-1)` before retry `n` (1 s → 2 s → 4 s
//! with the default 1 s base and 3 retries), or longer when the failure
//! carries a server-provided delay.

use std::fmt::Display;
use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::warn;

/// Outcome of one attempt.
#[derive(Debug)]
pub enum Attempt<T, E> {
    Done(T),
    Retryable {
        error: E,
        /// Minimum delay requested by the remote side (e.g. `Retry-After`).
        retry_after: Option<Duration>,
    },
    Fatal(E),
}

/// Terminal failure of a retried operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The operation reported a non-retryable failure.
    Fatal { attempts: u32, error: E },
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, last: E },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            max_retries,
            base_backoff,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(1u32 << exp)
    }
}

/// Run `op` until it succeeds, fails fatally, or exhausts the policy.
/// `op` receives the 0-based attempt number.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fatal(error) => {
                return Err(RetryError::Fatal {
                    attempts: attempt + 1,
                    error,
                })
            }
            Attempt::Retryable { error, retry_after } => {
                warn!("{}: attempt {} failed: {}", label, attempt + 1, error);
                if attempt >= policy.max_retries {
                    return Err(RetryError::Exhausted {
                        attempts: attempt + 1,
                        last: error,
                    });
                }
                attempt += 1;
                let backoff = policy.backoff(attempt).max(retry_after.unwrap_or_default());
                warn!(
                    "{}: retry {}/{} after {}ms",
                    label,
                    attempt,
                    policy.max_retries,
                    backoff.as_millis()
                );
                sleep(backoff).await;
            }
        }
    }
}
