//! Bounded exponential backoff around model calls.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::inference::config::OrchestrationLimits;

/// Retries a fallible async operation on retryable errors.
///
/// The first attempt is free; up to `max_retries` more follow, each preceded by
/// a sleep of `backoff_base * 2^retry_index` (500 ms, 1 s, 2 s with defaults).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_limits(&OrchestrationLimits::default())
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_base: Duration) -> Self {
        Self {
            max_retries,
            backoff_base,
        }
    }

    pub fn from_limits(limits: &OrchestrationLimits) -> Self {
        Self::new(limits.max_retries, Duration::from_millis(limits.backoff_base_ms))
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Sleep before retry number `retry_index` (0-based).
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        self.backoff_base.saturating_mul(2u32.saturating_pow(retry_index))
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or
    /// the retry budget is spent. `operation` receives the 0-based attempt number.
    pub async fn run<T, E, F, Fut, R>(&self, mut operation: F, is_retryable: R) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: Display,
    {
        let mut attempt = 0;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries && is_retryable(&e) => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        backoff_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if attempt > 0 {
                        tracing::debug!(attempts = attempt + 1, "giving up after retries");
                    }
                    return Err(e);
                }
            }
        }
    }
}
