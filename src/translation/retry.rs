/*!
 * Bounded exponential backoff for provider calls.
 *
 * Only errors that report `is_retryable()` are repeated; everything else is handed
 * back to the caller after the first attempt.
 */

use log::warn;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::app_config::RetryConfig;
use crate::errors::ProviderError;

/// Retry policy for a single provider call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: bool,
}

/// Value or final error of a retried call, with the number of attempts made
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, ProviderError>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff: Duration, max_backoff: Duration, jitter: bool) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff,
            max_backoff,
            jitter,
        }
    }

    /// A policy that never waits, for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO, false)
    }

    /// Backoff before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32, error: &ProviderError) -> Duration {
        if let Some(secs) = error.retry_after_secs() {
            return Duration::from_secs(secs).min(self.max_backoff);
        }

        let shift = retry.saturating_sub(1).min(20);
        let base_ms = self.base_backoff.as_millis() as u64;
        let backoff_ms = base_ms.saturating_mul(1u64 << shift);
        let mut delay = Duration::from_millis(backoff_ms).min(self.max_backoff);

        if self.jitter && !delay.is_zero() {
            let jitter_ms = rand::rng().random_range(0..=delay.as_millis() as u64 / 4);
            delay += Duration::from_millis(jitter_ms);
        }
        delay
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or the attempts run out
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(error) if error.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt, &error);
                    warn!(
                        "{}: {} - attempt {}/{}, retrying in {}ms",
                        label,
                        error,
                        attempt,
                        self.max_attempts,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    return RetryOutcome {
                        result: Err(error),
                        attempts: attempt,
                    };
                }
            }
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
            config.jitter,
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}
