//! Retry logic with exponential backoff.
//!
//! The delay after failed attempt `k` is `min(base_delay * 2^(k-1), max_delay)`.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::Classify;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one. `1` disables retries.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
        }
    }
}

impl RetryConfig {
    /// Creates a new retry configuration with custom settings.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Creates a configuration with a single attempt and no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Creates a configuration for aggressive retries.
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }

    /// Returns true if more than one attempt is allowed.
    pub fn retries_enabled(&self) -> bool {
        self.max_attempts > 1
    }

    /// Backoff delay after failed attempt `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// The last error of a retried operation, with the number of attempts made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure<E> {
    /// Error returned by the final attempt.
    pub error: E,
    /// Number of attempts made.
    pub attempts: u32,
}

/// Executes operations with retry logic and exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Creates a new retry executor with the given configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Creates a retry executor with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Executes an operation with retry logic.
    ///
    /// # Behavior
    ///
    /// - Attempts the operation up to `max_attempts` times
    /// - Retries only if the error is retryable and not a quota error
    /// - Returns the first success immediately, without further delay
    /// - Returns the final error unchanged once attempts are exhausted
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        self.execute_observed(operation, |_, _, _| {})
            .await
            .map_err(|failure| failure.error)
    }

    /// Executes an operation with retry logic, reporting each scheduled retry.
    ///
    /// `on_retry` receives the failed attempt number, the delay before the
    /// next attempt and the error, before the delay starts.
    pub async fn execute_observed<F, Fut, T, E, O>(
        &self,
        mut operation: F,
        mut on_retry: O,
    ) -> Result<T, RetryFailure<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
        O: FnMut(u32, Duration, &E),
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        tracing::info!("Operation succeeded on attempt {}", attempt);
                    }
                    return Ok(result);
                }
                Err(e) if attempt < max_attempts && e.is_retryable() && !e.is_quota_exceeded() => {
                    let delay = self.config.delay_for_attempt(attempt);

                    tracing::warn!(
                        "Retryable error encountered (attempt {}/{}): {}. Waiting {:?} before retry.",
                        attempt,
                        max_attempts,
                        e,
                        delay
                    );
                    on_retry(attempt, delay, &e);

                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                }
                Err(e) => {
                    if attempt > 1 {
                        tracing::error!("Operation failed after {} attempts: {}", attempt, e);
                    }
                    return Err(RetryFailure {
                        error: e,
                        attempts: attempt,
                    });
                }
            }
        }
    }

    /// Returns the retry configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}
