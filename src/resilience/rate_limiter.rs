//! Request spacing rate limiter.
//!
//! Spaces outgoing calls evenly at `60s / requests_per_minute` instead of
//! letting a burst through and then stalling, which keeps a client under an
//! external per-minute quota without triggering burst throttling.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Configuration for the rate limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Maximum number of requests allowed per minute.
    pub requests_per_minute: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
        }
    }
}

impl RateLimiterConfig {
    /// Creates a new rate limiter configuration.
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute,
        }
    }

    /// Creates a configuration for high throughput scenarios.
    pub fn high_throughput() -> Self {
        Self::new(120)
    }

    /// Creates a configuration for conservative rate limiting.
    pub fn conservative() -> Self {
        Self::new(30)
    }

    /// Creates a configuration with effectively no rate limiting.
    pub fn unlimited() -> Self {
        Self::new(u32::MAX)
    }

    /// Minimum spacing between two granted turns.
    ///
    /// A rate of zero is raised to one request per minute.
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(60) / self.requests_per_minute.max(1)
    }
}

/// Spacing rate limiter.
///
/// Each call to [`wait_turn`](Self::wait_turn) reserves the next free slot
/// under a single lock acquisition, so concurrent callers are served in
/// call order and never closer than the configured interval.
pub struct RateLimiter {
    config: RateLimiterConfig,
    min_interval: Duration,
    last_turn: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Creates a new rate limiter with the given configuration.
    pub fn new(config: RateLimiterConfig) -> Self {
        let min_interval = config.min_interval();
        Self {
            config,
            min_interval,
            last_turn: Mutex::new(None),
        }
    }

    /// Creates a rate limiter with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(RateLimiterConfig::default())
    }

    /// Waits until the caller may issue its request.
    ///
    /// Only the calling task is suspended. Never fails.
    pub async fn wait_turn(&self) {
        let turn = self.reserve_turn(Instant::now());
        let now = Instant::now();

        if turn > now {
            tracing::debug!(
                "Rate limiter: waiting {:?} for next turn",
                turn.saturating_duration_since(now)
            );
            sleep_until(turn).await;
        }
    }

    /// Reserves the next turn at or after `now` and records it as the last granted turn.
    fn reserve_turn(&self, now: Instant) -> Instant {
        let mut last_turn = self.last_turn.lock();
        let turn = match *last_turn {
            Some(previous) => std::cmp::max(previous + self.min_interval, now),
            None => now,
        };
        *last_turn = Some(turn);
        turn
    }

    /// Returns how long a caller arriving now would wait.
    pub fn time_until_next_turn(&self) -> Duration {
        match *self.last_turn.lock() {
            Some(previous) => (previous + self.min_interval).saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    /// Minimum spacing between two granted turns.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Resets the rate limiter to its initial state.
    pub fn reset(&self) {
        *self.last_turn.lock() = None;
        tracing::info!("Rate limiter reset");
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("min_interval", &self.min_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_min_interval() {
        assert_eq!(RateLimiterConfig::new(60).min_interval(), Duration::from_secs(1));
        assert_eq!(RateLimiterConfig::new(120).min_interval(), Duration::from_millis(500));
        assert_eq!(RateLimiterConfig::new(0).min_interval(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_turn_is_immediate() {
        let limiter = RateLimiter::with_defaults();
        let start = Instant::now();
        limiter.wait_turn().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_turns_are_spaced() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(60));
        let start = Instant::now();

        limiter.wait_turn().await;
        limiter.wait_turn().await;

        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_wait_after_interval_elapsed() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(60));
        limiter.wait_turn().await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(limiter.time_until_next_turn(), Duration::ZERO);

        let start = Instant::now();
        limiter.wait_turn().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_get_distinct_slots() {
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::new(600)));
        let start = Instant::now();

        let mut handles = vec![];
        for _ in 0..5 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.wait_turn().await;
                Instant::now()
            }));
        }

        let mut granted = vec![];
        for handle in handles {
            granted.push(handle.await.unwrap());
        }
        granted.sort();

        for pair in granted.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_clock() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(1));
        limiter.wait_turn().await;
        assert!(limiter.time_until_next_turn() > Duration::ZERO);

        limiter.reset();
        assert_eq!(limiter.time_until_next_turn(), Duration::ZERO);
    }
}
