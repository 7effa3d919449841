//! Circuit breaker pattern implementation.
//!
//! Prevents cascading failures by temporarily stopping requests to a failing service
//! and allowing it time to recover.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{CircuitOpenError, Classify, ResilienceError};

/// Longest time the circuit can be held open, whatever a retry-after hint asks for.
pub const MAX_OPEN_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for the circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Duration to wait in open state before admitting a trial call.
    pub cooldown: Duration,
    /// Duration the circuit is forced open after a quota error without a retry-after hint.
    pub quota_cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            quota_cooldown: Duration::from_secs(300),
        }
    }
}

impl CircuitBreakerConfig {
    /// Creates a new circuit breaker configuration.
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            ..Default::default()
        }
    }

    /// Creates a sensitive configuration that opens quickly.
    pub fn sensitive() -> Self {
        Self::new(3, Duration::from_secs(30))
    }

    /// Creates a lenient configuration that tolerates more failures.
    pub fn lenient() -> Self {
        Self::new(10, Duration::from_secs(120))
    }
}

/// The state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally.
    Closed,
    /// Circuit is open, requests are rejected until `until`.
    Open {
        /// When the next call may be admitted as a half-open trial.
        until: Instant,
    },
    /// Circuit is half-open, a single trial request may test recovery.
    HalfOpen,
}

impl CircuitState {
    /// Stable lowercase name, used in events and metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// A state change caused by recording an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitTransition {
    /// The circuit opened and will reject calls for `cooldown`.
    Opened {
        /// Consecutive failures seen when the circuit opened.
        failures: u32,
        /// How long the circuit stays open.
        cooldown: Duration,
        /// True when opened by [`CircuitBreaker::trip`] rather than the failure threshold.
        forced: bool,
    },
    /// The circuit closed after a successful trial call.
    Closed,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    /// Id of the half-open trial currently running, if any.
    trial: Option<u64>,
    next_trial: u64,
}

impl Inner {
    fn start_trial(&mut self) -> u64 {
        let id = self.next_trial;
        self.next_trial = self.next_trial.wrapping_add(1);
        self.trial = Some(id);
        id
    }
}

/// Who is reporting an outcome.
#[derive(Debug, Clone, Copy)]
enum Reporter {
    /// A direct `record_*` call on the breaker.
    Direct,
    /// A call admitted by [`CircuitBreaker::check`]; `trial` is set for half-open trials.
    Admitted { trial: Option<u64> },
}

impl Reporter {
    /// Only the running trial, or a direct caller, may move the circuit out of half-open.
    fn settles_half_open(self, inner: &Inner) -> bool {
        match self {
            Reporter::Direct => true,
            Reporter::Admitted { trial: Some(id) } => inner.trial == Some(id),
            Reporter::Admitted { trial: None } => false,
        }
    }
}

fn open_until(now: Instant, duration: Duration) -> Instant {
    now.checked_add(duration).unwrap_or(now + MAX_OPEN_DURATION)
}

/// Circuit breaker that prevents cascading failures.
///
/// Transitions from `Open` to `HalfOpen` are checked lazily when the next
/// call asks for admission; there is no background timer.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a new circuit breaker with the given configuration.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                trial: None,
                next_trial: 0,
            }),
        }
    }

    /// Creates a circuit breaker with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Checks if the circuit allows a request to proceed.
    ///
    /// # Returns
    ///
    /// - `Ok(Admission)` if the request can proceed; report its outcome through the admission
    /// - `Err(CircuitOpenError)` if the circuit is open, or a half-open trial is already running
    pub fn check(&self) -> Result<Admission<'_>, CircuitOpenError> {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => Ok(Admission::new(self, None)),
            CircuitState::HalfOpen => {
                if inner.trial.is_some() {
                    Err(CircuitOpenError {
                        retry_in: Duration::ZERO,
                    })
                } else {
                    let id = inner.start_trial();
                    Ok(Admission::new(self, Some(id)))
                }
            }
            CircuitState::Open { until } => {
                let now = Instant::now();
                if now >= until {
                    tracing::info!("Circuit breaker transitioning to HALF-OPEN state");
                    inner.state = CircuitState::HalfOpen;
                    let id = inner.start_trial();
                    Ok(Admission::new(self, Some(id)))
                } else {
                    Err(CircuitOpenError {
                        retry_in: until.saturating_duration_since(now),
                    })
                }
            }
        }
    }

    /// Runs `operation` once under the breaker.
    ///
    /// Fails fast with [`ResilienceError::CircuitOpen`] without invoking the
    /// operation when the circuit rejects the call. The breaker never retries.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        let admission = self.check()?;

        match operation().await {
            Ok(value) => {
                admission.record_success();
                Ok(value)
            }
            Err(error) => {
                admission.record_error(&error);
                Err(ResilienceError::Operation(error))
            }
        }
    }

    /// Records a successful operation.
    pub fn record_success(&self) -> Option<CircuitTransition> {
        self.settle_success(Reporter::Direct)
    }

    /// Records a failed operation.
    pub fn record_failure(&self) -> Option<CircuitTransition> {
        self.settle_failure(Reporter::Direct)
    }

    /// Records a failed operation according to its classification.
    ///
    /// Quota errors trip the circuit for their retry-after hint (or
    /// `quota_cooldown`), breaker-relevant errors count as failures, and any
    /// other error means the dependency answered and counts as a success.
    pub fn record_error<E: Classify>(&self, error: &E) -> Option<CircuitTransition> {
        self.settle_error(error, Reporter::Direct)
    }

    fn settle_success(&self, reporter: Reporter) -> Option<CircuitTransition> {
        let mut inner = self.inner.lock();

        let state = inner.state;
        match state {
            CircuitState::HalfOpen if reporter.settles_half_open(&inner) => {
                tracing::info!("Circuit breaker transitioning to CLOSED state");
                inner.state = CircuitState::Closed;
                inner.failures = 0;
                inner.trial = None;
                Some(CircuitTransition::Closed)
            }
            CircuitState::Closed => {
                inner.failures = 0;
                None
            }
            // Stale outcome from a call admitted before the circuit opened.
            CircuitState::HalfOpen | CircuitState::Open { .. } => None,
        }
    }

    fn settle_failure(&self, reporter: Reporter) -> Option<CircuitTransition> {
        let mut inner = self.inner.lock();

        let state = inner.state;
        match state {
            CircuitState::Closed => {
                inner.failures += 1;
                tracing::warn!(
                    "Circuit breaker recorded failure in closed state ({}/{})",
                    inner.failures,
                    self.config.failure_threshold
                );

                if inner.failures >= self.config.failure_threshold {
                    let failures = inner.failures;
                    Some(self.open(&mut inner, self.config.cooldown, failures, false))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen if reporter.settles_half_open(&inner) => {
                let failures = inner.failures.saturating_add(1);
                Some(self.open(&mut inner, self.config.cooldown, failures, false))
            }
            CircuitState::HalfOpen | CircuitState::Open { .. } => None,
        }
    }

    fn settle_error<E: Classify>(&self, error: &E, reporter: Reporter) -> Option<CircuitTransition> {
        if error.is_quota_exceeded() {
            self.trip(error.retry_after().unwrap_or(self.config.quota_cooldown))
        } else if error.trips_breaker() {
            self.settle_failure(reporter)
        } else {
            self.settle_success(reporter)
        }
    }

    /// Forces the circuit open for `duration`, regardless of the failure count.
    ///
    /// If the circuit is already open the rejection window is extended, never shortened.
    /// Durations above [`MAX_OPEN_DURATION`] are capped.
    pub fn trip(&self, duration: Duration) -> Option<CircuitTransition> {
        let duration = duration.min(MAX_OPEN_DURATION);
        let mut inner = self.inner.lock();

        if let CircuitState::Open { until } = inner.state {
            let extended = open_until(Instant::now(), duration);
            if extended > until {
                inner.state = CircuitState::Open { until: extended };
            }
            return None;
        }

        let failures = inner.failures;
        Some(self.open(&mut inner, duration, failures, true))
    }

    fn open(
        &self,
        inner: &mut Inner,
        cooldown: Duration,
        failures: u32,
        forced: bool,
    ) -> CircuitTransition {
        tracing::warn!(
            "Circuit breaker transitioning to OPEN state for {:?}",
            cooldown
        );
        inner.state = CircuitState::Open {
            until: open_until(Instant::now(), cooldown),
        };
        inner.failures = 0;
        inner.trial = None;
        CircuitTransition::Opened {
            failures,
            cooldown,
            forced,
        }
    }

    fn release_trial(&self, id: u64) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.trial == Some(id) {
            inner.trial = None;
        }
    }

    /// Returns the current state of the circuit.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Returns the current consecutive failure count.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failures
    }

    /// Resets the circuit breaker to closed state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.trial = None;
        tracing::info!("Circuit breaker reset");
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &inner.state)
            .field("failure_count", &inner.failures)
            .finish()
    }
}

/// Permission to run one call, returned by [`CircuitBreaker::check`].
///
/// Dropping an admission without recording an outcome (for example when
/// the call is cancelled) frees the half-open trial slot and leaves the
/// breaker state untouched.
///
/// Only the half-open trial can close or reopen a half-open circuit.
/// Outcomes of calls admitted while the circuit was closed are ignored once
/// it has opened, except quota errors, which always trip it.
#[must_use = "report the call outcome through the admission"]
pub struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    trial: Option<u64>,
    settled: bool,
}

impl<'a> Admission<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: Option<u64>) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    /// Returns true if this call is the half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial.is_some()
    }

    /// Records a successful outcome.
    pub fn record_success(mut self) -> Option<CircuitTransition> {
        self.settled = true;
        self.breaker.settle_success(self.reporter())
    }

    /// Records a failed outcome according to the error's classification.
    pub fn record_error<E: Classify>(mut self, error: &E) -> Option<CircuitTransition> {
        self.settled = true;
        self.breaker.settle_error(error, self.reporter())
    }

    fn reporter(&self) -> Reporter {
        Reporter::Admitted { trial: self.trial }
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if let (Some(id), false) = (self.trial, self.settled) {
            self.breaker.release_trial(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;

    fn server_error() -> ApiError {
        ApiError::Server {
            status: 503,
            message: "unavailable".to_string(),
        }
    }

    #[test]
    fn test_circuit_breaker_initial_state() {
        let cb = CircuitBreaker::with_defaults();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opens_after_threshold() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(3, Duration::from_millis(100)));

        assert_eq!(cb.record_failure(), None);
        assert_eq!(cb.record_failure(), None);
        assert_eq!(cb.state(), CircuitState::Closed);

        let transition = cb.record_failure();
        assert_eq!(
            transition,
            Some(CircuitTransition::Opened {
                failures: 3,
                cooldown: Duration::from_millis(100),
                forced: false,
            })
        );
        assert!(matches!(cb.state(), CircuitState::Open { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_rejects_requests_when_open() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(2, Duration::from_secs(10)));

        cb.record_failure();
        cb.record_failure();

        let err = cb.check().err().unwrap();
        assert_eq!(err.retry_in, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_transitions_to_half_open() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(2, Duration::from_millis(50)));

        cb.record_failure();
        cb.record_failure();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let admission = cb.check().unwrap();
        assert!(admission.is_trial());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        drop(admission);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_trial() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(1, Duration::from_millis(50)));

        cb.record_failure();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let trial = cb.check().unwrap();
        let second = cb.check();
        assert_eq!(second.err().map(|e| e.retry_in), Some(Duration::ZERO));

        assert_eq!(trial.record_success(), Some(CircuitTransition::Closed));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.check().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_frees_slot() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(1, Duration::from_millis(50)));

        cb.record_failure();
        tokio::time::sleep(Duration::from_millis(50)).await;

        drop(cb.check().unwrap());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.check().unwrap().is_trial());
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_reopens_on_failure_in_half_open() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(2, Duration::from_millis(50)));

        cb.record_failure();
        cb.record_failure();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let trial = cb.check().unwrap();
        let transition = trial.record_error(&server_error());
        assert!(matches!(transition, Some(CircuitTransition::Opened { .. })));

        let err = cb.check().err().unwrap();
        assert_eq!(err.retry_in, Duration::from_millis(50));
    }

    #[test]
    fn test_circuit_resets_failure_count_on_success() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(3, Duration::from_secs(1)));

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.failure_count(), 2);

        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trip_forces_open() {
        let cb = CircuitBreaker::with_defaults();

        let transition = cb.trip(Duration::from_secs(300));
        assert!(matches!(
            transition,
            Some(CircuitTransition::Opened { forced: true, .. })
        ));

        // Already open: extends, no new transition.
        assert_eq!(cb.trip(Duration::from_secs(600)), None);
        assert_eq!(cb.check().err().unwrap().retry_in, Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_trip_caps_huge_duration() {
        let cb = CircuitBreaker::with_defaults();

        let transition = cb.trip(Duration::from_secs(u64::MAX));
        assert_eq!(
            transition,
            Some(CircuitTransition::Opened {
                failures: 0,
                cooldown: MAX_OPEN_DURATION,
                forced: true,
            })
        );
        assert_eq!(cb.check().err().unwrap().retry_in, MAX_OPEN_DURATION);

        assert_eq!(cb.trip(Duration::MAX), None);
        assert_eq!(cb.check().err().unwrap().retry_in, MAX_OPEN_DURATION);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_retry_after_opens_circuit() {
        let cb = CircuitBreaker::with_defaults();
        let quota = ApiError::RateLimited {
            retry_after: crate::error::parse_retry_after("18446744073709551615"),
        };

        let transition = cb.check().unwrap().record_error(&quota);
        assert!(matches!(
            transition,
            Some(CircuitTransition::Opened { forced: true, .. })
        ));
        assert!(matches!(cb.state(), CircuitState::Open { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_success_does_not_close_half_open() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(1, Duration::from_secs(1)));

        let slow = cb.check().unwrap();
        assert!(!slow.is_trial());
        cb.record_failure();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let trial = cb.check().unwrap();
        assert!(trial.is_trial());

        assert_eq!(slow.record_success(), None);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.check().is_err());

        assert_eq!(trial.record_success(), Some(CircuitTransition::Closed));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_failure_does_not_reopen_half_open() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(1, Duration::from_secs(1)));

        let slow = cb.check().unwrap();
        cb.record_failure();
        tokio::time::sleep(Duration::from_secs(2)).await;
        let trial = cb.check().unwrap();

        assert_eq!(slow.record_error(&server_error()), None);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.check().is_err(), "trial slot must stay taken");

        let transition = trial.record_error(&server_error());
        assert!(matches!(transition, Some(CircuitTransition::Opened { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_trial_cannot_settle_newer_trial() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(1, Duration::from_secs(1)));

        cb.record_failure();
        tokio::time::sleep(Duration::from_secs(2)).await;
        let first = cb.check().unwrap();

        // A quota error from elsewhere reopens the circuit under the first trial.
        cb.trip(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(2)).await;
        let second = cb.check().unwrap();

        assert_eq!(first.record_success(), None);
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert_eq!(second.record_success(), Some(CircuitTransition::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_error_classification() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(2, Duration::from_secs(1)));

        let bad_request = ApiError::Client {
            status: 400,
            message: "bad".to_string(),
        };
        cb.record_error(&server_error());
        cb.record_error(&bad_request);
        assert_eq!(cb.failure_count(), 0);

        let quota = ApiError::RateLimited {
            retry_after: Some(Duration::from_secs(42)),
        };
        cb.record_error(&quota);
        assert_eq!(cb.check().err().unwrap().retry_in, Duration::from_secs(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_fails_fast_when_open() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(1, Duration::from_secs(10)));
        cb.record_failure();

        let mut invoked = false;
        let result = cb
            .execute(|| {
                invoked = true;
                async { Ok::<_, ApiError>(1) }
            })
            .await;

        assert!(result.unwrap_err().is_circuit_open());
        assert!(!invoked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_records_outcome() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(2, Duration::from_secs(10)));

        let result = cb.execute(|| async { Err::<(), _>(server_error()) }).await;
        assert!(matches!(result, Err(ResilienceError::Operation(_))));
        assert_eq!(cb.failure_count(), 1);

        let value = cb.execute(|| async { Ok::<_, ApiError>("ok") }).await.unwrap();
        assert_eq!(value, "ok");
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_circuit_reset() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(2, Duration::from_secs(1)));

        cb.record_failure();
        cb.record_failure();
        assert!(matches!(cb.state(), CircuitState::Open { .. }));

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_config_presets() {
        assert_eq!(CircuitBreakerConfig::sensitive().failure_threshold, 3);
        assert_eq!(CircuitBreakerConfig::lenient().cooldown, Duration::from_secs(120));
        assert_eq!(
            CircuitBreakerConfig::default().quota_cooldown,
            Duration::from_secs(300)
        );
    }
}
