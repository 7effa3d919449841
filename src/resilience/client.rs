//! Resilient client composing the concurrency gate, rate limiter, retry
//! policy and circuit breaker.
//!
//! The layering of one logical call is fixed:
//!
//! ```text
//! CircuitBreaker( Retry( BoundedQueue( RateLimiter.wait_turn ; operation ) ) )
//! ```
//!
//! The breaker sees one outcome per logical call, however many attempts the
//! retry layer made. Each attempt holds a concurrency slot only while it runs;
//! the slot is free during backoff.

use serde_json::{json, Value};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::bounded_queue::BoundedQueue;
use super::circuit_breaker::{CircuitBreaker, CircuitTransition};
use super::rate_limiter::RateLimiter;
use super::retry::{RetryExecutor, RetryFailure};
use crate::config::ResilientConfig;
use crate::error::{Classify, ResilienceError};
use crate::observability::{EventBus, EventObserver, EventType};

/// Outcome of a single attempt inside the retry loop.
enum Attempt<E> {
    Shutdown,
    Failed(E),
}

impl<E: Classify> Classify for Attempt<E> {
    fn is_retryable(&self) -> bool {
        match self {
            Attempt::Failed(e) => e.is_retryable(),
            Attempt::Shutdown => false,
        }
    }

    fn is_quota_exceeded(&self) -> bool {
        match self {
            Attempt::Failed(e) => e.is_quota_exceeded(),
            Attempt::Shutdown => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Attempt::Failed(e) => e.retry_after(),
            Attempt::Shutdown => None,
        }
    }

    fn trips_breaker(&self) -> bool {
        match self {
            Attempt::Failed(e) => e.trips_breaker(),
            Attempt::Shutdown => false,
        }
    }
}

impl<E: Display> Display for Attempt<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Attempt::Failed(e) => e.fmt(f),
            Attempt::Shutdown => f.write_str("client is shut down"),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Wraps outbound calls to one external service with concurrency limiting,
/// request spacing, retries and a circuit breaker.
///
/// # Example
///
/// ```rust
/// use integrations_resilience::config::ResilientConfig;
/// use integrations_resilience::error::ApiError;
/// use integrations_resilience::resilience::ResilientClient;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ResilientConfig::builder().max_concurrent(1).build()?;
/// let client = ResilientClient::new(config);
///
/// let body = client
///     .call(|| async { Ok::<_, ApiError>("tasks".to_string()) })
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct ResilientClient {
    config: ResilientConfig,
    retry: RetryExecutor,
    circuit_breaker: Arc<CircuitBreaker>,
    rate_limiter: Arc<RateLimiter>,
    queue: Arc<BoundedQueue>,
    events: EventBus,
}

impl ResilientClient {
    /// Creates a new client with the given configuration.
    ///
    /// Out-of-range values in a hand-built config are clamped by each
    /// component: zero concurrency or rate becomes one, zero attempts becomes one.
    pub fn new(config: ResilientConfig) -> Self {
        if let Err(e) = config.validate() {
            tracing::warn!(error = %e, "Resilient client built from an invalid config, clamping");
        }
        let retry = RetryExecutor::new(config.retry_config());
        let circuit_breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker_config()));
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limiter_config()));
        let queue = Arc::new(BoundedQueue::new(config.max_concurrent));

        Self {
            config,
            retry,
            circuit_breaker,
            rate_limiter,
            queue,
            events: EventBus::new(),
        }
    }

    /// Creates a new client with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ResilientConfig::default())
    }

    /// Registers an event observer. Closures taking `&ResilienceEvent` work too.
    pub fn on_event<O>(&self, observer: O)
    where
        O: EventObserver + 'static,
    {
        self.events.subscribe(Arc::new(observer));
    }

    /// Registers a shared event observer.
    pub fn subscribe(&self, observer: Arc<dyn EventObserver>) {
        self.events.subscribe(observer);
    }

    /// Executes an operation with full resilience protection.
    ///
    /// # Behavior
    ///
    /// 1. Fails fast with [`ResilienceError::CircuitOpen`] if the breaker rejects the call
    /// 2. For each attempt: waits for a concurrency slot, then for a rate-limit turn,
    ///    then runs the operation
    /// 3. Retries retryable failures with exponential backoff, holding no slot while waiting
    /// 4. Records one outcome on the breaker
    ///
    /// Errors are [`ResilienceError::RetryExhausted`] when more than one attempt
    /// was made and [`ResilienceError::Operation`] otherwise. Every failure is
    /// published as a `call_failure` event before it is returned.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let started = Instant::now();

        let admission = match self.circuit_breaker.check() {
            Ok(admission) => admission,
            Err(open) => {
                tracing::debug!("Call rejected by open circuit, retry in {:?}", open.retry_in);
                self.events.emit(
                    EventType::CallFailure,
                    json!({
                        "reason": "circuit_open",
                        "attempts": 0,
                        "retry_in_ms": millis(open.retry_in),
                    }),
                );
                return Err(open.into());
            }
        };

        let operation = &operation;
        let queue = &self.queue;
        let rate_limiter = &self.rate_limiter;
        let mut retries = 0u32;

        let outcome = self
            .retry
            .execute_observed(
                move || async move {
                    let _permit = queue.acquire().await.map_err(|_| Attempt::<E>::Shutdown)?;
                    rate_limiter.wait_turn().await;
                    operation().await.map_err(Attempt::Failed)
                },
                |attempt, delay, error| {
                    retries += 1;
                    self.events.emit(
                        EventType::Retry,
                        json!({
                            "attempt": attempt,
                            "delay_ms": millis(delay),
                            "error": error.to_string(),
                        }),
                    );
                },
            )
            .await;

        let duration_ms = millis(started.elapsed());

        match outcome {
            Ok(value) => {
                self.emit_transition(admission.record_success());
                self.events.emit(
                    EventType::CallSuccess,
                    json!({ "attempts": retries + 1, "duration_ms": duration_ms }),
                );
                Ok(value)
            }
            Err(RetryFailure {
                error: Attempt::Shutdown,
                attempts,
            }) => {
                drop(admission);
                self.events.emit(
                    EventType::CallFailure,
                    json!({
                        "reason": "shutdown",
                        "attempts": attempts.saturating_sub(1),
                        "duration_ms": duration_ms,
                    }),
                );
                Err(ResilienceError::Shutdown)
            }
            Err(RetryFailure {
                error: Attempt::Failed(error),
                attempts,
            }) => {
                let quota = error.is_quota_exceeded();
                self.emit_transition(admission.record_error(&error));

                let reason = if quota {
                    "quota_exceeded"
                } else if attempts > 1 {
                    "retries_exhausted"
                } else {
                    "error"
                };
                self.events.emit(
                    EventType::CallFailure,
                    json!({
                        "reason": reason,
                        "attempts": attempts,
                        "duration_ms": duration_ms,
                        "error": error.to_string(),
                    }),
                );

                if attempts > 1 {
                    Err(ResilienceError::RetryExhausted {
                        attempts,
                        source: error,
                    })
                } else {
                    Err(ResilienceError::Operation(error))
                }
            }
        }
    }

    /// Like [`call`](Self::call), but gives up as soon as `token` is cancelled.
    ///
    /// Cancellation drops the in-flight pipeline: the concurrency slot is
    /// released, remaining retries are skipped, a half-open trial slot is
    /// freed and the breaker is not charged. An already cancelled token
    /// never invokes the operation.
    pub async fn call_with_cancel<F, Fut, T, E>(
        &self,
        operation: F,
        token: &CancellationToken,
    ) -> Result<T, ResilienceError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!("Call cancelled by caller");
                self.events.emit(EventType::CallFailure, json!({ "reason": "cancelled" }));
                Err(ResilienceError::Cancelled)
            }
            result = self.call(operation) => result,
        }
    }

    fn emit_transition(&self, transition: Option<CircuitTransition>) {
        match transition {
            Some(CircuitTransition::Opened {
                failures,
                cooldown,
                forced,
            }) => self.events.emit(
                EventType::CircuitOpen,
                json!({
                    "failures": failures,
                    "cooldown_ms": millis(cooldown),
                    "forced": forced,
                }),
            ),
            Some(CircuitTransition::Closed) => {
                self.events.emit(EventType::CircuitClose, Value::Object(Default::default()))
            }
            None => {}
        }
    }

    /// Stops admitting work. Queued and future calls fail with
    /// [`ResilienceError::Shutdown`]; calls already running finish.
    pub fn shutdown(&self) {
        self.queue.close();
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ResilientConfig {
        &self.config
    }

    /// Returns the circuit breaker.
    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    /// Returns the rate limiter.
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Returns the concurrency gate.
    pub fn queue(&self) -> &Arc<BoundedQueue> {
        &self.queue
    }

    /// Returns the retry executor.
    pub fn retry(&self) -> &RetryExecutor {
        &self.retry
    }

    /// Resets the circuit breaker and rate limiter state.
    pub fn reset(&self) {
        self.circuit_breaker.reset();
        self.rate_limiter.reset();
    }
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("config", &self.config)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("rate_limiter", &self.rate_limiter)
            .field("queue", &self.queue)
            .field("events", &self.events)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::observability::ResilienceEvent;
    use crate::resilience::CircuitState;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> ResilientConfig {
        ResilientConfig::builder()
            .requests_per_minute(u32::MAX)
            .base_delay(Duration::from_millis(10))
            .max_delay(Duration::from_millis(100))
            .build()
            .unwrap()
    }

    fn record(client: &ResilientClient) -> Arc<Mutex<Vec<ResilienceEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        client.on_event(move |event: &ResilienceEvent| sink.lock().push(event.clone()));
        events
    }

    fn types(events: &Mutex<Vec<ResilienceEvent>>) -> Vec<EventType> {
        events.lock().iter().map(|e| e.event_type).collect()
    }

    fn server_error() -> ApiError {
        ApiError::Server {
            status: 503,
            message: "unavailable".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_rate_in_struct_literal_still_spaces_calls() {
        let client = ResilientClient::new(ResilientConfig {
            requests_per_minute: 0,
            max_concurrent: 0,
            ..ResilientConfig::default()
        });
        assert_eq!(client.rate_limiter().min_interval(), Duration::from_secs(60));
        assert_eq!(client.queue().max_concurrent(), 1);

        let start = Instant::now();
        client.call(|| async { Ok::<_, ApiError>(()) }).await.unwrap();
        client.call(|| async { Ok::<_, ApiError>(()) }).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[test]
    fn test_client_creation() {
        let client = ResilientClient::with_defaults();
        assert_eq!(client.config().max_concurrent, 2);
        assert_eq!(client.queue().max_concurrent(), 2);
        assert_eq!(client.circuit_breaker().state(), CircuitState::Closed);
        assert_eq!(client.rate_limiter().min_interval(), Duration::from_secs(1));
        assert_eq!(client.retry().config().max_attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_emits_call_success() {
        let client = ResilientClient::new(fast_config());
        let events = record(&client);

        let value = client.call(|| async { Ok::<_, ApiError>(42) }).await.unwrap();

        assert_eq!(value, 42);
        assert_eq!(types(&events), vec![EventType::CallSuccess]);
        assert_eq!(events.lock()[0].detail["attempts"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_is_returned_raw() {
        let client = ResilientClient::new(fast_config());
        let events = record(&client);

        let err = client
            .call(|| async {
                Err::<(), _>(ApiError::Client {
                    status: 404,
                    message: "missing".to_string(),
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ResilienceError::Operation(ApiError::Client { status: 404, .. })));
        assert_eq!(types(&events), vec![EventType::CallFailure]);
        assert_eq!(events.lock()[0].detail["reason"], "error");
        assert_eq!(client.circuit_breaker().failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_disabled_returns_operation_error() {
        let config = ResilientConfig {
            max_attempts: 1,
            ..fast_config()
        };
        let client = ResilientClient::new(config);
        let calls = Arc::new(AtomicU32::new(0));

        let err = client
            .call(|| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(server_error())
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ResilienceError::Operation(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logical_call_counts_once_toward_breaker() {
        let config = ResilientConfig {
            failure_threshold: 2,
            ..fast_config()
        };
        let client = ResilientClient::new(config);

        let err = client
            .call(|| async { Err::<(), _>(server_error()) })
            .await
            .unwrap_err();

        assert_eq!(err.attempts(), Some(3));
        assert_eq!(client.circuit_breaker().failure_count(), 1);
        assert_eq!(client.circuit_breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_error_trips_breaker_without_retry() {
        let client = ResilientClient::new(fast_config());
        let events = record(&client);
        let calls = Arc::new(AtomicU32::new(0));

        let err = client
            .call(|| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(ApiError::RateLimited {
                        retry_after: Some(Duration::from_secs(30)),
                    })
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ResilienceError::Operation(ApiError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            types(&events),
            vec![EventType::CircuitOpen, EventType::CallFailure]
        );
        assert_eq!(events.lock()[0].detail["forced"], true);
        assert_eq!(events.lock()[1].detail["reason"], "quota_exceeded");

        let rejected = client.call(|| async { Ok::<_, ApiError>(()) }).await.unwrap_err();
        match rejected {
            ResilienceError::CircuitOpen(open) => assert_eq!(open.retry_in, Duration::from_secs(30)),
            other => panic!("expected open circuit, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_rejects_calls() {
        let client = ResilientClient::new(fast_config());
        let events = record(&client);
        client.shutdown();

        let err = client.call(|| async { Ok::<_, ApiError>(()) }).await.unwrap_err();

        assert!(err.is_shutdown());
        assert_eq!(events.lock()[0].detail["reason"], "shutdown");
        assert_eq!(client.circuit_breaker().failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_token_never_invokes_operation() {
        let client = ResilientClient::new(fast_config());
        let token = CancellationToken::new();
        token.cancel();
        let calls = Arc::new(AtomicU32::new(0));

        let err = client
            .call_with_cancel(
                || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, ApiError>(())
                    }
                },
                &token,
            )
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_closes_circuit() {
        let client = ResilientClient::new(fast_config());
        client.circuit_breaker().trip(Duration::from_secs(60));

        client.reset();

        assert_eq!(client.circuit_breaker().state(), CircuitState::Closed);
        assert!(client.call(|| async { Ok::<_, ApiError>(()) }).await.is_ok());
    }
}
