//! Resilience layer for outbound API calls.
//!
//! Provides the individual building blocks and a [`ResilientClient`] that
//! composes them:
//! - **Concurrency gate**: FIFO-bounded number of in-flight operations
//! - **Rate limiting**: even spacing of call starts
//! - **Retry logic**: exponential backoff for transient failures
//! - **Circuit breaker**: fail fast while a dependency is unhealthy

mod bounded_queue;
mod circuit_breaker;
mod client;
mod rate_limiter;
mod retry;

pub use bounded_queue::{BoundedQueue, QueueClosedError, QueuePermit};
pub use circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitTransition,
    MAX_OPEN_DURATION,
};
pub use client::ResilientClient;
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use retry::{RetryConfig, RetryExecutor, RetryFailure};
