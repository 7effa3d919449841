//! # Integrations Resilience
//!
//! Resilient call core for outbound API integrations.
//!
//! ## Features
//!
//! - Bounded concurrency with FIFO admission
//! - Even request spacing under a per-minute rate limit
//! - Retry with capped exponential backoff
//! - Circuit breaker with lazy half-open recovery and quota-aware tripping
//! - Cancellation of in-flight calls
//! - Observable events for logging, metrics and a hash-chained audit trail
//! - Recurring background jobs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use integrations_resilience::{ApiError, LoggingObserver, ResilientClient, ResilientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ResilientConfig::from_env("TODOIST")?;
//!     let client = ResilientClient::new(config);
//!     client.on_event(LoggingObserver::new("todoist"));
//!
//!     let tasks = client
//!         .call(|| async { Ok::<_, ApiError>(vec!["write report"]) })
//!         .await?;
//!     println!("{} tasks", tasks.len());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - `resilience` - Rate limiter, concurrency gate, retry, circuit breaker and the composed client
//! - `config` - Client configuration, builder and environment loading
//! - `error` - Error types, classification and HTTP status mapping
//! - `observability` - Events, logging, metrics and audit observers
//! - `scheduler` - Recurring background jobs

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod observability;
pub mod resilience;
pub mod scheduler;

// Re-exports for convenience
pub use config::{LogLevel, ResilientConfig, ResilientConfigBuilder};
pub use error::{
    map_http_status, ApiError, CircuitOpenError, Classify, ConfigurationError, ResilienceError,
    ResilienceResult,
};
pub use observability::{
    AuditLog, EventObserver, EventType, LoggingObserver, ResilienceEvent, ResilienceMetrics,
};
pub use resilience::{
    BoundedQueue, CircuitBreaker, CircuitBreakerConfig, CircuitState, RateLimiter,
    RateLimiterConfig, ResilientClient, RetryConfig, RetryExecutor,
};
pub use scheduler::{ScheduledJob, Scheduler};
