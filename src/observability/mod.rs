//! Observability layer for resilient calls.
//!
//! Every call made through a [`ResilientClient`](crate::resilience::ResilientClient)
//! publishes [`ResilienceEvent`]s. This module provides the event model and
//! observers that forward those events to:
//! - **Logging**: structured `tracing` output with sensitive data redaction
//! - **Metrics**: counters, histograms and gauges
//! - **Audit**: a hash-chained JSON-lines file
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use integrations_resilience::observability::{
//!     LoggingObserver, ResilienceMetrics, TracingMetricsRecorder,
//! };
//! use integrations_resilience::resilience::ResilientClient;
//!
//! let client = ResilientClient::with_defaults();
//! client.on_event(LoggingObserver::new("todoist"));
//! client.on_event(ResilienceMetrics::new(
//!     "resilience",
//!     "todoist",
//!     Arc::new(TracingMetricsRecorder::new()),
//! ));
//! ```

pub mod audit;
pub mod events;
pub mod logging;
pub mod metrics;

pub use audit::{AuditEntry, AuditError, AuditLog, GENESIS_HASH};
pub use events::{EventBus, EventObserver, EventType, ResilienceEvent};
pub use logging::LoggingObserver;
pub use metrics::{MetricsRecorder, NoopMetricsRecorder, ResilienceMetrics, TracingMetricsRecorder};
