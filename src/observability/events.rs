//! Resilience events and the observer hook.
//!
//! Every call outcome, scheduled retry and circuit transition is published
//! as a [`ResilienceEvent`] to the observers registered on a client.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Kind of a resilience event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// An attempt failed and another one is scheduled.
    Retry,
    /// The circuit breaker opened.
    CircuitOpen,
    /// The circuit breaker closed after a successful trial.
    CircuitClose,
    /// A logical call succeeded.
    CallSuccess,
    /// A logical call failed; the error is about to be returned to the caller.
    CallFailure,
}

impl EventType {
    /// Wire name of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Retry => "retry",
            EventType::CircuitOpen => "circuit_open",
            EventType::CircuitClose => "circuit_close",
            EventType::CallSuccess => "call_success",
            EventType::CallFailure => "call_failure",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single observable event: `{timestamp, type, detail}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilienceEvent {
    /// When the event happened (RFC 3339 on the wire).
    pub timestamp: DateTime<Utc>,
    /// Event kind.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Event-specific structured detail.
    pub detail: Value,
}

impl ResilienceEvent {
    /// Creates an event stamped with the current time.
    pub fn new(event_type: EventType, detail: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            detail,
        }
    }
}

/// Receives resilience events.
///
/// Observers are called synchronously on the task that produced the event
/// and must not block for long.
pub trait EventObserver: Send + Sync {
    /// Handles one event.
    fn on_event(&self, event: &ResilienceEvent);
}

impl<F> EventObserver for F
where
    F: Fn(&ResilienceEvent) + Send + Sync,
{
    fn on_event(&self, event: &ResilienceEvent) {
        self(event);
    }
}

/// Fan-out of events to registered observers.
#[derive(Default)]
pub struct EventBus {
    observers: RwLock<Vec<Arc<dyn EventObserver>>>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer.
    pub fn subscribe(&self, observer: Arc<dyn EventObserver>) {
        self.observers.write().push(observer);
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    /// Returns true if no observer is registered.
    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Builds an event and publishes it to every observer.
    pub fn emit(&self, event_type: EventType, detail: Value) {
        self.publish(&ResilienceEvent::new(event_type, detail));
    }

    /// Publishes an event to every observer, in registration order.
    pub fn publish(&self, event: &ResilienceEvent) {
        // Snapshot so observers may subscribe from inside a callback.
        let observers: Vec<_> = self.observers.read().clone();
        for observer in observers {
            observer.on_event(event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("observers", &self.len())
            .finish()
    }
}
