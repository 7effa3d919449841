//! Structured logging of resilience events.
//!
//! Forwards events into the `tracing` ecosystem with sensitive fields redacted.

use serde_json::Value;

use super::events::{EventObserver, EventType, ResilienceEvent};
use crate::config::LogLevel;

/// Observer that logs every event through `tracing`.
///
/// Retries and circuit openings are warnings, call failures are errors,
/// circuit closings are info and successes are debug.
pub struct LoggingObserver {
    name: String,
    level: LogLevel,
}

impl LoggingObserver {
    /// Create a new logging observer with the given name.
    ///
    /// # Example
    /// ```
    /// use integrations_resilience::observability::LoggingObserver;
    ///
    /// let observer = LoggingObserver::new("todoist");
    /// ```
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            level: LogLevel::Info,
        }
    }

    /// Set the minimum log level for this observer.
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    fn level_for(event_type: EventType) -> LogLevel {
        match event_type {
            EventType::CallSuccess => LogLevel::Debug,
            EventType::CircuitClose => LogLevel::Info,
            EventType::Retry | EventType::CircuitOpen => LogLevel::Warn,
            EventType::CallFailure => LogLevel::Error,
        }
    }

    fn should_log(&self, level: LogLevel) -> bool {
        level.severity() <= self.level.severity()
    }

    /// Redact sensitive fields from event detail.
    ///
    /// Removes credentials that a consumer may have put in an error message
    /// detail, recursing into nested objects.
    fn redact_sensitive_fields(&self, mut fields: Value) -> Value {
        if let Some(obj) = fields.as_object_mut() {
            let sensitive_keys = [
                "api_key", "apiKey", "key",
                "token", "access_token", "accessToken",
                "secret", "password", "credential",
                "authorization", "auth",
            ];

            for key in &sensitive_keys {
                if obj.contains_key(*key) {
                    obj.insert(key.to_string(), Value::String("***REDACTED***".to_string()));
                }
            }

            for (_, value) in obj.iter_mut() {
                if value.is_object() {
                    *value = self.redact_sensitive_fields(value.take());
                }
            }
        }

        fields
    }
}

impl EventObserver for LoggingObserver {
    fn on_event(&self, event: &ResilienceEvent) {
        let level = Self::level_for(event.event_type);
        if !self.should_log(level) {
            return;
        }

        let detail = self.redact_sensitive_fields(event.detail.clone());
        let name = self.name.as_str();
        let event_type = event.event_type.as_str();

        match level {
            LogLevel::Error => tracing::error!(observer = name, event_type, detail = %detail, "resilience event"),
            LogLevel::Warn => tracing::warn!(observer = name, event_type, detail = %detail, "resilience event"),
            LogLevel::Info => tracing::info!(observer = name, event_type, detail = %detail, "resilience event"),
            LogLevel::Debug => tracing::debug!(observer = name, event_type, detail = %detail, "resilience event"),
            LogLevel::Trace => tracing::trace!(observer = name, event_type, detail = %detail, "resilience event"),
        }
    }
}
