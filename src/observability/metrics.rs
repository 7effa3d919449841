//! Metrics recording for resilient calls.
//!
//! Provides trait-based metrics recording with support for counters, histograms, and gauges,
//! and an event observer that turns resilience events into metrics.

use std::collections::HashMap;
use std::sync::Arc;

use super::events::{EventObserver, EventType, ResilienceEvent};

/// Metrics recorder trait.
///
/// This trait provides methods for recording various types of metrics
/// (counters, histograms, gauges) with optional labels.
pub trait MetricsRecorder: Send + Sync {
    /// Increment a counter metric.
    ///
    /// # Arguments
    /// * `name` - The metric name
    /// * `labels` - Optional labels as key-value pairs
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]);

    /// Record a histogram value.
    ///
    /// Histograms track distributions of values (e.g., call durations, retry delays).
    ///
    /// # Arguments
    /// * `name` - The metric name
    /// * `value` - The value to record
    /// * `labels` - Optional labels as key-value pairs
    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]);

    /// Record a gauge value.
    ///
    /// Gauges represent point-in-time values that can go up or down.
    ///
    /// # Arguments
    /// * `name` - The metric name
    /// * `value` - The current value
    /// * `labels` - Optional labels as key-value pairs
    fn record_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]);
}

/// Resilience metrics derived from client events.
///
/// Register it on a client with
/// [`ResilientClient::on_event`](crate::resilience::ResilientClient::on_event).
pub struct ResilienceMetrics {
    prefix: String,
    service: String,
    recorder: Arc<dyn MetricsRecorder>,
}

impl ResilienceMetrics {
    /// Create a new resilience metrics observer.
    ///
    /// # Arguments
    /// * `prefix` - Metric name prefix (e.g., "resilience")
    /// * `service` - Value of the `service` label on every metric
    /// * `recorder` - The underlying metrics recorder implementation
    pub fn new(prefix: &str, service: &str, recorder: Arc<dyn MetricsRecorder>) -> Self {
        Self {
            prefix: prefix.to_string(),
            service: service.to_string(),
            recorder,
        }
    }

    /// Record the outcome of a logical call.
    ///
    /// # Arguments
    /// * `outcome` - "success" or "failure"
    /// * `reason` - Failure reason, or "none" on success
    /// * `duration_ms` - Time from admission to outcome, if known
    pub fn record_call(&self, outcome: &str, reason: &str, duration_ms: Option<u64>) {
        let service = self.service.as_str();
        self.recorder.increment_counter(
            &format!("{}_calls_total", self.prefix),
            &[("service", service), ("outcome", outcome), ("reason", reason)],
        );

        if let Some(duration_ms) = duration_ms {
            self.recorder.record_histogram(
                &format!("{}_call_duration_ms", self.prefix),
                duration_ms as f64,
                &[("service", service), ("outcome", outcome)],
            );
        }
    }

    /// Record a scheduled retry.
    ///
    /// # Arguments
    /// * `attempt` - The failed attempt number
    /// * `delay_ms` - Backoff before the next attempt
    pub fn record_retry(&self, attempt: u64, delay_ms: u64) {
        let attempt_str = attempt.to_string();
        let service = self.service.as_str();
        self.recorder.increment_counter(
            &format!("{}_retries_total", self.prefix),
            &[("service", service), ("attempt", &attempt_str)],
        );

        self.recorder.record_histogram(
            &format!("{}_retry_delay_ms", self.prefix),
            delay_ms as f64,
            &[("service", service)],
        );
    }

    /// Record circuit breaker state change.
    ///
    /// # Arguments
    /// * `state` - The new circuit breaker state (open, closed)
    pub fn record_circuit_breaker_state(&self, state: &str) {
        let service = self.service.as_str();
        self.recorder.increment_counter(
            &format!("{}_circuit_breaker_state_changes_total", self.prefix),
            &[("service", service), ("state", state)],
        );

        let open = if state == "open" { 1.0 } else { 0.0 };
        self.recorder.record_gauge(
            &format!("{}_circuit_breaker_open", self.prefix),
            open,
            &[("service", service)],
        );
    }
}

impl EventObserver for ResilienceMetrics {
    fn on_event(&self, event: &ResilienceEvent) {
        let detail = &event.detail;
        let field = |name: &str| detail.get(name).and_then(|v| v.as_u64());

        match event.event_type {
            EventType::CallSuccess => self.record_call("success", "none", field("duration_ms")),
            EventType::CallFailure => {
                let reason = detail
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .unwrap_or("error");
                self.record_call("failure", reason, field("duration_ms"));
            }
            EventType::Retry => {
                self.record_retry(field("attempt").unwrap_or(0), field("delay_ms").unwrap_or(0))
            }
            EventType::CircuitOpen => self.record_circuit_breaker_state("open"),
            EventType::CircuitClose => self.record_circuit_breaker_state("closed"),
        }
    }
}

/// Tracing-based metrics recorder implementation.
///
/// This recorder emits metrics as tracing events, which can be consumed
/// by various tracing subscribers.
pub struct TracingMetricsRecorder;

impl TracingMetricsRecorder {
    /// Create a new tracing metrics recorder.
    pub fn new() -> Self {
        Self
    }
}

impl Default for TracingMetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder for TracingMetricsRecorder {
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        let labels_map: HashMap<&str, &str> = labels.iter().copied().collect();
        tracing::info!(
            metric_type = "counter",
            metric_name = name,
            metric_value = 1,
            labels = ?labels_map,
            "Counter incremented"
        );
    }

    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let labels_map: HashMap<&str, &str> = labels.iter().copied().collect();
        tracing::info!(
            metric_type = "histogram",
            metric_name = name,
            metric_value = value,
            labels = ?labels_map,
            "Histogram recorded"
        );
    }

    fn record_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let labels_map: HashMap<&str, &str> = labels.iter().copied().collect();
        tracing::info!(
            metric_type = "gauge",
            metric_name = name,
            metric_value = value,
            labels = ?labels_map,
            "Gauge recorded"
        );
    }
}

/// No-op metrics recorder, for environments where metrics are disabled.
#[derive(Debug, Default)]
pub struct NoopMetricsRecorder;

impl MetricsRecorder for NoopMetricsRecorder {
    fn increment_counter(&self, _name: &str, _labels: &[(&str, &str)]) {}

    fn record_histogram(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}

    fn record_gauge(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    type Labels = Vec<(String, String)>;

    #[derive(Default)]
    struct TestMetricsRecorder {
        counters: Mutex<Vec<(String, Labels)>>,
        histograms: Mutex<Vec<(String, f64)>>,
        gauges: Mutex<Vec<(String, f64)>>,
    }

    impl MetricsRecorder for TestMetricsRecorder {
        fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
            let labels_owned: Labels = labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            self.counters.lock().push((name.to_string(), labels_owned));
        }

        fn record_histogram(&self, name: &str, value: f64, _labels: &[(&str, &str)]) {
            self.histograms.lock().push((name.to_string(), value));
        }

        fn record_gauge(&self, name: &str, value: f64, _labels: &[(&str, &str)]) {
            self.gauges.lock().push((name.to_string(), value));
        }
    }

    fn label<'a>(labels: &'a Labels, key: &str) -> Option<&'a str> {
        labels
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn metrics() -> (Arc<TestMetricsRecorder>, ResilienceMetrics) {
        let recorder = Arc::new(TestMetricsRecorder::default());
        let metrics = ResilienceMetrics::new("resilience", "todoist", recorder.clone());
        (recorder, metrics)
    }

    #[test]
    fn test_call_success_event() {
        let (recorder, metrics) = metrics();

        metrics.on_event(&ResilienceEvent::new(
            EventType::CallSuccess,
            json!({"attempts": 1, "duration_ms": 120}),
        ));

        let counters = recorder.counters.lock();
        assert_eq!(counters.len(), 1);
        assert_eq!(counters[0].0, "resilience_calls_total");
        assert_eq!(label(&counters[0].1, "outcome"), Some("success"));
        assert_eq!(label(&counters[0].1, "service"), Some("todoist"));
        assert_eq!(
            *recorder.histograms.lock(),
            vec![("resilience_call_duration_ms".to_string(), 120.0)]
        );
    }

    #[test]
    fn test_call_failure_reason_label() {
        let (recorder, metrics) = metrics();

        metrics.on_event(&ResilienceEvent::new(
            EventType::CallFailure,
            json!({"reason": "circuit_open"}),
        ));

        let counters = recorder.counters.lock();
        assert_eq!(label(&counters[0].1, "outcome"), Some("failure"));
        assert_eq!(label(&counters[0].1, "reason"), Some("circuit_open"));
        assert!(recorder.histograms.lock().is_empty());
    }

    #[test]
    fn test_retry_event() {
        let (recorder, metrics) = metrics();

        metrics.on_event(&ResilienceEvent::new(
            EventType::Retry,
            json!({"attempt": 2, "delay_ms": 2000, "error": "timeout"}),
        ));

        let counters = recorder.counters.lock();
        assert_eq!(counters[0].0, "resilience_retries_total");
        assert_eq!(label(&counters[0].1, "attempt"), Some("2"));
        assert_eq!(
            *recorder.histograms.lock(),
            vec![("resilience_retry_delay_ms".to_string(), 2000.0)]
        );
    }

    #[test]
    fn test_circuit_state_changes() {
        let (recorder, metrics) = metrics();

        metrics.on_event(&ResilienceEvent::new(EventType::CircuitOpen, json!({})));
        metrics.on_event(&ResilienceEvent::new(EventType::CircuitClose, json!({})));

        let states: Vec<_> = recorder
            .counters
            .lock()
            .iter()
            .map(|(_, labels)| label(labels, "state").map(str::to_string))
            .collect();
        assert_eq!(states, vec![Some("open".to_string()), Some("closed".to_string())]);
        assert_eq!(
            *recorder.gauges.lock(),
            vec![
                ("resilience_circuit_breaker_open".to_string(), 1.0),
                ("resilience_circuit_breaker_open".to_string(), 0.0),
            ]
        );
    }

    #[test]
    fn test_recorders_do_not_panic() {
        let tracing_recorder = TracingMetricsRecorder::new();
        tracing_recorder.increment_counter("test_counter", &[("key", "value")]);
        tracing_recorder.record_histogram("test_histogram", 1.5, &[]);
        tracing_recorder.record_gauge("test_gauge", 3.0, &[]);

        let noop = NoopMetricsRecorder;
        noop.increment_counter("test_counter", &[]);
    }
}
