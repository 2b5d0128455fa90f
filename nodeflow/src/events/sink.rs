//! Event sink trait and implementations.

use parking_lot::RwLock;
use tracing::{debug, info, Level};

/// Receives lifecycle events from runners.
///
/// Sinks are called from worker threads, so implementations must be cheap
/// and must never fail the run.
pub trait EventSink: Send + Sync {
    /// Emits an event.
    ///
    /// # Arguments
    ///
    /// * `event_type` - The type of event (e.g., "node.started")
    /// * `data` - Optional event data
    fn emit(&self, event_type: &str, data: Option<serde_json::Value>);
}

/// A no-op event sink that discards all events.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}
}

/// An event sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::DEBUG }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates an info-level logging sink.
    #[must_use]
    pub fn info() -> Self {
        Self::new(Level::INFO)
    }
}

impl EventSink for LoggingEventSink {
    fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        if self.level == Level::INFO {
            info!(event_type = %event_type, event_data = ?data, "Event: {}", event_type);
        } else {
            debug!(event_type = %event_type, event_data = ?data, "Event: {}", event_type);
        }
    }
}

/// A collecting event sink, mostly useful in tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<(String, Option<serde_json::Value>)>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<serde_json::Value>)> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns events matching a type prefix.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<(String, Option<serde_json::Value>)> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t.starts_with(type_prefix))
            .cloned()
            .collect()
    }

    /// Returns the `node` field of every event of the given type, in order.
    #[must_use]
    pub fn nodes_for(&self, event_type: &str) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t == event_type)
            .filter_map(|(_, data)| {
                data.as_ref()
                    .and_then(|d| d.get("node"))
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string)
            })
            .collect()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_sink() {
        let sink = NoOpEventSink;
        sink.emit("test", Some(serde_json::json!({"x": 1})));
    }

    #[test]
    fn test_logging_sink() {
        let sink = LoggingEventSink::info();
        sink.emit("node.started", Some(serde_json::json!({"node": "split"})));
        LoggingEventSink::default().emit("node.completed", None);
    }

    #[test]
    fn test_collecting_sink_filter() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());
        sink.emit("node.started", Some(serde_json::json!({"node": "a"})));
        sink.emit("node.completed", Some(serde_json::json!({"node": "a"})));
        sink.emit("pipeline.completed", None);

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.events_of_type("node.").len(), 2);
        assert_eq!(sink.nodes_for("node.started"), vec!["a".to_string()]);
    }
}
