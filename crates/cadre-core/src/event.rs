use serde::{Deserialize, Serialize};

use crate::traits::TelemetrySink;

/// A recorded orchestration event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationEvent {
    pub name: String,
    pub attributes: serde_json::Value,
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events; publishing never blocks or fails.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<OrchestrationEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<OrchestrationEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl TelemetrySink for EventBus {
    fn record(&self, event: &str, attributes: serde_json::Value) {
        // Ignore error if no receivers
        let _ = self.tx.send(OrchestrationEvent {
            name: event.to_string(),
            attributes,
        });
    }
}

/// Sink that forwards events to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn record(&self, event: &str, attributes: serde_json::Value) {
        tracing::debug!(event, %attributes, "orchestration event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_delivers() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.record("task_start", serde_json::json!({"node_id": "n1"}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, "task_start");
        assert_eq!(event.attributes["node_id"], "n1");
    }

    #[test]
    fn test_record_without_subscribers_is_noop() {
        let bus = EventBus::default();
        bus.record("ignored", serde_json::json!({}));
    }
}
