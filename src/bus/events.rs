//! Local event broadcast for read-only observers.
//!
//! UI or observability consumers subscribe here; they receive registry
//! changes and notifications but cannot mutate registry state through this
//! channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::protocol::AgentStatus;

/// Observer buffer; a lagging receiver drops oldest events.
const EVENT_CAPACITY: usize = 256;

/// Events emitted by a bus instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    AgentRegistered { id: String },
    AgentUnregistered { id: String },
    StatusChanged { id: String, status: AgentStatus },
    Notification { from: String, event: String, body: Value },
}

/// Observer channel held by the bus as an injected dependency rather than
/// inherited emitter behavior.
#[derive(Clone)]
pub struct Observers {
    tx: broadcast::Sender<BusEvent>,
}

impl Observers {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Subscribe to all subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Having no subscribers is not an error.
    pub fn emit(&self, event: BusEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for Observers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_emit_reaches_subscriber() {
        let observers = Observers::new();
        let mut rx = observers.subscribe();

        observers.emit(BusEvent::AgentRegistered {
            id: "d1".to_string(),
        });
        observers.emit(BusEvent::Notification {
            from: "d1".to_string(),
            event: "render_done".to_string(),
            body: json!({"frames": 3}),
        });

        assert_eq!(
            rx.recv().await.unwrap(),
            BusEvent::AgentRegistered {
                id: "d1".to_string()
            }
        );
        assert!(matches!(
            rx.recv().await.unwrap(),
            BusEvent::Notification { .. }
        ));
    }

    #[test]
    fn test_emit_without_subscribers_is_ok() {
        let observers = Observers::new();
        observers.emit(BusEvent::AgentUnregistered {
            id: "d1".to_string(),
        });
    }
}
