//! Transport contract for envelope delivery.
//!
//! The durable broker is an external collaborator; this module only pins
//! down the contract the bus needs from it: per-channel publish with an
//! ack-or-error result, and subscription. Delivery is at-least-once and
//! unordered, so handlers must tolerate duplicates within the retry window.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::protocol::Envelope;

/// Per-subscriber buffer before publishes start failing.
const CHANNEL_CAPACITY: usize = 64;

/// The channel an agent receives on.
pub fn agent_channel(agent_id: &str) -> String {
    format!("agent.{agent_id}")
}

/// Message transport the dispatcher publishes through.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver an envelope to a channel. `Ok` is the transport's ack; an
    /// error means the publish did not take effect.
    async fn publish(&self, channel: &str, envelope: &Envelope) -> Result<()>;

    /// Subscribe to a channel, receiving every envelope published to it
    /// after this call.
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<Envelope>>;
}

/// In-process transport for tests and single-process deployments.
///
/// One subscriber per channel; a publish to a channel nobody subscribed to
/// fails, which is exactly the failure path the dispatcher's retry loop
/// exists for.
#[derive(Default)]
pub struct LocalTransport {
    channels: Mutex<HashMap<String, mpsc::Sender<Envelope>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> Result<mpsc::Sender<Envelope>> {
        let channels = self
            .channels
            .lock()
            .map_err(|_| Error::Transport("channel map poisoned".to_string()))?;
        channels
            .get(channel)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("no subscriber on channel '{channel}'")))
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn publish(&self, channel: &str, envelope: &Envelope) -> Result<()> {
        let sender = self.sender(channel)?;
        sender
            .send(envelope.clone())
            .await
            .map_err(|_| Error::Transport(format!("subscriber on '{channel}' is gone")))?;
        tracing::trace!(channel = %channel, id = %envelope.id, "Published envelope");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<Envelope>> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| Error::Transport("channel map poisoned".to_string()))?;
        channels.insert(channel.to_string(), tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Payload;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let transport = LocalTransport::new();
        let mut rx = transport.subscribe(&agent_channel("d1")).await.unwrap();

        let envelope = Envelope::new("bus", "d1", Payload::notification("hello", json!({})));
        transport
            .publish(&agent_channel("d1"), &envelope)
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, envelope.id);
    }

    #[tokio::test]
    async fn test_publish_without_subscriber_fails() {
        let transport = LocalTransport::new();
        let envelope = Envelope::new("bus", "d1", Payload::notification("hello", json!({})));
        let result = transport.publish(&agent_channel("d1"), &envelope).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
