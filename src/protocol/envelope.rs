//! Message envelopes with correlation ids for tracking agent communication.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::types::{MessageType, Payload, Priority};

/// Default correlated-wait deadline when the sender sets none.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default retry budget for correlated sends.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delivery metadata attached to every envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Creation timestamp (unix ms)
    pub timestamp: i64,
    /// Priority level
    #[serde(default)]
    pub priority: Priority,
    /// Whether the sender is waiting on a correlated reply
    #[serde(default)]
    pub requires_response: bool,
    /// Correlated-wait deadline in milliseconds (None = bus default)
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Delivery attempts consumed so far. Only the dispatcher increments
    /// this, and never past the configured retry budget.
    #[serde(default)]
    pub retry_count: u32,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            timestamp: current_timestamp(),
            priority: Priority::Medium,
            requires_response: false,
            timeout_ms: None,
            retry_count: 0,
        }
    }
}

/// The typed unit of communication between agents.
///
/// Immutable after construction except for `metadata.retry_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique message id (ULID)
    pub id: String,
    /// Original message id this envelope replies to
    pub correlation_id: Option<String>,
    /// Sender agent id
    pub from: String,
    /// Recipient agent ids (never empty)
    pub to: Vec<String>,
    /// Typed payload; its tag is the message type
    pub payload: Payload,
    /// Delivery metadata
    pub metadata: Metadata,
}

impl Envelope {
    /// Create an envelope from one agent to another.
    pub fn new(from: impl Into<String>, to: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: generate_id(),
            correlation_id: None,
            from: from.into(),
            to: vec![to.into()],
            payload,
            metadata: Metadata::default(),
        }
    }

    /// Create an envelope addressed to several agents.
    pub fn to_many(from: impl Into<String>, to: Vec<String>, payload: Payload) -> Self {
        Self {
            id: generate_id(),
            correlation_id: None,
            from: from.into(),
            to,
            payload,
            metadata: Metadata::default(),
        }
    }

    /// Message kind, read off the payload tag.
    pub fn kind(&self) -> MessageType {
        self.payload.kind()
    }

    /// Mark this envelope as expecting a correlated reply.
    pub fn expecting_response(mut self, timeout_ms: Option<u64>) -> Self {
        self.metadata.requires_response = true;
        self.metadata.timeout_ms = timeout_ms;
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.metadata.priority = priority;
        self
    }

    /// Build a reply correlated to this envelope.
    pub fn create_response(&self, from: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: generate_id(),
            correlation_id: Some(self.id.clone()),
            from: from.into(),
            to: vec![self.from.clone()],
            payload,
            metadata: Metadata::default(),
        }
    }

    /// Check structural invariants before the envelope enters the bus.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::InvalidEnvelope("empty message id".to_string()));
        }
        if self.from.is_empty() {
            return Err(Error::InvalidEnvelope("missing sender".to_string()));
        }
        if self.to.is_empty() || self.to.iter().any(|t| t.is_empty()) {
            return Err(Error::InvalidEnvelope(
                "recipient list must be non-empty".to_string(),
            ));
        }
        match self.kind() {
            MessageType::Response | MessageType::Feedback if self.correlation_id.is_none() => Err(
                Error::InvalidEnvelope(format!("{} without correlation id", self.kind())),
            ),
            _ => Ok(()),
        }
    }

    /// Check if this envelope is addressed to a specific agent.
    pub fn is_for(&self, agent_id: &str) -> bool {
        self.to.iter().any(|a| a == agent_id)
    }
}

/// Builder for envelopes with a fluent API.
pub struct EnvelopeBuilder {
    from: String,
    to: Vec<String>,
    payload: Option<Payload>,
    correlation_id: Option<String>,
    priority: Priority,
    requires_response: bool,
    timeout_ms: Option<u64>,
}

impl EnvelopeBuilder {
    /// Start building an envelope from an agent.
    pub fn from(agent_id: impl Into<String>) -> Self {
        Self {
            from: agent_id.into(),
            to: Vec::new(),
            payload: None,
            correlation_id: None,
            priority: Priority::Medium,
            requires_response: false,
            timeout_ms: None,
        }
    }

    /// Address to a single agent.
    pub fn to(mut self, agent_id: impl Into<String>) -> Self {
        self.to.push(agent_id.into());
        self
    }

    /// Address to multiple agents.
    pub fn to_many(mut self, agent_ids: Vec<String>) -> Self {
        self.to.extend(agent_ids);
        self
    }

    /// Set the payload.
    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Set the correlation id.
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Set the priority.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Expect a correlated reply within the given deadline.
    pub fn requires_response(mut self, timeout_ms: Option<u64>) -> Self {
        self.requires_response = true;
        self.timeout_ms = timeout_ms;
        self
    }

    /// Build and validate the envelope.
    pub fn build(self) -> Result<Envelope> {
        let payload = self
            .payload
            .ok_or_else(|| Error::InvalidEnvelope("payload is required".to_string()))?;

        let envelope = Envelope {
            id: generate_id(),
            correlation_id: self.correlation_id,
            from: self.from,
            to: self.to,
            payload,
            metadata: Metadata {
                timestamp: current_timestamp(),
                priority: self.priority,
                requires_response: self.requires_response,
                timeout_ms: self.timeout_ms,
                retry_count: 0,
            },
        };
        envelope.validate()?;
        Ok(envelope)
    }
}

pub(crate) fn generate_id() -> String {
    ulid::Ulid::new().to_string()
}

pub(crate) fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_creation() {
        let envelope = Envelope::new("bus", "designer-1", Payload::request("layout", json!({})));

        assert_eq!(envelope.from, "bus");
        assert_eq!(envelope.to, vec!["designer-1".to_string()]);
        assert!(!envelope.id.is_empty());
        assert!(envelope.correlation_id.is_none());
        assert_eq!(envelope.kind(), MessageType::Request);
        assert!(envelope.validate().is_ok());
    }

    #[test]
    fn test_envelope_builder() {
        let envelope = EnvelopeBuilder::from("architect-1")
            .to("security-1")
            .payload(Payload::request("audit", json!({"target": "api"})))
            .priority(Priority::High)
            .requires_response(Some(5_000))
            .build()
            .unwrap();

        assert_eq!(envelope.from, "architect-1");
        assert!(envelope.metadata.requires_response);
        assert_eq!(envelope.metadata.timeout_ms, Some(5_000));
        assert_eq!(envelope.metadata.priority, Priority::High);
        assert_eq!(envelope.metadata.retry_count, 0);
    }

    #[test]
    fn test_empty_recipients_rejected() {
        let result = EnvelopeBuilder::from("a1")
            .payload(Payload::notification("ping", json!(null)))
            .build();
        assert!(matches!(result, Err(Error::InvalidEnvelope(_))));
    }

    #[test]
    fn test_response_creation() {
        let request = Envelope::new("a1", "a2", Payload::request("review", json!({})))
            .expecting_response(None);
        let response = request.create_response("a2", Payload::response(json!({"ok": true})));

        assert_eq!(response.correlation_id, Some(request.id.clone()));
        assert_eq!(response.to, vec!["a1".to_string()]);
        assert_eq!(response.from, "a2");
        assert!(response.validate().is_ok());
    }

    #[test]
    fn test_uncorrelated_response_rejected() {
        let envelope = Envelope::new("a2", "a1", Payload::response(json!({})));
        assert!(envelope.validate().is_err());
    }

    #[test]
    fn test_is_for() {
        let envelope = Envelope::to_many(
            "admin-1",
            vec!["designer-1".to_string(), "validator-1".to_string()],
            Payload::notification("release", json!({})),
        );
        assert!(envelope.is_for("designer-1"));
        assert!(envelope.is_for("validator-1"));
        assert!(!envelope.is_for("security-1"));
    }
}
