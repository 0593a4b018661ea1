//! Message types for the agent coordination protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message type classification. Closed set; both ends of the wire must
/// recognize every variant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Request expecting a capability-matched recipient
    Request,
    /// Response to a correlated request
    Response,
    /// One-way event, never correlated
    Notification,
    /// Directory lookup answered by the bus itself
    Query,
    /// Evaluation of earlier work, resolves a correlated wait
    Feedback,
    /// Vote toward a shared decision
    ConsensusVote,
    /// Resolution proposal for a recorded conflict
    ConflictResolution,
    /// Agent status change announcement
    StatusUpdate,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Notification => "notification",
            MessageType::Query => "query",
            MessageType::Feedback => "feedback",
            MessageType::ConsensusVote => "consensus_vote",
            MessageType::ConflictResolution => "conflict_resolution",
            MessageType::StatusUpdate => "status_update",
        };
        write!(f, "{}", s)
    }
}

/// Message priority levels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low = 0,
    Medium = 1,
    High = 2,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

/// Specialized agent roles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Designer,
    Architect,
    CodeImplementer,
    Security,
    Performance,
    Admin,
    Validator,
    /// Escape hatch for roles added without a crate release.
    Custom(String),
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentType::Designer => write!(f, "designer"),
            AgentType::Architect => write!(f, "architect"),
            AgentType::CodeImplementer => write!(f, "code_implementer"),
            AgentType::Security => write!(f, "security"),
            AgentType::Performance => write!(f, "performance"),
            AgentType::Admin => write!(f, "admin"),
            AgentType::Validator => write!(f, "validator"),
            AgentType::Custom(s) => write!(f, "{}", s),
        }
    }
}

/// Agent lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Unregistered,
    Idle,
    Active,
    Busy,
    Error,
}

impl AgentStatus {
    /// State machine guard. Register/unregister transitions go through the
    /// registry directly; this covers status changes carried by messages.
    ///
    /// `idle <-> active <-> busy` rotate freely; `error` is entered from any
    /// state and left only by an explicit status update.
    pub fn can_transition(self, next: AgentStatus) -> bool {
        use AgentStatus::*;
        match (self, next) {
            (Unregistered, _) | (_, Unregistered) => false,
            (_, Error) => true,
            (Error, Idle) | (Error, Active) | (Error, Busy) => true,
            (a, b) if a == b => true,
            (Idle, Active) | (Active, Idle) => true,
            (Active, Busy) | (Busy, Active) => true,
            (Idle, Busy) | (Busy, Idle) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Unregistered => "unregistered",
            AgentStatus::Idle => "idle",
            AgentStatus::Active => "active",
            AgentStatus::Busy => "busy",
            AgentStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Directory lookups a Query message can carry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RegistryQuery {
    /// Any one agent of the given role.
    ByType(AgentType),
    /// Any one agent advertising the capability.
    ByCapability(String),
    /// Status projection for a specific agent id.
    Status(String),
    /// Full directory listing.
    ActiveAgents,
}

/// Typed message payload. The serde tag doubles as the wire-level message
/// type, so untyped payloads never reach handler code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Request {
        /// Capability tag used to pick a recipient when none is named.
        capability: String,
        body: Value,
    },
    Response {
        body: Value,
    },
    Notification {
        event: String,
        body: Value,
    },
    Query {
        query: RegistryQuery,
    },
    Feedback {
        body: Value,
        /// Set when the feedback reports a failure; rejects the waiting caller.
        error: Option<String>,
    },
    ConsensusVote {
        decision_id: String,
        approve: bool,
        comment: Option<String>,
    },
    ConflictResolution {
        conflict_id: String,
        proposal: Value,
    },
    StatusUpdate {
        status: AgentStatus,
    },
}

impl Payload {
    /// The message kind this payload belongs to.
    pub fn kind(&self) -> MessageType {
        match self {
            Payload::Request { .. } => MessageType::Request,
            Payload::Response { .. } => MessageType::Response,
            Payload::Notification { .. } => MessageType::Notification,
            Payload::Query { .. } => MessageType::Query,
            Payload::Feedback { .. } => MessageType::Feedback,
            Payload::ConsensusVote { .. } => MessageType::ConsensusVote,
            Payload::ConflictResolution { .. } => MessageType::ConflictResolution,
            Payload::StatusUpdate { .. } => MessageType::StatusUpdate,
        }
    }

    /// Build a request payload.
    pub fn request(capability: impl Into<String>, body: Value) -> Self {
        Payload::Request {
            capability: capability.into(),
            body,
        }
    }

    /// Build a response payload.
    pub fn response(body: Value) -> Self {
        Payload::Response { body }
    }

    /// Build a notification payload.
    pub fn notification(event: impl Into<String>, body: Value) -> Self {
        Payload::Notification {
            event: event.into(),
            body,
        }
    }

    /// Build a success feedback payload.
    pub fn feedback(body: Value) -> Self {
        Payload::Feedback { body, error: None }
    }

    /// Build a failure feedback payload.
    pub fn feedback_error(body: Value, error: impl Into<String>) -> Self {
        Payload::Feedback {
            body,
            error: Some(error.into()),
        }
    }

    /// Build a status update payload.
    pub fn status_update(status: AgentStatus) -> Self {
        Payload::StatusUpdate { status }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_kind() {
        let p = Payload::request("render", json!({"page": 1}));
        assert_eq!(p.kind(), MessageType::Request);

        let p = Payload::status_update(AgentStatus::Busy);
        assert_eq!(p.kind(), MessageType::StatusUpdate);
    }

    #[test]
    fn test_payload_wire_tag() {
        let p = Payload::notification("deploy_done", json!({"release": "1.2.0"}));
        let wire = serde_json::to_value(&p).unwrap();
        assert_eq!(wire["type"], "notification");
        assert_eq!(wire["event"], "deploy_done");

        let back: Payload = serde_json::from_value(wire).unwrap();
        assert_eq!(back.kind(), MessageType::Notification);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let raw = json!({"type": "mind_meld", "body": {}});
        assert!(serde_json::from_value::<Payload>(raw).is_err());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn test_status_transitions() {
        use AgentStatus::*;
        assert!(Idle.can_transition(Active));
        assert!(Active.can_transition(Busy));
        assert!(Busy.can_transition(Idle));
        assert!(Active.can_transition(Error));
        assert!(Error.can_transition(Idle));
        assert!(!Idle.can_transition(Unregistered));
        assert!(!Unregistered.can_transition(Active));
    }
}
