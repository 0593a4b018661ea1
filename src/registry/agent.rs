//! Agent directory records.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::protocol::envelope::current_timestamp;
use crate::protocol::{AgentStatus, AgentType};

/// A registered agent as seen through the directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    /// Unique agent id.
    pub id: String,
    /// Specialized role.
    pub agent_type: AgentType,
    /// Capability tags advertised for request routing.
    pub capabilities: BTreeSet<String>,
    /// Lifecycle status.
    pub status: AgentStatus,
    /// Last directory write touching this agent (unix ms).
    pub last_update: i64,
}

impl Agent {
    /// Create an agent in the `Idle` state with no capabilities.
    pub fn new(id: impl Into<String>, agent_type: AgentType) -> Self {
        Self {
            id: id.into(),
            agent_type,
            capabilities: BTreeSet::new(),
            status: AgentStatus::Idle,
            last_update: current_timestamp(),
        }
    }

    /// Advertise a capability.
    pub fn with_capability(mut self, cap: impl Into<String>) -> Self {
        self.capabilities.insert(cap.into());
        self
    }

    /// Set the initial status.
    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    /// True if the agent advertises the capability.
    pub fn has_capability(&self, cap: &str) -> bool {
        self.capabilities.contains(cap)
    }

    /// The per-agent attribute record written to the store.
    pub fn record(&self) -> AgentRecord {
        AgentRecord {
            agent_type: self.agent_type.clone(),
            capabilities: self.capabilities.clone(),
            status: self.status,
            last_update: self.last_update,
        }
    }

    /// Rebuild an agent from its id and stored record.
    pub fn from_record(id: impl Into<String>, record: AgentRecord) -> Self {
        Self {
            id: id.into(),
            agent_type: record.agent_type,
            capabilities: record.capabilities,
            status: record.status,
            last_update: record.last_update,
        }
    }
}

/// Per-agent attribute record, stored alongside the active-id set.
///
/// The id set and these records are only ever written together through a
/// single atomic store call; neither is mutated on its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRecord {
    pub agent_type: AgentType,
    pub capabilities: BTreeSet<String>,
    pub status: AgentStatus,
    pub last_update: i64,
}

/// Status projection returned by `get_status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusView {
    pub status: AgentStatus,
    pub last_update: i64,
    pub capabilities: BTreeSet<String>,
}

impl From<AgentRecord> for StatusView {
    fn from(record: AgentRecord) -> Self {
        Self {
            status: record.status,
            last_update: record.last_update,
            capabilities: record.capabilities,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_builder() {
        let agent = Agent::new("designer-1", AgentType::Designer)
            .with_capability("layout")
            .with_capability("wireframe")
            .with_status(AgentStatus::Active);

        assert_eq!(agent.status, AgentStatus::Active);
        assert!(agent.has_capability("layout"));
        assert!(!agent.has_capability("audit"));
    }

    #[test]
    fn test_record_round_trip() {
        let agent = Agent::new("sec-1", AgentType::Security).with_capability("audit");
        let rebuilt = Agent::from_record("sec-1", agent.record());
        assert_eq!(agent, rebuilt);
    }
}
