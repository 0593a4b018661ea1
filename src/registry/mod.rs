//! Agent directory backed by a shared key/value store.
//!
//! The registry is the only component that writes to the shared directory;
//! everything else reads through it. All lookups go to the store on every
//! call, so concurrent processes see each other's registrations.

pub mod agent;
pub mod file_store;
pub mod lock;
pub mod store;

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::envelope::current_timestamp;
use crate::protocol::{AgentStatus, AgentType};

pub use agent::{Agent, AgentRecord, StatusView};
pub use file_store::FileStore;
pub use store::{DirectoryStore, MemoryStore};

/// Directory of known agents with a capability/status index.
#[derive(Clone)]
pub struct AgentRegistry {
    store: Arc<dyn DirectoryStore>,
}

impl AgentRegistry {
    pub fn new(store: Arc<dyn DirectoryStore>) -> Self {
        Self { store }
    }

    /// Idempotent upsert of an agent. An agent registered while still marked
    /// `Unregistered` comes up as `Idle`.
    pub async fn register(&self, agent: &Agent) -> Result<()> {
        let mut record = agent.record();
        if record.status == AgentStatus::Unregistered {
            record.status = AgentStatus::Idle;
        }
        record.last_update = current_timestamp();
        self.store.upsert(&agent.id, record).await?;
        tracing::info!(agent = %agent.id, agent_type = %agent.agent_type, "Agent registered");
        Ok(())
    }

    /// Remove an agent from the directory. Unknown ids are a no-op.
    pub async fn unregister(&self, id: &str) -> Result<()> {
        self.store.remove(id).await?;
        tracing::info!(agent = %id, "Agent unregistered");
        Ok(())
    }

    /// The agent for `id`, or None if absent.
    pub async fn get(&self, id: &str) -> Result<Option<Agent>> {
        Ok(self
            .store
            .record(id)
            .await?
            .map(|record| Agent::from_record(id, record)))
    }

    /// Any one agent of the given type, or None.
    ///
    /// When several agents match, which one is returned is unspecified;
    /// callers must not depend on it.
    pub async fn get_by_type(&self, agent_type: &AgentType) -> Result<Option<Agent>> {
        for agent in self.get_active_agents().await? {
            if &agent.agent_type == agent_type {
                return Ok(Some(agent));
            }
        }
        Ok(None)
    }

    /// All agents advertising the capability. Selection among them is the
    /// caller's concern (eligibility policy, load distribution).
    pub async fn get_by_capability(&self, capability: &str) -> Result<Vec<Agent>> {
        Ok(self
            .get_active_agents()
            .await?
            .into_iter()
            .filter(|a| a.has_capability(capability))
            .collect())
    }

    /// The full directory: id set first, then each record. A record deleted
    /// between the two reads is omitted rather than treated as an error.
    pub async fn get_active_agents(&self) -> Result<Vec<Agent>> {
        let ids = self.store.ids().await?;
        let mut agents = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.store.record(&id).await? {
                agents.push(Agent::from_record(id, record));
            }
        }
        Ok(agents)
    }

    /// Status projection for `id`; None means absent.
    pub async fn get_status(&self, id: &str) -> Result<Option<StatusView>> {
        Ok(self.store.record(id).await?.map(StatusView::from))
    }

    /// Status write guarded by the agent state machine.
    pub async fn set_status(&self, id: &str, status: AgentStatus) -> Result<()> {
        let mut record = self
            .store
            .record(id)
            .await?
            .ok_or_else(|| Error::AgentNotFound(format!("id '{id}'")))?;

        if !record.status.can_transition(status) {
            return Err(Error::InvalidTransition {
                id: id.to_string(),
                from: record.status.to_string(),
                to: status.to_string(),
            });
        }

        record.status = status;
        record.last_update = current_timestamp();
        self.store.upsert(id, record).await?;
        tracing::debug!(agent = %id, status = %status, "Agent status updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> AgentRegistry {
        AgentRegistry::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_register_then_visible() {
        let reg = registry();
        let agent = Agent::new("d1", AgentType::Designer).with_status(AgentStatus::Active);
        reg.register(&agent).await.unwrap();

        let agents = reg.get_active_agents().await.unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].id, "d1");

        reg.unregister("d1").await.unwrap();
        assert!(reg.get_active_agents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_register_normalizes_unregistered_status() {
        let reg = registry();
        let agent = Agent::new("d1", AgentType::Designer).with_status(AgentStatus::Unregistered);
        reg.register(&agent).await.unwrap();

        let view = reg.get_status("d1").await.unwrap().unwrap();
        assert_eq!(view.status, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn test_get_by_type_none_when_absent() {
        let reg = registry();
        assert!(reg
            .get_by_type(&AgentType::Security)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_get_by_capability() {
        let reg = registry();
        reg.register(
            &Agent::new("d1", AgentType::Designer)
                .with_capability("layout")
                .with_status(AgentStatus::Active),
        )
        .await
        .unwrap();
        reg.register(&Agent::new("s1", AgentType::Security).with_capability("audit"))
            .await
            .unwrap();

        let matches = reg.get_by_capability("layout").await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "d1");
        assert!(reg.get_by_capability("none").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_register_unregister_status_absent() {
        let reg = registry();
        reg.register(&Agent::new("a1", AgentType::Admin))
            .await
            .unwrap();
        reg.unregister("a1").await.unwrap();
        assert!(reg.get_status("a1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_status_respects_state_machine() {
        let reg = registry();
        reg.register(&Agent::new("a1", AgentType::Admin))
            .await
            .unwrap();

        reg.set_status("a1", AgentStatus::Active).await.unwrap();
        reg.set_status("a1", AgentStatus::Busy).await.unwrap();
        reg.set_status("a1", AgentStatus::Error).await.unwrap();
        reg.set_status("a1", AgentStatus::Idle).await.unwrap();

        let err = reg.set_status("a1", AgentStatus::Unregistered).await;
        assert!(matches!(err, Err(Error::InvalidTransition { .. })));

        let err = reg.set_status("ghost", AgentStatus::Active).await;
        assert!(matches!(err, Err(Error::AgentNotFound(_))));
    }
}
