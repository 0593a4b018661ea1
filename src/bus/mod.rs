//! Coordination bus facade.
//!
//! One bus instance per process. All dependencies (config, registry store,
//! transport) are injected at construction so isolated instances can coexist
//! in tests; there is no global state.

pub mod correlation;
pub mod dispatch;
pub mod events;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::BusConfig;
use crate::error::{Error, Result};
use crate::protocol::envelope::current_timestamp;
use crate::protocol::{AgentStatus, Envelope, MessageType, Payload, RegistryQuery};
use crate::registry::{Agent, AgentRegistry};
use crate::transport::Transport;

pub use correlation::CorrelationTable;
pub use dispatch::Dispatcher;
pub use events::{BusEvent, Observers};

/// Custom handler for a message kind, replacing the built-in behavior.
///
/// Returning `Ok(Some(payload))` routes the payload back to a correlated
/// caller when the inbound envelope expects a response. Errors are caught at
/// the handler boundary and never crash the bus.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, envelope: &Envelope) -> Result<Option<Payload>>;
}

/// One agent's vote toward a shared decision.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Vote {
    pub approve: bool,
    pub comment: Option<String>,
    pub at: i64,
}

/// Accumulated votes for one decision id. Quorum policy lives outside the
/// bus; this only keeps the running tally queryable.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VoteTally {
    pub votes: HashMap<String, Vote>,
}

impl VoteTally {
    pub fn approvals(&self) -> usize {
        self.votes.values().filter(|v| v.approve).count()
    }

    pub fn rejections(&self) -> usize {
        self.votes.len() - self.approvals()
    }
}

/// A resolution proposal recorded for external adjudication.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResolutionProposal {
    pub agent_id: String,
    pub proposal: Value,
    pub at: i64,
}

/// Public entry point for agent coordination: registration, correlated and
/// fire-and-forget sends, inbound message handling, and directory queries.
pub struct CoordinationBus {
    id: String,
    config: BusConfig,
    registry: AgentRegistry,
    dispatcher: Dispatcher,
    correlation: CorrelationTable,
    handlers: Mutex<HashMap<MessageType, Arc<dyn MessageHandler>>>,
    observers: Observers,
    votes: Mutex<HashMap<String, VoteTally>>,
    conflicts: Mutex<HashMap<String, Vec<ResolutionProposal>>>,
}

impl CoordinationBus {
    pub fn new(
        config: BusConfig,
        registry: AgentRegistry,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let dispatcher = Dispatcher::new(registry.clone(), transport, config.clone());
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            config,
            registry,
            dispatcher,
            correlation: CorrelationTable::new(),
            handlers: Mutex::new(HashMap::new()),
            observers: Observers::new(),
            votes: Mutex::new(HashMap::new()),
            conflicts: Mutex::new(HashMap::new()),
        }
    }

    /// This bus instance's id.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Register an agent and announce it to observers.
    pub async fn register_agent(&self, agent: &Agent) -> Result<()> {
        self.registry.register(agent).await?;
        self.observers.emit(BusEvent::AgentRegistered {
            id: agent.id.clone(),
        });
        Ok(())
    }

    /// Unregister an agent and announce it to observers.
    pub async fn unregister_agent(&self, id: &str) -> Result<()> {
        self.registry.unregister(id).await?;
        self.observers.emit(BusEvent::AgentUnregistered { id: id.to_string() });
        Ok(())
    }

    /// Read-only event stream for UI/observability consumers.
    pub fn subscribe_events(&self) -> broadcast::Receiver<BusEvent> {
        self.observers.subscribe()
    }

    /// Replace the built-in behavior for one message kind.
    pub fn register_handler(&self, kind: MessageType, handler: Arc<dyn MessageHandler>) {
        self.lock_handlers().insert(kind, handler);
    }

    /// Send an envelope.
    ///
    /// Correlated sends (`requires_response`) record the pending wait before
    /// dispatching, then suspend until resolution, rejection, or deadline;
    /// the result payload comes back as `Some`. Fire-and-forget sends return
    /// `None` once published, not once processed. Resolution failures
    /// (`AgentNotFound`, `AgentUnavailable`, `MaxRetriesExceeded`) are
    /// returned to the caller immediately.
    pub async fn send_message(&self, mut envelope: Envelope) -> Result<Option<Payload>> {
        envelope.validate()?;
        if envelope.metadata.timestamp == 0 {
            envelope.metadata.timestamp = current_timestamp();
        }

        if !envelope.metadata.requires_response {
            self.dispatcher.dispatch(&mut envelope).await?;
            return Ok(None);
        }

        let timeout_ms = envelope
            .metadata
            .timeout_ms
            .unwrap_or(self.config.default_timeout_ms);
        envelope.metadata.timeout_ms = Some(timeout_ms);

        // Record the wait before publishing: a response racing back cannot
        // beat the table entry into existence.
        let id = envelope.id.clone();
        let rx = self.correlation.insert(&id, timeout_ms);

        if let Err(e) = self.dispatcher.dispatch(&mut envelope).await {
            self.correlation.forget(&id);
            return Err(e);
        }

        match rx.await {
            Ok(result) => result.map(Some),
            Err(_) => Err(Error::Handler(format!(
                "pending wait for '{id}' was dropped"
            ))),
        }
    }

    /// Handle an inbound envelope: a registered custom handler for its kind,
    /// or the built-in behavior. If the envelope itself expects a response
    /// and a correlated caller in this process is waiting under its id, the
    /// handler's result (or error) settles that wait.
    pub async fn handle_message(&self, envelope: Envelope) -> Result<Option<Payload>> {
        envelope.validate()?;
        tracing::debug!(id = %envelope.id, kind = %envelope.kind(), from = %envelope.from, "Handling message");

        match self.run_handler(&envelope).await {
            Ok(outcome) => {
                if envelope.metadata.requires_response {
                    if let Some(payload) = &outcome {
                        self.correlation.resolve(&envelope.id, payload.clone());
                    }
                }
                Ok(outcome)
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(id = %envelope.id, kind = %envelope.kind(), "Handler failed: {message}");
                self.mark_handler_failure(&envelope).await;
                if envelope.metadata.requires_response {
                    self.correlation.reject(&envelope.id, e);
                }
                Err(Error::Handler(message))
            }
        }
    }

    /// Current tally for a decision, if any votes arrived.
    pub fn vote_tally(&self, decision_id: &str) -> Option<VoteTally> {
        self.lock_votes().get(decision_id).cloned()
    }

    /// Recorded proposals for a conflict.
    pub fn conflict_proposals(&self, conflict_id: &str) -> Vec<ResolutionProposal> {
        self.lock_conflicts()
            .get(conflict_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of correlated waits still outstanding.
    pub fn pending_responses(&self) -> usize {
        self.correlation.len()
    }

    async fn run_handler(&self, envelope: &Envelope) -> Result<Option<Payload>> {
        let custom = self.lock_handlers().get(&envelope.kind()).cloned();
        if let Some(handler) = custom {
            return handler.handle(envelope).await;
        }

        match &envelope.payload {
            Payload::Request { capability, .. } => {
                self.forward_request(envelope, capability).await?;
                Ok(None)
            }
            Payload::Response { .. } => {
                self.settle(envelope, None);
                Ok(None)
            }
            Payload::Feedback { error, .. } => {
                self.settle(envelope, error.clone());
                Ok(None)
            }
            Payload::Notification { event, body } => {
                self.observers.emit(BusEvent::Notification {
                    from: envelope.from.clone(),
                    event: event.clone(),
                    body: body.clone(),
                });
                Ok(None)
            }
            Payload::Query { query } => Ok(Some(self.answer_query(query).await?)),
            Payload::ConsensusVote {
                decision_id,
                approve,
                comment,
            } => {
                self.record_vote(decision_id, &envelope.from, *approve, comment.clone());
                Ok(None)
            }
            Payload::ConflictResolution {
                conflict_id,
                proposal,
            } => {
                self.record_proposal(conflict_id, &envelope.from, proposal.clone());
                Ok(None)
            }
            Payload::StatusUpdate { status } => {
                self.registry.set_status(&envelope.from, *status).await?;
                self.observers.emit(BusEvent::StatusChanged {
                    id: envelope.from.clone(),
                    status: *status,
                });
                Ok(None)
            }
        }
    }

    /// Built-in Request routing: pick any eligible agent advertising the
    /// capability and forward through the dispatcher.
    async fn forward_request(&self, envelope: &Envelope, capability: &str) -> Result<()> {
        let candidates = self.registry.get_by_capability(capability).await?;
        let target = candidates
            .into_iter()
            .find(|a| self.config.forwarding.eligible(a.status))
            .ok_or_else(|| Error::AgentNotFound(format!("capability '{capability}'")))?;

        let mut forwarded = envelope.clone();
        self.dispatcher.forward_to_agent(&target, &mut forwarded).await
    }

    /// Response/Feedback: settle the correlated wait, no further routing.
    fn settle(&self, envelope: &Envelope, error: Option<String>) {
        // validate() already guaranteed the correlation id is present.
        let Some(correlation_id) = envelope.correlation_id.as_deref() else {
            return;
        };
        match error {
            Some(message) => {
                self.correlation
                    .reject(correlation_id, Error::Handler(message));
            }
            None => {
                self.correlation
                    .resolve(correlation_id, envelope.payload.clone());
            }
        }
    }

    /// Query: answered directly from the registry, no forwarding.
    async fn answer_query(&self, query: &RegistryQuery) -> Result<Payload> {
        let body = match query {
            RegistryQuery::ByType(agent_type) => {
                serde_json::to_value(self.registry.get_by_type(agent_type).await?)?
            }
            RegistryQuery::ByCapability(capability) => {
                serde_json::to_value(self.registry.get_by_capability(capability).await?)?
            }
            RegistryQuery::Status(id) => {
                serde_json::to_value(self.registry.get_status(id).await?)?
            }
            RegistryQuery::ActiveAgents => {
                serde_json::to_value(self.registry.get_active_agents().await?)?
            }
        };
        Ok(Payload::response(body))
    }

    fn record_vote(&self, decision_id: &str, agent_id: &str, approve: bool, comment: Option<String>) {
        let mut votes = self.lock_votes();
        let tally = votes.entry(decision_id.to_string()).or_default();
        tally.votes.insert(
            agent_id.to_string(),
            Vote {
                approve,
                comment,
                at: current_timestamp(),
            },
        );
        tracing::debug!(
            decision = %decision_id,
            agent = %agent_id,
            approvals = tally.approvals(),
            total = tally.votes.len(),
            "Vote recorded"
        );
    }

    fn record_proposal(&self, conflict_id: &str, agent_id: &str, proposal: Value) {
        self.lock_conflicts()
            .entry(conflict_id.to_string())
            .or_default()
            .push(ResolutionProposal {
                agent_id: agent_id.to_string(),
                proposal,
                at: current_timestamp(),
            });
        tracing::debug!(conflict = %conflict_id, agent = %agent_id, "Resolution proposal recorded");
    }

    /// Attribute an unrecoverable handler failure to the agent that was
    /// processing the envelope; recovery takes an explicit status update.
    async fn mark_handler_failure(&self, envelope: &Envelope) {
        for id in &envelope.to {
            match self.registry.get(id).await {
                Ok(Some(_)) => {
                    if let Err(e) = self.registry.set_status(id, AgentStatus::Error).await {
                        tracing::warn!(agent = %id, "Could not mark agent errored: {e}");
                    } else {
                        self.observers.emit(BusEvent::StatusChanged {
                            id: id.clone(),
                            status: AgentStatus::Error,
                        });
                    }
                    return;
                }
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(agent = %id, "Directory lookup failed while attributing handler error: {e}");
                    return;
                }
            }
        }
    }

    fn lock_handlers(&self) -> MutexGuard<'_, HashMap<MessageType, Arc<dyn MessageHandler>>> {
        unpoison(self.handlers.lock())
    }

    fn lock_votes(&self) -> MutexGuard<'_, HashMap<String, VoteTally>> {
        unpoison(self.votes.lock())
    }

    fn lock_conflicts(&self) -> MutexGuard<'_, HashMap<String, Vec<ResolutionProposal>>> {
        unpoison(self.conflicts.lock())
    }
}

fn unpoison<'a, T>(
    result: std::result::Result<MutexGuard<'a, T>, std::sync::PoisonError<MutexGuard<'a, T>>>,
) -> MutexGuard<'a, T> {
    match result {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
