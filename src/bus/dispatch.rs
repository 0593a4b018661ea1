//! Dispatcher: target resolution and bounded redelivery.

use std::sync::Arc;

use crate::config::BusConfig;
use crate::error::{Error, Result};
use crate::protocol::Envelope;
use crate::registry::{Agent, AgentRegistry};
use crate::transport::{agent_channel, Transport};

/// Resolves recipients through the registry, applies the retry policy, and
/// publishes through the transport.
pub struct Dispatcher {
    registry: AgentRegistry,
    transport: Arc<dyn Transport>,
    config: BusConfig,
}

impl Dispatcher {
    pub fn new(registry: AgentRegistry, transport: Arc<dyn Transport>, config: BusConfig) -> Self {
        Self {
            registry,
            transport,
            config,
        }
    }

    /// Resolve every recipient of the envelope and forward to each one.
    pub async fn dispatch(&self, envelope: &mut Envelope) -> Result<()> {
        envelope.validate()?;
        let recipients = envelope.to.clone();
        for id in recipients {
            let agent = self
                .registry
                .get(&id)
                .await?
                .ok_or_else(|| Error::AgentNotFound(format!("id '{id}'")))?;
            self.forward_to_agent(&agent, envelope).await?;
        }
        Ok(())
    }

    /// Publish an envelope to one resolved target, retrying transport
    /// failures within the retry budget.
    ///
    /// The budget check runs before every attempt, so the loop terminates in
    /// at most `max_retries + 1` publishes no matter how it is entered.
    /// Fire-and-forget envelopes are never retried: redelivering them would
    /// risk duplicate side effects the recipient cannot detect.
    pub async fn forward_to_agent(&self, agent: &Agent, envelope: &mut Envelope) -> Result<()> {
        loop {
            if !self.config.forwarding.eligible(agent.status) {
                return Err(Error::AgentUnavailable {
                    id: agent.id.clone(),
                    status: agent.status.to_string(),
                });
            }

            if envelope.metadata.retry_count >= self.config.max_retries {
                return Err(Error::MaxRetriesExceeded {
                    id: envelope.id.clone(),
                    attempts: envelope.metadata.retry_count,
                });
            }

            match self
                .transport
                .publish(&agent_channel(&agent.id), envelope)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if envelope.metadata.requires_response => {
                    envelope.metadata.retry_count += 1;
                    tracing::warn!(
                        id = %envelope.id,
                        agent = %agent.id,
                        retry = envelope.metadata.retry_count,
                        "Publish failed, retrying: {e}"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{AgentStatus, AgentType, Payload};
    use crate::registry::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    /// Transport that fails the first `failures` publishes, then succeeds.
    struct FlakyTransport {
        failures: u32,
        attempts: AtomicU32,
    }

    impl FlakyTransport {
        fn failing(failures: u32) -> Self {
            Self {
                failures,
                attempts: AtomicU32::new(0),
            }
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn publish(&self, _channel: &str, _envelope: &Envelope) -> Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                Err(Error::Transport("broker unreachable".to_string()))
            } else {
                Ok(())
            }
        }

        async fn subscribe(&self, _channel: &str) -> Result<mpsc::Receiver<Envelope>> {
            unimplemented!("not used in dispatch tests")
        }
    }

    fn dispatcher(transport: Arc<FlakyTransport>) -> Dispatcher {
        let registry = AgentRegistry::new(Arc::new(MemoryStore::new()));
        Dispatcher::new(registry, transport, BusConfig::default())
    }

    fn active_agent(id: &str) -> Agent {
        Agent::new(id, AgentType::Designer)
            .with_capability("layout")
            .with_status(AgentStatus::Active)
    }

    fn request_to(id: &str, correlated: bool) -> Envelope {
        let envelope = Envelope::new("bus", id, Payload::request("layout", json!({})));
        if correlated {
            envelope.expecting_response(Some(1_000))
        } else {
            envelope
        }
    }

    #[tokio::test]
    async fn test_inactive_agent_fails_without_publish() {
        let transport = Arc::new(FlakyTransport::failing(0));
        let d = dispatcher(transport.clone());

        let agent = Agent::new("d1", AgentType::Designer).with_status(AgentStatus::Idle);
        let mut envelope = request_to("d1", true);

        let result = d.forward_to_agent(&agent, &mut envelope).await;
        assert!(matches!(result, Err(Error::AgentUnavailable { .. })));
        assert_eq!(transport.attempts(), 0);
    }

    #[tokio::test]
    async fn test_retry_budget_bounds_publishes() {
        let transport = Arc::new(FlakyTransport::failing(u32::MAX));
        let d = dispatcher(transport.clone());

        let mut envelope = request_to("d1", true);
        let result = d.forward_to_agent(&active_agent("d1"), &mut envelope).await;

        assert!(matches!(
            result,
            Err(Error::MaxRetriesExceeded { attempts: 3, .. })
        ));
        // Three consecutive failures consumed the budget; the fourth attempt
        // was rejected before any publish.
        assert_eq!(transport.attempts(), 3);
        assert_eq!(envelope.metadata.retry_count, 3);
    }

    #[tokio::test]
    async fn test_retry_recovers_within_budget() {
        let transport = Arc::new(FlakyTransport::failing(2));
        let d = dispatcher(transport.clone());

        let mut envelope = request_to("d1", true);
        d.forward_to_agent(&active_agent("d1"), &mut envelope)
            .await
            .unwrap();

        assert_eq!(transport.attempts(), 3);
        assert_eq!(envelope.metadata.retry_count, 2);
    }

    #[tokio::test]
    async fn test_fire_and_forget_never_retries() {
        let transport = Arc::new(FlakyTransport::failing(1));
        let d = dispatcher(transport.clone());

        let mut envelope = request_to("d1", false);
        let result = d.forward_to_agent(&active_agent("d1"), &mut envelope).await;

        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(transport.attempts(), 1);
        assert_eq!(envelope.metadata.retry_count, 0);
    }

    #[tokio::test]
    async fn test_dispatch_unknown_recipient() {
        let transport = Arc::new(FlakyTransport::failing(0));
        let d = dispatcher(transport.clone());

        let mut envelope = request_to("ghost", true);
        let result = d.dispatch(&mut envelope).await;

        assert!(matches!(result, Err(Error::AgentNotFound(_))));
        assert_eq!(transport.attempts(), 0);
    }
}
