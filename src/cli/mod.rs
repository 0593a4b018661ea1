//! CLI commands for Crewlink using clap.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;

use crate::bus::CoordinationBus;
use crate::config::{get_settings_path, load_settings, save_settings, Settings};
use crate::protocol::{AgentStatus, AgentType, EnvelopeBuilder, Payload};
use crate::registry::{Agent, AgentRegistry, FileStore, MemoryStore};
use crate::transport::{agent_channel, LocalTransport, Transport};

/// Crewlink - Agent coordination bus.
#[derive(Parser)]
#[command(name = "crewlink")]
#[command(version = "0.1.0")]
#[command(about = "Crewlink - coordination bus for specialized agents", long_about = None)]
pub struct Commands {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write default settings to ~/.crewlink/settings.json
    Init {
        /// Overwrite existing settings
        #[arg(long)]
        force: bool,
    },

    /// Show settings and the shared agent directory
    Status,

    /// Manage directory entries
    #[command(subcommand, alias = "a")]
    Agent(AgentCommand),

    /// Run an in-process request/response round trip
    Demo,
}

#[derive(Subcommand)]
pub enum AgentCommand {
    /// Register (or update) an agent
    Register {
        /// Agent id
        id: String,
        /// Agent type (designer, architect, code_implementer, security,
        /// performance, admin, validator, or a custom name)
        #[arg(long, default_value = "validator")]
        r#type: String,
        /// Capability tags
        #[arg(long = "cap")]
        capabilities: Vec<String>,
        /// Initial status
        #[arg(long, default_value = "idle")]
        status: String,
    },

    /// Remove an agent from the directory
    Unregister {
        /// Agent id
        id: String,
    },

    /// List the directory
    List,

    /// Show one agent's status projection
    Status {
        /// Agent id
        id: String,
    },
}

impl Commands {
    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Command::Init { force } => init_settings(*force),
            Command::Status => show_status().await,
            Command::Agent(cmd) => agent_command(cmd).await,
            Command::Demo => run_demo().await,
        }
    }
}

fn init_settings(force: bool) -> Result<()> {
    let path = get_settings_path()?;
    if path.exists() && !force {
        anyhow::bail!(
            "Settings already exist at {}. Use --force to overwrite.",
            path.display()
        );
    }
    save_settings(&Settings::default())?;
    println!("Wrote default settings to {}", path.display());
    Ok(())
}

fn file_registry(settings: &Settings) -> Result<AgentRegistry> {
    let store = FileStore::open(settings.directory_path()?)?;
    Ok(AgentRegistry::new(Arc::new(store)))
}

async fn show_status() -> Result<()> {
    let settings = load_settings()?;
    println!("Bus configuration:");
    println!("  max_retries:        {}", settings.bus.max_retries);
    println!("  default_timeout_ms: {}", settings.bus.default_timeout_ms);
    println!("  forwarding:         {:?}", settings.bus.forwarding);
    println!("  directory:          {}", settings.directory_path()?.display());

    let registry = file_registry(&settings)?;
    let agents = registry.get_active_agents().await?;
    println!("\nRegistered agents: {}", agents.len());
    for agent in agents {
        println!(
            "  {:<20} {:<16} {:<8} caps=[{}] updated={}",
            agent.id,
            agent.agent_type.to_string(),
            agent.status.to_string(),
            agent
                .capabilities
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(","),
            format_timestamp(agent.last_update),
        );
    }
    Ok(())
}

async fn agent_command(cmd: &AgentCommand) -> Result<()> {
    let settings = load_settings()?;
    let registry = file_registry(&settings)?;

    match cmd {
        AgentCommand::Register {
            id,
            r#type,
            capabilities,
            status,
        } => {
            let mut agent =
                Agent::new(id, parse_agent_type(r#type)).with_status(parse_status(status)?);
            for cap in capabilities {
                agent = agent.with_capability(cap);
            }
            registry.register(&agent).await?;
            println!("Registered agent '{id}'");
        }
        AgentCommand::Unregister { id } => {
            registry.unregister(id).await?;
            println!("Unregistered agent '{id}'");
        }
        AgentCommand::List => {
            for agent in registry.get_active_agents().await? {
                println!("{:<20} {:<16} {}", agent.id, agent.agent_type.to_string(), agent.status);
            }
        }
        AgentCommand::Status { id } => match registry.get_status(id).await? {
            Some(view) => {
                println!("status:       {}", view.status);
                println!("last_update:  {}", format_timestamp(view.last_update));
                println!(
                    "capabilities: [{}]",
                    view.capabilities.iter().cloned().collect::<Vec<_>>().join(",")
                );
            }
            None => println!("absent"),
        },
    }
    Ok(())
}

/// One bus, one echo agent, one correlated request over the local transport.
async fn run_demo() -> Result<()> {
    let transport = Arc::new(LocalTransport::new());
    let registry = AgentRegistry::new(Arc::new(MemoryStore::new()));
    let bus = Arc::new(CoordinationBus::new(
        Default::default(),
        registry,
        transport.clone(),
    ));

    let echo = Agent::new("echo-1", AgentType::Custom("echo".to_string()))
        .with_capability("echo")
        .with_status(AgentStatus::Active);
    bus.register_agent(&echo).await?;

    let mut inbox = transport.subscribe(&agent_channel("echo-1")).await?;
    let responder_bus = bus.clone();
    tokio::spawn(async move {
        while let Some(request) = inbox.recv().await {
            let body = match &request.payload {
                Payload::Request { body, .. } => body.clone(),
                _ => continue,
            };
            let response = request.create_response("echo-1", Payload::response(body));
            if let Err(e) = responder_bus.handle_message(response).await {
                tracing::warn!("Demo responder failed: {e}");
            }
        }
    });

    let request = EnvelopeBuilder::from("demo-client")
        .to("echo-1")
        .payload(Payload::request("echo", json!({"greeting": "hello, crew"})))
        .requires_response(Some(2_000))
        .build()?;

    match bus.send_message(request).await? {
        Some(Payload::Response { body }) => {
            println!("Round trip complete: {body}");
        }
        other => anyhow::bail!("unexpected demo outcome: {other:?}"),
    }
    Ok(())
}

fn parse_agent_type(s: &str) -> AgentType {
    match s {
        "designer" => AgentType::Designer,
        "architect" => AgentType::Architect,
        "code_implementer" => AgentType::CodeImplementer,
        "security" => AgentType::Security,
        "performance" => AgentType::Performance,
        "admin" => AgentType::Admin,
        "validator" => AgentType::Validator,
        other => AgentType::Custom(other.to_string()),
    }
}

fn parse_status(s: &str) -> Result<AgentStatus> {
    match s {
        "idle" => Ok(AgentStatus::Idle),
        "active" => Ok(AgentStatus::Active),
        "busy" => Ok(AgentStatus::Busy),
        other => anyhow::bail!("unknown status '{other}' (expected idle, active, or busy)"),
    }
}

fn format_timestamp(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_agent_type() {
        assert_eq!(parse_agent_type("designer"), AgentType::Designer);
        assert_eq!(
            parse_agent_type("gardener"),
            AgentType::Custom("gardener".to_string())
        );
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("active").unwrap(), AgentStatus::Active);
        assert!(parse_status("error").is_err());
    }
}
