//! Crewlink library root.

pub mod bus;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use bus::{BusEvent, CoordinationBus, MessageHandler, ResolutionProposal, Vote, VoteTally};
pub use cli::Commands;
pub use config::{load_settings, BusConfig, ForwardingPolicy, Settings};
pub use error::{Error, Result};
pub use protocol::{
    AgentStatus, AgentType, Envelope, EnvelopeBuilder, MessageType, Payload, Priority,
    RegistryQuery,
};
pub use registry::{Agent, AgentRegistry, DirectoryStore, FileStore, MemoryStore};
pub use transport::{agent_channel, LocalTransport, Transport};
