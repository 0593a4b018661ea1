//! Agent communication protocol for Crewlink.
//!
//! This module defines the typed wire contract between agents:
//! - Message envelopes with correlation ids
//! - A closed set of message kinds carried as a payload tag
//! - Delivery metadata (priority, deadlines, retry budget)

pub mod envelope;
pub mod types;

pub use envelope::{Envelope, EnvelopeBuilder, Metadata, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_MS};
pub use types::{AgentStatus, AgentType, MessageType, Payload, Priority, RegistryQuery};
