//! Error types for Crewlink.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("No agent found for {0}")]
    AgentNotFound(String),

    #[error("Agent '{id}' is not eligible for forwarding (status: {status})")]
    AgentUnavailable { id: String, status: String },

    #[error("Retry budget exhausted for message '{id}' after {attempts} publish attempts")]
    MaxRetriesExceeded { id: String, attempts: u32 },

    #[error("No response for message '{id}' within {timeout_ms}ms")]
    Timeout { id: String, timeout_ms: u64 },

    #[error("Agent '{id}' cannot move from {from} to {to}")]
    InvalidTransition { id: String, from: String, to: String },

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Transport error: {0}")]
    Transport(String),
}
