//! Configuration loading for Crewlink.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::protocol::{AgentStatus, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_MS};

pub type Result<T> = std::result::Result<T, Error>;

/// Get the Crewlink home directory (~/.crewlink).
pub fn get_home_dir() -> Result<PathBuf> {
    let home = directories::UserDirs::new()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(home.home_dir().join(".crewlink"))
}

/// Get the settings file path.
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("settings.json"))
}

/// Get the default shared-directory file path.
pub fn get_directory_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("directory.json"))
}

/// Load settings from ~/.crewlink/settings.json
pub fn load_settings() -> Result<Settings> {
    let path = get_settings_path()?;

    if !path.exists() {
        return Err(Error::Config(format!(
            "Settings file not found at {}. Run 'crewlink init' first.",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(&path)?;
    let settings: Settings = serde_json::from_str(&content)?;
    settings.validate()?;

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Write settings to ~/.crewlink/settings.json.
pub fn save_settings(settings: &Settings) -> Result<()> {
    settings.validate()?;
    let path = get_settings_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(settings)?)?;
    tracing::info!("Saved settings to {}", path.display());
    Ok(())
}

/// Top-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Bus behavior knobs.
    #[serde(default)]
    pub bus: BusConfig,

    /// Shared directory file; None falls back to ~/.crewlink/directory.json.
    #[serde(default)]
    pub directory_path: Option<PathBuf>,
}

impl Settings {
    /// Resolve the directory file path.
    pub fn directory_path(&self) -> Result<PathBuf> {
        match &self.directory_path {
            Some(path) => Ok(path.clone()),
            None => get_directory_path(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.bus.default_timeout_ms == 0 {
            return Err(Error::Config(
                "default_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-bus-instance configuration, injected at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Redelivery budget for correlated sends.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Correlated-wait deadline when the envelope sets none.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Which agent statuses may be selected as forwarding targets.
    #[serde(default)]
    pub forwarding: ForwardingPolicy,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            forwarding: ForwardingPolicy::default(),
        }
    }
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Forwarding eligibility policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ForwardingPolicy {
    /// Only `active` agents receive forwarded messages.
    #[default]
    ActiveOnly,
    /// Any registered, non-errored agent is eligible (idle and busy too).
    AnyRegistered,
}

impl ForwardingPolicy {
    /// True if an agent with this status may be a forwarding target.
    pub fn eligible(&self, status: AgentStatus) -> bool {
        match self {
            ForwardingPolicy::ActiveOnly => status == AgentStatus::Active,
            ForwardingPolicy::AnyRegistered => matches!(
                status,
                AgentStatus::Idle | AgentStatus::Active | AgentStatus::Busy
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BusConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.default_timeout_ms, 30_000);
        assert_eq!(config.forwarding, ForwardingPolicy::ActiveOnly);
    }

    #[test]
    fn test_forwarding_policy() {
        assert!(ForwardingPolicy::ActiveOnly.eligible(AgentStatus::Active));
        assert!(!ForwardingPolicy::ActiveOnly.eligible(AgentStatus::Idle));
        assert!(!ForwardingPolicy::ActiveOnly.eligible(AgentStatus::Busy));

        assert!(ForwardingPolicy::AnyRegistered.eligible(AgentStatus::Idle));
        assert!(ForwardingPolicy::AnyRegistered.eligible(AgentStatus::Busy));
        assert!(!ForwardingPolicy::AnyRegistered.eligible(AgentStatus::Error));
        assert!(!ForwardingPolicy::AnyRegistered.eligible(AgentStatus::Unregistered));
    }

    #[test]
    fn test_settings_reject_zero_timeout() {
        let mut settings = Settings::default();
        settings.bus.default_timeout_ms = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_settings_partial_json() {
        let settings: Settings = serde_json::from_str(r#"{"bus": {"max_retries": 5}}"#).unwrap();
        assert_eq!(settings.bus.max_retries, 5);
        assert_eq!(settings.bus.default_timeout_ms, 30_000);
    }
}
