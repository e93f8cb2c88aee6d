//! Configuration management for remotexec

mod agent;
pub mod serde_utils;

pub use agent::{
    AgentConfig, AuthFailurePolicy, BackoffConfig, HostKeyPolicy, TunnelSettings,
};

use crate::error::ConfigError;
use crate::types::TunnelConfig;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("remotexec")
}

/// Get the default agent configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("agent.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Load predefined tunnels from a JSON array of tunnel configurations.
///
/// A missing file means there are no predefined tunnels.
pub fn load_tunnels(path: &Path) -> Result<Vec<TunnelConfig>, ConfigError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read tunnels file: {}", e)))?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let tunnels: Vec<TunnelConfig> = serde_json::from_str(&content)?;
    for tunnel in &tunnels {
        tunnel.validate()?;
    }
    Ok(tunnels)
}
