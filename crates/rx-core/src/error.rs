//! Core error types for remotexec

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while scheduling or running a reverse tunnel
#[derive(Error, Debug)]
pub enum TunnelError {
    /// The tunnel configuration was rejected before scheduling
    #[error("Invalid tunnel configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// Private key file not found
    #[error("Private key not found at {}", path.display())]
    KeyNotFound { path: PathBuf },

    /// Private key could not be parsed
    #[error("Failed to load private key {}: {message}", path.display())]
    KeyLoad { path: PathBuf, message: String },

    /// TCP dial did not complete in time
    #[error("Connection to {address} timed out after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    /// TCP dial or SSH handshake failed
    #[error("Failed to connect to {address}: {message}")]
    Connect { address: String, message: String },

    /// The server rejected our public key
    #[error("Authentication rejected for user '{username}' at {address}")]
    AuthRejected { address: String, username: String },

    /// The server's host key did not satisfy the host key policy
    #[error("Host key {fingerprint} rejected for {address}")]
    HostKeyRejected { address: String, fingerprint: String },

    /// The server refused to open a remote listener
    #[error("Failed to bind remote listener {remote}: {message}")]
    BindFailed { remote: String, message: String },

    /// A remote listener stopped accepting connections
    #[error("Listener on {remote} stopped accepting: {message}")]
    ListenerClosed { remote: String, message: String },

    /// Other SSH protocol error
    #[error("SSH error: {0}")]
    Ssh(String),
}

impl TunnelError {
    /// Whether this error belongs to the authentication class
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            TunnelError::AuthRejected { .. }
                | TunnelError::KeyNotFound { .. }
                | TunnelError::KeyLoad { .. }
        )
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Malformed `host:port` endpoint
    #[error("Invalid endpoint '{0}': expected host:port")]
    InvalidEndpoint(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// JSON tunnel definitions error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
