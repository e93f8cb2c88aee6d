//! Core domain types

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;

/// Version tag embedded in every canonical tunnel key
const TUNNEL_ID_VERSION: &str = "rx-tunnel/v1";

/// A `host:port` network address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::InvalidEndpoint(s.to_string()))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        let port = port
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidEndpoint(s.to_string()))?;
        if host.is_empty() {
            return Err(ConfigError::InvalidEndpoint(s.to_string()));
        }
        Ok(Self::new(host, port))
    }
}

/// One exposed port: remote bind address forwarded back to a local service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Forward {
    /// Service on the agent's side that receives the traffic
    pub local: Endpoint,
    /// Address the SSH server listens on
    pub remote: Endpoint,
}

impl Forward {
    pub fn new(local: Endpoint, remote: Endpoint) -> Self {
        Self { local, remote }
    }
}

impl fmt::Display for Forward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.remote, self.local)
    }
}

/// SSH server and the credential used to reach it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SshServer {
    /// `host:port` of the SSH daemon
    pub address: String,
    pub username: String,
    pub private_key_path: PathBuf,
}

/// Complete description of one reverse tunnel.
///
/// Two configurations with identical field values are the same tunnel and
/// collapse to one active session. Forward order is significant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TunnelConfig {
    pub server: SshServer,
    pub forwards: Vec<Forward>,
}

impl TunnelConfig {
    /// Canonical identity of this configuration
    pub fn id(&self) -> TunnelId {
        TunnelId::from_config(self)
    }

    /// Reject configurations that can never be served
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.address.trim().is_empty() {
            return Err(ConfigError::Invalid("SSH server address is empty".into()));
        }
        if self.server.username.trim().is_empty() {
            return Err(ConfigError::Invalid("SSH username is empty".into()));
        }
        if self.forwards.is_empty() {
            return Err(ConfigError::Invalid("tunnel has no forwards".into()));
        }

        let mut remotes = HashSet::new();
        for forward in &self.forwards {
            if forward.local.port == 0 || forward.remote.port == 0 {
                return Err(ConfigError::Invalid(format!(
                    "forward {} uses port 0",
                    forward
                )));
            }
            // Forwarded channels are routed back by remote port alone
            if !remotes.insert(forward.remote.port) {
                return Err(ConfigError::Invalid(format!(
                    "remote port {} is bound twice",
                    forward.remote.port
                )));
            }
        }
        Ok(())
    }
}

/// Canonical key of a tunnel configuration.
///
/// The key is the compact JSON array
/// `["rx-tunnel/v1", address, username, key_path, [[local_host, local_port,
/// remote_host, remote_port], ...]]`. JSON string escaping keeps the encoding
/// unambiguous for any field content, and the version tag pins the format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TunnelId(String);

impl TunnelId {
    /// Build the canonical key for a configuration
    pub fn from_config(config: &TunnelConfig) -> Self {
        let forwards: Vec<serde_json::Value> = config
            .forwards
            .iter()
            .map(|f| {
                serde_json::json!([f.local.host, f.local.port, f.remote.host, f.remote.port])
            })
            .collect();

        let key = serde_json::json!([
            TUNNEL_ID_VERSION,
            config.server.address,
            config.server.username,
            config.server.private_key_path.to_string_lossy(),
            forwards,
        ]);

        Self(key.to_string())
    }

    /// Full canonical key
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short hex digest of the key, for logs and listings
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(&digest[..6])
    }
}

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint())
    }
}

/// Lifecycle state of one tunnel's reconnect loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelState {
    /// Dialing, authenticating and binding forwards
    Connecting,
    /// All forwards bound and accepting
    Serving,
    /// Last attempt failed with a transport error
    Failed,
    /// Last attempt was rejected during authentication
    AuthRejected,
    /// Sleeping before the next attempt
    BackoffWait,
    /// Cancelled; terminal
    Cancelled,
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelState::Connecting => write!(f, "connecting"),
            TunnelState::Serving => write!(f, "serving"),
            TunnelState::Failed => write!(f, "failed"),
            TunnelState::AuthRejected => write!(f, "auth_rejected"),
            TunnelState::BackoffWait => write!(f, "backoff"),
            TunnelState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Observable status of one tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelStatus {
    pub state: TunnelState,
    /// Consecutive failures since the tunnel last reached `Serving`
    pub attempt: u32,
    pub last_error: Option<String>,
}

impl Default for TunnelStatus {
    fn default() -> Self {
        Self {
            state: TunnelState::Connecting,
            attempt: 0,
            last_error: None,
        }
    }
}
