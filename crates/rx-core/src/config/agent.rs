//! Agent configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs, option_duration_secs};
use crate::error::ConfigError;

/// Configuration for the agent daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Unix socket the control plane listens on
    pub socket_path: PathBuf,

    /// JSON file with tunnels to bring up at startup (missing file: none)
    pub tunnels_file: Option<PathBuf>,

    /// Private key used for every tunnel built by the control plane
    pub private_key_path: PathBuf,

    /// Public half of the key pair
    pub public_key_path: PathBuf,

    /// Generate the key pair at startup when it is missing
    pub generate_key: bool,

    /// Host of the local service side of control-plane tunnels
    pub local_host: String,

    /// Host the SSH server binds for control-plane tunnels
    pub remote_bind_host: String,

    /// Port appended to SSH addresses given without one
    pub default_ssh_port: u16,

    /// Address dialed (UDP, no packets sent) to find the outbound IP
    pub ip_probe_address: String,

    /// Bound on a single service liveness probe
    #[serde(with = "duration_secs")]
    pub service_probe_timeout: Duration,

    /// Bound on a single executed command
    #[serde(with = "duration_secs")]
    pub command_timeout: Duration,

    /// Reverse tunnel behaviour
    pub tunnel: TunnelSettings,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/remotexec.socket"),
            tunnels_file: Some(PathBuf::from("/tmp/sshtunnel.json")),
            private_key_path: PathBuf::from("/id_rsa"),
            public_key_path: PathBuf::from("/id_rsa.pub"),
            generate_key: true,
            local_host: "127.0.0.1".to_string(),
            remote_bind_host: "127.0.0.1".to_string(),
            default_ssh_port: 22,
            ip_probe_address: "8.8.8.8:80".to_string(),
            service_probe_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(300),
            tunnel: TunnelSettings::default(),
        }
    }
}

impl AgentConfig {
    /// Reject values that would break the tunnel machinery at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tunnel.backoff.validate()
    }

    /// Append the default SSH port to an address that has none
    pub fn ssh_address(&self, address: &str) -> String {
        let has_port = if let Some(rest) = address.strip_prefix('[') {
            rest.contains("]:")
        } else {
            address.matches(':').count() == 1
        };

        if has_port {
            address.to_string()
        } else if address.contains(':') && !address.starts_with('[') {
            format!("[{}]:{}", address, self.default_ssh_port)
        } else {
            format!("{}:{}", address, self.default_ssh_port)
        }
    }
}

/// Settings shared by every reverse tunnel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelSettings {
    /// Bound on TCP dial plus SSH handshake
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// SSH keepalive interval (0 disables)
    #[serde(with = "option_duration_secs")]
    pub keepalive_interval: Option<Duration>,

    /// How long a delete waits for the tunnel's loop to acknowledge
    #[serde(with = "duration_secs")]
    pub stop_timeout: Duration,

    /// Reconnect backoff
    pub backoff: BackoffConfig,

    /// Server host key verification
    pub host_key_policy: HostKeyPolicy,

    /// What to do after the server rejects our key
    pub auth_failure_policy: AuthFailurePolicy,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            keepalive_interval: Some(Duration::from_secs(30)),
            stop_timeout: Duration::from_secs(5),
            backoff: BackoffConfig::default(),
            host_key_policy: HostKeyPolicy::default(),
            auth_failure_policy: AuthFailurePolicy::default(),
        }
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay after the first failure
    #[serde(with = "duration_millis")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_millis")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }
}

impl BackoffConfig {
    /// Require a finite multiplier of at least 1 and a jitter in `0..=1`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "backoff multiplier must be a finite number >= 1.0, got {}",
                self.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Invalid(format!(
                "backoff jitter must be between 0.0 and 1.0, got {}",
                self.jitter
            )));
        }
        if self.initial > self.max {
            return Err(ConfigError::Invalid(format!(
                "backoff initial delay {:?} exceeds max {:?}",
                self.initial, self.max
            )));
        }
        Ok(())
    }
}

/// Server host key verification policy.
///
/// `InsecureAcceptAny` trusts whatever key the server presents. It is the
/// default because the agent targets trusted private networks; every
/// connection made under it logs a warning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum HostKeyPolicy {
    #[default]
    InsecureAcceptAny,
    /// Accept only the listed SHA-256 fingerprints
    Pinned { fingerprints: Vec<String> },
}

impl HostKeyPolicy {
    /// Whether a server key with this fingerprint may be used
    pub fn accepts(&self, fingerprint: &str) -> bool {
        match self {
            HostKeyPolicy::InsecureAcceptAny => true,
            HostKeyPolicy::Pinned { fingerprints } => {
                let presented = fingerprint.trim_start_matches("SHA256:");
                fingerprints
                    .iter()
                    .any(|f| f.trim_start_matches("SHA256:") == presented)
            }
        }
    }
}

/// Retry policy after the server rejects our credentials
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFailurePolicy {
    /// Back off and retry like a transport failure (tolerates key rotation)
    #[default]
    Retry,
    /// Park the tunnel in `auth_rejected` until it is deleted
    Stop,
}
