//! Control-plane protocol between the CLI and the agent daemon
//!
//! Newline-delimited JSON over a unix-domain socket. The socket is private
//! to the host, so no authentication happens at this layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::types::TunnelState;

/// Result payload for a missing file
pub const FILE_MISSING: &str = "file doesn't exists";

/// Result payload for a newly scheduled tunnel
pub const TUNNEL_CREATED: &str = "tunnel created";

/// Result payload for an add that matched an active tunnel
pub const TUNNEL_ALREADY_ACTIVE: &str = "tunnel already active";

/// Result payload for a deleted tunnel
pub const TUNNEL_REMOVED: &str = "tunnel removed";

/// Get the default control socket path
pub fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/remotexec.socket")
}

/// IPC request from the CLI to the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Report the outbound-routable local IP
    GetIp,

    /// Read a file as text
    GetFileContent { path: String },

    /// Run a command line (no shell expansion)
    ExecuteCommand { command: String },

    /// Check whether `address:port` accepts a dial
    ServiceRunning {
        address: String,
        protocol: ServiceProtocol,
        port: u16,
    },

    /// Schedule a reverse tunnel
    AddTunnel(TunnelRequest),

    /// Tear down a reverse tunnel
    DeleteTunnel(TunnelRequest),

    /// List scheduled tunnels
    ListTunnels,

    /// Ping (for liveness)
    Ping,

    /// Shutdown the agent
    Shutdown,
}

/// Parameters identifying a control-plane tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelRequest {
    /// Port of the local service to expose
    pub local_port: u16,
    /// Port the SSH server listens on
    pub remote_port: u16,
    pub username: String,
    /// SSH server, `host` or `host:port`
    pub address: String,
}

/// IPC response from the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Textual result of an operation
    Result { result: String },

    /// Service liveness
    Running { running: bool },

    /// Scheduled tunnels
    Tunnels { tunnels: Vec<TunnelInfo> },

    /// Generic success
    Ok,

    /// Error response
    Error { message: String },

    /// Pong response
    Pong,
}

impl IpcResponse {
    pub fn result(result: impl Into<String>) -> Self {
        IpcResponse::Result {
            result: result.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        IpcResponse::Error {
            message: message.into(),
        }
    }
}

/// Transport protocol for a liveness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceProtocol {
    Tcp,
    Udp,
}

impl fmt::Display for ServiceProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceProtocol::Tcp => write!(f, "tcp"),
            ServiceProtocol::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for ServiceProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(ServiceProtocol::Tcp),
            "udp" => Ok(ServiceProtocol::Udp),
            other => Err(format!("unsupported protocol '{}'", other)),
        }
    }
}

/// Tunnel information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelInfo {
    /// Short identity fingerprint
    pub id: String,
    pub address: String,
    pub username: String,
    /// Forwards rendered as `remote -> local`
    pub forwards: Vec<String>,
    pub state: TunnelState,
    pub attempt: u32,
    pub last_error: Option<String>,
}
