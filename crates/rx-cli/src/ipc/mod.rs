//! IPC client for communicating with the agent

mod client;

pub use client::AgentClient;

// Re-export types from rx_core
pub use rx_core::ipc::{default_socket_path, ServiceProtocol, TunnelInfo, TunnelRequest};
