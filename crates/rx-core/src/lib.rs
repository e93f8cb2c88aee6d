//! rx-core: Core types and configuration for remotexec
//!
//! This crate provides the tunnel data model and its canonical identity,
//! the error taxonomy, agent configuration, and the control-plane message
//! types shared by the agent daemon and the CLI.

pub mod config;
pub mod error;
pub mod ipc;
pub mod types;

pub use error::{ConfigError, TunnelError};
pub use types::{
    Endpoint, Forward, SshServer, TunnelConfig, TunnelId, TunnelState, TunnelStatus,
};
