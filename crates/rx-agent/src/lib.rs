//! rx-agent: remote-execution agent for remotexec
//!
//! The agent serves a control plane on a local unix socket. Besides a few
//! one-shot operations (outbound IP, file read, command execution, service
//! probe) it schedules reverse SSH tunnels that expose local ports on a
//! remote host, keeping each one alive with capped exponential backoff
//! until it is deleted.

pub mod ipc;
pub mod keys;
pub mod ops;
pub mod state;
pub mod tunnel;

pub use state::AgentState;
