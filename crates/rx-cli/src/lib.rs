//! remotexec: command-line client for the remotexec agent
//!
//! Provides the `rx` CLI, which talks to a running `remotexecd` over its
//! control socket.

pub mod commands;
pub mod ipc;
pub mod output;
