//! Control-plane server
//!
//! Serves newline-delimited JSON requests on a unix socket; the CLI is the
//! usual client.

mod server;

pub use server::{handle_request, IpcServer};
