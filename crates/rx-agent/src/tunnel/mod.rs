//! Reverse SSH tunnel lifecycle

mod forward;
mod manager;
mod pipe;
mod reconnect;
mod session;
mod ssh;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use forward::ForwardListener;
pub use manager::{AddOutcome, DeleteOutcome, TunnelManager, TunnelSnapshot};
pub use pipe::pipe_connection;
pub use reconnect::{ExponentialBackoff, ReconnectLoop};
pub use session::{SessionEnd, TunnelSession};
pub use ssh::SshConnector;
pub use transport::{AcceptSender, BoxedStream, Connector, Incoming, RelayStream, TransportSession};
