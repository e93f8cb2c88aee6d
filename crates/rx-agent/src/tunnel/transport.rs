//! Transport abstraction between the tunnel lifecycle and SSH
//!
//! The lifecycle code only needs three things from an SSH client: connect
//! and authenticate, ask the server to listen on a remote address, and
//! receive the connections that arrive there. `SshConnector` provides them
//! over russh; tests provide them in memory.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use rx_core::{Endpoint, SshServer, TunnelError};

/// A bidirectional byte stream carrying one forwarded connection
pub trait RelayStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> RelayStream for T {}

/// Owned, type-erased forwarded connection
pub type BoxedStream = Box<dyn RelayStream>;

/// Sending half of a remote listener's accept queue
pub type AcceptSender = mpsc::UnboundedSender<BoxedStream>;

/// Accept queue of one remote listener.
///
/// The queue closes when the transport drops its sender, which is how a
/// dead SSH connection surfaces as an accept error.
pub struct Incoming {
    remote: Endpoint,
    rx: mpsc::UnboundedReceiver<BoxedStream>,
}

impl Incoming {
    /// Create a new accept queue for `remote`
    pub fn channel(remote: Endpoint) -> (AcceptSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { remote, rx })
    }

    /// The remote bind address this queue belongs to
    pub fn remote(&self) -> &Endpoint {
        &self.remote
    }

    /// Wait for the next forwarded connection
    pub async fn accept(&mut self) -> Result<BoxedStream, TunnelError> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| TunnelError::ListenerClosed {
                remote: self.remote.to_string(),
                message: "SSH connection closed".to_string(),
            })
    }
}

/// Opens authenticated sessions to SSH servers
#[async_trait]
pub trait Connector: Send + Sync {
    /// Cheap synchronous checks run before a tunnel is scheduled
    fn preflight(&self, _server: &SshServer) -> Result<(), TunnelError> {
        Ok(())
    }

    /// Dial and authenticate
    async fn connect(&self, server: &SshServer) -> Result<Box<dyn TransportSession>, TunnelError>;
}

/// One authenticated SSH connection
#[async_trait]
pub trait TransportSession: Send {
    /// Ask the server to listen on `remote` and forward connections back
    async fn bind(&mut self, remote: &Endpoint) -> Result<Incoming, TunnelError>;

    /// Stop a listener previously opened with `bind`
    async fn unbind(&mut self, remote: &Endpoint) -> Result<(), TunnelError>;

    /// Close the connection
    async fn close(self: Box<Self>);
}
