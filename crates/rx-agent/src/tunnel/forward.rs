//! Accept loop for one reverse-forwarded port

use rx_core::{Forward, TunnelError};

use super::pipe::pipe_connection;
use super::transport::Incoming;

/// Accepts connections on one remote listener and relays each to the
/// forward's local endpoint.
///
/// Every accepted connection gets its own relay task, unconditionally.
/// Relay tasks are detached: they outlive the listener and drain on their
/// own when the tunnel is cancelled.
pub struct ForwardListener {
    forward: Forward,
    incoming: Incoming,
}

impl ForwardListener {
    pub fn new(forward: Forward, incoming: Incoming) -> Self {
        Self { forward, incoming }
    }

    pub fn forward(&self) -> &Forward {
        &self.forward
    }

    /// Run until accepting fails, returning that failure
    pub async fn run(mut self) -> TunnelError {
        tracing::info!(
            remote = %self.incoming.remote(),
            local = %self.forward.local,
            "Listening on remote"
        );

        loop {
            match self.incoming.accept().await {
                Ok(stream) => {
                    tracing::debug!(remote = %self.forward.remote, "Accepted forwarded connection");
                    let local = self.forward.local.clone();
                    tokio::spawn(async move {
                        pipe_connection(stream, &local).await;
                    });
                }
                Err(e) => {
                    tracing::warn!(remote = %self.forward.remote, "Accept failed: {}", e);
                    return e;
                }
            }
        }
    }
}
