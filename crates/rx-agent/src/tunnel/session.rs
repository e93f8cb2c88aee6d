//! One SSH connection serving every forward of a tunnel

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use rx_core::{TunnelConfig, TunnelError, TunnelId, TunnelState, TunnelStatus};

use super::forward::ForwardListener;
use super::transport::{Connector, TransportSession};

/// How a session ended
#[derive(Debug)]
pub enum SessionEnd {
    /// The owning tunnel was cancelled
    Cancelled,
    /// Setup failed, or a listener died after setup
    Failed {
        /// Whether every forward was bound before the failure
        served: bool,
        error: TunnelError,
    },
}

/// A single connect-bind-serve cycle for one tunnel.
///
/// Forwards are bound in order before any accept loop starts, so the tunnel
/// is never observable as serving with only some forwards up. If a bind
/// fails, the forwards bound so far are released and the connection closed.
pub struct TunnelSession<'a> {
    id: &'a TunnelId,
    config: &'a TunnelConfig,
    connector: &'a dyn Connector,
}

impl<'a> TunnelSession<'a> {
    pub fn new(id: &'a TunnelId, config: &'a TunnelConfig, connector: &'a dyn Connector) -> Self {
        Self {
            id,
            config,
            connector,
        }
    }

    /// Connect, bind all forwards, and serve until cancelled or a listener dies
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        status: &watch::Sender<TunnelStatus>,
    ) -> SessionEnd {
        tracing::info!(
            tunnel = %self.id,
            address = %self.config.server.address,
            "Connecting"
        );

        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = self.connector.connect(&self.config.server) => Some(r),
        };
        let mut link = match connected {
            Some(Ok(link)) => link,
            Some(Err(error)) => {
                return SessionEnd::Failed {
                    served: false,
                    error,
                }
            }
            None => return SessionEnd::Cancelled,
        };

        tracing::debug!(tunnel = %self.id, "Connected; binding {} forward(s)", self.config.forwards.len());

        let mut listeners = Vec::with_capacity(self.config.forwards.len());
        for forward in &self.config.forwards {
            let bound = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                r = link.bind(&forward.remote) => Some(r),
            };

            match bound {
                Some(Ok(incoming)) => {
                    listeners.push(ForwardListener::new(forward.clone(), incoming));
                }
                Some(Err(error)) => {
                    tracing::warn!(tunnel = %self.id, remote = %forward.remote, "Bind failed: {}", error);
                    self.release(link, listeners).await;
                    return SessionEnd::Failed {
                        served: false,
                        error,
                    };
                }
                None => {
                    self.release(link, listeners).await;
                    return SessionEnd::Cancelled;
                }
            }
        }

        let mut accept_loops = JoinSet::new();
        for listener in listeners {
            accept_loops.spawn(listener.run());
        }

        status.send_modify(|s| {
            s.state = TunnelState::Serving;
            s.attempt = 0;
            s.last_error = None;
        });
        tracing::info!(tunnel = %self.id, "Tunnel up");

        let end = tokio::select! {
            _ = cancel.cancelled() => SessionEnd::Cancelled,
            joined = accept_loops.join_next() => {
                let error = match joined {
                    Some(Ok(error)) => error,
                    Some(Err(e)) => TunnelError::Ssh(format!("listener task failed: {}", e)),
                    None => TunnelError::Ssh("no listeners running".to_string()),
                };
                SessionEnd::Failed { served: true, error }
            }
        };

        // Relay tasks are not part of the set and keep draining
        accept_loops.abort_all();
        link.close().await;
        tracing::info!(tunnel = %self.id, "Disconnected");

        end
    }

    /// Undo a partial setup: stop every bound listener, then close
    async fn release(&self, mut link: Box<dyn TransportSession>, listeners: Vec<ForwardListener>) {
        for listener in &listeners {
            let remote = &listener.forward().remote;
            if let Err(e) = link.unbind(remote).await {
                tracing::debug!(tunnel = %self.id, remote = %remote, "Unbind failed: {}", e);
            }
        }
        drop(listeners);
        link.close().await;
    }
}
