//! russh-backed transport
//!
//! Each connection gets its own [`ClientHandler`]. The handler owns the
//! routing table from bound remote port to accept queue, so the queues close
//! exactly when russh drops the handler, i.e. when the connection is gone.

use std::path::Path;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use russh::client::{self, Config, Handle, Msg};
use russh::{Channel, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};

use rx_core::config::{HostKeyPolicy, TunnelSettings};
use rx_core::{Endpoint, SshServer, TunnelError};

use super::transport::{AcceptSender, Connector, Incoming, TransportSession};

/// Accept queues by bound remote port; a tunnel never binds one port twice
type Routes = DashMap<u32, AcceptSender>;

/// Opens reverse-forwarding SSH connections with public key auth
pub struct SshConnector {
    connect_timeout: Duration,
    keepalive_interval: Option<Duration>,
    host_key_policy: HostKeyPolicy,
}

impl SshConnector {
    pub fn new(settings: &TunnelSettings) -> Self {
        Self {
            connect_timeout: settings.connect_timeout,
            keepalive_interval: settings.keepalive_interval,
            host_key_policy: settings.host_key_policy.clone(),
        }
    }

    fn load_key(path: &Path) -> Result<KeyPair, TunnelError> {
        if !path.exists() {
            return Err(TunnelError::KeyNotFound {
                path: path.to_path_buf(),
            });
        }
        russh_keys::load_secret_key(path, None).map_err(|e| TunnelError::KeyLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl Connector for SshConnector {
    fn preflight(&self, server: &SshServer) -> Result<(), TunnelError> {
        if !server.private_key_path.exists() {
            return Err(TunnelError::KeyNotFound {
                path: server.private_key_path.clone(),
            });
        }
        Ok(())
    }

    async fn connect(&self, server: &SshServer) -> Result<Box<dyn TransportSession>, TunnelError> {
        // Read on every attempt so a rotated key is picked up
        let key = Arc::new(Self::load_key(&server.private_key_path)?);

        let routes = Arc::new(Routes::new());
        let rejected_key = Arc::new(OnceLock::new());
        let handler = ClientHandler {
            address: server.address.clone(),
            policy: self.host_key_policy.clone(),
            routes: Arc::clone(&routes),
            rejected_key: Arc::clone(&rejected_key),
        };

        let ssh_config = Arc::new(Config {
            keepalive_interval: self.keepalive_interval,
            ..Default::default()
        });

        tracing::debug!("Connecting to {}", server.address);
        let timed_out = || TunnelError::ConnectTimeout {
            address: server.address.clone(),
            timeout: self.connect_timeout,
        };
        let mut handle = tokio::time::timeout(
            self.connect_timeout,
            client::connect(ssh_config, server.address.as_str(), handler),
        )
        .await
        .map_err(|_| timed_out())?
        .map_err(|e| match rejected_key.get() {
            Some(fingerprint) => TunnelError::HostKeyRejected {
                address: server.address.clone(),
                fingerprint: fingerprint.clone(),
            },
            None => TunnelError::Connect {
                address: server.address.clone(),
                message: e.to_string(),
            },
        })?;

        tracing::debug!("Authenticating as user '{}'", server.username);
        let authenticated = tokio::time::timeout(
            self.connect_timeout,
            handle.authenticate_publickey(server.username.clone(), key),
        )
        .await
        .map_err(|_| timed_out())?
        .map_err(|e| TunnelError::Ssh(format!("Authentication error: {}", e)))?;

        if !authenticated {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await;
            return Err(TunnelError::AuthRejected {
                address: server.address.clone(),
                username: server.username.clone(),
            });
        }

        Ok(Box::new(SshSession {
            handle,
            routes: Arc::downgrade(&routes),
        }))
    }
}

/// An authenticated connection able to open remote listeners
struct SshSession {
    handle: Handle<ClientHandler>,
    routes: Weak<Routes>,
}

#[async_trait]
impl TransportSession for SshSession {
    async fn bind(&mut self, remote: &Endpoint) -> Result<Incoming, TunnelError> {
        let routes = self.routes.upgrade().ok_or_else(|| TunnelError::BindFailed {
            remote: remote.to_string(),
            message: "SSH connection closed".to_string(),
        })?;

        // Route first: the server may forward a connection before replying
        let port = u32::from(remote.port);
        let (tx, incoming) = Incoming::channel(remote.clone());
        routes.insert(port, tx);

        match self.handle.tcpip_forward(remote.host.clone(), port).await {
            Ok(_) => {
                tracing::debug!(remote = %remote, "Remote listener bound");
                Ok(incoming)
            }
            Err(e) => {
                routes.remove(&port);
                let message = match e {
                    russh::Error::RequestDenied => {
                        "request denied (port in use or forbidden by server)".to_string()
                    }
                    other => other.to_string(),
                };
                Err(TunnelError::BindFailed {
                    remote: remote.to_string(),
                    message,
                })
            }
        }
    }

    async fn unbind(&mut self, remote: &Endpoint) -> Result<(), TunnelError> {
        let port = u32::from(remote.port);
        if let Some(routes) = self.routes.upgrade() {
            routes.remove(&port);
        }
        self.handle
            .cancel_tcpip_forward(remote.host.clone(), port)
            .await
            .map_err(|e| TunnelError::Ssh(e.to_string()))
    }

    async fn close(self: Box<Self>) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::debug!("Disconnect failed: {}", e);
        }
    }
}

/// SSH client handler for one tunnel connection
struct ClientHandler {
    address: String,
    policy: HostKeyPolicy,
    routes: Arc<Routes>,
    /// Fingerprint of a key refused by the policy
    rejected_key: Arc<OnceLock<String>>,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();

        match &self.policy {
            HostKeyPolicy::InsecureAcceptAny => {
                tracing::warn!(
                    address = %self.address,
                    "Accepting unverified host key SHA256:{} (host_key_policy = insecure_accept_any)",
                    fingerprint
                );
                Ok(true)
            }
            policy if policy.accepts(&fingerprint) => {
                tracing::debug!(address = %self.address, "Host key verified against pinned fingerprint");
                Ok(true)
            }
            _ => {
                tracing::error!(
                    address = %self.address,
                    "Host key SHA256:{} is not pinned; refusing connection",
                    fingerprint
                );
                let _ = self.rejected_key.set(format!("SHA256:{}", fingerprint));
                Ok(false)
            }
        }
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(
            "Forwarded connection from {}:{} to {}:{}",
            originator_address,
            originator_port,
            connected_address,
            connected_port
        );

        let route = self.routes.get(&connected_port).map(|tx| tx.value().clone());
        match route {
            Some(tx) => {
                if tx.send(Box::new(channel.into_stream())).is_err() {
                    tracing::debug!(port = connected_port, "Listener gone; dropping connection");
                }
            }
            None => {
                tracing::warn!(port = connected_port, "No listener for forwarded port; closing channel");
                let _ = channel.close().await;
            }
        }
        Ok(())
    }
}
