//! Agent daemon state

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use rx_core::config::AgentConfig;
use rx_core::ipc::TunnelRequest;
use rx_core::{Endpoint, Forward, SshServer, TunnelConfig};

use crate::tunnel::{Connector, SshConnector, TunnelManager};

/// State shared by every control-plane connection
pub struct AgentState {
    /// Configuration
    pub config: AgentConfig,
    /// Scheduled reverse tunnels
    pub tunnels: TunnelManager,
    /// Cancelled when a client asks the daemon to stop
    pub shutdown: CancellationToken,
}

impl AgentState {
    /// Create agent state backed by the SSH transport
    pub fn new(config: AgentConfig) -> Self {
        let connector = Arc::new(SshConnector::new(&config.tunnel));
        Self::with_connector(config, connector)
    }

    /// Create agent state with a custom transport
    pub fn with_connector(config: AgentConfig, connector: Arc<dyn Connector>) -> Self {
        let tunnels = TunnelManager::new(connector, config.tunnel.clone());
        Self {
            config,
            tunnels,
            shutdown: CancellationToken::new(),
        }
    }

    /// Build the tunnel a control-plane request describes.
    ///
    /// The request only names ports, user and server; hosts and key come
    /// from the configuration.
    pub fn tunnel_config(&self, request: &TunnelRequest) -> TunnelConfig {
        TunnelConfig {
            server: SshServer {
                address: self.config.ssh_address(&request.address),
                username: request.username.clone(),
                private_key_path: self.config.private_key_path.clone(),
            },
            forwards: vec![Forward::new(
                Endpoint::new(self.config.local_host.clone(), request.local_port),
                Endpoint::new(self.config.remote_bind_host.clone(), request.remote_port),
            )],
        }
    }
}
