//! IPC server implementation
//!
//! Listens on a unix socket that only the local host can reach. Each client
//! connection is served by its own task; requests on one connection are
//! answered in order.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use rx_core::ipc::{
    IpcRequest, IpcResponse, TunnelInfo, TUNNEL_ALREADY_ACTIVE, TUNNEL_CREATED, TUNNEL_REMOVED,
};

use crate::ops;
use crate::state::AgentState;
use crate::tunnel::{AddOutcome, DeleteOutcome};

/// Control-plane server bound to a unix socket
pub struct IpcServer {
    socket_path: PathBuf,
    listener: UnixListener,
    state: Arc<AgentState>,
}

impl IpcServer {
    /// Bind the socket, replacing a stale socket file left by a previous run.
    ///
    /// Fails without touching the file when another agent still accepts on it.
    pub fn bind(socket_path: impl Into<PathBuf>, state: Arc<AgentState>) -> Result<Self> {
        let socket_path = socket_path.into();

        if socket_path.exists() {
            match std::os::unix::net::UnixStream::connect(&socket_path) {
                Ok(_) => anyhow::bail!(
                    "Socket {:?} is in use by a running agent",
                    socket_path
                ),
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    tracing::debug!("Removing stale socket {:?}", socket_path);
                    std::fs::remove_file(&socket_path).with_context(|| {
                        format!("Failed to remove stale socket {:?}", socket_path)
                    })?;
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to check socket {:?}", socket_path))
                }
            }
        }
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind IPC socket {:?}", socket_path))?;
        std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to restrict permissions on {:?}", socket_path))?;

        Ok(Self {
            socket_path,
            listener,
            state,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Serve clients until the agent's shutdown token is cancelled
    pub async fn run(self) -> Result<()> {
        tracing::info!("IPC server listening on {:?}", self.socket_path);
        let shutdown = self.state.shutdown.clone();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("IPC server stopping");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(stream, state).await {
                                tracing::warn!("IPC client error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept IPC connection: {}", e);
                    }
                },
            }
        }

        Ok(())
    }
}

async fn handle_client(stream: UnixStream, state: Arc<AgentState>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break; // EOF
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<IpcRequest>(trimmed) {
            Ok(request) => handle_request(request, &state).await,
            Err(e) => IpcResponse::error(format!("Invalid request: {}", e)),
        };

        let mut response_json = serde_json::to_string(&response)?;
        response_json.push('\n');
        writer.write_all(response_json.as_bytes()).await?;
    }

    Ok(())
}

/// Answer one control-plane request
pub async fn handle_request(request: IpcRequest, state: &AgentState) -> IpcResponse {
    match request {
        IpcRequest::GetIp => match ops::get_ip(&state.config.ip_probe_address).await {
            Ok(ip) => IpcResponse::result(ip.to_string()),
            Err(e) => IpcResponse::error(e.to_string()),
        },

        IpcRequest::GetFileContent { path } => {
            tracing::debug!("Reading {}", path);
            match ops::get_file_content(&path).await {
                Ok(content) => IpcResponse::result(content),
                Err(e) => IpcResponse::error(e.to_string()),
            }
        }

        IpcRequest::ExecuteCommand { command } => {
            match ops::execute_command(&command, state.config.command_timeout).await {
                Ok(output) => IpcResponse::result(output),
                Err(e) => {
                    tracing::info!("Command failed: {}", e);
                    IpcResponse::error(e.to_string())
                }
            }
        }

        IpcRequest::ServiceRunning {
            address,
            protocol,
            port,
        } => {
            let running = ops::service_running(
                &address,
                protocol,
                port,
                state.config.service_probe_timeout,
            )
            .await;
            IpcResponse::Running { running }
        }

        IpcRequest::AddTunnel(request) => {
            let config = state.tunnel_config(&request);
            match state.tunnels.add(config) {
                Ok(AddOutcome::Accepted) => IpcResponse::result(TUNNEL_CREATED),
                Ok(AddOutcome::AlreadyActive) => IpcResponse::result(TUNNEL_ALREADY_ACTIVE),
                Err(e) => {
                    tracing::warn!("Rejected tunnel to {}: {}", request.address, e);
                    IpcResponse::error(e.to_string())
                }
            }
        }

        IpcRequest::DeleteTunnel(request) => {
            let config = state.tunnel_config(&request);
            match state.tunnels.delete(&config).await {
                DeleteOutcome::Removed => IpcResponse::result(TUNNEL_REMOVED),
                DeleteOutcome::NotFound => IpcResponse::error(format!(
                    "tunnel not found: {}@{} ({})",
                    config.server.username, config.server.address, config.forwards[0]
                )),
            }
        }

        IpcRequest::ListTunnels => IpcResponse::Tunnels {
            tunnels: state
                .tunnels
                .list()
                .into_iter()
                .map(TunnelInfo::from)
                .collect(),
        },

        IpcRequest::Ping => IpcResponse::Pong,

        IpcRequest::Shutdown => {
            tracing::info!("Shutdown requested via IPC");
            state.shutdown.cancel();
            IpcResponse::Ok
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::testing::MockConnector;
    use rx_core::config::AgentConfig;
    use rx_core::ipc::{TunnelRequest, FILE_MISSING};

    fn state(connector: &MockConnector) -> AgentState {
        AgentState::with_connector(AgentConfig::default(), Arc::new(connector.clone()))
    }

    fn request() -> TunnelRequest {
        TunnelRequest {
            local_port: 8080,
            remote_port: 9090,
            username: "ops".to_string(),
            address: "10.0.0.5".to_string(),
        }
    }

    #[tokio::test]
    async fn test_tunnel_requests() {
        let connector = MockConnector::new();
        let state = state(&connector);

        let add = IpcRequest::AddTunnel(request());
        assert_eq!(
            handle_request(add.clone(), &state).await,
            IpcResponse::result(TUNNEL_CREATED)
        );
        assert_eq!(
            handle_request(add, &state).await,
            IpcResponse::result(TUNNEL_ALREADY_ACTIVE)
        );

        match handle_request(IpcRequest::ListTunnels, &state).await {
            IpcResponse::Tunnels { tunnels } => {
                assert_eq!(tunnels.len(), 1);
                assert_eq!(tunnels[0].address, "10.0.0.5:22");
                assert_eq!(tunnels[0].username, "ops");
            }
            other => panic!("unexpected response: {:?}", other),
        }

        let delete = IpcRequest::DeleteTunnel(request());
        assert_eq!(
            handle_request(delete.clone(), &state).await,
            IpcResponse::result(TUNNEL_REMOVED)
        );
        match handle_request(delete, &state).await {
            IpcResponse::Error { message } => assert!(message.starts_with("tunnel not found")),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_add_rejects_invalid_ports() {
        let connector = MockConnector::new();
        let state = state(&connector);

        let mut bad = request();
        bad.remote_port = 0;
        assert!(matches!(
            handle_request(IpcRequest::AddTunnel(bad), &state).await,
            IpcResponse::Error { .. }
        ));
        assert!(state.tunnels.is_empty());
    }

    #[tokio::test]
    async fn test_stateless_requests() {
        let connector = MockConnector::new();
        let state = state(&connector);

        assert_eq!(
            handle_request(IpcRequest::Ping, &state).await,
            IpcResponse::Pong
        );
        assert_eq!(
            handle_request(
                IpcRequest::ExecuteCommand {
                    command: "echo hi".to_string()
                },
                &state
            )
            .await,
            IpcResponse::result("hi")
        );
        assert_eq!(
            handle_request(
                IpcRequest::GetFileContent {
                    path: "/nonexistent/rx-test-file".to_string()
                },
                &state
            )
            .await,
            IpcResponse::result(FILE_MISSING)
        );
    }

    #[tokio::test]
    async fn test_shutdown_cancels_token() {
        let connector = MockConnector::new();
        let state = state(&connector);

        assert_eq!(
            handle_request(IpcRequest::Shutdown, &state).await,
            IpcResponse::Ok
        );
        assert!(state.shutdown.is_cancelled());
    }
}
