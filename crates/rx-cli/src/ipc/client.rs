//! IPC client for communicating with the agent
//!
//! One unix-socket connection, reused for every request. Requests and
//! responses are single JSON lines.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use rx_core::ipc::{
    default_socket_path, IpcRequest, IpcResponse, ServiceProtocol, TunnelInfo, TunnelRequest,
};

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// Client for communicating with the agent daemon
pub struct AgentClient {
    socket_path: PathBuf,
    conn: Option<Connection>,
}

impl AgentClient {
    /// Create a new client for the default socket
    pub fn new() -> Self {
        Self::with_socket(default_socket_path())
    }

    /// Create a new client for a custom socket
    pub fn with_socket(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            conn: None,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Connect to the agent if not already connected
    pub async fn connect(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        tracing::debug!("Connecting to agent at {:?}", self.socket_path);
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to agent at {}. Is it running?",
                    self.socket_path.display()
                )
            })?;

        let (reader, writer) = stream.into_split();
        self.conn = Some(Connection {
            reader: BufReader::new(reader),
            writer,
        });
        Ok(())
    }

    /// Check if the agent is running
    pub async fn ping(&mut self) -> Result<bool> {
        match self.send_request(IpcRequest::Ping).await? {
            IpcResponse::Pong => Ok(true),
            _ => Ok(false),
        }
    }

    /// Outbound IP of the agent host
    pub async fn get_ip(&mut self) -> Result<String> {
        let response = self.send_request(IpcRequest::GetIp).await?;
        expect_result(response)
    }

    /// Contents of a file on the agent host
    pub async fn get_file_content(&mut self, path: &str) -> Result<String> {
        let request = IpcRequest::GetFileContent {
            path: path.to_string(),
        };
        let response = self.send_request(request).await?;
        expect_result(response)
    }

    /// Run a command line on the agent host
    pub async fn execute_command(&mut self, command: &str) -> Result<String> {
        let request = IpcRequest::ExecuteCommand {
            command: command.to_string(),
        };
        let response = self.send_request(request).await?;
        expect_result(response)
    }

    /// Probe a service from the agent host
    pub async fn service_running(
        &mut self,
        address: &str,
        protocol: ServiceProtocol,
        port: u16,
    ) -> Result<bool> {
        let request = IpcRequest::ServiceRunning {
            address: address.to_string(),
            protocol,
            port,
        };

        match self.send_request(request).await? {
            IpcResponse::Running { running } => Ok(running),
            IpcResponse::Error { message } => anyhow::bail!("{}", message),
            other => anyhow::bail!("Unexpected response: {:?}", other),
        }
    }

    /// Schedule a reverse tunnel
    pub async fn add_tunnel(&mut self, tunnel: TunnelRequest) -> Result<String> {
        let response = self.send_request(IpcRequest::AddTunnel(tunnel)).await?;
        expect_result(response)
    }

    /// Tear down a reverse tunnel
    pub async fn delete_tunnel(&mut self, tunnel: TunnelRequest) -> Result<String> {
        let response = self.send_request(IpcRequest::DeleteTunnel(tunnel)).await?;
        expect_result(response)
    }

    /// List scheduled tunnels
    pub async fn list_tunnels(&mut self) -> Result<Vec<TunnelInfo>> {
        match self.send_request(IpcRequest::ListTunnels).await? {
            IpcResponse::Tunnels { tunnels } => Ok(tunnels),
            IpcResponse::Error { message } => anyhow::bail!("{}", message),
            other => anyhow::bail!("Unexpected response: {:?}", other),
        }
    }

    /// Shutdown the agent
    pub async fn shutdown(&mut self) -> Result<()> {
        match self.send_request(IpcRequest::Shutdown).await? {
            IpcResponse::Ok => Ok(()),
            IpcResponse::Error { message } => anyhow::bail!("{}", message),
            other => anyhow::bail!("Unexpected response: {:?}", other),
        }
    }

    /// Send a request and receive its response
    async fn send_request(&mut self, request: IpcRequest) -> Result<IpcResponse> {
        self.connect().await?;
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Not connected"))?;

        let mut request_json = serde_json::to_string(&request)?;
        request_json.push('\n');
        conn.writer.write_all(request_json.as_bytes()).await?;

        let mut response_line = String::new();
        if conn.reader.read_line(&mut response_line).await? == 0 {
            self.conn = None;
            anyhow::bail!("Agent closed the connection");
        }

        let response: IpcResponse = serde_json::from_str(&response_line)
            .with_context(|| format!("Malformed response: {}", response_line.trim()))?;
        Ok(response)
    }
}

impl Default for AgentClient {
    fn default() -> Self {
        Self::new()
    }
}

fn expect_result(response: IpcResponse) -> Result<String> {
    match response {
        IpcResponse::Result { result } => Ok(result),
        IpcResponse::Error { message } => anyhow::bail!("{}", message),
        other => anyhow::bail!("Unexpected response: {:?}", other),
    }
}
