//! IPC integration tests
//!
//! Runs the control-plane server on a temporary unix socket and talks to it
//! the way the CLI does.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use rx_agent::ipc::IpcServer;
use rx_agent::AgentState;
use rx_core::config::AgentConfig;
use rx_core::ipc::{IpcRequest, IpcResponse, ServiceProtocol, TunnelRequest};

struct TestAgent {
    dir: TempDir,
    state: Arc<AgentState>,
    server: JoinHandle<anyhow::Result<()>>,
}

impl TestAgent {
    /// Start an agent whose tunnels use a key file inside a temp dir
    fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("id_rsa");
        std::fs::write(&key, "not a real key").unwrap();

        let config = AgentConfig {
            socket_path: dir.path().join("agent.sock"),
            private_key_path: key,
            ..AgentConfig::default()
        };
        let state = Arc::new(AgentState::new(config));
        let server = IpcServer::bind(state.config.socket_path.clone(), Arc::clone(&state))
            .expect("Failed to bind IPC server");
        let server = tokio::spawn(server.run());

        Self { dir, state, server }
    }

    fn socket(&self) -> PathBuf {
        self.dir.path().join("agent.sock")
    }
}

/// IPC test client wrapper
struct TestClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: BufWriter<tokio::net::unix::OwnedWriteHalf>,
}

impl TestClient {
    async fn connect(path: &Path) -> Self {
        let stream = UnixStream::connect(path)
            .await
            .expect("Failed to connect to IPC socket");
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
        }
    }

    async fn send_request(&mut self, request: IpcRequest) -> IpcResponse {
        let mut request_json =
            serde_json::to_string(&request).expect("Failed to serialize request");
        request_json.push('\n');
        self.writer
            .write_all(request_json.as_bytes())
            .await
            .expect("Failed to write request");
        self.writer.flush().await.expect("Failed to flush");

        let mut response_line = String::new();
        self.reader
            .read_line(&mut response_line)
            .await
            .expect("Failed to read response");

        if response_line.is_empty() {
            panic!("Server sent empty response (connection closed?)");
        }

        serde_json::from_str(&response_line).expect("Failed to parse response")
    }
}

fn tunnel_request() -> TunnelRequest {
    TunnelRequest {
        local_port: 8080,
        remote_port: 9090,
        username: "ops".to_string(),
        // Nothing listens on port 1; the tunnel keeps retrying
        address: "127.0.0.1:1".to_string(),
    }
}

#[tokio::test]
async fn test_ipc_ping_pong() {
    let agent = TestAgent::start();
    let mut client = TestClient::connect(&agent.socket()).await;

    let response = client.send_request(IpcRequest::Ping).await;
    assert!(matches!(response, IpcResponse::Pong));

    agent.server.abort();
}

#[cfg(unix)]
#[tokio::test]
async fn test_socket_is_private() {
    use std::os::unix::fs::PermissionsExt;

    let agent = TestAgent::start();
    let mode = std::fs::metadata(agent.socket()).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);

    agent.server.abort();
}

#[tokio::test]
async fn test_stale_socket_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("agent.sock");
    std::fs::write(&socket, "stale").unwrap();

    let config = AgentConfig {
        socket_path: socket.clone(),
        ..AgentConfig::default()
    };
    let state = Arc::new(AgentState::new(config));
    let server = IpcServer::bind(socket.clone(), state).unwrap();
    let server = tokio::spawn(server.run());

    let mut client = TestClient::connect(&socket).await;
    assert!(matches!(
        client.send_request(IpcRequest::Ping).await,
        IpcResponse::Pong
    ));

    server.abort();
}

#[tokio::test]
async fn test_live_socket_is_not_replaced() {
    let agent = TestAgent::start();

    let config = AgentConfig {
        socket_path: agent.socket(),
        ..AgentConfig::default()
    };
    let second = Arc::new(AgentState::new(config));
    let err = IpcServer::bind(agent.socket(), second)
        .err()
        .expect("Second agent bound a live socket");
    assert!(err.to_string().contains("in use"));

    // The first agent keeps serving
    let mut client = TestClient::connect(&agent.socket()).await;
    assert!(matches!(
        client.send_request(IpcRequest::Ping).await,
        IpcResponse::Pong
    ));

    agent.server.abort();
}

#[tokio::test]
async fn test_ipc_stateless_operations() {
    let agent = TestAgent::start();
    let mut client = TestClient::connect(&agent.socket()).await;

    let file = agent.dir.path().join("motd");
    std::fs::write(&file, "welcome\n").unwrap();
    let response = client
        .send_request(IpcRequest::GetFileContent {
            path: file.display().to_string(),
        })
        .await;
    assert_eq!(response, IpcResponse::result("welcome"));

    let response = client
        .send_request(IpcRequest::GetFileContent {
            path: agent.dir.path().join("missing").display().to_string(),
        })
        .await;
    assert_eq!(response, IpcResponse::result("file doesn't exists"));

    let response = client
        .send_request(IpcRequest::ExecuteCommand {
            command: "echo hi".to_string(),
        })
        .await;
    assert_eq!(response, IpcResponse::result("hi"));

    let response = client
        .send_request(IpcRequest::ExecuteCommand {
            command: "false".to_string(),
        })
        .await;
    assert!(matches!(response, IpcResponse::Error { .. }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let response = client
        .send_request(IpcRequest::ServiceRunning {
            address: "127.0.0.1".to_string(),
            protocol: ServiceProtocol::Tcp,
            port,
        })
        .await;
    assert_eq!(response, IpcResponse::Running { running: true });

    agent.server.abort();
}

#[tokio::test]
async fn test_ipc_tunnel_lifecycle() {
    let agent = TestAgent::start();
    let mut client = TestClient::connect(&agent.socket()).await;

    let response = client
        .send_request(IpcRequest::AddTunnel(tunnel_request()))
        .await;
    assert_eq!(response, IpcResponse::result("tunnel created"));

    let response = client
        .send_request(IpcRequest::AddTunnel(tunnel_request()))
        .await;
    assert_eq!(response, IpcResponse::result("tunnel already active"));

    match client.send_request(IpcRequest::ListTunnels).await {
        IpcResponse::Tunnels { tunnels } => {
            assert_eq!(tunnels.len(), 1);
            assert_eq!(tunnels[0].address, "127.0.0.1:1");
            assert_eq!(tunnels[0].forwards, vec!["127.0.0.1:9090 -> 127.0.0.1:8080"]);
        }
        other => panic!("Unexpected response: {:?}", other),
    }

    let response = timeout(
        Duration::from_secs(10),
        client.send_request(IpcRequest::DeleteTunnel(tunnel_request())),
    )
    .await
    .expect("Delete did not complete");
    assert_eq!(response, IpcResponse::result("tunnel removed"));
    assert!(agent.state.tunnels.is_empty());

    let response = client
        .send_request(IpcRequest::DeleteTunnel(tunnel_request()))
        .await;
    assert!(matches!(
        response,
        IpcResponse::Error { message } if message.starts_with("tunnel not found")
    ));

    agent.server.abort();
}

#[tokio::test]
async fn test_ipc_add_tunnel_without_key() {
    let agent = TestAgent::start();
    std::fs::remove_file(agent.dir.path().join("id_rsa")).unwrap();
    let mut client = TestClient::connect(&agent.socket()).await;

    let response = client
        .send_request(IpcRequest::AddTunnel(tunnel_request()))
        .await;
    assert!(matches!(
        response,
        IpcResponse::Error { message } if message.contains("Private key not found")
    ));
    assert!(agent.state.tunnels.is_empty());

    agent.server.abort();
}

#[tokio::test]
async fn test_ipc_invalid_request() {
    let agent = TestAgent::start();
    let stream = UnixStream::connect(agent.socket()).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    writer.write_all(b"{\"type\":\"bogus\"}\n").await.unwrap();
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();

    let response: IpcResponse = serde_json::from_str(&line).unwrap();
    assert!(matches!(
        response,
        IpcResponse::Error { message } if message.starts_with("Invalid request")
    ));

    agent.server.abort();
}

#[tokio::test]
async fn test_ipc_shutdown_stops_server() {
    let agent = TestAgent::start();
    let mut client = TestClient::connect(&agent.socket()).await;

    let response = client.send_request(IpcRequest::Shutdown).await;
    assert_eq!(response, IpcResponse::Ok);

    let result = timeout(Duration::from_secs(5), agent.server)
        .await
        .expect("Server did not stop")
        .expect("Server task panicked");
    assert!(result.is_ok());
}
