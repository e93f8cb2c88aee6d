//! CLI integration tests
//!
//! Drive the `rx` binary end to end, against either no agent at all or an
//! in-process agent serving a temporary socket.

use std::path::PathBuf;
use std::sync::Arc;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use tokio::runtime::Runtime;

use rx_agent::ipc::IpcServer;
use rx_agent::AgentState;
use rx_core::config::AgentConfig;

fn rx() -> Command {
    let mut cmd = Command::cargo_bin("rx").unwrap();
    cmd.env_remove("REMOTEXEC_SOCKET");
    cmd
}

/// Agent served from a background runtime for the duration of a test
struct TestAgent {
    dir: TempDir,
    _runtime: Runtime,
}

impl TestAgent {
    fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("id_rsa");
        std::fs::write(&key, "not a real key").unwrap();

        let config = AgentConfig {
            socket_path: dir.path().join("agent.sock"),
            private_key_path: key,
            ..AgentConfig::default()
        };

        let runtime = Runtime::new().unwrap();
        let state = Arc::new(AgentState::new(config));
        let server = runtime
            .block_on(async { IpcServer::bind(state.config.socket_path.clone(), state) })
            .unwrap();
        runtime.spawn(server.run());

        Self {
            dir,
            _runtime: runtime,
        }
    }

    fn socket(&self) -> PathBuf {
        self.dir.path().join("agent.sock")
    }

    fn rx(&self) -> Command {
        let mut cmd = rx();
        cmd.arg("--socket").arg(self.socket());
        cmd
    }
}

#[test]
fn test_help() {
    rx().arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Remote execution agent client"))
        .stdout(predicate::str::contains("tunnel"))
        .stdout(predicate::str::contains("exec"));
}

#[test]
fn test_version() {
    rx().arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_unknown_command() {
    rx().arg("frobnicate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_tunnel_add_requires_ports() {
    rx().args(["tunnel", "add", "10.0.0.5", "--user", "ops"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--local-port"));
}

#[test]
fn test_probe_rejects_unknown_protocol() {
    rx().args(["probe", "127.0.0.1", "80", "--protocol", "sctp"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported protocol"));
}

#[test]
fn test_agent_not_running() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("missing.sock");

    rx().arg("--socket")
        .arg(&socket)
        .arg("ping")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Is it running?"));
}

#[test]
fn test_stop_when_not_running() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("missing.sock");

    rx().arg("--socket")
        .arg(&socket)
        .arg("stop")
        .assert()
        .success()
        .stderr(predicate::str::contains("not running"));
}

#[test]
fn test_ping() {
    let agent = TestAgent::start();

    agent
        .rx()
        .arg("ping")
        .assert()
        .success()
        .stdout(predicate::str::contains("Agent is running"));
}

#[test]
fn test_socket_from_env() {
    let agent = TestAgent::start();

    rx().env("REMOTEXEC_SOCKET", agent.socket())
        .arg("ping")
        .assert()
        .success();
}

#[test]
fn test_exec() {
    let agent = TestAgent::start();

    agent
        .rx()
        .args(["exec", "echo", "hello", "world"])
        .assert()
        .success()
        .stdout("hello world\n");
}

#[test]
fn test_exec_failure() {
    let agent = TestAgent::start();

    agent.rx().args(["exec", "false"]).assert().failure();
}

#[test]
fn test_cat() {
    let agent = TestAgent::start();
    let file = agent.dir.path().join("motd");
    std::fs::write(&file, "welcome\n").unwrap();

    agent
        .rx()
        .arg("cat")
        .arg(&file)
        .assert()
        .success()
        .stdout("welcome\n");
}

#[test]
fn test_tunnel_lifecycle() {
    let agent = TestAgent::start();
    let tunnel = ["127.0.0.1:1", "-u", "ops", "-l", "8080", "-r", "9090"];

    agent
        .rx()
        .args(["tunnel", "add"])
        .args(tunnel)
        .assert()
        .success()
        .stdout(predicate::str::contains("scheduled"));

    agent
        .rx()
        .args(["tunnel", "add"])
        .args(tunnel)
        .assert()
        .success()
        .stderr(predicate::str::contains("already active"));

    agent
        .rx()
        .args(["tunnel", "list", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("127.0.0.1:1"))
        .stdout(predicate::str::contains("\"username\": \"ops\""));

    agent
        .rx()
        .args(["tunnel", "rm"])
        .args(tunnel)
        .assert()
        .success()
        .stdout(predicate::str::contains("removed"));

    agent
        .rx()
        .args(["tunnel", "rm"])
        .args(tunnel)
        .assert()
        .failure()
        .stderr(predicate::str::contains("tunnel not found"));

    agent
        .rx()
        .args(["tunnel", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No tunnels scheduled"));
}
