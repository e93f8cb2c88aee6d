//! One-shot operations served by the control plane

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpStream, UdpSocket};
use tokio::process::Command;

use rx_core::ipc::{ServiceProtocol, FILE_MISSING};

/// Errors from the stateless operations
#[derive(Debug, Error)]
pub enum OpsError {
    /// Nothing to run
    #[error("Empty command line")]
    EmptyCommand,

    /// The program could not be started
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The program ran and exited unsuccessfully
    #[error("{program} failed ({status}): {output}")]
    Failed {
        program: String,
        status: ExitStatus,
        output: String,
    },

    /// The program outlived its time budget and was killed
    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    /// The file exists but could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    /// No route towards the probe address
    #[error("Failed to determine outbound IP via {probe}: {source}")]
    OutboundIp {
        probe: String,
        #[source]
        source: io::Error,
    },
}

/// Local IP of the interface that routes towards `probe`.
///
/// Connecting a UDP socket only selects a route; no packet is sent.
pub async fn get_ip(probe: &str) -> Result<IpAddr, OpsError> {
    let probe_err = |source| OpsError::OutboundIp {
        probe: probe.to_string(),
        source,
    };

    let target = tokio::net::lookup_host(probe)
        .await
        .map_err(probe_err)?
        .next()
        .ok_or_else(|| probe_err(io::Error::new(io::ErrorKind::NotFound, "no address")))?;

    let socket = UdpSocket::bind(unspecified_for(&target))
        .await
        .map_err(probe_err)?;
    socket.connect(target).await.map_err(probe_err)?;
    Ok(socket.local_addr().map_err(probe_err)?.ip())
}

/// Read a file as text with one trailing newline removed.
///
/// A missing file is not an error: it yields [`FILE_MISSING`].
pub async fn get_file_content(path: impl AsRef<Path>) -> Result<String, OpsError> {
    let path = path.as_ref();
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(strip_newline(String::from_utf8_lossy(&bytes).into_owned())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(FILE_MISSING.to_string()),
        Err(e) => Err(OpsError::Read {
            path: path.display().to_string(),
            source: e,
        }),
    }
}

/// Run a whitespace-separated command line without a shell.
///
/// Returns stdout followed by stderr with one trailing newline removed.
/// A non-zero exit is an error carrying the same output.
pub async fn execute_command(line: &str, timeout: Duration) -> Result<String, OpsError> {
    let mut fields = line.split_whitespace();
    let program = fields.next().ok_or(OpsError::EmptyCommand)?;

    tracing::debug!("Executing {:?}", line);
    let child = Command::new(program)
        .args(fields)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| OpsError::Timeout {
            program: program.to_string(),
            timeout,
        })?
        .map_err(|source| OpsError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    let text = strip_newline(text);

    if !output.status.success() {
        return Err(OpsError::Failed {
            program: program.to_string(),
            status: output.status,
            output: text,
        });
    }
    Ok(text)
}

/// Whether `address:port` accepts a TCP connection, or for UDP whether a
/// socket can be connected to it
pub async fn service_running(
    address: &str,
    protocol: ServiceProtocol,
    port: u16,
    timeout: Duration,
) -> bool {
    let host = address.trim_start_matches('[').trim_end_matches(']');

    let probe = async {
        match protocol {
            ServiceProtocol::Tcp => TcpStream::connect((host, port)).await.map(drop),
            ServiceProtocol::Udp => {
                let target = tokio::net::lookup_host((host, port))
                    .await?
                    .next()
                    .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address"))?;
                let socket = UdpSocket::bind(unspecified_for(&target)).await?;
                socket.connect(target).await
            }
        }
    };

    match tokio::time::timeout(timeout, probe).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!("{} {}:{} is not running: {}", protocol, host, port, e);
            false
        }
        Err(_) => {
            tracing::debug!("{} {}:{} probe timed out", protocol, host, port);
            false
        }
    }
}

/// Wildcard bind address in the same family as `target`
fn unspecified_for(target: &SocketAddr) -> SocketAddr {
    match target {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    }
}

fn strip_newline(mut text: String) -> String {
    if text.ends_with('\n') {
        text.pop();
    }
    text
}
