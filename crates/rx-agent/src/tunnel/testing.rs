//! In-memory transport for exercising the tunnel lifecycle without SSH

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use rx_core::{Endpoint, Forward, SshServer, TunnelConfig, TunnelError};

use super::transport::{AcceptSender, Connector, Incoming, RelayStream, TransportSession};

/// Something the mock transport was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Connect,
    Bind(u16),
    Unbind(u16),
    Close,
}

/// Scripted result of one connect attempt
#[derive(Debug, Clone, Copy)]
pub enum ConnectOutcome {
    Succeed,
    Refuse,
    RejectAuth,
}

#[derive(Default)]
struct Shared {
    events: Vec<MockEvent>,
    script: VecDeque<ConnectOutcome>,
    fail_bind: Option<u16>,
    key_missing: bool,
    acceptors: HashMap<u16, AcceptSender>,
}

/// Connector whose sessions live in memory.
///
/// Connections are injected per remote port with [`MockConnector::inject`];
/// closing a port's queue simulates a remote listener dying.
#[derive(Clone, Default)]
pub struct MockConnector {
    shared: Arc<Mutex<Shared>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `n` connect attempts
    pub fn refuse_next(&self, n: usize) {
        let mut shared = self.shared.lock().unwrap();
        shared.script.extend(std::iter::repeat(ConnectOutcome::Refuse).take(n));
    }

    /// Queue explicit outcomes for the next connect attempts
    pub fn script(&self, outcomes: &[ConnectOutcome]) {
        self.shared.lock().unwrap().script.extend(outcomes.iter().copied());
    }

    /// Fail every bind request for this remote port
    pub fn fail_bind_on(&self, port: u16) {
        self.shared.lock().unwrap().fail_bind = Some(port);
    }

    /// Make `preflight` report the private key as missing
    pub fn key_missing(&self) {
        self.shared.lock().unwrap().key_missing = true;
    }

    /// Deliver a connection to the listener on `port`; false if none is open
    pub fn inject(&self, port: u16, stream: impl RelayStream + 'static) -> bool {
        let shared = self.shared.lock().unwrap();
        match shared.acceptors.get(&port) {
            Some(tx) => tx.send(Box::new(stream)).is_ok(),
            None => false,
        }
    }

    /// Close the accept queue of `port`
    pub fn close_listener(&self, port: u16) {
        self.shared.lock().unwrap().acceptors.remove(&port);
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.shared.lock().unwrap().events.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| **e == MockEvent::Connect)
            .count()
    }

    pub fn is_listening(&self, port: u16) -> bool {
        self.shared.lock().unwrap().acceptors.contains_key(&port)
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn preflight(&self, server: &SshServer) -> Result<(), TunnelError> {
        if self.shared.lock().unwrap().key_missing {
            return Err(TunnelError::KeyNotFound {
                path: server.private_key_path.clone(),
            });
        }
        Ok(())
    }

    async fn connect(&self, server: &SshServer) -> Result<Box<dyn TransportSession>, TunnelError> {
        let outcome = {
            let mut shared = self.shared.lock().unwrap();
            shared.events.push(MockEvent::Connect);
            shared.script.pop_front().unwrap_or(ConnectOutcome::Succeed)
        };

        match outcome {
            ConnectOutcome::Succeed => Ok(Box::new(MockSession {
                shared: Arc::clone(&self.shared),
                bound: Vec::new(),
            })),
            ConnectOutcome::Refuse => Err(TunnelError::Connect {
                address: server.address.clone(),
                message: "connection refused".to_string(),
            }),
            ConnectOutcome::RejectAuth => Err(TunnelError::AuthRejected {
                address: server.address.clone(),
                username: server.username.clone(),
            }),
        }
    }
}

struct MockSession {
    shared: Arc<Mutex<Shared>>,
    bound: Vec<u16>,
}

#[async_trait]
impl TransportSession for MockSession {
    async fn bind(&mut self, remote: &Endpoint) -> Result<Incoming, TunnelError> {
        let mut shared = self.shared.lock().unwrap();
        shared.events.push(MockEvent::Bind(remote.port));

        if shared.fail_bind == Some(remote.port) {
            return Err(TunnelError::BindFailed {
                remote: remote.to_string(),
                message: "request denied".to_string(),
            });
        }

        let (tx, incoming) = Incoming::channel(remote.clone());
        shared.acceptors.insert(remote.port, tx);
        self.bound.push(remote.port);
        Ok(incoming)
    }

    async fn unbind(&mut self, remote: &Endpoint) -> Result<(), TunnelError> {
        let mut shared = self.shared.lock().unwrap();
        shared.events.push(MockEvent::Unbind(remote.port));
        shared.acceptors.remove(&remote.port);
        self.bound.retain(|p| *p != remote.port);
        Ok(())
    }

    async fn close(self: Box<Self>) {
        let mut shared = self.shared.lock().unwrap();
        shared.events.push(MockEvent::Close);
        for port in &self.bound {
            shared.acceptors.remove(port);
        }
    }
}

/// Single-forward tunnel `127.0.0.1:8080 <- 127.0.0.1:<remote_port>` on 10.0.0.5
pub fn sample_config(remote_port: u16) -> TunnelConfig {
    TunnelConfig {
        server: SshServer {
            address: "10.0.0.5:22".to_string(),
            username: "ops".to_string(),
            private_key_path: PathBuf::from("/id_rsa"),
        },
        forwards: vec![Forward::new(
            Endpoint::new("127.0.0.1", 8080),
            Endpoint::new("127.0.0.1", remote_port),
        )],
    }
}
