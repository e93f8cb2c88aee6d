//! Registry of scheduled reverse tunnels
//!
//! Each entry owns the cancellation token, status channel and task handle of
//! one [`ReconnectLoop`]. The map is keyed by the canonical [`TunnelId`], so
//! scheduling the same configuration twice never starts a second loop.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rx_core::config::TunnelSettings;
use rx_core::ipc::TunnelInfo;
use rx_core::{TunnelConfig, TunnelError, TunnelId, TunnelStatus};

use super::reconnect::ReconnectLoop;
use super::transport::Connector;

/// Result of [`TunnelManager::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new reconnect loop was started
    Accepted,
    /// A loop for the same identity is already running; nothing was started
    AlreadyActive,
}

/// Result of [`TunnelManager::delete`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Removed,
    NotFound,
}

/// Point-in-time view of one scheduled tunnel
#[derive(Debug, Clone)]
pub struct TunnelSnapshot {
    pub id: TunnelId,
    pub config: TunnelConfig,
    pub status: TunnelStatus,
}

impl From<TunnelSnapshot> for TunnelInfo {
    fn from(snapshot: TunnelSnapshot) -> Self {
        TunnelInfo {
            id: snapshot.id.fingerprint(),
            address: snapshot.config.server.address,
            username: snapshot.config.server.username,
            forwards: snapshot
                .config
                .forwards
                .iter()
                .map(|f| f.to_string())
                .collect(),
            state: snapshot.status.state,
            attempt: snapshot.status.attempt,
            last_error: snapshot.status.last_error,
        }
    }
}

struct ActiveTunnel {
    config: TunnelConfig,
    cancel: CancellationToken,
    status: watch::Receiver<TunnelStatus>,
    task: JoinHandle<()>,
}

impl ActiveTunnel {
    /// Wait for the loop to acknowledge cancellation, aborting it on timeout
    async fn join(mut self, id: &TunnelId, timeout: Duration) {
        if tokio::time::timeout(timeout, &mut self.task).await.is_err() {
            tracing::warn!(tunnel = %id, "Tunnel did not stop within {:?}; aborting", timeout);
            self.task.abort();
        }
    }
}

/// Owns every scheduled tunnel of the agent
pub struct TunnelManager {
    connector: Arc<dyn Connector>,
    settings: TunnelSettings,
    tunnels: DashMap<TunnelId, ActiveTunnel>,
}

impl TunnelManager {
    pub fn new(connector: Arc<dyn Connector>, settings: TunnelSettings) -> Self {
        Self {
            connector,
            settings,
            tunnels: DashMap::new(),
        }
    }

    /// Schedule a tunnel.
    ///
    /// Configuration errors and a missing private key are returned here.
    /// Everything that can go wrong later (dial, auth, bind) is retried by
    /// the tunnel's loop and only shows up in its status.
    pub fn add(&self, config: TunnelConfig) -> Result<AddOutcome, TunnelError> {
        config.validate()?;
        self.connector.preflight(&config.server)?;

        let id = config.id();
        match self.tunnels.entry(id.clone()) {
            Entry::Occupied(_) => {
                tracing::debug!(tunnel = %id, "Tunnel already active");
                Ok(AddOutcome::AlreadyActive)
            }
            Entry::Vacant(slot) => {
                let cancel = CancellationToken::new();
                let (status_tx, status_rx) = watch::channel(TunnelStatus::default());
                let reconnect = ReconnectLoop::new(
                    id.clone(),
                    config.clone(),
                    Arc::clone(&self.connector),
                    &self.settings,
                    status_tx,
                );
                let task = tokio::spawn(reconnect.run(cancel.clone()));

                tracing::info!(
                    tunnel = %id,
                    address = %config.server.address,
                    forwards = config.forwards.len(),
                    "Tunnel scheduled"
                );
                slot.insert(ActiveTunnel {
                    config,
                    cancel,
                    status: status_rx,
                    task,
                });
                Ok(AddOutcome::Accepted)
            }
        }
    }

    /// Stop a tunnel and wait for its loop to exit
    pub async fn delete(&self, config: &TunnelConfig) -> DeleteOutcome {
        let id = config.id();
        let Some((id, tunnel)) = self.tunnels.remove(&id) else {
            return DeleteOutcome::NotFound;
        };

        tunnel.cancel.cancel();
        tunnel.join(&id, self.settings.stop_timeout).await;
        tracing::info!(tunnel = %id, "Tunnel removed");
        DeleteOutcome::Removed
    }

    /// Snapshot every scheduled tunnel
    pub fn list(&self) -> Vec<TunnelSnapshot> {
        let mut tunnels: Vec<TunnelSnapshot> = self
            .tunnels
            .iter()
            .map(|entry| TunnelSnapshot {
                id: entry.key().clone(),
                config: entry.config.clone(),
                status: entry.status.borrow().clone(),
            })
            .collect();
        tunnels.sort_by(|a, b| a.id.cmp(&b.id));
        tunnels
    }

    /// Current status of a scheduled tunnel
    pub fn status(&self, id: &TunnelId) -> Option<TunnelStatus> {
        self.tunnels.get(id).map(|t| t.status.borrow().clone())
    }

    pub fn contains(&self, id: &TunnelId) -> bool {
        self.tunnels.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tunnels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
    }

    /// Cancel every tunnel, then wait for all of them
    pub async fn shutdown(&self) {
        let ids: Vec<TunnelId> = self.tunnels.iter().map(|e| e.key().clone()).collect();

        let mut stopping = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((id, tunnel)) = self.tunnels.remove(&id) {
                tunnel.cancel.cancel();
                stopping.push((id, tunnel));
            }
        }

        if !stopping.is_empty() {
            tracing::info!("Stopping {} tunnel(s)", stopping.len());
        }
        for (id, tunnel) in stopping {
            tunnel.join(&id, self.settings.stop_timeout).await;
        }
    }
}
