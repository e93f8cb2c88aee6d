//! remotexec agent daemon
//!
//! Serves the control plane on a unix socket and keeps the scheduled
//! reverse SSH tunnels alive until they are deleted or the daemon stops.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rx_agent::ipc::IpcServer;
use rx_agent::keys::ensure_key_pair;
use rx_agent::AgentState;
use rx_core::config::{self, AgentConfig, BackoffConfig};

#[derive(Parser)]
#[command(name = "remotexecd")]
#[command(about = "remotexec agent - remote execution and reverse SSH tunnels")]
#[command(version)]
struct Args {
    /// Path of the control-plane unix socket
    #[arg(long, env = "REMOTEXEC_SOCKET")]
    socket_path: Option<PathBuf>,

    /// JSON file with tunnels to bring up at startup [default: /tmp/sshtunnel.json]
    #[arg(long)]
    tunnel_path: Option<PathBuf>,

    /// Path to the private key used for tunnels
    #[arg(short, long)]
    key: Option<PathBuf>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground {
        "debug"
    } else {
        &args.log_level
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("remotexec agent starting...");

    // Load configuration
    let config_path = args.config.clone().unwrap_or_else(config::default_config_path);
    let mut config: AgentConfig = if config_path.exists() {
        config::load_config(&config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        if args.config.is_some() {
            anyhow::bail!("Config file {:?} does not exist", config_path);
        }
        AgentConfig::default()
    };

    // Apply command-line overrides
    if let Some(socket_path) = args.socket_path {
        config.socket_path = socket_path;
    }
    if let Some(tunnel_path) = args.tunnel_path {
        config.tunnels_file = Some(tunnel_path);
    }
    if let Some(key) = args.key {
        config.public_key_path = public_key_for(&key);
        config.private_key_path = key;
    }

    if let Err(e) = config.validate() {
        tracing::warn!("{}; using default backoff", e);
        config.tunnel.backoff = BackoffConfig::default();
    }

    // Tunnels need the key, the stateless operations do not
    if config.generate_key {
        if let Err(e) = ensure_key_pair(&config.private_key_path, &config.public_key_path).await {
            tracing::error!("Failed to provision SSH key pair: {:#}", e);
        }
    }

    let state = Arc::new(AgentState::new(config));

    // Only a failure to bind the control socket is fatal
    let server = IpcServer::bind(state.config.socket_path.clone(), Arc::clone(&state))?;

    if let Some(path) = &state.config.tunnels_file {
        load_tunnels_file(&state, path);
    }

    // Stop on SIGINT/SIGTERM as well as on an IPC shutdown request
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Signal received, shutting down");
        shutdown.cancel();
    });

    let socket_path = server.socket_path().to_path_buf();
    let served = server.run().await;

    state.tunnels.shutdown().await;
    if let Err(e) = std::fs::remove_file(&socket_path) {
        tracing::debug!("Failed to remove socket {:?}: {}", socket_path, e);
    }

    tracing::info!("remotexec agent stopped");
    served
}

/// Schedule every tunnel listed in the startup file
fn load_tunnels_file(state: &AgentState, path: &std::path::Path) {
    let tunnels = match config::load_tunnels(path) {
        Ok(tunnels) => tunnels,
        Err(e) => {
            tracing::warn!("Ignoring tunnels file {:?}: {}", path, e);
            return;
        }
    };

    tracing::info!("Loading {} tunnel(s) from {:?}", tunnels.len(), path);
    for tunnel in tunnels {
        let address = tunnel.server.address.clone();
        if let Err(e) = state.tunnels.add(tunnel) {
            tracing::warn!("Skipping tunnel to {}: {}", address, e);
        }
    }
}

/// `<key>.pub` next to a private key given on the command line
fn public_key_for(private: &std::path::Path) -> PathBuf {
    let mut name = private.as_os_str().to_owned();
    name.push(".pub");
    PathBuf::from(name)
}

async fn wait_for_signal() {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}
