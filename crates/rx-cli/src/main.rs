//! remotexec CLI
//!
//! Talks to a running `remotexecd` over its control socket:
//! - Stateless operations (ip, cat, exec, probe)
//! - Reverse tunnel management (tunnel add/rm/list)
//! - Agent liveness and shutdown (ping, stop)

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use remotexec::commands;
use remotexec::ipc::{AgentClient, ServiceProtocol, TunnelRequest};
use remotexec::output::print_error;

#[derive(Parser)]
#[command(name = "rx")]
#[command(author, version, about = "Remote execution agent client")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the agent control socket
    #[arg(
        short,
        long,
        global = true,
        env = "REMOTEXEC_SOCKET",
        default_value = "/tmp/remotexec.socket"
    )]
    socket: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the agent host's outbound IP
    Ip,

    /// Print a file from the agent host
    Cat {
        /// Path on the agent host
        path: String,
    },

    /// Run a command on the agent host (no shell expansion)
    Exec {
        /// Program and arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        argv: Vec<String>,
    },

    /// Check whether a service accepts connections from the agent host
    Probe {
        /// Service address
        address: String,
        /// Service port
        port: u16,
        /// Transport protocol (tcp or udp)
        #[arg(short = 'P', long, default_value = "tcp")]
        protocol: ServiceProtocol,
    },

    /// Manage reverse tunnels
    Tunnel {
        #[command(subcommand)]
        action: TunnelAction,
    },

    /// Check that the agent is running
    Ping,

    /// Stop the agent
    Stop,
}

#[derive(Subcommand)]
enum TunnelAction {
    /// Schedule a reverse tunnel
    Add(TunnelArgs),
    /// Remove a reverse tunnel
    #[command(alias = "remove")]
    Rm(TunnelArgs),
    /// List scheduled tunnels
    #[command(alias = "ls")]
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args)]
struct TunnelArgs {
    /// SSH server, `host` or `host:port`
    address: String,
    /// SSH login name
    #[arg(short, long)]
    user: String,
    /// Port of the local service to expose
    #[arg(short, long)]
    local_port: u16,
    /// Port to listen on at the SSH server
    #[arg(short, long)]
    remote_port: u16,
}

impl From<TunnelArgs> for TunnelRequest {
    fn from(args: TunnelArgs) -> Self {
        TunnelRequest {
            local_port: args.local_port,
            remote_port: args.remote_port,
            username: args.user,
            address: args.address,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let mut client = AgentClient::with_socket(cli.socket);

    if let Err(e) = run(&mut client, cli.command).await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(client: &mut AgentClient, command: Commands) -> Result<()> {
    match command {
        Commands::Ip => commands::ip_command(client).await,
        Commands::Cat { path } => commands::cat_command(client, &path).await,
        Commands::Exec { argv } => commands::exec_command(client, &argv).await,
        Commands::Probe {
            address,
            port,
            protocol,
        } => commands::probe_command(client, &address, port, protocol).await,
        Commands::Tunnel { action } => match action {
            TunnelAction::Add(args) => commands::tunnel_add_command(client, args.into()).await,
            TunnelAction::Rm(args) => commands::tunnel_rm_command(client, args.into()).await,
            TunnelAction::List { json } => commands::tunnel_list_command(client, json).await,
        },
        Commands::Ping => commands::ping_command(client).await,
        Commands::Stop => commands::stop_command(client).await,
    }
}
