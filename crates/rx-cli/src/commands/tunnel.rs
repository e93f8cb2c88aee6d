//! Tunnel management commands

use anyhow::Result;

use crate::ipc::{AgentClient, TunnelRequest};
use crate::output::{format_tunnels, print_success, print_warning};

/// Schedule a reverse tunnel on the agent
pub async fn tunnel_add_command(client: &mut AgentClient, request: TunnelRequest) -> Result<()> {
    let target = format!("{}@{}", request.username, request.address);
    let message = client.add_tunnel(request).await?;

    if message == rx_core::ipc::TUNNEL_ALREADY_ACTIVE {
        print_warning(&format!("Tunnel to {} already active", target));
    } else {
        print_success(&format!("Tunnel to {} scheduled", target));
    }
    Ok(())
}

/// Tear down a reverse tunnel on the agent
pub async fn tunnel_rm_command(client: &mut AgentClient, request: TunnelRequest) -> Result<()> {
    let target = format!("{}@{}", request.username, request.address);
    client.delete_tunnel(request).await?;
    print_success(&format!("Tunnel to {} removed", target));
    Ok(())
}

/// List scheduled tunnels
pub async fn tunnel_list_command(client: &mut AgentClient, json: bool) -> Result<()> {
    let tunnels = client.list_tunnels().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tunnels)?);
    } else {
        println!("{}", format_tunnels(&tunnels));
    }
    Ok(())
}
