//! Stateless operations run on the agent host

use anyhow::Result;

use crate::ipc::{AgentClient, ServiceProtocol};

/// Print the agent's outbound IP
pub async fn ip_command(client: &mut AgentClient) -> Result<()> {
    let ip = client.get_ip().await?;
    println!("{}", ip);
    Ok(())
}

/// Print a file from the agent host
pub async fn cat_command(client: &mut AgentClient, path: &str) -> Result<()> {
    let content = client.get_file_content(path).await?;
    println!("{}", content);
    Ok(())
}

/// Run a command on the agent host and print its output
pub async fn exec_command(client: &mut AgentClient, argv: &[String]) -> Result<()> {
    if argv.is_empty() {
        anyhow::bail!("No command specified");
    }

    let output = client.execute_command(&argv.join(" ")).await?;
    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}

/// Probe a service from the agent host
///
/// Exits non-zero when the service is unreachable so scripts can branch on it.
pub async fn probe_command(
    client: &mut AgentClient,
    address: &str,
    port: u16,
    protocol: ServiceProtocol,
) -> Result<()> {
    let running = client.service_running(address, protocol, port).await?;
    if running {
        println!("{}/{}:{} is running", protocol, address, port);
        Ok(())
    } else {
        anyhow::bail!("{}/{}:{} is not running", protocol, address, port)
    }
}
