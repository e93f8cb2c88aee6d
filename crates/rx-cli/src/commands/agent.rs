//! Agent liveness and shutdown

use anyhow::Result;

use crate::ipc::AgentClient;
use crate::output::{print_error, print_success, print_warning};

/// Check that the agent answers on its control socket
pub async fn ping_command(client: &mut AgentClient) -> Result<()> {
    if client.ping().await? {
        print_success(&format!(
            "Agent is running at {}",
            client.socket_path().display()
        ));
        Ok(())
    } else {
        print_error("Agent answered with an unexpected response");
        anyhow::bail!("Ping failed")
    }
}

/// Ask the agent to shut down
pub async fn stop_command(client: &mut AgentClient) -> Result<()> {
    match client.shutdown().await {
        Ok(()) => {
            print_success("Agent stopped");
            Ok(())
        }
        Err(e) => {
            let msg = format!("{:#}", e);
            if msg.contains("Connection refused") || msg.contains("No such file") {
                print_warning("Agent is not running");
                Ok(())
            } else {
                Err(e)
            }
        }
    }
}
