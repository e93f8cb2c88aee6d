//! SSH key pair provisioning

use std::path::Path;

use anyhow::{Context, Result};
use tokio::process::Command;

/// Make sure the agent's key pair exists, generating it with `ssh-keygen`.
///
/// A private key without its public half gets the public half derived from
/// it. When the private key is missing a fresh RSA pair is generated and the
/// public half moved to `public`.
pub async fn ensure_key_pair(private: &Path, public: &Path) -> Result<()> {
    match (private.exists(), public.exists()) {
        (true, true) => {
            tracing::debug!("Using existing SSH key at {:?}", private);
            Ok(())
        }
        (true, false) => derive_public_key(private, public).await,
        (false, _) => generate_key_pair(private, public).await,
    }
}

async fn generate_key_pair(private: &Path, public: &Path) -> Result<()> {
    tracing::info!("Generating new SSH key at {:?}", private);

    if let Some(parent) = private.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let status = Command::new("ssh-keygen")
        .args(["-q", "-t", "rsa", "-b", "4096", "-N", "", "-C", "remotexec-agent", "-f"])
        .arg(private)
        .status()
        .await
        .context("Failed to run ssh-keygen")?;

    if !status.success() {
        anyhow::bail!("ssh-keygen failed ({})", status);
    }

    let generated = private.with_file_name(format!(
        "{}.pub",
        private
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    ));
    if generated != public {
        tokio::fs::rename(&generated, public)
            .await
            .with_context(|| format!("Failed to move public key to {:?}", public))?;
    }

    tracing::info!("SSH key generated successfully");
    Ok(())
}

async fn derive_public_key(private: &Path, public: &Path) -> Result<()> {
    tracing::info!("Public key {:?} missing; deriving it from {:?}", public, private);

    let output = Command::new("ssh-keygen")
        .arg("-y")
        .arg("-f")
        .arg(private)
        .output()
        .await
        .context("Failed to run ssh-keygen")?;

    if !output.status.success() {
        anyhow::bail!(
            "ssh-keygen could not read {:?}: {}",
            private,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    tokio::fs::write(public, &output.stdout)
        .await
        .with_context(|| format!("Failed to write {:?}", public))
}
