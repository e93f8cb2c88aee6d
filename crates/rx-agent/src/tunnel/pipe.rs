//! Byte relay between one forwarded connection and the local service

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use rx_core::Endpoint;

use super::transport::BoxedStream;

/// Relay one accepted connection to `local`.
///
/// If the local service cannot be reached the inbound stream is closed and
/// the call returns; the listener is never affected. Otherwise bytes are
/// copied both ways until either direction ends, then both ends are shut
/// down. There is no inactivity timeout.
pub async fn pipe_connection(mut inbound: BoxedStream, local: &Endpoint) {
    let target = match TcpStream::connect(local.to_string()).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(local = %local, "Failed to dial local service: {}", e);
            let _ = inbound.shutdown().await;
            return;
        }
    };
    let _ = target.set_nodelay(true);

    tracing::debug!(local = %local, "Forwarded connection opened");

    let (mut inbound_rx, mut inbound_tx) = tokio::io::split(inbound);
    let (mut target_rx, mut target_tx) = target.into_split();

    let finished = tokio::select! {
        r = tokio::io::copy(&mut inbound_rx, &mut target_tx) => ("remote -> local", r),
        r = tokio::io::copy(&mut target_rx, &mut inbound_tx) => ("local -> remote", r),
    };

    match finished {
        (direction, Ok(bytes)) => {
            tracing::debug!(local = %local, "{} closed after {} bytes", direction, bytes)
        }
        (direction, Err(e)) => {
            tracing::debug!(local = %local, "{} failed: {}", direction, e)
        }
    }

    let _ = target_tx.shutdown().await;
    let _ = inbound_tx.shutdown().await;
}
