//! Connection listener.
//!
//! Binds the configured address, scanning upward from the requested port
//! until a bind succeeds, then accepts connections until shutdown. Every
//! accepted connection runs its own session task.

use std::io::ErrorKind;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::relay::{SessionHub, handle_connection};

/// Bind `host:port`, moving to the next port while the current one is busy.
///
/// Only "address in use" and "permission denied" trigger the scan; any other
/// bind error is returned as-is.
pub async fn bind_with_fallback(host: &str, port: u16) -> Result<TcpListener, RelayError> {
    let mut candidate = port;
    loop {
        match TcpListener::bind((host, candidate)).await {
            Ok(listener) => {
                if candidate != port {
                    info!("Port {} unavailable, bound port {} instead", port, candidate);
                }
                return Ok(listener);
            }
            Err(e) if matches!(e.kind(), ErrorKind::AddrInUse | ErrorKind::PermissionDenied) => {
                debug!("Port {} unavailable: {}", candidate, e);
            }
            Err(e) => return Err(e.into()),
        }

        candidate = candidate
            .checked_add(1)
            .ok_or_else(|| RelayError::PortRangeExhausted {
                host: host.to_string(),
                start: port,
            })?;
    }
}

/// Accept connections until the hub stops, spawning one session per peer.
///
/// The listening socket is dropped (closed) when this returns.
pub async fn accept_loop(listener: TcpListener, hub: Arc<SessionHub>) {
    let shutdown = hub.shutdown_token();
    loop {
        let (stream, address) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            },
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", address, e);
        }
        debug!("Accepted connection from {}", address);
        tokio::spawn(handle_connection(stream, address, hub.clone()));
    }
    info!("Listener closed");
}
