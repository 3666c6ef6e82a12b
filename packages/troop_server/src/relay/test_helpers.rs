use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::auth::password_digest;
use crate::config::RelayConfig;

use super::hub::{BroadcastQueue, SessionHub};
use super::protocol::{ClientId, Message, PeerInfo};

pub const TEST_PASSWORD: &str = "secret";

pub fn addr(port: u16) -> SocketAddr {
    ([127, 0, 0, 1], port).into()
}

pub fn test_config() -> RelayConfig {
    RelayConfig {
        password: TEST_PASSWORD.to_string(),
        send_timeout: Duration::from_millis(50),
        shutdown_grace: Duration::ZERO,
        ..RelayConfig::local()
    }
}

pub fn test_hub() -> (Arc<SessionHub>, BroadcastQueue) {
    SessionHub::new(&test_config())
}

pub fn peer(name: &str) -> PeerInfo {
    PeerInfo {
        client_id: -1,
        name: name.to_string(),
        hostname: String::new(),
        port: 0,
        row: None,
        col: None,
    }
}

/// Authenticate a fake connection at `127.0.0.1:port` without joining it.
/// The returned token is the one eviction cancels.
pub async fn authenticate(
    hub: &SessionHub,
    port: u16,
    capacity: usize,
) -> (ClientId, mpsc::Receiver<Message>, CancellationToken) {
    let (tx, rx) = mpsc::channel(capacity);
    let closed = hub.shutdown_token().child_token();
    let id = hub
        .authenticate(addr(port), &password_digest(TEST_PASSWORD), tx, closed.clone())
        .await
        .unwrap();
    (id, rx, closed)
}

/// Authenticate and join a fake client at `127.0.0.1:port`.
pub async fn connect(
    hub: &SessionHub,
    port: u16,
    name: &str,
) -> (ClientId, mpsc::Receiver<Message>) {
    let (_, rx, _) = authenticate(hub, port, 64).await;
    let id = hub.join(addr(port), peer(name)).await.unwrap();
    (id, rx)
}

/// Everything currently waiting in `rx`.
pub fn drain(rx: &mut mpsc::Receiver<Message>) -> Vec<Message> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        out.push(message);
    }
    out
}
