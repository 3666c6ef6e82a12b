//! Session Hub
//!
//! The shared context handed to every connection task and to the dispatcher.
//! It owns the client registry, the producer side of the broadcast queue, the
//! password baseline and the fallback document, and exposes the relay
//! operations sessions need: authenticate, join, unicast full-state, enqueue
//! for broadcast and leave.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::AuthGate;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::metrics::RelayMetrics;

use super::protocol::{
    ClientId, Departed, FullState, FullStateRequest, Message, PeerInfo,
};
use super::registry::{Client, ClientRegistry, Outbox};

/// One pending broadcast: who sent it and what.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub origin: SocketAddr,
    pub message: Message,
}

/// Consumer side of the broadcast queue, owned by the dispatcher.
pub type BroadcastQueue = mpsc::UnboundedReceiver<QueueEntry>;

#[derive(Debug, Clone, Copy)]
enum Departure {
    Left,
    Evicted,
}

/// Document handed to the very first performer.
fn empty_document() -> Value {
    json!({"ranges": {}, "contents": "", "marks": []})
}

pub struct SessionHub {
    registry: ClientRegistry,
    queue: mpsc::UnboundedSender<QueueEntry>,
    auth: AuthGate,
    /// Set when the first client joins, never updated afterwards.
    fallback_snapshot: OnceLock<Value>,
    /// Serializes join handling so introductions are never duplicated.
    joins: Mutex<()>,
    send_timeout: Duration,
    max_frame_bytes: usize,
    outbox_capacity: usize,
    shutdown: CancellationToken,
    metrics: RelayMetrics,
}

impl SessionHub {
    /// Create a hub and the broadcast queue its dispatcher will drain.
    pub fn new(config: &RelayConfig) -> (Arc<Self>, BroadcastQueue) {
        let (queue, rx) = mpsc::unbounded_channel();
        let hub = Self {
            registry: ClientRegistry::new(),
            queue,
            auth: AuthGate::new(&config.password),
            fallback_snapshot: OnceLock::new(),
            joins: Mutex::new(()),
            send_timeout: config.send_timeout,
            max_frame_bytes: config.max_frame_bytes,
            outbox_capacity: config.outbox_capacity,
            shutdown: CancellationToken::new(),
            metrics: RelayMetrics::new(),
        };
        (Arc::new(hub), rx)
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    pub fn outbox_capacity(&self) -> usize {
        self.outbox_capacity
    }

    pub fn fallback_snapshot(&self) -> Option<&Value> {
        self.fallback_snapshot.get()
    }

    // =========================================================================
    // Running flag
    // =========================================================================

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Flip the running flag. Sessions, the dispatcher and the listener all
    /// observe it.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    // =========================================================================
    // Session operations
    // =========================================================================

    /// Check a handshake digest. On success the connection is admitted to the
    /// registry with the next sequential id, its outbox and the token that
    /// ends it.
    pub async fn authenticate(
        &self,
        address: SocketAddr,
        presented: &str,
        outbox: Outbox,
        closed: CancellationToken,
    ) -> Result<ClientId, RelayError> {
        if !self.auth.verify(presented) {
            self.metrics.auth_failed();
            return Err(RelayError::AuthenticationFailed { peer: address });
        }
        let id = self.registry.admit(address, outbox, closed).await;
        info!("New connection from {} (client {})", address, id);
        Ok(id)
    }

    /// Register a joining client and introduce it to everyone else.
    ///
    /// Existing clients learn the newcomer's identity and the newcomer learns
    /// theirs. A later joiner's document is requested from the leader; the
    /// first joiner is seeded from the fallback snapshot instead.
    pub async fn join(&self, address: SocketAddr, peer: PeerInfo) -> Result<ClientId, RelayError> {
        let joining = self.joins.lock().await;

        let session = self
            .registry
            .session(address)
            .await
            .ok_or(RelayError::UnknownClient(address))?;
        let id = session.id;
        let newcomer = Client::new(address, session, peer.name);
        if !self.registry.register(newcomer.clone()).await {
            debug!("Client {} joined twice, ignoring", id);
            return Ok(id);
        }
        info!("Client {} joined as {:?}", id, newcomer.name);

        let mut dead = Vec::new();
        let announcement = Message::Join(newcomer.peer_info());
        for existing in self.registry.all().await.into_iter().filter(|c| c.id != id) {
            if existing
                .send(announcement.clone(), self.send_timeout)
                .await
                .is_err()
            {
                dead.push(existing.address);
            }
            if newcomer
                .send(Message::Join(existing.peer_info()), self.send_timeout)
                .await
                .is_err()
                && !dead.contains(&address)
            {
                dead.push(address);
            }
        }

        loop {
            match self.registry.leader().await {
                Some(leader) if leader.id != id => {
                    let request = Message::FullStateRequest(FullStateRequest {
                        requester_id: id,
                        target_client_id: id,
                    });
                    debug!("Asking leader {} to sync client {}", leader.id, id);
                    if leader.send(request, self.send_timeout).await.is_ok() {
                        break;
                    }
                    self.depart(leader.address, Departure::Evicted).await;
                }
                _ => {
                    let document = self.fallback_snapshot.get_or_init(empty_document).clone();
                    let seed = Message::FullState(FullState {
                        sender_id: id,
                        document,
                        target_client_id: id,
                    });
                    if newcomer.send(seed, self.send_timeout).await.is_err()
                        && !dead.contains(&address)
                    {
                        dead.push(address);
                    }
                    break;
                }
            }
        }
        drop(joining);

        for address in dead {
            self.depart(address, Departure::Evicted).await;
        }
        Ok(id)
    }

    /// Forward a full-state payload to the one client it targets.
    ///
    /// Returns false when the target is gone; nothing else happens then.
    pub async fn forward_full_state(&self, from: SocketAddr, state: FullState) -> bool {
        let Some(sender_id) = self.registry.id_of(from).await else {
            debug!("Dropping full state from unregistered {}", from);
            return false;
        };
        let Some(target) = self.registry.find(state.target_client_id).await else {
            debug!(
                "Dropping full state for departed client {}",
                state.target_client_id
            );
            return false;
        };

        let forward = Message::FullState(FullState {
            sender_id,
            document: state.document,
            target_client_id: target.id,
        });
        if target.send(forward, self.send_timeout).await.is_err() {
            self.depart(target.address, Departure::Evicted).await;
            return false;
        }
        self.metrics.full_state_forwarded();
        true
    }

    /// Hand a message to the dispatcher. Never blocks.
    pub fn enqueue(&self, origin: SocketAddr, message: Message) -> Result<(), RelayError> {
        if !self.is_running() {
            return Err(RelayError::ShuttingDown);
        }
        self.queue
            .send(QueueEntry { origin, message })
            .map_err(|_| RelayError::ShuttingDown)
    }

    /// Id currently registered for `origin`.
    pub async fn resolve_origin(&self, origin: SocketAddr) -> Result<ClientId, RelayError> {
        self.registry
            .id_of(origin)
            .await
            .ok_or(RelayError::UnknownClient(origin))
    }

    /// Deliver `message` to every joined client, skipping `source_id` when the
    /// message asks for echo suppression. Unreachable recipients are evicted
    /// once the cycle completes. Returns the number of successful deliveries.
    pub async fn broadcast(&self, source_id: ClientId, message: &Message) -> u64 {
        let skip_source = message.suppresses_echo();
        let recipients: Vec<Client> = self
            .registry
            .all()
            .await
            .into_iter()
            .filter(|c| !(skip_source && c.id == source_id))
            .collect();

        let (delivered, dead) = self.fan_out(&recipients, message).await;
        for address in dead {
            self.depart(address, Departure::Evicted).await;
        }
        delivered
    }

    /// Send a server notice to every authenticated session, joined or not.
    pub async fn notify_all(&self, text: &str) -> u64 {
        let notice = Message::server_notice(text);
        let mut delivered = 0;
        let mut unreachable = 0;
        for session in self.registry.sessions().await {
            match session.send(notice.clone(), self.send_timeout).await {
                Ok(()) => delivered += 1,
                Err(_) => unreachable += 1,
            }
        }
        if unreachable > 0 {
            debug!("{} session(s) unreachable for server notice", unreachable);
        }
        self.metrics.delivered(delivered);
        delivered
    }

    /// Remove a client and tell the others it left.
    pub async fn remove_client(&self, address: SocketAddr) -> Option<Client> {
        self.depart(address, Departure::Left).await
    }

    /// Called when a session ends. Departures are announced only while the
    /// server is running.
    pub async fn leave(&self, address: SocketAddr) {
        if self.is_running() {
            self.remove_client(address).await;
        } else {
            self.registry.remove(address).await;
        }
    }

    // =========================================================================
    // Delivery internals
    // =========================================================================

    async fn fan_out(&self, recipients: &[Client], message: &Message) -> (u64, Vec<SocketAddr>) {
        let mut delivered = 0;
        let mut dead = Vec::new();
        for client in recipients {
            match client.send(message.clone(), self.send_timeout).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!("{}", e);
                    dead.push(client.address);
                }
            }
        }
        self.metrics.delivered(delivered);
        (delivered, dead)
    }

    /// Remove `address` and announce the departure. Recipients that fail to
    /// take the announcement are evicted in turn. An evicted client's
    /// connection is closed.
    async fn depart(&self, address: SocketAddr, cause: Departure) -> Option<Client> {
        let first = self.registry.remove(address).await?;

        let mut pending = VecDeque::from([(first.clone(), cause)]);
        while let Some((gone, cause)) = pending.pop_front() {
            match cause {
                Departure::Left => {
                    info!("Client {} @ {} has disconnected", gone.id, gone.address)
                }
                Departure::Evicted => {
                    warn!("Evicting unreachable client {} @ {}", gone.id, gone.address);
                    gone.session().close();
                    self.metrics.client_evicted();
                }
            }

            let notice = Message::Departed(Departed { client_id: gone.id });
            let remaining = self.registry.all().await;
            let (_, dead) = self.fan_out(&remaining, &notice).await;
            for address in dead {
                if let Some(client) = self.registry.remove(address).await {
                    pending.push_back((client, Departure::Evicted));
                }
            }
        }
        Some(first)
    }
}
