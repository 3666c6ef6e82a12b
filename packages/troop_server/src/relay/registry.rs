//! Client Registry
//!
//! Every authenticated session, indexed by address, plus the join-ordered
//! list of performers, guarded together by one lock. The first entry in the
//! list is the leader.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::RelayError;

use super::protocol::{ClientId, Cursor, Message, PeerInfo};

/// Outbound handle to a connection's writer task.
pub type Outbox = mpsc::Sender<Message>;

/// Handles to one authenticated connection, recorded when it is admitted.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: ClientId,
    outbox: Outbox,
    closed: CancellationToken,
}

impl Session {
    pub fn new(id: ClientId, outbox: Outbox, closed: CancellationToken) -> Self {
        Self { id, outbox, closed }
    }

    /// Queue a message for this connection, waiting at most `timeout` for room.
    ///
    /// A closed writer or a full outbox that does not drain in time both mean
    /// the client is unreachable.
    pub async fn send(&self, message: Message, timeout: Duration) -> Result<(), RelayError> {
        self.outbox
            .send_timeout(message, timeout)
            .await
            .map_err(|_| RelayError::DeadClient { client_id: self.id })
    }

    /// End the connection: its reader and writer both stop.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Server-side view of one performer.
#[derive(Debug, Clone)]
pub struct Client {
    pub address: SocketAddr,
    pub id: ClientId,
    pub name: String,
    pub cursor: Cursor,
    session: Session,
}

impl Client {
    pub fn new(address: SocketAddr, session: Session, name: impl Into<String>) -> Self {
        Self {
            address,
            id: session.id,
            name: name.into(),
            cursor: Cursor::default(),
            session,
        }
    }

    pub async fn send(&self, message: Message, timeout: Duration) -> Result<(), RelayError> {
        self.session.send(message, timeout).await
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The JOIN payload announcing this client to others.
    pub fn peer_info(&self) -> PeerInfo {
        PeerInfo {
            client_id: self.id,
            name: self.name.clone(),
            hostname: self.address.ip().to_string(),
            port: self.address.port(),
            row: Some(self.cursor.row),
            col: Some(self.cursor.col),
        }
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    /// Joined clients in join order. `clients[0]` is the leader.
    clients: Vec<Client>,
    /// Every authenticated session, joined or not.
    sessions: HashMap<SocketAddr, Session>,
}

#[derive(Debug, Default)]
pub struct ClientRegistry {
    inner: RwLock<RegistryInner>,
    next_id: AtomicI64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next sequential id, starting at 0.
    pub fn allocate_id(&self) -> ClientId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Record a freshly authenticated connection and give it an id.
    ///
    /// An address maps to at most one live session; re-admitting replaces it.
    pub async fn admit(
        &self,
        address: SocketAddr,
        outbox: Outbox,
        closed: CancellationToken,
    ) -> ClientId {
        let mut inner = self.inner.write().await;
        let id = self.allocate_id();
        inner.sessions.insert(address, Session::new(id, outbox, closed));
        id
    }

    /// Id of an authenticated address.
    pub async fn id_of(&self, address: SocketAddr) -> Option<ClientId> {
        self.inner.read().await.sessions.get(&address).map(|s| s.id)
    }

    pub async fn session(&self, address: SocketAddr) -> Option<Session> {
        self.inner.read().await.sessions.get(&address).cloned()
    }

    /// Every authenticated session, joined or not, in id order.
    pub async fn sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> =
            self.inner.read().await.sessions.values().cloned().collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    /// Append a client to the join order. Returns false if its address has
    /// already joined.
    pub async fn register(&self, client: Client) -> bool {
        let mut inner = self.inner.write().await;
        if inner.clients.iter().any(|c| c.address == client.address) {
            return false;
        }
        inner
            .sessions
            .insert(client.address, client.session.clone());
        inner.clients.push(client);
        true
    }

    pub async fn lookup(&self, address: SocketAddr) -> Option<Client> {
        let inner = self.inner.read().await;
        inner.clients.iter().find(|c| c.address == address).cloned()
    }

    pub async fn find(&self, id: ClientId) -> Option<Client> {
        let inner = self.inner.read().await;
        inner.clients.iter().find(|c| c.id == id).cloned()
    }

    /// Drop an address from the session index and the join order. Returns
    /// the client only if it had joined.
    pub async fn remove(&self, address: SocketAddr) -> Option<Client> {
        let mut inner = self.inner.write().await;
        inner.sessions.remove(&address);
        let position = inner.clients.iter().position(|c| c.address == address)?;
        Some(inner.clients.remove(position))
    }

    /// Earliest-joined surviving client.
    pub async fn leader(&self) -> Option<Client> {
        self.inner.read().await.clients.first().cloned()
    }

    /// Snapshot of joined clients in join order.
    pub async fn all(&self) -> Vec<Client> {
        self.inner.read().await.clients.clone()
    }

    pub async fn set_cursor(&self, address: SocketAddr, cursor: Cursor) {
        let mut inner = self.inner.write().await;
        if let Some(client) = inner.clients.iter_mut().find(|c| c.address == address) {
            client.cursor = cursor;
        }
    }

    /// Number of joined clients.
    pub async fn len(&self) -> usize {
        self.inner.read().await.clients.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of authenticated sessions, joined or not.
    pub async fn admitted(&self) -> usize {
        self.inner.read().await.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn addr(port: u16) -> SocketAddr {
        ([127, 0, 0, 1], port).into()
    }

    async fn admit(registry: &ClientRegistry, port: u16) -> ClientId {
        let (tx, _rx) = mpsc::channel(1);
        registry
            .admit(addr(port), tx, CancellationToken::new())
            .await
    }

    async fn join(registry: &ClientRegistry, port: u16, name: &str) -> (Client, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(8);
        registry
            .admit(addr(port), tx, CancellationToken::new())
            .await;
        let session = registry.session(addr(port)).await.unwrap();
        let client = Client::new(addr(port), session, name);
        assert!(registry.register(client.clone()).await);
        (client, rx)
    }

    #[tokio::test]
    async fn test_ids_are_sequential_from_zero() {
        let registry = ClientRegistry::new();
        assert_eq!(registry.allocate_id(), 0);
        assert_eq!(admit(&registry, 1).await, 1);
        assert_eq!(admit(&registry, 2).await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_admissions_get_unique_ids() {
        let registry = Arc::new(ClientRegistry::new());
        let mut tasks = Vec::new();
        for port in 0..32u16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move { admit(&registry, 1000 + port).await }));
        }
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap());
        }
        ids.sort();
        assert_eq!(ids, (0..32).collect::<Vec<_>>());
        assert_eq!(registry.admitted().await, 32);
    }

    #[tokio::test]
    async fn test_leader_is_earliest_survivor() {
        let registry = ClientRegistry::new();
        assert!(registry.leader().await.is_none());

        let (a, _ra) = join(&registry, 1, "a").await;
        let (b, _rb) = join(&registry, 2, "b").await;
        let (_c, _rc) = join(&registry, 3, "c").await;
        assert_eq!(registry.leader().await.unwrap().id, a.id);

        let removed = registry.remove(a.address).await.unwrap();
        assert_eq!(removed.id, a.id);
        assert_eq!(registry.leader().await.unwrap().id, b.id);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_register_same_address_twice() {
        let registry = ClientRegistry::new();
        let (a, _ra) = join(&registry, 1, "a").await;
        assert!(!registry.register(a).await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_unjoined_address() {
        let registry = ClientRegistry::new();
        admit(&registry, 9).await;
        assert!(registry.remove(addr(9)).await.is_none());
        assert!(registry.id_of(addr(9)).await.is_none());
        assert!(registry.remove(addr(9)).await.is_none());
    }

    #[tokio::test]
    async fn test_lookup_and_find() {
        let registry = ClientRegistry::new();
        let (_a, _ra) = join(&registry, 1, "a").await;
        let (b, _rb) = join(&registry, 2, "b").await;
        assert_eq!(registry.lookup(addr(2)).await.unwrap().name, "b");
        assert_eq!(registry.find(b.id).await.unwrap().address, addr(2));
        assert!(registry.find(42).await.is_none());
        assert!(registry.lookup(addr(3)).await.is_none());
    }

    #[tokio::test]
    async fn test_cursor_reported_in_peer_info() {
        let registry = ClientRegistry::new();
        let (a, _ra) = join(&registry, 1, "a").await;
        registry.set_cursor(a.address, Cursor { row: 4, col: 2 }).await;

        let info = registry.lookup(a.address).await.unwrap().peer_info();
        assert_eq!(info.row, Some(4));
        assert_eq!(info.col, Some(2));
        assert_eq!(info.hostname, "127.0.0.1");
        assert_eq!(info.port, 1);
    }

    #[tokio::test]
    async fn test_send_to_closed_outbox_is_dead_client() {
        let registry = ClientRegistry::new();
        let (a, rx) = join(&registry, 1, "a").await;
        drop(rx);
        let err = a
            .send(Message::server_notice("x"), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::DeadClient { client_id } if client_id == a.id));
    }

    #[tokio::test]
    async fn test_send_to_full_outbox_times_out() {
        let registry = ClientRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        registry
            .admit(addr(1), tx, CancellationToken::new())
            .await;
        let session = registry.session(addr(1)).await.unwrap();

        // The receiver stays alive but nobody reads from it.
        session
            .send(Message::server_notice("first"), Duration::from_millis(10))
            .await
            .unwrap();
        let err = session
            .send(Message::server_notice("second"), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::DeadClient { client_id } if client_id == session.id));
    }

    #[tokio::test]
    async fn test_sessions_include_unjoined() {
        let registry = ClientRegistry::new();
        let (_a, _ra) = join(&registry, 1, "a").await;
        admit(&registry, 2).await;

        let ids: Vec<ClientId> = registry.sessions().await.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_closing_a_session_is_shared_by_clones() {
        let registry = ClientRegistry::new();
        let (a, _ra) = join(&registry, 1, "a").await;
        let stored = registry.session(addr(1)).await.unwrap();
        assert!(!stored.is_closed());
        a.session().close();
        assert!(stored.is_closed());
    }
}
