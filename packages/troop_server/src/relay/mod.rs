//! Relay core: wire messages, the client registry, per-connection sessions
//! and the broadcast dispatcher.

pub mod dispatch;
pub mod handler;
pub mod hub;
pub mod protocol;
pub mod registry;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use dispatch::Dispatcher;
pub use handler::handle_connection;
pub use hub::{BroadcastQueue, QueueEntry, SessionHub};
pub use protocol::{
    AUTH_FAILED, ClientId, Credentials, Cursor, Departed, EditPayload, FullState,
    FullStateRequest, Message, Notice, PeerInfo, SERVER_ID,
};
pub use registry::{Client, ClientRegistry, Outbox, Session};
