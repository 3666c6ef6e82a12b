//! Error taxonomy for the relay core.
//!
//! Every per-connection failure is contained to that connection and the
//! registry; only [`RelayError::PortRangeExhausted`] is fatal to the server.

use std::net::SocketAddr;

use crate::relay::ClientId;
use crate::transport::FrameError;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("authentication failed for {peer}")]
    AuthenticationFailed { peer: SocketAddr },

    #[error("framing error: {0}")]
    Framing(#[from] FrameError),

    #[error("client {client_id} is unreachable")]
    DeadClient { client_id: ClientId },

    #[error("no client registered at {0}")]
    UnknownClient(SocketAddr),

    #[error("no free port on {host} between {start} and 65535")]
    PortRangeExhausted { host: String, start: u16 },

    #[error("server is shutting down")]
    ShuttingDown,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RelayError {
    /// True for failures that only mean the peer went away.
    pub fn is_disconnect(&self) -> bool {
        match self {
            RelayError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            RelayError::Framing(FrameError::Io(_)) => true,
            _ => false,
        }
    }
}
