//! Troop relay server.
//!
//! Performers connect over TCP, authenticate with a shared password and join
//! a session. Edits are relayed to every performer in one global order; new
//! joiners are synchronised from the longest-connected performer.

pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod relay;
pub mod server;
pub mod session_log;
pub mod shutdown;
pub mod transport;

pub use config::RelayConfig;
pub use error::RelayError;
pub use server::RelayServer;
pub use shutdown::ShutdownController;
