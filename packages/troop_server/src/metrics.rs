//! Relay metrics for observability
//!
//! Lock-free counters updated on the hot paths and summarized at shutdown.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct RelayMetrics {
    // Connection metrics
    /// Currently open TCP connections
    pub active_connections: AtomicU64,
    /// Total connections since server start
    pub total_connections: AtomicU64,
    /// Handshakes rejected for a wrong password
    pub auth_failures: AtomicU64,

    // Message metrics
    /// Queue entries processed by the dispatcher
    pub messages_relayed: AtomicU64,
    /// Queue entries dropped because the sender had already left
    pub messages_dropped: AtomicU64,
    /// Individual frames handed to client outboxes
    pub deliveries: AtomicU64,
    /// Full-state payloads forwarded to a joining client
    pub full_state_forwards: AtomicU64,

    // Error metrics
    /// Clients evicted after a failed send
    pub evictions: AtomicU64,
    /// Connections dropped for a framing error
    pub framing_errors: AtomicU64,

    start_time: Option<Instant>,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn auth_failed(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_relayed(&self) {
        self.messages_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivered(&self, count: u64) {
        self.deliveries.fetch_add(count, Ordering::Relaxed);
    }

    pub fn full_state_forwarded(&self) {
        self.full_state_forwards.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_evicted(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn framing_error(&self) {
        self.framing_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            messages_relayed: self.messages_relayed.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            full_state_forwards: self.full_state_forwards.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RelayMetrics`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub active_connections: u64,
    pub total_connections: u64,
    pub auth_failures: u64,
    pub messages_relayed: u64,
    pub messages_dropped: u64,
    pub deliveries: u64,
    pub full_state_forwards: u64,
    pub evictions: u64,
    pub framing_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_tracking() {
        let metrics = RelayMetrics::new();
        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.active_connections, 1);
        assert_eq!(snapshot.total_connections, 2);
    }

    #[test]
    fn test_delivery_counts() {
        let metrics = RelayMetrics::new();
        metrics.message_relayed();
        metrics.delivered(3);
        metrics.delivered(2);
        metrics.client_evicted();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_relayed, 1);
        assert_eq!(snapshot.deliveries, 5);
        assert_eq!(snapshot.evictions, 1);
        assert_eq!(snapshot.auth_failures, 0);
    }
}
