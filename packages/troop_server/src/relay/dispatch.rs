//! Broadcast dispatcher.
//!
//! A single task drains the broadcast queue in FIFO order, so every client
//! observes relayed messages in the same order the server accepted them.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::session_log::SessionLog;

use super::hub::{BroadcastQueue, QueueEntry, SessionHub};

pub struct Dispatcher {
    hub: Arc<SessionHub>,
    queue: BroadcastQueue,
    log: Option<SessionLog>,
}

impl Dispatcher {
    pub fn new(hub: Arc<SessionHub>, queue: BroadcastQueue) -> Self {
        Self {
            hub,
            queue,
            log: None,
        }
    }

    /// Record every dispatched message to `log`.
    pub fn with_log(mut self, log: SessionLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Run until the hub stops or every producer is gone. Entries still
    /// queued at shutdown are dropped.
    pub async fn run(mut self) {
        let shutdown = self.hub.shutdown_token();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                entry = self.queue.recv() => match entry {
                    Some(entry) => {
                        self.dispatch(entry).await;
                    }
                    None => break,
                },
            }
        }
        debug!("Dispatcher stopped");
    }

    /// Relay one queue entry. Returns the number of clients it reached.
    pub async fn dispatch(&mut self, entry: QueueEntry) -> u64 {
        let QueueEntry {
            origin,
            mut message,
        } = entry;

        let source_id = match self.hub.resolve_origin(origin).await {
            Ok(id) => id,
            Err(e) => {
                debug!("Dropping {} message: {}", message.kind(), e);
                self.hub.metrics().message_dropped();
                return 0;
            }
        };

        message.stamp_source(source_id);
        debug!("Relaying {} from client {}", message.kind(), source_id);
        if let Some(cursor) = message.cursor() {
            self.hub.registry().set_cursor(origin, cursor).await;
        }
        if let Some(log) = self.log.as_mut() {
            if let Err(e) = log.record(&message).await {
                warn!("Failed to write session log: {}", e);
            }
        }

        self.hub.metrics().message_relayed();
        self.hub.broadcast(source_id, &message).await
    }
}
