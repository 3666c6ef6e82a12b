//! Graceful termination: final notice, short grace period, then stop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::info;

use crate::relay::SessionHub;

/// Text of the notice every client receives when the server goes down.
pub const FAREWELL_NOTICE: &str =
    "Warning: Server manually killed by keyboard interrupt. Please close the application";

#[derive(Clone)]
pub struct ShutdownController {
    hub: Arc<SessionHub>,
    grace: Duration,
    fired: Arc<AtomicBool>,
}

impl ShutdownController {
    pub fn new(hub: Arc<SessionHub>, grace: Duration) -> Self {
        Self {
            hub,
            grace,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Notify every client, wait out the grace period, then stop the hub.
    /// Stopping closes the listener, ends the dispatcher and unblocks every
    /// session. Only the first call does anything; it returns true.
    pub async fn shutdown(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }

        let notified = self.hub.notify_all(FAREWELL_NOTICE).await;
        info!("Shutting down, notified {} client(s)", notified);
        tokio::time::sleep(self.grace).await;
        self.hub.stop();
        true
    }
}
