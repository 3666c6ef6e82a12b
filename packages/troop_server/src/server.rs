//! Relay server assembly: listener, hub and dispatcher wired together.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::relay::{BroadcastQueue, Dispatcher, SessionHub};
use crate::session_log::SessionLog;
use crate::shutdown::ShutdownController;
use crate::transport::{accept_loop, bind_with_fallback};

pub struct RelayServer {
    config: RelayConfig,
    listener: TcpListener,
    hub: Arc<SessionHub>,
    queue: BroadcastQueue,
}

impl RelayServer {
    /// Bind the listening socket. A busy port is skipped in favour of the
    /// next free one; see [`RelayServer::local_addr`] for the outcome.
    pub async fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        let listener = bind_with_fallback(&config.host, config.port).await?;
        let (hub, queue) = SessionHub::new(&config);
        Ok(Self {
            config,
            listener,
            hub,
            queue,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn hub(&self) -> Arc<SessionHub> {
        self.hub.clone()
    }

    pub fn shutdown_controller(&self) -> ShutdownController {
        ShutdownController::new(self.hub.clone(), self.config.shutdown_grace)
    }

    /// Serve until the hub is stopped.
    pub async fn run(self) -> Result<(), RelayError> {
        let address = self.local_addr()?;

        let mut dispatcher = Dispatcher::new(self.hub.clone(), self.queue);
        if let Some(dir) = &self.config.session_log_dir {
            match SessionLog::create(dir).await {
                Ok(log) => dispatcher = dispatcher.with_log(log),
                Err(e) => warn!("Session logging disabled: {:#}", e),
            }
        }
        let dispatch = tokio::spawn(dispatcher.run());

        info!("Troop server running @ {}", address);
        accept_loop(self.listener, self.hub.clone()).await;

        if let Err(e) = dispatch.await {
            warn!("Dispatcher task failed: {}", e);
        }
        info!("Troop server stopped");
        Ok(())
    }
}
