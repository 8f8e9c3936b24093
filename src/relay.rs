//! Relay coordinator.
//!
//! [`Relay`] owns the process-wide pieces: the registry, the client
//! listener and the admin listener. Its lifecycle is tied to [`Relay::start`]
//! and [`Relay::shutdown`].
//!
//! # Example
//!
//! ```no_run
//! use presence_relay::{Relay, RelayConfig};
//!
//! # async fn example() -> presence_relay::Result<()> {
//! let relay = Relay::start(RelayConfig::default()).await?;
//! println!("clients: {}, admin: {}", relay.ws_url(), relay.admin_url());
//!
//! tokio::signal::ctrl_c().await?;
//! relay.shutdown().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, error, info, warn};

use crate::admin::{self, AdminState};
use crate::config::RelayConfig;
use crate::dispatch::PushDispatcher;
use crate::error::Result;
use crate::registry::ConnectionRegistry;
use crate::transport::RelayServer;
use crate::transport::server::SHUTDOWN_CLOSE_REASON;

// ============================================================================
// Constants
// ============================================================================

/// Grace period for in-flight admin requests once shutdown begins.
const ADMIN_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

// ============================================================================
// Relay
// ============================================================================

/// Running relay: client listener, admin listener and shared registry.
pub struct Relay {
    /// Shared connection registry.
    registry: Arc<ConnectionRegistry>,

    /// Client WebSocket server.
    server: Arc<RelayServer>,

    /// Bound admin address.
    admin_addr: SocketAddr,

    /// Stops the admin server.
    admin_shutdown: Mutex<Option<oneshot::Sender<()>>>,

    /// Admin server task.
    admin_task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("ws_addr", &self.ws_addr())
            .field("admin_addr", &self.admin_addr)
            .field("online", &self.registry.size())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Relay - Lifecycle
// ============================================================================

impl Relay {
    /// Validates `config`, binds both listeners and starts serving.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::Config`] if the configuration is invalid
    /// - [`crate::Error::Io`] if either listener cannot bind
    pub async fn start(config: RelayConfig) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(ConnectionRegistry::new());

        let admin_listener = TcpListener::bind(config.admin_addr).await?;
        let admin_addr = admin_listener.local_addr()?;

        let server = RelayServer::bind(config.ws_addr, Arc::clone(&registry), config.gate()).await?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = admin::router(AdminState::new(Arc::clone(&registry)));

        let admin_task = tokio::spawn(async move {
            let result = axum::serve(admin_listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;

            if let Err(e) = result {
                error!(error = %e, "Admin server failed");
            }
        });

        info!(
            ws_addr = %server.local_addr(),
            admin_addr = %admin_addr,
            roles = ?config.accepted_roles,
            "Relay started"
        );

        Ok(Self {
            registry,
            server,
            admin_addr,
            admin_shutdown: Mutex::new(Some(shutdown_tx)),
            admin_task: Mutex::new(Some(admin_task)),
        })
    }

    /// Stops both listeners and closes every registered connection.
    ///
    /// Close frames are best-effort; the relay does not wait for clients.
    /// Calling this more than once is harmless.
    pub async fn shutdown(&self) {
        info!("Relay shutting down");

        self.server.stop();

        if let Some(tx) = self.admin_shutdown.lock().take() {
            let _ = tx.send(());
        }

        let connections = self.registry.drain();
        for connection in &connections {
            connection.close(CloseCode::Away, SHUTDOWN_CLOSE_REASON);
            debug!(client_id = %connection.client_id(), "Connection closed during shutdown");
        }

        // A push stuck on a client that stopped reading holds the admin
        // server open, so the wait is bounded
        let admin_task = self.admin_task.lock().take();
        if let Some(mut task) = admin_task {
            match timeout(ADMIN_SHUTDOWN_GRACE, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Admin server task panicked"),
                Err(_) => {
                    warn!(
                        grace_ms = ADMIN_SHUTDOWN_GRACE.as_millis() as u64,
                        "Admin server did not stop in time, aborting"
                    );
                    task.abort();
                }
            }
        }

        info!(closed = connections.len(), "Relay shutdown complete");
    }
}

// ============================================================================
// Relay - Accessors
// ============================================================================

impl Relay {
    /// Returns the shared registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Creates a dispatcher bound to this relay's registry.
    #[must_use]
    pub fn dispatcher(&self) -> PushDispatcher {
        PushDispatcher::new(Arc::clone(&self.registry))
    }

    /// Returns the client listener address.
    #[inline]
    #[must_use]
    pub fn ws_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Returns the admin listener address.
    #[inline]
    #[must_use]
    pub fn admin_addr(&self) -> SocketAddr {
        self.admin_addr
    }

    /// Returns the client WebSocket URL.
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        self.server.ws_url()
    }

    /// Returns the admin base URL.
    #[inline]
    #[must_use]
    pub fn admin_url(&self) -> String {
        format!("http://{}", self.admin_addr)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> RelayConfig {
        RelayConfig::new()
            .with_ws_addr("127.0.0.1:0".parse().unwrap())
            .with_admin_addr("127.0.0.1:0".parse().unwrap())
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let relay = Relay::start(local_config()).await.expect("relay start");

        assert!(relay.ws_addr().port() > 0);
        assert!(relay.admin_addr().port() > 0);
        assert_ne!(relay.ws_addr(), relay.admin_addr());
        assert!(relay.ws_url().starts_with("ws://127.0.0.1:"));
        assert!(relay.admin_url().starts_with("http://127.0.0.1:"));
        assert!(relay.registry().is_empty());

        relay.shutdown().await;
        relay.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let config = local_config().with_accepted_roles(Vec::<String>::new());
        let err = Relay::start(config).await.unwrap_err();
        assert!(matches!(err, crate::Error::Config { .. }));
    }
}
