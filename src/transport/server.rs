//! WebSocket server for client connections.
//!
//! # Connection Flow
//!
//! 1. Accept TCP connection
//! 2. Upgrade to WebSocket, capturing the request target
//! 3. [`HandshakeGate::admit`] validates `userId` and `role`
//! 4. Rejected: close with `1008`/`1011`, never registered
//! 5. Admitted: queue `connected` frame, insert into registry
//! 6. Run the connection event loop until CLOSED
//! 7. Exit path: release the registry entry (exactly once)
//!
//! A connection admitted after [`RelayServer::stop`] is released again and
//! closed with `1001`, so a shutdown drain never misses it.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::result::Result as StdResult;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::protocol::ServerMessage;
use crate::registry::ConnectionRegistry;

use super::Connection;
use super::connection::ConnectionEnd;
use super::handshake::{Admission, HandshakeGate};

// ============================================================================
// Constants
// ============================================================================

/// Interval at which the accept loop checks the shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Time allowed for a rejected client to acknowledge the close frame.
const REJECT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Close code sent to a connection displaced by a newer one.
pub const DISPLACED_CLOSE_CODE: u16 = 4000;

/// Close reason sent to a connection displaced by a newer one.
pub const DISPLACED_CLOSE_REASON: &str = "Replaced by a newer connection";

/// Close reason sent to connections when the relay shuts down.
pub const SHUTDOWN_CLOSE_REASON: &str = "Server shutting down";

// ============================================================================
// RelayServer
// ============================================================================

/// Accepts client connections and keeps the registry in sync with them.
///
/// # Example
///
/// ```ignore
/// let registry = Arc::new(ConnectionRegistry::new());
/// let server = RelayServer::bind(addr, registry, HandshakeGate::default()).await?;
/// println!("Clients connect to {}", server.ws_url());
/// ```
pub struct RelayServer {
    /// Bound address.
    local_addr: SocketAddr,

    /// Shared connection registry.
    registry: Arc<ConnectionRegistry>,

    /// Handshake policy.
    gate: HandshakeGate,

    /// Shutdown flag.
    shutdown: AtomicBool,
}

impl RelayServer {
    /// Binds the client listener and starts the accept loop.
    ///
    /// Use port 0 to let the OS assign a random available port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(
        addr: SocketAddr,
        registry: Arc<ConnectionRegistry>,
        gate: HandshakeGate,
    ) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let server = Arc::new(Self {
            local_addr,
            registry,
            gate,
            shutdown: AtomicBool::new(false),
        });

        let server_clone = Arc::clone(&server);
        tokio::spawn(async move {
            server_clone.accept_loop(listener).await;
        });

        info!(addr = %local_addr, "Client listener started");

        Ok(server)
    }

    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the WebSocket URL for this server.
    ///
    /// Format: `ws://{ip}:{port}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Returns the shared registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Stops accepting new connections.
    ///
    /// Existing connections are left to the caller.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [`RelayServer::stop`] has been called.
    #[inline]
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

// ============================================================================
// RelayServer - Accept Loop
// ============================================================================

impl RelayServer {
    /// Background task that accepts new connections.
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("Accept loop started");

        loop {
            if self.is_stopped() {
                debug!("Accept loop shutting down");
                break;
            }

            // Accept with timeout to allow checking shutdown flag
            match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream, addr).await {
                            warn!(error = %e, ?addr, "Connection handling failed");
                        }
                    });
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Accept failed");
                }
                Err(_) => continue,
            }
        }

        debug!("Accept loop terminated");
    }

    /// Handles a single incoming connection from upgrade to exit.
    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(?addr, "New TCP connection");

        let mut request_target = None;
        let ws_stream = tokio_tungstenite::accept_hdr_async(
            stream,
            |request: &Request, response: Response| -> StdResult<Response, ErrorResponse> {
                request_target = Some(request.uri().to_string());
                Ok(response)
            },
        )
        .await?;

        let admission = request_target
            .ok_or_else(|| Error::internal_handshake("Upgrade completed without a request target"))
            .and_then(|target| self.gate.admit(&target));

        match admission {
            Ok(admission) => {
                self.serve_admitted(ws_stream, admission, addr).await;
                Ok(())
            }
            Err(e) if e.is_handshake_error() => {
                reject(ws_stream, &e, addr).await;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Registers an admitted connection and runs it to completion.
    async fn serve_admitted<S>(
        &self,
        ws_stream: WebSocketStream<S>,
        admission: Admission,
        addr: SocketAddr,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Admission { client_id, role } = admission;
        let (connection, driver) = Connection::new(ws_stream, client_id.clone());
        let connection_id = connection.id();

        // Queued before registration, so it is always the first frame
        let confirmation = match ServerMessage::connected(&client_id).to_text() {
            Ok(text) => text,
            Err(e) => {
                error!(client_id = %client_id, error = %e, "Failed to encode confirmation");
                connection.close(CloseCode::Error, "Internal server error");
                driver.run().await;
                return;
            }
        };
        let _ = connection.queue_text(confirmation);

        if let Some(displaced) = self.registry.set(client_id.clone(), connection.clone()) {
            info!(
                client_id = %client_id,
                displaced = %displaced.id(),
                "Closing displaced connection"
            );
            displaced.close(CloseCode::from(DISPLACED_CLOSE_CODE), DISPLACED_CLOSE_REASON);
        }

        // Checked after the insert: stop() precedes the shutdown drain, so a
        // registration the drain missed always sees the flag here
        if self.is_stopped() {
            self.registry.release(client_id.as_str(), connection_id);
            info!(client_id = %client_id, ?addr, "Admitted during shutdown, closing");
            connection.close(CloseCode::Away, SHUTDOWN_CLOSE_REASON);
            drop(connection);
            driver.run().await;
            return;
        }
        drop(connection);

        info!(
            client_id = %client_id,
            role = %role,
            connection_id = %connection_id,
            ?addr,
            online = self.registry.size(),
            "Teacher connected"
        );

        let end = driver.run().await;

        // Single exit path
        let released = self.registry.release(client_id.as_str(), connection_id);

        match &end {
            ConnectionEnd::TransportError(message) => error!(
                client_id = %client_id,
                connection_id = %connection_id,
                error = %message,
                released,
                "Teacher connection errored"
            ),
            _ => info!(
                client_id = %client_id,
                connection_id = %connection_id,
                end = %end,
                released,
                online = self.registry.size(),
                "Teacher disconnected"
            ),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Closes a rejected connection with the close code for `error`.
async fn reject(mut ws_stream: WebSocketStream<TcpStream>, error: &Error, addr: SocketAddr) {
    match error {
        Error::PolicyViolation { reason } => {
            warn!(?addr, reason = %reason, "Handshake rejected");
        }
        other => {
            error!(?addr, error = %other, "Handshake failed");
        }
    }

    let frame = CloseFrame {
        code: error.close_code(),
        reason: error.close_reason().into(),
    };

    if let Err(e) = ws_stream.close(Some(frame)).await {
        debug!(?addr, error = %e, "Failed to send close frame");
        return;
    }

    // Wait for the client's close reply so the closing handshake completes
    let _ = timeout(REJECT_CLOSE_TIMEOUT, async {
        while let Some(Ok(_)) = ws_stream.next().await {}
    })
    .await;
}

// ============================================================================
// Tests
// ============================================================================
