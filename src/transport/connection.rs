//! WebSocket connection and event loop.
//!
//! Each admitted client gets one [`Connection`] handle and one
//! [`ConnectionDriver`] task. The handle is what the registry stores and what
//! the push dispatcher sends through; the driver owns the socket.
//!
//! # State Machine
//!
//! ```text
//!            ping → pong
//!           ┌──────────┐
//!           ▼          │
//! admit ──► OPEN ──────┘
//!            │
//!            │ remote close / stream end / transport error /
//!            │ failed write / close command / all handles dropped
//!            ▼
//!          CLOSED  (driver returns ConnectionEnd, open flag cleared)
//! ```
//!
//! Malformed frames are logged and discarded; they never close the connection.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{ClientId, ConnectionId};
use crate::protocol::{ClientMessage, ServerMessage};

// ============================================================================
// Constants
// ============================================================================

/// Characters of a malformed frame kept in the log.
const LOG_PREVIEW_CHARS: usize = 64;

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
pub(crate) enum ConnectionCommand {
    /// Write one text frame and report the write result.
    Send {
        text: String,
        ack_tx: oneshot::Sender<Result<()>>,
    },
    /// Send a close frame and terminate.
    Close { code: CloseCode, reason: String },
}

// ============================================================================
// ConnectionEnd
// ============================================================================

/// Terminal event that moved a connection to CLOSED.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEnd {
    /// Remote sent a close frame.
    ClosedByRemote,
    /// Stream ended without a close frame.
    StreamEnded,
    /// Read or write failed.
    TransportError(String),
    /// Closed through [`Connection::close`].
    ClosedLocally,
    /// Every handle was dropped.
    Abandoned,
}

impl ConnectionEnd {
    /// Returns `true` if the connection ended because of an error.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::TransportError(_))
    }
}

impl fmt::Display for ConnectionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClosedByRemote => f.write_str("closed by remote"),
            Self::StreamEnded => f.write_str("stream ended"),
            Self::TransportError(message) => write!(f, "transport error: {message}"),
            Self::ClosedLocally => f.write_str("closed locally"),
            Self::Abandoned => f.write_str("abandoned"),
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Handle to one live client connection.
///
/// Cloning is cheap. The registry holds the long-lived clone; other
/// components clone it only for the duration of one operation.
#[derive(Clone)]
pub struct Connection {
    /// Physical connection identity.
    id: ConnectionId,
    /// Client identity from the handshake.
    client_id: ClientId,
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Cleared when the event loop terminates.
    open: Arc<AtomicBool>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("client_id", &self.client_id)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Connection {
    /// Creates a handle and its event loop from an upgraded WebSocket.
    ///
    /// The loop does nothing until [`ConnectionDriver::run`] is awaited.
    pub fn new<S>(ws_stream: WebSocketStream<S>, client_id: ClientId) -> (Self, ConnectionDriver<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        let id = ConnectionId::generate();

        let driver = ConnectionDriver {
            ws_stream,
            command_rx,
            connection_id: id,
            client_id: client_id.clone(),
            open: Arc::clone(&open),
        };

        let connection = Self {
            id,
            client_id,
            command_tx,
            open,
        };

        (connection, driver)
    }

    /// Returns the physical connection ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the client ID presented at handshake.
    #[inline]
    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Returns `true` while the event loop can still accept frames.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.command_tx.is_closed()
    }

    /// Queues a text frame without waiting for the write.
    ///
    /// Frames are written in the order they are queued.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the event loop has terminated.
    pub fn queue_text(&self, text: String) -> Result<()> {
        let (ack_tx, _ack_rx) = oneshot::channel();
        self.command_tx
            .send(ConnectionCommand::Send { text, ack_tx })
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Hands a text frame to the transport and waits for the write result.
    ///
    /// Success means the frame was written to the socket, not that the
    /// client processed it.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the event loop has terminated
    /// - [`Error::WebSocket`] if the write failed
    pub async fn send_text(&self, text: String) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();

        self.command_tx
            .send(ConnectionCommand::Send { text, ack_tx })
            .map_err(|_| Error::ConnectionClosed)?;

        ack_rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Serializes a value to JSON and sends it as one text frame.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if serialization fails
    /// - see [`Connection::send_text`]
    pub async fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.send_text(text).await
    }

    /// Asks the event loop to send a close frame and terminate.
    ///
    /// No-op if the loop has already terminated.
    pub fn close(&self, code: CloseCode, reason: impl Into<String>) {
        let _ = self.command_tx.send(ConnectionCommand::Close {
            code,
            reason: reason.into(),
        });
    }
}

// ============================================================================
// ConnectionDriver
// ============================================================================

/// Event loop owning the WebSocket of one [`Connection`].
pub struct ConnectionDriver<S> {
    ws_stream: WebSocketStream<S>,
    command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    connection_id: ConnectionId,
    client_id: ClientId,
    open: Arc<AtomicBool>,
}

impl<S> ConnectionDriver<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Runs the event loop until the connection reaches CLOSED.
    ///
    /// Returns exactly once, with the terminal event.
    pub async fn run(self) -> ConnectionEnd {
        let Self {
            ws_stream,
            mut command_rx,
            connection_id,
            client_id,
            open,
        } = self;

        let (mut ws_write, mut ws_read) = ws_stream.split();

        let end = loop {
            tokio::select! {
                // Incoming frames from the client
                message = ws_read.next() => {
                    let text = match message {
                        Some(Ok(Message::Text(text))) => text.as_str().to_owned(),

                        Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                            Ok(text) => text,
                            Err(_) => {
                                warn!(client_id = %client_id, "Discarding non-UTF-8 binary frame");
                                continue;
                            }
                        },

                        Some(Ok(Message::Close(frame))) => {
                            debug!(client_id = %client_id, ?frame, "WebSocket closed by remote");
                            break ConnectionEnd::ClosedByRemote;
                        }

                        Some(Err(e)) => {
                            error!(client_id = %client_id, error = %e, "WebSocket error");
                            break ConnectionEnd::TransportError(e.to_string());
                        }

                        None => {
                            debug!(client_id = %client_id, "WebSocket stream ended");
                            break ConnectionEnd::StreamEnded;
                        }

                        // Protocol-level Ping/Pong are answered by tungstenite
                        _ => continue,
                    };

                    let Some(reply) = handle_incoming_frame(&text, &client_id) else {
                        continue;
                    };

                    if let Err(e) = ws_write.send(Message::Text(reply.into())).await {
                        error!(client_id = %client_id, error = %e, "Failed to send pong");
                        break ConnectionEnd::TransportError(e.to_string());
                    }
                }

                // Commands from handles
                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send { text, ack_tx }) => {
                            match ws_write.send(Message::Text(text.into())).await {
                                Ok(()) => {
                                    trace!(client_id = %client_id, "Frame sent");
                                    let _ = ack_tx.send(Ok(()));
                                }
                                Err(e) => {
                                    error!(client_id = %client_id, error = %e, "Failed to send frame");
                                    let end = ConnectionEnd::TransportError(e.to_string());
                                    let _ = ack_tx.send(Err(Error::WebSocket(e)));
                                    break end;
                                }
                            }
                        }

                        Some(ConnectionCommand::Close { code, reason }) => {
                            debug!(client_id = %client_id, code = u16::from(code), reason = %reason, "Closing connection");
                            let frame = CloseFrame {
                                code,
                                reason: reason.into(),
                            };
                            let _ = ws_write.send(Message::Close(Some(frame))).await;
                            break ConnectionEnd::ClosedLocally;
                        }

                        None => {
                            debug!(client_id = %client_id, "All handles dropped");
                            break ConnectionEnd::Abandoned;
                        }
                    }
                }
            }
        };

        open.store(false, Ordering::SeqCst);
        fail_pending_commands(&mut command_rx);

        if !end.is_error() {
            let _ = ws_write.close().await;
        }

        debug!(
            client_id = %client_id,
            connection_id = %connection_id,
            end = %end,
            "Event loop terminated"
        );

        end
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Handles one text frame from the client, returning the reply to send.
fn handle_incoming_frame(text: &str, client_id: &ClientId) -> Option<String> {
    match ClientMessage::parse(text) {
        Ok(ClientMessage::Ping) => match ServerMessage::Pong.to_text() {
            Ok(reply) => Some(reply),
            Err(e) => {
                error!(client_id = %client_id, error = %e, "Failed to encode pong");
                None
            }
        },
        Ok(ClientMessage::Unknown) => {
            debug!(client_id = %client_id, "Ignoring unrecognized frame");
            None
        }
        Err(e) => {
            warn!(
                client_id = %client_id,
                error = %e,
                len = text.len(),
                preview = %frame_preview(text),
                "Failed to parse incoming frame"
            );
            None
        }
    }
}

/// Returns at most [`LOG_PREVIEW_CHARS`] characters of `text`.
fn frame_preview(text: &str) -> &str {
    text.char_indices()
        .nth(LOG_PREVIEW_CHARS)
        .map_or(text, |(end, _)| &text[..end])
}

/// Rejects further commands and fails the ones already queued.
fn fail_pending_commands(command_rx: &mut mpsc::UnboundedReceiver<ConnectionCommand>) {
    command_rx.close();

    let mut count = 0usize;
    while let Ok(command) = command_rx.try_recv() {
        if let ConnectionCommand::Send { ack_tx, .. } = command {
            let _ = ack_tx.send(Err(Error::ConnectionClosed));
            count += 1;
        }
    }

    if count > 0 {
        debug!(count, "Failed pending frames on shutdown");
    }
}

// ============================================================================
// Test Support
// ============================================================================


// ============================================================================
// Tests
// ============================================================================
