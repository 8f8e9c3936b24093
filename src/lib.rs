//! Presence Relay - presence-and-push WebSocket relay.
//!
//! Clients identified by an opaque ID keep a WebSocket connection open to the
//! relay. A separate admin HTTP interface pushes a message to one connected
//! client by ID, or lists who is online.
//!
//! # Architecture
//!
//! ```text
//!  client ──ws──► RelayServer ──► HandshakeGate
//!                     │                │ admit
//!                     ▼                ▼
//!              ConnectionDriver   ConnectionRegistry ◄── PushDispatcher ◄── POST /push
//!              (ping → pong)           ▲                                    GET /health
//!                     │ exit path      │                                    GET /online
//!                     └─── release ────┘
//! ```
//!
//! Key design principles:
//!
//! - The registry is an explicit object injected into the server and the
//!   dispatcher, never a global
//! - Each connection is a state machine (OPEN → CLOSED) with one exit path
//! - A successful push means "handed to the transport", not "delivered"
//!
//! # Quick Start
//!
//! ```no_run
//! use presence_relay::{Relay, RelayConfig, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let relay = Relay::start(RelayConfig::default()).await?;
//!
//!     // ws://host:8080/?userId=t1&role=teacher
//!     // curl -XPOST host:8081/push -d '{"teacherId":"t1","message":{"a":1}}'
//!
//!     tokio::signal::ctrl_c().await?;
//!     relay.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`admin`] | Admin HTTP routes |
//! | [`config`] | [`RelayConfig`] |
//! | [`dispatch`] | [`PushDispatcher`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | [`ClientId`], [`ConnectionId`] |
//! | [`protocol`] | WebSocket frame types |
//! | [`registry`] | [`ConnectionRegistry`] |
//! | [`relay`] | [`Relay`] lifecycle |
//! | [`transport`] | WebSocket server and connections |

// ============================================================================
// Modules
// ============================================================================

/// Administrative HTTP interface.
pub mod admin;

/// Relay configuration.
pub mod config;

/// Push delivery to registered connections.
pub mod dispatch;

/// Error types and result aliases.
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// WebSocket frame types.
pub mod protocol;

/// In-memory connection registry.
pub mod registry;

/// Relay lifecycle.
pub mod relay;

/// WebSocket transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::RelayConfig;
pub use dispatch::PushDispatcher;
pub use error::{Error, Result};
pub use identifiers::{ClientId, ConnectionId};
pub use protocol::{ClientMessage, ServerMessage};
pub use registry::ConnectionRegistry;
pub use relay::Relay;
pub use transport::{Connection, ConnectionEnd, HandshakeGate, RelayServer};
