//! WebSocket transport layer.
//!
//! This module handles the client-facing side of the relay: accepting
//! upgrades, gating them, and running one event loop per connection.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Client         │         WebSocket            │  RelayServer    │
//! │  ?userId=..     │─────────────────────────────►│  HandshakeGate  │
//! │  &role=teacher  │◄─────────────────────────────│  → Connection   │
//! │                 │   connected / pong / push    │  → Registry     │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Connection handle and event loop |
//! | `handshake` | Identity and role validation |
//! | `server` | Accept loop, admission and exit path |

// ============================================================================
// Submodules
// ============================================================================

/// Connection handle and event loop.
pub mod connection;

/// Identity and role validation at upgrade time.
pub mod handshake;

/// WebSocket server for client connections.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, ConnectionDriver, ConnectionEnd};
pub use handshake::{Admission, HandshakeGate};
pub use server::RelayServer;
