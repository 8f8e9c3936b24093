//! WebSocket protocol frame types.
//!
//! This module defines the JSON frames exchanged between the relay and
//! connected clients.
//!
//! # Protocol Overview
//!
//! | Frame | Direction | Purpose |
//! |-------|-----------|---------|
//! | `{"type":"connected","message":...}` | Relay → Client | Admission confirmation (first frame) |
//! | `{"type":"ping"}` | Client → Relay | Liveness probe |
//! | `{"type":"pong"}` | Relay → Client | Liveness reply |
//! | any JSON value | Relay → Client | Pushed payload, forwarded as-is |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `client` | Frames sent by clients |
//! | `server` | Frames sent by the relay |

// ============================================================================
// Submodules
// ============================================================================

/// Client-to-relay frames.
pub mod client;

/// Relay-to-client frames.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::ClientMessage;
pub use server::ServerMessage;
