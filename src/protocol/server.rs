//! Relay-to-client frames.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;

use crate::error::Result;
use crate::identifiers::ClientId;

// ============================================================================
// ServerMessage
// ============================================================================

/// A control frame sent by the relay.
///
/// Pushed payloads are not wrapped in this type; they are forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Admission confirmation, always the first frame on a connection.
    Connected {
        /// Human-readable confirmation text.
        message: String,
    },

    /// Reply to a client ping.
    Pong,
}

impl ServerMessage {
    /// Creates the admission confirmation for a client.
    #[must_use]
    pub fn connected(client_id: &ClientId) -> Self {
        Self::Connected {
            message: format!("Teacher {client_id} connected"),
        }
    }

    /// Serializes the frame to JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if serialization fails.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Tests
// ============================================================================
