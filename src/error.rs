//! Error types for the presence relay.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use presence_relay::{PushDispatcher, Result};
//!
//! async fn notify(dispatcher: &PushDispatcher) -> Result<()> {
//!     let payload = serde_json::json!({ "kind": "lesson-start" });
//!     dispatcher.push(Some("t1"), Some(&payload)).await
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Handshake | [`Error::PolicyViolation`], [`Error::InternalHandshake`] |
//! | Push | [`Error::MissingParameter`], [`Error::TargetNotConnected`], [`Error::DeliveryFailed`] |
//! | Connection | [`Error::ConnectionClosed`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::identifiers::ClientId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Handshake and push variants are converted into a close code or an HTTP
/// response at the edge; none of them terminate the process.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when relay configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Handshake Errors
    // ========================================================================
    /// Handshake rejected for a bad or missing identity or role.
    ///
    /// The connection is closed with `1008` and never registered.
    #[error("Policy violation: {reason}")]
    PolicyViolation {
        /// Human-readable reason sent in the close frame.
        reason: String,
    },

    /// Unexpected failure while admitting a connection.
    ///
    /// The connection is closed with `1011`; the message is only logged.
    #[error("Internal handshake error: {message}")]
    InternalHandshake {
        /// Description of the failure (never sent to the client).
        message: String,
    },

    // ========================================================================
    // Push Errors
    // ========================================================================
    /// Push request is missing the target or the payload.
    #[error("{message}")]
    MissingParameter {
        /// Description of what is missing.
        message: String,
    },

    /// Push target has no live registry entry.
    #[error("Teacher {client_id} is not connected")]
    TargetNotConnected {
        /// The requested target.
        client_id: ClientId,
    },

    /// Transmit attempt failed.
    #[error("Failed to deliver message to teacher {client_id}")]
    DeliveryFailed {
        /// The requested target.
        client_id: ClientId,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// The connection event loop has terminated.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a policy violation error.
    #[inline]
    pub fn policy_violation(reason: impl Into<String>) -> Self {
        Self::PolicyViolation {
            reason: reason.into(),
        }
    }

    /// Creates an internal handshake error.
    #[inline]
    pub fn internal_handshake(message: impl Into<String>) -> Self {
        Self::InternalHandshake {
            message: message.into(),
        }
    }

    /// Creates a missing parameter error.
    #[inline]
    pub fn missing_parameter(message: impl Into<String>) -> Self {
        Self::MissingParameter {
            message: message.into(),
        }
    }

    /// Creates a target not connected error.
    #[inline]
    pub fn target_not_connected(client_id: ClientId) -> Self {
        Self::TargetNotConnected { client_id }
    }

    /// Creates a delivery failed error.
    #[inline]
    pub fn delivery_failed(client_id: ClientId) -> Self {
        Self::DeliveryFailed { client_id }
    }
}

// ============================================================================
// Error Classification
// ============================================================================

impl Error {
    /// Returns the machine-stable kind of this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::PolicyViolation { .. } => "policy_violation",
            Self::InternalHandshake { .. } => "internal_handshake_error",
            Self::MissingParameter { .. } => "missing_parameter",
            Self::TargetNotConnected { .. } => "target_not_connected",
            Self::DeliveryFailed { .. } => "delivery_failed",
            Self::ConnectionClosed => "connection_closed",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::WebSocket(_) => "websocket",
        }
    }

    /// Returns the close code used when this error rejects a handshake.
    ///
    /// Policy violations map to `1008`; everything else is an internal error (`1011`).
    #[must_use]
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::PolicyViolation { .. } => CloseCode::Policy,
            _ => CloseCode::Error,
        }
    }

    /// Returns the reason string safe to send to a rejected client.
    #[must_use]
    pub fn close_reason(&self) -> String {
        match self {
            Self::PolicyViolation { reason } => reason.clone(),
            _ => "Internal server error".to_string(),
        }
    }

    /// Returns `true` if this error rejects a handshake.
    #[inline]
    #[must_use]
    pub fn is_handshake_error(&self) -> bool {
        matches!(
            self,
            Self::PolicyViolation { .. } | Self::InternalHandshake { .. }
        )
    }

    /// Returns `true` if this error is a push outcome.
    #[inline]
    #[must_use]
    pub fn is_push_error(&self) -> bool {
        matches!(
            self,
            Self::MissingParameter { .. }
                | Self::TargetNotConnected { .. }
                | Self::DeliveryFailed { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
