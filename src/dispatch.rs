//! Push dispatcher.
//!
//! Matches an administrative push request to a live connection and hands the
//! payload to its transport.
//!
//! # Delivery Semantics
//!
//! | Outcome | Result |
//! |---------|--------|
//! | Target or payload missing | [`Error::MissingParameter`] (registry untouched) |
//! | Target never connected | [`Error::TargetNotConnected`] |
//! | Target registered but transport not open | [`Error::TargetNotConnected`] |
//! | Serialization or write failed | [`Error::DeliveryFailed`] |
//! | Frame written | `Ok(())` |
//!
//! `Ok(())` means "handed to the transport". There is no acknowledgement from
//! the client, no queuing for offline targets and no retry.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::ClientId;
use crate::registry::ConnectionRegistry;

// ============================================================================
// Constants
// ============================================================================

/// Message returned when the target or payload is missing.
pub const MISSING_PARAMETER_MESSAGE: &str = "teacherId and message are required";

// ============================================================================
// PushDispatcher
// ============================================================================

/// Delivers pushed payloads to registered connections.
#[derive(Debug, Clone)]
pub struct PushDispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl PushDispatcher {
    /// Creates a dispatcher reading from `registry`.
    #[inline]
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Returns the registry this dispatcher reads from.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Pushes `payload` to the connection registered as `target`.
    ///
    /// The payload is serialized to JSON and sent as one text frame.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingParameter`] if `target` is missing or empty, or
    ///   `payload` is missing or `null`
    /// - [`Error::TargetNotConnected`] if no open connection is registered
    /// - [`Error::DeliveryFailed`] if the frame could not be written
    pub async fn push(&self, target: Option<&str>, payload: Option<&Value>) -> Result<()> {
        let (Some(client_id), Some(payload)) = (
            target.and_then(ClientId::new),
            payload.filter(|value| !value.is_null()),
        ) else {
            return Err(Error::missing_parameter(MISSING_PARAMETER_MESSAGE));
        };

        let Some(connection) = self.registry.get(client_id.as_str()) else {
            debug!(client_id = %client_id, "Push target never connected");
            return Err(Error::target_not_connected(client_id));
        };

        if !connection.is_open() {
            debug!(
                client_id = %client_id,
                connection_id = %connection.id(),
                "Push target registered but transport not ready"
            );
            return Err(Error::target_not_connected(client_id));
        }

        if let Err(e) = connection.send_json(payload).await {
            warn!(
                client_id = %client_id,
                connection_id = %connection.id(),
                error = %e,
                "Push delivery failed"
            );
            return Err(Error::delivery_failed(client_id));
        }

        info!(client_id = %client_id, "Message pushed");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
