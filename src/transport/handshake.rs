//! Handshake gate for incoming connection upgrades.
//!
//! A client connects to `ws://host:port/?userId=<id>&role=<role>`. The gate
//! inspects the request target captured during the WebSocket upgrade and
//! decides whether the connection may be admitted into the registry.
//!
//! | Outcome | Close code |
//! |---------|------------|
//! | Admitted | none, `connected` frame sent |
//! | Missing `userId`, missing or unaccepted `role` | `1008` |
//! | Unparseable request target | `1011` |

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashSet;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::ClientId;

// ============================================================================
// Constants
// ============================================================================

/// Query parameter carrying the client identifier.
pub const USER_ID_PARAM: &str = "userId";

/// Query parameter carrying the client role.
pub const ROLE_PARAM: &str = "role";

/// Role accepted when none is configured.
pub const DEFAULT_ROLE: &str = "teacher";

/// Base used to resolve origin-form request targets (`/path?query`).
const TARGET_BASE: &str = "ws://relay.invalid";

// ============================================================================
// Admission
// ============================================================================

/// Identity extracted from an accepted handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Registry key for the connection.
    pub client_id: ClientId,
    /// Role presented by the client.
    pub role: String,
}

// ============================================================================
// HandshakeGate
// ============================================================================

/// Validates identity and role parameters before admission.
#[derive(Debug, Clone)]
pub struct HandshakeGate {
    accepted_roles: FxHashSet<String>,
}

impl Default for HandshakeGate {
    fn default() -> Self {
        Self::new([DEFAULT_ROLE])
    }
}

impl HandshakeGate {
    /// Creates a gate accepting the given roles.
    #[must_use]
    pub fn new<I, S>(accepted_roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            accepted_roles: accepted_roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns `true` if the role is in the accepted set.
    #[inline]
    #[must_use]
    pub fn accepts_role(&self, role: &str) -> bool {
        self.accepted_roles.contains(role)
    }

    /// Validates a raw request target such as `/?userId=t1&role=teacher`.
    ///
    /// # Errors
    ///
    /// - [`Error::PolicyViolation`] if `userId` is missing or empty, or
    ///   `role` is missing or not accepted
    /// - [`Error::InternalHandshake`] if the target cannot be parsed
    pub fn admit(&self, request_target: &str) -> Result<Admission> {
        let url = Url::parse(TARGET_BASE)
            .and_then(|base| base.join(request_target))
            .map_err(|e| {
                Error::internal_handshake(format!(
                    "Invalid request target {request_target:?}: {e}"
                ))
            })?;

        let mut user_id = None;
        let mut role = None;

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                USER_ID_PARAM if user_id.is_none() => user_id = Some(value.into_owned()),
                ROLE_PARAM if role.is_none() => role = Some(value.into_owned()),
                _ => {}
            }
        }

        let (Some(client_id), Some(role)) = (user_id.and_then(ClientId::new), role) else {
            debug!(request_target, "Handshake missing userId or role");
            return Err(Error::policy_violation("Missing userId or role"));
        };

        if !self.accepts_role(&role) {
            debug!(client_id = %client_id, role = %role, "Handshake role rejected");
            return Err(Error::policy_violation(format!("Role not allowed: {role}")));
        }

        Ok(Admission { client_id, role })
    }
}

// ============================================================================
// Tests
// ============================================================================
