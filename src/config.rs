//! Relay configuration.
//!
//! # Example
//!
//! ```ignore
//! use presence_relay::RelayConfig;
//!
//! let config = RelayConfig::new()
//!     .with_ws_addr("127.0.0.1:9000".parse()?)
//!     .with_accepted_roles(["teacher", "assistant"]);
//! config.validate()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::error::{Error, Result};
use crate::transport::handshake::{DEFAULT_ROLE, HandshakeGate};

// ============================================================================
// Constants
// ============================================================================

/// Default client listener port.
pub const DEFAULT_WS_PORT: u16 = 8080;

/// Default admin listener port.
pub const DEFAULT_ADMIN_PORT: u16 = 8081;

/// Default bind address for both listeners.
const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

// ============================================================================
// RelayConfig
// ============================================================================

/// Listener addresses and handshake policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Address of the client WebSocket listener.
    pub ws_addr: SocketAddr,

    /// Address of the admin HTTP listener.
    pub admin_addr: SocketAddr,

    /// Roles admitted at handshake.
    pub accepted_roles: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ws_addr: SocketAddr::new(DEFAULT_BIND_IP, DEFAULT_WS_PORT),
            admin_addr: SocketAddr::new(DEFAULT_BIND_IP, DEFAULT_ADMIN_PORT),
            accepted_roles: vec![DEFAULT_ROLE.to_string()],
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl RelayConfig {
    /// Creates a configuration with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the client listener address.
    #[inline]
    #[must_use]
    pub fn with_ws_addr(mut self, addr: SocketAddr) -> Self {
        self.ws_addr = addr;
        self
    }

    /// Sets the admin listener address.
    #[inline]
    #[must_use]
    pub fn with_admin_addr(mut self, addr: SocketAddr) -> Self {
        self.admin_addr = addr;
        self
    }

    /// Replaces the accepted roles.
    #[must_use]
    pub fn with_accepted_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.accepted_roles = roles.into_iter().map(Into::into).collect();
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl RelayConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no role is accepted or a role is blank
    /// - [`Error::Config`] if both listeners use the same non-zero address
    pub fn validate(&self) -> Result<()> {
        if self.accepted_roles.is_empty() {
            return Err(Error::config(
                "At least one accepted role is required.\n\
                 Example: RelayConfig::new().with_accepted_roles([\"teacher\"])",
            ));
        }

        if self.accepted_roles.iter().any(|role| role.trim().is_empty()) {
            return Err(Error::config("Accepted roles must not be blank"));
        }

        if self.ws_addr.port() != 0 && self.ws_addr == self.admin_addr {
            return Err(Error::config(format!(
                "Client and admin listeners cannot share {}",
                self.ws_addr
            )));
        }

        Ok(())
    }

    /// Builds the handshake gate for these roles.
    #[must_use]
    pub fn gate(&self) -> HandshakeGate {
        HandshakeGate::new(self.accepted_roles.iter().cloned())
    }
}

// ============================================================================
// Tests
// ============================================================================
