//! Client-to-relay frames.
//!
//! Clients only ever need to send liveness probes. Anything else that is
//! valid JSON is tolerated and ignored.

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde_json::{Value, from_str, from_value};

use crate::error::Result;

// ============================================================================
// ClientMessage
// ============================================================================

/// A frame received from a connected client.
///
/// # Format
///
/// ```json
/// { "type": "ping" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Liveness probe, answered with a pong.
    Ping,

    /// Any other JSON frame, ignored.
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Parses a raw text frame.
    ///
    /// JSON without a recognized `type` becomes [`ClientMessage::Unknown`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if the text is not valid JSON.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = from_str(text)?;
        Ok(from_value(value).unwrap_or(Self::Unknown))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ping() {
        assert_eq!(ClientMessage::parse(r#"{"type":"ping"}"#).unwrap(), ClientMessage::Ping);
    }

    #[test]
    fn test_parse_ping_with_extra_fields() {
        let message = ClientMessage::parse(r#"{"type":"ping","ts":1700000000}"#).unwrap();
        assert_eq!(message, ClientMessage::Ping);
    }

    #[test]
    fn test_unknown_type_is_tolerated() {
        let message = ClientMessage::parse(r#"{"type":"subscribe","room":"a"}"#).unwrap();
        assert_eq!(message, ClientMessage::Unknown);
    }

    #[test]
    fn test_missing_type_is_tolerated() {
        assert_eq!(ClientMessage::parse(r#"{"a":1}"#).unwrap(), ClientMessage::Unknown);
        assert_eq!(ClientMessage::parse("42").unwrap(), ClientMessage::Unknown);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let err = ClientMessage::parse("not json").unwrap_err();
        assert!(matches!(err, crate::Error::Json(_)));
    }
}
