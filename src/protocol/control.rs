//! Keep-alive control messages on one-shot message-based channels.
//!
//! # Format
//!
//! Broker to client:
//! ```json
//! { "type": "ping" }
//! ```
//!
//! Client to broker:
//! ```json
//! { "type": "pong", "channel_id": 42 }
//! ```
//!
//! `channel_id` is chosen by the client once per client lifetime. A pong
//! with a different `channel_id` than the first one observed means the
//! client has reloaded.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// ControlMessage
// ============================================================================

/// Keep-alive control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Liveness probe sent to the client.
    Ping,
    /// Client answer, tagged with the client instance's channel id.
    Pong {
        /// Client instance identifier.
        channel_id: u64,
    },
}

impl ControlMessage {
    /// Recognizes a control message without cloning ordinary payloads.
    #[must_use]
    pub fn parse(message: &Value) -> Option<Self> {
        let kind = message.get("type")?.as_str()?;
        if kind != "ping" && kind != "pong" {
            return None;
        }
        serde_json::from_value(message.clone()).ok()
    }

    /// Serializes to a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Ping => serde_json::json!({ "type": "ping" }),
            Self::Pong { channel_id } => {
                serde_json::json!({ "type": "pong", "channel_id": channel_id })
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_parse_pong() {
        let message = json!({"type": "pong", "channel_id": 7});
        assert_eq!(
            ControlMessage::parse(&message),
            Some(ControlMessage::Pong { channel_id: 7 })
        );
    }

    #[test]
    fn test_ordinary_payload_is_not_control() {
        assert_eq!(ControlMessage::parse(&json!({"type": "request"})), None);
        assert_eq!(ControlMessage::parse(&json!("pong")), None);
        assert_eq!(ControlMessage::parse(&json!({"data": 1})), None);
    }

    #[test]
    fn test_malformed_pong_is_not_control() {
        assert_eq!(ControlMessage::parse(&json!({"type": "pong"})), None);
    }

    #[test]
    fn test_ping_value() {
        assert_eq!(ControlMessage::Ping.to_value(), json!({"type": "ping"}));
    }
}
