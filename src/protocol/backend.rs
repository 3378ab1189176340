//! Envelopes exchanged with the backend server.
//!
//! The backend exposes a single raw channel shared by every client handler.
//! Each handler is addressed by its [`HandlerId`], which is threaded through
//! every message in both directions.
//!
//! # Backend to broker
//!
//! | `type` | Fields | Meaning |
//! |--------|--------|---------|
//! | `ready` | | Startup handshake completed |
//! | `reply` | `handlerId`, `payload` | Message for one client handler |
//! | `readers_changed` | `readers` | New reader-list snapshot |
//! | `log` | `level`, `message` | Backend log record |
//!
//! # Broker to backend
//!
//! | `type` | Fields | Meaning |
//! |--------|--------|---------|
//! | `create_handler` | `handlerId`, `clientId` | Open a session for a handler |
//! | `request` | `handlerId`, `payload` | Client message |
//! | `delete_handler` | `handlerId` | Close the session |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::{ClientId, HandlerId};

// ============================================================================
// BackendMessage
// ============================================================================

/// A message originated by the backend server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendMessage {
    /// Startup handshake completed.
    Ready,

    /// Message addressed to one client handler.
    Reply {
        /// Target handler.
        #[serde(rename = "handlerId")]
        handler_id: HandlerId,
        /// Opaque payload forwarded to the client.
        payload: Value,
    },

    /// Reader list changed.
    ReadersChanged {
        /// Reader snapshot, interpreted by the reader tracker.
        readers: Value,
    },

    /// Backend log record.
    Log {
        /// Severity.
        level: LogLevel,
        /// Log text.
        message: String,
    },
}

// ============================================================================
// ClientEnvelope
// ============================================================================

/// A message sent to the backend on behalf of a client handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// Announces a new handler session.
    CreateHandler {
        /// Handler being created.
        #[serde(rename = "handlerId")]
        handler_id: HandlerId,
        /// Client identity, absent for the broker's own clients.
        #[serde(rename = "clientId", skip_serializing_if = "Option::is_none", default)]
        client_id: Option<ClientId>,
    },

    /// Client message for the backend.
    Request {
        /// Originating handler.
        #[serde(rename = "handlerId")]
        handler_id: HandlerId,
        /// Opaque client payload.
        payload: Value,
    },

    /// Ends a handler session.
    DeleteHandler {
        /// Handler being deleted.
        #[serde(rename = "handlerId")]
        handler_id: HandlerId,
    },
}

impl ClientEnvelope {
    /// Returns the handler the envelope belongs to.
    #[inline]
    #[must_use]
    pub fn handler_id(&self) -> HandlerId {
        match self {
            Self::CreateHandler { handler_id, .. }
            | Self::Request { handler_id, .. }
            | Self::DeleteHandler { handler_id } => *handler_id,
        }
    }
}

// ============================================================================
// LogLevel
// ============================================================================

/// Severity of a backend log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Verbose tracing.
    Trace,
    /// Debugging detail.
    Debug,
    /// Informational.
    Info,
    /// Something unexpected but recoverable.
    #[serde(alias = "warn")]
    Warning,
    /// Failure.
    Error,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_parse_ready() {
        let message: BackendMessage = serde_json::from_value(json!({"type": "ready"})).unwrap();
        assert_eq!(message, BackendMessage::Ready);
    }

    #[test]
    fn test_parse_reply() {
        let message: BackendMessage = serde_json::from_value(json!({
            "type": "reply",
            "handlerId": 12,
            "payload": {"result": 0}
        }))
        .unwrap();

        assert_eq!(
            message,
            BackendMessage::Reply {
                handler_id: HandlerId::from_u64(12).unwrap(),
                payload: json!({"result": 0}),
            }
        );
    }

    #[test]
    fn test_parse_log_with_warn_alias() {
        let message: BackendMessage = serde_json::from_value(json!({
            "type": "log",
            "level": "warn",
            "message": "reader timeout"
        }))
        .unwrap();

        assert!(matches!(
            message,
            BackendMessage::Log {
                level: LogLevel::Warning,
                ..
            }
        ));
    }

    #[test]
    fn test_create_handler_omits_missing_client() {
        let envelope = ClientEnvelope::CreateHandler {
            handler_id: HandlerId::from_u64(3).unwrap(),
            client_id: None,
        };
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"type": "create_handler", "handlerId": 3})
        );
    }

    #[test]
    fn test_request_format() {
        let envelope = ClientEnvelope::Request {
            handler_id: HandlerId::from_u64(5).unwrap(),
            payload: json!(["SCardEstablishContext"]),
        };
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"type": "request", "handlerId": 5, "payload": ["SCardEstablishContext"]})
        );
        assert_eq!(envelope.handler_id().as_u64(), 5);
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(serde_json::from_value::<BackendMessage>(json!({"type": "bogus"})).is_err());
    }
}
