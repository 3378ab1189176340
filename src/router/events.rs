//! Platform events consumed by the router.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;

use crate::identifiers::ClientId;

// ============================================================================
// Constants
// ============================================================================

/// Delivery attempts for one external message: the first plus one replay.
pub const MAX_DELIVERY_ATTEMPTS: u32 = 2;

// ============================================================================
// PortSocket
// ============================================================================

/// Byte stream a persistent port can run over.
pub trait PortStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> PortStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Accepted WebSocket convertible to a [`PortChannel`](crate::channel::PortChannel).
pub type PortSocket = WebSocketStream<Box<dyn PortStream>>;

// ============================================================================
// PlatformEvent
// ============================================================================

/// A connection-level event from the platform.
pub enum PlatformEvent {
    /// Persistent connection from the broker's own app.
    Connect {
        /// Accepted socket.
        socket: PortSocket,
    },

    /// Persistent connection from another client.
    ConnectExternal {
        /// Accepted socket.
        socket: PortSocket,
        /// Sender identity, `None` if it could not be determined.
        sender: Option<ClientId>,
    },

    /// Stateless message from another client.
    MessageExternal {
        /// Opaque payload.
        message: Value,
        /// Sender identity, `None` if it could not be determined.
        sender: Option<ClientId>,
    },

    /// The broker was installed or updated.
    Installed {
        /// Platform reason code (`"install"`, `"update"`, ...).
        reason: String,
    },

    /// The user launched the app.
    Launched,
}

impl fmt::Debug for PlatformEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect { .. } => f.write_str("Connect"),
            Self::ConnectExternal { sender, .. } => f
                .debug_struct("ConnectExternal")
                .field("sender", sender)
                .finish_non_exhaustive(),
            Self::MessageExternal { message, sender } => f
                .debug_struct("MessageExternal")
                .field("message", message)
                .field("sender", sender)
                .finish(),
            Self::Installed { reason } => {
                f.debug_struct("Installed").field("reason", reason).finish()
            }
            Self::Launched => f.write_str("Launched"),
        }
    }
}

// ============================================================================
// DeliveryOutcome
// ============================================================================

/// Result of routing one external message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// A live channel accepted the message.
    Delivered {
        /// 1, or 2 if the message was replayed.
        attempts: u32,
    },
    /// Every attempt ended with the channel disposed or unavailable.
    Dropped {
        /// Attempts made before giving up.
        attempts: u32,
    },
    /// No sender identity; nothing was created.
    Rejected,
}

impl DeliveryOutcome {
    /// Returns `true` if the message reached a live channel.
    #[inline]
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}
