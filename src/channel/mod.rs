//! Message channel abstraction.
//!
//! A channel is a capability: send a message, receive messages, observe
//! disposal, dispose. Payloads are opaque JSON values; the broker never
//! interprets them beyond the one-shot channel's control messages.
//!
//! # Variants
//!
//! | Variant | Backing | Disposes when |
//! |---------|---------|---------------|
//! | [`PortChannel`] | Persistent WebSocket | Either end closes, or `dispose()` |
//! | [`SingleMessageChannel`] | Discrete external messages | Idle timeout, client reload, or `dispose()` |
//! | [`PairedChannel`] | In-process peer | Either endpoint is disposed |
//!
//! # Contract
//!
//! - Messages are handed to the single message handler in arrival order.
//! - `dispose()` is idempotent and runs every disposal observer before it
//!   returns.
//! - Once disposed a channel stays disposed; `send` then returns
//!   [`Error::ChannelDisposed`](crate::Error::ChannelDisposed).

// ============================================================================
// Submodules
// ============================================================================

/// Transport-independent channel state.
pub mod core;

/// In-process paired channel.
pub mod pair;

/// Persistent WebSocket-backed channel.
pub mod port;

/// One-shot message-based channel.
pub mod single_message;

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::identifiers::{ClientId, SubscriptionId};

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::ChannelCore;
pub use pair::{PairedChannel, channel_pair};
pub use port::PortChannel;
pub use single_message::{KeepAlive, ReplySink, SingleMessageChannel};

// ============================================================================
// Types
// ============================================================================

/// Callback receiving each inbound message.
pub type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// One-shot callback run when a channel is disposed.
pub type DisposeObserver = Box<dyn FnOnce() + Send>;

/// Reference-counted, type-erased channel.
pub type SharedChannel = Arc<dyn MessageChannel>;

// ============================================================================
// ChannelKind
// ============================================================================

/// Which transport a channel is backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Persistent bidirectional port.
    Port,
    /// Session built from discrete external messages.
    SingleMessage,
    /// In-process loopback endpoint.
    Paired,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Port => "port",
            Self::SingleMessage => "single-message",
            Self::Paired => "paired",
        };
        f.write_str(name)
    }
}

// ============================================================================
// MessageChannel
// ============================================================================

/// Capability for message exchange with disposal detection.
pub trait MessageChannel: Send + Sync + 'static {
    /// Shared state backing the default methods.
    fn core(&self) -> &ChannelCore;

    /// Transport variant.
    fn kind(&self) -> ChannelKind;

    /// Identity of the remote party, `None` for internally-originated channels.
    fn client_id(&self) -> Option<&ClientId>;

    /// Sends a message. No delivery acknowledgment.
    ///
    /// # Errors
    ///
    /// - [`Error::ChannelDisposed`](crate::Error::ChannelDisposed) once disposed
    /// - [`Error::ConnectionClosed`](crate::Error::ConnectionClosed) if the transport is gone
    fn send(&self, message: Value) -> Result<()>;

    /// Disposes the channel and its transport.
    fn dispose(&self);

    /// Upcast used to recover the concrete variant.
    fn as_any(&self) -> &dyn Any;

    /// Returns `true` once disposed.
    #[inline]
    fn is_disposed(&self) -> bool {
        self.core().is_disposed()
    }

    /// Installs the single inbound message handler, replacing any previous one.
    #[inline]
    fn set_message_handler(&self, handler: MessageHandler) {
        self.core().set_message_handler(handler);
    }

    /// Removes the inbound message handler.
    #[inline]
    fn clear_message_handler(&self) {
        self.core().clear_message_handler();
    }

    /// Registers a disposal observer; runs it immediately if already disposed.
    #[inline]
    fn add_dispose_observer(&self, observer: DisposeObserver) -> SubscriptionId {
        self.core().add_dispose_observer(observer)
    }

    /// Unregisters a disposal observer.
    #[inline]
    fn remove_dispose_observer(&self, id: SubscriptionId) -> bool {
        self.core().remove_dispose_observer(id)
    }
}

impl fmt::Debug for dyn MessageChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageChannel")
            .field("kind", &self.kind())
            .field("client_id", &self.client_id())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Returns `true` if both handles point at the same channel.
#[inline]
#[must_use]
pub fn same_channel(a: &SharedChannel, b: &SharedChannel) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
