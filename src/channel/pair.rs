//! In-process paired channel.
//!
//! Two endpoints created together, each the other's peer. Sending on one
//! endpoint delivers to the other's message handler synchronously, through
//! the peer's inbound queue. Disposing either endpoint disposes both.

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::sync::{Arc, OnceLock, Weak};

use serde_json::Value;
use tracing::trace;

use crate::error::{Error, Result};
use crate::identifiers::ClientId;

use super::core::ChannelCore;
use super::{ChannelKind, MessageChannel};

// ============================================================================
// PairedChannel
// ============================================================================

/// One endpoint of an in-process channel pair.
#[derive(Debug)]
pub struct PairedChannel {
    core: ChannelCore,
    peer: OnceLock<Weak<PairedChannel>>,
}

/// Creates two connected endpoints.
///
/// # Example
///
/// ```ignore
/// let (first, second) = channel_pair();
/// second.set_message_handler(Arc::new(|message| println!("{message}")));
/// first.send(json!({"hello": "loopback"}))?;
/// ```
#[must_use]
pub fn channel_pair() -> (Arc<PairedChannel>, Arc<PairedChannel>) {
    let first = Arc::new(PairedChannel {
        core: ChannelCore::new(),
        peer: OnceLock::new(),
    });
    let second = Arc::new(PairedChannel {
        core: ChannelCore::new(),
        peer: OnceLock::new(),
    });

    let _ = first.peer.set(Arc::downgrade(&second));
    let _ = second.peer.set(Arc::downgrade(&first));

    (first, second)
}

impl PairedChannel {
    fn peer(&self) -> Option<Arc<PairedChannel>> {
        self.peer.get().and_then(Weak::upgrade)
    }
}

impl MessageChannel for PairedChannel {
    fn core(&self) -> &ChannelCore {
        &self.core
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Paired
    }

    fn client_id(&self) -> Option<&ClientId> {
        None
    }

    fn send(&self, message: Value) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::ChannelDisposed);
        }

        match self.peer() {
            Some(peer) => {
                peer.core.dispatch(message);
                Ok(())
            }
            None => {
                // Peer endpoint was dropped without being disposed.
                self.dispose();
                Err(Error::ChannelDisposed)
            }
        }
    }

    fn dispose(&self) {
        if !self.core.dispose() {
            return;
        }
        trace!("Paired channel endpoint disposed");
        if let Some(peer) = self.peer() {
            peer.dispose();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;
    use serde_json::json;

    #[test]
    fn test_messages_cross_in_both_directions() {
        let (first, second) = channel_pair();
        let at_first = Arc::new(Mutex::new(Vec::new()));
        let at_second = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&at_first);
        first.set_message_handler(Arc::new(move |m| log.lock().push(m)));
        let log = Arc::clone(&at_second);
        second.set_message_handler(Arc::new(move |m| log.lock().push(m)));

        first.send(json!("to second")).unwrap();
        second.send(json!("to first")).unwrap();

        assert_eq!(*at_second.lock(), vec![json!("to second")]);
        assert_eq!(*at_first.lock(), vec![json!("to first")]);
    }

    #[test]
    fn test_dispose_propagates_to_peer() {
        let (first, second) = channel_pair();
        second.dispose();

        assert!(first.is_disposed());
        assert!(second.is_disposed());
        assert!(matches!(
            first.send(json!(1)),
            Err(Error::ChannelDisposed)
        ));
    }

    #[test]
    fn test_send_after_peer_dropped_disposes() {
        let (first, second) = channel_pair();
        drop(second);

        assert!(first.send(json!(1)).is_err());
        assert!(first.is_disposed());
    }

    #[test]
    fn test_kind_and_identity() {
        let (first, _second) = channel_pair();
        assert_eq!(first.kind(), ChannelKind::Paired);
        assert!(first.client_id().is_none());
    }
}
