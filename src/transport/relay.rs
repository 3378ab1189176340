//! Reply relay for one-shot message sockets.
//!
//! Clients without a persistent port talk to the broker over short-lived
//! `/message` sockets. Replies addressed to an identity are written to the
//! most recently opened `/message` socket of that identity.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::channel::ReplySink;
use crate::error::{Error, Result};
use crate::identifiers::ClientId;

// ============================================================================
// MessageRelay
// ============================================================================

/// Routes one-shot channel output to the client's current message socket.
#[derive(Default)]
pub struct MessageRelay {
    /// Current socket per identity, tagged to detect stale unregistration.
    sockets: Mutex<FxHashMap<ClientId, (Uuid, mpsc::UnboundedSender<Value>)>>,
}

impl fmt::Debug for MessageRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRelay")
            .field("sockets", &self.sockets.lock().len())
            .finish()
    }
}

impl MessageRelay {
    /// Creates an empty relay.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `outbound` the reply path for `client_id`, replacing any older
    /// socket. Returns the registration token.
    pub fn register(&self, client_id: ClientId, outbound: mpsc::UnboundedSender<Value>) -> Uuid {
        let token = Uuid::new_v4();
        debug!(client_id = %client_id, %token, "Message socket registered");
        self.sockets.lock().insert(client_id, (token, outbound));
        token
    }

    /// Removes the registration if it is still the current one.
    pub fn unregister(&self, client_id: &ClientId, token: Uuid) -> bool {
        let mut sockets = self.sockets.lock();
        match sockets.get(client_id) {
            Some((current, _)) if *current == token => {
                sockets.remove(client_id);
                debug!(client_id = %client_id, %token, "Message socket unregistered");
                true
            }
            _ => false,
        }
    }

    /// Returns `true` if `client_id` has a message socket.
    #[must_use]
    pub fn is_connected(&self, client_id: &ClientId) -> bool {
        self.sockets.lock().contains_key(client_id)
    }
}

impl ReplySink for MessageRelay {
    fn send_to(&self, client_id: &ClientId, message: Value) -> Result<()> {
        let mut sockets = self.sockets.lock();
        let Some((_, outbound)) = sockets.get(client_id) else {
            trace!(client_id = %client_id, "No message socket for client");
            return Err(Error::connection(format!(
                "no message socket open for client {client_id}"
            )));
        };

        if outbound.send(message).is_err() {
            sockets.remove(client_id);
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
