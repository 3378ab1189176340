//! Reader state publisher.
//!
//! Listens on a loopback channel fed by the backend's reader-list events and
//! republishes each snapshot to any number of subscribers. The latest
//! snapshot is retained and replayed to subscribers that join later.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::channel::SharedChannel;
use crate::identifiers::SubscriptionId;
use crate::listeners::Listeners;

// ============================================================================
// Reader Types
// ============================================================================

/// Initialization state of a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReaderStatus {
    /// Reader is being initialized.
    Init,
    /// Reader is usable.
    Success,
    /// Reader failed to initialize.
    Failure,
}

/// One reader entry of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderInfo {
    /// Reader display name.
    pub name: String,

    /// Initialization state.
    pub status: ReaderStatus,

    /// Failure description, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Whether a card is inserted.
    #[serde(rename = "isCardPresent", default)]
    pub is_card_present: bool,
}

/// Full reader list at one point in time.
pub type ReaderSnapshot = Vec<ReaderInfo>;

// ============================================================================
// ReaderStatePublisher
// ============================================================================

/// Repeatable broadcast of the latest reader snapshot.
pub struct ReaderStatePublisher {
    /// Loopback endpoint the snapshots arrive on.
    channel: SharedChannel,
    /// Latest snapshot, unset until the first event.
    snapshot: Mutex<Option<ReaderSnapshot>>,
    listeners: Listeners<ReaderSnapshot>,
    /// Serializes publish against subscribe so replay never reorders.
    turn: ReentrantMutex<()>,
}

impl fmt::Debug for ReaderStatePublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderStatePublisher")
            .field("readers", &self.snapshot.lock().as_ref().map(Vec::len))
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl ReaderStatePublisher {
    /// Creates a publisher consuming `channel`.
    pub fn new(channel: SharedChannel) -> Arc<Self> {
        let publisher = Arc::new(Self {
            channel: Arc::clone(&channel),
            snapshot: Mutex::new(None),
            listeners: Listeners::new(),
            turn: ReentrantMutex::new(()),
        });

        let weak: Weak<Self> = Arc::downgrade(&publisher);
        channel.set_message_handler(Arc::new(move |message| {
            if let Some(publisher) = weak.upgrade() {
                publisher.handle_message(message);
            }
        }));
        channel.add_dispose_observer(Box::new(|| {
            debug!("Reader tracker loopback channel disposed");
        }));

        publisher
    }

    /// Returns the latest snapshot, if any event was received.
    #[must_use]
    pub fn snapshot(&self) -> Option<ReaderSnapshot> {
        self.snapshot.lock().clone()
    }

    /// Returns `true` while the loopback channel is alive.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.channel.is_disposed()
    }

    /// Subscribes to snapshots.
    ///
    /// If a snapshot exists, `listener` receives it before this returns.
    pub fn add_on_update_listener<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&ReaderSnapshot) + Send + Sync + 'static,
    {
        let _turn = self.turn.lock();
        let id = self.listeners.add(listener);

        let current = self.snapshot.lock().clone();
        if let Some(current) = current
            && let Some(listener) = self.listeners.get(id)
        {
            listener(&current);
        }
        id
    }

    /// Unsubscribes a listener.
    pub fn remove_on_update_listener(&self, id: SubscriptionId) -> bool {
        self.listeners.remove(id)
    }

    fn handle_message(&self, message: Value) {
        match serde_json::from_value::<ReaderSnapshot>(message) {
            Ok(snapshot) => self.publish(snapshot),
            Err(e) => warn!(error = %e, "Malformed reader snapshot ignored"),
        }
    }

    fn publish(&self, snapshot: ReaderSnapshot) {
        let _turn = self.turn.lock();
        debug!(readers = snapshot.len(), "Reader snapshot updated");
        *self.snapshot.lock() = Some(snapshot.clone());
        self.listeners.notify(&snapshot);
    }
}

// ============================================================================
// Tests
// ============================================================================
