//! Typed publish/subscribe registry.
//!
//! Backs the repeatable broadcasts of the broker: channel pool membership
//! updates and reader-list snapshots. Listeners are kept in registration
//! order and addressed by [`SubscriptionId`] for removal.
//!
//! Notification clones the listener list and releases the lock before any
//! listener runs, so a listener may add or remove listeners (including
//! itself) without deadlocking.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::identifiers::SubscriptionId;

// ============================================================================
// Types
// ============================================================================

/// Listener callback invoked with each published value.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

// ============================================================================
// Listeners
// ============================================================================

/// Ordered registry of listeners for values of type `T`.
pub struct Listeners<T> {
    entries: Mutex<Vec<(SubscriptionId, Listener<T>)>>,
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<T> fmt::Debug for Listeners<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.len())
            .finish()
    }
}

impl<T> Listeners<T> {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener and returns its handle.
    pub fn add<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId::next();
        self.entries.lock().push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener.
    ///
    /// Returns `false` if the handle was not registered.
    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    /// Returns the listener registered under `id`, if any.
    pub(crate) fn get(&self, id: SubscriptionId) -> Option<Listener<T>> {
        self.entries
            .lock()
            .iter()
            .find(|(entry_id, _)| *entry_id == id)
            .map(|(_, listener)| Arc::clone(listener))
    }

    /// Invokes every currently registered listener with `value`.
    pub fn notify(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = self
            .entries
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            listener(value);
        }
    }

    /// Returns the number of registered listeners.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if no listener is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Tests
// ============================================================================
