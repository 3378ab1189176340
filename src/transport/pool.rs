//! Channel pool keyed by client identity.
//!
//! Tracks the live channels opened by each external client. Channels leave
//! the pool on their own when disposed.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              ChannelPool                │
//! │  ┌─────────────────────────────────┐    │
//! │  │ "ext1" → [port, single-message] │    │
//! │  │ "ext2" → [port]                 │    │
//! │  └─────────────────────────────────┘    │
//! │  update listeners (no payload)          │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Mutation and notification happen under one re-entrant turn lock, so no
//! listener observes a half-applied change and listeners may query or
//! mutate the pool themselves.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::channel::{MessageChannel, SharedChannel, same_channel};
use crate::identifiers::{ClientId, SubscriptionId};
use crate::listeners::Listeners;

// ============================================================================
// ChannelPool
// ============================================================================

/// Multi-map from client identity to its live channels.
///
/// # Example
///
/// ```ignore
/// let pool = ChannelPool::new();
/// pool.add_on_update_listener(|| println!("client list changed"));
///
/// pool.add_channel(client_id.clone(), channel);
/// assert_eq!(pool.get_channels(&client_id).len(), 1);
/// ```
pub struct ChannelPool {
    /// Live channels by identity. Empty entries are removed eagerly.
    channels: Mutex<FxHashMap<ClientId, Vec<SharedChannel>>>,
    /// Update listeners.
    listeners: Listeners<()>,
    /// Serializes mutation with notification.
    turn: ReentrantMutex<()>,
}

impl fmt::Debug for ChannelPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelPool")
            .field("clients", &self.client_ids())
            .field("channels", &self.channel_count())
            .finish()
    }
}

// ============================================================================
// ChannelPool - Constructor
// ============================================================================

impl ChannelPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            channels: Mutex::new(FxHashMap::default()),
            listeners: Listeners::new(),
            turn: ReentrantMutex::new(()),
        })
    }
}

// ============================================================================
// ChannelPool - Public API
// ============================================================================

impl ChannelPool {
    /// Registers `channel` under `client_id`.
    ///
    /// Fires the update notification, then watches the channel so that its
    /// disposal removes it and fires again. Adding a channel that is already
    /// pooled is a no-op.
    pub fn add_channel(self: &Arc<Self>, client_id: ClientId, channel: SharedChannel) {
        let _turn = self.turn.lock();

        {
            let mut channels = self.channels.lock();
            if channels
                .values()
                .flatten()
                .any(|pooled| same_channel(pooled, &channel))
            {
                warn!(client_id = %client_id, "Channel already pooled, ignoring");
                return;
            }
            channels
                .entry(client_id.clone())
                .or_default()
                .push(Arc::clone(&channel));
        }

        debug!(client_id = %client_id, kind = %channel.kind(), "Channel added to pool");
        self.listeners.notify(&());

        let pool: Weak<Self> = Arc::downgrade(self);
        let target = Arc::downgrade(&channel);
        channel.add_dispose_observer(Box::new(move || {
            if let Some(pool) = pool.upgrade() {
                pool.remove_channel(&client_id, &target);
            }
        }));
    }

    /// Returns the live channels registered under `client_id`, in the order
    /// they were added.
    #[must_use]
    pub fn get_channels(&self, client_id: &ClientId) -> Vec<SharedChannel> {
        self.channels
            .lock()
            .get(client_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns every identity with at least one live channel, sorted.
    #[must_use]
    pub fn client_ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.channels.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns the total number of pooled channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.lock().values().map(Vec::len).sum()
    }

    /// Subscribes to membership changes. Consumers re-query the pool.
    pub fn add_on_update_listener<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.listeners.add(move |_: &()| listener())
    }

    /// Unsubscribes from membership changes.
    pub fn remove_on_update_listener(&self, id: SubscriptionId) -> bool {
        self.listeners.remove(id)
    }
}

// ============================================================================
// ChannelPool - Removal
// ============================================================================

impl ChannelPool {
    /// Removes a disposed channel. Only notifies if something was removed.
    fn remove_channel(&self, client_id: &ClientId, target: &Weak<dyn MessageChannel>) {
        let _turn = self.turn.lock();

        let removed = {
            let mut channels = self.channels.lock();
            let Some(list) = channels.get_mut(client_id) else {
                return;
            };

            let before = list.len();
            list.retain(|pooled| !std::ptr::addr_eq(Arc::as_ptr(pooled), target.as_ptr()));
            let removed = list.len() != before;

            if list.is_empty() {
                channels.remove(client_id);
            }
            removed
        };

        if removed {
            debug!(client_id = %client_id, "Channel removed from pool");
            self.listeners.notify(&());
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use proptest::prelude::*;

    use crate::channel::{PairedChannel, channel_pair};

    fn id(raw: &str) -> ClientId {
        ClientId::new(raw).unwrap()
    }

    fn live_channel() -> (SharedChannel, Arc<PairedChannel>) {
        let (first, second) = channel_pair();
        (first, second)
    }

    fn counting_listener(pool: &ChannelPool) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        pool.add_on_update_listener(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[test]
    fn test_empty_pool() {
        let pool = ChannelPool::new();
        assert!(pool.get_channels(&id("ext1")).is_empty());
        assert!(pool.client_ids().is_empty());
        assert_eq!(pool.channel_count(), 0);
    }

    #[test]
    fn test_add_and_query() {
        let pool = ChannelPool::new();
        let (a, _peer_a) = live_channel();
        let (b, _peer_b) = live_channel();

        pool.add_channel(id("ext1"), Arc::clone(&a));
        pool.add_channel(id("ext1"), Arc::clone(&b));

        let channels = pool.get_channels(&id("ext1"));
        assert_eq!(channels.len(), 2);
        assert!(same_channel(&channels[0], &a));
        assert!(same_channel(&channels[1], &b));
        assert_eq!(pool.client_ids(), vec![id("ext1")]);
    }

    #[test]
    fn test_disposal_prunes_entry() {
        let pool = ChannelPool::new();
        let (a, _peer) = live_channel();

        pool.add_channel(id("ext1"), Arc::clone(&a));
        a.dispose();

        assert!(pool.get_channels(&id("ext1")).is_empty());
        assert!(pool.client_ids().is_empty());
    }

    #[test]
    fn test_notifications_once_per_add_and_removal() {
        let pool = ChannelPool::new();
        let count = counting_listener(&pool);
        let (a, _peer) = live_channel();

        pool.add_channel(id("ext1"), Arc::clone(&a));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        a.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 2);

        a.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_duplicate_add_is_noop() {
        let pool = ChannelPool::new();
        let count = counting_listener(&pool);
        let (a, _peer) = live_channel();

        pool.add_channel(id("ext1"), Arc::clone(&a));
        pool.add_channel(id("ext2"), Arc::clone(&a));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(pool.channel_count(), 1);
        assert!(pool.get_channels(&id("ext2")).is_empty());
    }

    #[test]
    fn test_adding_disposed_channel_adds_then_removes() {
        let pool = ChannelPool::new();
        let count = counting_listener(&pool);
        let (a, _peer) = live_channel();
        a.dispose();

        pool.add_channel(id("ext1"), a);

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(pool.channel_count(), 0);
    }

    #[test]
    fn test_listener_sees_applied_mutation() {
        let pool = ChannelPool::new();
        let observed = Arc::new(Mutex::new(Vec::new()));

        let pool_clone = Arc::downgrade(&pool);
        let observed_clone = Arc::clone(&observed);
        pool.add_on_update_listener(move || {
            if let Some(pool) = pool_clone.upgrade() {
                observed_clone
                    .lock()
                    .push(pool.get_channels(&id("ext1")).len());
            }
        });

        let (a, _peer) = live_channel();
        pool.add_channel(id("ext1"), Arc::clone(&a));
        a.dispose();

        assert_eq!(*observed.lock(), vec![1, 0]);
    }

    #[test]
    fn test_removed_listener_not_notified() {
        let pool = ChannelPool::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let listener = pool.add_on_update_listener(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(pool.remove_on_update_listener(listener));
        let (a, _peer) = live_channel();
        pool.add_channel(id("ext1"), a);

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    proptest! {
        /// After any sequence of adds and disposals, each identity maps to
        /// exactly its added, not-yet-disposed channels.
        #[test]
        fn prop_pool_tracks_live_channels(
            ops in proptest::collection::vec((0usize..3, any::<bool>()), 1..40)
        ) {
            let pool = ChannelPool::new();
            let identities = [id("a"), id("b"), id("c")];
            let mut added: Vec<(usize, SharedChannel, Arc<PairedChannel>)> = Vec::new();

            for (slot, dispose_one) in ops {
                if dispose_one && !added.is_empty() {
                    let index = slot % added.len();
                    added[index].1.dispose();
                } else {
                    let (channel, peer) = live_channel();
                    pool.add_channel(identities[slot].clone(), Arc::clone(&channel));
                    added.push((slot, channel, peer));
                }
            }

            for (slot, identity) in identities.iter().enumerate() {
                let expected: Vec<&SharedChannel> = added
                    .iter()
                    .filter(|(s, channel, _)| *s == slot && !channel.is_disposed())
                    .map(|(_, channel, _)| channel)
                    .collect();
                let actual = pool.get_channels(identity);

                prop_assert_eq!(actual.len(), expected.len());
                for (a, e) in actual.iter().zip(expected) {
                    prop_assert!(same_channel(a, e));
                }
            }
        }
    }
}
