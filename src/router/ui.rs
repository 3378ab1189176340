//! UI window boundary.
//!
//! The window itself lives outside the broker. Opening it hands over a
//! [`UiData`], whose subscription functions are the window's only view of
//! broker state.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use tracing::info;

use crate::backend::{ReaderSnapshot, ReaderStatePublisher};
use crate::identifiers::{ClientId, SubscriptionId};
use crate::transport::ChannelPool;

// ============================================================================
// UiData
// ============================================================================

/// Subscription functions handed to the UI window.
#[derive(Clone)]
pub struct UiData {
    pool: Arc<ChannelPool>,
    readers: Arc<ReaderStatePublisher>,
}

impl fmt::Debug for UiData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UiData")
            .field("clients", &self.pool.client_ids())
            .finish_non_exhaustive()
    }
}

impl UiData {
    pub(crate) fn new(pool: Arc<ChannelPool>, readers: Arc<ReaderStatePublisher>) -> Self {
        Self { pool, readers }
    }

    /// Subscribes to the list of connected client identities.
    ///
    /// `listener` receives the re-queried list after every pool change.
    pub fn subscribe_client_list<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&[ClientId]) + Send + Sync + 'static,
    {
        let pool: Weak<ChannelPool> = Arc::downgrade(&self.pool);
        self.pool.add_on_update_listener(move || {
            if let Some(pool) = pool.upgrade() {
                listener(&pool.client_ids());
            }
        })
    }

    /// Cancels a client list subscription.
    pub fn unsubscribe_client_list(&self, id: SubscriptionId) -> bool {
        self.pool.remove_on_update_listener(id)
    }

    /// Subscribes to reader snapshots; the current one is replayed at once.
    pub fn subscribe_readers<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&ReaderSnapshot) + Send + Sync + 'static,
    {
        self.readers.add_on_update_listener(listener)
    }

    /// Cancels a reader subscription.
    pub fn unsubscribe_readers(&self, id: SubscriptionId) -> bool {
        self.readers.remove_on_update_listener(id)
    }
}

// ============================================================================
// UiLauncher
// ============================================================================

/// Opens the broker's UI window.
pub trait UiLauncher: Send + Sync {
    /// Opens (or focuses) the window, handing it `data`.
    fn open_window(&self, data: UiData);
}

/// Launcher for hosts without a UI. Only logs the request.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessLauncher;

impl UiLauncher for HeadlessLauncher {
    fn open_window(&self, data: UiData) {
        info!(clients = data.pool.client_ids().len(), "UI window requested, running headless");
    }
}
