//! Shared channel state: disposal flag, inbound queue, observers.
//!
//! Every channel variant embeds a [`ChannelCore`] and implements only its
//! transport-specific `send` and `dispose`.
//!
//! # Delivery
//!
//! Inbound messages are queued and drained by whichever caller finds the
//! queue idle, so a single channel never runs its message handler
//! concurrently with itself and handlers observe messages in arrival order.
//! Messages that arrive before a handler is installed stay queued until one
//! is.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::trace;

use crate::identifiers::SubscriptionId;

use super::{DisposeObserver, MessageHandler};

// ============================================================================
// Inbox
// ============================================================================

/// Pending inbound messages plus the drain-in-progress marker.
#[derive(Default)]
struct Inbox {
    queue: VecDeque<Value>,
    draining: bool,
}

// ============================================================================
// ChannelCore
// ============================================================================

/// Transport-independent channel state.
#[derive(Default)]
pub struct ChannelCore {
    /// Permanently `true` once disposed.
    disposed: AtomicBool,
    /// Single consumer of inbound messages.
    handler: Mutex<Option<MessageHandler>>,
    /// Inbound queue.
    inbox: Mutex<Inbox>,
    /// Disposal observers in registration order.
    observers: Mutex<Vec<(SubscriptionId, DisposeObserver)>>,
}

impl fmt::Debug for ChannelCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelCore")
            .field("disposed", &self.is_disposed())
            .field("queued", &self.inbox.lock().queue.len())
            .field("observers", &self.observers.lock().len())
            .finish()
    }
}

impl ChannelCore {
    /// Creates a live core with no handler.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once the channel has been disposed.
    #[inline]
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Installs the message handler and flushes queued messages to it.
    pub fn set_message_handler(&self, handler: MessageHandler) {
        if self.is_disposed() {
            return;
        }
        *self.handler.lock() = Some(handler);
        self.drain();
    }

    /// Removes the message handler. Later messages are queued.
    pub fn clear_message_handler(&self) {
        self.handler.lock().take();
    }

    /// Queues an inbound message and delivers it unless another caller is
    /// already draining.
    pub fn dispatch(&self, message: Value) {
        if self.is_disposed() {
            trace!("Dropping message received on disposed channel");
            return;
        }
        self.inbox.lock().queue.push_back(message);
        self.drain();
    }

    fn drain(&self) {
        {
            let mut inbox = self.inbox.lock();
            if inbox.draining {
                return;
            }
            inbox.draining = true;
        }

        loop {
            let next = {
                let mut inbox = self.inbox.lock();
                let handler = if self.is_disposed() {
                    inbox.queue.clear();
                    None
                } else {
                    self.handler.lock().clone()
                };

                let item = handler_and_message(&mut inbox, handler);
                if item.is_none() {
                    inbox.draining = false;
                }
                item
            };

            match next {
                Some((handler, message)) => handler(message),
                None => return,
            }
        }
    }

    /// Adds a disposal observer.
    ///
    /// If the channel is already disposed the observer runs before this
    /// returns.
    pub fn add_dispose_observer(&self, observer: DisposeObserver) -> SubscriptionId {
        let id = SubscriptionId::next();
        {
            let mut observers = self.observers.lock();
            if !self.is_disposed() {
                observers.push((id, observer));
                return id;
            }
        }
        observer();
        id
    }

    /// Removes a disposal observer that has not fired yet.
    pub fn remove_dispose_observer(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(entry_id, _)| *entry_id != id);
        observers.len() != before
    }

    /// Marks the core disposed and runs every observer, in registration
    /// order, before returning.
    ///
    /// Returns `false` if the core was already disposed.
    pub fn dispose(&self) -> bool {
        // Flag is set under the observer lock so that a concurrent
        // `add_dispose_observer` either lands in the drained list or runs
        // its observer itself.
        let observers = {
            let mut observers = self.observers.lock();
            if self.disposed.swap(true, Ordering::SeqCst) {
                return false;
            }
            std::mem::take(&mut *observers)
        };

        self.handler.lock().take();
        self.inbox.lock().queue.clear();

        for (_, observer) in observers {
            observer();
        }
        true
    }
}

/// Pops the next message when a handler is available.
fn handler_and_message(
    inbox: &mut Inbox,
    handler: Option<MessageHandler>,
) -> Option<(MessageHandler, Value)> {
    let handler = handler?;
    let message = inbox.queue.pop_front()?;
    Some((handler, message))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    fn recording_handler(log: &Arc<Mutex<Vec<Value>>>) -> MessageHandler {
        let log = Arc::clone(log);
        Arc::new(move |message| log.lock().push(message))
    }

    #[test]
    fn test_messages_buffered_until_handler_installed() {
        let core = ChannelCore::new();
        core.dispatch(json!(1));
        core.dispatch(json!(2));

        let log = Arc::new(Mutex::new(Vec::new()));
        core.set_message_handler(recording_handler(&log));
        core.dispatch(json!(3));

        assert_eq!(*log.lock(), vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn test_reentrant_dispatch_preserves_order() {
        let core = Arc::new(ChannelCore::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let core_clone = Arc::clone(&core);
        let log_clone = Arc::clone(&log);
        core.set_message_handler(Arc::new(move |message: Value| {
            log_clone.lock().push(message.clone());
            if message == json!("first") {
                core_clone.dispatch(json!("nested"));
            }
        }));

        core.dispatch(json!("first"));
        core.dispatch(json!("second"));

        assert_eq!(
            *log.lock(),
            vec![json!("first"), json!("nested"), json!("second")]
        );
    }

    #[test]
    fn test_dispose_is_idempotent_and_notifies_once() {
        let core = ChannelCore::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_clone = Arc::clone(&calls);
        core.add_dispose_observer(Box::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(core.dispose());
        assert!(!core.dispose());
        assert!(core.is_disposed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_observers_run_in_registration_order() {
        let core = ChannelCore::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in 0..3 {
            let order = Arc::clone(&order);
            core.add_dispose_observer(Box::new(move || order.lock().push(tag)));
        }
        core.dispose();

        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_observer_added_after_dispose_runs_immediately() {
        let core = ChannelCore::new();
        core.dispose();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        core.add_dispose_observer(Box::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_removed_observer_does_not_run() {
        let core = ChannelCore::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_clone = Arc::clone(&calls);
        let id = core.add_dispose_observer(Box::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(core.remove_dispose_observer(id));
        core.dispose();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_no_delivery_after_dispose() {
        let core = ChannelCore::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        core.set_message_handler(recording_handler(&log));

        core.dispose();
        core.dispatch(json!("late"));

        assert!(log.lock().is_empty());
    }
}
