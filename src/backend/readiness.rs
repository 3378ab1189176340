//! One-shot readiness latch for the backend server.
//!
//! Client handlers may exist before the backend finished its startup
//! handshake; anything they would send is deferred through
//! [`ReadinessGate::when_ready`] instead of being dropped.
//!
//! # States
//!
//! ```text
//! NotReady ──notify_ready()──► Draining ──queue empty──► Ready
//! ```
//!
//! Callbacks registered while draining are appended to the queue, so the
//! gate never runs a later callback before an earlier one.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;
use tracing::{debug, info};

// ============================================================================
// Types
// ============================================================================

/// Callback deferred until the backend is ready.
pub type ReadyCallback = Box<dyn FnOnce() + Send>;

/// Internal latch state.
enum GateState {
    /// Handshake pending; callbacks queue up.
    NotReady(VecDeque<ReadyCallback>),
    /// Transition in progress; callbacks still queue up.
    Draining(VecDeque<ReadyCallback>),
    /// Callbacks run immediately.
    Ready,
}

// ============================================================================
// ReadinessGate
// ============================================================================

/// Monotonic false→true latch with ordered one-shot callbacks.
pub struct ReadinessGate {
    state: Mutex<GateState>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self {
            state: Mutex::new(GateState::NotReady(VecDeque::new())),
        }
    }
}

impl fmt::Debug for ReadinessGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.lock() {
            GateState::NotReady(queue) => format!("NotReady({} pending)", queue.len()),
            GateState::Draining(queue) => format!("Draining({} pending)", queue.len()),
            GateState::Ready => "Ready".to_string(),
        };
        f.debug_struct("ReadinessGate").field("state", &state).finish()
    }
}

impl ReadinessGate {
    /// Creates a gate in the not-ready state.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once `notify_ready` has been called.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !matches!(&*self.state.lock(), GateState::NotReady(_))
    }

    /// Runs `callback` once the gate is ready.
    ///
    /// If the gate is already ready the callback runs before this returns.
    pub fn when_ready<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.state.lock();
            match &mut *state {
                GateState::NotReady(queue) | GateState::Draining(queue) => {
                    queue.push_back(Box::new(callback));
                    return;
                }
                GateState::Ready => {}
            }
        }
        callback();
    }

    /// Flips the gate and runs every pending callback in registration order.
    ///
    /// Calls after the first are ignored.
    pub fn notify_ready(&self) {
        {
            let mut state = self.state.lock();
            match &mut *state {
                GateState::NotReady(queue) => {
                    let queue = std::mem::take(queue);
                    info!(pending = queue.len(), "Backend ready");
                    *state = GateState::Draining(queue);
                }
                GateState::Draining(_) | GateState::Ready => {
                    debug!("Duplicate readiness notification ignored");
                    return;
                }
            }
        }

        loop {
            let next = {
                let mut state = self.state.lock();
                match &mut *state {
                    GateState::Draining(queue) => match queue.pop_front() {
                        Some(callback) => Some(callback),
                        None => {
                            *state = GateState::Ready;
                            None
                        }
                    },
                    _ => None,
                }
            };

            match next {
                Some(callback) => callback(),
                None => break,
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_callbacks_fire_in_registration_order() {
        let gate = ReadinessGate::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for n in 0..4 {
            let order = Arc::clone(&order);
            gate.when_ready(move || order.lock().push(n));
        }
        assert!(order.lock().is_empty());
        assert!(!gate.is_ready());

        gate.notify_ready();
        assert!(gate.is_ready());
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_late_callback_fires_immediately_once() {
        let gate = ReadinessGate::new();
        gate.notify_ready();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        gate.when_ready(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        gate.notify_ready();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_notify_does_not_refire() {
        let gate = ReadinessGate::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_clone = Arc::clone(&calls);
        gate.when_ready(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        gate.notify_ready();
        gate.notify_ready();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_registered_while_draining_runs_after_queue() {
        let gate = Arc::new(ReadinessGate::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let gate_clone = Arc::clone(&gate);
        let order_clone = Arc::clone(&order);
        gate.when_ready(move || {
            order_clone.lock().push("first");
            let order_inner = Arc::clone(&order_clone);
            gate_clone.when_ready(move || order_inner.lock().push("nested"));
        });
        let order_clone = Arc::clone(&order);
        gate.when_ready(move || order_clone.lock().push("second"));

        gate.notify_ready();
        assert_eq!(*order.lock(), vec!["first", "second", "nested"]);
    }
}
