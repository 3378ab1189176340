//! Backend server endpoint.
//!
//! The backend exposes exactly one raw channel. [`BackendServer`] is its
//! only consumer and demultiplexes what arrives on it:
//!
//! | Message | Goes to |
//! |---------|---------|
//! | `ready` | [`ReadinessGate::notify_ready`] |
//! | `reply` | The route registered for `handlerId` |
//! | `readers_changed` | Every attached reader-tracker loopback channel |
//! | `log` | `tracing`, target `backend` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use crate::channel::{DisposeObserver, MessageHandler, SharedChannel};
use crate::error::{Error, Result};
use crate::identifiers::{HandlerId, SubscriptionId};
use crate::protocol::{BackendMessage, ClientEnvelope, LogLevel};

use super::readiness::ReadinessGate;

// ============================================================================
// BackendServer
// ============================================================================

/// Shared endpoint for the backend server channel.
pub struct BackendServer {
    /// Raw backend channel.
    channel: SharedChannel,
    /// Startup handshake latch.
    readiness: Arc<ReadinessGate>,
    /// Per-handler reply routes.
    routes: Mutex<FxHashMap<HandlerId, MessageHandler>>,
    /// Loopback channels receiving reader snapshots.
    reader_trackers: Mutex<Vec<SharedChannel>>,
}

impl fmt::Debug for BackendServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendServer")
            .field("disposed", &self.is_disposed())
            .field("ready", &self.readiness.is_ready())
            .field("routes", &self.routes.lock().len())
            .finish_non_exhaustive()
    }
}

impl BackendServer {
    /// Takes ownership of the backend channel's inbound side.
    pub fn new(channel: SharedChannel) -> Arc<Self> {
        let server = Arc::new(Self {
            channel: Arc::clone(&channel),
            readiness: Arc::new(ReadinessGate::new()),
            routes: Mutex::new(FxHashMap::default()),
            reader_trackers: Mutex::new(Vec::new()),
        });

        let weak: Weak<Self> = Arc::downgrade(&server);
        channel.set_message_handler(Arc::new(move |message| {
            if let Some(server) = weak.upgrade() {
                server.handle_message(message);
            }
        }));

        let weak: Weak<Self> = Arc::downgrade(&server);
        channel.add_dispose_observer(Box::new(move || {
            if let Some(server) = weak.upgrade() {
                let routes = server.routes.lock().len();
                warn!(routes, "Backend server channel disposed");
            }
        }));

        server
    }

    /// Readiness latch fired by the backend's `ready` message.
    #[inline]
    #[must_use]
    pub fn readiness(&self) -> &Arc<ReadinessGate> {
        &self.readiness
    }

    /// Returns `true` once the backend channel is disposed.
    #[inline]
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.channel.is_disposed()
    }

    /// Disposes the backend channel.
    pub fn dispose(&self) {
        self.channel.dispose();
    }

    /// Observes backend disposal. Runs immediately if already disposed.
    pub fn add_dispose_observer(&self, observer: DisposeObserver) -> SubscriptionId {
        self.channel.add_dispose_observer(observer)
    }

    /// Cancels a disposal observer.
    pub fn remove_dispose_observer(&self, id: SubscriptionId) -> bool {
        self.channel.remove_dispose_observer(id)
    }

    /// Sends an envelope to the backend.
    ///
    /// # Errors
    ///
    /// - [`Error::BackendDisposed`] if the backend channel is gone
    /// - [`Error::Json`] if the envelope cannot be serialized
    pub fn send(&self, envelope: &ClientEnvelope) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::backend_disposed("cannot send to disposed backend"));
        }
        trace!(handler_id = %envelope.handler_id(), "Sending envelope to backend");
        let value = serde_json::to_value(envelope)?;
        self.channel.send(value)
    }

    /// Routes replies addressed to `handler_id` to `route`.
    pub fn register_route(&self, handler_id: HandlerId, route: MessageHandler) {
        if self.routes.lock().insert(handler_id, route).is_some() {
            warn!(handler_id = %handler_id, "Replaced existing backend route");
        }
    }

    /// Stops routing replies for `handler_id`.
    pub fn unregister_route(&self, handler_id: HandlerId) -> bool {
        self.routes.lock().remove(&handler_id).is_some()
    }

    /// Returns the number of registered handler routes.
    #[inline]
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.lock().len()
    }

    /// Feeds reader snapshots into `channel`.
    pub fn attach_reader_tracker(&self, channel: SharedChannel) {
        self.reader_trackers.lock().push(channel);
    }

    fn handle_message(&self, message: Value) {
        let message = match serde_json::from_value::<BackendMessage>(message) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Failed to parse backend message");
                return;
            }
        };

        match message {
            BackendMessage::Ready => self.readiness.notify_ready(),

            BackendMessage::Reply {
                handler_id,
                payload,
            } => {
                let route = self.routes.lock().get(&handler_id).cloned();
                match route {
                    Some(route) => route(payload),
                    None => debug!(handler_id = %handler_id, "Reply for unknown handler dropped"),
                }
            }

            BackendMessage::ReadersChanged { readers } => {
                let trackers: Vec<SharedChannel> = {
                    let mut trackers = self.reader_trackers.lock();
                    trackers.retain(|channel| !channel.is_disposed());
                    trackers.clone()
                };
                for tracker in trackers {
                    if let Err(e) = tracker.send(readers.clone()) {
                        debug!(error = %e, "Reader snapshot not forwarded");
                    }
                }
            }

            BackendMessage::Log { level, message } => emit_backend_log(level, &message),
        }
    }
}

/// Re-emits a backend log record through `tracing`.
fn emit_backend_log(level: LogLevel, message: &str) {
    match level {
        LogLevel::Trace => trace!(target: "backend", "{message}"),
        LogLevel::Debug => debug!(target: "backend", "{message}"),
        LogLevel::Info => info!(target: "backend", "{message}"),
        LogLevel::Warning => warn!(target: "backend", "{message}"),
        LogLevel::Error => error!(target: "backend", "{message}"),
    }
}

// ============================================================================
// Tests
// ============================================================================
