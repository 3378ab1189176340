//! Client handler bridging one client channel to the backend.
//!
//! A handler owns no thread and is tracked by no container. Its lifetime is
//! carried by the disposal observers it registers on the two channels it
//! bridges: whichever fires first tears the handler down, releases the
//! other observer and drops the last strong references.
//!
//! # Backend session
//!
//! | Moment | Envelope sent to the backend |
//! |--------|------------------------------|
//! | Gate ready | `create_handler {handlerId, clientId}` |
//! | Each client message | `request {handlerId, payload}` |
//! | Teardown, backend alive | `delete_handler {handlerId}` |
//!
//! Replies addressed to the handler's id are routed back to the client.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, error, info, trace};

use crate::backend::BackendServer;
use crate::channel::SharedChannel;
use crate::identifiers::{ClientId, HandlerId, SubscriptionId};
use crate::protocol::ClientEnvelope;

// ============================================================================
// Observers
// ============================================================================

/// Disposal observer registrations to release on teardown.
#[derive(Default)]
struct Observers {
    client: Option<SubscriptionId>,
    backend: Option<SubscriptionId>,
}

// ============================================================================
// ClientHandler
// ============================================================================

/// Ephemeral bridge between one client channel and the shared backend.
pub struct ClientHandler {
    /// Correlation id, also used to address backend replies.
    id: HandlerId,
    /// Identity of the client, `None` for the broker's own app.
    client_id: Option<ClientId>,
    client: SharedChannel,
    backend: Arc<BackendServer>,
    /// Set once on teardown; the handler does nothing afterwards.
    inert: AtomicBool,
    /// Set once `create_handler` reached the backend.
    announced: AtomicBool,
    observers: Mutex<Observers>,
}

impl fmt::Debug for ClientHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandler")
            .field("id", &self.id)
            .field("client_id", &self.client_id)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ClientHandler - Construction
// ============================================================================

impl ClientHandler {
    /// Starts bridging `client` to `backend`.
    ///
    /// The returned handle is informational; dropping it does not stop the
    /// handler. Only disposal of either channel does.
    pub fn spawn(
        id: HandlerId,
        client: SharedChannel,
        backend: Arc<BackendServer>,
    ) -> Arc<Self> {
        let client_id = client.client_id().cloned();
        let disposed = client.is_disposed();

        let handler = Arc::new(Self {
            id,
            client_id,
            client,
            backend,
            inert: AtomicBool::new(disposed),
            announced: AtomicBool::new(false),
            observers: Mutex::new(Observers::default()),
        });

        // Never engages the backend.
        if disposed {
            error!(handler_id = %id, "Client handler created on a disposed channel");
            return handler;
        }

        handler.subscribe();
        handler.watch_channels();

        match &handler.client_id {
            Some(client_id) => {
                info!(handler_id = %id, client_id = %client_id, "Client handler created");
            }
            None => debug!(handler_id = %id, "Client handler created for own app"),
        }

        handler
    }

    /// Registers the reply route, the backend announcement and the client
    /// message forwarding, in that order.
    fn subscribe(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.backend.register_route(
            self.id,
            Arc::new(move |payload| {
                if let Some(handler) = weak.upgrade() {
                    handler.forward_to_client(payload);
                }
            }),
        );

        let weak: Weak<Self> = Arc::downgrade(self);
        self.backend.readiness().when_ready(move || {
            if let Some(handler) = weak.upgrade() {
                handler.announce();
            }
        });

        let weak: Weak<Self> = Arc::downgrade(self);
        self.client.set_message_handler(Arc::new(move |payload| {
            if let Some(handler) = weak.upgrade() {
                handler.forward_to_backend(payload);
            }
        }));
    }

    /// Registers the disposal observers that own the handler.
    fn watch_channels(self: &Arc<Self>) {
        let handler = Arc::clone(self);
        let client_watch = self.client.add_dispose_observer(Box::new(move || {
            handler.tear_down("client channel disposed");
        }));
        self.observers.lock().client = Some(client_watch);

        let handler = Arc::clone(self);
        let backend_watch = self.backend.add_dispose_observer(Box::new(move || {
            handler.tear_down("backend channel disposed");
        }));
        self.observers.lock().backend = Some(backend_watch);

        // Either observer may have fired before both were stored.
        if self.inert.load(Ordering::SeqCst) {
            self.release_observers();
        }
    }
}

// ============================================================================
// ClientHandler - Public API
// ============================================================================

impl ClientHandler {
    /// Returns the handler's correlation id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Returns the bridged client's identity.
    #[inline]
    #[must_use]
    pub fn client_id(&self) -> Option<&ClientId> {
        self.client_id.as_ref()
    }

    /// Returns `true` until either bridged channel is disposed.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.inert.load(Ordering::SeqCst)
    }
}

// ============================================================================
// ClientHandler - Relay
// ============================================================================

impl ClientHandler {
    fn announce(&self) {
        if !self.is_active() {
            return;
        }

        let envelope = ClientEnvelope::CreateHandler {
            handler_id: self.id,
            client_id: self.client_id.clone(),
        };
        match self.backend.send(&envelope) {
            Ok(()) => self.announced.store(true, Ordering::SeqCst),
            Err(e) => debug!(handler_id = %self.id, error = %e, "Handler announcement not sent"),
        }
    }

    fn forward_to_backend(self: Arc<Self>, payload: Value) {
        let weak: Weak<Self> = Arc::downgrade(&self);
        self.backend.readiness().when_ready(move || {
            let Some(handler) = weak.upgrade() else {
                return;
            };
            if !handler.is_active() {
                trace!(handler_id = %handler.id, "Dropping request for inert handler");
                return;
            }

            let envelope = ClientEnvelope::Request {
                handler_id: handler.id,
                payload,
            };
            if let Err(e) = handler.backend.send(&envelope) {
                debug!(handler_id = %handler.id, error = %e, "Request not forwarded to backend");
            }
        });
    }

    fn forward_to_client(&self, payload: Value) {
        if !self.is_active() {
            return;
        }
        if let Err(e) = self.client.send(payload) {
            debug!(handler_id = %self.id, error = %e, "Reply not forwarded to client");
        }
    }
}

// ============================================================================
// ClientHandler - Teardown
// ============================================================================

impl ClientHandler {
    fn tear_down(&self, cause: &str) {
        if self.inert.swap(true, Ordering::SeqCst) {
            return;
        }

        self.client.clear_message_handler();
        self.backend.unregister_route(self.id);
        self.release_observers();

        if self.announced.load(Ordering::SeqCst) && !self.backend.is_disposed() {
            let envelope = ClientEnvelope::DeleteHandler {
                handler_id: self.id,
            };
            if let Err(e) = self.backend.send(&envelope) {
                debug!(handler_id = %self.id, error = %e, "Handler deletion not sent");
            }
        }

        debug!(handler_id = %self.id, cause, "Client handler torn down");
    }

    fn release_observers(&self) {
        let Observers { client, backend } = std::mem::take(&mut *self.observers.lock());
        if let Some(id) = client {
            self.client.remove_dispose_observer(id);
        }
        if let Some(id) = backend {
            self.backend.remove_dispose_observer(id);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
