//! Connection router.
//!
//! Turns platform events into channels, pool entries and client handlers.
//!
//! | Event | Action |
//! |-------|--------|
//! | `Connect` | Port channel, no pool entry, handler without identity |
//! | `ConnectExternal` | Port channel; rejected without identity, else pooled with a handler |
//! | `MessageExternal` | Find or create the identity's one-shot channel and deliver, replaying once |
//! | `Installed` | Opens the window when the reason is `install` |
//! | `Launched` | Opens the window |
//!
//! Backend loss is fatal in [`BuildMode::Release`] and only logged in
//! [`BuildMode::Debug`].

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use crate::backend::{BackendServer, ReaderStatePublisher};
use crate::broker::BuildMode;
use crate::channel::{
    ChannelKind, KeepAlive, MessageChannel, PortChannel, ReplySink, SharedChannel, SingleMessageChannel,
    channel_pair,
};
use crate::error::{Error, Result};
use crate::identifiers::{ClientId, HandlerId};
use crate::transport::ChannelPool;

use super::events::{DeliveryOutcome, MAX_DELIVERY_ATTEMPTS, PlatformEvent, PortSocket};
use super::handler::ClientHandler;
use super::ui::{UiData, UiLauncher};

// ============================================================================
// RouterOptions
// ============================================================================

/// Router behavior knobs taken from the broker configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterOptions {
    /// Backend loss handling.
    pub build_mode: BuildMode,
    /// Keep-alive timing for new one-shot channels.
    pub keep_alive: KeepAlive,
}

// ============================================================================
// ConnectionRouter
// ============================================================================

/// Top-level event dispatcher.
pub struct ConnectionRouter {
    backend: Arc<BackendServer>,
    pool: Arc<ChannelPool>,
    readers: Arc<ReaderStatePublisher>,
    /// Outbound path of one-shot channels.
    reply_sink: Arc<dyn ReplySink>,
    ui: Arc<dyn UiLauncher>,
    options: RouterOptions,
    /// Flipped once when backend loss becomes fatal.
    fatal: watch::Sender<bool>,
}

impl fmt::Debug for ConnectionRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRouter")
            .field("backend", &self.backend)
            .field("pool", &self.pool)
            .field("options", &self.options)
            .field("fatal", &self.is_fatal())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConnectionRouter - Construction
// ============================================================================

impl ConnectionRouter {
    /// Creates the router around the raw backend channel.
    ///
    /// Wires the reader tracker loopback and starts watching the backend for
    /// disposal.
    pub fn new(
        backend_channel: SharedChannel,
        reply_sink: Arc<dyn ReplySink>,
        ui: Arc<dyn UiLauncher>,
        options: RouterOptions,
    ) -> Arc<Self> {
        let backend = BackendServer::new(backend_channel);

        let (tracker_feed, tracker_end) = channel_pair();
        backend.attach_reader_tracker(tracker_feed);
        let readers = ReaderStatePublisher::new(tracker_end);

        let (fatal, _) = watch::channel(false);

        let router = Arc::new(Self {
            backend,
            pool: ChannelPool::new(),
            readers,
            reply_sink,
            ui,
            options,
            fatal,
        });

        let weak: Weak<Self> = Arc::downgrade(&router);
        router.backend.add_dispose_observer(Box::new(move || {
            if let Some(router) = weak.upgrade() {
                router.on_backend_disposed();
            }
        }));

        debug!(build_mode = %options.build_mode, "Connection router created");
        router
    }
}

// ============================================================================
// ConnectionRouter - Accessors
// ============================================================================

impl ConnectionRouter {
    /// Pool of externally-originated channels.
    #[inline]
    #[must_use]
    pub fn pool(&self) -> &Arc<ChannelPool> {
        &self.pool
    }

    /// Reader state publisher.
    #[inline]
    #[must_use]
    pub fn readers(&self) -> &Arc<ReaderStatePublisher> {
        &self.readers
    }

    /// Shared backend endpoint.
    #[inline]
    #[must_use]
    pub fn backend(&self) -> &Arc<BackendServer> {
        &self.backend
    }

    /// Returns `true` once backend loss was escalated.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        *self.fatal.borrow()
    }

    /// Data handed to the UI window.
    #[must_use]
    pub fn ui_data(&self) -> UiData {
        UiData::new(Arc::clone(&self.pool), Arc::clone(&self.readers))
    }
}

// ============================================================================
// ConnectionRouter - Event Loop
// ============================================================================

impl ConnectionRouter {
    /// Processes platform events one at a time until the source closes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackendDisposed`] once backend loss is escalated.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<PlatformEvent>) -> Result<()> {
        let mut fatal = self.fatal.subscribe();

        loop {
            tokio::select! {
                biased;

                _ = fatal.wait_for(|fatal| *fatal) => {
                    return Err(Error::backend_disposed("backend server channel was disposed"));
                }

                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => {
                            debug!("Platform event source closed");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Handles a single platform event.
    pub fn handle_event(&self, event: PlatformEvent) {
        match event {
            PlatformEvent::Connect { socket } => self.on_connect(socket),
            PlatformEvent::ConnectExternal { socket, sender } => {
                self.on_connect_external(socket, sender);
            }
            PlatformEvent::MessageExternal { message, sender } => {
                let outcome = self.on_message_external(message, sender);
                if !outcome.is_delivered() {
                    debug!(?outcome, "External message not delivered");
                }
            }
            PlatformEvent::Installed { reason } => self.on_installed(&reason),
            PlatformEvent::Launched => self.on_launched(),
        }
    }
}

// ============================================================================
// ConnectionRouter - Platform Events
// ============================================================================

impl ConnectionRouter {
    /// Persistent connection from the broker's own app.
    pub fn on_connect(&self, socket: PortSocket) {
        debug!("Internal connection received");
        let channel: SharedChannel = Arc::new(PortChannel::new(socket, None));
        self.spawn_handler(channel);
    }

    /// Persistent connection from another client.
    pub fn on_connect_external(&self, socket: PortSocket, sender: Option<ClientId>) {
        debug!(sender = ?sender, "External connection received");
        let channel: SharedChannel = Arc::new(PortChannel::new(socket, sender.clone()));

        let Some(client_id) = sender else {
            let e = Error::missing_sender_identity("external connection");
            warn!(error = %e, "Ignoring external connection");
            channel.dispose();
            return;
        };

        if self.spawn_handler(Arc::clone(&channel)).is_some() {
            self.pool.add_channel(client_id, channel);
        }
    }

    /// Stateless message from another client.
    ///
    /// Delivery that disposes the target channel is replayed once against a
    /// freshly resolved channel for the same identity, never more.
    pub fn on_message_external(&self, message: Value, sender: Option<ClientId>) -> DeliveryOutcome {
        let Some(client_id) = sender else {
            let e = Error::missing_sender_identity("external message");
            warn!(error = %e, "Ignoring external message");
            return DeliveryOutcome::Rejected;
        };

        for attempt in 1..=MAX_DELIVERY_ATTEMPTS {
            let Some(channel) = self.get_or_create_single_message_channel(&client_id) else {
                debug!(client_id = %client_id, attempt, "No channel for external message");
                return DeliveryOutcome::Dropped { attempts: attempt };
            };

            if let Some(channel) = channel.as_any().downcast_ref::<SingleMessageChannel>() {
                channel.deliver_message(message.clone());
            }

            if !channel.is_disposed() {
                return DeliveryOutcome::Delivered { attempts: attempt };
            }
            debug!(client_id = %client_id, attempt, "Channel disposed during delivery");
        }

        warn!(client_id = %client_id, "External message dropped after replay");
        DeliveryOutcome::Dropped {
            attempts: MAX_DELIVERY_ATTEMPTS,
        }
    }

    /// Install or update notification.
    pub fn on_installed(&self, reason: &str) {
        if reason == "install" {
            debug!("Installed, opening window");
            self.open_window();
        } else {
            debug!(reason, "Install event ignored");
        }
    }

    /// App launch.
    pub fn on_launched(&self) {
        debug!("Launched, opening window");
        self.open_window();
    }
}

// ============================================================================
// ConnectionRouter - Internals
// ============================================================================

impl ConnectionRouter {
    /// Returns the live one-shot channel for `client_id`, creating and
    /// pooling one if needed.
    ///
    /// Yields `None` if a fresh channel could not get a handler.
    fn get_or_create_single_message_channel(&self, client_id: &ClientId) -> Option<SharedChannel> {
        let existing = self
            .pool
            .get_channels(client_id)
            .into_iter()
            .find(|channel| channel.kind() == ChannelKind::SingleMessage);
        if existing.is_some() {
            return existing;
        }

        let channel: SharedChannel = Arc::new(SingleMessageChannel::new(
            client_id.clone(),
            Arc::clone(&self.reply_sink),
            self.options.keep_alive,
        ));

        self.spawn_handler(Arc::clone(&channel))?;
        self.pool.add_channel(client_id.clone(), Arc::clone(&channel));

        if channel.is_disposed() {
            return None;
        }
        Some(channel)
    }

    /// Bridges `channel` to the backend.
    ///
    /// A handler id is consumed even when spawning fails. With the backend
    /// gone the channel is disposed instead.
    fn spawn_handler(&self, channel: SharedChannel) -> Option<Arc<ClientHandler>> {
        let id = HandlerId::next();

        if self.backend.is_disposed() {
            warn!(
                handler_id = %id,
                client_id = ?channel.client_id(),
                "Backend server is disposed, disposing client channel"
            );
            channel.dispose();
            return None;
        }

        Some(ClientHandler::spawn(id, channel, Arc::clone(&self.backend)))
    }

    fn open_window(&self) {
        self.ui.open_window(self.ui_data());
    }

    fn on_backend_disposed(&self) {
        match self.options.build_mode {
            BuildMode::Release => {
                error!("Backend server was disposed");
                self.fatal.send_replace(true);
            }
            BuildMode::Debug => {
                warn!("Backend server was disposed, continuing in debug mode");
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

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::io::DuplexStream;
    use tokio_tungstenite::WebSocketStream;
    use tokio_tungstenite::tungstenite::protocol::Role;

    use crate::channel::PairedChannel;
    use crate::router::events::PortStream;

    // ------------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------------

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(ClientId, Value)>>,
    }

    impl ReplySink for RecordingSink {
        fn send_to(&self, client_id: &ClientId, message: Value) -> Result<()> {
            self.sent.lock().push((client_id.clone(), message));
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingLauncher {
        opened: AtomicUsize,
    }

    impl UiLauncher for CountingLauncher {
        fn open_window(&self, _data: UiData) {
            self.opened.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        router: Arc<ConnectionRouter>,
        process: Arc<PairedChannel>,
        requests: Arc<Mutex<Vec<Value>>>,
        launcher: Arc<CountingLauncher>,
    }

    fn fixture(build_mode: BuildMode) -> Fixture {
        let (process, raw) = channel_pair();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let requests_clone = Arc::clone(&requests);
        process.set_message_handler(Arc::new(move |m| requests_clone.lock().push(m)));

        let launcher = Arc::new(CountingLauncher::default());
        let router = ConnectionRouter::new(
            raw,
            Arc::new(RecordingSink::default()),
            Arc::clone(&launcher) as Arc<dyn UiLauncher>,
            RouterOptions {
                build_mode,
                keep_alive: KeepAlive::default(),
            },
        );
        process.send(json!({"type": "ready"})).unwrap();

        Fixture {
            router,
            process,
            requests,
            launcher,
        }
    }

    fn ext1() -> ClientId {
        ClientId::new("ext1").unwrap()
    }

    fn request_payloads(requests: &Mutex<Vec<Value>>) -> Vec<Value> {
        requests
            .lock()
            .iter()
            .filter(|m| m["type"] == "request")
            .map(|m| m["payload"].clone())
            .collect()
    }

    async fn socket_pair() -> (PortSocket, WebSocketStream<DuplexStream>) {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let server_io: Box<dyn PortStream> = Box::new(server_io);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        (server, client)
    }

    // ------------------------------------------------------------------------
    // External messages
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_fresh_message_creates_pooled_channel() {
        let f = fixture(BuildMode::Debug);

        let outcome = f.router.on_message_external(json!("M1"), Some(ext1()));

        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 1 });
        assert_eq!(request_payloads(&f.requests), vec![json!("M1")]);
        assert_eq!(f.router.pool().get_channels(&ext1()).len(), 1);
        assert_eq!(f.router.backend().route_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_channel_reused() {
        let f = fixture(BuildMode::Debug);

        f.router.on_message_external(json!("M1"), Some(ext1()));
        f.router.on_message_external(json!("M2"), Some(ext1()));

        assert_eq!(request_payloads(&f.requests), vec![json!("M1"), json!("M2")]);
        assert_eq!(f.router.pool().get_channels(&ext1()).len(), 1);
        assert_eq!(f.router.backend().route_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_without_sender_rejected() {
        let f = fixture(BuildMode::Debug);

        let outcome = f.router.on_message_external(json!("M1"), None);

        assert_eq!(outcome, DeliveryOutcome::Rejected);
        assert_eq!(f.router.pool().channel_count(), 0);
        assert!(request_payloads(&f.requests).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_pong_replayed_once_to_fresh_channel() {
        let f = fixture(BuildMode::Debug);

        f.router
            .on_message_external(json!({"type": "pong", "channel_id": 1}), Some(ext1()));
        let first = f.router.pool().get_channels(&ext1());
        assert_eq!(first.len(), 1);

        // The client reloaded: its pong carries a new instance id.
        let outcome = f
            .router
            .on_message_external(json!({"type": "pong", "channel_id": 2}), Some(ext1()));

        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 2 });
        assert!(first[0].is_disposed());
        let second = f.router.pool().get_channels(&ext1());
        assert_eq!(second.len(), 1);
        assert!(!crate::channel::same_channel(&first[0], &second[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_channel_replaced_on_next_message() {
        let f = fixture(BuildMode::Debug);

        f.router.on_message_external(json!("M1"), Some(ext1()));
        tokio::time::sleep(KeepAlive::default().idle_timeout + Duration::from_secs(1)).await;
        assert_eq!(f.router.pool().channel_count(), 0);

        let outcome = f.router.on_message_external(json!("M2"), Some(ext1()));
        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 1 });
        assert_eq!(request_payloads(&f.requests), vec![json!("M1"), json!("M2")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_dropped_when_backend_disposed() {
        let f = fixture(BuildMode::Debug);
        f.process.dispose();

        let outcome = f.router.on_message_external(json!("M1"), Some(ext1()));

        assert_eq!(outcome, DeliveryOutcome::Dropped { attempts: 1 });
        assert_eq!(f.router.pool().channel_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_replay_dropped_without_third_attempt() {
        let f = fixture(BuildMode::Debug);
        f.router
            .on_message_external(json!({"type": "pong", "channel_id": 1}), Some(ext1()));
        f.process.dispose();

        // The reload disposes the pooled channel and the replay cannot spawn.
        let outcome = f
            .router
            .on_message_external(json!({"type": "pong", "channel_id": 2}), Some(ext1()));

        assert_eq!(outcome, DeliveryOutcome::Dropped { attempts: 2 });
        assert_eq!(f.router.pool().channel_count(), 0);
    }

    // ------------------------------------------------------------------------
    // Persistent connections
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_external_connection_pooled_and_bridged() {
        let f = fixture(BuildMode::Debug);
        let (server, _client) = socket_pair().await;

        f.router.on_connect_external(server, Some(ext1()));

        let channels = f.router.pool().get_channels(&ext1());
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].kind(), crate::channel::ChannelKind::Port);
        assert_eq!(f.router.backend().route_count(), 1);
    }

    #[tokio::test]
    async fn test_message_not_routed_to_port_channel() {
        let f = fixture(BuildMode::Debug);
        let (server, _client) = socket_pair().await;
        f.router.on_connect_external(server, Some(ext1()));

        let outcome = f.router.on_message_external(json!("M1"), Some(ext1()));

        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 1 });
        let mut kinds: Vec<_> = f
            .router
            .pool()
            .get_channels(&ext1())
            .iter()
            .map(|channel| channel.kind())
            .collect();
        kinds.sort_by_key(|kind| *kind == ChannelKind::SingleMessage);
        assert_eq!(kinds, vec![ChannelKind::Port, ChannelKind::SingleMessage]);
    }

    #[tokio::test]
    async fn test_external_connection_without_sender_rejected() {
        let f = fixture(BuildMode::Debug);
        let (server, _client) = socket_pair().await;

        f.router.on_connect_external(server, None);

        assert_eq!(f.router.pool().channel_count(), 0);
        assert_eq!(f.router.backend().route_count(), 0);
    }

    #[tokio::test]
    async fn test_internal_connection_not_pooled() {
        let f = fixture(BuildMode::Debug);
        let (server, _client) = socket_pair().await;

        f.router.on_connect(server);

        assert_eq!(f.router.pool().channel_count(), 0);
        assert_eq!(f.router.backend().route_count(), 1);
    }

    #[tokio::test]
    async fn test_disposed_backend_rejects_new_connection() {
        let f = fixture(BuildMode::Debug);
        f.process.dispose();
        let (server, _client) = socket_pair().await;

        let notified = Arc::new(AtomicUsize::new(0));
        let notified_clone = Arc::clone(&notified);
        f.router.pool().add_on_update_listener(move || {
            notified_clone.fetch_add(1, Ordering::SeqCst);
        });

        f.router.on_connect_external(server, Some(ext1()));

        assert_eq!(f.router.pool().channel_count(), 0);
        assert_eq!(notified.load(Ordering::SeqCst), 0);
        assert_eq!(f.router.backend().route_count(), 0);
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_install_and_launch_open_window() {
        let f = fixture(BuildMode::Debug);

        f.router.handle_event(PlatformEvent::Installed {
            reason: "update".to_string(),
        });
        assert_eq!(f.launcher.opened.load(Ordering::SeqCst), 0);

        f.router.handle_event(PlatformEvent::Installed {
            reason: "install".to_string(),
        });
        f.router.handle_event(PlatformEvent::Launched);
        assert_eq!(f.launcher.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_backend_loss_fatal_in_release() {
        let f = fixture(BuildMode::Release);
        let (_events_tx, events_rx) = mpsc::unbounded_channel();
        let run = tokio::spawn(Arc::clone(&f.router).run(events_rx));

        f.process.dispose();

        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();
        assert!(result.unwrap_err().is_fatal());
        assert!(f.router.is_fatal());
    }

    #[tokio::test]
    async fn test_backend_loss_tolerated_in_debug() {
        let f = fixture(BuildMode::Debug);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let run = tokio::spawn(Arc::clone(&f.router).run(events_rx));

        f.process.dispose();
        assert!(!f.router.is_fatal());

        drop(events_tx);
        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_reader_events_reach_ui_data() {
        let f = fixture(BuildMode::Debug);
        f.process
            .send(json!({"type": "readers_changed", "readers": [
                {"name": "Reader A", "status": "success", "isCardPresent": true}
            ]}))
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        f.router.ui_data().subscribe_readers(move |snapshot| {
            seen_clone.lock().push(snapshot.clone());
        });

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0][0].name, "Reader A");
    }
}
