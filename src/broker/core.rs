//! Broker coordinator.
//!
//! The [`Broker`] wires the platform listener, the connection router and the
//! backend together, then runs until the backend is lost.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use connector_broker::{Broker, PortChannel};
//!
//! # async fn example() -> connector_broker::Result<()> {
//! let backend = PortChannel::connect("ws://127.0.0.1:9000").await?;
//! let handle = Broker::builder()
//!     .backend(Arc::new(backend))
//!     .build()?
//!     .start()
//!     .await?;
//!
//! println!("Clients connect to {}", handle.ws_url());
//! handle.wait().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::router::{ConnectionRouter, PlatformEvent, RouterOptions, UiLauncher};
use crate::transport::PlatformListener;

use super::builder::BrokerBuilder;
use super::options::BrokerConfig;

// ============================================================================
// Broker
// ============================================================================

/// Configured, not yet started broker.
pub struct Broker {
    config: BrokerConfig,
    ui: Arc<dyn UiLauncher>,
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Broker - Public API
// ============================================================================

impl Broker {
    /// Creates a configuration builder for the broker.
    #[inline]
    #[must_use]
    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::new()
    }

    /// Returns the validated configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Binds the listener and starts routing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the listener cannot bind.
    pub async fn start(self) -> Result<BrokerHandle> {
        let Self { config, ui } = self;

        info!(
            version = env!("CARGO_PKG_VERSION"),
            build_mode = %config.build_mode,
            "Connector broker starting"
        );

        let listener =
            PlatformListener::bind(config.bind_ip, config.port, config.own_client_id.clone())
                .await?;
        let port = listener.port();
        let ws_url = listener.ws_url();

        let router = ConnectionRouter::new(
            Arc::clone(&config.backend),
            listener.reply_sink(),
            ui,
            RouterOptions {
                build_mode: config.build_mode,
                keep_alive: config.keep_alive,
            },
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let accept_task = listener.spawn(events_tx.clone());
        let router_task = tokio::spawn(Arc::clone(&router).run(events_rx));

        info!(port, url = %ws_url, "Connector broker started");

        Ok(BrokerHandle {
            port,
            ws_url,
            router,
            events: events_tx,
            accept_task,
            router_task,
        })
    }

    /// Starts the broker and runs it until backend loss is escalated.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the listener cannot bind
    /// - [`Error::BackendDisposed`] when the backend is lost in release mode
    pub async fn run(self) -> Result<()> {
        self.start().await?.wait().await
    }
}

// ============================================================================
// Broker - Internal
// ============================================================================

impl Broker {
    pub(crate) fn new(config: BrokerConfig, ui: Arc<dyn UiLauncher>) -> Self {
        Self { config, ui }
    }
}

// ============================================================================
// BrokerHandle
// ============================================================================

/// Running broker.
pub struct BrokerHandle {
    port: u16,
    ws_url: String,
    router: Arc<ConnectionRouter>,
    /// Injects host-originated events (install, launch).
    events: mpsc::UnboundedSender<PlatformEvent>,
    accept_task: JoinHandle<()>,
    router_task: JoinHandle<Result<()>>,
}

impl fmt::Debug for BrokerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerHandle")
            .field("port", &self.port)
            .field("ws_url", &self.ws_url)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

impl BrokerHandle {
    /// Port clients connect to.
    #[inline]
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Base WebSocket URL clients connect to.
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// The running router.
    #[inline]
    #[must_use]
    pub fn router(&self) -> &Arc<ConnectionRouter> {
        &self.router
    }

    /// Queues a platform event, typically `Installed` or `Launched`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the router has stopped.
    pub fn dispatch(&self, event: PlatformEvent) -> Result<()> {
        self.events.send(event).map_err(|_| Error::ConnectionClosed)
    }

    /// Waits until the router stops.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackendDisposed`] when the backend is lost in
    /// release mode.
    pub async fn wait(self) -> Result<()> {
        let Self {
            accept_task,
            router_task,
            ..
        } = self;

        let result = match router_task.await {
            Ok(result) => result,
            Err(e) => Err(Error::connection(format!("router task failed: {e}"))),
        };
        accept_task.abort();
        result
    }

    /// Stops accepting connections and routing events.
    pub async fn shutdown(self) {
        info!(port = self.port, "Connector broker shutting down");

        self.accept_task.abort();
        self.router_task.abort();
        let _ = self.router_task.await;

        debug!("Connector broker stopped");
    }
}
