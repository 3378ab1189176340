//! Connector broker - multiplexes untrusted client channels onto one backend.
//!
//! Many independently-originated clients (browser extensions, the broker's
//! own app) talk to a single backend server process that exposes exactly one
//! raw bidirectional channel. The broker accepts client connections, bridges
//! each one to the backend through a self-terminating client handler, and
//! tracks which clients are connected.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  /port, /message   ┌──────────────────────────────┐   raw channel   ┌─────────┐
//! │  Clients     │◄──────────────────►│ PlatformListener             │                 │         │
//! │  ext1, ext2  │     WebSocket      │   → ConnectionRouter         │◄───────────────►│ Backend │
//! │  own app     │                    │     → ClientHandler (each)   │  BackendServer  │         │
//! └──────────────┘                    │     → ChannelPool            │                 └─────────┘
//!                                     │     → ReaderStatePublisher   │
//!                                     └──────────────────────────────┘
//! ```
//!
//! Key design principles:
//!
//! - Channels are the only cancellation primitive: disposal propagates
//!   synchronously to every observer
//! - Client handlers are owned by the disposal observers of the two channels
//!   they bridge; no container tracks them
//! - Nothing reaches the backend before its readiness handshake
//! - Only backend loss is fatal, and only in release mode
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use connector_broker::{Broker, PortChannel, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Reach the backend server process
//!     let backend = PortChannel::connect("ws://127.0.0.1:9000").await?;
//!
//!     // Accept clients until the backend goes away
//!     Broker::builder()
//!         .backend(Arc::new(backend))
//!         .own_client_id("khpfeaanjngmcnplbdlpegiifgpfgdco")
//!         .build()?
//!         .run()
//!         .await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`backend`] | Backend demultiplexer, readiness gate, reader tracker |
//! | [`broker`] | Configuration and top-level run loop |
//! | [`channel`] | [`MessageChannel`] and its port, one-shot and paired variants |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`listeners`] | Typed publish/subscribe registry |
//! | [`protocol`] | Backend envelopes and keep-alive messages |
//! | [`router`] | Connection router and client handlers |
//! | [`transport`] | WebSocket listener, channel pool, reply relay |

// ============================================================================
// Modules
// ============================================================================

/// Backend-facing side: demultiplexer, readiness and reader state.
pub mod backend;

/// Broker configuration and lifecycle.
///
/// Use [`Broker::builder()`] to create a configured broker instance.
pub mod broker;

/// Message channel abstraction and variants.
pub mod channel;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for broker entities.
pub mod identifiers;

/// Typed publish/subscribe registry.
pub mod listeners;

/// Wire message types.
pub mod protocol;

/// Connection router and client handlers.
pub mod router;

/// Client-facing transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Backend types
pub use backend::{
    BackendServer, ReaderInfo, ReaderSnapshot, ReaderStatePublisher, ReaderStatus, ReadinessGate,
};

// Broker types
pub use broker::{Broker, BrokerBuilder, BrokerConfig, BrokerHandle, BuildMode};

// Channel types
pub use channel::{
    ChannelKind, KeepAlive, MessageChannel, PairedChannel, PortChannel, ReplySink, SharedChannel,
    SingleMessageChannel, channel_pair,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ClientId, HandlerId, SubscriptionId};

// Router types
pub use router::{
    ClientHandler, ConnectionRouter, DeliveryOutcome, HeadlessLauncher, PlatformEvent, UiData,
    UiLauncher,
};

// Transport types
pub use transport::{ChannelPool, PlatformListener};
