//! Client-facing transport layer.
//!
//! Accepts client connections, keeps the pool of live client channels and
//! carries replies back to clients without a persistent port.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Clients        │         WebSocket            │  Broker         │
//! │                 │  /port    (persistent)       │                 │
//! │  extension A    │◄────────────────────────────►│ PlatformListener│
//! │  extension B    │  /message (one-shot)         │  → router       │
//! │                 │      localhost:PORT          │  → ChannelPool  │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `pool` | Live channels by client identity |
//! | `relay` | Reply path of one-shot message sockets |
//! | `server` | WebSocket listener producing platform events |

// ============================================================================
// Submodules
// ============================================================================

/// Channel pool keyed by client identity.
pub mod pool;

/// Reply relay for one-shot message sockets.
pub mod relay;

/// WebSocket listener.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use pool::ChannelPool;
pub use relay::MessageRelay;
pub use server::{MESSAGE_PATH, PORT_PATH, PlatformListener, client_id_from_origin};
