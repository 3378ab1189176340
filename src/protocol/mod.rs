//! Wire message types.
//!
//! The broker is blind to the application protocol it relays. It only owns
//! the envelopes that address messages to client handlers on the shared
//! backend channel, and the keep-alive messages of one-shot channels.
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | [`BackendMessage`] | Backend → Broker | Readiness, replies, reader events, logs |
//! | [`ClientEnvelope`] | Broker → Backend | Handler sessions and client requests |
//! | [`ControlMessage`] | Broker ↔ One-shot client | Keep-alive and reload detection |

// ============================================================================
// Submodules
// ============================================================================

/// Backend envelopes.
pub mod backend;

/// One-shot channel control messages.
pub mod control;

// ============================================================================
// Re-exports
// ============================================================================

pub use backend::{BackendMessage, ClientEnvelope, LogLevel};
pub use control::ControlMessage;
