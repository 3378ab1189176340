//! Backend-facing side of the broker.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`BackendServer`] | Demultiplexer for the single raw backend channel |
//! | [`ReadinessGate`] | One-shot latch for the startup handshake |
//! | [`ReaderStatePublisher`] | Repeatable broadcast of reader snapshots |

// ============================================================================
// Submodules
// ============================================================================

/// Reader state publisher.
pub mod reader_tracker;

/// Backend readiness latch.
pub mod readiness;

/// Backend channel demultiplexer.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use reader_tracker::{ReaderInfo, ReaderSnapshot, ReaderStatePublisher, ReaderStatus};
pub use readiness::{ReadinessGate, ReadyCallback};
pub use server::BackendServer;
