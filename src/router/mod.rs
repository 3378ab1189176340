//! Connection routing and client handlers.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ConnectionRouter`] | Turns platform events into pooled channels and handlers |
//! | [`ClientHandler`] | Self-terminating bridge between one client and the backend |
//! | [`PlatformEvent`] | Connection, message, install and launch events |
//! | [`UiData`] | Subscription functions handed to the UI window |

// ============================================================================
// Submodules
// ============================================================================

/// Router state machine.
pub mod core;

/// Platform events and delivery outcomes.
pub mod events;

/// Client-to-backend bridge.
pub mod handler;

/// UI window boundary.
pub mod ui;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::{ConnectionRouter, RouterOptions};
pub use events::{DeliveryOutcome, MAX_DELIVERY_ATTEMPTS, PlatformEvent, PortSocket, PortStream};
pub use handler::ClientHandler;
pub use ui::{HeadlessLauncher, UiData, UiLauncher};
