//! Broker entry point.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Broker`] | Configured broker, started with `start()` or `run()` |
//! | [`BrokerBuilder`] | Fluent configuration builder |
//! | [`BrokerConfig`] | Validated configuration |
//! | [`BrokerHandle`] | Running broker |
//! | [`BuildMode`] | Release or debug handling of backend loss |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for broker configuration.
pub mod builder;

/// Core broker implementation.
pub mod core;

/// Broker configuration.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::BrokerBuilder;
pub use self::core::{Broker, BrokerHandle};
pub use options::{BrokerConfig, BuildMode};
