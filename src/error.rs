//! Error types for the connector broker.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use connector_broker::{Error, Result};
//!
//! fn forward(channel: &dyn MessageChannel, message: Value) -> Result<()> {
//!     channel.send(message)?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::MissingSenderIdentity`] |
//! | Lifecycle | [`Error::ChannelDisposed`], [`Error::BackendDisposed`] |
//! | Protocol | [`Error::Protocol`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when broker configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Transport closed while an operation was in flight.
    #[error("Connection closed")]
    ConnectionClosed,

    /// External connection or message carried no resolvable sender identity.
    #[error("Missing sender identity: {context}")]
    MissingSenderIdentity {
        /// What was being accepted when the identity was missing.
        context: String,
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// Message channel is disposed.
    ///
    /// Returned by `send` on a channel that has already been disposed.
    #[error("Message channel is disposed")]
    ChannelDisposed,

    /// Backend server channel is disposed.
    ///
    /// Fatal to the whole broker in release mode.
    #[error("Backend server is disposed: {message}")]
    BackendDisposed {
        /// Description of how the backend was lost.
        message: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed or unexpected protocol message.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a missing sender identity error.
    #[inline]
    pub fn missing_sender_identity(context: impl Into<String>) -> Self {
        Self::MissingSenderIdentity {
            context: context.into(),
        }
    }

    /// Creates a backend disposed error.
    #[inline]
    pub fn backend_disposed(message: impl Into<String>) -> Self {
        Self::BackendDisposed {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionClosed
                | Self::MissingSenderIdentity { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error ends the whole broker.
    ///
    /// Every other error is contained to a single client.
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::BackendDisposed { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================
