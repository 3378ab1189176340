//! Type-safe identifiers for broker entities.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.
//!
//! | Type | Origin | Purpose |
//! |------|--------|---------|
//! | [`ClientId`] | Remote (sender identity) | Keys the channel pool |
//! | [`HandlerId`] | Local (process counter) | Log correlation and backend addressing |
//! | [`SubscriptionId`] | Local (process counter) | Removing listeners and observers |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Counters
// ============================================================================

/// Next handler ID. Starts at 1, 0 is never issued.
static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Next subscription ID.
static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// ClientId
// ============================================================================

/// Opaque identity of an externally-originated client (e.g. an extension id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Creates a client ID, rejecting empty or whitespace-only values.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return None;
        }
        Some(Self(value))
    }

    /// Returns the identity as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// HandlerId
// ============================================================================

/// Process-lifetime unique, monotonically increasing client handler ID.
///
/// Zero is never allocated and is rejected on deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct HandlerId(u64);

impl HandlerId {
    /// Allocates the next handler ID.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps a raw ID received from the backend.
    ///
    /// Returns `None` for 0.
    #[inline]
    #[must_use]
    pub const fn from_u64(value: u64) -> Option<Self> {
        if value == 0 { None } else { Some(Self(value)) }
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for HandlerId {
    type Error = Error;

    fn try_from(value: u64) -> Result<Self> {
        Self::from_u64(value).ok_or_else(|| Error::protocol("handler id 0 is reserved"))
    }
}

impl From<HandlerId> for u64 {
    #[inline]
    fn from(id: HandlerId) -> Self {
        id.as_u64()
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// SubscriptionId
// ============================================================================

/// Handle returned when registering a listener or disposal observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Allocates the next subscription ID.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
