//! Broker configuration.
//!
//! Built and validated by [`BrokerBuilder`](super::BrokerBuilder); immutable
//! once the broker starts.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::channel::{KeepAlive, SharedChannel};
use crate::identifiers::ClientId;

// ============================================================================
// Constants
// ============================================================================

/// Default listener address.
pub const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Default listener port; 0 picks a free port.
pub const DEFAULT_PORT: u16 = 0;

// ============================================================================
// BuildMode
// ============================================================================

/// How backend loss is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildMode {
    /// Backend loss is fatal; the broker exits so a supervisor restarts it.
    Release,
    /// Backend loss is logged and tolerated, leaving the process inspectable.
    Debug,
}

impl Default for BuildMode {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Debug
        } else {
            Self::Release
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Release => f.write_str("release"),
            Self::Debug => f.write_str("debug"),
        }
    }
}

// ============================================================================
// BrokerConfig
// ============================================================================

/// Validated broker configuration.
#[derive(Clone)]
pub struct BrokerConfig {
    /// Listener address.
    pub bind_ip: IpAddr,

    /// Listener port; 0 picks a free port.
    pub port: u16,

    /// Identity whose connections are treated as the broker's own app.
    pub own_client_id: Option<ClientId>,

    /// Backend loss handling.
    pub build_mode: BuildMode,

    /// Keep-alive timing of one-shot message-based channels.
    pub keep_alive: KeepAlive,

    /// Raw backend server channel.
    pub backend: SharedChannel,
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("bind_ip", &self.bind_ip)
            .field("port", &self.port)
            .field("own_client_id", &self.own_client_id)
            .field("build_mode", &self.build_mode)
            .field("keep_alive", &self.keep_alive)
            .field("backend_disposed", &self.backend.is_disposed())
            .finish()
    }
}

impl BrokerConfig {
    /// Inactivity period after which a one-shot channel disposes itself.
    #[inline]
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.keep_alive.idle_timeout
    }

    /// Period between keep-alive pings on one-shot channels.
    #[inline]
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        self.keep_alive.ping_interval
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_build_mode_follows_debug_assertions() {
        let expected = if cfg!(debug_assertions) {
            BuildMode::Debug
        } else {
            BuildMode::Release
        };
        assert_eq!(BuildMode::default(), expected);
    }

    #[test]
    fn test_build_mode_display() {
        assert_eq!(BuildMode::Release.to_string(), "release");
        assert_eq!(BuildMode::Debug.to_string(), "debug");
    }
}
