//! Builder pattern for broker configuration.
//!
//! Provides a fluent API for configuring and creating [`Broker`] instances.
//!
//! # Example
//!
//! ```no_run
//! use connector_broker::{Broker, PortChannel};
//!
//! # async fn example() -> connector_broker::Result<()> {
//! let backend = PortChannel::connect("ws://127.0.0.1:9000").await?;
//!
//! let broker = Broker::builder()
//!     .backend(std::sync::Arc::new(backend))
//!     .own_client_id("khpfeaanjngmcnplbdlpegiifgpfgdco")
//!     .build()?;
//! broker.run().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::channel::{KeepAlive, SharedChannel};
use crate::error::{Error, Result};
use crate::identifiers::ClientId;
use crate::router::{HeadlessLauncher, UiLauncher};

use super::core::Broker;
use super::options::{BrokerConfig, BuildMode, DEFAULT_BIND_IP, DEFAULT_PORT};

// ============================================================================
// BrokerBuilder
// ============================================================================

/// Builder for configuring a [`Broker`] instance.
///
/// Use [`Broker::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct BrokerBuilder {
    /// Raw backend server channel.
    backend: Option<SharedChannel>,
    /// Listener address.
    bind_ip: Option<IpAddr>,
    /// Listener port.
    port: Option<u16>,
    /// Identity of the broker's own app, unvalidated.
    own_client_id: Option<String>,
    /// Backend loss handling.
    build_mode: Option<BuildMode>,
    /// One-shot channel inactivity timeout.
    idle_timeout: Option<Duration>,
    /// One-shot channel ping period.
    ping_interval: Option<Duration>,
    /// UI window launcher.
    ui: Option<Arc<dyn UiLauncher>>,
}

impl fmt::Debug for BrokerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerBuilder")
            .field("backend", &self.backend)
            .field("bind_ip", &self.bind_ip)
            .field("port", &self.port)
            .field("own_client_id", &self.own_client_id)
            .field("build_mode", &self.build_mode)
            .field("idle_timeout", &self.idle_timeout)
            .field("ping_interval", &self.ping_interval)
            .field("ui", &self.ui.is_some())
            .finish()
    }
}

// ============================================================================
// BrokerBuilder Implementation
// ============================================================================

impl BrokerBuilder {
    /// Creates a new broker builder with no configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the raw backend server channel. Required.
    #[inline]
    #[must_use]
    pub fn backend(mut self, channel: SharedChannel) -> Self {
        self.backend = Some(channel);
        self
    }

    /// Sets the listener address (default `127.0.0.1`).
    #[inline]
    #[must_use]
    pub fn bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = Some(ip);
        self
    }

    /// Sets the listener port (default 0, a random free port).
    #[inline]
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the identity whose connections count as the broker's own app.
    ///
    /// # Arguments
    ///
    /// * `id` - Extension id as it appears in the `Origin` header host
    #[inline]
    #[must_use]
    pub fn own_client_id(mut self, id: impl Into<String>) -> Self {
        self.own_client_id = Some(id.into());
        self
    }

    /// Overrides how backend loss is handled.
    ///
    /// Defaults to [`BuildMode::Debug`] in debug builds and
    /// [`BuildMode::Release`] otherwise.
    #[inline]
    #[must_use]
    pub fn build_mode(mut self, mode: BuildMode) -> Self {
        self.build_mode = Some(mode);
        self
    }

    /// Sets the one-shot channel inactivity timeout (default 30s).
    #[inline]
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Sets the one-shot channel ping period (default 10s).
    #[inline]
    #[must_use]
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = Some(interval);
        self
    }

    /// Sets the UI window launcher (default: log only).
    #[inline]
    #[must_use]
    pub fn ui(mut self, launcher: Arc<dyn UiLauncher>) -> Self {
        self.ui = Some(launcher);
        self
    }

    /// Builds the broker with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no backend channel is set
    /// - [`Error::Config`] if the own client id is blank
    /// - [`Error::Config`] if the keep-alive timing is inconsistent
    pub fn build(self) -> Result<Broker> {
        let backend = self.validate_backend()?;
        let own_client_id = self.validate_own_client_id()?;
        let keep_alive = self.validate_keep_alive()?;

        let config = BrokerConfig {
            bind_ip: self.bind_ip.unwrap_or(DEFAULT_BIND_IP),
            port: self.port.unwrap_or(DEFAULT_PORT),
            own_client_id,
            build_mode: self.build_mode.unwrap_or_default(),
            keep_alive,
            backend,
        };
        let ui = self
            .ui
            .unwrap_or_else(|| Arc::new(HeadlessLauncher) as Arc<dyn UiLauncher>);

        Ok(Broker::new(config, ui))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl BrokerBuilder {
    /// Validates the backend channel.
    fn validate_backend(&self) -> Result<SharedChannel> {
        self.backend.clone().ok_or_else(|| {
            Error::config(
                "Backend channel is required. Use .backend() to set it.\n\
                 Example: Broker::builder().backend(Arc::new(PortChannel::connect(url).await?))",
            )
        })
    }

    /// Validates the own client id, if set.
    fn validate_own_client_id(&self) -> Result<Option<ClientId>> {
        match &self.own_client_id {
            None => Ok(None),
            Some(raw) => ClientId::new(raw.clone())
                .map(Some)
                .ok_or_else(|| Error::config("Own client id must not be blank")),
        }
    }

    /// Validates one-shot channel keep-alive timing.
    fn validate_keep_alive(&self) -> Result<KeepAlive> {
        let defaults = KeepAlive::default();
        let keep_alive = KeepAlive {
            idle_timeout: self.idle_timeout.unwrap_or(defaults.idle_timeout),
            ping_interval: self.ping_interval.unwrap_or(defaults.ping_interval),
        };

        if keep_alive.idle_timeout.is_zero() || keep_alive.ping_interval.is_zero() {
            return Err(Error::config(
                "Keep-alive idle timeout and ping interval must be non-zero",
            ));
        }
        if keep_alive.ping_interval >= keep_alive.idle_timeout {
            return Err(Error::config(format!(
                "Ping interval ({:?}) must be shorter than idle timeout ({:?})",
                keep_alive.ping_interval, keep_alive.idle_timeout
            )));
        }

        Ok(keep_alive)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::channel::channel_pair;

    fn backend() -> SharedChannel {
        let (_process, raw) = channel_pair();
        raw
    }

    #[test]
    fn test_new_creates_empty_builder() {
        let builder = BrokerBuilder::new();
        assert!(builder.backend.is_none());
        assert!(builder.own_client_id.is_none());
        assert!(builder.ui.is_none());
    }

    #[test]
    fn test_build_without_backend_fails() {
        let err = BrokerBuilder::new().build().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_build_applies_defaults() {
        let broker = BrokerBuilder::new().backend(backend()).build().unwrap();
        let config = broker.config();

        assert_eq!(config.bind_ip, DEFAULT_BIND_IP);
        assert_eq!(config.port, 0);
        assert!(config.own_client_id.is_none());
        assert_eq!(config.build_mode, BuildMode::default());
        assert_eq!(config.idle_timeout(), Duration::from_secs(30));
        assert_eq!(config.ping_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_build_applies_overrides() {
        let broker = BrokerBuilder::new()
            .backend(backend())
            .port(4242)
            .own_client_id("own-app")
            .build_mode(BuildMode::Release)
            .idle_timeout(Duration::from_secs(60))
            .ping_interval(Duration::from_secs(5))
            .build()
            .unwrap();
        let config = broker.config();

        assert_eq!(config.port, 4242);
        assert_eq!(config.own_client_id.as_ref().unwrap().as_str(), "own-app");
        assert_eq!(config.build_mode, BuildMode::Release);
        assert_eq!(config.idle_timeout(), Duration::from_secs(60));
        assert_eq!(config.ping_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_blank_own_client_id_rejected() {
        let err = BrokerBuilder::new()
            .backend(backend())
            .own_client_id("  ")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_ping_interval_must_be_shorter_than_idle_timeout() {
        let err = BrokerBuilder::new()
            .backend(backend())
            .idle_timeout(Duration::from_secs(5))
            .ping_interval(Duration::from_secs(5))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("shorter than idle timeout"));
    }

    #[test]
    fn test_zero_timing_rejected() {
        let err = BrokerBuilder::new()
            .backend(backend())
            .ping_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
