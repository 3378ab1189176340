//! One-shot message-based channel.
//!
//! Represents a logical session with one client identity that has no
//! persistent transport. Inbound messages are injected with
//! [`SingleMessageChannel::deliver_message`]; outbound messages go through a
//! [`ReplySink`] addressed by client identity.
//!
//! # Lifetime
//!
//! The channel disposes itself when:
//!
//! - no inbound message arrives for [`KeepAlive::idle_timeout`];
//! - a pong reveals that the client reloaded (different `channel_id`);
//! - `dispose()` is called by the broker.
//!
//! A ping is sent every [`KeepAlive::ping_interval`], starting at creation.

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until};
use tracing::{debug, info, trace};

use crate::error::{Error, Result};
use crate::identifiers::ClientId;
use crate::protocol::ControlMessage;

use super::core::ChannelCore;
use super::{ChannelKind, MessageChannel};

// ============================================================================
// Constants
// ============================================================================

/// Default inactivity period after which the channel disposes itself.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default period between keep-alive pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(10);

// ============================================================================
// ReplySink
// ============================================================================

/// Outbound path for messages to clients without a persistent transport.
pub trait ReplySink: Send + Sync {
    /// Sends `message` to the client identified by `client_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the client currently cannot be reached.
    fn send_to(&self, client_id: &ClientId, message: Value) -> Result<()>;
}

// ============================================================================
// KeepAlive
// ============================================================================

/// Keep-alive timing for one-shot channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    /// Inactivity period after which the channel disposes itself.
    pub idle_timeout: Duration,
    /// Period between pings.
    pub ping_interval: Duration,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
        }
    }
}

// ============================================================================
// SingleMessageChannel
// ============================================================================

/// Channel backed by discrete external message deliveries.
pub struct SingleMessageChannel {
    core: Arc<ChannelCore>,
    client_id: ClientId,
    sink: Arc<dyn ReplySink>,
    /// Client instance id from the first pong.
    peer_channel_id: Mutex<Option<u64>>,
    /// Time of the last inbound message.
    last_activity: Arc<Mutex<Instant>>,
}

impl std::fmt::Debug for SingleMessageChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleMessageChannel")
            .field("client_id", &self.client_id)
            .field("peer_channel_id", &*self.peer_channel_id.lock())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl SingleMessageChannel {
    /// Creates the channel and starts its keep-alive task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(client_id: ClientId, sink: Arc<dyn ReplySink>, keep_alive: KeepAlive) -> Self {
        let core = Arc::new(ChannelCore::new());
        let last_activity = Arc::new(Mutex::new(Instant::now()));

        let task = tokio::spawn(run_keep_alive(
            Arc::clone(&core),
            client_id.clone(),
            Arc::clone(&sink),
            Arc::clone(&last_activity),
            keep_alive,
        ));
        let abort = task.abort_handle();
        core.add_dispose_observer(Box::new(move || abort.abort()));

        debug!(client_id = %client_id, "Single-message channel created");

        Self {
            core,
            client_id,
            sink,
            peer_channel_id: Mutex::new(None),
            last_activity,
        }
    }

    /// Feeds one externally received message into the channel.
    ///
    /// Pongs are consumed here; a pong from a reloaded client disposes the
    /// channel before this returns. Everything else goes to the handler.
    pub fn deliver_message(&self, message: Value) {
        if self.is_disposed() {
            debug!(client_id = %self.client_id, "Message delivered to disposed channel ignored");
            return;
        }
        *self.last_activity.lock() = Instant::now();

        match ControlMessage::parse(&message) {
            Some(ControlMessage::Pong { channel_id }) => self.handle_pong(channel_id),
            Some(ControlMessage::Ping) => {
                trace!(client_id = %self.client_id, "Ignoring ping from client");
            }
            None => self.core.dispatch(message),
        }
    }

    fn handle_pong(&self, channel_id: u64) {
        let reloaded = {
            let mut peer = self.peer_channel_id.lock();
            match *peer {
                None => {
                    *peer = Some(channel_id);
                    false
                }
                Some(previous) => previous != channel_id,
            }
        };

        if reloaded {
            info!(
                client_id = %self.client_id,
                channel_id,
                "Client reload detected, disposing single-message channel"
            );
            self.dispose();
        }
    }
}

impl MessageChannel for SingleMessageChannel {
    fn core(&self) -> &ChannelCore {
        &self.core
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::SingleMessage
    }

    fn client_id(&self) -> Option<&ClientId> {
        Some(&self.client_id)
    }

    fn send(&self, message: Value) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::ChannelDisposed);
        }
        self.sink.send_to(&self.client_id, message)
    }

    fn dispose(&self) {
        if self.core.dispose() {
            debug!(client_id = %self.client_id, "Single-message channel disposed");
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Keep-alive Task
// ============================================================================

/// Pings the client and disposes the channel once it goes idle.
async fn run_keep_alive(
    core: Arc<ChannelCore>,
    client_id: ClientId,
    sink: Arc<dyn ReplySink>,
    last_activity: Arc<Mutex<Instant>>,
    keep_alive: KeepAlive,
) {
    let mut ping = interval(keep_alive.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let deadline = *last_activity.lock() + keep_alive.idle_timeout;

        tokio::select! {
            _ = ping.tick() => {
                if core.is_disposed() {
                    break;
                }
                if let Err(e) = sink.send_to(&client_id, ControlMessage::Ping.to_value()) {
                    trace!(client_id = %client_id, error = %e, "Ping not sent");
                }
            }

            () = sleep_until(deadline) => {
                // Activity may have moved the deadline while sleeping.
                if Instant::now() >= *last_activity.lock() + keep_alive.idle_timeout {
                    info!(client_id = %client_id, "Single-message channel idle, disposing");
                    core.dispose();
                    break;
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
