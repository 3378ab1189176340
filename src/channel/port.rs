//! Persistent WebSocket-backed channel.
//!
//! Wraps one bidirectional WebSocket. The channel spawns an event loop task
//! that owns the socket:
//!
//! - Incoming text frames are parsed as JSON and dispatched to the handler
//! - Outgoing messages are queued on an unbounded channel, preserving order
//! - Close (either end), stream errors and explicit `dispose()` all end the
//!   loop and dispose the channel

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, from_str, to_string};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::ClientId;

use super::core::ChannelCore;
use super::{ChannelKind, MessageChannel};

// ============================================================================
// PortCommand
// ============================================================================

/// Internal commands for the event loop.
enum PortCommand {
    /// Write a message to the socket.
    Send(Value),
    /// Close the socket.
    Shutdown,
}

// ============================================================================
// PortChannel
// ============================================================================

/// Channel over a persistent WebSocket.
///
/// # Thread Safety
///
/// `PortChannel` is `Send + Sync`; concurrent `send` calls are serialized by
/// the command queue.
#[derive(Debug)]
pub struct PortChannel {
    /// Shared with the event loop.
    core: Arc<ChannelCore>,
    /// Commands for the event loop.
    command_tx: mpsc::UnboundedSender<PortCommand>,
    /// Identity of the connecting party.
    client_id: Option<ClientId>,
}

impl PortChannel {
    /// Wraps an established WebSocket.
    ///
    /// Spawns the event loop task internally, so this must be called from
    /// within a tokio runtime.
    pub fn new<S>(ws_stream: WebSocketStream<S>, client_id: Option<ClientId>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let core = Arc::new(ChannelCore::new());

        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            Arc::clone(&core),
        ));

        Self {
            core,
            command_tx,
            client_id,
        }
    }

    /// Connects to a WebSocket endpoint, typically the backend server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WebSocket`] if the handshake fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _response): (WebSocketStream<MaybeTlsStream<TcpStream>>, _) =
            tokio_tungstenite::connect_async(url).await?;

        debug!(url, "Port channel connected");

        Ok(Self::new(ws_stream, None))
    }

    /// Event loop that owns the socket.
    async fn run_event_loop<S>(
        ws_stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<PortCommand>,
        core: Arc<ChannelCore>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            match from_str::<Value>(&text) {
                                Ok(value) => core.dispatch(value),
                                Err(e) => warn!(error = %e, "Dropping non-JSON frame"),
                            }
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!("Port closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            debug!(error = %e, "Port stream error");
                            break;
                        }

                        None => {
                            debug!("Port stream ended");
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(PortCommand::Send(value)) => {
                            let json = match to_string(&value) {
                                Ok(json) => json,
                                Err(e) => {
                                    warn!(error = %e, "Failed to serialize outgoing message");
                                    continue;
                                }
                            };

                            if let Err(e) = ws_write.send(Message::Text(json.into())).await {
                                debug!(error = %e, "Failed to write to port");
                                break;
                            }
                            trace!("Message written to port");
                        }

                        Some(PortCommand::Shutdown) | None => {
                            let _ = ws_write.close().await;
                            break;
                        }
                    }
                }
            }
        }

        core.dispose();

        debug!("Port event loop terminated");
    }
}

impl MessageChannel for PortChannel {
    fn core(&self) -> &ChannelCore {
        &self.core
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Port
    }

    fn client_id(&self) -> Option<&ClientId> {
        self.client_id.as_ref()
    }

    fn send(&self, message: Value) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::ChannelDisposed);
        }
        self.command_tx
            .send(PortCommand::Send(message))
            .map_err(|_| Error::ConnectionClosed)
    }

    fn dispose(&self) {
        if self.core.dispose() {
            let _ = self.command_tx.send(PortCommand::Shutdown);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
