//! Platform listener.
//!
//! Accepts client WebSockets on one localhost port and turns them into
//! [`PlatformEvent`]s for the router.
//!
//! # Connection Flow
//!
//! 1. Bind to `localhost:0` (random port) or a configured address
//! 2. Client opens a WebSocket with an `Origin` header naming its identity
//! 3. The request path selects the connection type:
//!
//! | Path | Event |
//! |------|-------|
//! | `/port` | `Connect` for the own app, `ConnectExternal` otherwise |
//! | `/message` | One `MessageExternal` per text frame; replies flow back on the same socket |
//! | other | Rejected with `404 Not Found` |

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, from_str, to_string};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::channel::ReplySink;
use crate::error::{Error, Result};
use crate::identifiers::ClientId;
use crate::router::{PlatformEvent, PortSocket, PortStream};

use super::relay::MessageRelay;

// ============================================================================
// Constants
// ============================================================================

/// Path of persistent port connections.
pub const PORT_PATH: &str = "/port";

/// Path of one-shot message sockets.
pub const MESSAGE_PATH: &str = "/message";

// ============================================================================
// SocketRoute
// ============================================================================

/// Connection type selected by the request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketRoute {
    Port,
    Message,
}

// ============================================================================
// PlatformListener
// ============================================================================

/// WebSocket listener producing platform events.
///
/// # Example
///
/// ```ignore
/// let listener = PlatformListener::bind(ip, 0, own_client_id).await?;
/// let reply_sink = listener.reply_sink();
///
/// let (events_tx, events_rx) = mpsc::unbounded_channel();
/// let accept_task = listener.spawn(events_tx);
/// ```
#[derive(Debug)]
pub struct PlatformListener {
    listener: TcpListener,
    port: u16,
    /// Identity treated as the broker's own app.
    own_client_id: Option<ClientId>,
    relay: Arc<MessageRelay>,
}

impl PlatformListener {
    /// Binds the listener.
    ///
    /// Use port 0 to let the OS assign a random available port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(ip: IpAddr, port: u16, own_client_id: Option<ClientId>) -> Result<Self> {
        let addr = SocketAddr::new(ip, port);
        let listener = TcpListener::bind(addr).await?;
        let actual_port = listener.local_addr()?.port();

        debug!(port = actual_port, "Platform listener bound");

        Ok(Self {
            listener,
            port: actual_port,
            own_client_id,
            relay: Arc::new(MessageRelay::new()),
        })
    }

    /// Returns the port the listener is bound to.
    #[inline]
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the base WebSocket URL.
    ///
    /// Format: `ws://{ip}:{port}`
    #[must_use]
    pub fn ws_url(&self) -> String {
        match self.listener.local_addr() {
            Ok(addr) => format!("ws://{addr}"),
            Err(_) => format!("ws://127.0.0.1:{}", self.port),
        }
    }

    /// Reply path for one-shot message-based channels.
    #[must_use]
    pub fn reply_sink(&self) -> Arc<dyn ReplySink> {
        Arc::clone(&self.relay) as Arc<dyn ReplySink>
    }

    /// Starts the accept loop.
    ///
    /// The loop ends when `events` is closed or the task is aborted.
    pub fn spawn(self, events: mpsc::UnboundedSender<PlatformEvent>) -> JoinHandle<()> {
        info!(port = self.port, "Platform listener started");
        tokio::spawn(self.accept_loop(events))
    }
}

// ============================================================================
// PlatformListener - Accept Loop
// ============================================================================

impl PlatformListener {
    async fn accept_loop(self, events: mpsc::UnboundedSender<PlatformEvent>) {
        debug!("Accept loop started");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let own_client_id = self.own_client_id.clone();
                            let relay = Arc::clone(&self.relay);
                            let events = events.clone();
                            tokio::spawn(async move {
                                if let Err(e) =
                                    handle_connection(stream, addr, own_client_id, relay, events).await
                                {
                                    warn!(error = %e, ?addr, "Connection handling failed");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Accept failed");
                        }
                    }
                }

                () = events.closed() => {
                    debug!("Event receiver gone, accept loop shutting down");
                    break;
                }
            }
        }

        debug!("Accept loop terminated");
    }
}

/// Upgrades one TCP connection and emits the matching platform event(s).
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    own_client_id: Option<ClientId>,
    relay: Arc<MessageRelay>,
    events: mpsc::UnboundedSender<PlatformEvent>,
) -> Result<()> {
    debug!(?addr, "New TCP connection");

    let mut route = None;
    let mut origin = None;
    let callback = |request: &Request, response: Response| {
        route = match request.uri().path() {
            PORT_PATH => Some(SocketRoute::Port),
            MESSAGE_PATH => Some(SocketRoute::Message),
            _ => None,
        };
        if route.is_none() {
            let mut rejection = ErrorResponse::new(Some("unknown path".to_string()));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            return Err(rejection);
        }

        origin = request
            .headers()
            .get(ORIGIN)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        Ok(response)
    };

    let stream: Box<dyn PortStream> = Box::new(stream);
    let socket: PortSocket = tokio_tungstenite::accept_hdr_async(stream, callback)
        .await
        .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

    let sender = origin.as_deref().and_then(client_id_from_origin);
    debug!(?addr, route = ?route, sender = ?sender, "WebSocket connection established");

    match route {
        Some(SocketRoute::Port) => {
            let event = if sender.is_some() && sender == own_client_id {
                PlatformEvent::Connect { socket }
            } else {
                PlatformEvent::ConnectExternal { socket, sender }
            };
            events.send(event).map_err(|_| Error::ConnectionClosed)
        }
        Some(SocketRoute::Message) => serve_message_socket(socket, sender, &relay, &events).await,
        None => Err(Error::protocol("connection accepted without a route")),
    }
}

/// Forwards each inbound frame as an external message and writes replies
/// back until either side closes.
async fn serve_message_socket(
    socket: PortSocket,
    sender: Option<ClientId>,
    relay: &MessageRelay,
    events: &mpsc::UnboundedSender<PlatformEvent>,
) -> Result<()> {
    let (mut ws_write, mut ws_read) = socket.split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Value>();
    let token = sender
        .as_ref()
        .map(|client_id| relay.register(client_id.clone(), outbound_tx.clone()));

    loop {
        tokio::select! {
            frame = ws_read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match from_str::<Value>(&text) {
                        Ok(message) => {
                            let event = PlatformEvent::MessageExternal {
                                message,
                                sender: sender.clone(),
                            };
                            if events.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "Dropping non-JSON external message"),
                    },

                    Some(Ok(Message::Close(_))) | None => break,

                    Some(Err(e)) => {
                        debug!(error = %e, "Message socket stream error");
                        break;
                    }

                    // Ignore Binary, Ping, Pong
                    Some(Ok(_)) => {}
                }
            }

            Some(message) = outbound_rx.recv() => {
                let json = match to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(error = %e, "Failed to serialize reply");
                        continue;
                    }
                };
                if let Err(e) = ws_write.send(Message::Text(json.into())).await {
                    debug!(error = %e, "Failed to write reply");
                    break;
                }
            }
        }
    }

    if let (Some(client_id), Some(token)) = (&sender, token) {
        relay.unregister(client_id, token);
    }
    let _ = ws_write.close().await;
    Ok(())
}

/// Derives the sender identity from an `Origin` header value.
///
/// `chrome-extension://abc` and `moz-extension://abc` yield `abc`; web
/// origins yield their host.
#[must_use]
pub fn client_id_from_origin(origin: &str) -> Option<ClientId> {
    let url = Url::parse(origin).ok()?;
    ClientId::new(url.host_str()?)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::Ipv4Addr;
    use std::time::Duration;

    use serde_json::json;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    async fn listener(own: Option<&str>) -> PlatformListener {
        PlatformListener::bind(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            0,
            own.and_then(ClientId::new),
        )
        .await
        .expect("bind should succeed")
    }

    async fn open(
        url: &str,
        origin: &str,
    ) -> tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>> {
        let mut request = url.into_client_request().unwrap();
        request
            .headers_mut()
            .insert(ORIGIN, origin.parse().unwrap());
        let (socket, _) = tokio_tungstenite::connect_async(request).await.unwrap();
        socket
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<PlatformEvent>) -> PlatformEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_client_id_from_origin() {
        assert_eq!(
            client_id_from_origin("chrome-extension://abcdef").unwrap().as_str(),
            "abcdef"
        );
        assert_eq!(
            client_id_from_origin("moz-extension://1234-5678").unwrap().as_str(),
            "1234-5678"
        );
        assert_eq!(
            client_id_from_origin("https://example.com:8443").unwrap().as_str(),
            "example.com"
        );
        assert!(client_id_from_origin("null").is_none());
        assert!(client_id_from_origin("").is_none());
    }

    #[tokio::test]
    async fn test_bind_random_port() {
        let listener = listener(None).await;
        assert!(listener.port() > 0);
        assert_eq!(
            listener.ws_url(),
            format!("ws://127.0.0.1:{}", listener.port())
        );
    }

    #[tokio::test]
    async fn test_port_connections_classified_by_origin() {
        let listener = listener(Some("own-app")).await;
        let url = format!("{}{PORT_PATH}", listener.ws_url());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _task = listener.spawn(tx);

        let _own = open(&url, "chrome-extension://own-app").await;
        assert!(matches!(next_event(&mut rx).await, PlatformEvent::Connect { .. }));

        let _other = open(&url, "chrome-extension://ext1").await;
        match next_event(&mut rx).await {
            PlatformEvent::ConnectExternal { sender, .. } => {
                assert_eq!(sender.unwrap().as_str(), "ext1");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_message_socket_emits_events_and_relays_replies() {
        let listener = listener(None).await;
        let url = format!("{}{MESSAGE_PATH}", listener.ws_url());
        let sink = listener.reply_sink();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _task = listener.spawn(tx);

        let mut client = open(&url, "chrome-extension://ext1").await;
        client
            .send(Message::Text(json!({"n": 1}).to_string().into()))
            .await
            .unwrap();

        match next_event(&mut rx).await {
            PlatformEvent::MessageExternal { message, sender } => {
                assert_eq!(message, json!({"n": 1}));
                assert_eq!(sender.unwrap().as_str(), "ext1");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        sink.send_to(&ClientId::new("ext1").unwrap(), json!({"reply": 1}))
            .unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(frame, Message::Text(json!({"reply": 1}).to_string().into()));
    }

    #[tokio::test]
    async fn test_unknown_path_rejected() {
        let listener = listener(None).await;
        let url = format!("{}/elsewhere", listener.ws_url());
        let (tx, _rx) = mpsc::unbounded_channel();
        let _task = listener.spawn(tx);

        let result = tokio_tungstenite::connect_async(url).await;
        assert!(result.is_err());
    }
}
