//! Transport seam between the session actor and the network.
//!
//! [`Connector`] opens one [`Transport`] per connection attempt. The session
//! owns reconnection; a transport only moves opaque frames until it fails or
//! closes.
//!
//! [`WebSocketConnector`] is the production implementation. Tests and
//! embedders use [`LoopbackRelay`](crate::LoopbackRelay).

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use gridmesh_types::RoomId;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

use crate::constants::{CONNECT_TIMEOUT, WS_SUBPROTOCOL};

/// Transport-level failures. All of them are retried by the session.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("connect timed out")]
    Timeout,
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("transport closed")]
    Closed,
}

/// A connected, bidirectional frame pipe.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Next inbound frame. `Ok(None)` means the other end closed cleanly.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    async fn close(&mut self);
}

/// Opens transports into a room.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `room`, authenticating with `token` when given.
    async fn connect(
        &self,
        room: &RoomId,
        token: Option<&str>,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

// ============================================================================
// WebSocket
// ============================================================================

/// Connects to `<server_url>/<room id>` over WebSocket.
#[derive(Clone, Debug)]
pub struct WebSocketConnector {
    server_url: Url,
}

impl WebSocketConnector {
    pub fn new(server_url: Url) -> Self {
        Self { server_url }
    }

    /// Endpoint for `room`: the room id appended as the last path segment.
    pub fn room_url(&self, room: &RoomId) -> Result<Url, TransportError> {
        let mut url = self.server_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::Endpoint(format!("{} cannot be a base", self.server_url)))?
            .pop_if_empty()
            .push(&room.to_hex());
        Ok(url)
    }
}

/// The `Sec-WebSocket-Protocol` value: the base protocol, then the bearer
/// token as an additional offered value.
pub fn subprotocol_header(token: Option<&str>) -> String {
    match token {
        Some(token) => format!("{WS_SUBPROTOCOL}, {token}"),
        None => WS_SUBPROTOCOL.to_string(),
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        room: &RoomId,
        token: Option<&str>,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let url = self.room_url(room)?;
        debug!("Connecting to {}", url);

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Endpoint(e.to_string()))?;
        let protocols = HeaderValue::from_str(&subprotocol_header(token))
            .map_err(|e| TransportError::Endpoint(format!("token is not a valid header value: {e}")))?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, protocols);

        let (stream, _response) =
            tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| TransportError::Timeout)?
                .map_err(|e| TransportError::Connect(e.to_string()))?;

        Ok(Box::new(WebSocketTransport { stream }))
    }
}

struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.stream
            .send(Message::Binary(frame))
            .await
            .map_err(|e| TransportError::ConnectionLost(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            match self.stream.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(TransportError::ConnectionLost(e.to_string())),
                Some(Ok(Message::Binary(bytes))) => return Ok(Some(bytes)),
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(other)) => {
                    // ping/pong are answered by tungstenite; text is not ours
                    trace!("ignoring non-binary message ({} bytes)", other.len());
                }
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
