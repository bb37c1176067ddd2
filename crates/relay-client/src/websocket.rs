//! WebSocket transport
//!
//! Dials the backend with `tokio-tungstenite`. The channel tag and agent
//! identifier are announced as handshake headers on every new connection.

use crate::error::RelayError;
use crate::models::Handshake;
use crate::transport::{Connection, Transport};
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Header carrying the agent identifier
pub const CLIENT_ID_HEADER: &str = "x-tunnel-id";
/// Header carrying the announced channel tag
pub const CHANNEL_HEADER: &str = "x-relay-channel";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport that opens one WebSocket per connection.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create a new WebSocket transport
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Live WebSocket connection.
///
/// Inbound frames are drained by a background task so control frames
/// (ping/close) are processed while the agent only writes.
pub struct WebSocketConnection {
    sink: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;

    async fn connect(
        &self,
        endpoint: &str,
        handshake: &Handshake,
    ) -> Result<WebSocketConnection, RelayError> {
        let mut request = endpoint
            .into_client_request()
            .map_err(|e| RelayError::InvalidEndpoint(format!("{endpoint}: {e}")))?;

        let headers = request.headers_mut();
        let channel = HeaderValue::from_str(&handshake.channel)
            .map_err(|e| RelayError::InvalidEndpoint(format!("channel tag: {e}")))?;
        headers.insert(CHANNEL_HEADER, channel);
        if let Some(client_id) = &handshake.client_id {
            let value = HeaderValue::from_str(client_id)
                .map_err(|e| RelayError::InvalidEndpoint(format!("client id: {e}")))?;
            headers.insert(CLIENT_ID_HEADER, value);
        }

        debug!("Dialing relay endpoint {}", endpoint);
        let (stream, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| RelayError::Connect(e.to_string()))?;
        debug!("Relay endpoint accepted upgrade: {}", response.status());

        let (sink, mut inbound) = stream.split();
        let reader = tokio::spawn(async move {
            while let Some(message) = inbound.next().await {
                match message {
                    Ok(Message::Close(frame)) => {
                        debug!("Relay backend closed connection: {:?}", frame);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!("Relay connection read error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(WebSocketConnection { sink, reader })
    }
}

#[async_trait::async_trait]
impl Connection for WebSocketConnection {
    async fn send_text(&mut self, frame: String) -> Result<(), RelayError> {
        self.sink
            .send(Message::text(frame))
            .await
            .map_err(|e| RelayError::Send(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            debug!("Error closing relay connection (ignored): {}", e);
        }
        self.reader.abort();
    }
}

impl std::fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnection")
            .field("reader_finished", &self.reader.is_finished())
            .finish_non_exhaustive()
    }
}

impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
