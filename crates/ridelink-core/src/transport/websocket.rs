//! WebSocket transport
//!
//! Opens the live channel over WebSocket, authenticating with a bearer token
//! in the `Authorization` header. Each open channel is served by a pump task
//! that moves envelopes between the socket and the [`Channel`] queues until
//! either side closes.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{Channel, ChannelPeer, CloseReason, Frame, Transport};
use crate::config::WireFormat;
use crate::error::TransportError;

/// Default time allowed for the WebSocket handshake
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Live channel over WebSocket
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
    format: WireFormat,
    connect_timeout: Duration,
}

impl WebSocketTransport {
    /// Create a transport for `url` (ws:// or wss://)
    pub fn new(url: &str, format: WireFormat) -> Self {
        Self {
            url: url.to_string(),
            format,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn connect_error(&self, reason: impl ToString) -> TransportError {
        TransportError::Connect {
            url: self.url.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, token: &str) -> Result<Channel, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| self.connect_error(e))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| TransportError::Protocol("token is not a valid header value".into()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        debug!("Connecting to {}", self.url);
        let (ws_stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| TransportError::Timeout {
                url: self.url.clone(),
                secs: self.connect_timeout.as_secs(),
            })?
            .map_err(|e| self.connect_error(e))?;

        info!("Connected to {}", self.url);
        let (channel, peer) = Channel::pair();
        tokio::spawn(pump(ws_stream, peer, self.format));
        Ok(channel)
    }
}

/// Move frames between the socket and the channel until either side closes
async fn pump(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut peer: ChannelPeer,
    format: WireFormat,
) {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            outbound = peer.outbound.recv() => {
                match outbound {
                    Some(envelope) => {
                        let message = match Frame::encode(&envelope, format) {
                            Ok(Frame::Text(text)) => Message::Text(text),
                            Ok(Frame::Binary(bytes)) => Message::Binary(bytes),
                            Err(e) => {
                                warn!("Dropping unencodable {} event: {}", envelope.event, e);
                                continue;
                            }
                        };
                        if let Err(e) = write.send(message).await {
                            peer.closed(CloseReason::Error(TransportError::Closed(e.to_string())));
                            break;
                        }
                    }
                    None => {
                        // Client closed the channel intentionally
                        debug!("Closing WebSocket");
                        write.close().await.ok();
                        break;
                    }
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => deliver(&peer, Frame::Text(text)),
                    Some(Ok(Message::Binary(data))) => deliver(&peer, Frame::Binary(data)),
                    Some(Ok(Message::Close(_))) | None => {
                        peer.closed(CloseReason::Remote);
                        break;
                    }
                    Some(Err(e)) => {
                        peer.closed(CloseReason::Error(TransportError::Closed(e.to_string())));
                        break;
                    }
                    // Ping/pong are answered by tungstenite
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

fn deliver(peer: &ChannelPeer, frame: Frame) {
    match frame.decode() {
        Ok(envelope) => {
            if !peer.deliver(envelope) {
                debug!("Inbound event after channel closed");
            }
        }
        Err(e) => warn!("Dropping undecodable frame: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_new() {
        let transport = WebSocketTransport::new("ws://localhost:4000/live", WireFormat::Cbor)
            .with_connect_timeout(Duration::from_secs(3));
        assert_eq!(transport.url(), "ws://localhost:4000/live");
        assert_eq!(transport.connect_timeout, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_invalid_url_is_connect_error() {
        let transport = WebSocketTransport::new("not a url", WireFormat::Json);
        let err = transport.open("token").await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_token_with_newline_rejected() {
        let transport = WebSocketTransport::new("ws://localhost:1/live", WireFormat::Json);
        let err = transport.open("bad\ntoken").await.unwrap_err();
        assert!(matches!(err, TransportError::Protocol(_)));
    }
}
