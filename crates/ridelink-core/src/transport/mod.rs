//! Live event channel transports
//!
//! A [`Transport`] opens a [`Channel`]: a pair of queues carrying outbound
//! envelopes and inbound events. The transport side of an open channel is a
//! [`ChannelPeer`], owned by whatever pumps bytes (a WebSocket task, or the
//! in-memory loopback used by tests).
//!
//! Transports never reconnect on their own; the connection manager decides
//! when to open a new channel.
//!
//! ## Usage
//!
//! ```ignore
//! let transport = WebSocketTransport::new("wss://live.example.com/ws", WireFormat::Json);
//! let mut channel = transport.open(&token).await?;
//! channel.send(Envelope::join_room("ride:42"))?;
//! while let Some(Inbound::Event(env)) = channel.recv().await { ... }
//! ```

pub mod memory;
pub mod message;
pub mod websocket;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;

pub use memory::MemoryTransport;
pub use message::{Envelope, Frame, JOIN_ROOM, LEAVE_ROOM};
pub use websocket::WebSocketTransport;

/// Something arriving from the server side of a channel
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A server event
    Event(Envelope),
    /// The channel closed; nothing follows
    Closed(CloseReason),
}

/// Why a channel closed without being asked to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The server closed the connection
    Remote,
    /// The connection failed
    Error(TransportError),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Remote => write!(f, "closed by server"),
            CloseReason::Error(e) => write!(f, "{}", e),
        }
    }
}

/// Opens live channels
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a channel authenticated with `token`
    ///
    /// Returning `Ok` is the open confirmation.
    async fn open(&self, token: &str) -> Result<Channel, TransportError>;
}

/// Client side of an open live channel
///
/// Dropping the channel (or calling [`close`](Self::close)) closes it.
#[derive(Debug)]
pub struct Channel {
    outbound: mpsc::UnboundedSender<Envelope>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

/// Transport side of an open live channel
#[derive(Debug)]
pub struct ChannelPeer {
    pub outbound: mpsc::UnboundedReceiver<Envelope>,
    pub inbound: mpsc::UnboundedSender<Inbound>,
}

impl Channel {
    /// Create a connected channel and its transport side
    pub fn pair() -> (Channel, ChannelPeer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            Channel {
                outbound: outbound_tx,
                inbound: inbound_rx,
            },
            ChannelPeer {
                outbound: outbound_rx,
                inbound: inbound_tx,
            },
        )
    }

    /// Queue an envelope for sending
    pub fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.outbound
            .send(envelope)
            .map_err(|_| TransportError::Closed("transport task gone".to_string()))
    }

    /// Next inbound item; `None` means the transport side went away
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.inbound.recv().await
    }

    /// Close intentionally
    pub fn close(self) {
        drop(self);
    }
}

impl ChannelPeer {
    /// Deliver a server event to the client side
    pub fn deliver(&self, envelope: Envelope) -> bool {
        self.inbound.send(Inbound::Event(envelope)).is_ok()
    }

    /// Report an unexpected closure to the client side
    pub fn closed(&self, reason: CloseReason) {
        let _ = self.inbound.send(Inbound::Closed(reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_channel_pair_carries_both_directions() {
        let (mut channel, mut peer) = Channel::pair();

        channel.send(Envelope::join_room("r1")).unwrap();
        assert_eq!(peer.outbound.recv().await, Some(Envelope::join_room("r1")));

        assert!(peer.deliver(Envelope::new("ride-status", json!("arrived"))));
        peer.closed(CloseReason::Remote);

        assert_eq!(
            channel.recv().await,
            Some(Inbound::Event(Envelope::new("ride-status", json!("arrived"))))
        );
        assert_eq!(channel.recv().await, Some(Inbound::Closed(CloseReason::Remote)));
    }

    #[tokio::test]
    async fn test_dropped_peer_fails_sends() {
        let (mut channel, peer) = Channel::pair();
        drop(peer);

        assert!(matches!(
            channel.send(Envelope::join_room("r1")),
            Err(TransportError::Closed(_))
        ));
        assert_eq!(channel.recv().await, None);
    }

    #[tokio::test]
    async fn test_closed_channel_ends_peer_outbound() {
        let (channel, mut peer) = Channel::pair();
        channel.close();
        assert_eq!(peer.outbound.recv().await, None);
        assert!(!peer.deliver(Envelope::new("late", json!(null))));
    }
}
