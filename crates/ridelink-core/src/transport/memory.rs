//! In-process loopback transport
//!
//! Plays the server side of a live channel from the same process: refuse or
//! accept opens, push server events, drop the connection, and inspect what
//! the client sent.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use super::{Channel, ChannelPeer, CloseReason, Envelope, Transport};
use crate::error::TransportError;

const MEMORY_URL: &str = "memory://loopback";

#[derive(Debug, Default)]
struct State {
    refuse_all: bool,
    failures_remaining: u32,
    opens: usize,
    tokens: Vec<String>,
    current: Option<ChannelPeer>,
    sent: Vec<Envelope>,
}

impl State {
    fn drain_sent(&mut self) {
        if let Some(peer) = self.current.as_mut() {
            while let Ok(envelope) = peer.outbound.try_recv() {
                self.sent.push(envelope);
            }
        }
    }
}

/// Loopback transport; clones share the same server side
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<State>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every open attempt until called again with `false`
    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_all = refuse;
    }

    /// Refuse the next `count` open attempts
    pub fn fail_next(&self, count: u32) {
        self.lock().failures_remaining = count;
    }

    /// Number of open attempts seen, successful or not
    pub fn open_count(&self) -> usize {
        self.lock().opens
    }

    /// Tokens presented by each open attempt
    pub fn tokens(&self) -> Vec<String> {
        self.lock().tokens.clone()
    }

    /// Whether a channel is currently open on the client side
    pub fn is_open(&self) -> bool {
        self.lock()
            .current
            .as_ref()
            .is_some_and(|peer| !peer.inbound.is_closed())
    }

    /// Push a server event to the open channel
    pub fn push(&self, event: &str, payload: Value) -> bool {
        self.lock()
            .current
            .as_ref()
            .is_some_and(|peer| peer.deliver(Envelope::new(event, payload)))
    }

    /// Close the open channel as if the network dropped it
    pub fn drop_connection(&self) {
        let mut state = self.lock();
        state.drain_sent();
        if let Some(peer) = state.current.take() {
            peer.closed(CloseReason::Error(TransportError::Closed(
                "connection reset".to_string(),
            )));
        }
    }

    /// Every envelope the client sent, across all channels, in order
    pub fn sent(&self) -> Vec<Envelope> {
        let mut state = self.lock();
        state.drain_sent();
        state.sent.clone()
    }

    /// Sent envelopes with the given event name
    pub fn sent_events(&self, event: &str) -> Vec<Envelope> {
        self.sent().into_iter().filter(|e| e.event == event).collect()
    }

    pub fn clear_sent(&self) {
        let mut state = self.lock();
        state.drain_sent();
        state.sent.clear();
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, token: &str) -> Result<Channel, TransportError> {
        let mut state = self.lock();
        state.opens += 1;
        state.tokens.push(token.to_string());

        if state.refuse_all || state.failures_remaining > 0 {
            state.failures_remaining = state.failures_remaining.saturating_sub(1);
            return Err(TransportError::Connect {
                url: MEMORY_URL.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        state.drain_sent();
        let (channel, peer) = Channel::pair();
        state.current = Some(peer);
        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Inbound;
    use serde_json::json;

    #[tokio::test]
    async fn test_fail_next_then_accept() {
        let transport = MemoryTransport::new();
        transport.fail_next(2);

        assert!(transport.open("t").await.is_err());
        assert!(transport.open("t").await.is_err());
        let channel = transport.open("t").await.unwrap();

        assert_eq!(transport.open_count(), 3);
        assert!(transport.is_open());
        drop(channel);
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_push_and_sent() {
        let transport = MemoryTransport::new();
        let mut channel = transport.open("secret").await.unwrap();

        channel.send(Envelope::join_room("r1")).unwrap();
        assert!(transport.push("ride-status", json!({"status": "arriving"})));

        assert_eq!(transport.sent(), vec![Envelope::join_room("r1")]);
        assert_eq!(transport.tokens(), vec!["secret".to_string()]);
        assert!(matches!(channel.recv().await, Some(Inbound::Event(e)) if e.event == "ride-status"));
    }

    #[tokio::test]
    async fn test_drop_connection_reports_error() {
        let transport = MemoryTransport::new();
        let mut channel = transport.open("t").await.unwrap();
        channel.send(Envelope::join_room("r1")).unwrap();

        transport.drop_connection();
        assert!(matches!(
            channel.recv().await,
            Some(Inbound::Closed(CloseReason::Error(_)))
        ));
        assert_eq!(channel.recv().await, None);
        // Sent history survives the drop
        assert_eq!(transport.sent_events("join-room").len(), 1);
        assert!(!transport.push("late", json!(null)));
    }
}
