//! Error types for the realtime layer
//!
//! None of these are fatal. Transport errors drive reconnection, delivery
//! errors drive retries, handler errors are isolated to the handler.
//! Storage errors live in [`crate::storage::StorageError`].

use thiserror::Error;

/// Failures of the live event channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The channel could not be opened
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    /// The open handshake did not finish in time
    #[error("Timed out connecting to {url} after {secs}s")]
    Timeout { url: String, secs: u64 },

    /// The channel closed underneath us
    #[error("Channel closed: {0}")]
    Closed(String),

    /// An emit was attempted while no channel is open
    #[error("Not connected")]
    NotConnected,

    /// A frame could not be encoded or decoded
    #[error("Frame codec error: {0}")]
    Codec(String),

    /// The peer violated the framing protocol
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Failures delivering a queued action to the server
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The server answered with a non-success status
    #[error("Server rejected {method} {endpoint} with status {status}")]
    Rejected {
        method: String,
        endpoint: String,
        status: u16,
    },

    /// The bearer token was refused
    #[error("Unauthorized request to {endpoint}")]
    Unauthorized { endpoint: String },

    /// The request never reached the server
    #[error("Network error: {0}")]
    Network(String),

    /// The server did not answer in time
    #[error("Request to {endpoint} timed out")]
    Timeout { endpoint: String },

    /// No API base URL is configured
    #[error("No API URL configured for {endpoint}")]
    NotConfigured { endpoint: String },
}

impl DeliveryError {
    /// Whether the request might succeed unchanged once connectivity returns
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DeliveryError::Network(_) | DeliveryError::Timeout { .. }
        )
    }
}

/// Failure raised by an event handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Failures of connection manager commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// No access token is available; nothing was attempted
    #[error("No access token available")]
    MissingCredential,

    /// The connection driver task has stopped
    #[error("Connection manager stopped")]
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DeliveryError::Network("reset".into()).is_transient());
        assert!(DeliveryError::Timeout {
            endpoint: "/rides".into()
        }
        .is_transient());
        assert!(!DeliveryError::Rejected {
            method: "POST".into(),
            endpoint: "/rides".into(),
            status: 422,
        }
        .is_transient());
        assert!(!DeliveryError::Unauthorized {
            endpoint: "/rides".into()
        }
        .is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = DeliveryError::Rejected {
            method: "POST".into(),
            endpoint: "/rides/42/cancel".into(),
            status: 409,
        };
        let msg = err.to_string();
        assert!(msg.contains("/rides/42/cancel"));
        assert!(msg.contains("409"));
    }
}
