//! Live channel frame types
//!
//! Every frame is a named event with a JSON payload, encoded either as a JSON
//! text frame or a CBOR binary frame.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::WireFormat;
use crate::error::TransportError;

/// Client → server: subscribe to a room
pub const JOIN_ROOM: &str = "join-room";
/// Client → server: unsubscribe from a room
pub const LEAVE_ROOM: &str = "leave-room";

/// A named event travelling over the live channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    /// Create a room join request
    pub fn join_room(room_id: &str) -> Self {
        Self::new(JOIN_ROOM, json!({ "roomId": room_id }))
    }

    /// Create a room leave request
    pub fn leave_room(room_id: &str) -> Self {
        Self::new(LEAVE_ROOM, json!({ "roomId": room_id }))
    }

    /// Room id carried by a join/leave request
    pub fn room_id(&self) -> Option<&str> {
        self.payload.get("roomId").and_then(Value::as_str)
    }

    /// Encode as JSON text
    pub fn to_json(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::Codec(e.to_string()))
    }

    /// Encode as CBOR bytes
    pub fn to_cbor(&self) -> Result<Vec<u8>, TransportError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| TransportError::Codec(e.to_string()))?;
        Ok(bytes)
    }

    /// Decode from JSON text
    pub fn from_json(text: &str) -> Result<Self, TransportError> {
        serde_json::from_str(text).map_err(|e| TransportError::Codec(e.to_string()))
    }

    /// Decode from CBOR bytes
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, TransportError> {
        ciborium::from_reader(bytes).map_err(|e| TransportError::Codec(e.to_string()))
    }
}

/// An encoded frame ready for the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn encode(envelope: &Envelope, format: WireFormat) -> Result<Self, TransportError> {
        match format {
            WireFormat::Json => envelope.to_json().map(Frame::Text),
            WireFormat::Cbor => envelope.to_cbor().map(Frame::Binary),
        }
    }

    /// Decode either frame kind, regardless of the configured outbound format
    pub fn decode(&self) -> Result<Envelope, TransportError> {
        match self {
            Frame::Text(text) => Envelope::from_json(text),
            Frame::Binary(bytes) => Envelope::from_cbor(bytes),
        }
    }
}
