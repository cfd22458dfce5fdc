//! Room membership bookkeeping
//!
//! The registry records which rooms the user intends to be in, independent
//! of whether the live channel is up. It never talks to the transport; the
//! connection driver asks it what changed and sends the matching events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A room the user joined at some point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSubscription {
    pub room_id: String,
    pub joined_at: DateTime<Utc>,
    /// User intent; unaffected by connectivity
    pub active: bool,
}

/// Ordered set of room subscriptions
#[derive(Debug, Default, Clone)]
pub struct RoomSubscriptionRegistry {
    /// Original join order
    rooms: Vec<RoomSubscription>,
    replays: u64,
}

impl RoomSubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `room_id` active
    ///
    /// Returns true if the room was not already active, meaning a join must
    /// be sent to the server. A room re-joined after a leave moves to the end
    /// of the join order.
    pub fn join(&mut self, room_id: &str, now: DateTime<Utc>) -> bool {
        if self.is_active(room_id) {
            return false;
        }

        self.rooms.retain(|r| r.room_id != room_id);
        self.rooms.push(RoomSubscription {
            room_id: room_id.to_string(),
            joined_at: now,
            active: true,
        });
        true
    }

    /// Mark `room_id` inactive
    ///
    /// Returns true if it was active. The intent is kept even while offline,
    /// so the room is excluded from every later replay.
    pub fn leave(&mut self, room_id: &str) -> bool {
        match self
            .rooms
            .iter_mut()
            .find(|r| r.room_id == room_id && r.active)
        {
            Some(room) => {
                room.active = false;
                true
            }
            None => false,
        }
    }

    /// Rooms to re-join after a successful (re)connect, in join order
    pub fn replay_all(&mut self) -> Vec<String> {
        self.replays += 1;
        self.active_rooms()
    }

    pub fn is_active(&self, room_id: &str) -> bool {
        self.rooms.iter().any(|r| r.room_id == room_id && r.active)
    }

    /// Active room ids in join order
    pub fn active_rooms(&self) -> Vec<String> {
        self.rooms
            .iter()
            .filter(|r| r.active)
            .map(|r| r.room_id.clone())
            .collect()
    }

    pub fn get(&self, room_id: &str) -> Option<&RoomSubscription> {
        self.rooms.iter().find(|r| r.room_id == room_id)
    }

    /// How many times `replay_all` has run
    pub fn replay_count(&self) -> u64 {
        self.replays
    }
}
