//! The shared read-only projection of room manager state.
//!
//! A [`RoomProjection`] is built by copying [`RoomInfo`] records out of the
//! manager. It owns all of its data, so it can be handed to plugins (as JSON)
//! without exposing anything the host can later mutate.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::room::{RoomInfo, RoomStatus, unix_ms_now};

/// Immutable snapshot of all room sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomProjection {
    /// Rooms ordered by priority (descending), then room id.
    pub rooms: Vec<RoomInfo>,
    /// Number of rooms whose status is `connected`.
    pub live_rooms_count: usize,
    /// Sum of reported viewer metrics; missing metrics count as zero.
    pub total_viewers: u64,
    /// Monotonic version assigned by the publisher.
    pub version: u64,
    /// Unix ms at which the snapshot was taken.
    pub generated_at: u64,
}

impl RoomProjection {
    /// Builds a projection from copied room records.
    pub fn from_rooms(mut rooms: Vec<RoomInfo>, version: u64) -> Self {
        rooms.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.room_id.cmp(&b.room_id))
        });
        let live_rooms_count = rooms
            .iter()
            .filter(|r| r.status == RoomStatus::Connected)
            .count();
        let total_viewers = rooms
            .iter()
            .map(|r| r.viewers.unwrap_or(0))
            .fold(0u64, u64::saturating_add);
        Self {
            rooms,
            live_rooms_count,
            total_viewers,
            version,
            generated_at: unix_ms_now(),
        }
    }

    /// Returns the record for `room_id`, if present.
    pub fn room(&self, room_id: &str) -> Option<&RoomInfo> {
        self.rooms.iter().find(|r| r.room_id == room_id)
    }

    /// Returns true if no rooms are tracked.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Serializes the projection into a detached JSON value.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
