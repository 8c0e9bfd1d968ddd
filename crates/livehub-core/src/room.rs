//! Room types shared by the connection manager, the projection, and plugins.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Returns the current Unix time in milliseconds.
pub fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Connection status of a room session.
///
/// ```text
/// Idle ──connect──► Connecting ──ok──► Connected ──drop──► Reconnecting
///                       │                                   │    ▲
///                       └──fail──► Reconnecting ◄───────────┘    │
///                                        │  └──retry fails───────┘
///                                        └──exhausted──► Failed
/// any state but Idle ──disconnect──► Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    /// Session exists but was never connected.
    Idle,
    /// First connection attempt in flight.
    Connecting,
    /// Feed is live.
    Connected,
    /// Waiting for, or performing, a retry.
    Reconnecting,
    /// Torn down by an operator.
    Disconnected,
    /// Retry policy gave up. Needs an explicit `connect`.
    Failed,
}

impl RoomStatus {
    /// Returns true while an adapter operation may be in flight.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }

    /// Returns true if the session holds no adapter in this state.
    pub fn is_at_rest(&self) -> bool {
        matches!(self, Self::Idle | Self::Disconnected | Self::Failed)
    }

    /// Returns the wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public fields of a room session, copied out of the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    /// Room identifier.
    pub room_id: String,
    /// Current status.
    pub status: RoomStatus,
    /// Events observed since the connection was established from scratch.
    pub event_count: u64,
    /// Unix ms of the last successful connection.
    pub connected_at: Option<u64>,
    /// Unix ms of the last observed event.
    pub last_event_at: Option<u64>,
    /// Consecutive reconnect attempts since the last success.
    pub reconnect_attempts: u32,
    /// Operator-assigned priority.
    pub priority: i64,
    /// Operator-assigned label.
    pub label: String,
    /// Latest viewer metric reported by the feed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewers: Option<u64>,
    /// Code of the last adapter failure since the last success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl RoomInfo {
    /// Creates the record for a fresh, never-connected session.
    pub fn idle(room_id: impl Into<String>) -> Self {
        let room_id = room_id.into();
        Self {
            label: room_id.clone(),
            room_id,
            status: RoomStatus::Idle,
            event_count: 0,
            connected_at: None,
            last_event_at: None,
            reconnect_attempts: 0,
            priority: 0,
            viewers: None,
            last_error: None,
        }
    }
}

/// A single event observed on a room feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomEvent {
    /// Feed-defined event kind (e.g. "chat", "gift", "viewers").
    pub kind: String,
    /// Raw event body.
    #[serde(default)]
    pub payload: Value,
    /// Viewer metric carried by the event, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewers: Option<u64>,
}

impl RoomEvent {
    /// Creates an event with the given kind and payload.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            viewers: None,
        }
    }

    /// Attaches a viewer metric.
    pub fn with_viewers(mut self, viewers: u64) -> Self {
        self.viewers = Some(viewers);
        self
    }
}

/// Notification emitted by the room manager whenever session state changes.
#[derive(Debug, Clone)]
pub enum RoomChange {
    /// Status or counters changed.
    Status {
        /// The room.
        room_id: String,
        /// New status.
        status: RoomStatus,
    },
    /// Priority or label changed.
    Metadata {
        /// The room.
        room_id: String,
    },
    /// An event was observed while connected.
    Event {
        /// The room.
        room_id: String,
        /// The event.
        event: RoomEvent,
    },
    /// The session was removed from the manager.
    Removed {
        /// The room.
        room_id: String,
    },
}

impl RoomChange {
    /// Returns the room this change concerns.
    pub fn room_id(&self) -> &str {
        match self {
            Self::Status { room_id, .. }
            | Self::Metadata { room_id }
            | Self::Event { room_id, .. }
            | Self::Removed { room_id } => room_id,
        }
    }
}
