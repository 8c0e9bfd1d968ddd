//! Typed envelopes exchanged between the host and plugin instances.
//!
//! On the wire an envelope looks like:
//!
//! ```json
//! { "type": "window-event", "eventType": "data", "event": "room-state",
//!   "pluginId": "stats", "popupId": "…", "payload": { … } }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle event: a popup surface was attached.
pub const WINDOW_OPENED: &str = "window-opened";
/// Lifecycle event: a popup surface was detached.
pub const WINDOW_CLOSED: &str = "window-closed";
/// Lifecycle event: the plugin finished a cleanup + init cycle.
pub const PLUGIN_RELOADED: &str = "plugin-reloaded";
/// Data event: a fresh room projection.
pub const ROOM_STATE: &str = "room-state";
/// Data event: one observed room event.
pub const ROOM_EVENT: &str = "room-event";

/// Envelope class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    /// Host-originated notification, delivered to popups only.
    Lifecycle,
    /// Body routed to the plugin's message handler and its popups.
    Data,
}

/// A message addressed to one plugin (and optionally one of its popups).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "window-event", rename_all = "camelCase")]
pub struct Envelope {
    /// Envelope class.
    pub event_type: EnvelopeKind,
    /// Event name, e.g. [`ROOM_STATE`].
    pub event: String,
    /// Owning plugin.
    pub plugin_id: String,
    /// Target popup, when the envelope concerns a single surface.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub popup_id: Option<String>,
    /// Event body.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Envelope {
    /// Creates a lifecycle envelope.
    pub fn lifecycle(event: impl Into<String>, plugin_id: impl Into<String>) -> Self {
        Self {
            event_type: EnvelopeKind::Lifecycle,
            event: event.into(),
            plugin_id: plugin_id.into(),
            popup_id: None,
            payload: Value::Null,
        }
    }

    /// Creates a data envelope.
    pub fn data(event: impl Into<String>, plugin_id: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: EnvelopeKind::Data,
            event: event.into(),
            plugin_id: plugin_id.into(),
            popup_id: None,
            payload,
        }
    }

    /// Tags the envelope with a popup id.
    pub fn for_popup(mut self, popup_id: impl Into<String>) -> Self {
        self.popup_id = Some(popup_id.into());
        self
    }

    /// Attaches a payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Returns true for lifecycle envelopes.
    pub fn is_lifecycle(&self) -> bool {
        self.event_type == EnvelopeKind::Lifecycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_envelope_wire_shape() {
        let env = Envelope::data(ROOM_STATE, "stats", json!({"rooms": []}));
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "window-event",
                "eventType": "data",
                "event": "room-state",
                "pluginId": "stats",
                "payload": {"rooms": []}
            })
        );
    }

    #[test]
    fn test_lifecycle_envelope_with_popup() {
        let env = Envelope::lifecycle(WINDOW_OPENED, "stats").for_popup("p1");
        assert!(env.is_lifecycle());
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["eventType"], "lifecycle");
        assert_eq!(value["popupId"], "p1");
        assert!(value.get("payload").is_none());

        let back: Envelope = serde_json::from_value(value).unwrap();
        assert_eq!(back, env);
    }
}
