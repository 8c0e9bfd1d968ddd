//! Operator control surface.
//!
//! Exposes room and plugin control both as typed methods and as a JSON
//! command dispatcher suitable for an IPC bridge:
//!
//! ```rust,ignore
//! let reply = control.handle("room.setPriority", json!({ "roomId": "A", "priority": 3 })).await;
//! assert_eq!(reply["success"], true);
//! ```
//!
//! Every command resolves to a JSON object; failures carry a stable `code`.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use livehub_core::{
    DispatchOutcome, PluginError, RoomError, RoomInfo, RoomProjection, RoomResult, RoomStatus,
};
use livehub_plugin::{PluginHost, PluginInfo};

use crate::manager::RoomManager;

/// Reply of a mutating command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RoomStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            success: true,
            status: None,
            code: None,
            error: None,
        }
    }

    pub fn failure(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            status: None,
            code: Some(code.into()),
            error: Some(error.into()),
        }
    }

    pub fn with_status(mut self, status: RoomStatus) -> Self {
        self.status = Some(status);
        self
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl From<&RoomError> for Ack {
    fn from(err: &RoomError) -> Self {
        let ack = Self::failure(err.code(), err.to_string());
        match err {
            RoomError::AlreadyConnected { status, .. } => ack.with_status(*status),
            _ => ack,
        }
    }
}

impl From<&PluginError> for Ack {
    fn from(err: &PluginError) -> Self {
        Self::failure(err.code(), err.to_string())
    }
}

fn room_ack(result: RoomResult<RoomStatus>) -> Ack {
    match result {
        Ok(status) => Ack::ok().with_status(status),
        Err(err) => Ack::from(&err),
    }
}

// ─── Command arguments ───────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomArgs {
    room_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriorityArgs {
    room_id: String,
    priority: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelArgs {
    room_id: String,
    label: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PluginArgs {
    plugin_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DispatchArgs {
    plugin_id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

fn parse<T: DeserializeOwned>(args: Value) -> Result<T, Value> {
    serde_json::from_value(args)
        .map_err(|e| Ack::failure("invalid_argument", format!("invalid arguments: {e}")).to_value())
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

// ─── ControlSurface ──────────────────────────────────────────────────────────

/// Room and plugin control for operators.
#[derive(Clone)]
pub struct ControlSurface {
    rooms: Arc<RoomManager>,
    plugins: Arc<PluginHost>,
}

impl ControlSurface {
    pub fn new(rooms: Arc<RoomManager>, plugins: Arc<PluginHost>) -> Self {
        Self { rooms, plugins }
    }

    pub async fn room_connect(&self, room_id: &str) -> Ack {
        room_ack(self.rooms.connect(room_id).await)
    }

    pub async fn room_disconnect(&self, room_id: &str) -> Ack {
        room_ack(self.rooms.disconnect(room_id).await)
    }

    pub fn room_list(&self) -> RoomProjection {
        self.rooms.list()
    }

    pub fn room_status(&self, room_id: &str) -> RoomResult<RoomInfo> {
        self.rooms.status(room_id)
    }

    pub async fn room_set_priority(&self, room_id: &str, priority: i64) -> Ack {
        match self.rooms.set_priority(room_id, priority).await {
            Ok(()) => Ack::ok(),
            Err(err) => Ack::from(&err),
        }
    }

    pub async fn room_set_label(&self, room_id: &str, label: &str) -> Ack {
        match self.rooms.set_label(room_id, label).await {
            Ok(()) => Ack::ok(),
            Err(err) => Ack::from(&err),
        }
    }

    pub async fn room_remove(&self, room_id: &str) -> Ack {
        match self.rooms.remove(room_id).await {
            Ok(info) => Ack::ok().with_status(info.status),
            Err(err) => Ack::from(&err),
        }
    }

    pub fn plugin_list(&self) -> Vec<PluginInfo> {
        self.plugins.list()
    }

    pub async fn plugin_unload(&self, plugin_id: &str) -> Ack {
        match self.plugins.unload(plugin_id).await {
            Ok(()) => Ack::ok(),
            Err(err) => Ack::from(&err),
        }
    }

    pub async fn plugin_reload(&self, plugin_id: &str) -> Ack {
        match self.plugins.reload(plugin_id).await {
            Ok(_) => Ack::ok(),
            Err(err) => Ack::from(&err),
        }
    }

    /// Dispatches a message. Host-side errors become failed outcomes.
    pub async fn plugin_dispatch(&self, plugin_id: &str, kind: &str, payload: Value) -> DispatchOutcome {
        match self.plugins.dispatch(plugin_id, kind, payload).await {
            Ok(outcome) => outcome,
            Err(err) => DispatchOutcome::failure(err.code(), err.to_string()),
        }
    }

    /// Runs a named command with JSON arguments.
    pub async fn handle(&self, command: &str, args: Value) -> Value {
        debug!(command = %command, "Control command");
        match self.route(command, args).await {
            Ok(reply) | Err(reply) => reply,
        }
    }

    async fn route(&self, command: &str, args: Value) -> Result<Value, Value> {
        let reply = match command {
            "room.connect" => {
                let a: RoomArgs = parse(args)?;
                self.room_connect(&a.room_id).await.to_value()
            }
            "room.disconnect" => {
                let a: RoomArgs = parse(args)?;
                self.room_disconnect(&a.room_id).await.to_value()
            }
            "room.list" => to_json(&self.room_list()),
            "room.status" => {
                let a: RoomArgs = parse(args)?;
                match self.room_status(&a.room_id) {
                    Ok(info) => to_json(&info),
                    Err(err) => Ack::from(&err).to_value(),
                }
            }
            "room.setPriority" => {
                let a: PriorityArgs = parse(args)?;
                self.room_set_priority(&a.room_id, a.priority).await.to_value()
            }
            "room.setLabel" => {
                let a: LabelArgs = parse(args)?;
                self.room_set_label(&a.room_id, &a.label).await.to_value()
            }
            "room.remove" => {
                let a: RoomArgs = parse(args)?;
                self.room_remove(&a.room_id).await.to_value()
            }
            "plugin.list" => json!({ "plugins": self.plugin_list() }),
            "plugin.unload" => {
                let a: PluginArgs = parse(args)?;
                self.plugin_unload(&a.plugin_id).await.to_value()
            }
            "plugin.reload" => {
                let a: PluginArgs = parse(args)?;
                self.plugin_reload(&a.plugin_id).await.to_value()
            }
            "plugin.dispatch" => {
                let a: DispatchArgs = parse(args)?;
                to_json(&self.plugin_dispatch(&a.plugin_id, &a.kind, a.payload).await)
            }
            other => Ack::failure("unknown_command", format!("unknown command: {other}")).to_value(),
        };
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use livehub_core::{BoxError, HookOutcome, PluginModule};
    use livehub_plugin::{HostConfig, PluginCandidate, PluginManifest};
    use livehub_transport::ChannelConnector;

    use crate::session::SessionPolicy;

    async fn setup() -> (ChannelConnector, ControlSurface) {
        let feeds = ChannelConnector::new();
        let rooms = Arc::new(RoomManager::new(
            Arc::new(feeds.clone()),
            SessionPolicy::default(),
        ));
        let plugins = Arc::new(PluginHost::new(HostConfig::default()));

        let echo = PluginModule::new("echo")
            .on_init(|_| async { HookOutcome::ok() })
            .on_cleanup(|| async { HookOutcome::ok() })
            .on_message(|kind, payload| async move {
                if kind == "boom" {
                    return Err::<Value, BoxError>("exploded".into());
                }
                Ok(json!({ "kind": kind, "echo": payload }))
            });
        let passive = PluginModule::new("passive")
            .on_init(|_| async { HookOutcome::ok() })
            .on_cleanup(|| async { HookOutcome::ok() });
        for (id, module) in [("echo", echo), ("passive", passive)] {
            plugins
                .load(PluginCandidate::new(PluginManifest::new(id), module).unwrap())
                .await
                .unwrap();
        }
        (feeds, ControlSurface::new(rooms, plugins))
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_commands() {
        let (_feeds, control) = setup().await;

        let empty = control.handle("room.list", Value::Null).await;
        assert_eq!(empty["rooms"], json!([]));
        assert_eq!(empty["liveRoomsCount"], 0);

        let reply = control.handle("room.connect", json!({ "roomId": "A" })).await;
        assert_eq!(reply, json!({ "success": true, "status": "connected" }));

        let again = control.handle("room.connect", json!({ "roomId": "A" })).await;
        assert_eq!(again["success"], false);
        assert_eq!(again["code"], "already_connected");
        assert_eq!(again["status"], "connected");

        let reply = control
            .handle("room.setPriority", json!({ "roomId": "A", "priority": 4 }))
            .await;
        assert_eq!(reply, json!({ "success": true }));
        control
            .handle("room.setLabel", json!({ "roomId": "A", "label": "Stage" }))
            .await;

        let status = control.handle("room.status", json!({ "roomId": "A" })).await;
        assert_eq!(status["roomId"], "A");
        assert_eq!(status["status"], "connected");
        assert_eq!(status["eventCount"], 0);
        assert_eq!(status["reconnectAttempts"], 0);
        assert_eq!(status["priority"], 4);
        assert_eq!(status["label"], "Stage");
        assert!(status["connectedAt"].is_u64());

        let list = control.handle("room.list", json!({})).await;
        assert_eq!(list["liveRoomsCount"], 1);

        let reply = control.handle("room.disconnect", json!({ "roomId": "A" })).await;
        assert_eq!(reply["status"], "disconnected");

        let reply = control.handle("room.remove", json!({ "roomId": "A" })).await;
        assert_eq!(reply["success"], true);
        let missing = control.handle("room.status", json!({ "roomId": "A" })).await;
        assert_eq!(missing["code"], "not_found");
    }

    #[tokio::test]
    async fn test_malformed_arguments() {
        let (_feeds, control) = setup().await;

        let reply = control.handle("room.connect", json!({ "room": "A" })).await;
        assert_eq!(reply["success"], false);
        assert_eq!(reply["code"], "invalid_argument");

        let reply = control
            .handle("room.setPriority", json!({ "roomId": "A", "priority": 1.5 }))
            .await;
        assert_eq!(reply["code"], "invalid_argument");

        let reply = control.handle("room.connect", json!({ "roomId": "" })).await;
        assert_eq!(reply["code"], "invalid_argument");

        let reply = control.handle("room.explode", json!({})).await;
        assert_eq!(reply["code"], "unknown_command");
    }

    #[tokio::test]
    async fn test_not_found_rooms() {
        let (_feeds, control) = setup().await;
        for command in ["room.disconnect", "room.remove"] {
            let reply = control.handle(command, json!({ "roomId": "ghost" })).await;
            assert_eq!(reply["code"], "not_found", "{command}");
        }
        let reply = control
            .handle("room.setLabel", json!({ "roomId": "ghost", "label": "x" }))
            .await;
        assert_eq!(reply["code"], "not_found");
    }

    #[tokio::test]
    async fn test_plugin_commands() {
        let (_feeds, control) = setup().await;

        let list = control.handle("plugin.list", Value::Null).await;
        assert_eq!(list["plugins"].as_array().unwrap().len(), 2);

        let reply = control
            .handle(
                "plugin.dispatch",
                json!({ "pluginId": "echo", "type": "hello", "payload": { "n": 1 } }),
            )
            .await;
        assert_eq!(reply["ok"], true);
        assert_eq!(reply["result"]["echo"]["n"], 1);

        // A failing handler leaves the host and siblings untouched.
        let reply = control
            .handle("plugin.dispatch", json!({ "pluginId": "echo", "type": "boom" }))
            .await;
        assert_eq!(reply["ok"], false);
        assert_eq!(reply["code"], "handler_failure");
        let reply = control
            .handle("plugin.dispatch", json!({ "pluginId": "echo", "type": "hello" }))
            .await;
        assert_eq!(reply["ok"], true);

        let reply = control
            .handle("plugin.dispatch", json!({ "pluginId": "passive", "type": "hello" }))
            .await;
        assert_eq!(reply["ok"], false);
        assert_eq!(reply["code"], "not_supported");

        let reply = control.handle("plugin.unload", json!({ "pluginId": "echo" })).await;
        assert_eq!(reply["success"], true);
        let reply = control
            .handle("plugin.dispatch", json!({ "pluginId": "echo", "type": "hello" }))
            .await;
        assert_eq!(reply["code"], "not_ready");

        let reply = control.handle("plugin.reload", json!({ "pluginId": "ghost" })).await;
        assert_eq!(reply["code"], "not_found");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_does_not_touch_rooms() {
        let (_feeds, control) = setup().await;
        control.room_connect("A").await;
        let before = control.room_status("A").unwrap();

        let reply = control.plugin_dispatch("echo", "ping", json!({})).await;
        assert!(reply.ok);
        assert_eq!(reply.result.unwrap()["pong"], true);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(control.room_status("A").unwrap(), before);
    }
}
