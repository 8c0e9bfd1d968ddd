//! The plugin host.
//!
//! [`PluginHost`] owns every plugin record (instance plus mailbox) and is the
//! only component that drives plugin lifecycles. It:
//!
//! - loads validated [`PluginCandidate`]s, handing each `init` an owned copy
//!   of its config section and the latest room projection;
//! - supervises `init`/`cleanup`/`handle_message` failures so that one plugin
//!   cannot affect the host or its siblings;
//! - manages popup surfaces and announces them with lifecycle envelopes;
//! - pushes `room-state` and `room-event` data envelopes through the bridge.
//!
//! # Example
//!
//! ```rust,ignore
//! let host = PluginHost::new(HostConfig::default());
//! host.load(candidate).await?;
//! let outcome = host.dispatch("viewer-stats", "summary", json!({})).await?;
//! host.shutdown().await;
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use livehub_core::envelope::{PLUGIN_RELOADED, ROOM_EVENT, ROOM_STATE, WINDOW_CLOSED, WINDOW_OPENED};
use livehub_core::{
    DispatchOutcome, Envelope, LifecycleState, PluginError, PluginResult, RoomEvent,
    RoomProjection,
};

use crate::bridge::Mailbox;
use crate::instance::{HookTimeouts, PluginInfo, PluginInstance};
use crate::manifest::Capability;
use crate::registry::PluginCandidate;

/// Reserved message type answered by the host itself.
pub const PING: &str = "ping";

/// Host configuration.
#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    /// Hook bounds.
    pub timeouts: HookTimeouts,
    /// Per-plugin config sections, keyed by plugin id.
    pub plugin_configs: HashMap<String, Value>,
}

/// A popup attached to a plugin.
#[derive(Debug)]
pub struct PopupHandle {
    /// Owning plugin.
    pub plugin_id: String,
    /// Popup id.
    pub popup_id: String,
    /// Envelopes addressed to this popup.
    pub receiver: mpsc::UnboundedReceiver<Envelope>,
}

struct PluginRecord {
    instance: Arc<PluginInstance>,
    mailbox: Mailbox,
}

/// Loads, supervises, and talks to plugin instances.
pub struct PluginHost {
    config: HostConfig,
    plugins: RwLock<BTreeMap<String, Arc<PluginRecord>>>,
    /// Latest projection and the number of times it has been published.
    projection: RwLock<(u64, Value)>,
}

impl PluginHost {
    /// Creates a host with no plugins.
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            plugins: RwLock::new(BTreeMap::new()),
            projection: RwLock::new((0, RoomProjection::default().to_value())),
        }
    }

    fn record(&self, plugin_id: &str) -> PluginResult<Arc<PluginRecord>> {
        self.plugins
            .read()
            .get(plugin_id)
            .cloned()
            .ok_or_else(|| PluginError::not_found(plugin_id))
    }

    fn current_projection(&self) -> (u64, Value) {
        self.projection.read().clone()
    }

    /// Posts `room-state` if a projection was published after `seen`.
    ///
    /// `publish_projection` skips plugins that are not `Ready`, so a plugin
    /// coming out of `init` would otherwise keep its stale snapshot.
    fn catch_up(&self, record: &PluginRecord, seen: u64) {
        let (seq, value) = self.current_projection();
        if seq != seen {
            debug!(plugin = %record.instance.id(), "Delivering projection published during init");
            record
                .mailbox
                .post(Envelope::data(ROOM_STATE, record.instance.id(), value));
        }
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Loads a plugin and runs its `init`.
    ///
    /// Fails with `AlreadyLoaded` if a plugin with the same id is not
    /// `Unloaded`. On `InitFailed` the record stays, in state `Unloaded`.
    pub async fn load(&self, candidate: PluginCandidate) -> PluginResult<PluginInfo> {
        let (manifest, module, exports) = candidate.into_parts();
        let plugin_id = manifest.id.clone();
        let config = self
            .config
            .plugin_configs
            .get(&plugin_id)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::default()));

        let record = {
            let mut plugins = self.plugins.write();
            if let Some(existing) = plugins.get(&plugin_id)
                && existing.instance.state() != LifecycleState::Unloaded
            {
                return Err(PluginError::AlreadyLoaded { plugin_id });
            }
            let instance = Arc::new(PluginInstance::new(
                manifest,
                module,
                exports,
                config,
                self.config.timeouts,
            ));
            let record = Arc::new(PluginRecord {
                instance: Arc::clone(&instance),
                mailbox: Mailbox::open(Arc::clone(&instance)),
            });
            if let Some(old) = plugins.insert(plugin_id.clone(), Arc::clone(&record))
                && let Some(old) = Arc::into_inner(old)
            {
                old.mailbox.close();
            }
            record
        };

        info!(plugin = %plugin_id, passive = exports.is_passive(), "Loading plugin");
        let (seen, projection) = self.current_projection();
        record.instance.initialize(projection).await?;
        self.catch_up(&record, seen);
        Ok(record.instance.info())
    }

    /// Loads every candidate, logging failures. Returns the ids that reached
    /// `Ready`.
    pub async fn load_all(&self, candidates: Vec<PluginCandidate>) -> Vec<String> {
        let mut loaded = Vec::new();
        for candidate in candidates {
            let plugin_id = candidate.id().to_string();
            match self.load(candidate).await {
                Ok(_) => loaded.push(plugin_id),
                Err(e) => warn!(plugin = %plugin_id, error = %e, "Plugin not loaded"),
            }
        }
        loaded
    }

    /// Runs `cleanup` and detaches all popups. Idempotent for known plugins.
    pub async fn unload(&self, plugin_id: &str) -> PluginResult<()> {
        let record = self.record(plugin_id)?;
        record.instance.teardown().await;
        info!(plugin = %plugin_id, "Plugin unloaded");
        Ok(())
    }

    /// Runs `cleanup` then `init` again, keeping popups, and announces
    /// `plugin-reloaded` to them.
    pub async fn reload(&self, plugin_id: &str) -> PluginResult<PluginInfo> {
        let record = self.record(plugin_id)?;
        let (seen, projection) = self.current_projection();
        record.instance.reinitialize(projection).await?;
        record
            .mailbox
            .post(Envelope::lifecycle(PLUGIN_RELOADED, plugin_id));
        self.catch_up(&record, seen);
        info!(plugin = %plugin_id, "Plugin reloaded");
        Ok(record.instance.info())
    }

    /// Unloads every plugin and stops all mailboxes.
    pub async fn shutdown(&self) {
        let records: Vec<_> = std::mem::take(&mut *self.plugins.write())
            .into_values()
            .collect();
        for record in records {
            record.instance.teardown().await;
            if let Some(record) = Arc::into_inner(record) {
                record.mailbox.close();
            }
        }
        info!("Plugin host shut down");
    }

    // ─── Messages ────────────────────────────────────────────────────────────

    /// Sends a message to a plugin's handler and returns its structured result.
    ///
    /// `ping` is answered by the host without touching the plugin.
    pub async fn dispatch(
        &self,
        plugin_id: &str,
        kind: &str,
        payload: Value,
    ) -> PluginResult<DispatchOutcome> {
        let record = self.record(plugin_id)?;
        let state = record.instance.state();
        if state != LifecycleState::Ready {
            return Err(PluginError::NotReady {
                plugin_id: plugin_id.to_string(),
                state,
            });
        }
        if kind == PING {
            return Ok(DispatchOutcome::success(json!({
                "pong": true,
                "pluginId": plugin_id,
            })));
        }
        debug!(plugin = %plugin_id, kind = %kind, "Dispatching message");
        record.instance.handle(kind, payload).await
    }

    /// Records a new projection and pushes it as `room-state` to every
    /// `Ready` plugin.
    pub fn publish_projection(&self, projection: &RoomProjection) {
        let value = projection.to_value();
        {
            let mut current = self.projection.write();
            current.0 += 1;
            current.1 = value.clone();
        }
        for record in self.plugins.read().values() {
            if record.instance.state() == LifecycleState::Ready {
                record.mailbox.post(Envelope::data(
                    ROOM_STATE,
                    record.instance.id(),
                    value.clone(),
                ));
            }
        }
    }

    /// Forwards one room event as `room-event` to plugins declaring the
    /// `room-events` capability.
    pub fn publish_room_event(&self, room_id: &str, event: &RoomEvent) {
        let payload = json!({ "roomId": room_id, "event": event });
        for record in self.plugins.read().values() {
            if record.instance.state() == LifecycleState::Ready
                && record.instance.has_capability(Capability::RoomEvents)
            {
                record.mailbox.post(Envelope::data(
                    ROOM_EVENT,
                    record.instance.id(),
                    payload.clone(),
                ));
            }
        }
    }

    // ─── Popups ──────────────────────────────────────────────────────────────

    /// Attaches a popup with a caller-chosen id and announces `window-opened`.
    pub fn attach_popup(&self, plugin_id: &str, popup_id: &str) -> PluginResult<PopupHandle> {
        let record = self.record(plugin_id)?;
        let receiver = record.instance.attach_popup(popup_id)?;
        record
            .mailbox
            .post(Envelope::lifecycle(WINDOW_OPENED, plugin_id).for_popup(popup_id));
        debug!(plugin = %plugin_id, popup = %popup_id, "Popup attached");
        Ok(PopupHandle {
            plugin_id: plugin_id.to_string(),
            popup_id: popup_id.to_string(),
            receiver,
        })
    }

    /// Attaches a popup with a generated id.
    pub fn open_popup(&self, plugin_id: &str) -> PluginResult<PopupHandle> {
        let popup_id = uuid::Uuid::new_v4().to_string();
        self.attach_popup(plugin_id, &popup_id)
    }

    /// Detaches a popup. Unknown popups are a no-op (`Ok(false)`).
    ///
    /// The detached popup receives a final `window-closed`; the remaining
    /// popups are told through the mailbox.
    pub fn detach_popup(&self, plugin_id: &str, popup_id: &str) -> PluginResult<bool> {
        let record = self.record(plugin_id)?;
        if !record.instance.detach_popup(popup_id) {
            return Ok(false);
        }
        record
            .mailbox
            .post(Envelope::lifecycle(WINDOW_CLOSED, plugin_id).for_popup(popup_id));
        debug!(plugin = %plugin_id, popup = %popup_id, "Popup detached");
        Ok(true)
    }

    // ─── Inspection ──────────────────────────────────────────────────────────

    /// Public view of every known plugin, ordered by id.
    pub fn list(&self) -> Vec<PluginInfo> {
        self.plugins
            .read()
            .values()
            .map(|r| r.instance.info())
            .collect()
    }

    /// Public view of one plugin.
    pub fn info(&self, plugin_id: &str) -> PluginResult<PluginInfo> {
        Ok(self.record(plugin_id)?.instance.info())
    }

    /// Lifecycle state of one plugin.
    pub fn state(&self, plugin_id: &str) -> PluginResult<LifecycleState> {
        Ok(self.record(plugin_id)?.instance.state())
    }

    /// Number of known plugins.
    pub fn plugin_count(&self) -> usize {
        self.plugins.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use livehub_core::{BoxError, HookOutcome, PluginModule, RoomInfo, RoomStatus};
    use tokio_test::assert_ok;

    use crate::manifest::PluginManifest;

    fn module(id: &'static str) -> PluginModule {
        PluginModule::new(id)
            .on_init(|_| async { HookOutcome::ok() })
            .on_cleanup(|| async { HookOutcome::ok() })
    }

    fn candidate(id: &'static str, module: PluginModule) -> PluginCandidate {
        PluginCandidate::new(PluginManifest::new(id), module).unwrap()
    }

    fn echo(id: &'static str) -> PluginCandidate {
        candidate(
            id,
            module(id).on_message(|kind, payload| async move {
                match kind.as_str() {
                    "fail" => Err::<Value, BoxError>("refused".into()),
                    _ => Ok(json!({ "kind": kind, "payload": payload })),
                }
            }),
        )
    }

    #[tokio::test]
    async fn test_load_and_dispatch() {
        let host = PluginHost::new(HostConfig::default());
        let info = assert_ok!(host.load(echo("echo")).await);
        assert_eq!(info.state, LifecycleState::Ready);

        let out = host.dispatch("echo", "hello", json!({ "x": 1 })).await.unwrap();
        assert!(out.ok);
        assert_eq!(out.result.unwrap()["payload"]["x"], 1);

        let err = host.load(echo("echo")).await.unwrap_err();
        assert_eq!(err.code(), "already_loaded");
    }

    #[tokio::test]
    async fn test_dispatch_errors() {
        let host = PluginHost::new(HostConfig::default());
        let err = host.dispatch("ghost", "x", Value::Null).await.unwrap_err();
        assert_eq!(err.code(), "not_found");

        host.load(echo("echo")).await.unwrap();
        host.unload("echo").await.unwrap();
        let err = host.dispatch("echo", "x", Value::Null).await.unwrap_err();
        assert_eq!(err.code(), "not_ready");
    }

    #[tokio::test]
    async fn test_failing_handler_leaves_siblings_untouched() {
        let host = PluginHost::new(HostConfig::default());
        host.load(echo("first")).await.unwrap();
        host.load(echo("second")).await.unwrap();

        let out = host.dispatch("first", "fail", Value::Null).await.unwrap();
        assert!(!out.ok);
        assert_eq!(out.error.as_deref(), Some("refused"));

        assert_eq!(host.state("first").unwrap(), LifecycleState::Ready);
        assert!(host.dispatch("second", "hi", Value::Null).await.unwrap().ok);
    }

    #[tokio::test]
    async fn test_passive_plugin_is_not_supported() {
        let host = PluginHost::new(HostConfig::default());
        host.load(candidate("quiet", module("quiet"))).await.unwrap();
        let out = host.dispatch("quiet", "anything", json!({})).await.unwrap();
        assert!(!out.ok);
        assert_eq!(out.code.as_deref(), Some("not_supported"));
    }

    #[tokio::test]
    async fn test_ping_is_answered_by_host() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let host = PluginHost::new(HostConfig::default());
        host.load(candidate(
            "counted",
            module("counted").on_message(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<Value, BoxError>(Value::Null) }
            }),
        ))
        .await
        .unwrap();

        let out = host.dispatch("counted", PING, json!({})).await.unwrap();
        assert!(out.ok);
        assert_eq!(out.result.unwrap()["pong"], true);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_init_failure_keeps_record_unloaded() {
        let host = PluginHost::new(HostConfig::default());
        let failing = PluginModule::new("bad")
            .on_init(|_| async { HookOutcome::failed("no credentials") })
            .on_cleanup(|| async { HookOutcome::ok() });
        let err = host.load(candidate("bad", failing)).await.unwrap_err();
        assert_eq!(err.code(), "init_failed");
        assert_eq!(host.state("bad").unwrap(), LifecycleState::Unloaded);

        host.load(echo("good")).await.unwrap();
        assert_eq!(host.plugin_count(), 2);
    }

    #[tokio::test]
    async fn test_init_receives_config_and_projection() {
        let mut config = HostConfig::default();
        config
            .plugin_configs
            .insert("cfg".into(), json!({ "threshold": 3 }));
        let host = PluginHost::new(config);

        let mut room = RoomInfo::idle("A");
        room.status = RoomStatus::Connected;
        room.connected_at = Some(1);
        host.publish_projection(&RoomProjection::from_rooms(vec![room], 1));

        let checker = PluginModule::new("cfg")
            .on_init(|ctx| async move {
                let threshold = ctx.config["threshold"].as_u64();
                let live = ctx.projection["liveRoomsCount"].as_u64();
                if threshold == Some(3) && live == Some(1) {
                    HookOutcome::ok()
                } else {
                    HookOutcome::failed(format!("{threshold:?} {live:?}"))
                }
            })
            .on_cleanup(|| async { HookOutcome::ok() });
        assert_ok!(host.load(candidate("cfg", checker)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_projection_published_during_reload_is_delivered() {
        let inits = Arc::new(AtomicU32::new(0));
        let counter = inits.clone();
        let slow = PluginModule::new("slow")
            .on_init(move |_| {
                let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
                async move {
                    if !first {
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                    HookOutcome::ok()
                }
            })
            .on_cleanup(|| async { HookOutcome::ok() });
        let host = Arc::new(PluginHost::new(HostConfig::default()));
        host.load(candidate("slow", slow)).await.unwrap();
        let mut popup = host.attach_popup("slow", "main").unwrap();

        let reloading = {
            let host = Arc::clone(&host);
            tokio::spawn(async move { host.reload("slow").await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        assert_eq!(host.state("slow").unwrap(), LifecycleState::Initializing);

        let mut room = RoomInfo::idle("A");
        room.status = RoomStatus::Connected;
        room.connected_at = Some(1);
        host.publish_projection(&RoomProjection::from_rooms(vec![room], 7));

        reloading.await.unwrap().unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let mut versions = Vec::new();
        while let Ok(env) = popup.receiver.try_recv() {
            if env.event == ROOM_STATE {
                versions.push(env.payload["version"].as_u64());
            }
        }
        assert_eq!(versions, vec![Some(7)]);
        assert_eq!(inits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_quiet_reload_sends_no_extra_state() {
        let host = PluginHost::new(HostConfig::default());
        host.load(candidate("calm", module("calm"))).await.unwrap();
        let mut popup = host.attach_popup("calm", "main").unwrap();
        host.reload("calm").await.unwrap();
        tokio::task::yield_now().await;

        while let Ok(env) = popup.receiver.try_recv() {
            assert_ne!(env.event, ROOM_STATE);
        }
    }

    #[tokio::test]
    async fn test_popup_lifecycle_envelopes() {
        let host = PluginHost::new(HostConfig::default());
        host.load(candidate("win", module("win"))).await.unwrap();

        let mut first = host.attach_popup("win", "p1").unwrap();
        let opened = first.receiver.recv().await.unwrap();
        assert_eq!(opened.event, WINDOW_OPENED);
        assert_eq!(opened.popup_id.as_deref(), Some("p1"));

        let second = host.open_popup("win").unwrap();
        let opened = first.receiver.recv().await.unwrap();
        assert_eq!(opened.popup_id.as_deref(), Some(second.popup_id.as_str()));

        assert!(host.detach_popup("win", &second.popup_id).unwrap());
        assert!(!host.detach_popup("win", "never-attached").unwrap());
        let closed = first.receiver.recv().await.unwrap();
        assert_eq!(closed.event, WINDOW_CLOSED);
        assert_eq!(host.info("win").unwrap().popups, ["p1"]);

        host.reload("win").await.unwrap();
        let reloaded = first.receiver.recv().await.unwrap();
        assert_eq!(reloaded.event, PLUGIN_RELOADED);
        assert_eq!(host.info("win").unwrap().popups, ["p1"]);

        host.unload("win").await.unwrap();
        let last = first.receiver.recv().await.unwrap();
        assert_eq!(last.event, WINDOW_CLOSED);
        assert!(first.receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_room_events_follow_capability() {
        let host = PluginHost::new(HostConfig::default());
        let listening = PluginCandidate::new(
            PluginManifest::new("listen").with_capability(Capability::RoomEvents),
            module("listen"),
        )
        .unwrap();
        host.load(listening).await.unwrap();
        host.load(candidate("deaf", module("deaf"))).await.unwrap();

        let mut listen = host.attach_popup("listen", "l").unwrap();
        let mut deaf = host.attach_popup("deaf", "d").unwrap();
        listen.receiver.recv().await.unwrap();
        deaf.receiver.recv().await.unwrap();

        host.publish_room_event("A", &RoomEvent::new("chat", json!("hi")));
        host.publish_projection(&RoomProjection::default());

        let first = listen.receiver.recv().await.unwrap();
        assert_eq!(first.event, ROOM_EVENT);
        assert_eq!(first.payload["roomId"], "A");
        let second = listen.receiver.recv().await.unwrap();
        assert_eq!(second.event, ROOM_STATE);

        let only = deaf.receiver.recv().await.unwrap();
        assert_eq!(only.event, ROOM_STATE);
    }

    #[tokio::test]
    async fn test_shutdown_unloads_everything() {
        let host = PluginHost::new(HostConfig::default());
        host.load(echo("aa")).await.unwrap();
        host.load(echo("bb")).await.unwrap();
        host.attach_popup("aa", "p").unwrap();
        host.shutdown().await;
        assert_eq!(host.plugin_count(), 0);
        assert!(host.list().is_empty());
    }
}
