//! Projection publisher.
//!
//! Listens to room changes and keeps two consumers current:
//!
//! - a `watch` channel holding the latest [`RoomProjection`], for in-process
//!   readers (the control surface, UIs);
//! - the [`PluginHost`], which receives `room-state` on every status or
//!   metadata change and a `room-event` for each observed event.
//!
//! Events alone only mark the projection dirty; the next refresh tick
//! publishes it, so a busy room does not flood plugins with snapshots.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use livehub_core::{RoomChange, RoomProjection};
use livehub_plugin::PluginHost;

use crate::manager::RoomManager;

/// Background task that turns room changes into projections.
pub struct ProjectionPublisher {
    latest: watch::Receiver<Arc<RoomProjection>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ProjectionPublisher {
    /// Spawns the publisher and publishes an initial projection.
    pub fn spawn(rooms: Arc<RoomManager>, plugins: Arc<PluginHost>, refresh: Duration) -> Self {
        let initial = Arc::new(rooms.list());
        plugins.publish_projection(&initial);
        let (tx, latest) = watch::channel(initial);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(rooms, plugins, tx, refresh, cancel.clone()));
        Self {
            latest,
            cancel,
            task,
        }
    }

    /// The most recently published projection.
    pub fn latest(&self) -> Arc<RoomProjection> {
        Arc::clone(&self.latest.borrow())
    }

    /// A receiver that observes every published projection.
    pub fn watch(&self) -> watch::Receiver<Arc<RoomProjection>> {
        self.latest.clone()
    }

    /// Stops the publisher.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

async fn run(
    rooms: Arc<RoomManager>,
    plugins: Arc<PluginHost>,
    tx: watch::Sender<Arc<RoomProjection>>,
    refresh: Duration,
    cancel: CancellationToken,
) {
    let mut changes = rooms.subscribe();
    let mut tick = tokio::time::interval(refresh);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut dirty = false;

    let publish = |dirty: &mut bool| {
        let projection = Arc::new(rooms.list());
        debug!(
            version = projection.version,
            rooms = projection.rooms.len(),
            live = projection.live_rooms_count,
            "Publishing room projection"
        );
        plugins.publish_projection(&projection);
        tx.send_replace(projection);
        *dirty = false;
    };

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            change = changes.recv() => match change {
                Ok(RoomChange::Event { room_id, event }) => {
                    plugins.publish_room_event(&room_id, &event);
                    dirty = true;
                }
                Ok(_) => publish(&mut dirty),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Projection publisher lagged behind room changes");
                    publish(&mut dirty);
                }
                Err(RecvError::Closed) => break,
            },
            _ = tick.tick() => {
                if dirty {
                    publish(&mut dirty);
                }
            }
        }
    }
    debug!("Projection publisher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    use livehub_core::envelope::{ROOM_EVENT, ROOM_STATE};
    use livehub_core::{HookOutcome, PluginModule, RoomEvent, RoomStatus};
    use livehub_plugin::{Capability, HostConfig, PluginCandidate, PluginManifest};
    use livehub_transport::ChannelConnector;
    use serde_json::{Value, json};
    use tokio::time::sleep;

    use crate::session::SessionPolicy;

    fn module() -> PluginModule {
        PluginModule::new("watcher")
            .on_init(|_| async { HookOutcome::ok() })
            .on_cleanup(|| async { HookOutcome::ok() })
            .on_message(|_, _| async { Ok(Value::Null) })
    }

    async fn setup(
        capabilities: &[Capability],
    ) -> (ChannelConnector, Arc<RoomManager>, Arc<PluginHost>) {
        let feeds = ChannelConnector::new();
        let rooms = Arc::new(RoomManager::new(
            Arc::new(feeds.clone()),
            SessionPolicy::default(),
        ));
        let plugins = Arc::new(PluginHost::new(HostConfig::default()));
        let mut manifest = PluginManifest::new("watcher");
        for cap in capabilities {
            manifest = manifest.with_capability(*cap);
        }
        plugins
            .load(PluginCandidate::new(manifest, module()).unwrap())
            .await
            .unwrap();
        (feeds, rooms, plugins)
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_changes_publish_room_state() {
        let (_feeds, rooms, plugins) = setup(&[Capability::RoomState]).await;
        let mut popup = plugins.attach_popup("watcher", "main").unwrap();
        let publisher =
            ProjectionPublisher::spawn(Arc::clone(&rooms), Arc::clone(&plugins), Duration::from_secs(1));
        let mut watch = publisher.watch();

        rooms.connect("A").await.unwrap();
        sleep(Duration::from_millis(10)).await;

        let latest = publisher.latest();
        assert_eq!(latest.live_rooms_count, 1);
        assert!(watch.has_changed().unwrap());
        assert_eq!(watch.borrow_and_update().room("A").unwrap().status, RoomStatus::Connected);

        // Skip the window-opened lifecycle envelope and earlier snapshots.
        let mut last_state = None;
        while let Ok(env) = popup.receiver.try_recv() {
            if env.event == ROOM_STATE {
                last_state = Some(env.payload);
            }
        }
        let state = last_state.unwrap();
        assert_eq!(state["liveRoomsCount"], 1);
        assert_eq!(state["rooms"][0]["status"], "connected");

        publisher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_forwarded_and_flushed_on_tick() {
        let (feeds, rooms, plugins) = setup(&[Capability::RoomEvents]).await;
        let mut popup = plugins.attach_popup("watcher", "main").unwrap();
        let publisher =
            ProjectionPublisher::spawn(Arc::clone(&rooms), Arc::clone(&plugins), Duration::from_secs(1));

        rooms.connect("A").await.unwrap();
        sleep(Duration::from_millis(10)).await;
        while popup.receiver.try_recv().is_ok() {}
        let before = publisher.latest().version;

        feeds.push("A", RoomEvent::new("gift", json!({ "value": 5 })));
        sleep(Duration::from_millis(10)).await;

        let env = popup.receiver.try_recv().unwrap();
        assert_eq!(env.event, ROOM_EVENT);
        assert_eq!(env.payload["roomId"], "A");
        assert_eq!(env.payload["event"]["kind"], "gift");
        assert_eq!(publisher.latest().version, before);

        sleep(Duration::from_secs(1)).await;
        let latest = publisher.latest();
        assert!(latest.version > before);
        assert_eq!(latest.room("A").unwrap().event_count, 1);

        publisher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_events_need_capability() {
        let (feeds, rooms, plugins) = setup(&[]).await;
        let mut popup = plugins.attach_popup("watcher", "main").unwrap();
        let publisher =
            ProjectionPublisher::spawn(Arc::clone(&rooms), Arc::clone(&plugins), Duration::from_secs(60));

        rooms.connect("A").await.unwrap();
        feeds.push("A", RoomEvent::new("chat", json!({})));
        sleep(Duration::from_millis(10)).await;

        while let Ok(env) = popup.receiver.try_recv() {
            assert_ne!(env.event, ROOM_EVENT);
        }
        publisher.stop().await;
    }
}
