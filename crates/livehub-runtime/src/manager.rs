//! The room connection manager.
//!
//! [`RoomManager`] owns every [`RoomSession`], keyed by room id. Mutating
//! operations on one room are serialized through that session's op lock;
//! different rooms proceed concurrently, each with its own supervisor task.
//!
//! ```rust,ignore
//! let feeds = ChannelConnector::new();
//! let manager = RoomManager::new(Arc::new(feeds.clone()), SessionPolicy::default());
//!
//! manager.connect("lobby").await?;
//! manager.set_priority("lobby", 10).await?;
//! let snapshot = manager.list();
//! manager.shutdown().await;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{info, warn};

use livehub_core::{
    BoxedConnector, RoomChange, RoomError, RoomInfo, RoomProjection, RoomResult, RoomStatus,
};

use crate::session::{ChangeFeed, RoomSession, SessionPolicy, StartOutcome};

/// Opens, supervises, and recovers one feed connection per room.
pub struct RoomManager {
    connector: BoxedConnector,
    policy: SessionPolicy,
    sessions: RwLock<BTreeMap<String, Arc<RoomSession>>>,
    feed: Arc<ChangeFeed>,
}

impl RoomManager {
    /// Creates a manager with no rooms.
    pub fn new(connector: BoxedConnector, policy: SessionPolicy) -> Self {
        Self {
            connector,
            policy,
            sessions: RwLock::new(BTreeMap::new()),
            feed: Arc::new(ChangeFeed::new()),
        }
    }

    /// Name of the connector that creates event sources.
    pub fn connector_name(&self) -> &str {
        self.connector.name()
    }

    /// The session policy.
    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    fn session(&self, room_id: &str) -> RoomResult<Arc<RoomSession>> {
        self.sessions
            .read()
            .get(room_id)
            .cloned()
            .ok_or_else(|| RoomError::not_found(room_id))
    }

    fn session_or_create(&self, room_id: &str) -> Arc<RoomSession> {
        if let Some(session) = self.sessions.read().get(room_id) {
            return Arc::clone(session);
        }
        let mut sessions = self.sessions.write();
        Arc::clone(
            sessions
                .entry(room_id.to_string())
                .or_insert_with(|| Arc::new(RoomSession::new(room_id, Arc::clone(&self.feed)))),
        )
    }

    fn is_current(&self, room_id: &str, session: &Arc<RoomSession>) -> bool {
        self.sessions
            .read()
            .get(room_id)
            .is_some_and(|s| Arc::ptr_eq(s, session))
    }

    // ─── Control ─────────────────────────────────────────────────────────────

    /// Creates an `Idle` session for `room_id` if none exists.
    pub fn register(&self, room_id: &str) -> RoomResult<RoomInfo> {
        let room_id = validate_room_id(room_id)?;
        Ok(self.session_or_create(room_id).info())
    }

    /// Connects a room and waits for the first attempt.
    ///
    /// - `Connected` rooms fail with the benign `AlreadyConnected`.
    /// - A room already connecting or reconnecting returns its status.
    /// - Otherwise the session restarts from `Connecting` with fresh
    ///   counters. The first attempt's result is returned: `Connected`, an
    ///   adapter error (the session keeps retrying), or `RetriesExhausted`.
    ///   If a disconnect cancels the attempt, the resulting status is returned.
    pub async fn connect(&self, room_id: &str) -> RoomResult<RoomStatus> {
        let room_id = validate_room_id(room_id)?;
        loop {
            let session = self.session_or_create(room_id);
            let guard = session.op_lock.lock().await;
            if !self.is_current(room_id, &session) {
                // Removed while we waited for the lock.
                continue;
            }
            let outcome = session.start(&self.connector, &self.policy);
            drop(guard);

            return match outcome {
                StartOutcome::AlreadyConnected => Err(RoomError::AlreadyConnected {
                    room_id: room_id.to_string(),
                    status: RoomStatus::Connected,
                }),
                StartOutcome::InFlight(status) => Ok(status),
                StartOutcome::Started(first) => match first.await {
                    Ok(result) => result,
                    Err(_) => {
                        // Cancelled by a teardown; report where it left the session.
                        let _guard = session.op_lock.lock().await;
                        Ok(session.status())
                    }
                },
            };
        }
    }

    /// Tears down a room's adapter and marks it `Disconnected`. Idempotent.
    pub async fn disconnect(&self, room_id: &str) -> RoomResult<RoomStatus> {
        let session = self.session(room_id)?;
        let _guard = session.op_lock.lock().await;
        self.teardown(room_id, &session).await
    }

    /// Disconnects and forgets a room.
    pub async fn remove(&self, room_id: &str) -> RoomResult<RoomInfo> {
        let session = self.session(room_id)?;
        let _guard = session.op_lock.lock().await;
        if let Err(err) = self.teardown(room_id, &session).await {
            warn!(room_id = %room_id, error = %err, "Removing room after failed teardown");
        }
        self.sessions.write().remove(room_id);
        info!(room_id = %room_id, "Room removed");
        self.feed.emit(RoomChange::Removed {
            room_id: room_id.to_string(),
        });
        Ok(session.info())
    }

    async fn teardown(&self, room_id: &str, session: &RoomSession) -> RoomResult<RoomStatus> {
        if let Some(task) = session.stop() {
            let abort = task.abort_handle();
            if tokio::time::timeout(self.policy.disconnect_timeout, task)
                .await
                .is_err()
            {
                abort.abort();
                session.settle_disconnected();
                warn!(room_id = %room_id, "Room supervisor did not stop in time, aborted");
                return Err(RoomError::Timeout {
                    room_id: room_id.to_string(),
                    operation: "disconnect",
                });
            }
        }
        Ok(session.settle_disconnected())
    }

    /// Disconnects every room. Sessions are kept.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        info!(rooms = ids.len(), "Shutting down room manager");
        let results =
            futures::future::join_all(ids.iter().map(|id| self.disconnect(id))).await;
        for (id, result) in ids.iter().zip(results) {
            if let Err(err) = result {
                warn!(room_id = %id, error = %err, "Room teardown failed during shutdown");
            }
        }
    }

    /// Sets a room's priority without touching its connection.
    pub async fn set_priority(&self, room_id: &str, priority: i64) -> RoomResult<()> {
        let session = self.session(room_id)?;
        let _guard = session.op_lock.lock().await;
        session.update_metadata(|info| info.priority = priority);
        Ok(())
    }

    /// Sets a room's label without touching its connection.
    pub async fn set_label(&self, room_id: &str, label: impl Into<String>) -> RoomResult<()> {
        let label = label.into();
        let session = self.session(room_id)?;
        let _guard = session.op_lock.lock().await;
        session.update_metadata(|info| info.label = label);
        Ok(())
    }

    // ─── Inspection ──────────────────────────────────────────────────────────

    /// A copy of one room's public fields.
    pub fn status(&self, room_id: &str) -> RoomResult<RoomInfo> {
        self.session(room_id).map(|s| s.info())
    }

    /// Copies of every room's public fields, in room id order.
    pub fn rooms(&self) -> Vec<RoomInfo> {
        self.sessions.read().values().map(|s| s.info()).collect()
    }

    /// An immutable snapshot of all rooms.
    ///
    /// The projection version is the number of room changes so far.
    pub fn list(&self) -> RoomProjection {
        let version = self.feed.version();
        RoomProjection::from_rooms(self.rooms(), version)
    }

    /// Number of known rooms.
    pub fn room_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Subscribes to room change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<RoomChange> {
        self.feed.subscribe()
    }
}

fn validate_room_id(room_id: &str) -> RoomResult<&str> {
    if room_id.trim().is_empty() {
        return Err(RoomError::InvalidArgument(
            "room id must not be empty".into(),
        ));
    }
    Ok(room_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use livehub_core::{RetryConfig, RoomEvent, SourceError};
    use livehub_transport::ChannelConnector;
    use serde_json::json;
    use tokio::time::sleep;
    use tokio_test::{assert_err, assert_ok};

    fn policy() -> SessionPolicy {
        SessionPolicy {
            retry: RetryConfig::default()
                .with_delays(Duration::from_secs(1), Duration::from_secs(30))
                .with_jitter(0.0),
            adapter_timeout: Duration::from_secs(2),
            disconnect_timeout: Duration::from_secs(1),
        }
    }

    fn setup() -> (ChannelConnector, Arc<RoomManager>) {
        let feeds = ChannelConnector::new();
        let manager = Arc::new(RoomManager::new(Arc::new(feeds.clone()), policy()));
        (feeds, manager)
    }

    /// Lets spawned supervisors run without crossing a retry delay.
    async fn settle() {
        sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_reaches_connected() {
        let (feeds, manager) = setup();

        assert_eq!(manager.connect("A").await.unwrap(), RoomStatus::Connected);
        let info = manager.status("A").unwrap();
        assert_eq!(info.status, RoomStatus::Connected);
        assert!(info.connected_at.is_some());
        assert_eq!(info.reconnect_attempts, 0);
        assert!(feeds.is_live("A"));
        assert_eq!(feeds.active_sources(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_twice_is_already_connected() {
        let (_feeds, manager) = setup();
        manager.connect("A").await.unwrap();

        let err = manager.connect("A").await.unwrap_err();
        assert_eq!(err.code(), "already_connected");
        assert_eq!(manager.status("A").unwrap().status, RoomStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_are_counted() {
        let (feeds, manager) = setup();
        manager.connect("A").await.unwrap();

        assert!(feeds.push("A", RoomEvent::new("chat", json!({ "text": "hi" }))));
        assert!(feeds.push("A", RoomEvent::new("viewers", json!({})).with_viewers(42)));
        settle().await;

        let info = manager.status("A").unwrap();
        assert_eq!(info.event_count, 2);
        assert!(info.last_event_at.is_some());
        assert_eq!(info.viewers, Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_then_exhaust_retries() {
        let (feeds, manager) = setup();
        manager.connect("A").await.unwrap();
        assert_eq!(manager.status("A").unwrap().reconnect_attempts, 0);

        feeds.fail_next_connects("A", 100);
        assert!(feeds.drop_connection("A"));
        settle().await;

        let info = manager.status("A").unwrap();
        assert_eq!(info.status, RoomStatus::Reconnecting);
        assert_eq!(info.reconnect_attempts, 1);
        assert_eq!(feeds.active_sources(), 0);

        sleep(Duration::from_secs(120)).await;
        let info = manager.status("A").unwrap();
        assert_eq!(info.status, RoomStatus::Failed);
        assert_eq!(info.reconnect_attempts, 5);
        assert_eq!(info.last_error.as_deref(), Some("connection_failed"));
        // First connect plus five retries.
        assert_eq!(feeds.connect_count("A"), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_schedule() {
        let (feeds, manager) = setup();
        manager.connect("A").await.unwrap();
        feeds.fail_next_connects("A", 3);
        feeds.drop_connection("A");
        settle().await;
        assert_eq!(feeds.connect_count("A"), 1);

        // Retries at +1s, then +2s, then +4s after each failure.
        sleep(Duration::from_millis(980)).await;
        assert_eq!(feeds.connect_count("A"), 1);
        sleep(Duration::from_millis(20)).await;
        assert_eq!(feeds.connect_count("A"), 2);

        sleep(Duration::from_millis(1980)).await;
        assert_eq!(feeds.connect_count("A"), 2);
        sleep(Duration::from_millis(20)).await;
        assert_eq!(feeds.connect_count("A"), 3);

        sleep(Duration::from_secs(4)).await;
        assert_eq!(feeds.connect_count("A"), 4);
        let info = manager.status("A").unwrap();
        assert_eq!(info.status, RoomStatus::Connected);
        assert_eq!(info.reconnect_attempts, 0);
        assert!(info.last_error.is_none());

        // After a success the next drop waits the base delay again.
        feeds.drop_connection("A");
        settle().await;
        sleep(Duration::from_secs(1)).await;
        assert_eq!(feeds.connect_count("A"), 5);
        assert_eq!(manager.status("A").unwrap().status, RoomStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_failure_reports_code() {
        let (feeds, manager) = setup();
        feeds.queue_connect_errors(
            "A",
            [SourceError::AuthRejected {
                reason: "expired".into(),
            }],
        );

        let err = manager.connect("A").await.unwrap_err();
        assert_eq!(err.code(), "auth_rejected");
        let info = manager.status("A").unwrap();
        assert_eq!(info.status, RoomStatus::Reconnecting);
        assert_eq!(info.reconnect_attempts, 1);
        assert_eq!(info.last_error.as_deref(), Some("auth_rejected"));

        // The retry policy keeps going on its own.
        sleep(Duration::from_secs(2)).await;
        assert_eq!(manager.status("A").unwrap().status, RoomStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adapter_timeout_is_a_failure() {
        let (feeds, manager) = setup();
        feeds.set_connect_delay("A", Some(Duration::from_secs(60)));

        let err = manager.connect("A").await.unwrap_err();
        assert_eq!(err.code(), "timeout");
        assert_eq!(
            manager.status("A").unwrap().status,
            RoomStatus::Reconnecting
        );
        manager.disconnect("A").await.unwrap();
        assert_eq!(feeds.active_sources(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_fails_immediately_then_recovers_explicitly() {
        let feeds = ChannelConnector::new();
        let mut p = policy();
        p.retry = p.retry.with_max_retries(0);
        let manager = RoomManager::new(Arc::new(feeds.clone()), p);

        feeds.fail_next_connects("A", 1);
        let err = manager.connect("A").await.unwrap_err();
        assert_eq!(err.code(), "retries_exhausted");
        assert_eq!(manager.status("A").unwrap().status, RoomStatus::Failed);

        assert_eq!(manager.connect("A").await.unwrap(), RoomStatus::Connected);
        let info = manager.status("A").unwrap();
        assert_eq!(info.event_count, 0);
        assert_eq!(info.reconnect_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent() {
        let (feeds, manager) = setup();
        manager.connect("A").await.unwrap();

        assert_eq!(
            manager.disconnect("A").await.unwrap(),
            RoomStatus::Disconnected
        );
        assert_eq!(feeds.active_sources(), 0);
        assert!(!feeds.is_live("A"));
        assert_eq!(
            manager.disconnect("A").await.unwrap(),
            RoomStatus::Disconnected
        );
        assert_eq!(manager.disconnect("B").await.unwrap_err().code(), "not_found");
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_inflight_connect() {
        let (feeds, manager) = setup();
        feeds.set_connect_delay("A", Some(Duration::from_millis(1500)));

        let m = Arc::clone(&manager);
        let pending = tokio::spawn(async move { m.connect("A").await });
        sleep(Duration::from_millis(500)).await;
        assert_eq!(manager.status("A").unwrap().status, RoomStatus::Connecting);

        // A second connect while connecting is a no-op.
        assert_eq!(manager.connect("A").await.unwrap(), RoomStatus::Connecting);

        manager.disconnect("A").await.unwrap();
        assert_eq!(pending.await.unwrap().unwrap(), RoomStatus::Disconnected);

        // The handshake would have finished by now; it must not resurrect.
        sleep(Duration::from_secs(5)).await;
        assert_eq!(manager.status("A").unwrap().status, RoomStatus::Disconnected);
        assert_eq!(feeds.active_sources(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_stops_retrying() {
        let (feeds, manager) = setup();
        manager.connect("A").await.unwrap();
        feeds.fail_next_connects("A", 100);
        feeds.drop_connection("A");
        settle().await;

        manager.disconnect("A").await.unwrap();
        let count = feeds.connect_count("A");
        sleep(Duration::from_secs(60)).await;
        assert_eq!(feeds.connect_count("A"), count);
        let info = manager.status("A").unwrap();
        assert_eq!(info.status, RoomStatus::Disconnected);
        // Counters are preserved until the session is removed.
        assert_eq!(info.reconnect_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_from_scratch_resets_event_count() {
        let (feeds, manager) = setup();
        manager.connect("A").await.unwrap();
        feeds.push("A", RoomEvent::new("chat", json!({})));
        settle().await;
        manager.disconnect("A").await.unwrap();
        assert_eq!(manager.status("A").unwrap().event_count, 1);

        manager.connect("A").await.unwrap();
        assert_eq!(manager.status("A").unwrap().event_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_metadata_does_not_touch_connection() {
        let (feeds, manager) = setup();
        manager.connect("A").await.unwrap();
        feeds.push("A", RoomEvent::new("chat", json!({})));
        settle().await;
        let before = manager.status("A").unwrap();

        assert_ok!(manager.set_priority("A", 9).await);
        assert_ok!(manager.set_label("A", "Main stage").await);

        let after = manager.status("A").unwrap();
        assert_eq!(after.priority, 9);
        assert_eq!(after.label, "Main stage");
        assert_eq!(after.status, before.status);
        assert_eq!(after.event_count, before.event_count);
        assert_eq!(after.connected_at, before.connected_at);
        assert_eq!(after.last_event_at, before.last_event_at);

        let err = assert_err!(manager.set_priority("nope", 1).await);
        assert_eq!(err.code(), "not_found");
        assert_err!(manager.set_label("nope", "x").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_counts_live_rooms() {
        let (_feeds, manager) = setup();
        let empty = manager.list();
        assert!(empty.rooms.is_empty());
        assert_eq!(serde_json::to_value(&empty).unwrap()["rooms"], json!([]));

        manager.connect("A").await.unwrap();
        manager.register("B").unwrap();
        let snapshot = manager.list();
        assert_eq!(snapshot.rooms.len(), 2);
        assert_eq!(snapshot.live_rooms_count, 1);

        // Snapshots are copies.
        manager.disconnect("A").await.unwrap();
        assert_eq!(snapshot.live_rooms_count, 1);
        assert_eq!(manager.list().live_rooms_count, 0);
        assert!(manager.list().version > snapshot.version);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_forgets_room() {
        let (feeds, manager) = setup();
        let mut changes = manager.subscribe();
        manager.connect("A").await.unwrap();

        let info = manager.remove("A").await.unwrap();
        assert_eq!(info.status, RoomStatus::Disconnected);
        assert_eq!(manager.status("A").unwrap_err().code(), "not_found");
        assert_eq!(manager.room_count(), 0);
        assert_eq!(feeds.active_sources(), 0);

        let mut saw_removed = false;
        while let Ok(change) = changes.try_recv() {
            saw_removed |= matches!(change, RoomChange::Removed { .. });
        }
        assert!(saw_removed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_disconnects_everything() {
        let (feeds, manager) = setup();
        for id in ["A", "B", "C"] {
            manager.connect(id).await.unwrap();
        }
        assert_eq!(feeds.active_sources(), 3);

        manager.shutdown().await;
        assert_eq!(feeds.active_sources(), 0);
        assert!(
            manager
                .rooms()
                .iter()
                .all(|r| r.status == RoomStatus::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_empty_room_id_rejected() {
        let (_feeds, manager) = setup();
        let err = manager.connect("  ").await.unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rooms_connect_concurrently() {
        let (feeds, manager) = setup();
        let ids: Vec<String> = (0..16).map(|i| format!("room-{i}")).collect();
        let results =
            futures::future::join_all(ids.iter().map(|id| manager.connect(id))).await;
        assert!(results.iter().all(|r| matches!(r, Ok(RoomStatus::Connected))));
        assert_eq!(feeds.active_sources(), 16);
        manager.shutdown().await;
        assert_eq!(feeds.active_sources(), 0);
    }
}
