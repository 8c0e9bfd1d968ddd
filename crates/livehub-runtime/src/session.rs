//! Room sessions and their reconnect supervisors.
//!
//! A [`RoomSession`] holds the public [`RoomInfo`] of one room plus the
//! handle of at most one supervisor task. The supervisor owns the adapter:
//! it connects, pumps events, and on a drop or failure walks the retry
//! policy until it reconnects or gives up.
//!
//! Every supervisor is stamped with the session's generation at spawn time.
//! Tearing a session down bumps the generation and cancels the token, so a
//! supervisor that wakes up late (a connect that succeeds after the operator
//! already disconnected) finds itself stale and exits without touching state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, trace, warn};

use livehub_core::{
    BoxedConnector, BoxedEventSource, RetryConfig, RoomChange, RoomError, RoomEvent, RoomInfo,
    RoomResult, RoomStatus, SourceError, unix_ms_now,
};

/// Capacity of the room change broadcast.
pub const CHANGE_CAPACITY: usize = 1024;

/// Timing policy shared by every session of a manager.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    /// Reconnect policy.
    pub retry: RetryConfig,
    /// Bound for one adapter `connect` or `disconnect`.
    pub adapter_timeout: Duration,
    /// Bound for waiting on a supervisor during teardown.
    pub disconnect_timeout: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            adapter_timeout: Duration::from_secs(10),
            disconnect_timeout: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// Change feed
// =============================================================================

/// Broadcast of room changes, with a sequence number bumped on every change.
pub(crate) struct ChangeFeed {
    tx: broadcast::Sender<RoomChange>,
    version: AtomicU64,
}

impl ChangeFeed {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            tx,
            version: AtomicU64::new(0),
        }
    }

    pub(crate) fn emit(&self, change: RoomChange) {
        self.version.fetch_add(1, Ordering::SeqCst);
        // No subscribers is fine.
        let _ = self.tx.send(change);
    }

    pub(crate) fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<RoomChange> {
        self.tx.subscribe()
    }
}

// =============================================================================
// RoomSession
// =============================================================================

struct SessionState {
    info: RoomInfo,
    generation: u64,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

/// Result of asking a session to start connecting.
pub(crate) enum StartOutcome {
    AlreadyConnected,
    InFlight(RoomStatus),
    Started(oneshot::Receiver<RoomResult<RoomStatus>>),
}

/// One monitored room.
pub(crate) struct RoomSession {
    room_id: String,
    state: Mutex<SessionState>,
    feed: Arc<ChangeFeed>,
    /// Serializes mutating operations on this room.
    pub(crate) op_lock: tokio::sync::Mutex<()>,
}

impl RoomSession {
    pub(crate) fn new(room_id: &str, feed: Arc<ChangeFeed>) -> Self {
        Self {
            room_id: room_id.to_string(),
            state: Mutex::new(SessionState {
                info: RoomInfo::idle(room_id),
                generation: 0,
                cancel: None,
                task: None,
            }),
            feed,
            op_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub(crate) fn info(&self) -> RoomInfo {
        self.state.lock().info.clone()
    }

    pub(crate) fn status(&self) -> RoomStatus {
        self.state.lock().info.status
    }

    /// Changes priority or label. Never touches connection fields.
    pub(crate) fn update_metadata(&self, apply: impl FnOnce(&mut RoomInfo)) {
        apply(&mut self.state.lock().info);
        self.feed.emit(RoomChange::Metadata {
            room_id: self.room_id.clone(),
        });
    }

    /// Starts a fresh supervisor unless one is already running.
    ///
    /// The caller holds `op_lock`.
    pub(crate) fn start(
        self: &Arc<Self>,
        connector: &BoxedConnector,
        policy: &SessionPolicy,
    ) -> StartOutcome {
        let rx = {
            let mut st = self.state.lock();
            match st.info.status {
                RoomStatus::Connected => return StartOutcome::AlreadyConnected,
                status if status.is_in_flight() => return StartOutcome::InFlight(status),
                _ => {}
            }

            st.generation += 1;
            if let Some(stale) = st.cancel.take() {
                stale.cancel();
            }
            st.info.status = RoomStatus::Connecting;
            st.info.event_count = 0;
            st.info.reconnect_attempts = 0;
            st.info.last_error = None;

            let cancel = CancellationToken::new();
            let (tx, rx) = oneshot::channel();
            let supervisor = Supervisor {
                session: Arc::clone(self),
                connector: Arc::clone(connector),
                policy: policy.clone(),
                generation: st.generation,
                cancel: cancel.clone(),
            };
            let span = info_span!("room", room_id = %self.room_id);
            st.task = Some(tokio::spawn(supervisor.run(tx).instrument(span)));
            st.cancel = Some(cancel);
            rx
        };

        debug!(room_id = %self.room_id, connector = connector.name(), "Connecting room");
        self.emit_status(RoomStatus::Connecting);
        StartOutcome::Started(rx)
    }

    /// Invalidates the running supervisor and returns its task.
    ///
    /// The caller holds `op_lock` and awaits the task before calling
    /// [`settle_disconnected`](Self::settle_disconnected).
    pub(crate) fn stop(&self) -> Option<JoinHandle<()>> {
        let mut st = self.state.lock();
        st.generation += 1;
        if let Some(cancel) = st.cancel.take() {
            cancel.cancel();
        }
        st.task.take()
    }

    /// Marks the session `Disconnected`. An `Idle` session stays `Idle`.
    pub(crate) fn settle_disconnected(&self) -> RoomStatus {
        let changed = {
            let mut st = self.state.lock();
            match st.info.status {
                RoomStatus::Idle => return RoomStatus::Idle,
                RoomStatus::Disconnected => false,
                _ => {
                    st.info.status = RoomStatus::Disconnected;
                    true
                }
            }
        };
        if changed {
            info!(room_id = %self.room_id, "Room disconnected");
            self.emit_status(RoomStatus::Disconnected);
        }
        RoomStatus::Disconnected
    }

    fn emit_status(&self, status: RoomStatus) {
        self.feed.emit(RoomChange::Status {
            room_id: self.room_id.clone(),
            status,
        });
    }
}

// =============================================================================
// Supervisor
// =============================================================================

enum Ending {
    Cancelled,
    Dropped,
    Failed(SourceError),
}

enum Next {
    Retry(u32),
    GaveUp(u32),
    Stale,
}

struct Supervisor {
    session: Arc<RoomSession>,
    connector: BoxedConnector,
    policy: SessionPolicy,
    generation: u64,
    cancel: CancellationToken,
}

impl Supervisor {
    fn room_id(&self) -> &str {
        &self.session.room_id
    }

    async fn run(self, first: oneshot::Sender<RoomResult<RoomStatus>>) {
        let mut first = Some(first);
        loop {
            let mut source = self.connector.create(self.room_id());
            let attempt = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                res = tokio::time::timeout(self.policy.adapter_timeout, source.connect()) => res,
            };

            let (failure, next) = match attempt {
                Ok(Ok(())) => {
                    if !self.mark_connected() {
                        self.close(&mut source).await;
                        return;
                    }
                    if let Some(tx) = first.take() {
                        let _ = tx.send(Ok(RoomStatus::Connected));
                    }
                    let failure = match self.pump(&mut source).await {
                        Ending::Cancelled => {
                            self.close(&mut source).await;
                            return;
                        }
                        Ending::Dropped => {
                            info!(room_id = %self.room_id(), "Room feed ended");
                            None
                        }
                        Ending::Failed(err) => {
                            warn!(room_id = %self.room_id(), error = %err, "Room feed failed");
                            Some(err)
                        }
                    };
                    // The feed is gone; leave Connected before a slow adapter close.
                    let next = self.record_failure(failure.as_ref());
                    self.close(&mut source).await;
                    (failure, next)
                }
                Ok(Err(err)) => {
                    warn!(room_id = %self.room_id(), error = %err, "Connect attempt failed");
                    let next = self.record_failure(Some(&err));
                    (Some(err), next)
                }
                Err(_) => {
                    let err = SourceError::Timeout {
                        millis: self.policy.adapter_timeout.as_millis() as u64,
                    };
                    warn!(room_id = %self.room_id(), error = %err, "Connect attempt timed out");
                    let next = self.record_failure(Some(&err));
                    (Some(err), next)
                }
            };
            drop(source);

            match next {
                Next::Retry(attempt) => {
                    if let (Some(tx), Some(err)) = (first.take(), failure) {
                        let _ = tx.send(Err(RoomError::Adapter {
                            room_id: self.room_id().to_string(),
                            source: err,
                        }));
                    }
                    let delay = self.policy.retry.jittered_delay(attempt);
                    debug!(room_id = %self.room_id(), attempt, ?delay, "Scheduling reconnect");
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => return,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Next::GaveUp(attempts) => {
                    warn!(room_id = %self.room_id(), attempts, "Retries exhausted, room failed");
                    if let Some(tx) = first.take() {
                        let _ = tx.send(Err(RoomError::RetriesExhausted {
                            room_id: self.room_id().to_string(),
                            attempts,
                        }));
                    }
                    return;
                }
                Next::Stale => return,
            }
        }
    }

    async fn pump(&self, source: &mut BoxedEventSource) -> Ending {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ending::Cancelled,
                item = source.next_event() => match item {
                    Some(Ok(event)) => self.record_event(event),
                    Some(Err(err)) => return Ending::Failed(err),
                    None => return Ending::Dropped,
                },
            }
        }
    }

    async fn close(&self, source: &mut BoxedEventSource) {
        if tokio::time::timeout(self.policy.adapter_timeout, source.disconnect())
            .await
            .is_err()
        {
            warn!(room_id = %self.room_id(), "Adapter disconnect timed out");
        }
    }

    fn mark_connected(&self) -> bool {
        {
            let mut st = self.session.state.lock();
            if st.generation != self.generation {
                return false;
            }
            st.info.status = RoomStatus::Connected;
            st.info.connected_at = Some(unix_ms_now());
            st.info.reconnect_attempts = 0;
            st.info.last_error = None;
        }
        info!(room_id = %self.room_id(), "Room connected");
        self.session.emit_status(RoomStatus::Connected);
        true
    }

    fn record_event(&self, event: RoomEvent) {
        {
            let mut st = self.session.state.lock();
            if st.generation != self.generation || st.info.status != RoomStatus::Connected {
                return;
            }
            st.info.event_count += 1;
            st.info.last_event_at = Some(unix_ms_now());
            if let Some(viewers) = event.viewers {
                st.info.viewers = Some(viewers);
            }
        }
        trace!(room_id = %self.room_id(), kind = %event.kind, "Room event");
        self.session.feed.emit(RoomChange::Event {
            room_id: self.room_id().to_string(),
            event,
        });
    }

    fn record_failure(&self, err: Option<&SourceError>) -> Next {
        let (next, status) = {
            let mut st = self.session.state.lock();
            if st.generation != self.generation {
                return Next::Stale;
            }
            if let Some(err) = err {
                st.info.last_error = Some(err.code().to_string());
            }
            let attempts = st.info.reconnect_attempts;
            if self.policy.retry.allows_retry(attempts) {
                st.info.reconnect_attempts = attempts + 1;
                st.info.status = RoomStatus::Reconnecting;
                (Next::Retry(attempts + 1), RoomStatus::Reconnecting)
            } else {
                st.info.status = RoomStatus::Failed;
                (Next::GaveUp(attempts), RoomStatus::Failed)
            }
        };
        self.session.emit_status(status);
        next
    }
}
