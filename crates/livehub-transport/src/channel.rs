//! In-process event source driven through a handle.
//!
//! [`ChannelConnector`] creates sources whose events are pushed by the host
//! program rather than read from a network. It backs simulated feeds and is
//! the controllable adapter used throughout the test suites: a test can push
//! events, drop a live connection, script connect failures, or slow down the
//! handshake, and can observe how many sources are currently connected.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use livehub_core::{
    BoxedEventSource, EventSource, RoomEvent, SourceConnector, SourceError, SourceResult,
};

enum FeedItem {
    Event(RoomEvent),
    Fail(SourceError),
    Hangup,
}

#[derive(Default)]
struct RoomFeed {
    live: Option<mpsc::UnboundedSender<FeedItem>>,
    pending_failures: Vec<SourceError>,
    connect_delay: Option<Duration>,
    connects: u64,
}

#[derive(Default)]
struct Shared {
    rooms: Mutex<HashMap<String, RoomFeed>>,
    active: AtomicUsize,
}

/// Connector for in-process, handle-driven room feeds.
///
/// Cloning is cheap; all clones control the same feeds.
#[derive(Clone, Default)]
pub struct ChannelConnector {
    shared: Arc<Shared>,
}

impl ChannelConnector {
    /// Creates a connector with no scripted behavior.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers an event to the live connection of `room_id`.
    ///
    /// Returns false if the room has no live connection.
    pub fn push(&self, room_id: &str, event: RoomEvent) -> bool {
        self.send(room_id, FeedItem::Event(event))
    }

    /// Ends the live connection of `room_id` as if the feed went away.
    pub fn drop_connection(&self, room_id: &str) -> bool {
        self.send(room_id, FeedItem::Hangup)
    }

    /// Fails the live connection of `room_id` with `error`.
    pub fn fail_connection(&self, room_id: &str, error: SourceError) -> bool {
        self.send(room_id, FeedItem::Fail(error))
    }

    /// Makes the next `count` connect attempts for `room_id` fail.
    pub fn fail_next_connects(&self, room_id: &str, count: usize) {
        let err = SourceError::connection_failed("feed unavailable");
        self.queue_connect_errors(room_id, std::iter::repeat_n(err, count));
    }

    /// Makes the next connect attempts for `room_id` fail with the given errors,
    /// in order.
    pub fn queue_connect_errors(
        &self,
        room_id: &str,
        errors: impl IntoIterator<Item = SourceError>,
    ) {
        let mut rooms = self.shared.rooms.lock();
        let feed = rooms.entry(room_id.to_string()).or_default();
        feed.pending_failures.extend(errors);
    }

    /// Delays every connect handshake for `room_id`.
    pub fn set_connect_delay(&self, room_id: &str, delay: Option<Duration>) {
        self.shared
            .rooms
            .lock()
            .entry(room_id.to_string())
            .or_default()
            .connect_delay = delay;
    }

    /// Returns true if `room_id` has a live connection.
    pub fn is_live(&self, room_id: &str) -> bool {
        self.shared
            .rooms
            .lock()
            .get(room_id)
            .and_then(|f| f.live.as_ref())
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Number of connect attempts made for `room_id`.
    pub fn connect_count(&self, room_id: &str) -> u64 {
        self.shared
            .rooms
            .lock()
            .get(room_id)
            .map_or(0, |f| f.connects)
    }

    /// Number of sources currently holding a connection.
    pub fn active_sources(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    fn send(&self, room_id: &str, item: FeedItem) -> bool {
        let rooms = self.shared.rooms.lock();
        match rooms.get(room_id).and_then(|f| f.live.as_ref()) {
            Some(tx) => tx.send(item).is_ok(),
            None => false,
        }
    }
}

impl SourceConnector for ChannelConnector {
    fn name(&self) -> &str {
        "channel"
    }

    fn create(&self, room_id: &str) -> BoxedEventSource {
        Box::new(ChannelSource {
            room_id: room_id.to_string(),
            shared: Arc::clone(&self.shared),
            rx: None,
        })
    }
}

/// A source created by [`ChannelConnector`].
pub struct ChannelSource {
    room_id: String,
    shared: Arc<Shared>,
    rx: Option<mpsc::UnboundedReceiver<FeedItem>>,
}

impl ChannelSource {
    fn release(&mut self) {
        if self.rx.take().is_some() {
            self.shared.active.fetch_sub(1, Ordering::SeqCst);
            let mut rooms = self.shared.rooms.lock();
            if let Some(feed) = rooms.get_mut(&self.room_id)
                && feed.live.as_ref().is_some_and(|tx| tx.is_closed())
            {
                feed.live = None;
            }
        }
    }
}

#[async_trait]
impl EventSource for ChannelSource {
    async fn connect(&mut self) -> SourceResult<()> {
        let delay = {
            let mut rooms = self.shared.rooms.lock();
            let feed = rooms.entry(self.room_id.clone()).or_default();
            feed.connects += 1;
            if !feed.pending_failures.is_empty() {
                let err = feed.pending_failures.remove(0);
                debug!(room_id = %self.room_id, error = %err, "Scripted connect failure");
                return Err(err);
            }
            feed.connect_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.release();
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared
            .rooms
            .lock()
            .entry(self.room_id.clone())
            .or_default()
            .live = Some(tx);
        self.rx = Some(rx);
        self.shared.active.fetch_add(1, Ordering::SeqCst);
        trace!(room_id = %self.room_id, "Channel source connected");
        Ok(())
    }

    async fn next_event(&mut self) -> Option<SourceResult<RoomEvent>> {
        let rx = self.rx.as_mut()?;
        match rx.recv().await {
            Some(FeedItem::Event(event)) => Some(Ok(event)),
            Some(FeedItem::Fail(err)) => Some(Err(err)),
            Some(FeedItem::Hangup) | None => None,
        }
    }

    async fn disconnect(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            rx.close();
        }
        self.release();
    }
}

impl Drop for ChannelSource {
    fn drop(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            rx.close();
        }
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_push_and_drop() {
        let connector = ChannelConnector::new();
        let mut source = connector.create("A");
        assert!(!connector.push("A", RoomEvent::new("chat", json!("hi"))));

        source.connect().await.unwrap();
        assert!(connector.is_live("A"));
        assert_eq!(connector.active_sources(), 1);

        assert!(connector.push("A", RoomEvent::new("chat", json!("hi")).with_viewers(3)));
        let event = source.next_event().await.unwrap().unwrap();
        assert_eq!(event.kind, "chat");
        assert_eq!(event.viewers, Some(3));

        assert!(connector.drop_connection("A"));
        assert!(source.next_event().await.is_none());

        source.disconnect().await;
        assert_eq!(connector.active_sources(), 0);
        assert!(!connector.is_live("A"));
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let connector = ChannelConnector::new();
        connector.fail_next_connects("A", 2);
        let mut source = connector.create("A");
        assert!(source.connect().await.is_err());
        assert!(source.connect().await.is_err());
        assert!(source.connect().await.is_ok());
        assert_eq!(connector.connect_count("A"), 3);

        connector.fail_connection("A", SourceError::closed("kicked"));
        let err = source.next_event().await.unwrap().unwrap_err();
        assert_eq!(err.code(), "connection_closed");
    }

    #[tokio::test]
    async fn test_drop_releases_active_count() {
        let connector = ChannelConnector::new();
        {
            let mut source = connector.create("A");
            source.connect().await.unwrap();
            assert_eq!(connector.active_sources(), 1);
        }
        assert_eq!(connector.active_sources(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_delay() {
        let connector = ChannelConnector::new();
        connector.set_connect_delay("A", Some(Duration::from_secs(5)));
        let mut source = connector.create("A");
        let started = tokio::time::Instant::now();
        source.connect().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
    }
}
