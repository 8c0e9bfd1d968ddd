//! Event source abstraction.
//!
//! An [`EventSource`] is the adapter that physically reaches one room's live
//! feed. The room manager never talks to a feed directly: it asks a
//! [`SourceConnector`] for a fresh source per connection attempt and drives
//! it through `connect` → `next_event`* → `disconnect`.
//!
//! ```rust,ignore
//! struct MyConnector;
//!
//! impl SourceConnector for MyConnector {
//!     fn name(&self) -> &str { "my-feed" }
//!
//!     fn create(&self, room_id: &str) -> BoxedEventSource {
//!         Box::new(MySource::new(room_id))
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SourceResult;
use crate::room::RoomEvent;

/// One connection to one room feed.
///
/// Implementations do not need to be cancellation-aware: the caller wraps
/// every call in a timeout and may drop an in-flight future at any time.
#[async_trait]
pub trait EventSource: Send {
    /// Performs the handshake with the feed.
    async fn connect(&mut self) -> SourceResult<()>;

    /// Waits for the next event.
    ///
    /// `None` means the feed ended (a drop); `Some(Err(_))` is a terminal
    /// failure of this connection. Both make the session reconnect.
    async fn next_event(&mut self) -> Option<SourceResult<RoomEvent>>;

    /// Closes the connection. Must be safe to call in any state.
    async fn disconnect(&mut self);
}

/// A boxed event source.
pub type BoxedEventSource = Box<dyn EventSource>;

/// Factory that creates an [`EventSource`] for a room.
pub trait SourceConnector: Send + Sync {
    /// Returns the connector name, used in logs.
    fn name(&self) -> &str;

    /// Creates a new, unconnected source for `room_id`.
    fn create(&self, room_id: &str) -> BoxedEventSource;
}

/// A shared connector handle.
pub type BoxedConnector = Arc<dyn SourceConnector>;
