//! WebSocket client event source.
//!
//! Each room maps to one WebSocket URL built from a template, e.g.
//! `wss://feed.example.com/rooms/{room}`. Text and binary frames are parsed as
//! JSON [`RoomEvent`]s. Reconnection is not handled here: a closed stream is
//! reported as a drop and the room session decides whether to retry.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{info, trace, warn};

use livehub_core::{
    BoxedEventSource, EventSource, RoomEvent, SourceConnector, SourceError, SourceResult,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Placeholder replaced by the room id in URL templates.
pub const ROOM_PLACEHOLDER: &str = "{room}";

/// Connector creating one WebSocket source per room.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url_template: String,
}

impl WsConnector {
    /// Creates a connector from a URL template containing `{room}`.
    pub fn new(url_template: impl Into<String>) -> Result<Self, SourceError> {
        let url_template = url_template.into();
        if !(url_template.starts_with("ws://") || url_template.starts_with("wss://")) {
            return Err(SourceError::InvalidConfig(format!(
                "WebSocket URL must start with ws:// or wss://: {url_template}"
            )));
        }
        if !url_template.contains(ROOM_PLACEHOLDER) {
            return Err(SourceError::InvalidConfig(format!(
                "WebSocket URL template has no {ROOM_PLACEHOLDER} placeholder: {url_template}"
            )));
        }
        Ok(Self { url_template })
    }

    /// Returns the URL for `room_id`.
    pub fn url_for(&self, room_id: &str) -> String {
        self.url_template.replace(ROOM_PLACEHOLDER, room_id)
    }
}

impl SourceConnector for WsConnector {
    fn name(&self) -> &str {
        "ws-client"
    }

    fn create(&self, room_id: &str) -> BoxedEventSource {
        Box::new(WsSource {
            room_id: room_id.to_string(),
            url: self.url_for(room_id),
            stream: None,
        })
    }
}

/// One WebSocket connection to a room feed.
pub struct WsSource {
    room_id: String,
    url: String,
    stream: Option<WsStream>,
}

impl WsSource {
    fn parse(&self, bytes: &[u8]) -> Option<RoomEvent> {
        match serde_json::from_slice::<RoomEvent>(bytes) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(room_id = %self.room_id, error = %e, "Skipping malformed frame");
                None
            }
        }
    }
}

#[async_trait]
impl EventSource for WsSource {
    async fn connect(&mut self) -> SourceResult<()> {
        info!(room_id = %self.room_id, url = %self.url, "Connecting to WebSocket feed");
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| SourceError::connection_failed(format!("{}: {e}", self.url)))?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn next_event(&mut self) -> Option<SourceResult<RoomEvent>> {
        loop {
            let msg = self.stream.as_mut()?.next().await;
            match msg {
                Some(Ok(Message::Text(text))) => {
                    trace!(room_id = %self.room_id, len = text.len(), "Received text");
                    if let Some(event) = self.parse(text.as_bytes()) {
                        return Some(Ok(event));
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    trace!(room_id = %self.room_id, len = data.len(), "Received binary");
                    if let Some(event) = self.parse(&data) {
                        return Some(Ok(event));
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    trace!(room_id = %self.room_id, "Received ping, sending pong");
                    if let Some(stream) = self.stream.as_mut() {
                        let _ = stream.send(Message::Pong(data)).await;
                    }
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    info!(room_id = %self.room_id, "WebSocket feed closed");
                    self.stream = None;
                    return None;
                }
                Some(Err(e)) => {
                    warn!(room_id = %self.room_id, error = %e, "WebSocket error");
                    self.stream = None;
                    return Some(Err(SourceError::closed(e.to_string())));
                }
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_template() {
        let connector = WsConnector::new("wss://feed.example.com/rooms/{room}").unwrap();
        assert_eq!(connector.url_for("42"), "wss://feed.example.com/rooms/42");
    }

    #[test]
    fn test_rejects_bad_templates() {
        assert!(WsConnector::new("http://feed/{room}").is_err());
        assert!(WsConnector::new("ws://feed/rooms").is_err());
    }
}
