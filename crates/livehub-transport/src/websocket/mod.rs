//! WebSocket event source.

mod client;

pub use client::{WsConnector, WsSource};
