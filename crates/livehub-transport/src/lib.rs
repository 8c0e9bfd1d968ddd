//! # Livehub Transport
//!
//! Event source implementations for the Livehub room monitor.
//!
//! This crate provides concrete [`SourceConnector`]s for the contract defined
//! in `livehub-core`. Retry and backoff are not handled here; a source only
//! reports connects, events, drops, and failures.
//!
//! ## Features
//!
//! - `ws-client`: WebSocket client feeds ([`WsConnector`])
//! - `full`: all sources
//!
//! ## Sources
//!
//! | Connector | Description | Use Case |
//! |-----------|-------------|----------|
//! | [`ChannelConnector`] | In-process feed driven by a handle | Simulation, tests |
//! | `WsConnector` | WebSocket client, one URL per room | Real feeds |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use livehub_transport::ChannelConnector;
//!
//! let feeds = ChannelConnector::new();
//! let manager = RoomManager::new(Arc::new(feeds.clone()), RoomsConfig::default());
//! manager.connect("lobby").await?;
//! feeds.push("lobby", RoomEvent::new("chat", json!({"text": "hi"})));
//! ```
//!
//! [`SourceConnector`]: livehub_core::SourceConnector

pub mod channel;

#[cfg(feature = "ws-client")]
pub mod websocket;

pub use channel::{ChannelConnector, ChannelSource};

#[cfg(feature = "ws-client")]
pub use websocket::{WsConnector, WsSource};
