//! # Livehub
//!
//! Watches many live rooms at once and feeds what it sees to plugins.
//!
//! ## Overview
//!
//! Livehub keeps one supervised session per room. Each session connects
//! through an event source, counts events, and reconnects with exponential
//! backoff when the feed drops. A read-only projection of every room is
//! pushed to plugins, which run behind a message bridge and can only
//! answer messages and receive envelopes.
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ EventSource │────▶│ RoomManager  │────▶│  Publisher  │────▶│ PluginHost  │──▶ popups
//! │ (per room)  │     │ (supervisor) │     │ (projection)│     │  (bridge)   │
//! └─────────────┘     └──────────────┘     └─────────────┘     └─────────────┘
//!                            ▲                                        ▲
//!                            └────────────  ControlSurface  ──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use livehub::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = LivehubRuntime::new()?;
//!     let control = runtime.control();
//!     runtime.start().await?;
//!     control.room_connect("lobby").await;
//!     runtime.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: load `livehub.toml` (default)
//! - `yaml-config`: load `livehub.yaml`
//! - `json-log`: JSON log output
//! - `ws-client`: WebSocket event sources

pub use livehub_core as core;
pub use livehub_plugin as plugin;
pub use livehub_runtime as runtime;
pub use livehub_transport as transport;

/// Prelude module for convenient imports.
pub mod prelude {
    // Runtime - main entry point
    pub use livehub_runtime::{ControlSurface, LivehubConfig, LivehubRuntime, RoomManager};

    // Rooms
    pub use livehub_core::{RoomEvent, RoomInfo, RoomProjection, RoomStatus};

    // Plugins
    pub use livehub_core::{DispatchOutcome, HookOutcome, InitContext, PluginModule};
    pub use livehub_plugin::{
        Capability, PluginCandidate, PluginEntry, PluginHost, PluginManifest, PluginRegistry,
    };

    // Sources
    pub use livehub_core::{EventSource, SourceConnector};
    pub use livehub_transport::ChannelConnector;
}
