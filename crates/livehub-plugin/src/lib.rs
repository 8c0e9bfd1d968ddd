//! # Livehub Plugin
//!
//! Plugin registry, lifecycle supervision, and the secure message bridge.
//!
//! ## Architecture
//!
//! ```text
//!   manifest.json ──► PluginRegistry ──► PluginCandidate ──► PluginHost
//!                      (linked entries)    (validated)          │
//!                                                               ▼
//!                                         PluginInstance ◄── Mailbox (bridge)
//!                                          │  hooks              │ envelopes
//!                                          ▼                     ▼
//!                                     handle_message        popup channels
//! ```
//!
//! - [`PluginRegistry`] resolves manifests to linked [`PluginEntry`]s and
//!   scans plugin directories.
//! - [`PluginInstance`] supervises one plugin's lifecycle.
//! - [`Mailbox`] delivers envelopes to one plugin in order.
//! - [`PluginHost`] orchestrates all of the above.

pub mod bridge;
pub mod host;
pub mod instance;
pub mod manifest;
pub mod registry;

pub use bridge::Mailbox;
pub use host::{HostConfig, PING, PluginHost, PopupHandle};
pub use instance::{HookTimeouts, PluginInfo, PluginInstance};
pub use manifest::{Capability, MANIFEST_FILE, PluginManifest};
pub use registry::{
    DiscoveryReport, LIVEHUB_PLUGIN_API_VERSION, PLUGIN_ENTRIES, PluginCandidate, PluginEntry,
    PluginRegistry,
};

pub use linkme;
