//! Plugin manifest parsing and validation.
//!
//! Every installed package carries a `manifest.json`:
//!
//! ```json
//! {
//!   "id": "viewer-stats",
//!   "name": "Viewer Stats",
//!   "version": "1.2.0",
//!   "entry": "viewer-stats",
//!   "capabilities": ["room-state", "window"]
//! }
//! ```

use serde::{Deserialize, Serialize};

use livehub_core::{PluginError, PluginResult};

/// File name of a package manifest.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Capabilities a plugin may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// Receives individual `room-event` envelopes.
    RoomEvents,
    /// Receives `room-state` projection updates.
    RoomState,
    /// Renders popup windows.
    Window,
}

/// A parsed plugin manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Unique plugin id.
    pub id: String,
    /// Human label.
    pub name: String,
    /// Plugin version, `MAJOR.MINOR.PATCH`.
    pub version: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Name of the linked entry implementing the plugin.
    pub entry: String,
    /// Declared capabilities.
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

impl PluginManifest {
    /// Creates a manifest whose id, label, and entry all equal `id`.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            entry: id.clone(),
            id,
            version: "0.1.0".into(),
            description: None,
            capabilities: Vec::new(),
        }
    }

    /// Adds a capability.
    pub fn with_capability(mut self, capability: Capability) -> Self {
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }

    /// Parses and validates a manifest from JSON.
    pub fn parse(json: &str) -> PluginResult<Self> {
        let manifest: PluginManifest = serde_json::from_str(json)
            .map_err(|e| PluginError::invalid("manifest", format!("parse error: {e}")))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Validates all fields.
    pub fn validate(&self) -> PluginResult<()> {
        validate_plugin_id(&self.id)?;
        if self.name.trim().is_empty() {
            return Err(PluginError::invalid(&self.id, "name must not be empty"));
        }
        validate_version(&self.id, &self.version)?;
        if self.entry.trim().is_empty() {
            return Err(PluginError::invalid(&self.id, "entry must not be empty"));
        }
        Ok(())
    }

    /// Returns true if the manifest declares `capability`.
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

// ─── Validation helpers ───────────────────────────────────────────────────────

/// Validates a plugin id against `^[a-z][a-z0-9-]{1,63}$`.
pub fn validate_plugin_id(id: &str) -> PluginResult<()> {
    let len = id.len();
    if !(2..=64).contains(&len) {
        return Err(PluginError::invalid(
            id,
            format!("plugin id must be 2-64 characters, got {len}"),
        ));
    }

    let mut chars = id.chars();
    if let Some(first) = chars.next()
        && !first.is_ascii_lowercase()
    {
        return Err(PluginError::invalid(
            id,
            format!("plugin id must start with a lowercase letter, got '{first}'"),
        ));
    }
    for ch in chars {
        if !ch.is_ascii_lowercase() && !ch.is_ascii_digit() && ch != '-' {
            return Err(PluginError::invalid(
                id,
                format!("plugin id contains invalid character '{ch}'"),
            ));
        }
    }
    Ok(())
}

fn validate_version(id: &str, version: &str) -> PluginResult<()> {
    let parts: Vec<&str> = version.split('.').collect();
    let numeric = parts
        .iter()
        .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    if parts.len() != 3 || !numeric {
        return Err(PluginError::invalid(
            id,
            format!("version is not MAJOR.MINOR.PATCH: '{version}'"),
        ));
    }
    Ok(())
}
