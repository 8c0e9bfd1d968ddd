//! Plugin registry and package discovery.
//!
//! Plugin code is linked into the host. Each implementation contributes a
//! [`PluginEntry`], either to the [`PLUGIN_ENTRIES`] distributed slice:
//!
//! ```rust,ignore
//! #[linkme::distributed_slice(livehub_plugin::PLUGIN_ENTRIES)]
//! static STATS: PluginEntry = PluginEntry::new("viewer-stats", build_stats);
//! ```
//!
//! or by explicit [`PluginRegistry::register`]. Installed packages are
//! directories holding a `manifest.json` whose `entry` names a linked entry.
//! [`PluginRegistry::discover_dir`] turns each valid package into a
//! [`PluginCandidate`]; a malformed package is reported and skipped without
//! affecting the others.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use linkme::distributed_slice;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use livehub_core::{PluginError, PluginExports, PluginModule, PluginResult};

use crate::manifest::{MANIFEST_FILE, PluginManifest};

// ─── API versioning ───────────────────────────────────────────────────────────

/// Current plugin API version (1.0).
pub const LIVEHUB_PLUGIN_API_VERSION: u32 = 0x0001_0000;

fn format_version(v: u32) -> String {
    format!("{}.{}", v >> 16, v & 0xFFFF)
}

// ─── PluginEntry ──────────────────────────────────────────────────────────────

/// A static, `Copy` handle that instantiates a linked plugin module.
#[derive(Debug, Clone, Copy)]
pub struct PluginEntry {
    /// Plugin API version this entry was compiled against.
    pub api_version: u32,
    /// Entry name, referenced by manifests.
    pub name: &'static str,
    /// Factory creating the module.
    pub create: fn() -> PluginModule,
}

impl PluginEntry {
    /// Creates an entry for the current API version.
    pub const fn new(name: &'static str, create: fn() -> PluginModule) -> Self {
        Self {
            api_version: LIVEHUB_PLUGIN_API_VERSION,
            name,
            create,
        }
    }

    /// Returns true if the entry's API version is compatible with the host.
    ///
    /// The major part must match exactly; the entry's minor part must be
    /// ≤ the host's minor part.
    pub fn is_compatible(&self) -> bool {
        let host_major = LIVEHUB_PLUGIN_API_VERSION >> 16;
        let host_minor = LIVEHUB_PLUGIN_API_VERSION & 0xFFFF;
        let entry_major = self.api_version >> 16;
        let entry_minor = self.api_version & 0xFFFF;
        entry_major == host_major && entry_minor <= host_minor
    }

    /// Creates the module from the factory function.
    #[inline]
    pub fn instantiate(&self) -> PluginModule {
        (self.create)()
    }
}

/// Link-time registry of plugin entries.
#[distributed_slice]
pub static PLUGIN_ENTRIES: [PluginEntry];

// ─── PluginCandidate ──────────────────────────────────────────────────────────

/// A validated package, ready to load.
#[derive(Debug, Clone)]
pub struct PluginCandidate {
    manifest: PluginManifest,
    module: PluginModule,
    exports: PluginExports,
}

impl PluginCandidate {
    /// Validates a manifest and module pair.
    ///
    /// Fails with `InvalidPlugin` if the manifest is malformed or the module
    /// lacks `init` or `cleanup`. A missing `handle_message` is allowed.
    pub fn new(manifest: PluginManifest, module: PluginModule) -> PluginResult<Self> {
        manifest.validate()?;
        let exports = module.exports();
        let missing = exports.missing_required();
        if !missing.is_empty() {
            return Err(PluginError::invalid(
                &manifest.id,
                format!("missing required exports: {}", missing.join(", ")),
            ));
        }
        Ok(Self {
            manifest,
            module,
            exports,
        })
    }

    /// The plugin id.
    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    /// The manifest.
    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    /// The exported hook set.
    pub fn exports(&self) -> PluginExports {
        self.exports
    }

    pub(crate) fn into_parts(self) -> (PluginManifest, PluginModule, PluginExports) {
        (self.manifest, self.module, self.exports)
    }
}

/// Outcome of scanning a plugins directory.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Valid packages, in directory-name order.
    pub candidates: Vec<PluginCandidate>,
    /// Packages that failed validation.
    pub failures: Vec<(PathBuf, PluginError)>,
}

// ─── PluginRegistry ───────────────────────────────────────────────────────────

/// Name-indexed set of linked plugin entries.
#[derive(Default)]
pub struct PluginRegistry {
    entries: RwLock<BTreeMap<&'static str, PluginEntry>>,
}

impl PluginRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every compatible entry in [`PLUGIN_ENTRIES`].
    pub fn with_linked() -> Self {
        let registry = Self::new();
        for entry in PLUGIN_ENTRIES.iter() {
            if let Err(e) = registry.register(*entry) {
                warn!(entry = %entry.name, error = %e, "Skipping linked plugin entry");
            }
        }
        registry
    }

    /// Registers an entry. A later entry with the same name replaces the
    /// earlier one.
    pub fn register(&self, entry: PluginEntry) -> PluginResult<()> {
        if !entry.is_compatible() {
            return Err(PluginError::invalid(
                entry.name,
                format!(
                    "API version {} is incompatible with host {}",
                    format_version(entry.api_version),
                    format_version(LIVEHUB_PLUGIN_API_VERSION)
                ),
            ));
        }
        if self.entries.write().insert(entry.name, entry).is_some() {
            warn!(entry = %entry.name, "Duplicate plugin entry, last registration wins");
        } else {
            debug!(entry = %entry.name, "Plugin entry registered");
        }
        Ok(())
    }

    /// Looks up an entry by name.
    pub fn entry(&self, name: &str) -> Option<PluginEntry> {
        self.entries.read().get(name).copied()
    }

    /// Names of all registered entries.
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.read().keys().copied().collect()
    }

    /// Resolves a manifest's entry and validates the resulting candidate.
    pub fn candidate(&self, manifest: PluginManifest) -> PluginResult<PluginCandidate> {
        let entry = self.entry(&manifest.entry).ok_or_else(|| {
            PluginError::invalid(
                &manifest.id,
                format!("no linked plugin entry named '{}'", manifest.entry),
            )
        })?;
        PluginCandidate::new(manifest, entry.instantiate())
    }

    /// Parses a manifest file and resolves it into a candidate.
    pub fn load_package(&self, package_dir: &Path) -> PluginResult<PluginCandidate> {
        let path = package_dir.join(MANIFEST_FILE);
        let text = std::fs::read_to_string(&path).map_err(|e| {
            PluginError::invalid(package_dir.display().to_string(), format!("{MANIFEST_FILE}: {e}"))
        })?;
        let manifest = PluginManifest::parse(&text)?;
        self.candidate(manifest)
    }

    /// Scans `dir` for `<dir>/<package>/manifest.json`.
    ///
    /// Fails only if `dir` itself cannot be read. Per-package problems,
    /// including duplicate ids, land in [`DiscoveryReport::failures`].
    pub fn discover_dir(&self, dir: &Path) -> PluginResult<DiscoveryReport> {
        let mut packages: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        packages.sort();

        let mut report = DiscoveryReport::default();
        let mut seen = HashSet::new();
        for package in packages {
            match self.load_package(&package) {
                Ok(candidate) if !seen.insert(candidate.id().to_string()) => {
                    let err = PluginError::invalid(candidate.id(), "duplicate plugin id");
                    warn!(package = %package.display(), error = %err, "Rejected plugin package");
                    report.failures.push((package, err));
                }
                Ok(candidate) => {
                    debug!(plugin = %candidate.id(), package = %package.display(), "Discovered plugin");
                    report.candidates.push(candidate);
                }
                Err(err) => {
                    warn!(package = %package.display(), error = %err, "Rejected plugin package");
                    report.failures.push((package, err));
                }
            }
        }
        info!(
            dir = %dir.display(),
            found = report.candidates.len(),
            rejected = report.failures.len(),
            "Plugin discovery finished"
        );
        Ok(report)
    }
}
