//! Configuration schema definitions.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use livehub_core::RetryConfig;
use livehub_core::retry::humantime_serde;
use livehub_plugin::{HookTimeouts, HostConfig};

use crate::session::SessionPolicy;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LivehubConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Room connection settings.
    #[serde(default)]
    pub rooms: RoomsConfig,

    /// Which event source reaches the room feeds.
    #[serde(default)]
    pub source: SourceConfig,

    /// Plugin host settings.
    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Projection bridge settings.
    #[serde(default)]
    pub bridge: BridgeConfig,
}

// =============================================================================
// Logging
// =============================================================================

/// Log level names accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parses a level name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Returns the lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Converts to a `tracing` level.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[cfg(feature = "json-log")]
    Json,
    /// Single-line, abbreviated.
    #[default]
    Compact,
    /// Single-line, full.
    Full,
    /// Multi-line, human friendly.
    Pretty,
}

/// Where log lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// Append to `logging.file_path`.
    File,
}

/// Which span lifecycle events to log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file for `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Include thread ids.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line.
    #[serde(default)]
    pub file_location: bool,

    /// Per-target levels, e.g. `livehub_runtime = "debug"`.
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            file_path: None,
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            filters: BTreeMap::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

// =============================================================================
// Rooms
// =============================================================================

/// Room connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomsConfig {
    /// Reconnect policy shared by every room.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Bound for a single adapter connect or disconnect.
    #[serde(with = "humantime_serde", default = "default_adapter_timeout")]
    pub adapter_timeout: Duration,

    /// Bound for tearing a session down.
    #[serde(with = "humantime_serde", default = "default_disconnect_timeout")]
    pub disconnect_timeout: Duration,

    /// Rooms connected when the runtime starts.
    #[serde(default)]
    pub auto_connect: Vec<AutoConnectRoom>,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            adapter_timeout: default_adapter_timeout(),
            disconnect_timeout: default_disconnect_timeout(),
            auto_connect: Vec::new(),
        }
    }
}

impl RoomsConfig {
    /// Session policy derived from this section.
    pub fn policy(&self) -> SessionPolicy {
        SessionPolicy {
            retry: self.retry.clone(),
            adapter_timeout: self.adapter_timeout,
            disconnect_timeout: self.disconnect_timeout,
        }
    }
}

fn default_adapter_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_disconnect_timeout() -> Duration {
    Duration::from_secs(5)
}

/// A room connected at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoConnectRoom {
    pub id: String,

    #[serde(default)]
    pub priority: i64,

    /// Display label; defaults to the room id.
    #[serde(default)]
    pub label: Option<String>,
}

// =============================================================================
// Source
// =============================================================================

/// Event source selection.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SourceConfig {
    /// In-process feeds driven through a `ChannelConnector`.
    #[default]
    Channel,

    /// One WebSocket connection per room.
    WsClient(WsSourceConfig),
}

/// WebSocket source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsSourceConfig {
    /// URL template; `{room}` is replaced by the room id.
    pub url: String,
}

// =============================================================================
// Plugins
// =============================================================================

/// Plugin host settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Directory scanned for plugin packages. Falls back to the user data
    /// directory when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    #[serde(with = "humantime_serde", default = "default_init_timeout")]
    pub init_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_cleanup_timeout")]
    pub cleanup_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_handler_timeout")]
    pub handler_timeout: Duration,

    /// Plugin ids that are discovered but never loaded.
    #[serde(default)]
    pub disabled: Vec<String>,

    /// Per-plugin config sections, handed to `init`.
    #[serde(default)]
    pub configs: HashMap<String, Value>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            init_timeout: default_init_timeout(),
            cleanup_timeout: default_cleanup_timeout(),
            handler_timeout: default_handler_timeout(),
            disabled: Vec::new(),
            configs: HashMap::new(),
        }
    }
}

impl PluginsConfig {
    /// Hook bounds for the plugin host.
    pub fn hook_timeouts(&self) -> HookTimeouts {
        HookTimeouts {
            init: self.init_timeout,
            cleanup: self.cleanup_timeout,
            handler: self.handler_timeout,
        }
    }

    /// Plugin host configuration.
    pub fn host_config(&self) -> HostConfig {
        HostConfig {
            timeouts: self.hook_timeouts(),
            plugin_configs: self.configs.clone(),
        }
    }

    /// The directory to scan, if any.
    pub fn resolved_dir(&self) -> Option<PathBuf> {
        self.dir.clone().or_else(|| {
            dirs::data_dir()
                .map(|d| d.join("livehub").join("plugins"))
                .filter(|d| d.is_dir())
        })
    }

    /// Returns true if `plugin_id` is on the disabled list.
    pub fn is_disabled(&self, plugin_id: &str) -> bool {
        self.disabled.iter().any(|id| id == plugin_id)
    }
}

fn default_init_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_cleanup_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_handler_timeout() -> Duration {
    Duration::from_secs(5)
}

// =============================================================================
// Bridge
// =============================================================================

/// Projection bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// How often event-only changes are flushed as a new `room-state`.
    #[serde(with = "humantime_serde", default = "default_refresh_interval")]
    pub refresh_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            refresh_interval: default_refresh_interval(),
        }
    }
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(1)
}
