//! Unified error types for the Livehub core contracts.
//!
//! Every error carries a stable, machine-readable [`code`](RoomError::code)
//! so control-surface callers can branch on it without parsing messages.

use thiserror::Error;

use crate::module::LifecycleState;
use crate::room::RoomStatus;

// =============================================================================
// Source Errors
// =============================================================================

/// Errors reported by an event source (the adapter that reaches a room feed).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// The feed could not be reached.
    #[error("connection failed: {reason}")]
    ConnectionFailed {
        /// Reason for failure.
        reason: String,
    },

    /// The feed closed the connection.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for closure.
        reason: String,
    },

    /// The feed rejected our credentials.
    #[error("authentication rejected: {reason}")]
    AuthRejected {
        /// Reason given by the feed.
        reason: String,
    },

    /// The feed sent something we could not understand.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The adapter call did not complete within its bound.
    #[error("adapter call timed out after {millis}ms")]
    Timeout {
        /// The bound that was exceeded.
        millis: u64,
    },

    /// Invalid source configuration.
    #[error("invalid source configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl SourceError {
    /// Creates a connection failure.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            reason: reason.into(),
        }
    }

    /// Creates a connection-closed error.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }

    /// Stable error code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConnectionFailed { .. } => "connection_failed",
            Self::ConnectionClosed { .. } => "connection_closed",
            Self::AuthRejected { .. } => "auth_rejected",
            Self::Protocol(_) => "protocol_error",
            Self::Timeout { .. } => "timeout",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Io(_) => "io_error",
        }
    }
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Room Errors
// =============================================================================

/// Errors returned by room control operations.
#[derive(Debug, Clone, Error)]
pub enum RoomError {
    /// No session exists for the room.
    #[error("room '{room_id}' not found")]
    NotFound {
        /// The missing room.
        room_id: String,
    },

    /// The room is already connected. Benign: carries the current status.
    #[error("room '{room_id}' is already connected")]
    AlreadyConnected {
        /// The room.
        room_id: String,
        /// Status at the time of the call.
        status: RoomStatus,
    },

    /// The adapter failed; the session continues under its retry policy.
    #[error("adapter failure for room '{room_id}': {source}")]
    Adapter {
        /// The room.
        room_id: String,
        /// The underlying adapter error.
        #[source]
        source: SourceError,
    },

    /// The retry policy gave up; the session is `Failed`.
    #[error("room '{room_id}' gave up after {attempts} reconnect attempt(s)")]
    RetriesExhausted {
        /// The room.
        room_id: String,
        /// Attempts made since the last success.
        attempts: u32,
    },

    /// Teardown did not complete within its bound.
    #[error("room '{room_id}' timed out during {operation}")]
    Timeout {
        /// The room.
        room_id: String,
        /// Operation that timed out.
        operation: &'static str,
    },

    /// A control argument was malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl RoomError {
    /// Creates a not-found error.
    pub fn not_found(room_id: impl Into<String>) -> Self {
        Self::NotFound {
            room_id: room_id.into(),
        }
    }

    /// Stable error code. Adapter failures report the adapter's own code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::AlreadyConnected { .. } => "already_connected",
            Self::Adapter { source, .. } => source.code(),
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::Timeout { .. } => "timeout",
            Self::InvalidArgument(_) => "invalid_argument",
        }
    }
}

// =============================================================================
// Plugin Errors
// =============================================================================

/// Errors returned by plugin host operations.
#[derive(Debug, Clone, Error)]
pub enum PluginError {
    /// No plugin with this id is known to the host.
    #[error("plugin '{plugin_id}' not found")]
    NotFound {
        /// The missing plugin.
        plugin_id: String,
    },

    /// The package is malformed: bad manifest, missing exports, or an
    /// incompatible API version.
    #[error("invalid plugin '{plugin}': {reason}")]
    InvalidPlugin {
        /// Package or plugin name.
        plugin: String,
        /// What was wrong.
        reason: String,
    },

    /// `init` failed, panicked, or timed out. The instance is `Unloaded`.
    #[error("plugin '{plugin_id}' failed to initialize: {reason}")]
    InitFailed {
        /// The plugin.
        plugin_id: String,
        /// Failure detail.
        reason: String,
    },

    /// The plugin is not in the `Ready` state.
    #[error("plugin '{plugin_id}' is not ready (state: {state})")]
    NotReady {
        /// The plugin.
        plugin_id: String,
        /// Its current state.
        state: LifecycleState,
    },

    /// A plugin with this id is already loaded.
    #[error("plugin '{plugin_id}' is already loaded")]
    AlreadyLoaded {
        /// The plugin.
        plugin_id: String,
    },

    /// The message handler failed.
    #[error("plugin '{plugin_id}' handler failed: {reason}")]
    HandlerFailure {
        /// The plugin.
        plugin_id: String,
        /// Failure detail.
        reason: String,
    },

    /// A plugin hook exceeded its bound.
    #[error("plugin '{plugin_id}' {hook} timed out")]
    Timeout {
        /// The plugin.
        plugin_id: String,
        /// The hook that timed out.
        hook: &'static str,
    },

    /// I/O error while discovering packages.
    #[error("I/O error: {0}")]
    Io(String),
}

impl PluginError {
    /// Creates a not-found error.
    pub fn not_found(plugin_id: impl Into<String>) -> Self {
        Self::NotFound {
            plugin_id: plugin_id.into(),
        }
    }

    /// Creates an invalid-plugin error.
    pub fn invalid(plugin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPlugin {
            plugin: plugin.into(),
            reason: reason.into(),
        }
    }

    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidPlugin { .. } => "invalid_plugin",
            Self::InitFailed { .. } => "init_failed",
            Self::NotReady { .. } => "not_ready",
            Self::AlreadyLoaded { .. } => "already_loaded",
            Self::HandlerFailure { .. } => "handler_failure",
            Self::Timeout { .. } => "timeout",
            Self::Io(_) => "io_error",
        }
    }
}

impl From<std::io::Error> for PluginError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for event source operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Result type for room control operations.
pub type RoomResult<T> = Result<T, RoomError>;

/// Result type for plugin host operations.
pub type PluginResult<T> = Result<T, PluginError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_error_reports_source_code() {
        let err = RoomError::Adapter {
            room_id: "A".into(),
            source: SourceError::AuthRejected {
                reason: "bad token".into(),
            },
        };
        assert_eq!(err.code(), "auth_rejected");
        assert!(err.to_string().contains("bad token"));
    }

    #[test]
    fn test_not_ready_display_includes_state() {
        let err = PluginError::NotReady {
            plugin_id: "stats".into(),
            state: LifecycleState::Cleaning,
        };
        assert_eq!(err.code(), "not_ready");
        assert_eq!(
            err.to_string(),
            "plugin 'stats' is not ready (state: cleaning)"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing dir");
        let err: PluginError = io_err.into();
        assert!(matches!(err, PluginError::Io(_)));
        assert!(err.to_string().contains("missing dir"));
    }
}
