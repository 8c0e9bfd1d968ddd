//! Runtime error types.

use thiserror::Error;

use livehub_core::{PluginError, RoomError, SourceError};

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A room operation failed.
    #[error("Room error: {0}")]
    Room(#[from] RoomError),

    /// A plugin operation failed.
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// The configured event source could not be built.
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// The runtime was started twice or stopped before starting.
    #[error("Runtime is {0}")]
    InvalidState(&'static str),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
