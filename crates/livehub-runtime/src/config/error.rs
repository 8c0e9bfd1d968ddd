//! Configuration errors.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("config file {0} does not exist")]
    FileNotFound(PathBuf),

    /// The sources could not be merged or extracted into the schema.
    #[error("config could not be parsed: {0}")]
    ParseError(String),

    #[error("invalid config: {message}")]
    ValidationError { message: String },

    #[error("config field `{field}` is required")]
    MissingField { field: String },

    /// The same room appears twice in `rooms.auto_connect`.
    #[error("room '{0}' is listed more than once")]
    DuplicateRoomId(String),

    #[error("invalid source URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl ConfigError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
