//! Configuration validation utilities.

use std::collections::HashSet;
use std::time::Duration;

use livehub_core::RetryConfig;

use super::error::{ConfigError, ConfigResult};
use super::schema::{
    AutoConnectRoom, LivehubConfig, LogLevel, LogOutput, LoggingConfig, SourceConfig,
};

/// Validates the entire configuration.
pub fn validate_config(config: &LivehubConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_retry_config(&config.rooms.retry)?;
    validate_timeout("rooms.adapter_timeout", config.rooms.adapter_timeout)?;
    validate_timeout("rooms.disconnect_timeout", config.rooms.disconnect_timeout)?;
    validate_rooms(&config.rooms.auto_connect)?;
    validate_source_config(&config.source)?;
    validate_timeout("plugins.init_timeout", config.plugins.init_timeout)?;
    validate_timeout("plugins.cleanup_timeout", config.plugins.cleanup_timeout)?;
    validate_timeout("plugins.handler_timeout", config.plugins.handler_timeout)?;
    validate_timeout("bridge.refresh_interval", config.bridge.refresh_interval)?;
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    validate_level(&logging.level)?;
    for level in logging.filters.values() {
        validate_level(level)?;
    }
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }
    Ok(())
}

fn validate_level(level: &str) -> ConfigResult<()> {
    if LogLevel::parse(level).is_none() {
        return Err(ConfigError::validation(format!(
            "Invalid log level: {level}. Valid values are: trace, debug, info, warn, error"
        )));
    }
    Ok(())
}

fn validate_timeout(field: &str, value: Duration) -> ConfigResult<()> {
    if value.is_zero() {
        return Err(ConfigError::validation(format!(
            "{field} must be greater than 0"
        )));
    }
    Ok(())
}

/// Validates retry configuration.
fn validate_retry_config(retry: &RetryConfig) -> ConfigResult<()> {
    if retry.initial_delay.is_zero() {
        return Err(ConfigError::validation(
            "Initial retry delay must be greater than 0",
        ));
    }

    if retry.max_delay < retry.initial_delay {
        return Err(ConfigError::validation(
            "Max retry delay must be greater than or equal to initial delay",
        ));
    }

    if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
        return Err(ConfigError::validation(
            "Backoff multiplier must be at least 1.0",
        ));
    }

    if !(0.0..=1.0).contains(&retry.jitter) {
        return Err(ConfigError::validation("Jitter must be between 0.0 and 1.0"));
    }

    Ok(())
}

fn validate_rooms(rooms: &[AutoConnectRoom]) -> ConfigResult<()> {
    let mut seen_ids = HashSet::new();
    for room in rooms {
        if room.id.trim().is_empty() {
            return Err(ConfigError::missing_field("rooms.auto_connect.id"));
        }
        if !seen_ids.insert(room.id.as_str()) {
            return Err(ConfigError::DuplicateRoomId(room.id.clone()));
        }
    }
    Ok(())
}

fn validate_source_config(source: &SourceConfig) -> ConfigResult<()> {
    match source {
        SourceConfig::Channel => Ok(()),
        SourceConfig::WsClient(ws) => validate_url_template(&ws.url),
    }
}

fn validate_url_template(url: &str) -> ConfigResult<()> {
    if url.is_empty() {
        return Err(ConfigError::missing_field("source.url"));
    }

    let valid_schemes = ["ws://", "wss://"];
    if !valid_schemes.iter().any(|s| url.starts_with(s)) {
        return Err(ConfigError::invalid_url(
            url,
            format!("URL must start with one of: {valid_schemes:?}"),
        ));
    }

    if !url.contains("{room}") {
        return Err(ConfigError::invalid_url(
            url,
            "URL template must contain a {room} placeholder",
        ));
    }

    Ok(())
}
