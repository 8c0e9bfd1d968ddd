//! Configuration module for the Livehub runtime.
//!
//! Layered loading (defaults, files, environment) via figment, the schema
//! for every runtime section, and validation.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    AutoConnectRoom, BridgeConfig, LivehubConfig, LogFormat, LogLevel, LogOutput, LoggingConfig,
    PluginsConfig, RoomsConfig, SourceConfig, SpanEventConfig,
};
pub use validation::validate_config;
