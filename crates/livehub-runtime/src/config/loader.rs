//! Configuration loader using figment.
//!
//! # Feature Flags
//!
//! - `toml-config` *(default)*: `livehub.toml`, `config.toml`
//! - `yaml-config`: `livehub.yaml`, `livehub.yml`
//!
//! # Configuration Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Profile-specific config file (`livehub.{profile}.toml`)
//! 3. Main config file (`livehub.toml`)
//! 4. Environment variables (`LIVEHUB_*`)
//! 5. Programmatic overrides
//!
//! # Environment Variable Mapping
//!
//! Variables use the `LIVEHUB_` prefix with `__` as the nesting separator:
//!
//! - `LIVEHUB_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `LIVEHUB_ROOMS__RETRY__MAX_RETRIES=8` → `rooms.retry.max_retries = 8`
//! - `LIVEHUB_PLUGINS__DIR=/opt/livehub/plugins` → `plugins.dir`
//!
//! # Example
//!
//! ```rust,ignore
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .file("./config/livehub.toml")
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::LivehubConfig;
use super::validation::validate_config;

/// Environment prefix for every configuration key.
pub const ENV_PREFIX: &str = "LIVEHUB_";

/// Environment variable selecting the profile.
pub const PROFILE_ENV: &str = "LIVEHUB_PROFILE";

/// Main file names tried in each search path, in order.
const FILE_NAMES: &[&str] = &[
    #[cfg(feature = "toml-config")]
    "livehub.toml",
    #[cfg(feature = "toml-config")]
    "config.toml",
    #[cfg(feature = "yaml-config")]
    "livehub.yaml",
    #[cfg(feature = "yaml-config")]
    "livehub.yml",
];

/// Deployment profile selecting `livehub.<profile>.*` variants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Parses a profile name; `dev` and `prod` are accepted as aliases.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Reads the profile from `LIVEHUB_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_ENV)
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Layered configuration loader.
pub struct ConfigLoader {
    /// Programmatic overrides, merged last.
    overrides: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    /// Specific config file to load (overrides search).
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a new configuration loader with defaults.
    pub fn new() -> Self {
        Self {
            overrides: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    /// Sets the configuration profile.
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Profile::parse(&profile.into());
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds current directory to search paths.
    pub fn with_current_dir(self) -> Self {
        if let Ok(cwd) = std::env::current_dir() {
            self.search_path(cwd)
        } else {
            self
        }
    }

    /// Adds the user config directory (`<config>/livehub`) to search paths.
    pub fn with_user_config_dir(self) -> Self {
        if let Some(config_dir) = dirs::config_dir() {
            self.search_path(config_dir.join("livehub"))
        } else {
            self
        }
    }

    /// Sets a specific configuration file to load.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Enables loading environment variables (default: true).
    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges a full configuration programmatically, above every other source.
    pub fn merge(mut self, config: LivehubConfig) -> Self {
        self.overrides = self.overrides.merge(Serialized::defaults(config));
        self
    }

    /// Sets a single key programmatically, e.g. `("rooms.retry.max_retries", 3)`.
    pub fn set<V: serde::Serialize>(mut self, key: &str, value: V) -> Self {
        self.overrides = self.overrides.merge(Serialized::default(key, value));
        self
    }

    /// Loads, validates, and returns the configuration.
    pub fn load(self) -> ConfigResult<LivehubConfig> {
        let profile = self.profile.clone();
        let figment = self.build_figment()?;

        let config: LivehubConfig = figment.extract().map_err(|e| {
            ConfigError::ParseError(format!("Failed to extract configuration: {e}"))
        })?;
        validate_config(&config)?;

        debug!(
            profile = %profile,
            logging_level = %config.logging.level,
            auto_connect = config.rooms.auto_connect.len(),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    fn build_figment(mut self) -> ConfigResult<Figment> {
        let defaults = Figment::from(Serialized::defaults(LivehubConfig::default()));

        let mut figment = match self.config_file.take() {
            Some(path) if !path.exists() => return Err(ConfigError::FileNotFound(path)),
            Some(path) => {
                info!(path = %path.display(), "Loading configuration file");
                Self::merge_config_file(defaults, &path)?
            }
            None => match self.discover_files() {
                Some((main, variant)) => {
                    let mut figment = defaults;
                    if let Some(variant) = variant {
                        debug!(path = %variant.display(), profile = %self.profile, "Loading profile config");
                        figment = Self::merge_config_file(figment, &variant)?;
                    }
                    info!(path = %main.display(), "Loading configuration file");
                    Self::merge_config_file(figment, &main)?
                }
                None => {
                    warn!("No configuration file found, using defaults");
                    defaults
                }
            },
        };

        if self.load_env {
            trace!(prefix = ENV_PREFIX, "Merging environment variables");
            figment = figment.merge(Env::prefixed(ENV_PREFIX).ignore(&["PROFILE"]).split("__"));
        }

        Ok(figment.merge(std::mem::take(&mut self.overrides)))
    }

    /// Merges one file, picking the provider from its extension.
    fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        match path.extension().and_then(|e| e.to_str()).unwrap_or_default() {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
            ext => Err(ConfigError::ParseError(format!(
                "{}: .{ext} files are not supported by the enabled config features",
                path.display()
            ))),
        }
    }

    /// Explicit search paths, or the current directory then the user config
    /// directory.
    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        std::env::current_dir()
            .ok()
            .into_iter()
            .chain(dirs::config_dir().map(|d| d.join("livehub")))
            .collect()
    }

    /// The first main file found across the search paths, paired with its
    /// profile variant (`livehub.<profile>.toml`) when that exists beside it.
    fn discover_files(&self) -> Option<(PathBuf, Option<PathBuf>)> {
        self.resolve_search_paths().iter().find_map(|dir| {
            FILE_NAMES.iter().find_map(|name| {
                let main = dir.join(name);
                if !main.is_file() {
                    return None;
                }
                let variant = name
                    .rsplit_once('.')
                    .map(|(stem, ext)| dir.join(format!("{stem}.{}.{ext}", self.profile)))
                    .filter(|p| p.is_file());
                Some((main, variant))
            })
        })
    }
}

/// Loads configuration from the default locations.
pub fn load_config() -> ConfigResult<LivehubConfig> {
    ConfigLoader::new().load()
}

/// Loads configuration from a specific file, plus environment overrides.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<LivehubConfig> {
    ConfigLoader::new().file(path).load()
}

// =============================================================================
// Tests
// =============================================================================
