//! Runtime orchestration.
//!
//! [`LivehubRuntime`] wires the room manager, the plugin host, and the
//! projection publisher together and drives their lifecycle.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use livehub_runtime::LivehubRuntime;
//!
//! // Auto-loads livehub.toml from the current directory
//! let runtime = LivehubRuntime::new()?;
//!
//! // Custom configuration
//! let runtime = LivehubRuntime::builder()
//!     .config_file("config/livehub.toml")
//!     .profile("production")
//!     .build()?;
//!
//! runtime.run().await?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::signal;
use tracing::{debug, error, info, warn};

use livehub_core::{BoxedConnector, RoomProjection};
use livehub_plugin::{PluginCandidate, PluginHost, PluginRegistry};
use livehub_transport::ChannelConnector;

use crate::config::{ConfigLoader, LivehubConfig, SourceConfig};
use crate::control::ControlSurface;
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;
use crate::manager::RoomManager;
use crate::publisher::ProjectionPublisher;

/// The Livehub runtime.
///
/// ```rust,ignore
/// let runtime = LivehubRuntime::new()?;
/// runtime.register_plugin(candidate);
/// runtime.run().await?;
/// ```
pub struct LivehubRuntime {
    config: LivehubConfig,
    rooms: Arc<RoomManager>,
    plugins: Arc<PluginHost>,
    registry: PluginRegistry,
    /// Feed handle when the source is in-process.
    channel: Option<ChannelConnector>,
    /// Candidates registered in code, loaded alongside discovered packages.
    extra_plugins: Mutex<Vec<PluginCandidate>>,
    publisher: tokio::sync::Mutex<Option<ProjectionPublisher>>,
    running: AtomicBool,
}

impl LivehubRuntime {
    /// Creates a runtime from `livehub.toml` in the current directory.
    ///
    /// If the configuration cannot be loaded, default settings are used.
    pub fn new() -> RuntimeResult<Self> {
        let config = ConfigLoader::new()
            .with_current_dir()
            .load()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to load config, using defaults");
                LivehubConfig::default()
            });
        Self::from_config(&config)
    }

    /// Creates a runtime builder for custom configuration.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from configuration, building the configured source.
    ///
    /// Initializes logging; a subscriber that is already installed is kept.
    pub fn from_config(config: &LivehubConfig) -> RuntimeResult<Self> {
        let (connector, channel) = build_connector(&config.source)?;
        Ok(Self::assemble(config, connector, channel))
    }

    /// Creates a runtime with a caller-supplied connector.
    pub fn with_connector(config: &LivehubConfig, connector: BoxedConnector) -> Self {
        Self::assemble(config, connector, None)
    }

    fn assemble(
        config: &LivehubConfig,
        connector: BoxedConnector,
        channel: Option<ChannelConnector>,
    ) -> Self {
        logging::init_from_config(&config.logging);

        let rooms = Arc::new(RoomManager::new(connector, config.rooms.policy()));
        let plugins = Arc::new(PluginHost::new(config.plugins.host_config()));

        info!(
            log_level = %config.logging.level,
            source = %rooms.connector_name(),
            "Runtime initialized from configuration"
        );

        Self {
            config: config.clone(),
            rooms,
            plugins,
            registry: PluginRegistry::with_linked(),
            channel,
            extra_plugins: Mutex::new(Vec::new()),
            publisher: tokio::sync::Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &LivehubConfig {
        &self.config
    }

    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.rooms
    }

    pub fn plugins(&self) -> &Arc<PluginHost> {
        &self.plugins
    }

    /// Registry used to resolve discovered manifests.
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// The in-process feed handle, when the source is `channel`.
    pub fn channel(&self) -> Option<&ChannelConnector> {
        self.channel.as_ref()
    }

    pub fn control(&self) -> ControlSurface {
        ControlSurface::new(Arc::clone(&self.rooms), Arc::clone(&self.plugins))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Queues a plugin to load on start, in addition to discovered packages.
    pub fn register_plugin(&self, candidate: PluginCandidate) {
        self.extra_plugins.lock().push(candidate);
    }

    /// The latest published projection, or a fresh one when not running.
    pub async fn projection(&self) -> Arc<RoomProjection> {
        match self.publisher.lock().await.as_ref() {
            Some(publisher) => publisher.latest(),
            None => Arc::new(self.rooms.list()),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Loads plugins, starts publishing projections, and connects the
    /// configured rooms.
    pub async fn start(&self) -> RuntimeResult<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(RuntimeError::InvalidState("already running"));
        }
        info!("Starting Livehub runtime");

        let loaded = self.plugins.load_all(self.plugin_candidates()).await;
        info!(count = loaded.len(), plugins = ?loaded, "Plugins loaded");

        let publisher = ProjectionPublisher::spawn(
            Arc::clone(&self.rooms),
            Arc::clone(&self.plugins),
            self.config.bridge.refresh_interval,
        );
        *self.publisher.lock().await = Some(publisher);

        self.auto_connect().await;

        info!("Runtime started");
        Ok(())
    }

    /// Stops plugins, the publisher, and every room session.
    pub async fn stop(&self) -> RuntimeResult<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Err(RuntimeError::InvalidState("not running"));
        }
        info!("Stopping Livehub runtime");

        self.plugins.shutdown().await;
        if let Some(publisher) = self.publisher.lock().await.take() {
            publisher.stop().await;
        }
        self.rooms.shutdown().await;

        info!("Runtime stopped");
        Ok(())
    }

    /// Runs until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start().await?;
        info!("Livehub runtime is now running. Press Ctrl+C to stop.");
        wait_for_shutdown().await;
        self.stop().await
    }

    /// Runs until `shutdown` resolves.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: std::future::Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        self.stop().await
    }

    fn plugin_candidates(&self) -> Vec<PluginCandidate> {
        let mut candidates = Vec::new();
        if let Some(dir) = self.config.plugins.resolved_dir() {
            match self.registry.discover_dir(&dir) {
                Ok(report) => candidates.extend(report.candidates),
                Err(e) => warn!(dir = %dir.display(), error = %e, "Plugin directory unreadable"),
            }
        }
        candidates.append(&mut self.extra_plugins.lock());

        candidates
            .into_iter()
            .filter(|c| {
                let disabled = self.config.plugins.is_disabled(c.id());
                if disabled {
                    debug!(plugin = %c.id(), "Plugin disabled by configuration");
                }
                !disabled
            })
            .collect()
    }

    async fn auto_connect(&self) {
        let attempts = self.config.rooms.auto_connect.iter().map(|room| async move {
            let prepared = async {
                self.rooms.register(&room.id)?;
                self.rooms.set_priority(&room.id, room.priority).await?;
                if let Some(label) = &room.label {
                    self.rooms.set_label(&room.id, label.as_str()).await?;
                }
                self.rooms.connect(&room.id).await
            };
            match prepared.await {
                Ok(status) => info!(room = %room.id, %status, "Auto-connected room"),
                Err(e) => error!(room = %room.id, error = %e, "Auto-connect failed"),
            }
        });
        join_all(attempts).await;
    }
}

fn build_connector(
    source: &SourceConfig,
) -> RuntimeResult<(BoxedConnector, Option<ChannelConnector>)> {
    match source {
        SourceConfig::Channel => {
            let channel = ChannelConnector::new();
            Ok((Arc::new(channel.clone()), Some(channel)))
        }
        #[cfg(feature = "ws-client")]
        SourceConfig::WsClient(ws) => {
            let connector = livehub_transport::WsConnector::new(ws.url.as_str())?;
            Ok((Arc::new(connector), None))
        }
        #[cfg(not(feature = "ws-client"))]
        SourceConfig::WsClient(_) => Err(RuntimeError::Config(
            crate::config::ConfigError::validation(
                "source type 'ws-client' requires the `ws-client` feature",
            ),
        )),
    }
}

/// Waits for Ctrl+C or SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`LivehubRuntime`] with custom configuration loading.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    connector: Option<BoxedConnector>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            connector: None,
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g. "development", "production").
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges configuration programmatically, above files and environment.
    pub fn merge(mut self, config: LivehubConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Uses `connector` instead of the configured source.
    pub fn connector(mut self, connector: BoxedConnector) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn build(self) -> RuntimeResult<LivehubRuntime> {
        let config = self.config_loader.load()?;
        match self.connector {
            Some(connector) => Ok(LivehubRuntime::with_connector(&config, connector)),
            None => LivehubRuntime::from_config(&config),
        }
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
