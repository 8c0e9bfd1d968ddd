//! Livehub Runtime - orchestration layer for the Livehub room monitor.
//!
//! This crate provides:
//! - Room session supervision with retry and backoff (`RoomManager`)
//! - Projection publishing to plugins (`ProjectionPublisher`)
//! - The operator command surface (`ControlSurface`)
//! - Runtime orchestration (`LivehubRuntime`)
//! - Layered configuration and logging setup
//!
//! ```ignore
//! use livehub_runtime::LivehubRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = LivehubRuntime::new()?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Room Lifecycle
//!
//! ```text
//!   Idle ──connect──▶ Connecting ──ok──▶ Connected ──drop──▶ Reconnecting
//!                         │                                     │    ▲
//!                         └──────────fail──────────────────────▶│    │ retry
//!                                                               ▼    │
//!                                         Failed ◀──exhausted── (backoff)
//!
//!   any ──disconnect──▶ Disconnected
//! ```

pub mod config;
pub mod control;
pub mod error;
pub mod logging;
pub mod manager;
pub mod publisher;
pub mod runtime;
pub mod session;

// Re-exports
pub use config::{ConfigError, ConfigLoader, ConfigResult, LivehubConfig};
pub use control::{Ack, ControlSurface};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use manager::RoomManager;
pub use publisher::ProjectionPublisher;
pub use runtime::{LivehubRuntime, RuntimeBuilder};
pub use session::{CHANGE_CAPACITY, SessionPolicy};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for convenient imports.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
