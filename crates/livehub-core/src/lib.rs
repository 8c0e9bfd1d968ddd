//! # Livehub Core
//!
//! Shared contracts for the Livehub room monitor and plugin host.
//!
//! This crate has no runtime of its own. It defines the types every other
//! crate speaks:
//!
//! - **Rooms**: session status and public fields ([`RoomStatus`], [`RoomInfo`]),
//!   observed events ([`RoomEvent`]) and change notifications ([`RoomChange`]).
//! - **Event sources**: the adapter contract for reaching one room feed
//!   ([`EventSource`], [`SourceConnector`]).
//! - **Retry policy**: exponential backoff with jitter ([`RetryConfig`]).
//! - **Projection**: the read-only snapshot handed to plugins ([`RoomProjection`]).
//! - **Plugins**: the module contract ([`PluginModule`]) and the envelopes
//!   carried by the message bridge ([`Envelope`]).
//!
//! ## Data Flow
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌────────────┐     ┌──────────┐
//! │ EventSource  │────▶│ Room Manager │────▶│ Projection │────▶│  Plugin  │
//! │  (per room)  │     │  (sessions)  │     │ (snapshot) │     │   Host   │
//! └──────────────┘     └──────────────┘     └────────────┘     └──────────┘
//! ```

pub mod envelope;
pub mod error;
pub mod module;
pub mod projection;
pub mod retry;
pub mod room;
pub mod source;

pub use envelope::{Envelope, EnvelopeKind};
pub use error::{
    PluginError, PluginResult, RoomError, RoomResult, SourceError, SourceResult,
};
pub use module::{
    BoxError, DispatchOutcome, HookOutcome, InitContext, LifecycleState, PluginExports,
    PluginModule,
};
pub use projection::RoomProjection;
pub use retry::RetryConfig;
pub use room::{RoomChange, RoomEvent, RoomInfo, RoomStatus, unix_ms_now};
pub use source::{BoxedConnector, BoxedEventSource, EventSource, SourceConnector};

/// Prelude for common imports.
pub mod prelude {
    pub use super::envelope::{Envelope, EnvelopeKind};
    pub use super::error::*;
    pub use super::module::{DispatchOutcome, HookOutcome, InitContext, LifecycleState, PluginModule};
    pub use super::projection::RoomProjection;
    pub use super::room::{RoomEvent, RoomInfo, RoomStatus};
    pub use super::source::{BoxedEventSource, EventSource, SourceConnector};
}
