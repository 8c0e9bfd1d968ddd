//! A running plugin and its lifecycle supervision.
//!
//! ```text
//! Unloaded ──load──► Initializing ──init ok──► Ready ──unload──► Cleaning ──► Unloaded
//!                         │                     │ ▲
//!                         └──fail/panic/timeout─┼─┼──► Unloaded
//!                                               └─┘ reload (cleanup + init)
//! ```
//!
//! Every hook call is bounded by a timeout and isolated with `catch_unwind`,
//! so a misbehaving plugin produces a failure value instead of taking the
//! host down. Lifecycle transitions hold the write half of an async lock;
//! message handling holds the read half, which keeps handlers from running
//! while `cleanup` or `init` is in progress.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use livehub_core::envelope::WINDOW_CLOSED;
use livehub_core::{
    DispatchOutcome, Envelope, InitContext, LifecycleState, PluginError, PluginExports,
    PluginModule, PluginResult,
};

use crate::manifest::{Capability, PluginManifest};

/// Bounds applied to plugin hooks.
#[derive(Debug, Clone, Copy)]
pub struct HookTimeouts {
    /// Bound for `init`.
    pub init: Duration,
    /// Bound for `cleanup`.
    pub cleanup: Duration,
    /// Bound for one `handle_message` call.
    pub handler: Duration,
}

impl Default for HookTimeouts {
    fn default() -> Self {
        Self {
            init: Duration::from_secs(10),
            cleanup: Duration::from_secs(5),
            handler: Duration::from_secs(5),
        }
    }
}

/// Why a guarded hook call did not produce a value.
#[derive(Debug)]
pub(crate) enum HookFailure {
    Panicked(String),
    TimedOut,
}

impl std::fmt::Display for HookFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Panicked(msg) => write!(f, "panicked: {msg}"),
            Self::TimedOut => f.write_str("timed out"),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs a hook future with a timeout, converting panics into failures.
pub(crate) async fn guarded<T>(
    fut: BoxFuture<'static, T>,
    limit: Duration,
) -> Result<T, HookFailure> {
    match tokio::time::timeout(limit, AssertUnwindSafe(fut).catch_unwind()).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(payload)) => Err(HookFailure::Panicked(panic_message(payload))),
        Err(_) => Err(HookFailure::TimedOut),
    }
}

/// Public view of a plugin instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    /// Plugin id.
    pub id: String,
    /// Human label.
    pub name: String,
    /// Plugin version.
    pub version: String,
    /// Lifecycle state.
    pub state: LifecycleState,
    /// Declared capabilities.
    pub capabilities: Vec<Capability>,
    /// Exported hooks.
    pub exports: PluginExports,
    /// Attached popup ids.
    pub popups: Vec<String>,
    /// Messages handled successfully.
    pub handled: u64,
    /// Handler calls that failed, panicked, or timed out.
    pub failures: u64,
}

/// One loaded plugin. A new instance starts in `Initializing`, so a
/// concurrent `load` of the same id sees it as taken.
pub struct PluginInstance {
    manifest: PluginManifest,
    module: PluginModule,
    exports: PluginExports,
    config: Value,
    timeouts: HookTimeouts,
    state: Mutex<LifecycleState>,
    lifecycle: RwLock<()>,
    popups: Mutex<BTreeMap<String, mpsc::UnboundedSender<Envelope>>>,
    handled: AtomicU64,
    failures: AtomicU64,
}

impl PluginInstance {
    pub(crate) fn new(
        manifest: PluginManifest,
        module: PluginModule,
        exports: PluginExports,
        config: Value,
        timeouts: HookTimeouts,
    ) -> Self {
        Self {
            manifest,
            module,
            exports,
            config,
            timeouts,
            state: Mutex::new(LifecycleState::Initializing),
            lifecycle: RwLock::new(()),
            popups: Mutex::new(BTreeMap::new()),
            handled: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// The plugin id.
    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    /// The manifest.
    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Returns true if the plugin declared `capability`.
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.manifest.has_capability(capability)
    }

    /// Returns true if the plugin has no message handler.
    pub fn is_passive(&self) -> bool {
        self.exports.is_passive()
    }

    /// Snapshot of the public fields.
    pub fn info(&self) -> PluginInfo {
        PluginInfo {
            id: self.manifest.id.clone(),
            name: self.manifest.name.clone(),
            version: self.manifest.version.clone(),
            state: self.state(),
            capabilities: self.manifest.capabilities.clone(),
            exports: self.exports,
            popups: self.popup_ids(),
            handled: self.handled.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    fn set_state(&self, state: LifecycleState) {
        let prev = std::mem::replace(&mut *self.state.lock(), state);
        if prev != state {
            debug!(plugin = %self.id(), from = %prev, to = %state, "Plugin state changed");
        }
    }

    fn not_ready(&self, state: LifecycleState) -> PluginError {
        PluginError::NotReady {
            plugin_id: self.id().to_string(),
            state,
        }
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Runs the first `init` of a fresh instance. Ends in `Ready` or, on any
    /// failure, in `Unloaded` with `InitFailed`.
    pub(crate) async fn initialize(&self, projection: Value) -> PluginResult<()> {
        let _guard = self.lifecycle.write().await;
        match self.state() {
            LifecycleState::Initializing => self.run_init(projection).await,
            LifecycleState::Ready => Err(PluginError::AlreadyLoaded {
                plugin_id: self.id().to_string(),
            }),
            state => Err(PluginError::InitFailed {
                plugin_id: self.id().to_string(),
                reason: format!("cannot initialize from state {state}"),
            }),
        }
    }

    /// Runs `cleanup` if `Ready`, then detaches every popup. Idempotent.
    pub(crate) async fn teardown(&self) {
        let _guard = self.lifecycle.write().await;
        if self.state() == LifecycleState::Ready {
            self.run_cleanup().await;
        }
        self.set_state(LifecycleState::Unloaded);
        self.close_all_popups();
    }

    /// Runs `cleanup` then `init` again. Popups are kept on success and
    /// detached if `init` fails.
    pub(crate) async fn reinitialize(&self, projection: Value) -> PluginResult<()> {
        let _guard = self.lifecycle.write().await;
        let state = self.state();
        if state != LifecycleState::Ready {
            return Err(self.not_ready(state));
        }
        self.run_cleanup().await;
        let result = self.run_init(projection).await;
        if result.is_err() {
            self.close_all_popups();
        }
        result
    }

    async fn run_init(&self, projection: Value) -> PluginResult<()> {
        self.set_state(LifecycleState::Initializing);
        let ctx = InitContext {
            plugin_id: self.id().to_string(),
            config: self.config.clone(),
            projection,
        };
        let Some(fut) = self.module.init(ctx) else {
            self.set_state(LifecycleState::Unloaded);
            return Err(PluginError::InitFailed {
                plugin_id: self.id().to_string(),
                reason: "init is not exported".into(),
            });
        };

        let reason = match guarded(fut, self.timeouts.init).await {
            Ok(outcome) if outcome.ok => {
                self.set_state(LifecycleState::Ready);
                info!(plugin = %self.id(), "Plugin initialized");
                return Ok(());
            }
            Ok(outcome) => outcome
                .message
                .unwrap_or_else(|| "init reported failure".into()),
            Err(failure) => format!("init {failure}"),
        };

        self.set_state(LifecycleState::Unloaded);
        warn!(plugin = %self.id(), reason = %reason, "Plugin failed to initialize");
        Err(PluginError::InitFailed {
            plugin_id: self.id().to_string(),
            reason,
        })
    }

    async fn run_cleanup(&self) {
        self.set_state(LifecycleState::Cleaning);
        if let Some(fut) = self.module.cleanup() {
            match guarded(fut, self.timeouts.cleanup).await {
                Ok(outcome) if outcome.ok => {
                    debug!(plugin = %self.id(), "Plugin cleanup finished");
                }
                Ok(outcome) => {
                    warn!(
                        plugin = %self.id(),
                        message = outcome.message.as_deref().unwrap_or(""),
                        "Plugin cleanup reported failure"
                    );
                }
                Err(failure) => {
                    warn!(plugin = %self.id(), "Plugin cleanup {failure}");
                }
            }
        }
        self.set_state(LifecycleState::Unloaded);
    }

    // ─── Messages ────────────────────────────────────────────────────────────

    /// Invokes `handle_message`. Requires `Ready`.
    pub(crate) async fn handle(&self, kind: &str, payload: Value) -> PluginResult<DispatchOutcome> {
        let _guard = self.lifecycle.read().await;
        let state = self.state();
        if state != LifecycleState::Ready {
            return Err(self.not_ready(state));
        }

        let Some(fut) = self.module.handle_message(kind.to_string(), payload) else {
            return Ok(DispatchOutcome::failure(
                "not_supported",
                format!("plugin '{}' does not handle messages", self.id()),
            ));
        };

        let outcome = match guarded(fut, self.timeouts.handler).await {
            Ok(Ok(result)) => {
                self.handled.fetch_add(1, Ordering::Relaxed);
                return Ok(DispatchOutcome::success(result));
            }
            Ok(Err(e)) => DispatchOutcome::failure("handler_failure", e.to_string()),
            Err(HookFailure::TimedOut) => DispatchOutcome::failure(
                "timeout",
                format!("handler timed out after {}ms", self.timeouts.handler.as_millis()),
            ),
            Err(failure) => DispatchOutcome::failure("handler_failure", failure.to_string()),
        };
        self.failures.fetch_add(1, Ordering::Relaxed);
        warn!(
            plugin = %self.id(),
            kind = %kind,
            error = outcome.error.as_deref().unwrap_or(""),
            "Plugin handler failed"
        );
        Ok(outcome)
    }

    // ─── Popups ──────────────────────────────────────────────────────────────

    /// Attaches a popup channel. Requires `Ready`.
    pub(crate) fn attach_popup(
        &self,
        popup_id: &str,
    ) -> PluginResult<mpsc::UnboundedReceiver<Envelope>> {
        let state = self.state();
        if state != LifecycleState::Ready {
            return Err(self.not_ready(state));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        if self.popups.lock().insert(popup_id.to_string(), tx).is_some() {
            debug!(plugin = %self.id(), popup = %popup_id, "Replaced popup channel");
        }
        Ok(rx)
    }

    /// Detaches a popup, sending it a final `window-closed`. Returns false if
    /// the popup was not attached.
    pub(crate) fn detach_popup(&self, popup_id: &str) -> bool {
        let Some(tx) = self.popups.lock().remove(popup_id) else {
            return false;
        };
        let _ = tx.send(Envelope::lifecycle(WINDOW_CLOSED, self.id()).for_popup(popup_id));
        true
    }

    fn close_all_popups(&self) {
        let popups = std::mem::take(&mut *self.popups.lock());
        for (popup_id, tx) in popups {
            let _ = tx.send(Envelope::lifecycle(WINDOW_CLOSED, self.id()).for_popup(&popup_id));
        }
    }

    /// Attached popup ids, in order.
    pub fn popup_ids(&self) -> Vec<String> {
        self.popups.lock().keys().cloned().collect()
    }

    /// Sends a copy of `envelope` to every attached popup.
    ///
    /// Lifecycle envelopes keep their own `popupId` (the popup they concern);
    /// untagged data envelopes are tagged with the receiving popup's id.
    /// Popups whose receiver is gone are dropped.
    pub(crate) fn fan_out(&self, envelope: &Envelope) {
        let mut popups = self.popups.lock();
        popups.retain(|popup_id, tx| {
            let mut copy = envelope.clone();
            if copy.popup_id.is_none() {
                copy.popup_id = Some(popup_id.clone());
            }
            tx.send(copy).is_ok()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livehub_core::{BoxError, HookOutcome};
    use serde_json::json;

    fn instance(module: PluginModule) -> PluginInstance {
        let exports = module.exports();
        PluginInstance::new(
            PluginManifest::new("courier"),
            module,
            exports,
            json!({}),
            HookTimeouts {
                init: Duration::from_millis(100),
                cleanup: Duration::from_millis(100),
                handler: Duration::from_millis(100),
            },
        )
    }

    fn base() -> PluginModule {
        PluginModule::new("courier")
            .on_init(|_| async { HookOutcome::ok() })
            .on_cleanup(|| async { HookOutcome::ok() })
    }

    fn explode() -> HookOutcome {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_init_panic_leaves_unloaded() {
        let inst = instance(
            PluginModule::new("courier")
                .on_init(|_| async { explode() })
                .on_cleanup(|| async { HookOutcome::ok() }),
        );
        let err = inst.initialize(Value::Null).await.unwrap_err();
        assert_eq!(err.code(), "init_failed");
        assert!(err.to_string().contains("boom"));
        assert_eq!(inst.state(), LifecycleState::Unloaded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_timeout_leaves_unloaded() {
        let inst = instance(
            PluginModule::new("courier")
                .on_init(|_| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    HookOutcome::ok()
                })
                .on_cleanup(|| async { HookOutcome::ok() }),
        );
        let err = inst.initialize(Value::Null).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert_eq!(inst.state(), LifecycleState::Unloaded);
    }

    #[tokio::test]
    async fn test_handler_failures_are_values() {
        let inst = instance(base().on_message(|kind, _| async move {
            match kind.as_str() {
                "boom" => panic!("handler exploded"),
                "err" => Err::<Value, BoxError>("bad input".into()),
                _ => Ok(json!("fine")),
            }
        }));
        inst.initialize(Value::Null).await.unwrap();

        let ok = inst.handle("hello", json!({})).await.unwrap();
        assert!(ok.ok);
        let err = inst.handle("err", json!({})).await.unwrap();
        assert_eq!(err.code.as_deref(), Some("handler_failure"));
        let panicked = inst.handle("boom", json!({})).await.unwrap();
        assert!(!panicked.ok);
        assert!(panicked.error.unwrap().contains("handler exploded"));

        assert_eq!(inst.state(), LifecycleState::Ready);
        let info = inst.info();
        assert_eq!(info.handled, 1);
        assert_eq!(info.failures, 2);
    }

    #[tokio::test]
    async fn test_handle_requires_ready() {
        let inst = instance(base().on_message(|_, v| async move { Ok(v) }));
        let err = inst.handle("x", json!(1)).await.unwrap_err();
        assert_eq!(err.code(), "not_ready");
    }

    #[tokio::test]
    async fn test_cleanup_runs_once_per_init() {
        let calls = std::sync::Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let inst = instance(
            PluginModule::new("courier")
                .on_init(|_| async { HookOutcome::ok() })
                .on_cleanup(move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        HookOutcome::ok()
                    }
                }),
        );
        inst.initialize(Value::Null).await.unwrap();
        inst.teardown().await;
        inst.teardown().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(inst.state(), LifecycleState::Unloaded);
    }

    #[tokio::test]
    async fn test_teardown_closes_popups() {
        let inst = instance(base());
        inst.initialize(Value::Null).await.unwrap();
        let mut rx = inst.attach_popup("p1").unwrap();
        inst.teardown().await;

        let last = rx.recv().await.unwrap();
        assert_eq!(last.event, WINDOW_CLOSED);
        assert_eq!(last.popup_id.as_deref(), Some("p1"));
        assert!(rx.recv().await.is_none());
        assert!(inst.popup_ids().is_empty());
    }
}
