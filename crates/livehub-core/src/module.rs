//! The plugin module contract.
//!
//! A [`PluginModule`] bundles the hooks a plugin exports:
//!
//! - `init` (required): called with an [`InitContext`] when the plugin loads.
//! - `cleanup` (required): called once per successful `init`.
//! - `handle_message` (optional): receives data envelopes and dispatches.
//!   Plugins without it are *passive*.
//!
//! Hooks are async closures. State that survives across calls lives in
//! captured `Arc`s:
//!
//! ```rust,ignore
//! let seen = Arc::new(AtomicU64::new(0));
//! let module = PluginModule::new("counter")
//!     .on_init(|_ctx| async { HookOutcome::ok() })
//!     .on_cleanup(|| async { HookOutcome::ok() })
//!     .on_message(move |kind, _payload| {
//!         let seen = seen.clone();
//!         async move { Ok(json!({ "kind": kind, "seen": seen.fetch_add(1, SeqCst) + 1 })) }
//!     });
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Boxed error type returned by message handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Stored `init` hook.
pub type InitFn = Arc<dyn Fn(InitContext) -> BoxFuture<'static, HookOutcome> + Send + Sync>;

/// Stored `cleanup` hook.
pub type CleanupFn = Arc<dyn Fn() -> BoxFuture<'static, HookOutcome> + Send + Sync>;

/// Stored `handle_message` hook.
pub type MessageFn =
    Arc<dyn Fn(String, Value) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;

// ─── LifecycleState ───────────────────────────────────────────────────────────

/// Lifecycle state of a plugin instance. `Unloaded` is initial and terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Not running.
    Unloaded,
    /// `init` in progress.
    Initializing,
    /// Accepting messages.
    Ready,
    /// `cleanup` in progress.
    Cleaning,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Unloaded => "unloaded",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Cleaning => "cleaning",
        })
    }
}

// ─── Hook values ──────────────────────────────────────────────────────────────

/// Result of an `init` or `cleanup` hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookOutcome {
    /// Whether the hook succeeded.
    pub ok: bool,
    /// Optional detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HookOutcome {
    /// A successful outcome.
    pub fn ok() -> Self {
        Self {
            ok: true,
            message: None,
        }
    }

    /// A failed outcome with a reason.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
        }
    }

    /// Attaches a message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Context passed to a plugin's `init` hook.
///
/// Every field is an owned copy; nothing here aliases host state.
#[derive(Debug, Clone)]
pub struct InitContext {
    /// The plugin being initialized.
    pub plugin_id: String,
    /// The plugin's configuration section (`{}` when absent).
    pub config: Value,
    /// The current room projection, as JSON.
    pub projection: Value,
}

impl InitContext {
    /// Deserializes the configuration section into `T`.
    pub fn get_config<T>(&self) -> serde_json::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        T::deserialize(&self.config)
    }
}

/// Structured result of a dispatch to a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    /// Whether the handler produced a result.
    pub ok: bool,
    /// Handler result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable failure code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl DispatchOutcome {
    /// A successful dispatch.
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
            code: None,
        }
    }

    /// A failed dispatch.
    pub fn failure(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error.into()),
            code: Some(code.into()),
        }
    }
}

// ─── PluginExports ────────────────────────────────────────────────────────────

/// The hooks a module exports, computed once when it is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginExports {
    /// Exports `init`.
    pub init: bool,
    /// Exports `cleanup`.
    pub cleanup: bool,
    /// Exports `handle_message`.
    pub handle_message: bool,
}

impl PluginExports {
    /// Names of required hooks that are missing.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.init {
            missing.push("init");
        }
        if !self.cleanup {
            missing.push("cleanup");
        }
        missing
    }

    /// Returns true if the module has no message handler.
    pub fn is_passive(&self) -> bool {
        !self.handle_message
    }
}

// ─── PluginModule ─────────────────────────────────────────────────────────────

/// A plugin implementation: a name plus its exported hooks.
#[derive(Clone)]
pub struct PluginModule {
    name: Cow<'static, str>,
    init: Option<InitFn>,
    cleanup: Option<CleanupFn>,
    handle_message: Option<MessageFn>,
}

impl std::fmt::Debug for PluginModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginModule")
            .field("name", &self.name)
            .field("exports", &self.exports())
            .finish()
    }
}

impl PluginModule {
    /// Creates a module with no hooks.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            init: None,
            cleanup: None,
            handle_message: None,
        }
    }

    /// Sets the `init` hook.
    pub fn on_init<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(InitContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookOutcome> + Send + 'static,
    {
        let f = Arc::new(f);
        self.init = Some(Arc::new(move |ctx| {
            let f = Arc::clone(&f);
            async move { f(ctx).await }.boxed()
        }));
        self
    }

    /// Sets the `cleanup` hook.
    pub fn on_cleanup<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookOutcome> + Send + 'static,
    {
        let f = Arc::new(f);
        self.cleanup = Some(Arc::new(move || {
            let f = Arc::clone(&f);
            async move { f().await }.boxed()
        }));
        self
    }

    /// Sets the `handle_message` hook.
    pub fn on_message<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.handle_message = Some(Arc::new(move |kind, payload| {
            let f = Arc::clone(&f);
            async move { f(kind, payload).await }.boxed()
        }));
        self
    }

    /// Returns the module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the exported hook set.
    pub fn exports(&self) -> PluginExports {
        PluginExports {
            init: self.init.is_some(),
            cleanup: self.cleanup.is_some(),
            handle_message: self.handle_message.is_some(),
        }
    }

    /// Returns a future running `init`, or `None` if not exported.
    ///
    /// The closure body only runs when the future is polled, so panics in it
    /// surface through the future.
    pub fn init(&self, ctx: InitContext) -> Option<BoxFuture<'static, HookOutcome>> {
        self.init.as_ref().map(|f| f(ctx))
    }

    /// Returns a future running `cleanup`, or `None` if not exported.
    pub fn cleanup(&self) -> Option<BoxFuture<'static, HookOutcome>> {
        self.cleanup.as_ref().map(|f| f())
    }

    /// Returns a future running `handle_message`, or `None` if passive.
    pub fn handle_message(
        &self,
        kind: String,
        payload: Value,
    ) -> Option<BoxFuture<'static, Result<Value, BoxError>>> {
        self.handle_message.as_ref().map(|f| f(kind, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_exports_reflect_hooks() {
        let passive = PluginModule::new("p")
            .on_init(|_| async { HookOutcome::ok() })
            .on_cleanup(|| async { HookOutcome::ok() });
        let exports = passive.exports();
        assert!(exports.missing_required().is_empty());
        assert!(exports.is_passive());

        let broken = PluginModule::new("b").on_message(|_, v| async move { Ok(v) });
        assert_eq!(broken.exports().missing_required(), ["init", "cleanup"]);
    }

    #[tokio::test]
    async fn test_hooks_run_when_polled() {
        let module = PluginModule::new("echo")
            .on_init(|ctx| async move {
                HookOutcome::ok().with_message(ctx.plugin_id)
            })
            .on_message(|kind, payload| async move { Ok(json!({ "kind": kind, "echo": payload })) });

        let ctx = InitContext {
            plugin_id: "echo".into(),
            config: json!({}),
            projection: Value::Null,
        };
        let outcome = module.init(ctx).unwrap().await;
        assert_eq!(outcome.message.as_deref(), Some("echo"));

        let reply = module
            .handle_message("hello".into(), json!(1))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(reply, json!({ "kind": "hello", "echo": 1 }));
        assert!(module.cleanup().is_none());
    }

    #[test]
    fn test_init_context_config() {
        #[derive(Deserialize)]
        struct Cfg {
            threshold: u32,
        }
        let ctx = InitContext {
            plugin_id: "x".into(),
            config: json!({ "threshold": 9 }),
            projection: Value::Null,
        };
        assert_eq!(ctx.get_config::<Cfg>().unwrap().threshold, 9);
    }

    #[test]
    fn test_dispatch_outcome_shape() {
        let v = serde_json::to_value(DispatchOutcome::failure("not_supported", "passive")).unwrap();
        assert_eq!(v, json!({ "ok": false, "error": "passive", "code": "not_supported" }));
    }
}
