//! # Event, Hook and Middleware Pipeline
//!
//! Plugins contribute hooks (event transforms run as a prioritized chain) and
//! middleware (request, response and error stages wrapped around every
//! operation). Both are registered under `<plugin_id>:<name>` keys.

pub mod hooks;
pub mod middleware;

pub use hooks::{FnHook, HookBinding, HookHandler, HookRegistration, HookRegistry, HookStatistics};
pub use middleware::{FnMiddleware, Middleware, MiddlewareBinding, MiddlewareChain, MiddlewareContext, Next};

use crate::config::PluginConfig;
use crate::error::PluginResult;
use crate::events::{EventChannel, PipelineEvent};
use crate::types::MiddlewareStage;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Well-known event names emitted by the engine.
pub mod event_names {
    /// A tool call finished
    pub const TOOL_EXECUTED: &str = "tool:executed";
    /// An action call finished
    pub const ACTION_EXECUTED: &str = "action:executed";
    /// A plugin became active
    pub const PLUGIN_ENABLED: &str = "plugin:enabled";
    /// A plugin was deactivated
    pub const PLUGIN_DISABLED: &str = "plugin:disabled";
}

/// Hook registry plus middleware chains.
pub struct Pipeline {
    hooks: HookRegistry,
    middleware: MiddlewareChain,
    events: Arc<EventChannel<PipelineEvent>>,
}

impl Pipeline {
    /// Create an empty pipeline publishing on `events`.
    pub fn new(events: Arc<EventChannel<PipelineEvent>>) -> Self {
        Self {
            hooks: HookRegistry::new(Arc::clone(&events)),
            middleware: MiddlewareChain::new(),
            events,
        }
    }

    /// Register a hook.
    pub fn register_hook(&self, plugin_id: &str, binding: HookBinding) -> String {
        self.hooks.register(plugin_id, binding)
    }

    /// Register a middleware.
    pub fn register_middleware(&self, plugin_id: &str, binding: MiddlewareBinding) -> String {
        self.middleware.register(plugin_id, binding)
    }

    /// Replace a plugin's registrations with its contributions that are
    /// toggled on in `config`. Returns `(hooks, middleware)` registered.
    pub fn sync_plugin(
        &self,
        plugin_id: &str,
        hooks: Vec<HookBinding>,
        middleware: Vec<MiddlewareBinding>,
        config: &PluginConfig,
    ) -> (usize, usize) {
        self.unregister_plugin(plugin_id);

        let mut hook_count = 0;
        for binding in hooks {
            if config.hook_enabled(&binding.spec.name) {
                self.register_hook(plugin_id, binding);
                hook_count += 1;
            }
        }
        let mut middleware_count = 0;
        for binding in middleware {
            if config.middleware_enabled(&binding.spec.name) {
                self.register_middleware(plugin_id, binding);
                middleware_count += 1;
            }
        }
        (hook_count, middleware_count)
    }

    /// Remove every hook and middleware owned by `plugin_id`.
    pub fn unregister_plugin(&self, plugin_id: &str) -> usize {
        self.hooks.unregister_plugin(plugin_id) + self.middleware.unregister_plugin(plugin_id)
    }

    /// Run the hook chain for `event`.
    pub async fn emit_event(&self, event: &str, data: Value) -> PluginResult<Value> {
        self.hooks.emit(event, data).await
    }

    /// Run the middleware chain for `ctx.stage`.
    pub async fn run_middleware(&self, ctx: &MiddlewareContext, value: Value) -> PluginResult<Value> {
        self.middleware.run(ctx, value).await
    }

    /// Registered hooks, optionally for one event.
    pub fn hook_count(&self, event: Option<&str>) -> usize {
        self.hooks.count(event)
    }

    /// Registered middleware, optionally for one stage.
    pub fn middleware_count(&self, stage: Option<MiddlewareStage>) -> usize {
        self.middleware.count(stage)
    }

    /// Events with at least one hook.
    pub fn registered_events(&self) -> Vec<String> {
        self.hooks.registered_events()
    }

    /// Hook registry.
    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Middleware chains.
    pub fn middleware(&self) -> &MiddlewareChain {
        &self.middleware
    }

    /// Hook execution statistics.
    pub fn statistics(&self) -> Arc<HookStatistics> {
        self.hooks.statistics()
    }

    /// Subscribe to pipeline notifications.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Start the periodic statistics reporter.
    pub fn spawn_reporter(&self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        self.hooks.spawn_reporter(interval, shutdown)
    }
}
