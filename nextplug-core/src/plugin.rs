//! The plugin interface and its adapters.
//!
//! [`Plugin`] is the capability-set every loaded module is adapted into.
//! [`ModulePlugin`] builds one from closures, and [`PluginSource`] is the
//! collaborator that turns a source reference into a [`LoadedPlugin`].

use crate::bus::Message;
use crate::config::PluginConfig;
use crate::error::{PluginError, PluginResult};
use crate::events::OperationKind;
use crate::pipeline::hooks::{FnHook, HookBinding};
use crate::pipeline::middleware::{Middleware, MiddlewareBinding};
use crate::types::{HookSpec, MiddlewareSpec, PluginMetadata};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-call context handed to operation handlers.
///
/// The cancellation token fires when the call times out. Long-running
/// handlers should poll it or `select!` on [`CancellationToken::cancelled`].
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Plugin being called
    pub plugin_id: String,

    /// Operation kind
    pub kind: OperationKind,

    /// Operation name
    pub operation: String,

    /// Unique call id
    pub request_id: Uuid,

    /// Plugin settings at call time
    pub settings: Map<String, Value>,

    /// Call start
    pub started_at: Instant,

    cancellation: CancellationToken,
}

impl ExecutionContext {
    /// Create a context for one call.
    pub fn new(
        plugin_id: impl Into<String>,
        kind: OperationKind,
        operation: impl Into<String>,
        settings: Map<String, Value>,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            kind,
            operation: operation.into(),
            request_id: Uuid::new_v4(),
            settings,
            started_at: Instant::now(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Token cancelled when the call is abandoned.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Check whether the call was abandoned.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Operation key (`tool:<name>`).
    pub fn operation_key(&self) -> String {
        self.kind.key(&self.operation)
    }
}

/// Health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Operating normally
    Healthy,
    /// Operating with reduced quality
    Degraded,
    /// Not operating
    Unhealthy,
}

/// Health report returned by [`Plugin::health_check`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginHealth {
    /// Overall status
    pub status: HealthStatus,

    /// Human-readable summary
    pub message: String,

    /// Report time
    pub timestamp: DateTime<Utc>,

    /// Additional details
    pub details: HashMap<String, String>,
}

impl PluginHealth {
    /// A healthy report.
    pub fn healthy() -> Self {
        Self::with_status(HealthStatus::Healthy, "Plugin is healthy")
    }

    /// A report with the given status.
    pub fn with_status(status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            timestamp: Utc::now(),
            details: HashMap::new(),
        }
    }

    /// Attach a detail.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Capability-set interface implemented by every plugin.
///
/// Lifecycle callbacks, contributions and health reporting have defaults.
/// The operation calls must be provided; return
/// [`PluginError::OperationNotFound`] for names the plugin does not serve.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Called once on first enable, before [`enable`](Self::enable).
    async fn initialize(&self, _config: &PluginConfig) -> PluginResult<()> {
        Ok(())
    }

    /// Called once on uninstall.
    async fn destroy(&self) -> PluginResult<()> {
        Ok(())
    }

    /// Called after every accepted configuration change.
    async fn configure(&self, _config: &PluginConfig) -> PluginResult<()> {
        Ok(())
    }

    /// Called when the plugin becomes active.
    async fn enable(&self) -> PluginResult<()> {
        Ok(())
    }

    /// Called when the plugin is deactivated.
    async fn disable(&self) -> PluginResult<()> {
        Ok(())
    }

    /// Run a tool.
    async fn call_tool(&self, name: &str, input: Value, ctx: &ExecutionContext) -> PluginResult<Value>;

    /// Run an action.
    async fn call_action(&self, name: &str, input: Value, ctx: &ExecutionContext) -> PluginResult<Value>;

    /// Read a resource.
    async fn read_resource(&self, name: &str, ctx: &ExecutionContext) -> PluginResult<Value>;

    /// Handle a bus message. The returned value answers requests.
    async fn handle_message(&self, message: &Message) -> PluginResult<Option<Value>>;

    /// Hook handlers contributed while enabled.
    fn hooks(&self) -> Vec<HookBinding> {
        Vec::new()
    }

    /// Middleware contributed while enabled.
    fn middleware(&self) -> Vec<MiddlewareBinding> {
        Vec::new()
    }

    /// Report health.
    async fn health_check(&self) -> PluginHealth {
        PluginHealth::healthy()
    }

    /// Estimated memory footprint in bytes.
    fn memory_usage(&self) -> u64 {
        0
    }
}

type OperationFn = Arc<dyn Fn(Value, ExecutionContext) -> BoxFuture<'static, PluginResult<Value>> + Send + Sync>;
type ResourceFn = Arc<dyn Fn(ExecutionContext) -> BoxFuture<'static, PluginResult<Value>> + Send + Sync>;
type MessageFn = Arc<dyn Fn(Message) -> BoxFuture<'static, PluginResult<Option<Value>>> + Send + Sync>;
type ConfigFn = Arc<dyn Fn(PluginConfig) -> BoxFuture<'static, PluginResult<()>> + Send + Sync>;
type CallbackFn = Arc<dyn Fn() -> BoxFuture<'static, PluginResult<()>> + Send + Sync>;
type HealthFn = Arc<dyn Fn() -> PluginHealth + Send + Sync>;

/// Closure-backed [`Plugin`].
///
/// # Examples
///
/// ```rust
/// use nextplug_core::plugin::ModulePlugin;
///
/// let plugin = ModulePlugin::builder("echo-plugin")
///     .tool("echo", |input, _ctx| async move { Ok(input) })
///     .build();
/// assert!(plugin.has_tool("echo"));
/// ```
pub struct ModulePlugin {
    plugin_id: String,
    tools: HashMap<String, OperationFn>,
    actions: HashMap<String, OperationFn>,
    resources: HashMap<String, ResourceFn>,
    on_message: Option<MessageFn>,
    on_initialize: Option<ConfigFn>,
    on_configure: Option<ConfigFn>,
    on_enable: Option<CallbackFn>,
    on_disable: Option<CallbackFn>,
    on_destroy: Option<CallbackFn>,
    hooks: Vec<HookBinding>,
    middleware: Vec<MiddlewareBinding>,
    health: Option<HealthFn>,
    memory_bytes: u64,
}

impl ModulePlugin {
    /// Start building a plugin for `plugin_id`.
    pub fn builder(plugin_id: impl Into<String>) -> ModulePluginBuilder {
        ModulePluginBuilder {
            inner: ModulePlugin {
                plugin_id: plugin_id.into(),
                tools: HashMap::new(),
                actions: HashMap::new(),
                resources: HashMap::new(),
                on_message: None,
                on_initialize: None,
                on_configure: None,
                on_enable: None,
                on_disable: None,
                on_destroy: None,
                hooks: Vec::new(),
                middleware: Vec::new(),
                health: None,
                memory_bytes: 0,
            },
        }
    }

    /// Check whether a tool handler exists.
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Plugin id this adapter answers for.
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }
}

impl std::fmt::Debug for ModulePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tools: Vec<_> = self.tools.keys().collect();
        tools.sort();
        f.debug_struct("ModulePlugin")
            .field("plugin_id", &self.plugin_id)
            .field("tools", &tools)
            .field("hooks", &self.hooks.len())
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

/// Builder for [`ModulePlugin`].
pub struct ModulePluginBuilder {
    inner: ModulePlugin,
}

impl ModulePluginBuilder {
    /// Register a tool handler.
    pub fn tool<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value, ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PluginResult<Value>> + Send + 'static,
    {
        self.inner
            .tools
            .insert(name.into(), Arc::new(move |input: Value, ctx: ExecutionContext| -> BoxFuture<'static, PluginResult<Value>> {
                Box::pin(handler(input, ctx))
            }));
        self
    }

    /// Register an action handler.
    pub fn action<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value, ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PluginResult<Value>> + Send + 'static,
    {
        self.inner
            .actions
            .insert(name.into(), Arc::new(move |input: Value, ctx: ExecutionContext| -> BoxFuture<'static, PluginResult<Value>> {
                Box::pin(handler(input, ctx))
            }));
        self
    }

    /// Register a resource reader.
    pub fn resource<F, Fut>(mut self, name: impl Into<String>, reader: F) -> Self
    where
        F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PluginResult<Value>> + Send + 'static,
    {
        self.inner
            .resources
            .insert(name.into(), Arc::new(move |ctx: ExecutionContext| -> BoxFuture<'static, PluginResult<Value>> {
                Box::pin(reader(ctx))
            }));
        self
    }

    /// Handle bus messages.
    pub fn on_message<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PluginResult<Option<Value>>> + Send + 'static,
    {
        self.inner.on_message = Some(Arc::new(
            move |message: Message| -> BoxFuture<'static, PluginResult<Option<Value>>> { Box::pin(handler(message)) },
        ));
        self
    }

    /// Run on initialize.
    pub fn on_initialize<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(PluginConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PluginResult<()>> + Send + 'static,
    {
        self.inner.on_initialize = Some(Arc::new(
            move |config: PluginConfig| -> BoxFuture<'static, PluginResult<()>> { Box::pin(callback(config)) },
        ));
        self
    }

    /// Run on configuration changes.
    pub fn on_configure<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(PluginConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PluginResult<()>> + Send + 'static,
    {
        self.inner.on_configure = Some(Arc::new(
            move |config: PluginConfig| -> BoxFuture<'static, PluginResult<()>> { Box::pin(callback(config)) },
        ));
        self
    }

    /// Run on enable.
    pub fn on_enable<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PluginResult<()>> + Send + 'static,
    {
        self.inner.on_enable = Some(Arc::new(move || -> BoxFuture<'static, PluginResult<()>> { Box::pin(callback()) }));
        self
    }

    /// Run on disable.
    pub fn on_disable<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PluginResult<()>> + Send + 'static,
    {
        self.inner.on_disable = Some(Arc::new(move || -> BoxFuture<'static, PluginResult<()>> { Box::pin(callback()) }));
        self
    }

    /// Run on destroy.
    pub fn on_destroy<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PluginResult<()>> + Send + 'static,
    {
        self.inner.on_destroy = Some(Arc::new(move || -> BoxFuture<'static, PluginResult<()>> { Box::pin(callback()) }));
        self
    }

    /// Contribute a hook.
    pub fn hook<F, Fut>(mut self, spec: HookSpec, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, crate::error::HookError>> + Send + 'static,
    {
        self.inner
            .hooks
            .push(HookBinding::new(spec, Arc::new(FnHook::new(handler))));
        self
    }

    /// Contribute a middleware.
    pub fn middleware(mut self, spec: MiddlewareSpec, handler: Arc<dyn Middleware>) -> Self {
        self.inner.middleware.push(MiddlewareBinding::new(spec, handler));
        self
    }

    /// Override the health report.
    pub fn health<F>(mut self, report: F) -> Self
    where
        F: Fn() -> PluginHealth + Send + Sync + 'static,
    {
        self.inner.health = Some(Arc::new(report));
        self
    }

    /// Report a fixed memory footprint.
    pub fn memory_usage(mut self, bytes: u64) -> Self {
        self.inner.memory_bytes = bytes;
        self
    }

    /// Finish building.
    pub fn build(self) -> ModulePlugin {
        self.inner
    }
}

#[async_trait]
impl Plugin for ModulePlugin {
    async fn initialize(&self, config: &PluginConfig) -> PluginResult<()> {
        match &self.on_initialize {
            Some(callback) => callback(config.clone()).await,
            None => Ok(()),
        }
    }

    async fn destroy(&self) -> PluginResult<()> {
        match &self.on_destroy {
            Some(callback) => callback().await,
            None => Ok(()),
        }
    }

    async fn configure(&self, config: &PluginConfig) -> PluginResult<()> {
        match &self.on_configure {
            Some(callback) => callback(config.clone()).await,
            None => Ok(()),
        }
    }

    async fn enable(&self) -> PluginResult<()> {
        match &self.on_enable {
            Some(callback) => callback().await,
            None => Ok(()),
        }
    }

    async fn disable(&self) -> PluginResult<()> {
        match &self.on_disable {
            Some(callback) => callback().await,
            None => Ok(()),
        }
    }

    async fn call_tool(&self, name: &str, input: Value, ctx: &ExecutionContext) -> PluginResult<Value> {
        let handler = self
            .tools
            .get(name)
            .ok_or_else(|| PluginError::operation_not_found(&self.plugin_id, "tool", name))?;
        handler(input, ctx.clone()).await
    }

    async fn call_action(&self, name: &str, input: Value, ctx: &ExecutionContext) -> PluginResult<Value> {
        let handler = self
            .actions
            .get(name)
            .ok_or_else(|| PluginError::operation_not_found(&self.plugin_id, "action", name))?;
        handler(input, ctx.clone()).await
    }

    async fn read_resource(&self, name: &str, ctx: &ExecutionContext) -> PluginResult<Value> {
        let reader = self
            .resources
            .get(name)
            .ok_or_else(|| PluginError::operation_not_found(&self.plugin_id, "resource", name))?;
        reader(ctx.clone()).await
    }

    async fn handle_message(&self, message: &Message) -> PluginResult<Option<Value>> {
        match &self.on_message {
            Some(handler) => handler(message.clone()).await,
            None => Ok(None),
        }
    }

    fn hooks(&self) -> Vec<HookBinding> {
        self.hooks.clone()
    }

    fn middleware(&self) -> Vec<MiddlewareBinding> {
        self.middleware.clone()
    }

    async fn health_check(&self) -> PluginHealth {
        match &self.health {
            Some(report) => report(),
            None => PluginHealth::healthy(),
        }
    }

    fn memory_usage(&self) -> u64 {
        self.memory_bytes
    }
}

/// Metadata plus the adapted plugin, as produced by a [`PluginSource`].
#[derive(Clone)]
pub struct LoadedPlugin {
    /// Plugin descriptor
    pub metadata: PluginMetadata,

    /// Adapted plugin object
    pub plugin: Arc<dyn Plugin>,
}

impl LoadedPlugin {
    /// Pair metadata with a plugin.
    pub fn new(metadata: PluginMetadata, plugin: Arc<dyn Plugin>) -> Self {
        Self { metadata, plugin }
    }
}

impl std::fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("id", &self.metadata.id)
            .field("version", &self.metadata.version)
            .finish()
    }
}

/// Resolves a source reference into a loaded plugin.
#[async_trait]
pub trait PluginSource: Send + Sync + 'static {
    /// Load `plugin_id` from `source`.
    async fn load(&self, plugin_id: &str, source: &str) -> PluginResult<LoadedPlugin>;
}

type PluginFactory = Arc<dyn Fn() -> LoadedPlugin + Send + Sync>;

/// In-memory registry of plugin factories keyed by source reference.
#[derive(Default)]
pub struct StaticPluginSource {
    factories: DashMap<String, PluginFactory>,
}

impl StaticPluginSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a source reference.
    pub fn register<F>(&self, source: impl Into<String>, factory: F)
    where
        F: Fn() -> LoadedPlugin + Send + Sync + 'static,
    {
        self.factories.insert(source.into(), Arc::new(factory));
    }

    /// Number of registered sources.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Check whether no sources are registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[async_trait]
impl PluginSource for StaticPluginSource {
    async fn load(&self, plugin_id: &str, source: &str) -> PluginResult<LoadedPlugin> {
        let factory = self
            .factories
            .get(source)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| PluginError::installation(plugin_id, format!("unknown plugin source: {source}")))?;

        let loaded = factory();
        if loaded.metadata.id != plugin_id {
            return Err(PluginError::installation(
                plugin_id,
                format!("source {source} provides plugin {}", loaded.metadata.id),
            ));
        }
        Ok(loaded)
    }
}
