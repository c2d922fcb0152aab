//! Plugin manager: the host-facing orchestration layer.
//!
//! [`EngineContext`] owns one instance of every component and is built once
//! from an [`EngineConfig`]. [`PluginManager`] drives installs, lifecycle
//! changes, configuration, execution and messaging across those components.

use crate::bus::{BusStats, MessageBus, MessageOptions};
use crate::config::{ConfigPersistence, ConfigStore, EngineConfig, MemoryConfigPersistence, PluginConfig, PluginConfigUpdate};
use crate::dependency::{DependencyGraph, GraphStats, InstallCheck, NodeStatus};
use crate::error::{PluginError, PluginResult};
use crate::events::{BusEvent, EventChannel, ExecutionEvent, LifecycleEvent, MonitorEvent, PipelineEvent};
use crate::execution::{ExecutionEngine, ExecutionStats};
use crate::lifecycle::{LifecycleManager, LifecycleStats, PluginInstance, PluginState, PluginSummary};
use crate::monitor::{PerformanceMonitor, PerformanceReport};
use crate::pipeline::{event_names, Pipeline};
use crate::plugin::{HealthStatus, LoadedPlugin, Plugin, PluginHealth, PluginSource};
use crate::security::{SecurityValidator, ValidationStatsSnapshot};
use crate::types::PluginMetadata;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Events buffered per subscriber before slow receivers start lagging.
const EVENT_BUFFER: usize = 1024;

/// Every component of a running engine.
pub struct EngineContext {
    /// Validated engine configuration
    pub config: EngineConfig,
    /// Metadata and permission checks
    pub security: Arc<SecurityValidator>,
    /// Per-plugin configuration
    pub configs: Arc<ConfigStore>,
    /// Dependency graph
    pub dependencies: Arc<DependencyGraph>,
    /// Plugin registry and state machine
    pub lifecycle: Arc<LifecycleManager>,
    /// Hooks and middleware
    pub pipeline: Arc<Pipeline>,
    /// Operation dispatch
    pub execution: Arc<ExecutionEngine>,
    /// Inter-plugin messaging
    pub bus: Arc<MessageBus>,
    /// Performance sampling
    pub monitor: Arc<PerformanceMonitor>,
    /// Lifecycle notifications
    pub lifecycle_events: Arc<EventChannel<LifecycleEvent>>,
    /// Execution notifications
    pub execution_events: Arc<EventChannel<ExecutionEvent>>,
    /// Bus notifications
    pub bus_events: Arc<EventChannel<BusEvent>>,
    /// Monitor notifications
    pub monitor_events: Arc<EventChannel<MonitorEvent>>,
    /// Pipeline notifications
    pub pipeline_events: Arc<EventChannel<PipelineEvent>>,
}

impl EngineContext {
    /// Build every component with in-memory configuration persistence.
    ///
    /// # Errors
    /// `CONFIGURATION_ERROR` when `config` fails validation or the security
    /// policy does not compile.
    pub fn new(config: EngineConfig) -> PluginResult<Self> {
        Self::with_persistence(config, Arc::new(MemoryConfigPersistence::new()))
    }

    /// Build every component over the given configuration persistence.
    pub fn with_persistence(config: EngineConfig, persistence: Arc<dyn ConfigPersistence>) -> PluginResult<Self> {
        config.check()?;

        let lifecycle_events = Arc::new(EventChannel::new(EVENT_BUFFER));
        let execution_events = Arc::new(EventChannel::new(EVENT_BUFFER));
        let bus_events = Arc::new(EventChannel::new(EVENT_BUFFER));
        let monitor_events = Arc::new(EventChannel::new(EVENT_BUFFER));
        let pipeline_events = Arc::new(EventChannel::new(EVENT_BUFFER));

        let security = Arc::new(SecurityValidator::new(config.security.clone())?);
        let configs = Arc::new(ConfigStore::new(persistence));
        let dependencies = Arc::new(DependencyGraph::new(config.dependency.clone(), config.host_version.clone()));
        let lifecycle = Arc::new(LifecycleManager::new(Arc::clone(&lifecycle_events)));
        let pipeline = Arc::new(Pipeline::new(Arc::clone(&pipeline_events)));
        let monitor = Arc::new(PerformanceMonitor::new(config.monitor.clone(), Arc::clone(&monitor_events)));
        let bus = Arc::new(MessageBus::new(config.bus.clone(), Arc::clone(&bus_events)));
        let execution = Arc::new(ExecutionEngine::new(
            config.execution.clone(),
            Arc::clone(&security),
            Arc::clone(&configs),
            Arc::clone(&pipeline),
            Arc::clone(&monitor),
            Arc::clone(&execution_events),
        ));

        Ok(Self {
            config,
            security,
            configs,
            dependencies,
            lifecycle,
            pipeline,
            execution,
            bus,
            monitor,
            lifecycle_events,
            execution_events,
            bus_events,
            monitor_events,
            pipeline_events,
        })
    }
}

/// Aggregated engine statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerStats {
    /// Lifecycle counters and state distribution
    pub lifecycle: LifecycleStats,
    /// Execution counters
    pub execution: ExecutionStats,
    /// Bus counters
    pub bus: BusStats,
    /// Dependency graph shape
    pub dependencies: GraphStats,
    /// Security validation counters
    pub security: ValidationStatsSnapshot,
    /// Registered hooks
    pub hooks: usize,
    /// Registered middleware
    pub middleware: usize,
    /// Plugins under performance monitoring
    pub monitored: usize,
}

/// Host-facing plugin engine.
///
/// # Examples
///
/// ```rust,no_run
/// use nextplug_core::config::EngineConfig;
/// use nextplug_core::manager::{EngineContext, PluginManager};
/// use nextplug_core::plugin::ModulePlugin;
/// use nextplug_core::types::{OperationSpec, PluginMetadata};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # async fn demo() -> nextplug_core::error::PluginResult<()> {
/// let manager = PluginManager::new(EngineContext::new(EngineConfig::default())?);
/// manager.initialize().await?;
///
/// let metadata = PluginMetadata::new("echo-plugin", "Echo", "1.0.0")
///     .with_author("Acme")
///     .with_license("MIT")
///     .with_description("Echoes its input")
///     .with_tool(OperationSpec::new("echo", "Echo the input"));
/// let plugin = ModulePlugin::builder("echo-plugin")
///     .tool("echo", |input, _ctx| async move { Ok(input) })
///     .build();
///
/// manager.install_plugin(metadata, Arc::new(plugin)).await?;
/// manager.enable("echo-plugin").await?;
/// let output = manager.execute_tool("echo-plugin", "echo", json!({"msg": "hi"})).await?;
/// assert_eq!(output, json!({"msg": "hi"}));
///
/// manager.shutdown().await
/// # }
/// ```
pub struct PluginManager {
    ctx: EngineContext,
    source: Option<Arc<dyn PluginSource>>,
    shutdown: Mutex<CancellationToken>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    initialized: AtomicBool,
}

impl PluginManager {
    /// Create a manager over a context.
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx,
            source: None,
            shutdown: Mutex::new(CancellationToken::new()),
            tasks: Mutex::new(Vec::new()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Resolve `install` and `update` sources through `source`.
    pub fn with_source(mut self, source: Arc<dyn PluginSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Engine components.
    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Start the bus drain, monitor sampling and hook statistics reporter.
    /// Calling it again is a no-op until the next shutdown.
    pub async fn initialize(&self) -> PluginResult<()> {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let token = CancellationToken::new();
        *self.shutdown.lock() = token.clone();

        let stats_interval = Duration::from_millis(self.ctx.config.pipeline.stats_interval_ms);
        let mut tasks = self.tasks.lock();
        tasks.push(self.ctx.bus.start());
        tasks.push(self.ctx.monitor.start(token.child_token()));
        tasks.push(self.ctx.pipeline.spawn_reporter(stats_interval, token.child_token()));

        tracing::info!(
            host_version = %self.ctx.config.host_version,
            bus_tick_ms = self.ctx.config.bus.tick_interval_ms,
            monitor_interval_ms = self.ctx.config.monitor.collection_interval_ms,
            "Plugin manager initialized"
        );
        Ok(())
    }

    /// Disable every running plugin and stop background tasks.
    ///
    /// Every step runs; the first failure is returned afterwards.
    pub async fn shutdown(&self) -> PluginResult<()> {
        let mut first_error: Option<PluginError> = None;

        for instance in self.ctx.lifecycle.list() {
            if instance.state().is_running() {
                if let Err(e) = self.disable(instance.id()).await {
                    tracing::warn!(plugin_id = %instance.id(), error = %e, "Disable failed during shutdown");
                    first_error.get_or_insert(e);
                }
            }
        }

        self.shutdown.lock().cancel();
        self.ctx.bus.shutdown();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
                first_error.get_or_insert(PluginError::internal("shutdown", e.to_string()));
            }
        }
        self.initialized.store(false, Ordering::Release);

        tracing::info!("Plugin manager shut down");
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn instance(&self, plugin_id: &str) -> PluginResult<Arc<PluginInstance>> {
        self.ctx
            .lifecycle
            .get(plugin_id)
            .ok_or_else(|| PluginError::not_found(plugin_id))
    }

    async fn load(&self, plugin_id: &str, source: &str) -> PluginResult<LoadedPlugin> {
        let loader = self
            .source
            .as_ref()
            .ok_or_else(|| PluginError::installation(plugin_id, "no plugin source configured"))?;
        let loaded = loader.load(plugin_id, source).await?;
        if loaded.metadata.id != plugin_id {
            return Err(PluginError::installation(
                plugin_id,
                format!("source provided plugin '{}'", loaded.metadata.id),
            ));
        }
        Ok(loaded)
    }

    /// Load a plugin from the configured source and install it.
    pub async fn install(&self, plugin_id: &str, source: &str) -> PluginResult<Arc<PluginInstance>> {
        let loaded = self.load(plugin_id, source).await?;
        self.install_plugin(loaded.metadata, loaded.plugin).await
    }

    /// Install an already loaded plugin.
    ///
    /// # Errors
    /// - `ALREADY_EXISTS` for a duplicate id
    /// - Security codes (`INVALID_METADATA`, `INVALID_LICENSE`, ...) from validation
    /// - `DEPENDENCY_ERROR` carrying the failed installability check
    /// - `INSTALLATION_ERROR` or `CONFIGURATION_ERROR` from registration
    pub async fn install_plugin(
        &self,
        metadata: PluginMetadata,
        plugin: Arc<dyn Plugin>,
    ) -> PluginResult<Arc<PluginInstance>> {
        let start = Instant::now();
        let plugin_id = metadata.id.clone();
        if self.ctx.lifecycle.contains(&plugin_id) {
            return Err(PluginError::already_exists(plugin_id));
        }

        self.ctx.security.validate(&metadata)?;

        let check = self.ctx.dependencies.can_install(&metadata);
        if !check.can_install {
            tracing::warn!(plugin_id = %plugin_id, reason = %check.summary(), "Plugin cannot be installed");
            return Err(check.into_error(&plugin_id));
        }
        for warning in &check.warnings {
            tracing::warn!(plugin_id = %plugin_id, warning = %warning, "Compatibility warning");
        }

        let instance = self.ctx.lifecycle.install(metadata.clone(), plugin)?;
        let config = match self.ctx.configs.register_plugin(&metadata).await {
            Ok(config) => config,
            Err(e) => {
                if let Err(rollback) = self.ctx.lifecycle.uninstall(&plugin_id).await {
                    tracing::warn!(plugin_id = %plugin_id, error = %rollback, "Install rollback failed");
                }
                return Err(e);
            }
        };
        self.ctx.security.set_permissions(&plugin_id, config.permissions.clone());
        self.ctx.dependencies.add_plugin(&metadata);
        self.ctx.monitor.register(&plugin_id);

        self.ctx.lifecycle_events.emit(LifecycleEvent::Installed {
            plugin_id: plugin_id.clone(),
            version: metadata.version.clone(),
        });
        tracing::info!(
            plugin_id = %plugin_id,
            version = %metadata.version,
            install_time_us = start.elapsed().as_micros() as u64,
            "Plugin installation completed"
        );
        Ok(instance)
    }

    /// Load a new version from the configured source and swap it in.
    pub async fn update(&self, plugin_id: &str, source: &str) -> PluginResult<Arc<PluginInstance>> {
        let loaded = self.load(plugin_id, source).await?;
        self.update_plugin(loaded.metadata, loaded.plugin).await
    }

    /// Replace an installed plugin's metadata and implementation.
    ///
    /// The configuration is kept. A plugin that was running is enabled again.
    ///
    /// # Errors
    /// `DEPENDENCY_ERROR` when the new version fails the installability
    /// check or falls outside a range an installed dependent declares. The
    /// installed version is left untouched.
    pub async fn update_plugin(
        &self,
        metadata: PluginMetadata,
        plugin: Arc<dyn Plugin>,
    ) -> PluginResult<Arc<PluginInstance>> {
        let plugin_id = metadata.id.clone();
        let instance = self.instance(&plugin_id)?;
        let mut permissions = self.config_for(&instance).permissions;
        self.ctx.security.validate(&metadata)?;

        let check = self.ctx.dependencies.can_install(&metadata);
        if !check.can_install {
            tracing::warn!(plugin_id = %plugin_id, reason = %check.summary(), "Plugin cannot be updated");
            return Err(check.into_error(&plugin_id));
        }
        let broken = self
            .ctx
            .dependencies
            .incompatible_dependents(&plugin_id, &metadata.version);
        if !broken.is_empty() {
            tracing::warn!(plugin_id = %plugin_id, version = %metadata.version, dependents = ?broken, "Update would break dependents");
            return Err(PluginError::DependencyError {
                plugin_id: plugin_id.clone(),
                reason: format!("version {} breaks dependents: {}", metadata.version, broken.join(", ")),
                missing: Vec::new(),
                conflicts: broken,
            });
        }

        let was_running = instance.state().is_running();
        if was_running {
            self.disable(&plugin_id).await?;
        }

        let instance = self.ctx.lifecycle.replace(&plugin_id, metadata.clone(), plugin).await?;
        self.ctx.configs.register_schema(&plugin_id, &metadata.config_schema)?;
        self.ctx.dependencies.add_plugin(&metadata);

        for permission in SecurityValidator::default_permissions(&metadata) {
            if !permissions.contains(&permission) {
                permissions.push(permission);
            }
        }
        self.ctx.security.set_permissions(&plugin_id, permissions);

        if was_running {
            self.enable(&plugin_id).await?;
        }
        Ok(instance)
    }

    /// Remove a plugin and everything registered on its behalf.
    ///
    /// # Errors
    /// `NOT_FOUND`, or `DEPENDENCY_ERROR` while other plugins depend on it.
    pub async fn uninstall(&self, plugin_id: &str) -> PluginResult<()> {
        self.instance(plugin_id)?;
        self.ctx.dependencies.can_uninstall(plugin_id)?;

        self.ctx.lifecycle.uninstall(plugin_id).await?;

        self.ctx.pipeline.unregister_plugin(plugin_id);
        self.ctx.bus.unregister_endpoint(plugin_id);
        self.ctx.bus.unsubscribe_all(plugin_id);
        self.ctx.dependencies.remove_plugin(plugin_id);
        if let Err(e) = self.ctx.configs.remove(plugin_id).await {
            tracing::warn!(plugin_id = %plugin_id, error = %e, "Failed to remove persisted configuration");
        }
        self.ctx.security.remove_plugin(plugin_id);
        self.ctx.monitor.unregister(plugin_id);
        self.ctx.execution.reset_plugin(plugin_id);
        Ok(())
    }

    fn config_for(&self, instance: &PluginInstance) -> PluginConfig {
        self.ctx
            .configs
            .get_config(instance.id())
            .unwrap_or_else(|| PluginConfig::defaults_for(&instance.metadata()))
    }

    async fn attach(&self, instance: &PluginInstance, config: &PluginConfig) -> PluginResult<()> {
        let plugin_id = instance.id();
        let plugin = instance.plugin();
        let (hooks, middleware) = self
            .ctx
            .pipeline
            .sync_plugin(plugin_id, plugin.hooks(), plugin.middleware(), config);
        self.ctx.bus.register_endpoint(plugin_id, plugin);
        self.ctx.dependencies.set_status(plugin_id, NodeStatus::Active);
        self.ctx.configs.set_enabled(plugin_id, true).await?;

        tracing::debug!(plugin_id = %plugin_id, hooks, middleware, "Plugin contributions registered");
        Ok(())
    }

    async fn detach(&self, plugin_id: &str) {
        self.ctx.pipeline.unregister_plugin(plugin_id);
        self.ctx.bus.unregister_endpoint(plugin_id);
        self.ctx.dependencies.set_status(plugin_id, NodeStatus::Inactive);
        if let Err(e) = self.ctx.configs.set_enabled(plugin_id, false).await {
            tracing::warn!(plugin_id = %plugin_id, error = %e, "Failed to record disabled flag");
        }
    }

    // Registers an instance that just became active. On failure the instance
    // is disabled again so state and registrations agree.
    async fn activate(&self, instance: &Arc<PluginInstance>, config: &PluginConfig) -> PluginResult<()> {
        if let Err(e) = self.attach(instance, config).await {
            self.detach(instance.id()).await;
            if let Err(disable) = self.ctx.lifecycle.disable(instance).await {
                tracing::warn!(plugin_id = %instance.id(), error = %disable, "Rollback disable failed");
            }
            return Err(e);
        }
        self.notify(event_names::PLUGIN_ENABLED, instance.id()).await;
        Ok(())
    }

    async fn notify(&self, event: &str, plugin_id: &str) {
        if let Err(e) = self.ctx.pipeline.emit_event(event, json!({ "plugin_id": plugin_id })).await {
            tracing::warn!(plugin_id = %plugin_id, event, error = %e, "Hook chain aborted");
        }
    }

    /// Enable a plugin and register its hooks, middleware and bus endpoint.
    /// A no-op when already active.
    pub async fn enable(&self, plugin_id: &str) -> PluginResult<()> {
        let instance = self.instance(plugin_id)?;
        if instance.state() == PluginState::Active {
            return Ok(());
        }

        let config = self.config_for(&instance);
        self.ctx
            .lifecycle
            .enable(&instance, &self.ctx.dependencies, &config)
            .await?;
        self.activate(&instance, &config).await
    }

    /// Disable a plugin and withdraw its registrations.
    pub async fn disable(&self, plugin_id: &str) -> PluginResult<()> {
        let instance = self.instance(plugin_id)?;
        if !instance.state().is_running() {
            return Ok(());
        }

        let result = self.ctx.lifecycle.disable(&instance).await;
        self.detach(plugin_id).await;
        result?;
        self.notify(event_names::PLUGIN_DISABLED, plugin_id).await;
        Ok(())
    }

    /// Restart a running plugin, or recover one from `error`.
    pub async fn restart(&self, plugin_id: &str) -> PluginResult<()> {
        let instance = self.instance(plugin_id)?;
        let config = self.config_for(&instance);

        match self
            .ctx
            .lifecycle
            .restart(&instance, &self.ctx.dependencies, &config)
            .await
        {
            Ok(()) if instance.state() == PluginState::Active => self.activate(&instance, &config).await,
            Ok(()) => Ok(()),
            Err(e) => {
                self.detach(plugin_id).await;
                Err(e)
            }
        }
    }

    /// Merge a partial configuration and notify the plugin.
    ///
    /// # Errors
    /// `NOT_FOUND`, or `CONFIGURATION_ERROR` listing every violation.
    pub async fn configure(&self, plugin_id: &str, update: PluginConfigUpdate) -> PluginResult<PluginConfig> {
        let instance = self.instance(plugin_id)?;
        let resync = update.touches_pipeline();
        let permissions = update.permissions.is_some();

        let config = self.ctx.configs.configure_plugin(plugin_id, update).await?;
        self.apply_config(&instance, &config, resync, permissions).await?;
        Ok(config)
    }

    async fn apply_config(
        &self,
        instance: &PluginInstance,
        config: &PluginConfig,
        resync: bool,
        permissions: bool,
    ) -> PluginResult<()> {
        let plugin_id = instance.id();
        if permissions {
            self.ctx.security.set_permissions(plugin_id, config.permissions.clone());
        }

        instance.plugin().configure(config).await?;

        if resync && instance.state() == PluginState::Active {
            let plugin = instance.plugin();
            self.ctx
                .pipeline
                .sync_plugin(plugin_id, plugin.hooks(), plugin.middleware(), config);
        }

        self.ctx.lifecycle_events.emit(LifecycleEvent::Configured {
            plugin_id: plugin_id.to_string(),
        });
        Ok(())
    }

    /// A plugin's configuration.
    pub fn get_config(&self, plugin_id: &str) -> Option<PluginConfig> {
        self.ctx.configs.get_config(plugin_id)
    }

    /// Serialize a plugin's configuration.
    pub fn export_config(&self, plugin_id: &str) -> PluginResult<String> {
        self.ctx.configs.export_config(plugin_id)
    }

    /// Apply an exported configuration.
    pub async fn import_config(&self, plugin_id: &str, exported: &str) -> PluginResult<PluginConfig> {
        let instance = self.instance(plugin_id)?;
        let config = self.ctx.configs.import_config(plugin_id, exported).await?;
        self.apply_config(&instance, &config, true, true).await?;
        Ok(config)
    }

    /// Run a tool.
    pub async fn execute_tool(&self, plugin_id: &str, name: &str, input: Value) -> PluginResult<Value> {
        let instance = self.instance(plugin_id)?;
        self.ctx.execution.execute_tool(&instance, name, input).await
    }

    /// Run an action.
    pub async fn execute_action(&self, plugin_id: &str, name: &str, input: Value) -> PluginResult<Value> {
        let instance = self.instance(plugin_id)?;
        self.ctx.execution.execute_action(&instance, name, input).await
    }

    /// Read a resource.
    pub async fn get_resource(&self, plugin_id: &str, name: &str) -> PluginResult<Value> {
        let instance = self.instance(plugin_id)?;
        self.ctx.execution.get_resource(&instance, name).await
    }

    /// Check whether `metadata` could be installed now.
    pub fn can_install(&self, metadata: &PluginMetadata) -> InstallCheck {
        self.ctx.dependencies.can_install(metadata)
    }

    /// Get an installed plugin.
    pub fn get_plugin(&self, plugin_id: &str) -> Option<Arc<PluginInstance>> {
        self.ctx.lifecycle.get(plugin_id)
    }

    /// Summaries of every installed plugin, sorted by id.
    pub fn list_plugins(&self) -> Vec<PluginSummary> {
        self.ctx.lifecycle.list().iter().map(|instance| instance.summary()).collect()
    }

    /// Ask a plugin for its health. Plugins that are not running report
    /// unhealthy without being called.
    pub async fn health_check(&self, plugin_id: &str) -> PluginResult<PluginHealth> {
        let instance = self.instance(plugin_id)?;
        let state = instance.state();
        if !state.is_running() {
            return Ok(PluginHealth::with_status(HealthStatus::Unhealthy, format!("plugin is {state}"))
                .with_detail("state", state.as_str()));
        }

        let health = instance.plugin().health_check().await;
        Ok(health
            .with_detail("state", state.as_str())
            .with_detail("error_count", instance.error_count().to_string()))
    }

    /// Run the hook chain for `event`.
    pub async fn emit_event(&self, event: &str, data: Value) -> PluginResult<Value> {
        self.ctx.pipeline.emit_event(event, data).await
    }

    /// Broadcast on a channel.
    pub fn publish(&self, sender: &str, channel: &str, payload: Value, opts: MessageOptions) -> PluginResult<Uuid> {
        self.ctx.bus.publish(sender, channel, payload, opts)
    }

    /// Send a message to one plugin.
    pub fn send_direct(&self, sender: &str, recipient: &str, payload: Value, opts: MessageOptions) -> PluginResult<Uuid> {
        self.ctx.bus.send_direct(sender, recipient, payload, opts)
    }

    /// Send a request to one plugin and wait for the reply.
    pub async fn request(&self, sender: &str, recipient: &str, payload: Value, opts: MessageOptions) -> PluginResult<Value> {
        self.ctx.bus.request(sender, recipient, payload, opts).await
    }

    /// Subscribe an installed plugin to a channel.
    pub fn subscribe(&self, plugin_id: &str, channel: &str) -> PluginResult<bool> {
        self.instance(plugin_id)?;
        Ok(self.ctx.bus.subscribe(plugin_id, channel))
    }

    /// Remove a plugin's channel subscription.
    pub fn unsubscribe(&self, plugin_id: &str, channel: &str) -> bool {
        self.ctx.bus.unsubscribe(plugin_id, channel)
    }

    /// Lifecycle notifications.
    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.ctx.lifecycle_events.subscribe()
    }

    /// Execution notifications.
    pub fn subscribe_execution(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.ctx.execution_events.subscribe()
    }

    /// Bus notifications.
    pub fn subscribe_bus(&self) -> broadcast::Receiver<BusEvent> {
        self.ctx.bus_events.subscribe()
    }

    /// Monitor alerts and samples.
    pub fn subscribe_monitor(&self) -> broadcast::Receiver<MonitorEvent> {
        self.ctx.monitor_events.subscribe()
    }

    /// Pipeline statistics and hook failures.
    pub fn subscribe_pipeline(&self) -> broadcast::Receiver<PipelineEvent> {
        self.ctx.pipeline_events.subscribe()
    }

    /// Performance report for one plugin, or the aggregate when `None`.
    pub fn performance_report(&self, plugin_id: Option<&str>) -> PluginResult<PerformanceReport> {
        self.ctx.monitor.report(plugin_id)
    }

    /// Aggregated statistics.
    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            lifecycle: self.ctx.lifecycle.stats(),
            execution: self.ctx.execution.stats(),
            bus: self.ctx.bus.stats(),
            dependencies: self.ctx.dependencies.stats(),
            security: self.ctx.security.stats(),
            hooks: self.ctx.pipeline.hook_count(None),
            middleware: self.ctx.pipeline.middleware_count(None),
            monitored: self.ctx.monitor.plugin_count(),
        }
    }
}
