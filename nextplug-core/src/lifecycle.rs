//! Plugin lifecycle management with state machines.
//!
//! # State Machine
//!
//! ```text
//! Uninstalled -> Installed -> Loading -> Initializing -> Active
//!                   ^  |                                   |
//!                   |  |           Disabled -> Enabled ----+
//!                   |  |              ^                    |
//!                   |  |              +--- ShuttingDown <--+
//!                   |  v
//!                   +- Error  (reachable from any failed transition)
//! ```
//!
//! Transitions on one instance are serialised by a per-instance async mutex,
//! so concurrent enable and disable calls observe each other's results.

use crate::config::PluginConfig;
use crate::dependency::DependencyGraph;
use crate::error::{PluginError, PluginResult};
use crate::events::{EventChannel, LifecycleEvent};
use crate::plugin::Plugin;
use crate::schema::CompiledSchema;
use crate::types::{PerformanceSnapshot, PluginMetadata};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Plugin lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    /// Not installed (initial and final state)
    #[default]
    Uninstalled,

    /// Installed, never enabled
    Installed,

    /// Being loaded
    Loading,

    /// Running `initialize`
    Initializing,

    /// Re-enabled, running `enable`
    Enabled,

    /// Serving operations
    Active,

    /// Running `disable`
    ShuttingDown,

    /// Stopped, keeps its loaded state
    Disabled,

    /// A transition failed
    Error,
}

impl PluginState {
    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninstalled => "uninstalled",
            Self::Installed => "installed",
            Self::Loading => "loading",
            Self::Initializing => "initializing",
            Self::Enabled => "enabled",
            Self::Active => "active",
            Self::ShuttingDown => "shutting_down",
            Self::Disabled => "disabled",
            Self::Error => "error",
        }
    }

    /// Check if the plugin is enabled or active.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Enabled | Self::Active)
    }

    /// Check if the plugin is in a transitional state.
    pub fn is_transitional(&self) -> bool {
        matches!(self, Self::Loading | Self::Initializing | Self::ShuttingDown)
    }

    /// Get valid transition states from the current state.
    pub fn valid_transitions(&self) -> &'static [PluginState] {
        match self {
            Self::Uninstalled => &[Self::Installed],
            Self::Installed => &[Self::Loading, Self::Uninstalled, Self::Error],
            Self::Loading => &[Self::Initializing, Self::Error],
            Self::Initializing => &[Self::Active, Self::Error],
            Self::Enabled => &[Self::Active, Self::ShuttingDown, Self::Error],
            Self::Active => &[Self::ShuttingDown, Self::Error],
            Self::ShuttingDown => &[Self::Disabled, Self::Error],
            Self::Disabled => &[Self::Enabled, Self::Installed, Self::Uninstalled, Self::Error],
            Self::Error => &[Self::Installed, Self::Disabled, Self::Uninstalled],
        }
    }

    /// Check if a transition to the target state is valid.
    pub fn can_transition_to(&self, target: PluginState) -> bool {
        self.valid_transitions().contains(&target)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compile the input schemas of every declared tool and action, keyed by
/// operation key (`tool:<name>`).
fn compile_input_schemas(metadata: &PluginMetadata) -> PluginResult<HashMap<String, CompiledSchema>> {
    let capabilities = &metadata.capabilities;
    let declared = capabilities
        .tools
        .iter()
        .map(|op| (format!("tool:{}", op.name), op))
        .chain(capabilities.actions.iter().map(|op| (format!("action:{}", op.name), op)));

    let mut compiled = HashMap::new();
    for (key, op) in declared {
        if op.input_schema.is_empty() {
            continue;
        }
        let schema = op
            .input_schema
            .compile()
            .map_err(|e| PluginError::installation(&metadata.id, format!("{key}: {e}")))?;
        compiled.insert(key, schema);
    }
    Ok(compiled)
}

/// Live record of one installed plugin.
pub struct PluginInstance {
    id: String,
    metadata: RwLock<Arc<PluginMetadata>>,
    plugin: RwLock<Arc<dyn Plugin>>,
    input_schemas: RwLock<HashMap<String, CompiledSchema>>,
    state: RwLock<PluginState>,
    loaded: AtomicBool,
    last_error: RwLock<Option<PluginError>>,
    usage_count: AtomicU64,
    error_count: AtomicU64,
    installed_at: DateTime<Utc>,
    last_used: RwLock<Option<DateTime<Utc>>>,
    performance: Mutex<PerformanceSnapshot>,
    transition_lock: tokio::sync::Mutex<()>,
}

impl PluginInstance {
    fn new(metadata: PluginMetadata, plugin: Arc<dyn Plugin>) -> PluginResult<Self> {
        let input_schemas = compile_input_schemas(&metadata)?;
        Ok(Self {
            id: metadata.id.clone(),
            metadata: RwLock::new(Arc::new(metadata)),
            plugin: RwLock::new(plugin),
            input_schemas: RwLock::new(input_schemas),
            state: RwLock::new(PluginState::Uninstalled),
            loaded: AtomicBool::new(false),
            last_error: RwLock::new(None),
            usage_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            installed_at: Utc::now(),
            last_used: RwLock::new(None),
            performance: Mutex::new(PerformanceSnapshot::default()),
            transition_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Plugin identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current descriptor.
    pub fn metadata(&self) -> Arc<PluginMetadata> {
        Arc::clone(&self.metadata.read())
    }

    /// Adapted plugin object.
    pub fn plugin(&self) -> Arc<dyn Plugin> {
        Arc::clone(&self.plugin.read())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PluginState {
        *self.state.read()
    }

    /// Check whether `initialize` has completed.
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Error stored by the last failed transition.
    pub fn last_error(&self) -> Option<PluginError> {
        self.last_error.read().clone()
    }

    /// Calls made.
    pub fn usage_count(&self) -> u64 {
        self.usage_count.load(Ordering::Relaxed)
    }

    /// Failed calls plus failed transitions.
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Install time.
    pub fn installed_at(&self) -> DateTime<Utc> {
        self.installed_at
    }

    /// Time of the last call.
    pub fn last_used(&self) -> Option<DateTime<Utc>> {
        *self.last_used.read()
    }

    /// Performance figures.
    pub fn performance(&self) -> PerformanceSnapshot {
        *self.performance.lock()
    }

    /// Compiled input schema for an operation key.
    pub fn input_schema(&self, operation_key: &str) -> Option<CompiledSchema> {
        self.input_schemas.read().get(operation_key).cloned()
    }

    /// Fold one call into the usage counters and performance figures.
    pub fn record_call(&self, elapsed: Duration, success: bool) -> PerformanceSnapshot {
        self.usage_count.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        *self.last_used.write() = Some(Utc::now());

        let mut performance = self.performance.lock();
        performance.record(elapsed, success);
        *performance
    }

    /// Store the latest memory estimate.
    pub fn set_memory_usage(&self, bytes: u64) {
        self.performance.lock().memory_bytes = bytes;
    }

    /// Serializable view for hosts.
    pub fn summary(&self) -> PluginSummary {
        let metadata = self.metadata();
        PluginSummary {
            id: self.id.clone(),
            name: metadata.name.clone(),
            version: metadata.version.clone(),
            state: self.state(),
            loaded: self.is_loaded(),
            usage_count: self.usage_count(),
            error_count: self.error_count(),
            installed_at: self.installed_at,
            last_used: self.last_used(),
            last_error: self.last_error().map(|e| e.to_string()),
            performance: self.performance(),
        }
    }
}

impl fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInstance")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// Serializable summary of a [`PluginInstance`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSummary {
    /// Plugin identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Installed version
    pub version: String,
    /// Lifecycle state
    pub state: PluginState,
    /// Whether `initialize` has completed
    pub loaded: bool,
    /// Calls made
    pub usage_count: u64,
    /// Errors recorded
    pub error_count: u64,
    /// Install time
    pub installed_at: DateTime<Utc>,
    /// Time of the last call
    pub last_used: Option<DateTime<Utc>>,
    /// Last transition error
    pub last_error: Option<String>,
    /// Performance figures
    pub performance: PerformanceSnapshot,
}

#[derive(Debug, Default)]
struct LifecycleCounters {
    transitions: AtomicU64,
    installs: AtomicU64,
    enables: AtomicU64,
    disables: AtomicU64,
    restarts: AtomicU64,
    errors: AtomicU64,
    uninstalls: AtomicU64,
}

/// Lifecycle statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleStats {
    /// Installed plugins
    pub plugins: usize,
    /// State transitions performed
    pub transitions: u64,
    /// Successful installs
    pub installs: u64,
    /// Successful enables
    pub enables: u64,
    /// Successful disables
    pub disables: u64,
    /// Restarts
    pub restarts: u64,
    /// Failed transitions
    pub errors: u64,
    /// Uninstalls
    pub uninstalls: u64,
    /// Plugins per state
    pub by_state: BTreeMap<PluginState, usize>,
}

/// Owns every [`PluginInstance`] and drives its state machine.
pub struct LifecycleManager {
    instances: DashMap<String, Arc<PluginInstance>>,
    events: Arc<EventChannel<LifecycleEvent>>,
    counters: LifecycleCounters,
}

impl LifecycleManager {
    /// Create a manager publishing on `events`.
    pub fn new(events: Arc<EventChannel<LifecycleEvent>>) -> Self {
        Self {
            instances: DashMap::new(),
            events,
            counters: LifecycleCounters::default(),
        }
    }

    /// Create the instance in `installed`.
    ///
    /// # Errors
    /// `ALREADY_EXISTS` for a duplicate id, `INSTALLATION_ERROR` otherwise.
    pub fn install(&self, metadata: PluginMetadata, plugin: Arc<dyn Plugin>) -> PluginResult<Arc<PluginInstance>> {
        let plugin_id = metadata.id.clone();
        if self.instances.contains_key(&plugin_id) {
            return Err(PluginError::already_exists(plugin_id));
        }

        let instance = PluginInstance::new(metadata, plugin).map_err(|e| match e {
            PluginError::InstallationError { .. } => e,
            other => PluginError::installation(&plugin_id, other.to_string()),
        })?;
        let instance = Arc::new(instance);

        match self.instances.entry(plugin_id.clone()) {
            Entry::Occupied(_) => return Err(PluginError::already_exists(plugin_id)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&instance));
            }
        }

        self.transition(&instance, PluginState::Installed)
            .map_err(|e| PluginError::installation(&plugin_id, e.to_string()))?;
        self.counters.installs.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            plugin_id = %plugin_id,
            version = %instance.metadata().version,
            "Plugin installed"
        );
        Ok(instance)
    }

    /// Enable a plugin, re-validating its dependencies against `graph`.
    ///
    /// A no-op when already enabled or active. The first enable runs
    /// `initialize` then `enable`; later ones run `enable` only.
    pub async fn enable(
        &self,
        instance: &Arc<PluginInstance>,
        graph: &DependencyGraph,
        config: &PluginConfig,
    ) -> PluginResult<()> {
        let _guard = instance.transition_lock.lock().await;
        self.enable_locked(instance, graph, config).await
    }

    async fn enable_locked(
        &self,
        instance: &Arc<PluginInstance>,
        graph: &DependencyGraph,
        config: &PluginConfig,
    ) -> PluginResult<()> {
        let state = instance.state();
        if state.is_running() {
            return Ok(());
        }
        if !matches!(state, PluginState::Installed | PluginState::Disabled) {
            return Err(PluginError::InvalidStateTransition {
                plugin_id: instance.id.clone(),
                from: state.to_string(),
                to: PluginState::Active.to_string(),
            });
        }

        let start = Instant::now();
        match self.run_enable(instance, graph, config).await {
            Ok(()) => {
                self.counters.enables.fetch_add(1, Ordering::Relaxed);
                self.events.emit(LifecycleEvent::Enabled {
                    plugin_id: instance.id.clone(),
                });
                tracing::info!(
                    plugin_id = %instance.id,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Plugin enabled"
                );
                Ok(())
            }
            Err(error) => {
                self.fail(instance, "enable", error.clone());
                Err(PluginError::EnableError {
                    plugin_id: instance.id.clone(),
                    reason: error.to_string(),
                })
            }
        }
    }

    async fn run_enable(
        &self,
        instance: &Arc<PluginInstance>,
        graph: &DependencyGraph,
        config: &PluginConfig,
    ) -> PluginResult<()> {
        let missing = graph.unsatisfied_dependencies(&instance.metadata());
        if !missing.is_empty() {
            return Err(PluginError::DependencyError {
                plugin_id: instance.id.clone(),
                reason: format!("dependencies not satisfied: {}", missing.join(", ")),
                missing,
                conflicts: Vec::new(),
            });
        }

        let plugin = instance.plugin();
        if instance.is_loaded() {
            self.transition(instance, PluginState::Enabled)?;
            plugin.enable().await?;
        } else {
            self.transition(instance, PluginState::Loading)?;
            self.transition(instance, PluginState::Initializing)?;
            plugin.initialize(config).await?;
            instance.loaded.store(true, Ordering::Release);
            plugin.enable().await?;
        }
        self.transition(instance, PluginState::Active)
    }

    /// Disable a plugin. A no-op when disabled or never enabled.
    pub async fn disable(&self, instance: &Arc<PluginInstance>) -> PluginResult<()> {
        let _guard = instance.transition_lock.lock().await;
        self.disable_locked(instance).await
    }

    async fn disable_locked(&self, instance: &Arc<PluginInstance>) -> PluginResult<()> {
        let state = instance.state();
        match state {
            PluginState::Disabled | PluginState::Installed => return Ok(()),
            PluginState::Enabled | PluginState::Active => {}
            other => {
                return Err(PluginError::InvalidStateTransition {
                    plugin_id: instance.id.clone(),
                    from: other.to_string(),
                    to: PluginState::Disabled.to_string(),
                })
            }
        }

        let result: PluginResult<()> = async {
            self.transition(instance, PluginState::ShuttingDown)?;
            instance.plugin().disable().await?;
            self.transition(instance, PluginState::Disabled)
        }
        .await;

        match result {
            Ok(()) => {
                self.counters.disables.fetch_add(1, Ordering::Relaxed);
                self.events.emit(LifecycleEvent::Disabled {
                    plugin_id: instance.id.clone(),
                });
                tracing::info!(plugin_id = %instance.id, "Plugin disabled");
                Ok(())
            }
            Err(error) => {
                self.fail(instance, "disable", error.clone());
                Err(PluginError::DisableError {
                    plugin_id: instance.id.clone(),
                    reason: error.to_string(),
                })
            }
        }
    }

    /// Restart a running plugin, or recover one in `error` and enable it.
    /// Other states are left untouched.
    pub async fn restart(
        &self,
        instance: &Arc<PluginInstance>,
        graph: &DependencyGraph,
        config: &PluginConfig,
    ) -> PluginResult<()> {
        let _guard = instance.transition_lock.lock().await;
        match instance.state() {
            PluginState::Enabled | PluginState::Active => {
                self.disable_locked(instance).await?;
            }
            PluginState::Error => {
                let target = if instance.is_loaded() {
                    PluginState::Disabled
                } else {
                    PluginState::Installed
                };
                self.transition(instance, target)?;
                *instance.last_error.write() = None;
                tracing::info!(plugin_id = %instance.id, state = %target, "Plugin recovered from error");
            }
            _ => return Ok(()),
        }

        self.counters.restarts.fetch_add(1, Ordering::Relaxed);
        self.enable_locked(instance, graph, config).await
    }

    /// Replace the descriptor and plugin object of an installed plugin.
    ///
    /// The plugin must not be running. It is left in `installed` and will be
    /// initialized again on the next enable.
    pub async fn replace(
        &self,
        plugin_id: &str,
        metadata: PluginMetadata,
        plugin: Arc<dyn Plugin>,
    ) -> PluginResult<Arc<PluginInstance>> {
        let instance = self.get(plugin_id).ok_or_else(|| PluginError::not_found(plugin_id))?;
        let _guard = instance.transition_lock.lock().await;

        let state = instance.state();
        if !matches!(state, PluginState::Installed | PluginState::Disabled | PluginState::Error) {
            return Err(PluginError::InvalidStateTransition {
                plugin_id: plugin_id.to_string(),
                from: state.to_string(),
                to: PluginState::Installed.to_string(),
            });
        }

        let input_schemas = compile_input_schemas(&metadata)?;
        let from_version = instance.metadata().version.clone();
        let to_version = metadata.version.clone();

        if let Err(e) = instance.plugin().destroy().await {
            tracing::warn!(plugin_id = %plugin_id, error = %e, "Plugin destroy failed during update");
        }

        *instance.metadata.write() = Arc::new(metadata);
        *instance.plugin.write() = plugin;
        *instance.input_schemas.write() = input_schemas;
        *instance.last_error.write() = None;
        instance.loaded.store(false, Ordering::Release);
        if state != PluginState::Installed {
            self.transition(&instance, PluginState::Installed)?;
        }

        self.events.emit(LifecycleEvent::Updated {
            plugin_id: plugin_id.to_string(),
            from_version: from_version.clone(),
            to_version: to_version.clone(),
        });
        tracing::info!(plugin_id = %plugin_id, from = %from_version, to = %to_version, "Plugin updated");
        Ok(Arc::clone(&instance))
    }

    /// Disable if needed, destroy and remove a plugin.
    ///
    /// Teardown failures are logged and do not stop the removal.
    pub async fn uninstall(&self, plugin_id: &str) -> PluginResult<Arc<PluginInstance>> {
        let instance = self.get(plugin_id).ok_or_else(|| PluginError::not_found(plugin_id))?;
        {
            let _guard = instance.transition_lock.lock().await;

            if instance.state().is_running() {
                if let Err(e) = self.disable_locked(&instance).await {
                    tracing::warn!(plugin_id = %plugin_id, error = %e, "Disable failed during uninstall");
                }
            }
            if let Err(e) = instance.plugin().destroy().await {
                tracing::warn!(plugin_id = %plugin_id, error = %e, "Plugin destroy failed during uninstall");
            }

            if self.transition(&instance, PluginState::Uninstalled).is_err() {
                self.force_state(&instance, PluginState::Uninstalled);
            }
        }

        self.instances.remove(plugin_id);
        self.counters.uninstalls.fetch_add(1, Ordering::Relaxed);
        self.events.emit(LifecycleEvent::Uninstalled {
            plugin_id: plugin_id.to_string(),
        });
        tracing::info!(plugin_id = %plugin_id, "Plugin uninstalled");
        Ok(instance)
    }

    fn transition(&self, instance: &PluginInstance, target: PluginState) -> PluginResult<()> {
        let from = {
            let mut state = instance.state.write();
            let from = *state;
            if !from.can_transition_to(target) {
                return Err(PluginError::InvalidStateTransition {
                    plugin_id: instance.id.clone(),
                    from: from.to_string(),
                    to: target.to_string(),
                });
            }
            *state = target;
            from
        };
        self.record_transition(instance, from, target);
        Ok(())
    }

    fn force_state(&self, instance: &PluginInstance, target: PluginState) {
        let from = std::mem::replace(&mut *instance.state.write(), target);
        if from != target {
            self.record_transition(instance, from, target);
        }
    }

    fn record_transition(&self, instance: &PluginInstance, from: PluginState, to: PluginState) {
        self.counters.transitions.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(plugin_id = %instance.id, from_state = %from, to_state = %to, "Plugin state transition");
        self.events.emit(LifecycleEvent::StateChanged {
            plugin_id: instance.id.clone(),
            from,
            to,
            at: Utc::now(),
        });
    }

    fn fail(&self, instance: &PluginInstance, operation: &str, error: PluginError) {
        self.force_state(instance, PluginState::Error);
        instance.error_count.fetch_add(1, Ordering::Relaxed);
        self.counters.errors.fetch_add(1, Ordering::Relaxed);

        tracing::error!(plugin_id = %instance.id, operation, error = %error, "Plugin lifecycle operation failed");
        self.events.emit(LifecycleEvent::Error {
            plugin_id: instance.id.clone(),
            operation: operation.to_string(),
            message: error.to_string(),
        });
        *instance.last_error.write() = Some(error);
    }

    /// Get an instance.
    pub fn get(&self, plugin_id: &str) -> Option<Arc<PluginInstance>> {
        self.instances.get(plugin_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Check whether a plugin is installed.
    pub fn contains(&self, plugin_id: &str) -> bool {
        self.instances.contains_key(plugin_id)
    }

    /// All instances, sorted by id.
    pub fn list(&self) -> Vec<Arc<PluginInstance>> {
        let mut instances: Vec<_> = self.instances.iter().map(|entry| Arc::clone(entry.value())).collect();
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        instances
    }

    /// Instances in `state`, sorted by id.
    pub fn list_by_state(&self, state: PluginState) -> Vec<Arc<PluginInstance>> {
        self.list()
            .into_iter()
            .filter(|instance| instance.state() == state)
            .collect()
    }

    /// Number of installed plugins.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Check whether nothing is installed.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Lifecycle statistics.
    pub fn stats(&self) -> LifecycleStats {
        let mut by_state = BTreeMap::new();
        for entry in self.instances.iter() {
            *by_state.entry(entry.value().state()).or_insert(0) += 1;
        }
        LifecycleStats {
            plugins: self.instances.len(),
            transitions: self.counters.transitions.load(Ordering::Relaxed),
            installs: self.counters.installs.load(Ordering::Relaxed),
            enables: self.counters.enables.load(Ordering::Relaxed),
            disables: self.counters.disables.load(Ordering::Relaxed),
            restarts: self.counters.restarts.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            uninstalls: self.counters.uninstalls.load(Ordering::Relaxed),
            by_state,
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }
}
