//! Prioritized hook chains keyed by event name.

use crate::error::{HookError, PluginResult};
use crate::events::{EventChannel, HookStatsEntry, PipelineEvent};
use crate::types::HookSpec;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Transforms event data as part of a hook chain.
#[async_trait]
pub trait HookHandler: Send + Sync + 'static {
    /// Handle `event`, returning the value passed to the next hook.
    async fn handle(&self, event: &str, data: Value) -> Result<Value, HookError>;
}

/// [`HookHandler`] backed by an async closure over the event data.
pub struct FnHook<F> {
    f: F,
}

impl<F> FnHook<F> {
    /// Wrap a closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> HookHandler for FnHook<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HookError>> + Send + 'static,
{
    async fn handle(&self, _event: &str, data: Value) -> Result<Value, HookError> {
        (self.f)(data).await
    }
}

/// A hook declaration paired with its handler.
#[derive(Clone)]
pub struct HookBinding {
    /// Declaration
    pub spec: HookSpec,

    /// Handler
    pub handler: Arc<dyn HookHandler>,
}

impl HookBinding {
    /// Pair a declaration with a handler.
    pub fn new(spec: HookSpec, handler: Arc<dyn HookHandler>) -> Self {
        Self { spec, handler }
    }
}

impl std::fmt::Debug for HookBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookBinding")
            .field("spec", &self.spec)
            .field("handler", &"<hook handler>")
            .finish()
    }
}

/// A registered hook.
#[derive(Clone)]
pub struct HookRegistration {
    /// Registry key, `<plugin_id>:<name>`
    pub key: String,

    /// Owning plugin
    pub plugin_id: String,

    /// Declaration
    pub spec: HookSpec,

    /// Handler
    pub handler: Arc<dyn HookHandler>,

    /// Registration time
    pub registered_at: Instant,

    /// Set once a single-shot hook has been claimed by an emit
    consumed: Arc<AtomicBool>,
}

impl std::fmt::Debug for HookRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistration")
            .field("key", &self.key)
            .field("event", &self.spec.event)
            .field("priority", &self.spec.priority)
            .field("once", &self.spec.once)
            .finish()
    }
}

/// Registry key for a plugin-scoped name.
pub fn registration_key(plugin_id: &str, name: &str) -> String {
    format!("{plugin_id}:{name}")
}

#[derive(Debug, Default)]
struct HookCounters {
    count: u64,
    successes: u64,
    failures: u64,
    total: Duration,
}

/// Per-hook execution statistics.
///
/// Metrics only; nothing in the execution path reads these back.
#[derive(Debug, Default)]
pub struct HookStatistics {
    entries: DashMap<String, HookCounters>,
}

impl HookStatistics {
    /// Create empty statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one execution.
    pub fn record(&self, key: &str, elapsed: Duration, success: bool) {
        let mut entry = self.entries.entry(key.to_string()).or_default();
        entry.count += 1;
        entry.total += elapsed;
        if success {
            entry.successes += 1;
        } else {
            entry.failures += 1;
        }
    }

    /// Statistics for one hook.
    pub fn get(&self, key: &str) -> Option<HookStatsEntry> {
        self.entries.get(key).map(|counters| Self::entry(key, &counters))
    }

    /// All entries, sorted by key.
    pub fn snapshot(&self) -> Vec<HookStatsEntry> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|item| Self::entry(item.key(), item.value()))
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// Drop every entry owned by `plugin_id`.
    pub fn remove_plugin(&self, plugin_id: &str) {
        let prefix = format!("{plugin_id}:");
        self.entries.retain(|key, _| !key.starts_with(&prefix));
    }

    /// Drop everything.
    pub fn reset(&self) {
        self.entries.clear();
    }

    fn entry(key: &str, counters: &HookCounters) -> HookStatsEntry {
        let total_ms = counters.total.as_secs_f64() * 1000.0;
        HookStatsEntry {
            key: key.to_string(),
            count: counters.count,
            successes: counters.successes,
            failures: counters.failures,
            total_ms,
            average_ms: if counters.count == 0 {
                0.0
            } else {
                total_ms / counters.count as f64
            },
        }
    }
}

/// Hook chains per event.
///
/// Chains run sequentially in descending priority; registrations with equal
/// priority keep their registration order. Each hook receives the previous
/// hook's output.
pub struct HookRegistry {
    /// Event name to ordered registrations
    chains: RwLock<BTreeMap<String, Vec<HookRegistration>>>,

    /// Execution statistics
    stats: Arc<HookStatistics>,

    /// Pipeline notifications
    events: Arc<EventChannel<PipelineEvent>>,
}

impl HookRegistry {
    /// Create an empty registry publishing on `events`.
    pub fn new(events: Arc<EventChannel<PipelineEvent>>) -> Self {
        Self {
            chains: RwLock::new(BTreeMap::new()),
            stats: Arc::new(HookStatistics::new()),
            events,
        }
    }

    /// Register a plugin's hook under `<plugin_id>:<name>`.
    ///
    /// Re-registering a key replaces the existing entry in place.
    pub fn register(&self, plugin_id: &str, binding: HookBinding) -> String {
        let key = registration_key(plugin_id, &binding.spec.name);
        let event = binding.spec.event.clone();
        let registration = HookRegistration {
            key: key.clone(),
            plugin_id: plugin_id.to_string(),
            spec: binding.spec,
            handler: binding.handler,
            registered_at: Instant::now(),
            consumed: Arc::new(AtomicBool::new(false)),
        };

        let mut chains = self.chains.write();

        // A key moving to another event leaves its old chain.
        for (name, chain) in chains.iter_mut() {
            if *name != event {
                chain.retain(|existing| existing.key != key);
            }
        }
        chains.retain(|_, chain| !chain.is_empty());

        let chain = chains.entry(event.clone()).or_default();
        match chain.iter_mut().find(|existing| existing.key == key) {
            Some(existing) => *existing = registration,
            None => chain.push(registration),
        }
        chain.sort_by(|a, b| b.spec.priority.cmp(&a.spec.priority));

        tracing::debug!(hook = %key, event = %event, "Hook registered");
        key
    }

    /// Remove one hook by key.
    pub fn unregister(&self, key: &str) -> bool {
        let mut chains = self.chains.write();
        let mut removed = false;
        for chain in chains.values_mut() {
            let before = chain.len();
            chain.retain(|existing| existing.key != key);
            removed |= chain.len() != before;
        }
        chains.retain(|_, chain| !chain.is_empty());
        removed
    }

    /// Remove every hook owned by `plugin_id` in one step.
    pub fn unregister_plugin(&self, plugin_id: &str) -> usize {
        let mut chains = self.chains.write();
        let mut removed = 0;
        for chain in chains.values_mut() {
            let before = chain.len();
            chain.retain(|existing| existing.plugin_id != plugin_id);
            removed += before - chain.len();
        }
        chains.retain(|_, chain| !chain.is_empty());
        drop(chains);

        self.stats.remove_plugin(plugin_id);
        if removed > 0 {
            tracing::debug!(plugin_id = %plugin_id, removed, "Plugin hooks unregistered");
        }
        removed
    }

    /// Run the chain for `event`.
    ///
    /// Non-critical failures are logged and the chain continues with the last
    /// good value. A critical failure aborts and is returned. Single-shot hooks
    /// are removed after running, whatever the outcome.
    pub async fn emit(&self, event: &str, data: Value) -> PluginResult<Value> {
        let chain = match self.chains.read().get(event) {
            Some(chain) => chain.clone(),
            None => return Ok(data),
        };

        let mut value = data;
        for registration in chain {
            if registration.spec.once && registration.consumed.swap(true, Ordering::SeqCst) {
                continue;
            }

            let started = Instant::now();
            let result = registration.handler.handle(event, value.clone()).await;
            self.stats.record(&registration.key, started.elapsed(), result.is_ok());

            if registration.spec.once {
                self.unregister(&registration.key);
            }

            match result {
                Ok(next) => value = next,
                Err(error) if error.is_critical() => {
                    tracing::error!(hook = %registration.key, event = %event, error = %error, "Critical hook failure");
                    return Err(error.into());
                }
                Err(error) => {
                    tracing::warn!(hook = %registration.key, event = %event, error = %error, "Hook failed, continuing");
                    self.events.emit(PipelineEvent::HookFailed {
                        key: registration.key.clone(),
                        event: event.to_string(),
                        message: error.to_string(),
                    });
                }
            }
        }

        Ok(value)
    }

    /// Number of registered hooks, optionally for one event.
    pub fn count(&self, event: Option<&str>) -> usize {
        let chains = self.chains.read();
        match event {
            Some(event) => chains.get(event).map(Vec::len).unwrap_or(0),
            None => chains.values().map(Vec::len).sum(),
        }
    }

    /// Events with at least one hook, sorted.
    pub fn registered_events(&self) -> Vec<String> {
        self.chains.read().keys().cloned().collect()
    }

    /// Keys registered for `event`, in execution order.
    pub fn chain_keys(&self, event: &str) -> Vec<String> {
        self.chains
            .read()
            .get(event)
            .map(|chain| chain.iter().map(|r| r.key.clone()).collect())
            .unwrap_or_default()
    }

    /// Execution statistics.
    pub fn statistics(&self) -> Arc<HookStatistics> {
        Arc::clone(&self.stats)
    }

    /// Periodically log and publish aggregate statistics until `shutdown` fires.
    pub fn spawn_reporter(&self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let stats = Arc::clone(&self.stats);
        let events = Arc::clone(&self.events);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let hooks = stats.snapshot();
                        if hooks.is_empty() {
                            continue;
                        }
                        let executions: u64 = hooks.iter().map(|h| h.count).sum();
                        let failures: u64 = hooks.iter().map(|h| h.failures).sum();
                        tracing::info!(hooks = hooks.len(), executions, failures, "Hook statistics");
                        events.emit(PipelineEvent::Statistics { hooks });
                    }
                }
            }
            tracing::debug!("Hook statistics reporter stopped");
        })
    }
}
