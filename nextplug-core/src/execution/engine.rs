//! Tool, action and resource dispatch.

use crate::config::{ConfigStore, ExecutionSettings, PluginConfig};
use crate::error::{PluginError, PluginResult};
use crate::events::{EventChannel, ExecutionEvent, OperationKind};
use crate::execution::rate_limit::RateLimiter;
use crate::lifecycle::{PluginInstance, PluginState};
use crate::monitor::PerformanceMonitor;
use crate::pipeline::{event_names, MiddlewareContext, Pipeline};
use crate::plugin::ExecutionContext;
use crate::security::SecurityValidator;
use crate::types::MiddlewareStage;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

#[derive(Debug, Default)]
struct ExecutionCounters {
    executions: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    rate_limited: AtomicU64,
    rejected_inputs: AtomicU64,
    resource_reads: AtomicU64,
}

/// Execution statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStats {
    /// Calls that reached the handler stage
    pub executions: u64,
    /// Successful calls
    pub successes: u64,
    /// Failed calls, timeouts included
    pub failures: u64,
    /// Calls abandoned after their timeout
    pub timeouts: u64,
    /// Calls refused by the rate limiter
    pub rate_limited: u64,
    /// Calls refused by input validation
    pub rejected_inputs: u64,
    /// Resource reads
    pub resource_reads: u64,
}

/// Runs plugin operations with permission checks, rate limits, input
/// validation, middleware and timeouts.
pub struct ExecutionEngine {
    security: Arc<SecurityValidator>,
    config: Arc<ConfigStore>,
    pipeline: Arc<Pipeline>,
    monitor: Arc<PerformanceMonitor>,
    limiter: RateLimiter,
    events: Arc<EventChannel<ExecutionEvent>>,
    settings: ExecutionSettings,
    counters: ExecutionCounters,
}

impl ExecutionEngine {
    /// Create an engine over shared components.
    pub fn new(
        settings: ExecutionSettings,
        security: Arc<SecurityValidator>,
        config: Arc<ConfigStore>,
        pipeline: Arc<Pipeline>,
        monitor: Arc<PerformanceMonitor>,
        events: Arc<EventChannel<ExecutionEvent>>,
    ) -> Self {
        Self {
            security,
            config,
            pipeline,
            monitor,
            limiter: RateLimiter::new(),
            events,
            settings,
            counters: ExecutionCounters::default(),
        }
    }

    /// Run a tool.
    pub async fn execute_tool(&self, instance: &Arc<PluginInstance>, name: &str, input: Value) -> PluginResult<Value> {
        self.execute(instance, OperationKind::Tool, name, input).await
    }

    /// Run an action.
    pub async fn execute_action(&self, instance: &Arc<PluginInstance>, name: &str, input: Value) -> PluginResult<Value> {
        self.execute(instance, OperationKind::Action, name, input).await
    }

    fn ensure_active(instance: &PluginInstance) -> PluginResult<()> {
        match instance.state() {
            PluginState::Active => Ok(()),
            state => Err(PluginError::NotActive {
                plugin_id: instance.id().to_string(),
                state: state.to_string(),
            }),
        }
    }

    async fn execute(
        &self,
        instance: &Arc<PluginInstance>,
        kind: OperationKind,
        name: &str,
        input: Value,
    ) -> PluginResult<Value> {
        let plugin_id = instance.id();
        Self::ensure_active(instance)?;

        let metadata = instance.metadata();
        let declared = match kind {
            OperationKind::Tool => metadata.tool(name),
            _ => metadata.action(name),
        }
        .ok_or_else(|| PluginError::operation_not_found(plugin_id, kind.as_str(), name))?;

        let key = kind.key(name);
        self.security.check_permission(plugin_id, &key)?;

        let config = self.config.get_config(plugin_id).unwrap_or_default();
        if let Some(limit) = config.rate_limits.get(&key).copied().or(self.settings.default_rate_limit) {
            if !self.limiter.try_acquire(plugin_id, &key, &limit) {
                self.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(plugin_id = %plugin_id, operation = %key, "Rate limit exceeded");
                return Err(PluginError::RateLimitExceeded {
                    plugin_id: plugin_id.to_string(),
                    operation: key,
                    limit: limit.max_requests,
                    window_ms: limit.window_ms,
                });
            }
        }

        let window = declared
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| Duration::from_millis(self.settings.default_timeout_ms));

        let started = Instant::now();
        let result = self.run_guarded(instance, kind, name, &key, input, window, &config).await;
        let elapsed = started.elapsed();
        self.finish(instance, kind, name, &result, elapsed).await;
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_guarded(
        &self,
        instance: &Arc<PluginInstance>,
        kind: OperationKind,
        name: &str,
        key: &str,
        input: Value,
        window: Duration,
        config: &PluginConfig,
    ) -> PluginResult<Value> {
        let plugin_id = instance.id();

        if let Some(schema) = instance.input_schema(key) {
            if let Err(violations) = schema.validate_value(&input) {
                self.counters.rejected_inputs.fetch_add(1, Ordering::Relaxed);
                return Err(PluginError::InputValidation {
                    plugin_id: plugin_id.to_string(),
                    operation: key.to_string(),
                    violations,
                });
            }
        }

        let request = MiddlewareContext::new(plugin_id, key, MiddlewareStage::Request);
        let outcome = async {
            let input = self.pipeline.run_middleware(&request, input).await?;
            let output = self.invoke(instance, kind, name, input, window, config).await?;
            let response = MiddlewareContext::new(plugin_id, key, MiddlewareStage::Response);
            self.pipeline.run_middleware(&response, output).await
        }
        .await;

        if let Err(error) = &outcome {
            let ctx = MiddlewareContext::new(plugin_id, key, MiddlewareStage::Error).with_error(error.to_string());
            let payload = json!({ "code": error.code(), "message": error.to_string() });
            if let Err(e) = self.pipeline.run_middleware(&ctx, payload).await {
                tracing::warn!(plugin_id = %plugin_id, operation = %key, error = %e, "Error middleware failed");
            }
        }
        outcome
    }

    async fn invoke(
        &self,
        instance: &Arc<PluginInstance>,
        kind: OperationKind,
        name: &str,
        input: Value,
        window: Duration,
        config: &PluginConfig,
    ) -> PluginResult<Value> {
        let plugin_id = instance.id();
        let key = kind.key(name);
        let ctx = ExecutionContext::new(plugin_id, kind, name, config.settings.clone());
        let cancellation = ctx.cancellation().clone();
        let plugin = instance.plugin();

        let call = async {
            match kind {
                OperationKind::Tool => plugin.call_tool(name, input, &ctx).await,
                _ => plugin.call_action(name, input, &ctx).await,
            }
        };

        match timeout(window, call).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(error @ (PluginError::ExecutionError { .. } | PluginError::Timeout { .. }))) => Err(error),
            Ok(Err(error)) => Err(PluginError::execution_error(plugin_id, &key, error.to_string())),
            Err(_) => {
                cancellation.cancel();
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    plugin_id = %plugin_id,
                    operation = %key,
                    timeout_ms = window.as_millis() as u64,
                    "Plugin operation timed out"
                );
                Err(PluginError::timeout(plugin_id, key, window.as_millis() as u64))
            }
        }
    }

    async fn finish(
        &self,
        instance: &Arc<PluginInstance>,
        kind: OperationKind,
        name: &str,
        result: &PluginResult<Value>,
        elapsed: Duration,
    ) {
        let plugin_id = instance.id();
        let success = result.is_ok();

        self.counters.executions.fetch_add(1, Ordering::Relaxed);
        if success {
            self.counters.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
        }

        instance.record_call(elapsed, success);
        self.monitor.update_metrics(plugin_id, elapsed, success);
        let memory = instance.plugin().memory_usage();
        instance.set_memory_usage(memory);
        self.monitor.record_memory_usage(plugin_id, memory);

        tracing::debug!(
            plugin_id = %plugin_id,
            operation = %kind.key(name),
            success,
            duration_ms = elapsed.as_millis() as u64,
            "Plugin operation completed"
        );

        self.events.emit(ExecutionEvent::Completed {
            plugin_id: plugin_id.to_string(),
            kind,
            name: name.to_string(),
            success,
            duration: elapsed,
            error: result.as_ref().err().map(ToString::to_string),
        });

        let event = match kind {
            OperationKind::Tool => event_names::TOOL_EXECUTED,
            _ => event_names::ACTION_EXECUTED,
        };
        let data = json!({
            "plugin_id": plugin_id,
            "name": name,
            "success": success,
            "duration_ms": elapsed.as_secs_f64() * 1000.0,
            "result": result.as_ref().ok(),
            "error": result.as_ref().err().map(ToString::to_string),
        });
        if let Err(e) = self.pipeline.emit_event(event, data).await {
            tracing::warn!(plugin_id = %plugin_id, event, error = %e, "Execution hook chain aborted");
        }
    }

    /// Read a resource. Resources are not rate limited.
    pub async fn get_resource(&self, instance: &Arc<PluginInstance>, name: &str) -> PluginResult<Value> {
        let plugin_id = instance.id();
        Self::ensure_active(instance)?;

        let metadata = instance.metadata();
        let resource = metadata
            .resource(name)
            .ok_or_else(|| PluginError::operation_not_found(plugin_id, OperationKind::Resource.as_str(), name))?;

        let key = OperationKind::Resource.key(name);
        self.security.check_permission(plugin_id, &key)?;

        let settings = self.config.get_config(plugin_id).map(|c| c.settings).unwrap_or_default();
        let ctx = ExecutionContext::new(plugin_id, OperationKind::Resource, name, settings);
        let cancellation = ctx.cancellation().clone();
        let window = Duration::from_millis(self.settings.default_timeout_ms);
        let plugin = instance.plugin();

        let value = match timeout(window, plugin.read_resource(name, &ctx)).await {
            Ok(result) => result?,
            Err(_) => {
                cancellation.cancel();
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                return Err(PluginError::timeout(plugin_id, key, window.as_millis() as u64));
            }
        };

        self.counters.resource_reads.fetch_add(1, Ordering::Relaxed);
        self.events.emit(ExecutionEvent::ResourceAccessed {
            plugin_id: plugin_id.to_string(),
            name: name.to_string(),
            uri: resource.uri.clone(),
        });
        Ok(value)
    }

    /// Rate limiter shared by every call.
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Forget a plugin's rate-limit windows.
    pub fn reset_plugin(&self, plugin_id: &str) {
        self.limiter.reset(plugin_id);
    }

    /// Execution statistics.
    pub fn stats(&self) -> ExecutionStats {
        ExecutionStats {
            executions: self.counters.executions.load(Ordering::Relaxed),
            successes: self.counters.successes.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            rate_limited: self.counters.rate_limited.load(Ordering::Relaxed),
            rejected_inputs: self.counters.rejected_inputs.load(Ordering::Relaxed),
            resource_reads: self.counters.resource_reads.load(Ordering::Relaxed),
        }
    }

    /// Subscribe to execution events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }
}
