//! Plugin descriptors and implementations shared by the suites.

use async_trait::async_trait;
use nextplug_core::bus::Message;
use nextplug_core::config::PluginConfig;
use nextplug_core::error::{HookError, PluginError, PluginResult};
use nextplug_core::plugin::{ExecutionContext, ModulePlugin, Plugin};
use nextplug_core::schema::{PropertySchema, PropertyType, Schema};
use nextplug_core::types::{HookSpec, OperationSpec, PluginMetadata, ResourceSpec};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Minimal descriptor that passes the default security policy.
pub fn plugin_metadata(plugin_id: &str) -> PluginMetadata {
    PluginMetadata::new(plugin_id, plugin_id, "1.0.0")
        .with_author("NextPlug Tests")
        .with_license("MIT")
        .with_description("Fixture plugin")
}

/// Descriptor for [`echo_plugin`].
///
/// Declares `echo`, `slow` (1s timeout) and `fail` tools, a `reset` action and
/// a `status` resource.
pub fn echo_metadata(plugin_id: &str) -> PluginMetadata {
    plugin_metadata(plugin_id)
        .with_tool(OperationSpec::new("echo", "Return the input unchanged"))
        .with_tool(OperationSpec::new("slow", "Sleep before answering").with_timeout(Duration::from_millis(1_000)))
        .with_tool(OperationSpec::new("fail", "Always fails"))
        .with_action(OperationSpec::new("reset", "Reset state"))
        .with_resource(ResourceSpec::new("status", "json", format!("plugin://{plugin_id}/status")))
}

/// Plugin serving the tools of [`echo_metadata`].
///
/// `slow` sleeps for `input.ms` milliseconds (5000 by default).
pub fn echo_plugin(plugin_id: &str) -> Arc<dyn Plugin> {
    let id = plugin_id.to_string();
    Arc::new(
        ModulePlugin::builder(plugin_id)
            .tool("echo", |input, _ctx| async move { Ok(input) })
            .tool("slow", |input, ctx| async move {
                let ms = input.get("ms").and_then(Value::as_u64).unwrap_or(5_000);
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(json!({ "slept_ms": ms })),
                    _ = ctx.cancellation().cancelled() => Ok(json!({ "cancelled": true })),
                }
            })
            .tool("fail", move |_input, _ctx| {
                let id = id.clone();
                async move { Err(PluginError::execution_error(id, "tool:fail", "fixture failure")) }
            })
            .action("reset", |_input, _ctx| async move { Ok(json!({ "reset": true })) })
            .resource("status", |ctx| async move { Ok(json!({ "plugin": ctx.plugin_id, "ok": true })) })
            .build(),
    )
}

/// Settings schema requiring a string `apiKey`.
pub fn api_key_schema() -> Schema {
    Schema::new()
        .property("apiKey", PropertySchema::new(PropertyType::String).with_length(Some(1), None))
        .property(
            "retries",
            PropertySchema::new(PropertyType::Integer)
                .with_default(json!(3))
                .with_range(Some(0.0), Some(10.0)),
        )
        .require("apiKey")
}

/// Plugin that appends `tag` to `data.trace` when `event` fires.
pub fn tracing_hook_plugin(plugin_id: &str, event: &str, priority: i32, tag: &str) -> (PluginMetadata, Arc<dyn Plugin>) {
    let spec = HookSpec::new(format!("{tag}-hook"), event, priority);
    let tag = tag.to_string();
    let plugin = ModulePlugin::builder(plugin_id)
        .hook(spec.clone(), move |mut data: Value| {
            let tag = tag.clone();
            async move {
                match data.get_mut("trace").and_then(Value::as_array_mut) {
                    Some(trace) => trace.push(json!(tag)),
                    None => data["trace"] = json!([tag]),
                }
                Ok::<Value, HookError>(data)
            }
        })
        .build();
    (plugin_metadata(plugin_id).with_hook(spec), Arc::new(plugin))
}

/// Plugin whose hook on `event` always fails, critically or not.
pub fn failing_hook_plugin(plugin_id: &str, event: &str, priority: i32, critical: bool) -> (PluginMetadata, Arc<dyn Plugin>) {
    let spec = HookSpec::new("broken-hook", event, priority);
    let owner = plugin_id.to_string();
    let plugin = ModulePlugin::builder(plugin_id)
        .hook(spec.clone(), move |_data: Value| {
            let owner = owner.clone();
            async move {
                if critical {
                    Err(HookError::critical(owner, "broken-hook", "fixture failure"))
                } else {
                    Err(HookError::failed(owner, "broken-hook", "fixture failure"))
                }
            }
        })
        .build();
    (plugin_metadata(plugin_id).with_hook(spec), Arc::new(plugin))
}

/// Call counters observed by [`CountingPlugin`].
#[derive(Debug, Default)]
pub struct CallCounts {
    /// `initialize` calls
    pub initialize: AtomicUsize,
    /// `enable` calls
    pub enable: AtomicUsize,
    /// `disable` calls
    pub disable: AtomicUsize,
    /// `configure` calls
    pub configure: AtomicUsize,
    /// `destroy` calls
    pub destroy: AtomicUsize,
    /// Bus messages received
    pub messages: AtomicUsize,
}

impl CallCounts {
    /// `initialize` calls so far.
    pub fn initialized(&self) -> usize {
        self.initialize.load(Ordering::SeqCst)
    }

    /// `enable` calls so far.
    pub fn enabled(&self) -> usize {
        self.enable.load(Ordering::SeqCst)
    }

    /// `disable` calls so far.
    pub fn disabled(&self) -> usize {
        self.disable.load(Ordering::SeqCst)
    }

    /// `configure` calls so far.
    pub fn configured(&self) -> usize {
        self.configure.load(Ordering::SeqCst)
    }

    /// `destroy` calls so far.
    pub fn destroyed(&self) -> usize {
        self.destroy.load(Ordering::SeqCst)
    }

    /// Bus messages received so far.
    pub fn received(&self) -> usize {
        self.messages.load(Ordering::SeqCst)
    }
}

/// Trait-implemented plugin that counts lifecycle callbacks.
///
/// Serves an `echo` tool, answers requests with `{"pong": <payload>}`, and
/// can be told to fail on enable.
pub struct CountingPlugin {
    counts: Arc<CallCounts>,
    fail_enable: AtomicBool,
}

impl CountingPlugin {
    /// Create the plugin and a handle on its counters.
    pub fn new() -> (Arc<Self>, Arc<CallCounts>) {
        Self::build(false)
    }

    /// A plugin whose `enable` always fails.
    pub fn failing_enable() -> (Arc<Self>, Arc<CallCounts>) {
        Self::build(true)
    }

    fn build(fail_enable: bool) -> (Arc<Self>, Arc<CallCounts>) {
        let counts = Arc::new(CallCounts::default());
        let plugin = Arc::new(Self {
            counts: Arc::clone(&counts),
            fail_enable: AtomicBool::new(fail_enable),
        });
        (plugin, counts)
    }

    /// Let later `enable` calls succeed.
    pub fn heal(&self) {
        self.fail_enable.store(false, Ordering::SeqCst);
    }

    /// Descriptor matching this plugin.
    pub fn metadata(plugin_id: &str) -> PluginMetadata {
        plugin_metadata(plugin_id).with_tool(OperationSpec::new("echo", "Return the input unchanged"))
    }
}

#[async_trait]
impl Plugin for CountingPlugin {
    async fn initialize(&self, _config: &PluginConfig) -> PluginResult<()> {
        self.counts.initialize.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self) -> PluginResult<()> {
        self.counts.destroy.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn configure(&self, _config: &PluginConfig) -> PluginResult<()> {
        self.counts.configure.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn enable(&self) -> PluginResult<()> {
        self.counts.enable.fetch_add(1, Ordering::SeqCst);
        if self.fail_enable.load(Ordering::SeqCst) {
            return Err(PluginError::internal("enable", "fixture refuses to start"));
        }
        Ok(())
    }

    async fn disable(&self) -> PluginResult<()> {
        self.counts.disable.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn call_tool(&self, name: &str, input: Value, ctx: &ExecutionContext) -> PluginResult<Value> {
        match name {
            "echo" => Ok(input),
            other => Err(PluginError::operation_not_found(&ctx.plugin_id, "tool", other)),
        }
    }

    async fn call_action(&self, name: &str, _input: Value, ctx: &ExecutionContext) -> PluginResult<Value> {
        Err(PluginError::operation_not_found(&ctx.plugin_id, "action", name))
    }

    async fn read_resource(&self, name: &str, ctx: &ExecutionContext) -> PluginResult<Value> {
        Err(PluginError::operation_not_found(&ctx.plugin_id, "resource", name))
    }

    async fn handle_message(&self, message: &Message) -> PluginResult<Option<Value>> {
        self.counts.messages.fetch_add(1, Ordering::SeqCst);
        if message.is_request() {
            return Ok(Some(json!({ "pong": message.payload })));
        }
        Ok(None)
    }
}
