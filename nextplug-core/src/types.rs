//! Plugin descriptors and shared value types.

use crate::schema::Schema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Dependency name to version range.
pub type DependencyMap = BTreeMap<String, String>;

/// Immutable plugin descriptor.
///
/// Produced by a [`PluginSource`](crate::plugin::PluginSource) at discovery
/// time and shared behind `Arc`. An update replaces the whole descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Unique plugin identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Semver version string
    pub version: String,

    /// Plugin author
    #[serde(default)]
    pub author: String,

    /// SPDX license identifier
    #[serde(default)]
    pub license: String,

    /// Short description
    #[serde(default)]
    pub description: String,

    /// Search keywords
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Marketplace category
    #[serde(default)]
    pub category: Option<String>,

    /// Declared capabilities
    #[serde(default)]
    pub capabilities: PluginCapabilities,

    /// Required plugins
    #[serde(default)]
    pub dependencies: DependencyMap,

    /// Plugins expected alongside this one
    #[serde(default)]
    pub peer_dependencies: DependencyMap,

    /// Plugins that cannot be installed together with this one
    #[serde(default)]
    pub conflicts: Vec<String>,

    /// Settings schema
    #[serde(default)]
    pub config_schema: Schema,

    /// Whether the marketplace verified this plugin
    #[serde(default)]
    pub verified: bool,

    /// Lowest supported host version
    #[serde(default)]
    pub min_host_version: Option<String>,

    /// Highest supported host version
    #[serde(default)]
    pub max_host_version: Option<String>,
}

impl PluginMetadata {
    /// Create a descriptor with the identifying fields set.
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    /// Set the author.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// Set the license.
    pub fn with_license(mut self, license: impl Into<String>) -> Self {
        self.license = license.into();
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declare a tool.
    pub fn with_tool(mut self, tool: OperationSpec) -> Self {
        self.capabilities.tools.push(tool);
        self
    }

    /// Declare an action.
    pub fn with_action(mut self, action: OperationSpec) -> Self {
        self.capabilities.actions.push(action);
        self
    }

    /// Declare a resource.
    pub fn with_resource(mut self, resource: ResourceSpec) -> Self {
        self.capabilities.resources.push(resource);
        self
    }

    /// Declare a hook.
    pub fn with_hook(mut self, hook: HookSpec) -> Self {
        self.capabilities.hooks.push(hook);
        self
    }

    /// Declare a middleware.
    pub fn with_middleware(mut self, middleware: MiddlewareSpec) -> Self {
        self.capabilities.middleware.push(middleware);
        self
    }

    /// Add a dependency.
    pub fn with_dependency(mut self, name: impl Into<String>, range: impl Into<String>) -> Self {
        self.dependencies.insert(name.into(), range.into());
        self
    }

    /// Add a peer dependency.
    pub fn with_peer_dependency(mut self, name: impl Into<String>, range: impl Into<String>) -> Self {
        self.peer_dependencies.insert(name.into(), range.into());
        self
    }

    /// Declare a conflicting plugin.
    pub fn with_conflict(mut self, plugin_id: impl Into<String>) -> Self {
        self.conflicts.push(plugin_id.into());
        self
    }

    /// Set the settings schema.
    pub fn with_config_schema(mut self, schema: Schema) -> Self {
        self.config_schema = schema;
        self
    }

    /// Set the supported host version bounds.
    pub fn with_host_versions(mut self, min: Option<&str>, max: Option<&str>) -> Self {
        self.min_host_version = min.map(str::to_string);
        self.max_host_version = max.map(str::to_string);
        self
    }

    /// Find a declared tool.
    pub fn tool(&self, name: &str) -> Option<&OperationSpec> {
        self.capabilities.tools.iter().find(|t| t.name == name)
    }

    /// Find a declared action.
    pub fn action(&self, name: &str) -> Option<&OperationSpec> {
        self.capabilities.actions.iter().find(|a| a.name == name)
    }

    /// Find a declared resource.
    pub fn resource(&self, name: &str) -> Option<&ResourceSpec> {
        self.capabilities.resources.iter().find(|r| r.name == name)
    }
}

/// Capability declarations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginCapabilities {
    /// Callable tools
    #[serde(default)]
    pub tools: Vec<OperationSpec>,

    /// Readable resources
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,

    /// Callable actions
    #[serde(default)]
    pub actions: Vec<OperationSpec>,

    /// Event hooks
    #[serde(default)]
    pub hooks: Vec<HookSpec>,

    /// Pipeline middleware
    #[serde(default)]
    pub middleware: Vec<MiddlewareSpec>,
}

/// A tool or action contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationSpec {
    /// Operation name
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Input schema
    #[serde(default)]
    pub input_schema: Schema,

    /// Per-operation timeout override
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl OperationSpec {
    /// Create an operation with no input constraints.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: Schema::default(),
            timeout_ms: None,
        }
    }

    /// Set the input schema.
    pub fn with_input_schema(mut self, schema: Schema) -> Self {
        self.input_schema = schema;
        self
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }
}

/// A resource declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Resource name
    pub name: String,

    /// Resource type (e.g. `text`, `json`)
    #[serde(default, rename = "type")]
    pub resource_type: String,

    /// Resource locator
    #[serde(default)]
    pub uri: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,
}

impl ResourceSpec {
    /// Create a resource declaration.
    pub fn new(name: impl Into<String>, resource_type: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_type: resource_type.into(),
            uri: uri.into(),
            description: String::new(),
        }
    }
}

/// A hook declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookSpec {
    /// Hook name, unique within the plugin
    pub name: String,

    /// Event the hook listens to
    pub event: String,

    /// Higher values run first
    #[serde(default)]
    pub priority: i32,

    /// Remove after the first execution
    #[serde(default)]
    pub once: bool,
}

impl HookSpec {
    /// Create a hook declaration.
    pub fn new(name: impl Into<String>, event: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            event: event.into(),
            priority,
            once: false,
        }
    }

    /// Mark the hook as single-shot.
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }
}

/// Middleware pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MiddlewareStage {
    /// Before an operation runs, transforms its input
    Request,
    /// After an operation succeeds, transforms its output
    Response,
    /// After an operation fails, observes the error
    Error,
}

impl MiddlewareStage {
    /// Get the stage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for MiddlewareStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A middleware declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiddlewareSpec {
    /// Middleware name, unique within the plugin
    pub name: String,

    /// Stage the middleware runs in
    pub stage: MiddlewareStage,

    /// Higher values run first
    #[serde(default)]
    pub priority: i32,
}

impl MiddlewareSpec {
    /// Create a middleware declaration.
    pub fn new(name: impl Into<String>, stage: MiddlewareStage, priority: i32) -> Self {
        Self {
            name: name.into(),
            stage,
            priority,
        }
    }
}

/// Running performance figures for one plugin.
///
/// Shared by the execution engine and the performance monitor so both keep
/// identical averages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    /// Incremental mean response time in milliseconds
    pub avg_response_time_ms: f64,

    /// Calls recorded
    pub total_requests: u64,

    /// Failed calls recorded
    pub failed_requests: u64,

    /// Incremental mean over 0/100 per call
    pub success_rate: f64,

    /// Last reported memory estimate in bytes
    pub memory_bytes: u64,
}

impl Default for PerformanceSnapshot {
    fn default() -> Self {
        Self {
            avg_response_time_ms: 0.0,
            total_requests: 0,
            failed_requests: 0,
            success_rate: 100.0,
            memory_bytes: 0,
        }
    }
}

impl PerformanceSnapshot {
    /// Fold one call into the running figures.
    pub fn record(&mut self, elapsed: Duration, success: bool) {
        self.total_requests += 1;
        if !success {
            self.failed_requests += 1;
        }

        let n = self.total_requests as f64;
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        self.avg_response_time_ms += (elapsed_ms - self.avg_response_time_ms) / n;

        let outcome = if success { 100.0 } else { 0.0 };
        self.success_rate += (outcome - self.success_rate) / n;
    }

    /// Percentage of failed calls.
    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.failed_requests as f64 / self.total_requests as f64 * 100.0
        }
    }
}
