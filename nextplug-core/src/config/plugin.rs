//! Per-plugin configuration records.

use crate::types::PluginMetadata;
use crate::security::SecurityValidator;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use validator::Validate;

/// Sliding-window rate limit for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct RateLimit {
    /// Maximum calls per window
    #[validate(range(min = 1))]
    pub max_requests: u32,

    /// Window length in milliseconds
    #[validate(range(min = 1))]
    pub window_ms: u64,
}

impl RateLimit {
    /// Create a rate limit.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window_ms: window.as_millis() as u64,
        }
    }

    /// Get the window as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Mutable configuration of one installed plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Whether the plugin is enabled
    #[serde(default)]
    pub enabled: bool,

    /// Plugin-defined settings, validated against the plugin's schema
    #[serde(default)]
    pub settings: Map<String, Value>,

    /// Granted permissions
    #[serde(default)]
    pub permissions: Vec<String>,

    /// Rate limits keyed by operation (`tool:<name>`, `action:<name>`)
    #[serde(default)]
    pub rate_limits: BTreeMap<String, RateLimit>,

    /// Hook toggles keyed by hook name
    #[serde(default)]
    pub hooks: BTreeMap<String, bool>,

    /// Middleware toggles keyed by middleware name
    #[serde(default)]
    pub middleware: BTreeMap<String, bool>,
}

impl PluginConfig {
    /// Derive the initial configuration for a plugin.
    ///
    /// Settings come from schema defaults, permissions from declared
    /// capabilities, and every declared hook and middleware starts enabled.
    pub fn defaults_for(metadata: &PluginMetadata) -> Self {
        Self {
            enabled: false,
            settings: metadata.config_schema.defaults(),
            permissions: SecurityValidator::default_permissions(metadata),
            rate_limits: BTreeMap::new(),
            hooks: metadata
                .capabilities
                .hooks
                .iter()
                .map(|h| (h.name.clone(), true))
                .collect(),
            middleware: metadata
                .capabilities
                .middleware
                .iter()
                .map(|m| (m.name.clone(), true))
                .collect(),
        }
    }

    /// Merge an update key by key.
    pub fn merge(&mut self, update: PluginConfigUpdate) {
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
        if let Some(settings) = update.settings {
            self.settings.extend(settings);
        }
        if let Some(permissions) = update.permissions {
            for permission in permissions {
                if !self.permissions.contains(&permission) {
                    self.permissions.push(permission);
                }
            }
        }
        if let Some(rate_limits) = update.rate_limits {
            self.rate_limits.extend(rate_limits);
        }
        if let Some(hooks) = update.hooks {
            self.hooks.extend(hooks);
        }
        if let Some(middleware) = update.middleware {
            self.middleware.extend(middleware);
        }
    }

    /// Check a hook toggle. Unknown hooks are enabled.
    pub fn hook_enabled(&self, name: &str) -> bool {
        self.hooks.get(name).copied().unwrap_or(true)
    }

    /// Check a middleware toggle. Unknown middleware is enabled.
    pub fn middleware_enabled(&self, name: &str) -> bool {
        self.middleware.get(name).copied().unwrap_or(true)
    }
}

/// Partial configuration applied by `configure`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginConfigUpdate {
    /// New enabled flag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Settings to add or overwrite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Map<String, Value>>,

    /// Permissions to add
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<String>>,

    /// Rate limits to add or overwrite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limits: Option<BTreeMap<String, RateLimit>>,

    /// Hook toggles to add or overwrite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks: Option<BTreeMap<String, bool>>,

    /// Middleware toggles to add or overwrite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middleware: Option<BTreeMap<String, bool>>,
}

impl PluginConfigUpdate {
    /// Create an empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one setting.
    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.settings.get_or_insert_with(Map::new).insert(key.into(), value);
        self
    }

    /// Provide a settings object (an empty map is a valid, empty update).
    pub fn with_settings(mut self, settings: Map<String, Value>) -> Self {
        self.settings.get_or_insert_with(Map::new).extend(settings);
        self
    }

    /// Add a permission.
    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.get_or_insert_with(Vec::new).push(permission.into());
        self
    }

    /// Set a rate limit for an operation key.
    pub fn with_rate_limit(mut self, operation: impl Into<String>, limit: RateLimit) -> Self {
        self.rate_limits
            .get_or_insert_with(BTreeMap::new)
            .insert(operation.into(), limit);
        self
    }

    /// Toggle a hook.
    pub fn with_hook(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.hooks.get_or_insert_with(BTreeMap::new).insert(name.into(), enabled);
        self
    }

    /// Toggle a middleware.
    pub fn with_middleware(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.middleware
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), enabled);
        self
    }

    /// Check whether the update touches hook or middleware toggles.
    pub fn touches_pipeline(&self) -> bool {
        self.hooks.is_some() || self.middleware.is_some()
    }
}

impl From<PluginConfig> for PluginConfigUpdate {
    fn from(config: PluginConfig) -> Self {
        Self {
            enabled: Some(config.enabled),
            settings: Some(config.settings),
            permissions: Some(config.permissions),
            rate_limits: Some(config.rate_limits),
            hooks: Some(config.hooks),
            middleware: Some(config.middleware),
        }
    }
}
