//! Engine-wide settings.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `NEXTPLUG_*` environment variables. The merged result is validated before
//! it is handed to the engine.

use crate::config::plugin::RateLimit;
use crate::error::{PluginError, PluginResult};
use crate::security::SecurityPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use validator::Validate;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "NEXTPLUG";

/// Root engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct EngineConfig {
    /// Host version used for plugin compatibility checks
    #[validate(length(min = 1))]
    pub host_version: String,

    /// Execution engine defaults
    #[validate(nested)]
    pub execution: ExecutionSettings,

    /// Communication bus tuning
    #[validate(nested)]
    pub bus: BusSettings,

    /// Performance monitor tuning
    #[validate(nested)]
    pub monitor: MonitorSettings,

    /// Hook pipeline tuning
    #[validate(nested)]
    pub pipeline: PipelineSettings,

    /// Dependency resolution policy
    pub dependency: DependencySettings,

    /// Security policy applied at install
    pub security: SecurityPolicy,

    /// Logging output
    #[validate(nested)]
    pub logging: LoggingSettings,
}

/// Execution engine defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ExecutionSettings {
    /// Timeout applied when an operation declares none
    #[validate(range(min = 1))]
    pub default_timeout_ms: u64,

    /// Rate limit applied to operations without a configured one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub default_rate_limit: Option<RateLimit>,
}

/// Communication bus tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct BusSettings {
    /// Queue drain interval
    #[validate(range(min = 1, max = 60_000))]
    pub tick_interval_ms: u64,

    /// TTL given to messages that do not set one
    #[validate(range(min = 1))]
    pub default_ttl_ms: u64,

    /// Request/response timeout
    #[validate(range(min = 1))]
    pub request_timeout_ms: u64,

    /// Maximum queued messages
    #[validate(range(min = 1))]
    pub queue_capacity: usize,
}

/// Alert thresholds for the performance monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct MonitorThresholds {
    /// Average response time above which an alert fires
    #[validate(range(min = 1.0))]
    pub max_response_time_ms: f64,

    /// Success rate (percent) below which an alert fires
    #[validate(range(min = 0.0, max = 100.0))]
    pub min_success_rate: f64,

    /// Memory footprint above which an alert fires
    #[validate(range(min = 1))]
    pub max_memory_bytes: u64,

    /// Error rate (percent) above which an alert fires
    #[validate(range(min = 0.0, max = 100.0))]
    pub max_error_rate: f64,
}

/// Performance monitor tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct MonitorSettings {
    /// Sampling interval
    #[validate(range(min = 1))]
    pub collection_interval_ms: u64,

    /// Alert thresholds
    #[validate(nested)]
    pub thresholds: MonitorThresholds,

    /// Retained alerts
    #[validate(range(min = 1))]
    pub alert_history: usize,
}

/// Hook pipeline tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct PipelineSettings {
    /// Interval for publishing hook statistics
    #[validate(range(min = 1))]
    pub stats_interval_ms: u64,
}

/// Dependency resolution policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySettings {
    /// Refuse installs that only produce warnings (peer dependencies)
    pub block_on_warnings: bool,

    /// Refuse installs that would close a dependency cycle
    pub block_on_cycles: bool,
}

impl Default for DependencySettings {
    fn default() -> Self {
        Self {
            block_on_warnings: false,
            block_on_cycles: true,
        }
    }
}

/// Logging output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset
    #[validate(length(min = 1))]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host_version: env!("CARGO_PKG_VERSION").to_string(),
            execution: ExecutionSettings {
                default_timeout_ms: 30_000,
                default_rate_limit: None,
            },
            bus: BusSettings {
                tick_interval_ms: 100,
                default_ttl_ms: 60_000,
                request_timeout_ms: 30_000,
                queue_capacity: 10_000,
            },
            monitor: MonitorSettings {
                collection_interval_ms: 5_000,
                thresholds: MonitorThresholds {
                    max_response_time_ms: 1_000.0,
                    min_success_rate: 95.0,
                    max_memory_bytes: 100 * 1024 * 1024,
                    max_error_rate: 5.0,
                },
                alert_history: 100,
            },
            pipeline: PipelineSettings { stats_interval_ms: 60_000 },
            dependency: DependencySettings::default(),
            security: SecurityPolicy::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
                json: false,
            },
        }
    }
}

impl EngineConfig {
    /// Verbose logging and a permissive license policy.
    pub fn development() -> Self {
        let mut config = Self::default();
        config.logging.level = "debug".to_string();
        config.security = SecurityPolicy::permissive();
        config
    }

    /// JSON logs, a strict policy and warnings treated as blocking.
    pub fn production() -> Self {
        let mut config = Self::default();
        config.logging.json = true;
        config.security = SecurityPolicy::strict();
        config.dependency.block_on_warnings = true;
        config
    }

    /// Fast ticks and short timeouts for tests.
    pub fn testing() -> Self {
        let mut config = Self::default();
        config.logging.level = "debug".to_string();
        config.execution.default_timeout_ms = 5_000;
        config.bus.tick_interval_ms = 5;
        config.bus.request_timeout_ms = 1_000;
        config.monitor.collection_interval_ms = 50;
        config.pipeline.stats_interval_ms = 1_000;
        config
    }

    /// Load settings from a TOML file merged over the defaults, then apply
    /// `NEXTPLUG_*` environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> PluginResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            config_error(format!("failed to read config file {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), "Engine configuration loaded");
        Ok(config)
    }

    /// Parse TOML merged over the defaults, then apply environment overrides.
    pub fn from_toml_str(content: &str) -> PluginResult<Self> {
        let file_value = content
            .parse::<toml::Value>()
            .map_err(|e| config_error(format!("failed to parse config: {e}")))?;
        let overrides = std::env::vars().filter_map(|(key, value)| {
            key.strip_prefix(&format!("{ENV_PREFIX}_"))
                .map(|rest| (rest.to_string(), value))
        });
        Self::layered(Some(file_value), overrides)
    }

    /// Defaults plus environment overrides, without a file.
    pub fn from_env() -> PluginResult<Self> {
        let overrides = std::env::vars().filter_map(|(key, value)| {
            key.strip_prefix(&format!("{ENV_PREFIX}_"))
                .map(|rest| (rest.to_string(), value))
        });
        Self::layered(None, overrides)
    }

    /// Merge `file` over the defaults and apply `(KEY, value)` overrides where
    /// `KEY` has the prefix stripped (`BUS_TICK_INTERVAL_MS`).
    pub fn layered<I>(file: Option<toml::Value>, overrides: I) -> PluginResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut value = toml::Value::try_from(Self::default())
            .map_err(|e| config_error(format!("failed to serialize defaults: {e}")))?;

        if let Some(file) = file {
            value = merge_toml(value, file);
        }

        let mut applied = 0usize;
        for (key, raw) in overrides {
            if apply_override(&mut value, &key.to_lowercase(), &raw) {
                applied += 1;
            } else {
                debug!(key = %key, "Ignoring unknown environment override");
            }
        }
        debug!(applied, "Applied environment overrides");

        let config: Self = value
            .try_into()
            .map_err(|e| config_error(format!("failed to deserialize config: {e}")))?;
        config.check()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn check(&self) -> PluginResult<()> {
        self.validate().map_err(|errors| {
            let violations = errors
                .to_string()
                .lines()
                .map(str::to_string)
                .filter(|line| !line.is_empty())
                .collect();
            PluginError::configuration(crate::error::SYSTEM_PLUGIN_ID, violations)
        })?;

        if self.bus.request_timeout_ms > self.bus.default_ttl_ms {
            return Err(config_error(format!(
                "bus.request_timeout_ms ({}) must not exceed bus.default_ttl_ms ({})",
                self.bus.request_timeout_ms, self.bus.default_ttl_ms
            )));
        }
        Ok(())
    }

    /// Serialize to TOML.
    pub fn to_toml_string(&self) -> PluginResult<String> {
        toml::to_string_pretty(self).map_err(|e| config_error(format!("failed to serialize config: {e}")))
    }

    /// Default operation timeout.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.execution.default_timeout_ms)
    }
}

fn config_error(reason: String) -> PluginError {
    PluginError::configuration(crate::error::SYSTEM_PLUGIN_ID, vec![reason])
}

fn merge_toml(mut base: toml::Value, overlay: toml::Value) -> toml::Value {
    if let (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) = (&mut base, overlay) {
        for (key, value) in overlay_table {
            match base_table.get_mut(&key) {
                Some(existing) if existing.is_table() && value.is_table() => {
                    *existing = merge_toml(existing.clone(), value);
                }
                Some(existing) => *existing = value,
                None => {
                    base_table.insert(key, value);
                }
            }
        }
    }
    base
}

/// Resolve `bus_tick_interval_ms` against the table shape: the first segment
/// naming an existing table descends, the remainder names the leaf key.
fn apply_override(value: &mut toml::Value, key: &str, raw: &str) -> bool {
    let toml::Value::Table(table) = value else {
        return false;
    };

    if table.contains_key(key) {
        if let Some(slot) = table.get_mut(key) {
            if !slot.is_table() {
                *slot = parse_env_value(raw);
                return true;
            }
        }
        return false;
    }

    let mut split = key.find('_');
    while let Some(index) = split {
        let (head, rest) = (&key[..index], &key[index + 1..]);
        if let Some(child) = table.get_mut(head) {
            if child.is_table() && apply_override(child, rest, raw) {
                return true;
            }
        }
        split = key[index + 1..].find('_').map(|next| index + 1 + next);
    }
    false
}

fn parse_env_value(value: &str) -> toml::Value {
    if let Ok(b) = value.parse::<bool>() {
        return toml::Value::Boolean(b);
    }
    if let Ok(i) = value.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    if let Ok(f) = value.parse::<f64>() {
        return toml::Value::Float(f);
    }
    toml::Value::String(value.to_string())
}
