//! # Configuration
//!
//! Two layers of configuration live here:
//!
//! - [`EngineConfig`]: engine-wide settings loaded from TOML and environment
//! - [`PluginConfig`]: per-plugin settings validated against each plugin's
//!   declared schema and held by the [`ConfigStore`]

pub mod engine;
pub mod plugin;
pub mod store;

pub use engine::{
    BusSettings, DependencySettings, EngineConfig, ExecutionSettings, LoggingSettings,
    MonitorSettings, MonitorThresholds, PipelineSettings,
};
pub use plugin::{PluginConfig, PluginConfigUpdate, RateLimit};
pub use store::{ConfigPersistence, ConfigStore, FileConfigPersistence, MemoryConfigPersistence};
