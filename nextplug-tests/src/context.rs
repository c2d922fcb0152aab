//! Per-test engine setup.

use anyhow::Result;
use nextplug_core::config::EngineConfig;
use nextplug_core::lifecycle::PluginInstance;
use nextplug_core::manager::{EngineContext, PluginManager};
use nextplug_core::plugin::Plugin;
use nextplug_core::types::PluginMetadata;
use std::sync::Arc;
use tracing::info;

/// A fresh engine per test.
pub struct TestContext {
    /// Manager under test
    pub manager: PluginManager,
}

impl TestContext {
    /// Engine on the `testing` preset, background tasks not started.
    pub fn new() -> Result<Self> {
        Self::with_config(EngineConfig::testing())
    }

    /// Engine on a custom configuration.
    pub fn with_config(config: EngineConfig) -> Result<Self> {
        tracing_subscriber::fmt()
            .with_env_filter(config.logging.level.as_str())
            .with_test_writer()
            .try_init()
            .ok(); // Ignore error if already initialized

        let manager = PluginManager::new(EngineContext::new(config)?);
        Ok(Self { manager })
    }

    /// Engine with the bus drain, monitor sampling and hook reporter running.
    pub async fn started() -> Result<Self> {
        Self::started_with(EngineConfig::testing()).await
    }

    /// Started engine on a custom configuration.
    pub async fn started_with(config: EngineConfig) -> Result<Self> {
        let ctx = Self::with_config(config)?;
        ctx.manager.initialize().await?;
        info!("Test engine started");
        Ok(ctx)
    }

    /// Install and enable a plugin.
    pub async fn install_active(&self, metadata: PluginMetadata, plugin: Arc<dyn Plugin>) -> Result<Arc<PluginInstance>> {
        let plugin_id = metadata.id.clone();
        let instance = self.manager.install_plugin(metadata, plugin).await?;
        self.manager.enable(&plugin_id).await?;
        Ok(instance)
    }

    /// Shut the engine down.
    pub async fn teardown(self) -> Result<()> {
        self.manager.shutdown().await?;
        Ok(())
    }
}
