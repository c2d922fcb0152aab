//! Configuration store with schema validation and pluggable persistence.

use crate::config::plugin::{PluginConfig, PluginConfigUpdate};
use crate::error::{PluginError, PluginResult};
use crate::schema::{CompiledSchema, Schema};
use crate::types::PluginMetadata;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use validator::Validate;

/// Durable storage for plugin configurations.
#[async_trait]
pub trait ConfigPersistence: Send + Sync + 'static {
    /// Load a stored configuration.
    async fn load(&self, plugin_id: &str) -> PluginResult<Option<PluginConfig>>;

    /// Store a configuration, replacing any previous one.
    async fn save(&self, plugin_id: &str, config: &PluginConfig) -> PluginResult<()>;

    /// List plugin ids with stored configurations.
    async fn list(&self) -> PluginResult<Vec<String>>;

    /// Delete a stored configuration. Deleting a missing entry is not an error.
    async fn remove(&self, plugin_id: &str) -> PluginResult<()>;
}

/// In-memory persistence.
#[derive(Debug, Default)]
pub struct MemoryConfigPersistence {
    entries: RwLock<BTreeMap<String, PluginConfig>>,
}

impl MemoryConfigPersistence {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigPersistence for MemoryConfigPersistence {
    async fn load(&self, plugin_id: &str) -> PluginResult<Option<PluginConfig>> {
        Ok(self.entries.read().get(plugin_id).cloned())
    }

    async fn save(&self, plugin_id: &str, config: &PluginConfig) -> PluginResult<()> {
        self.entries.write().insert(plugin_id.to_string(), config.clone());
        Ok(())
    }

    async fn list(&self) -> PluginResult<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    async fn remove(&self, plugin_id: &str) -> PluginResult<()> {
        self.entries.write().remove(plugin_id);
        Ok(())
    }
}

/// Directory-backed persistence, one `<plugin_id>.json` file per plugin.
#[derive(Debug, Clone)]
pub struct FileConfigPersistence {
    directory: PathBuf,
}

impl FileConfigPersistence {
    /// Use `directory`, creating it on first save.
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, plugin_id: &str) -> PluginResult<PathBuf> {
        let safe = !plugin_id.is_empty()
            && plugin_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
            && !plugin_id.starts_with('.');
        if !safe {
            return Err(PluginError::configuration(
                plugin_id,
                vec![format!("plugin id {plugin_id:?} cannot be used as a file name")],
            ));
        }
        Ok(self.directory.join(format!("{plugin_id}.json")))
    }
}

#[async_trait]
impl ConfigPersistence for FileConfigPersistence {
    async fn load(&self, plugin_id: &str) -> PluginResult<Option<PluginConfig>> {
        let path = self.path_for(plugin_id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, plugin_id: &str, config: &PluginConfig) -> PluginResult<()> {
        let path = self.path_for(plugin_id)?;
        tokio::fs::create_dir_all(&self.directory).await?;
        let content = serde_json::to_string_pretty(config)?;
        tokio::fs::write(&path, content).await?;
        tracing::debug!(plugin_id = %plugin_id, path = %path.display(), "Configuration persisted");
        Ok(())
    }

    async fn list(&self) -> PluginResult<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn remove(&self, plugin_id: &str) -> PluginResult<()> {
        let path = self.path_for(plugin_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Holds and validates per-plugin configuration.
///
/// Every write goes through one validation path: merge, validate the merged
/// settings against the plugin's schema, persist, then publish. A failure at
/// any step leaves the stored configuration untouched.
pub struct ConfigStore {
    /// Current configurations
    configs: DashMap<String, PluginConfig>,

    /// Compiled settings schemas
    schemas: DashMap<String, CompiledSchema>,

    /// Durable backend
    persistence: Arc<dyn ConfigPersistence>,

    /// Serialises read-modify-write cycles
    write_lock: Mutex<()>,
}

impl ConfigStore {
    /// Create a store over a persistence backend.
    pub fn new(persistence: Arc<dyn ConfigPersistence>) -> Self {
        Self {
            configs: DashMap::new(),
            schemas: DashMap::new(),
            persistence,
            write_lock: Mutex::new(()),
        }
    }

    /// Create a store with in-memory persistence.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryConfigPersistence::new()))
    }

    /// Register a freshly installed plugin and attach its default configuration.
    ///
    /// A previously persisted configuration is restored on top of the defaults
    /// when it still validates; otherwise the defaults win.
    pub async fn register_plugin(&self, metadata: &PluginMetadata) -> PluginResult<PluginConfig> {
        let _guard = self.write_lock.lock().await;
        let plugin_id = metadata.id.as_str();

        let schema = metadata
            .config_schema
            .compile()
            .map_err(|e| PluginError::configuration(plugin_id, vec![e.to_string()]))?;
        let mut config = PluginConfig::defaults_for(metadata);

        if let Some(saved) = self.persistence.load(plugin_id).await? {
            let mut restored = config.clone();
            restored.merge(PluginConfigUpdate::from(saved));
            restored.enabled = false;
            match schema.validate(&restored.settings) {
                Ok(()) => {
                    tracing::info!(plugin_id = %plugin_id, "Restored persisted configuration");
                    config = restored;
                }
                Err(violations) => {
                    tracing::warn!(
                        plugin_id = %plugin_id,
                        violations = ?violations,
                        "Persisted configuration no longer validates, using defaults"
                    );
                }
            }
        }

        self.persistence.save(plugin_id, &config).await?;
        self.schemas.insert(plugin_id.to_string(), schema);
        self.configs.insert(plugin_id.to_string(), config.clone());
        Ok(config)
    }

    /// Register or replace the settings schema for a plugin.
    ///
    /// The stored configuration, if any, is left as is and is checked against
    /// the new schema on the next write.
    pub fn register_schema(&self, plugin_id: &str, schema: &Schema) -> PluginResult<()> {
        let compiled = schema
            .compile()
            .map_err(|e| PluginError::configuration(plugin_id, vec![e.to_string()]))?;
        self.schemas.insert(plugin_id.to_string(), compiled);
        Ok(())
    }

    /// Merge a partial configuration into a plugin's configuration.
    ///
    /// A plugin with a registered schema but no configuration yet starts from
    /// the schema defaults.
    ///
    /// # Errors
    /// - `NotFound` if the plugin has neither a configuration nor a schema
    /// - `ConfigurationError` listing every violated constraint
    pub async fn configure_plugin(
        &self,
        plugin_id: &str,
        update: PluginConfigUpdate,
    ) -> PluginResult<PluginConfig> {
        let _guard = self.write_lock.lock().await;

        let mut merged = match self.configs.get(plugin_id) {
            Some(config) => config.clone(),
            None => match self.schemas.get(plugin_id) {
                Some(schema) => PluginConfig {
                    settings: schema.schema().defaults(),
                    ..PluginConfig::default()
                },
                None => return Err(PluginError::not_found(plugin_id)),
            },
        };
        merged.merge(update);

        let mut violations = Vec::new();
        if let Some(schema) = self.schemas.get(plugin_id) {
            if let Err(found) = schema.validate(&merged.settings) {
                violations.extend(found);
            }
        }
        for (operation, limit) in &merged.rate_limits {
            if limit.validate().is_err() {
                violations.push(format!(
                    "rate_limits.{operation}: max_requests and window_ms must be positive"
                ));
            }
        }
        if !violations.is_empty() {
            tracing::debug!(plugin_id = %plugin_id, violations = ?violations, "Configuration rejected");
            return Err(PluginError::configuration(plugin_id, violations));
        }

        self.persistence
            .save(plugin_id, &merged)
            .await
            .map_err(|e| PluginError::configuration(plugin_id, vec![format!("persistence failed: {e}")]))?;
        self.configs.insert(plugin_id.to_string(), merged.clone());

        tracing::debug!(plugin_id = %plugin_id, "Plugin configured");
        Ok(merged)
    }

    /// Get a plugin's configuration.
    pub fn get_config(&self, plugin_id: &str) -> Option<PluginConfig> {
        self.configs.get(plugin_id).map(|config| config.clone())
    }

    /// Serialize a plugin's configuration to canonical JSON (sorted keys).
    pub fn export_config(&self, plugin_id: &str) -> PluginResult<String> {
        let config = self
            .get_config(plugin_id)
            .ok_or_else(|| PluginError::not_found(plugin_id))?;
        let canonical = serde_json::to_value(&config)?;
        Ok(serde_json::to_string_pretty(&canonical)?)
    }

    /// Parse an exported configuration and apply it through [`configure_plugin`](Self::configure_plugin).
    ///
    /// The exported `enabled` flag is ignored; it follows the plugin's state.
    pub async fn import_config(&self, plugin_id: &str, exported: &str) -> PluginResult<PluginConfig> {
        let config: PluginConfig = serde_json::from_str(exported).map_err(|e| {
            PluginError::configuration(plugin_id, vec![format!("invalid configuration document: {e}")])
        })?;
        let mut update = PluginConfigUpdate::from(config);
        update.enabled = None;
        self.configure_plugin(plugin_id, update).await
    }

    /// Set the enabled flag without touching anything else.
    ///
    /// Settings are not re-validated: a plugin may run while a required
    /// setting is still unset.
    pub async fn set_enabled(&self, plugin_id: &str, enabled: bool) -> PluginResult<PluginConfig> {
        let _guard = self.write_lock.lock().await;

        let mut config = self
            .get_config(plugin_id)
            .ok_or_else(|| PluginError::not_found(plugin_id))?;
        if config.enabled == enabled {
            return Ok(config);
        }
        config.enabled = enabled;

        self.persistence
            .save(plugin_id, &config)
            .await
            .map_err(|e| PluginError::configuration(plugin_id, vec![format!("persistence failed: {e}")]))?;
        self.configs.insert(plugin_id.to_string(), config.clone());
        Ok(config)
    }

    /// Forget a plugin's configuration and delete it from persistence.
    pub async fn remove(&self, plugin_id: &str) -> PluginResult<()> {
        let _guard = self.write_lock.lock().await;
        self.configs.remove(plugin_id);
        self.schemas.remove(plugin_id);
        self.persistence.remove(plugin_id).await
    }

    /// List plugin ids with persisted configurations.
    pub async fn persisted_plugins(&self) -> PluginResult<Vec<String>> {
        self.persistence.list().await
    }

    /// Number of plugins with a configuration.
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    /// Check whether no configurations are held.
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}
