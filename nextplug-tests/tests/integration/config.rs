//! Configuration integration tests
//!
//! Key-wise merging, schema enforcement, export/import, file persistence and
//! engine settings loaded from TOML.

use anyhow::Result;
use nextplug_core::config::{ConfigPersistence, EngineConfig, FileConfigPersistence};
use nextplug_tests::prelude::*;
use proptest::prelude::*;
use serde_json::Map;
use std::collections::BTreeMap;
use tempfile::TempDir;

fn settings(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Successive updates merge key by key
#[tokio::test]
async fn test_config_merge_is_keywise() -> Result<()> {
    let ctx = TestContext::new()?;
    let (plugin, counts) = CountingPlugin::new();
    ctx.manager
        .install_plugin(CountingPlugin::metadata("merge"), plugin)
        .await?;

    ctx.manager
        .configure("merge", PluginConfigUpdate::new().with_setting("a", json!(1)))
        .await?;
    let config = ctx
        .manager
        .configure("merge", PluginConfigUpdate::new().with_setting("b", json!(2)))
        .await?;

    assert_eq!(Value::Object(config.settings), json!({ "a": 1, "b": 2 }));
    assert_eq!(counts.configured(), 2);

    // Overlapping keys take the newer value
    let config = ctx
        .manager
        .configure("merge", PluginConfigUpdate::new().with_settings(settings(json!({ "b": 3, "c": 4 }))))
        .await?;
    assert_eq!(Value::Object(config.settings), json!({ "a": 1, "b": 3, "c": 4 }));

    ctx.teardown().await
}

/// Schema violations are all reported and nothing is stored
#[tokio::test]
async fn test_schema_enforced() -> Result<()> {
    let ctx = TestContext::new()?;
    let mut events = ctx.manager.subscribe_lifecycle();
    ctx.manager
        .install_plugin(plugin_metadata("svc").with_config_schema(api_key_schema()), echo_plugin("svc"))
        .await?;

    // Defaults come from the schema
    let initial = ctx.manager.get_config("svc").expect("registered config");
    assert_eq!(initial.settings.get("retries"), Some(&json!(3)));

    let err = ctx
        .manager
        .configure(
            "svc",
            PluginConfigUpdate::new()
                .with_setting("apiKey", json!(42))
                .with_setting("retries", json!(99)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConfigurationError);
    assert!(err.to_string().contains("apiKey"));
    assert!(err.to_string().contains("retries"));
    assert_eq!(ctx.manager.get_config("svc"), Some(initial));

    ctx.manager
        .configure("svc", PluginConfigUpdate::new().with_setting("apiKey", json!("k-123")))
        .await?;

    let mut configured = false;
    while let Ok(event) = events.try_recv() {
        configured |= matches!(event, LifecycleEvent::Configured { ref plugin_id } if plugin_id == "svc");
    }
    assert!(configured);

    ctx.teardown().await
}

/// Rate limits must be positive
#[tokio::test]
async fn test_invalid_rate_limit_rejected() -> Result<()> {
    let ctx = TestContext::new()?;
    ctx.manager.install_plugin(echo_metadata("echo"), echo_plugin("echo")).await?;

    let err = ctx
        .manager
        .configure(
            "echo",
            PluginConfigUpdate::new().with_rate_limit("tool:echo", RateLimit::new(0, Duration::from_secs(1))),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConfigurationError);
    assert!(err.to_string().contains("rate_limits.tool:echo"));

    let err = ctx
        .manager
        .configure("ghost", PluginConfigUpdate::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);

    ctx.teardown().await
}

/// Export then import onto another plugin carries every field but the
/// enabled flag
#[tokio::test]
async fn test_export_import() -> Result<()> {
    let ctx = TestContext::new()?;
    ctx.install_active(plugin_metadata("source"), echo_plugin("source")).await?;
    let target = ctx.manager.install_plugin(plugin_metadata("target"), echo_plugin("target")).await?;

    ctx.manager
        .configure(
            "source",
            PluginConfigUpdate::new()
                .with_setting("theme", json!("dark"))
                .with_permission("tool:extra")
                .with_rate_limit("tool:extra", RateLimit::new(5, Duration::from_secs(1))),
        )
        .await?;

    let exported = ctx.manager.export_config("source")?;
    let parsed: Value = serde_json::from_str(&exported)?;
    assert_eq!(parsed["settings"]["theme"], "dark");

    let imported = ctx.manager.import_config("target", &exported).await?;
    assert_eq!(imported.settings.get("theme"), Some(&json!("dark")));
    assert!(imported.permissions.contains(&"tool:extra".to_string()));
    assert_eq!(imported.rate_limits.get("tool:extra"), Some(&RateLimit::new(5, Duration::from_secs(1))));
    assert!(ctx.manager.context().security.has_permission("target", "tool:extra"));

    // The source was running; the target was not and still is not
    assert!(parsed["enabled"].as_bool().unwrap_or(false));
    assert!(!imported.enabled);
    assert_eq!(target.state(), PluginState::Installed);

    let err = ctx.manager.import_config("target", "{ not json").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConfigurationError);

    ctx.teardown().await
}

/// File persistence survives an engine restart
#[tokio::test]
async fn test_file_persistence_roundtrip() -> Result<()> {
    let dir = TempDir::new()?;
    let persistence = Arc::new(FileConfigPersistence::new(dir.path().join("plugins")));

    {
        let context = EngineContext::with_persistence(EngineConfig::testing(), persistence.clone())?;
        let manager = PluginManager::new(context);
        manager.install_plugin(plugin_metadata("keeper"), echo_plugin("keeper")).await?;
        manager.enable("keeper").await?;
        manager
            .configure("keeper", PluginConfigUpdate::new().with_setting("volume", json!(7)))
            .await?;
        manager.shutdown().await?;
    }

    assert_eq!(persistence.list().await?, vec!["keeper".to_string()]);
    assert!(dir.path().join("plugins").join("keeper.json").exists());

    let context = EngineContext::with_persistence(EngineConfig::testing(), persistence.clone())?;
    let manager = PluginManager::new(context);
    let restored = {
        manager.install_plugin(plugin_metadata("keeper"), echo_plugin("keeper")).await?;
        manager.get_config("keeper").expect("restored config")
    };
    assert_eq!(restored.settings.get("volume"), Some(&json!(7)));
    assert!(!restored.enabled);

    manager.uninstall("keeper").await?;
    assert!(persistence.list().await?.is_empty());
    assert!(persistence.load("keeper").await?.is_none());

    // Ids that cannot be file names are refused
    let err = persistence.save("../escape", &PluginConfig::default()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConfigurationError);
    Ok(())
}

/// Engine settings load from TOML over the defaults
#[test]
fn test_engine_config_from_file() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("nextplug.toml");
    std::fs::write(
        &path,
        r#"
host_version = "4.2.0"

[execution]
default_timeout_ms = 2500

[monitor.thresholds]
max_response_time_ms = 250.0

[dependency]
block_on_warnings = true
block_on_cycles = true
"#,
    )?;

    let config = EngineConfig::load(&path)?;
    assert_eq!(config.host_version, "4.2.0");
    assert_eq!(config.default_timeout(), Duration::from_millis(2500));
    assert_eq!(config.monitor.thresholds.max_response_time_ms, 250.0);
    assert_eq!(config.monitor.thresholds.min_success_rate, 95.0);
    assert!(config.dependency.block_on_warnings);
    assert_eq!(config.bus.queue_capacity, 10_000);

    let reparsed = EngineConfig::from_toml_str(&config.to_toml_string()?)?;
    assert_eq!(reparsed, config);
    Ok(())
}

/// Invalid settings are refused with every violation listed
#[test]
fn test_engine_config_validation() {
    let err = EngineConfig::from_toml_str("[bus]\ntick_interval_ms = 0\n").unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConfigurationError);
    assert!(err.to_string().contains("tick_interval_ms"));

    let config = EngineConfig::layered(
        None,
        vec![
            ("BUS_TICK_INTERVAL_MS".to_string(), "9".to_string()),
            ("LOGGING_JSON".to_string(), "true".to_string()),
            ("NOT_A_SETTING".to_string(), "1".to_string()),
        ],
    )
    .unwrap();
    assert_eq!(config.bus.tick_interval_ms, 9);
    assert!(config.logging.json);

    assert!(EngineConfig::load("/definitely/not/here.toml").is_err());
}

proptest! {
    #[test]
    fn prop_settings_merge_is_keywise_union(
        first in prop::collection::btree_map("[a-e]", 0i64..100, 0..5),
        second in prop::collection::btree_map("[a-e]", 0i64..100, 0..5),
    ) {
        let to_map = |entries: &BTreeMap<String, i64>| -> Map<String, Value> {
            entries.iter().map(|(k, v)| (k.clone(), json!(v))).collect()
        };

        let mut config = PluginConfig::default();
        config.merge(PluginConfigUpdate::new().with_settings(to_map(&first)));
        config.merge(PluginConfigUpdate::new().with_settings(to_map(&second)));

        let mut expected = first.clone();
        expected.extend(second.clone());
        prop_assert_eq!(config.settings, to_map(&expected));
    }
}
