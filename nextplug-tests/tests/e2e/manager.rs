//! Plugin manager end-to-end tests
//!
//! Drives the manager the way a host would: plugins resolved from a source,
//! upgraded in place, monitored for threshold breaches and finally removed.

use anyhow::Result;
use nextplug_tests::prelude::*;
use tokio::time::timeout;
use tracing::info;

fn versioned_echo(plugin_id: &str, version: &str) -> LoadedPlugin {
    let mut metadata = echo_metadata(plugin_id);
    metadata.version = version.to_string();
    LoadedPlugin::new(metadata, echo_plugin(plugin_id))
}

fn registry() -> Arc<StaticPluginSource> {
    let source = StaticPluginSource::new();
    source.register("registry://echo@1", || versioned_echo("echo", "1.0.0"));
    source.register("registry://echo@2", || versioned_echo("echo", "2.0.0"));
    Arc::new(source)
}

async fn started_manager(config: EngineConfig) -> Result<PluginManager> {
    tracing_subscriber::fmt()
        .with_env_filter(config.logging.level.as_str())
        .with_test_writer()
        .try_init()
        .ok();

    let manager = PluginManager::new(EngineContext::new(config)?).with_source(registry());
    manager.initialize().await?;
    Ok(manager)
}

/// Install from a source, upgrade, restart and remove
#[tokio::test]
async fn test_source_install_and_update() -> Result<()> {
    let manager = started_manager(EngineConfig::testing()).await?;

    let instance = manager.install("echo", "registry://echo@1").await?;
    manager.enable("echo").await?;
    assert_eq!(instance.state(), PluginState::Active);

    let output = manager.execute_tool("echo", "echo", json!({ "v": 1 })).await?;
    assert_eq!(output, json!({ "v": 1 }));

    // Source lookups that cannot produce the requested plugin
    let err = manager.install("other", "registry://echo@1").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InstallationError);
    let err = manager.install("echo", "registry://missing").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InstallationError);

    let updated = manager.update("echo", "registry://echo@2").await?;
    assert_eq!(updated.metadata().version, "2.0.0");
    assert_eq!(updated.state(), PluginState::Active);
    let output = manager.execute_tool("echo", "echo", json!({ "v": 2 })).await?;
    assert_eq!(output, json!({ "v": 2 }));

    let summaries = manager.list_plugins();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].id, "echo");
    assert_eq!(summaries[0].version, "2.0.0");
    assert_eq!(summaries[0].state, PluginState::Active);

    manager.restart("echo").await?;
    assert_eq!(manager.get_plugin("echo").map(|p| p.state()), Some(PluginState::Active));

    let health = manager.health_check("echo").await?;
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.details.get("state").map(String::as_str), Some("active"));

    manager.uninstall("echo").await?;
    assert!(manager.get_plugin("echo").is_none());
    let err = manager.health_check("echo").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);

    let stats = manager.stats();
    assert_eq!(stats.lifecycle.installs, 1);
    assert_eq!(stats.lifecycle.uninstalls, 1);
    assert_eq!(stats.lifecycle.restarts, 1);
    assert_eq!(stats.lifecycle.plugins, 0);
    assert_eq!(stats.execution.successes, 2);
    assert_eq!(stats.monitored, 0);

    manager.shutdown().await?;
    info!("Source install and update flow passed");
    Ok(())
}

/// Threshold breaches surface as alerts and in reports
#[tokio::test]
async fn test_performance_alerts() -> Result<()> {
    let mut config = EngineConfig::testing();
    config.monitor.thresholds.max_response_time_ms = 5.0;
    config.monitor.thresholds.max_memory_bytes = 1024;
    let manager = started_manager(config).await?;
    let mut monitor_events = manager.subscribe_monitor();

    manager.install_plugin(echo_metadata("sluggish"), echo_plugin("sluggish")).await?;
    manager.enable("sluggish").await?;
    let heavy = ModulePlugin::builder("heavy")
        .tool("load", |input, _ctx| async move { Ok(input) })
        .memory_usage(64 * 1024)
        .build();
    manager
        .install_plugin(
            plugin_metadata("heavy").with_tool(OperationSpec::new("load", "Load data")),
            Arc::new(heavy),
        )
        .await?;
    manager.enable("heavy").await?;

    manager.execute_tool("sluggish", "slow", json!({ "ms": 30 })).await?;
    manager.execute_tool("heavy", "load", json!({})).await?;

    let mut kinds = Vec::new();
    timeout(Duration::from_secs(2), async {
        while kinds.len() < 2 {
            if let Ok(MonitorEvent::Alert(alert)) = monitor_events.recv().await {
                if !kinds.contains(&(alert.plugin_id.clone(), alert.kind)) {
                    kinds.push((alert.plugin_id.clone(), alert.kind));
                }
            }
        }
    })
    .await?;
    assert!(kinds.contains(&("sluggish".to_string(), AlertKind::ResponseTime)));
    assert!(kinds.contains(&("heavy".to_string(), AlertKind::Memory)));

    let report = manager.performance_report(Some("sluggish"))?;
    assert_eq!(report.plugin_id, "sluggish");
    assert!(report.metrics.avg_response_time_ms >= 30.0);
    assert!(report.alerts.iter().all(|alert| alert.plugin_id == "sluggish"));
    assert!(!report.alerts.is_empty());
    assert!(report.recommendations[0].contains("response time"));

    let aggregate = manager.performance_report(None)?;
    assert_eq!(aggregate.plugin_id, "all");
    assert_eq!(aggregate.plugins, 2);
    assert_eq!(aggregate.metrics.total_requests, 2);

    let err = manager.performance_report(Some("ghost")).unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);

    manager.shutdown().await?;
    Ok(())
}

/// Shutdown disables every running plugin and stops the bus
#[tokio::test]
async fn test_shutdown_disables_everything() -> Result<()> {
    let manager = started_manager(EngineConfig::testing()).await?;
    let mut lifecycle = manager.subscribe_lifecycle();

    for id in ["alpha", "beta"] {
        let (plugin, _counts) = CountingPlugin::new();
        let mut metadata = CountingPlugin::metadata(id);
        metadata.capabilities.tools.clear();
        manager.install_plugin(metadata, plugin).await?;
        manager.enable(id).await?;
    }
    let (idle, idle_counts) = CountingPlugin::new();
    let mut metadata = CountingPlugin::metadata("idle");
    metadata.capabilities.tools.clear();
    manager.install_plugin(metadata, idle).await?;

    manager.shutdown().await?;

    let mut disabled = Vec::new();
    while let Ok(event) = lifecycle.try_recv() {
        if let LifecycleEvent::Disabled { plugin_id } = event {
            disabled.push(plugin_id);
        }
    }
    disabled.sort();
    assert_eq!(disabled, vec!["alpha".to_string(), "beta".to_string()]);

    for summary in manager.list_plugins() {
        assert!(!summary.state.is_running(), "{} still running", summary.id);
    }
    assert_eq!(idle_counts.disabled(), 0);
    assert_eq!(manager.stats().bus.endpoints, 0);

    // A second shutdown has nothing left to do
    manager.shutdown().await?;
    Ok(())
}
