//! Lifecycle integration tests
//!
//! Drives plugins through install, enable, disable, restart and uninstall via
//! the manager and checks both the state machine and the plugin callbacks.

use anyhow::Result;
use nextplug_tests::prelude::*;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::info;

/// Enabling an active plugin is a no-op
#[tokio::test]
async fn test_enable_is_idempotent() -> Result<()> {
    let ctx = TestContext::new()?;
    let (plugin, counts) = CountingPlugin::new();
    let instance = ctx.install_active(CountingPlugin::metadata("counter"), plugin).await?;

    assert_eq!(instance.state(), PluginState::Active);
    assert_eq!(counts.initialized(), 1);
    assert_eq!(counts.enabled(), 1);

    let usage_before = instance.usage_count();
    let errors_before = instance.error_count();
    let mut events = ctx.manager.subscribe_lifecycle();

    ctx.manager.enable("counter").await?;
    ctx.manager.enable("counter").await?;

    assert_eq!(instance.state(), PluginState::Active);
    assert_eq!(counts.enabled(), 1);
    assert_eq!(instance.usage_count(), usage_before);
    assert_eq!(instance.error_count(), errors_before);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

    ctx.teardown().await
}

/// Disabling twice only calls the plugin once
#[tokio::test]
async fn test_disable_is_idempotent() -> Result<()> {
    let ctx = TestContext::new()?;
    let (plugin, counts) = CountingPlugin::new();
    let instance = ctx.install_active(CountingPlugin::metadata("counter"), plugin).await?;

    ctx.manager.disable("counter").await?;
    ctx.manager.disable("counter").await?;

    assert_eq!(instance.state(), PluginState::Disabled);
    assert_eq!(counts.disabled(), 1);
    assert!(!ctx.manager.get_config("counter").map(|c| c.enabled).unwrap_or(true));

    ctx.teardown().await
}

/// Re-enabling skips initialize
#[tokio::test]
async fn test_reenable_skips_initialize() -> Result<()> {
    let ctx = TestContext::new()?;
    let (plugin, counts) = CountingPlugin::new();
    let instance = ctx.install_active(CountingPlugin::metadata("counter"), plugin).await?;

    ctx.manager.disable("counter").await?;
    ctx.manager.enable("counter").await?;

    assert_eq!(instance.state(), PluginState::Active);
    assert_eq!(counts.initialized(), 1);
    assert_eq!(counts.enabled(), 2);
    assert!(ctx.manager.get_config("counter").map(|c| c.enabled).unwrap_or(false));

    ctx.teardown().await
}

/// State transitions are published in order
#[tokio::test]
async fn test_state_change_events() -> Result<()> {
    let ctx = TestContext::new()?;
    let mut events = ctx.manager.subscribe_lifecycle();

    ctx.install_active(echo_metadata("echo"), echo_plugin("echo")).await?;

    let mut transitions = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let LifecycleEvent::StateChanged { to, .. } = event {
            transitions.push(to);
        }
    }
    info!("Observed transitions: {:?}", transitions);

    assert_eq!(
        transitions,
        vec![
            PluginState::Installed,
            PluginState::Loading,
            PluginState::Initializing,
            PluginState::Active,
        ]
    );

    ctx.teardown().await
}

/// Restart cycles a running plugin through disable and enable
#[tokio::test]
async fn test_restart_running_plugin() -> Result<()> {
    let ctx = TestContext::new()?;
    let (plugin, counts) = CountingPlugin::new();
    let instance = ctx.install_active(CountingPlugin::metadata("counter"), plugin).await?;

    ctx.manager.restart("counter").await?;

    assert_eq!(instance.state(), PluginState::Active);
    assert_eq!(counts.disabled(), 1);
    assert_eq!(counts.enabled(), 2);
    assert_eq!(ctx.manager.stats().lifecycle.restarts, 1);

    let result = ctx.manager.execute_tool("counter", "echo", json!({ "n": 1 })).await?;
    assert_eq!(result, json!({ "n": 1 }));

    ctx.teardown().await
}

/// A failing enable parks the plugin in error until restarted
#[tokio::test]
async fn test_enable_failure_and_recovery() -> Result<()> {
    let ctx = TestContext::new()?;
    let (plugin, counts) = CountingPlugin::failing_enable();
    let instance = ctx
        .manager
        .install_plugin(CountingPlugin::metadata("flaky"), Arc::clone(&plugin) as Arc<dyn Plugin>)
        .await?;

    let err = ctx.manager.enable("flaky").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::EnableError);
    assert!(err.to_string().contains("fixture refuses to start"));
    assert_eq!(instance.state(), PluginState::Error);
    assert_eq!(instance.error_count(), 1);
    assert!(instance.last_error().is_some());

    // Error only leaves through restart
    let err = ctx.manager.enable("flaky").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidStateTransition);

    let err = ctx.manager.execute_tool("flaky", "echo", json!({})).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotActive);

    plugin.heal();
    ctx.manager.restart("flaky").await?;

    assert_eq!(instance.state(), PluginState::Active);
    assert!(instance.last_error().is_none());
    assert_eq!(counts.initialized(), 1);
    assert_eq!(counts.enabled(), 2);

    ctx.teardown().await
}

/// Health reflects the lifecycle state
#[tokio::test]
async fn test_health_check() -> Result<()> {
    let ctx = TestContext::new()?;
    let plugin = ModulePlugin::builder("checked")
        .tool("echo", |input, _ctx| async move { Ok(input) })
        .health(|| PluginHealth::with_status(HealthStatus::Degraded, "cache cold"))
        .build();
    ctx.manager
        .install_plugin(plugin_metadata("checked").with_tool(OperationSpec::new("echo", "Echo")), Arc::new(plugin))
        .await?;

    let health = ctx.manager.health_check("checked").await?;
    assert_eq!(health.status, HealthStatus::Unhealthy);
    assert_eq!(health.details.get("state").map(String::as_str), Some("installed"));

    ctx.manager.enable("checked").await?;
    let health = ctx.manager.health_check("checked").await?;
    assert_eq!(health.status, HealthStatus::Degraded);
    assert_eq!(health.details.get("state").map(String::as_str), Some("active"));

    let err = ctx.manager.health_check("missing").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);

    ctx.teardown().await
}

/// Uninstall disables, destroys and forgets the plugin
#[tokio::test]
async fn test_uninstall_tears_down() -> Result<()> {
    let ctx = TestContext::new()?;
    let (plugin, counts) = CountingPlugin::new();
    ctx.install_active(CountingPlugin::metadata("counter"), plugin).await?;
    ctx.manager.subscribe("counter", "news")?;

    ctx.manager.uninstall("counter").await?;

    assert_eq!(counts.disabled(), 1);
    assert_eq!(counts.destroyed(), 1);
    assert!(ctx.manager.get_plugin("counter").is_none());
    assert!(ctx.manager.get_config("counter").is_none());
    assert!(!ctx.manager.context().bus.has_endpoint("counter"));
    assert!(ctx.manager.context().bus.subscriptions_of("counter").is_empty());
    assert!(!ctx.manager.context().dependencies.contains("counter"));

    let err = ctx.manager.uninstall("counter").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);

    ctx.teardown().await
}

/// Duplicate ids are refused
#[tokio::test]
async fn test_duplicate_install_rejected() -> Result<()> {
    let ctx = TestContext::new()?;
    ctx.manager.install_plugin(echo_metadata("echo"), echo_plugin("echo")).await?;

    let err = ctx
        .manager
        .install_plugin(echo_metadata("echo"), echo_plugin("echo"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyExists);
    assert_eq!(ctx.manager.list_plugins().len(), 1);

    ctx.teardown().await
}

/// Descriptors failing security validation never reach the registry
#[tokio::test]
async fn test_invalid_metadata_rejected() -> Result<()> {
    let ctx = TestContext::new()?;

    let unlicensed = plugin_metadata("shady").with_license("WTFPL-unknown");
    let err = ctx.manager.install_plugin(unlicensed, echo_plugin("shady")).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidLicense);

    let bad_version = PluginMetadata::new("odd", "odd", "one.two")
        .with_author("NextPlug Tests")
        .with_license("MIT");
    let err = ctx.manager.install_plugin(bad_version, echo_plugin("odd")).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidVersion);

    assert!(ctx.manager.list_plugins().is_empty());
    assert_eq!(ctx.manager.stats().security.rejected, 2);

    ctx.teardown().await
}

/// Enabling does not depend on the settings satisfying the schema
#[tokio::test]
async fn test_enable_with_incomplete_settings() -> Result<()> {
    let ctx = TestContext::new()?;
    let instance = ctx
        .manager
        .install_plugin(echo_metadata("keyed").with_config_schema(api_key_schema()), echo_plugin("keyed"))
        .await?;

    // apiKey is required but was never supplied
    ctx.manager.enable("keyed").await?;
    assert_eq!(instance.state(), PluginState::Active);
    assert!(ctx.manager.get_config("keyed").map(|c| c.enabled).unwrap_or(false));
    assert_eq!(ctx.manager.stats().bus.endpoints, 1);

    let output = ctx.manager.execute_tool("keyed", "echo", json!({ "k": 1 })).await?;
    assert_eq!(output, json!({ "k": 1 }));

    ctx.manager.disable("keyed").await?;
    assert_eq!(instance.state(), PluginState::Disabled);
    assert!(!ctx.manager.get_config("keyed").map(|c| c.enabled).unwrap_or(true));
    assert_eq!(ctx.manager.stats().bus.endpoints, 0);

    ctx.teardown().await
}
