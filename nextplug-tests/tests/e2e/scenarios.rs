//! End-to-end scenarios
//!
//! Complete host flows against a started engine: configuration through a
//! schema, installability of a plugin with a missing dependency, a successful
//! tool call with its metrics, and a tool call cut off by its timeout.

use anyhow::Result;
use nextplug_tests::prelude::*;
use std::time::Instant;
use tracing::info;

/// Settings are checked against the plugin's schema
#[tokio::test]
async fn test_scenario_schema_configuration() -> Result<()> {
    let ctx = TestContext::started().await?;
    ctx.manager
        .install_plugin(
            plugin_metadata("keyed").with_config_schema(api_key_schema()),
            echo_plugin("keyed"),
        )
        .await?;

    // Nothing supplies apiKey yet
    let err = ctx
        .manager
        .configure("keyed", PluginConfigUpdate::new().with_settings(Default::default()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConfigurationError);
    assert!(err.to_string().contains("apiKey: required field is missing"));

    let config = ctx
        .manager
        .configure("keyed", PluginConfigUpdate::new().with_setting("apiKey", json!("x")))
        .await?;
    assert_eq!(config.settings.get("apiKey"), Some(&json!("x")));
    assert_eq!(config.settings.get("retries"), Some(&json!(3)));

    // Later partial updates keep the stored key
    ctx.manager
        .configure("keyed", PluginConfigUpdate::new().with_settings(Default::default()))
        .await?;

    info!("Schema configuration scenario passed");
    ctx.teardown().await
}

/// A plugin with an unavailable dependency cannot be installed
#[tokio::test]
async fn test_scenario_missing_dependency() -> Result<()> {
    let ctx = TestContext::started().await?;
    let metadata = plugin_metadata("P").with_dependency("Q", "1.0.0");

    let check = ctx.manager.can_install(&metadata);
    assert!(!check.can_install);
    assert_eq!(check.reason, Some(BlockReason::DependenciesNotSatisfied));
    assert_eq!(check.missing_dependencies, vec!["Q@1.0.0".to_string()]);

    let err = ctx.manager.install_plugin(metadata, echo_plugin("P")).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::DependencyError);
    assert!(ctx.manager.list_plugins().is_empty());

    info!("Missing dependency scenario passed");
    ctx.teardown().await
}

/// A quick tool call returns its output and is measured
#[tokio::test]
async fn test_scenario_tool_call() -> Result<()> {
    let mut config = EngineConfig::testing();
    config.execution.default_timeout_ms = 30_000;
    let ctx = TestContext::started_with(config).await?;
    let instance = ctx.install_active(echo_metadata("P"), echo_plugin("P")).await?;

    let output = ctx.manager.execute_tool("P", "echo", json!({ "msg": "hi" })).await?;
    assert_eq!(output, json!({ "msg": "hi" }));

    let metrics = instance.performance();
    assert_eq!(metrics.total_requests, 1);
    assert_eq!(metrics.failed_requests, 0);
    assert_eq!(metrics.success_rate, 100.0);
    assert_eq!(instance.usage_count(), 1);

    let report = ctx.manager.performance_report(Some("P"))?;
    assert_eq!(report.metrics.total_requests, 1);
    assert!(report.alerts.is_empty());

    info!("Tool call scenario passed");
    ctx.teardown().await
}

/// A slow handler is cut off at the operation timeout
#[tokio::test]
async fn test_scenario_tool_timeout() -> Result<()> {
    let ctx = TestContext::started().await?;
    let instance = ctx.install_active(echo_metadata("P"), echo_plugin("P")).await?;
    assert_eq!(
        instance.metadata().tool("slow").and_then(|spec| spec.timeout_ms),
        Some(1_000)
    );

    let start = Instant::now();
    let err = ctx.manager.execute_tool("P", "slow", json!({})).await.unwrap_err();
    let elapsed = start.elapsed();

    assert_eq!(err.code(), ErrorCode::Timeout);
    assert!(elapsed >= Duration::from_millis(1_000));
    assert!(elapsed < Duration::from_millis(5_000), "took {elapsed:?}");

    let metrics = instance.performance();
    assert_eq!(metrics.total_requests, 1);
    assert_eq!(metrics.failed_requests, 1);
    assert_eq!(ctx.manager.stats().execution.timeouts, 1);

    // The plugin keeps serving after a timeout
    let output = ctx.manager.execute_tool("P", "echo", json!({ "after": true })).await?;
    assert_eq!(output, json!({ "after": true }));

    info!(elapsed_ms = elapsed.as_millis() as u64, "Timeout scenario passed");
    ctx.teardown().await
}
