//! Hook pipeline integration tests
//!
//! Hooks contributed by enabled plugins run as one prioritized chain per
//! event; failures either continue the chain or abort it.

use anyhow::Result;
use nextplug_tests::prelude::*;

/// Higher priority runs first and feeds the next hook
#[tokio::test]
async fn test_hook_priority_ordering() -> Result<()> {
    let ctx = TestContext::new()?;
    let (low_meta, low) = tracing_hook_plugin("low", "order:placed", 5, "h2");
    let (high_meta, high) = tracing_hook_plugin("high", "order:placed", 10, "h1");

    // Registration order must not matter
    ctx.install_active(low_meta, low).await?;
    ctx.install_active(high_meta, high).await?;

    let result = ctx.manager.emit_event("order:placed", json!({ "order": 42 })).await?;
    assert_eq!(result, json!({ "order": 42, "trace": ["h1", "h2"] }));

    // Unknown events pass the data through
    let untouched = ctx.manager.emit_event("order:cancelled", json!({ "order": 42 })).await?;
    assert_eq!(untouched, json!({ "order": 42 }));

    ctx.teardown().await
}

/// Hooks follow their plugin's lifecycle
#[tokio::test]
async fn test_hooks_follow_lifecycle() -> Result<()> {
    let ctx = TestContext::new()?;
    let (meta, plugin) = tracing_hook_plugin("audit", "user:login", 0, "audit");
    ctx.manager.install_plugin(meta, plugin).await?;

    // Installed but not enabled: nothing registered
    let result = ctx.manager.emit_event("user:login", json!({})).await?;
    assert_eq!(result, json!({}));

    ctx.manager.enable("audit").await?;
    assert_eq!(ctx.manager.stats().hooks, 1);
    let result = ctx.manager.emit_event("user:login", json!({})).await?;
    assert_eq!(result, json!({ "trace": ["audit"] }));

    ctx.manager.disable("audit").await?;
    assert_eq!(ctx.manager.stats().hooks, 0);
    let result = ctx.manager.emit_event("user:login", json!({})).await?;
    assert_eq!(result, json!({}));

    ctx.teardown().await
}

/// A non-critical failure is skipped, a critical one aborts the chain
#[tokio::test]
async fn test_hook_failures() -> Result<()> {
    let ctx = TestContext::new()?;
    let (first_meta, first) = tracing_hook_plugin("first", "sync", 10, "first");
    let (broken_meta, broken) = failing_hook_plugin("broken", "sync", 5, false);
    let (last_meta, last) = tracing_hook_plugin("last", "sync", 1, "last");
    ctx.install_active(first_meta, first).await?;
    ctx.install_active(broken_meta, broken).await?;
    ctx.install_active(last_meta, last).await?;
    let mut pipeline_events = ctx.manager.subscribe_pipeline();

    let result = ctx.manager.emit_event("sync", json!({})).await?;
    assert_eq!(result, json!({ "trace": ["first", "last"] }));

    match pipeline_events.recv().await? {
        PipelineEvent::HookFailed { key, event, .. } => {
            assert_eq!(key, "broken:broken-hook");
            assert_eq!(event, "sync");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    ctx.manager.uninstall("broken").await?;
    let (critical_meta, critical) = failing_hook_plugin("guard", "sync", 5, true);
    ctx.install_active(critical_meta, critical).await?;

    let err = ctx.manager.emit_event("sync", json!({})).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::HookError);
    assert!(err.to_string().contains("guard"));

    ctx.teardown().await
}

/// A once-hook runs a single time
#[tokio::test]
async fn test_once_hook() -> Result<()> {
    let ctx = TestContext::new()?;
    let spec = HookSpec::new("welcome", "app:ready", 0).once();
    let plugin = ModulePlugin::builder("greeter")
        .hook(spec.clone(), |mut data: Value| async move {
            data["welcomed"] = json!(true);
            Ok(data)
        })
        .build();
    ctx.install_active(plugin_metadata("greeter").with_hook(spec), Arc::new(plugin))
        .await?;

    let first = ctx.manager.emit_event("app:ready", json!({})).await?;
    assert_eq!(first, json!({ "welcomed": true }));
    let second = ctx.manager.emit_event("app:ready", json!({})).await?;
    assert_eq!(second, json!({}));

    let stats = ctx.manager.context().pipeline.statistics();
    let entry = stats.get("greeter:welcome").expect("stats for once-hook");
    assert_eq!(entry.count, 1);
    assert_eq!(entry.successes, 1);

    ctx.teardown().await
}

/// Configuration toggles hooks on a running plugin
#[tokio::test]
async fn test_hook_toggle() -> Result<()> {
    let ctx = TestContext::new()?;
    let (meta, plugin) = tracing_hook_plugin("tagger", "doc:saved", 0, "tag");
    ctx.install_active(meta, plugin).await?;

    ctx.manager
        .configure("tagger", PluginConfigUpdate::new().with_hook("tag-hook", false))
        .await?;
    let result = ctx.manager.emit_event("doc:saved", json!({})).await?;
    assert_eq!(result, json!({}));

    ctx.manager
        .configure("tagger", PluginConfigUpdate::new().with_hook("tag-hook", true))
        .await?;
    let result = ctx.manager.emit_event("doc:saved", json!({})).await?;
    assert_eq!(result, json!({ "trace": ["tag"] }));

    ctx.teardown().await
}

/// Execution results are announced through the `tool:executed` hook
#[tokio::test]
async fn test_tool_executed_hook() -> Result<()> {
    let ctx = TestContext::new()?;
    let seen = Arc::new(std::sync::Mutex::new(Vec::<Value>::new()));
    let sink = Arc::clone(&seen);
    let spec = HookSpec::new("observe", "tool:executed", 0);
    let observer = ModulePlugin::builder("observer")
        .hook(spec.clone(), move |data: Value| {
            sink.lock().unwrap().push(data.clone());
            async move { Ok(data) }
        })
        .build();
    ctx.install_active(plugin_metadata("observer").with_hook(spec), Arc::new(observer))
        .await?;
    ctx.install_active(echo_metadata("echo"), echo_plugin("echo")).await?;

    ctx.manager.execute_tool("echo", "echo", json!({ "msg": "hi" })).await?;
    let _ = ctx.manager.execute_tool("echo", "fail", json!({})).await;

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0]["plugin_id"], "echo");
    assert_eq!(seen[0]["name"], "echo");
    assert_eq!(seen[0]["success"], true);
    assert_eq!(seen[0]["result"], json!({ "msg": "hi" }));
    assert_eq!(seen[1]["success"], false);
    assert!(seen[1]["error"].as_str().unwrap_or_default().contains("fixture failure"));

    ctx.teardown().await
}
