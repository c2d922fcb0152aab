//! Execution engine integration tests
//!
//! Covers rate limiting, input contracts, permissions, middleware, timeouts
//! and resource reads as seen through the manager.

use anyhow::Result;
use nextplug_core::config::EngineConfig;
use nextplug_core::execution::RateLimiter;
use nextplug_tests::prelude::*;
use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::time::{sleep, Instant};

/// N calls fit the window, the next one is refused, and the window slides
#[tokio::test]
async fn test_rate_limit_window() -> Result<()> {
    let ctx = TestContext::new()?;
    ctx.install_active(echo_metadata("echo"), echo_plugin("echo")).await?;
    ctx.manager
        .configure(
            "echo",
            PluginConfigUpdate::new().with_rate_limit("tool:echo", RateLimit::new(3, Duration::from_millis(200))),
        )
        .await?;

    for i in 0..3 {
        let result = ctx.manager.execute_tool("echo", "echo", json!({ "i": i })).await?;
        assert_eq!(result, json!({ "i": i }));
    }

    let err = ctx.manager.execute_tool("echo", "echo", json!({})).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::RateLimitExceeded);
    assert_eq!(ctx.manager.stats().execution.rate_limited, 1);

    // Other operations have their own budget
    ctx.manager.execute_action("echo", "reset", json!({})).await?;

    sleep(Duration::from_millis(250)).await;
    ctx.manager.execute_tool("echo", "echo", json!({ "again": true })).await?;

    ctx.teardown().await
}

/// Rate-limited calls never reach the handler or the metrics
#[tokio::test]
async fn test_rate_limited_calls_are_not_measured() -> Result<()> {
    let ctx = TestContext::new()?;
    let instance = ctx.install_active(echo_metadata("echo"), echo_plugin("echo")).await?;
    ctx.manager
        .configure(
            "echo",
            PluginConfigUpdate::new().with_rate_limit("tool:echo", RateLimit::new(1, Duration::from_secs(60))),
        )
        .await?;

    ctx.manager.execute_tool("echo", "echo", json!({})).await?;
    assert!(ctx.manager.execute_tool("echo", "echo", json!({})).await.is_err());

    assert_eq!(instance.performance().total_requests, 1);
    assert_eq!(instance.error_count(), 0);

    ctx.teardown().await
}

/// The engine-wide default limit applies when none is configured
#[tokio::test]
async fn test_default_rate_limit() -> Result<()> {
    let mut config = EngineConfig::testing();
    config.execution.default_rate_limit = Some(RateLimit::new(2, Duration::from_secs(60)));
    let ctx = TestContext::with_config(config)?;
    ctx.install_active(echo_metadata("echo"), echo_plugin("echo")).await?;

    ctx.manager.execute_tool("echo", "echo", json!({})).await?;
    ctx.manager.execute_tool("echo", "echo", json!({})).await?;
    let err = ctx.manager.execute_tool("echo", "echo", json!({})).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::RateLimitExceeded);

    ctx.teardown().await
}

/// Inputs are checked against the declared contract before the handler runs
#[tokio::test]
async fn test_input_contract() -> Result<()> {
    let ctx = TestContext::new()?;
    let invoked = Arc::new(AtomicBool::new(false));
    let seen = Arc::clone(&invoked);

    let contract = Schema::new()
        .property("city", PropertySchema::new(PropertyType::String))
        .property("days", PropertySchema::new(PropertyType::Integer).with_range(Some(1.0), Some(14.0)))
        .require("city");
    let metadata = plugin_metadata("weather")
        .with_tool(OperationSpec::new("forecast", "Forecast for a city").with_input_schema(contract));
    let plugin = ModulePlugin::builder("weather")
        .tool("forecast", move |input, _ctx| {
            seen.store(true, Ordering::SeqCst);
            async move { Ok(json!({ "city": input["city"], "sky": "clear" })) }
        })
        .build();
    ctx.install_active(metadata, Arc::new(plugin)).await?;

    let err = ctx
        .manager
        .execute_tool("weather", "forecast", json!({ "days": 30 }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);
    assert!(err.to_string().contains("city"));
    assert!(!invoked.load(Ordering::SeqCst));
    assert_eq!(ctx.manager.stats().execution.rejected_inputs, 1);

    let err = ctx.manager.execute_tool("weather", "forecast", json!("Oslo")).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);

    let result = ctx
        .manager
        .execute_tool("weather", "forecast", json!({ "city": "Oslo", "days": 3 }))
        .await?;
    assert_eq!(result["sky"], "clear");
    assert!(invoked.load(Ordering::SeqCst));

    ctx.teardown().await
}

/// Revoked permissions refuse the call
#[tokio::test]
async fn test_permission_denied() -> Result<()> {
    let ctx = TestContext::new()?;
    ctx.install_active(echo_metadata("echo"), echo_plugin("echo")).await?;

    ctx.manager.context().security.revoke_permission("echo", "tool:echo");
    let err = ctx.manager.execute_tool("echo", "echo", json!({})).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::PermissionDenied);

    ctx.manager
        .configure("echo", PluginConfigUpdate::new().with_permission("tool:echo"))
        .await?;
    ctx.manager.execute_tool("echo", "echo", json!({})).await?;

    ctx.teardown().await
}

/// Undeclared operations and inactive plugins are refused up front
#[tokio::test]
async fn test_refusals() -> Result<()> {
    let ctx = TestContext::new()?;
    ctx.manager.install_plugin(echo_metadata("echo"), echo_plugin("echo")).await?;

    let err = ctx.manager.execute_tool("echo", "echo", json!({})).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotActive);

    ctx.manager.enable("echo").await?;
    let err = ctx.manager.execute_tool("echo", "missing", json!({})).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
    let err = ctx.manager.execute_action("echo", "echo", json!({})).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
    let err = ctx.manager.execute_tool("ghost", "echo", json!({})).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);

    assert_eq!(ctx.manager.stats().execution.executions, 0);

    ctx.teardown().await
}

/// Handler failures surface as execution errors and count against the plugin
#[tokio::test]
async fn test_handler_failure() -> Result<()> {
    let ctx = TestContext::new()?;
    let instance = ctx.install_active(echo_metadata("echo"), echo_plugin("echo")).await?;
    let mut events = ctx.manager.subscribe_execution();

    let err = ctx.manager.execute_tool("echo", "fail", json!({})).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ExecutionError);
    assert!(err.to_string().contains("fixture failure"));
    assert_eq!(instance.error_count(), 1);

    match events.recv().await? {
        ExecutionEvent::Completed { name, success, error, .. } => {
            assert_eq!(name, "fail");
            assert!(!success);
            assert!(error.unwrap_or_default().contains("fixture failure"));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let snapshot = instance.performance();
    assert_eq!(snapshot.total_requests, 1);
    assert_eq!(snapshot.success_rate, 0.0);

    ctx.teardown().await
}

/// A call past its window is abandoned and the handler never completes
#[tokio::test]
async fn test_default_timeout_drops_handler() -> Result<()> {
    let mut config = EngineConfig::testing();
    config.execution.default_timeout_ms = 100;
    let ctx = TestContext::with_config(config)?;

    let finished = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&finished);
    let plugin = ModulePlugin::builder("sleeper")
        .tool("nap", move |_input, _ctx| {
            let flag = Arc::clone(&flag);
            async move {
                sleep(Duration::from_millis(400)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(json!({ "rested": true }))
            }
        })
        .build();
    let metadata = plugin_metadata("sleeper").with_tool(OperationSpec::new("nap", "Sleep a while"));
    ctx.install_active(metadata, Arc::new(plugin)).await?;

    let started = Instant::now();
    let err = ctx.manager.execute_tool("sleeper", "nap", json!({})).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Timeout);
    assert!(started.elapsed() < Duration::from_millis(400));

    sleep(Duration::from_millis(500)).await;
    assert!(!finished.load(Ordering::SeqCst));
    assert_eq!(ctx.manager.stats().execution.timeouts, 1);

    ctx.teardown().await
}

/// Request and response middleware wrap the handler, error middleware observes failures
#[tokio::test]
async fn test_middleware_stages() -> Result<()> {
    let ctx = TestContext::new()?;
    let errors = Arc::new(Mutex::new(Vec::<Value>::new()));
    let sink = Arc::clone(&errors);

    let stamp = MiddlewareSpec::new("stamp", MiddlewareStage::Request, 10);
    let wrap = MiddlewareSpec::new("wrap", MiddlewareStage::Response, 0);
    let audit = MiddlewareSpec::new("audit", MiddlewareStage::Error, 0);

    let plugin = ModulePlugin::builder("mw")
        .tool("echo", |input, _ctx| async move { Ok(input) })
        .tool("fail", |_input, ctx| async move {
            Err(PluginError::execution_error(ctx.plugin_id, "tool:fail", "boom"))
        })
        .middleware(
            stamp.clone(),
            Arc::new(FnMiddleware::new(|ctx: MiddlewareContext, mut value: Value| async move {
                value["stamped_by"] = json!(ctx.operation);
                Ok(value)
            })),
        )
        .middleware(
            wrap.clone(),
            Arc::new(FnMiddleware::new(|_ctx: MiddlewareContext, value: Value| async move {
                Ok(json!({ "data": value }))
            })),
        )
        .middleware(
            audit.clone(),
            Arc::new(FnMiddleware::new(move |_ctx: MiddlewareContext, value: Value| {
                sink.lock().unwrap().push(value.clone());
                async move { Ok(value) }
            })),
        )
        .build();
    let metadata = plugin_metadata("mw")
        .with_tool(OperationSpec::new("echo", "Echo"))
        .with_tool(OperationSpec::new("fail", "Fail"))
        .with_middleware(stamp)
        .with_middleware(wrap)
        .with_middleware(audit);
    ctx.install_active(metadata, Arc::new(plugin)).await?;

    let result = ctx.manager.execute_tool("mw", "echo", json!({ "x": 1 })).await?;
    assert_eq!(result, json!({ "data": { "x": 1, "stamped_by": "tool:echo" } }));

    assert!(ctx.manager.execute_tool("mw", "fail", json!({})).await.is_err());
    let seen = errors.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["code"], "EXECUTION_ERROR");

    // Toggling a middleware off takes effect on the running plugin
    ctx.manager
        .configure("mw", PluginConfigUpdate::new().with_middleware("wrap", false))
        .await?;
    let result = ctx.manager.execute_tool("mw", "echo", json!({ "x": 2 })).await?;
    assert_eq!(result, json!({ "x": 2, "stamped_by": "tool:echo" }));

    ctx.teardown().await
}

/// Resources are read without rate limits and announce the access
#[tokio::test]
async fn test_resource_read() -> Result<()> {
    let ctx = TestContext::new()?;
    ctx.install_active(echo_metadata("echo"), echo_plugin("echo")).await?;
    let mut events = ctx.manager.subscribe_execution();

    let value = ctx.manager.get_resource("echo", "status").await?;
    assert_eq!(value, json!({ "plugin": "echo", "ok": true }));

    match events.recv().await? {
        ExecutionEvent::ResourceAccessed { name, uri, .. } => {
            assert_eq!(name, "status");
            assert_eq!(uri, "plugin://echo/status");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let err = ctx.manager.get_resource("echo", "missing").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
    assert_eq!(ctx.manager.stats().execution.resource_reads, 1);

    ctx.teardown().await
}

proptest! {
    #[test]
    fn prop_limiter_never_exceeds_budget(max in 1u32..20, attempts in 0usize..60) {
        let limiter = RateLimiter::new();
        let limit = RateLimit::new(max, Duration::from_secs(60));

        let admitted = (0..attempts)
            .filter(|_| limiter.try_acquire("p", "tool:t", &limit))
            .count();

        prop_assert_eq!(admitted, attempts.min(max as usize));
        prop_assert_eq!(limiter.remaining("p", "tool:t", &limit) as usize, (max as usize).saturating_sub(admitted));
    }
}
