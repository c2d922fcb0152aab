//! Communication bus integration tests
//!
//! Message expiry and priority are checked by draining the queue by hand;
//! delivery to plugins and request/response run with the drain loop started.

use anyhow::Result;
use nextplug_tests::prelude::*;
use tokio::time::{sleep, timeout};

async fn wait_for<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    timeout(Duration::from_secs(2), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

/// A message dequeued after its TTL expires instead of being delivered
#[tokio::test]
async fn test_message_ttl_expiry() -> Result<()> {
    let ctx = TestContext::new()?;
    let bus = &ctx.manager.context().bus;
    let mut events = ctx.manager.subscribe_bus();
    let mut channel = bus.subscribe_channel("alerts");

    let expired_id = ctx.manager.publish(
        "host",
        "alerts",
        json!({ "stale": true }),
        MessageOptions::new().with_ttl(Duration::from_millis(100)),
    )?;
    sleep(Duration::from_millis(150)).await;

    assert_eq!(bus.process_queue().await, 1);
    match events.recv().await? {
        BusEvent::Expired { message_id, age } => {
            assert_eq!(message_id, expired_id.to_string());
            assert!(age > Duration::from_millis(100));
        }
        other => panic!("expected expiry, got {other:?}"),
    }
    assert!(channel.try_recv().is_err());
    assert!(events.try_recv().is_err());

    // A fresh message on the same channel still goes through
    ctx.manager
        .publish("host", "alerts", json!({ "fresh": true }), MessageOptions::new())?;
    bus.process_queue().await;
    let delivered = channel.try_recv()?;
    assert_eq!(delivered.payload, json!({ "fresh": true }));
    assert!(matches!(events.recv().await?, BusEvent::Delivered { recipients: 1, .. }));

    let stats = bus.stats();
    assert_eq!(stats.published, 2);
    assert_eq!(stats.expired, 1);
    assert_eq!(stats.delivered, 1);

    ctx.teardown().await
}

/// Higher priority drains first, FIFO within a priority
#[tokio::test]
async fn test_priority_order() -> Result<()> {
    let ctx = TestContext::new()?;
    let bus = &ctx.manager.context().bus;
    let mut channel = bus.subscribe_channel("jobs");

    for (label, priority) in [
        ("low", MessagePriority::Low),
        ("normal-1", MessagePriority::Normal),
        ("critical", MessagePriority::Critical),
        ("normal-2", MessagePriority::Normal),
        ("high", MessagePriority::High),
    ] {
        ctx.manager.publish(
            "host",
            "jobs",
            json!(label),
            MessageOptions::new().with_priority(priority),
        )?;
    }
    assert_eq!(bus.queue_depth(), 5);

    bus.process_queue().await;

    let mut order = Vec::new();
    while let Ok(message) = channel.try_recv() {
        order.push(message.payload.as_str().unwrap_or_default().to_string());
    }
    assert_eq!(order, vec!["critical", "high", "normal-1", "normal-2", "low"]);

    ctx.teardown().await
}

/// Subscribed plugins receive broadcasts, except their own
#[tokio::test]
async fn test_broadcast_to_plugins() -> Result<()> {
    let ctx = TestContext::started().await?;
    let (plugin, counts) = CountingPlugin::new();
    ctx.install_active(CountingPlugin::metadata("listener"), plugin).await?;
    assert!(ctx.manager.subscribe("listener", "news")?);
    assert!(!ctx.manager.subscribe("listener", "news")?);

    ctx.manager.publish("host", "news", json!({ "headline": "hi" }), MessageOptions::new())?;
    assert!(wait_for(|| counts.received() == 1).await);

    ctx.manager.publish("listener", "news", json!({ "echo": true }), MessageOptions::new())?;
    ctx.manager.publish("host", "news", json!({ "headline": "again" }), MessageOptions::new())?;
    assert!(wait_for(|| counts.received() == 2).await);
    sleep(Duration::from_millis(30)).await;
    assert_eq!(counts.received(), 2);

    assert!(ctx.manager.unsubscribe("listener", "news"));
    let err = ctx.manager.subscribe("ghost", "news").unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);

    ctx.teardown().await
}

/// Direct messages reach running plugins only
#[tokio::test]
async fn test_direct_delivery() -> Result<()> {
    let ctx = TestContext::started().await?;
    let (plugin, counts) = CountingPlugin::new();
    ctx.install_active(CountingPlugin::metadata("inbox"), plugin).await?;
    let mut events = ctx.manager.subscribe_bus();

    ctx.manager.send_direct("host", "inbox", json!({ "note": 1 }), MessageOptions::new())?;
    assert!(wait_for(|| counts.received() == 1).await);

    let missing = ctx.manager.send_direct("host", "ghost", json!({}), MessageOptions::new())?;
    let event = timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(BusEvent::Undeliverable { message_id, recipient }) = events.recv().await {
                return (message_id, recipient);
            }
        }
    })
    .await?;
    assert_eq!(event, (missing.to_string(), "ghost".to_string()));

    // Disabled plugins drop off the bus
    ctx.manager.disable("inbox").await?;
    ctx.manager.send_direct("host", "inbox", json!({ "note": 2 }), MessageOptions::new())?;
    assert!(wait_for(|| ctx.manager.stats().bus.undeliverable == 2).await);
    assert_eq!(counts.received(), 1);

    ctx.teardown().await
}

/// Requests resolve with the recipient's reply
#[tokio::test]
async fn test_request_response() -> Result<()> {
    let ctx = TestContext::started().await?;
    let (plugin, _counts) = CountingPlugin::new();
    ctx.install_active(CountingPlugin::metadata("pinger"), plugin).await?;

    let reply = ctx
        .manager
        .request("host", "pinger", json!({ "ping": 1 }), MessageOptions::new())
        .await?;
    assert_eq!(reply, json!({ "pong": { "ping": 1 } }));
    assert_eq!(ctx.manager.stats().bus.pending_requests, 0);

    let err = ctx
        .manager
        .request("host", "ghost", json!({}), MessageOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::CommunicationError);

    ctx.teardown().await
}

/// Requests nobody answers time out and leave nothing pending
#[tokio::test]
async fn test_request_timeout() -> Result<()> {
    let ctx = TestContext::started().await?;
    let silent = ModulePlugin::builder("silent")
        .on_message(|_message| async move { Ok(None) })
        .build();
    ctx.install_active(plugin_metadata("silent"), Arc::new(silent)).await?;

    let err = ctx
        .manager
        .request(
            "host",
            "silent",
            json!({}),
            MessageOptions::new().with_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Timeout);
    assert_eq!(ctx.manager.stats().bus.pending_requests, 0);

    ctx.teardown().await
}

/// Handler errors on the recipient fail the request
#[tokio::test]
async fn test_request_handler_error() -> Result<()> {
    let ctx = TestContext::started().await?;
    let grumpy = ModulePlugin::builder("grumpy")
        .on_message(|message: Message| async move {
            Err(PluginError::communication(
                message.recipient.unwrap_or_default(),
                "not today",
            ))
        })
        .build();
    ctx.install_active(plugin_metadata("grumpy"), Arc::new(grumpy)).await?;

    let err = ctx
        .manager
        .request("host", "grumpy", json!({}), MessageOptions::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not today"));
    assert_eq!(ctx.manager.stats().bus.handler_errors, 1);

    ctx.teardown().await
}
