//! Middleware chains with `Next` continuations.

use crate::error::PluginResult;
use crate::pipeline::hooks::registration_key;
use crate::types::{MiddlewareSpec, MiddlewareStage};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Call site information passed through a middleware chain.
#[derive(Debug, Clone, PartialEq)]
pub struct MiddlewareContext {
    /// Plugin whose operation is running
    pub plugin_id: String,

    /// Operation key (`tool:<name>`)
    pub operation: String,

    /// Stage being run
    pub stage: MiddlewareStage,

    /// Error message, set for the error stage
    pub error: Option<String>,
}

impl MiddlewareContext {
    /// Create a context.
    pub fn new(plugin_id: impl Into<String>, operation: impl Into<String>, stage: MiddlewareStage) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            operation: operation.into(),
            stage,
            error: None,
        }
    }

    /// Attach the error being handled.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Wraps the remaining chain.
///
/// Calling [`run`](Next::run) hands the value to the next middleware, or
/// returns it unchanged at the end of the chain. Dropping it short-circuits.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    ctx: &'a MiddlewareContext,
}

impl<'a> Next<'a> {
    /// Continue with the rest of the chain.
    pub fn run(self, value: Value) -> BoxFuture<'a, PluginResult<Value>> {
        Box::pin(async move {
            match self.chain.split_first() {
                Some((head, rest)) => {
                    let next = Next {
                        chain: rest,
                        ctx: self.ctx,
                    };
                    head.handle(self.ctx, value, next).await
                }
                None => Ok(value),
            }
        })
    }

    /// Middleware remaining after this point.
    pub fn remaining(&self) -> usize {
        self.chain.len()
    }
}

/// A middleware stage handler.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Process `value`, usually by calling `next.run(..)`.
    async fn handle(&self, ctx: &MiddlewareContext, value: Value, next: Next<'_>) -> PluginResult<Value>;
}

/// Middleware that maps the value and always continues.
pub struct FnMiddleware<F> {
    f: F,
}

impl<F> FnMiddleware<F> {
    /// Wrap a mapping closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(MiddlewareContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PluginResult<Value>> + Send + 'static,
{
    async fn handle(&self, ctx: &MiddlewareContext, value: Value, next: Next<'_>) -> PluginResult<Value> {
        let mapped = (self.f)(ctx.clone(), value).await?;
        next.run(mapped).await
    }
}

/// A middleware declaration paired with its handler.
#[derive(Clone)]
pub struct MiddlewareBinding {
    /// Declaration
    pub spec: MiddlewareSpec,

    /// Handler
    pub handler: Arc<dyn Middleware>,
}

impl MiddlewareBinding {
    /// Pair a declaration with a handler.
    pub fn new(spec: MiddlewareSpec, handler: Arc<dyn Middleware>) -> Self {
        Self { spec, handler }
    }
}

impl std::fmt::Debug for MiddlewareBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareBinding")
            .field("spec", &self.spec)
            .finish()
    }
}

#[derive(Clone)]
struct MiddlewareRegistration {
    key: String,
    plugin_id: String,
    priority: i32,
    handler: Arc<dyn Middleware>,
}

/// Middleware chains per stage.
#[derive(Default)]
pub struct MiddlewareChain {
    stages: RwLock<HashMap<MiddlewareStage, Vec<MiddlewareRegistration>>>,
}

impl MiddlewareChain {
    /// Create empty chains.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under `<plugin_id>:<name>`, replacing an existing entry in place.
    pub fn register(&self, plugin_id: &str, binding: MiddlewareBinding) -> String {
        let key = registration_key(plugin_id, &binding.spec.name);
        let stage = binding.spec.stage;
        let registration = MiddlewareRegistration {
            key: key.clone(),
            plugin_id: plugin_id.to_string(),
            priority: binding.spec.priority,
            handler: binding.handler,
        };

        let mut stages = self.stages.write();
        for (other, chain) in stages.iter_mut() {
            if *other != stage {
                chain.retain(|existing| existing.key != key);
            }
        }

        let chain = stages.entry(stage).or_default();
        match chain.iter_mut().find(|existing| existing.key == key) {
            Some(existing) => *existing = registration,
            None => chain.push(registration),
        }
        chain.sort_by(|a, b| b.priority.cmp(&a.priority));

        tracing::debug!(middleware = %key, stage = %stage, "Middleware registered");
        key
    }

    /// Remove every middleware owned by `plugin_id` in one step.
    pub fn unregister_plugin(&self, plugin_id: &str) -> usize {
        let mut stages = self.stages.write();
        let mut removed = 0;
        for chain in stages.values_mut() {
            let before = chain.len();
            chain.retain(|existing| existing.plugin_id != plugin_id);
            removed += before - chain.len();
        }
        removed
    }

    /// Run the chain for `ctx.stage`.
    pub async fn run(&self, ctx: &MiddlewareContext, value: Value) -> PluginResult<Value> {
        let handlers: Vec<Arc<dyn Middleware>> = match self.stages.read().get(&ctx.stage) {
            Some(chain) if !chain.is_empty() => chain.iter().map(|r| Arc::clone(&r.handler)).collect(),
            _ => return Ok(value),
        };

        Next {
            chain: &handlers,
            ctx,
        }
        .run(value)
        .await
    }

    /// Number of registrations, optionally for one stage.
    pub fn count(&self, stage: Option<MiddlewareStage>) -> usize {
        let stages = self.stages.read();
        match stage {
            Some(stage) => stages.get(&stage).map(Vec::len).unwrap_or(0),
            None => stages.values().map(Vec::len).sum(),
        }
    }

    /// Keys registered for `stage`, in execution order.
    pub fn chain_keys(&self, stage: MiddlewareStage) -> Vec<String> {
        self.stages
            .read()
            .get(&stage)
            .map(|chain| chain.iter().map(|r| r.key.clone()).collect())
            .unwrap_or_default()
    }
}
