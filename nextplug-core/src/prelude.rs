//! # Prelude
//!
//! Commonly used types for hosts and plugin authors.

pub use crate::{
    bus::{Message, MessageOptions, MessagePriority},
    config::{EngineConfig, PluginConfig, PluginConfigUpdate, RateLimit},
    dependency::{BlockReason, InstallCheck},
    error::{ErrorCode, PluginError, PluginResult},
    events::{Alert, AlertKind, BusEvent, ExecutionEvent, LifecycleEvent, MonitorEvent, OperationKind, PipelineEvent},
    lifecycle::{PluginInstance, PluginState},
    manager::{EngineContext, PluginManager},
    plugin::{ExecutionContext, HealthStatus, LoadedPlugin, ModulePlugin, Plugin, PluginHealth, PluginSource, StaticPluginSource},
    pipeline::{FnMiddleware, Middleware, MiddlewareContext, Next},
    schema::{PropertySchema, PropertyType, Schema},
    types::{HookSpec, MiddlewareSpec, MiddlewareStage, OperationSpec, PluginMetadata, ResourceSpec},
};

pub use async_trait::async_trait;
pub use serde::{Deserialize, Serialize};
