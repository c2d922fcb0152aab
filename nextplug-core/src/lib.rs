//! # NextPlug Core
//!
//! Plugin engine for hosting third-party extensions inside an application.
//!
//! A plugin is a descriptor ([`types::PluginMetadata`]) paired with an
//! implementation of the [`plugin::Plugin`] trait. The engine validates the
//! descriptor, checks it against installed plugins, drives it through its
//! lifecycle, and runs its tools, actions and resources under permission
//! checks, rate limits, input contracts and timeouts.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nextplug_core::prelude::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> PluginResult<()> {
//!     let config = EngineConfig::default();
//!     nextplug_core::telemetry::init_tracing(&config.logging);
//!
//!     let manager = PluginManager::new(EngineContext::new(config)?);
//!     manager.initialize().await?;
//!
//!     let metadata = PluginMetadata::new("greeter", "Greeter", "1.0.0")
//!         .with_author("Acme")
//!         .with_license("MIT")
//!         .with_description("Says hello")
//!         .with_tool(OperationSpec::new("greet", "Greet someone"));
//!     let plugin = ModulePlugin::builder("greeter")
//!         .tool("greet", |input, _ctx| async move {
//!             Ok(json!({ "greeting": format!("hello {}", input["name"]) }))
//!         })
//!         .build();
//!
//!     manager.install_plugin(metadata, Arc::new(plugin)).await?;
//!     manager.enable("greeter").await?;
//!     manager.execute_tool("greeter", "greet", json!({ "name": "world" })).await?;
//!
//!     manager.shutdown().await
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`security`]: descriptor validation and permission grants
//! - [`config`]: engine settings and the per-plugin configuration store
//! - [`dependency`]: version ranges, conflicts and the dependency graph
//! - [`lifecycle`]: plugin registry and state machine
//! - [`execution`]: operation dispatch and rate limiting
//! - [`pipeline`]: prioritized hooks and middleware
//! - [`bus`]: prioritized inter-plugin messaging
//! - [`monitor`]: performance sampling and alerts
//! - [`manager`]: the host-facing orchestration layer

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bus;
pub mod config;
pub mod dependency;
pub mod error;
pub mod events;
pub mod execution;
pub mod lifecycle;
pub mod manager;
pub mod monitor;
pub mod pipeline;
pub mod plugin;
pub mod prelude;
pub mod schema;
pub mod security;
pub mod telemetry;
pub mod types;

pub use error::{ErrorCode, PluginError, PluginResult};
pub use manager::{EngineContext, PluginManager};

/// Engine version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
