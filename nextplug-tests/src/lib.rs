//! # NextPlug Tests
//!
//! Shared harness for the engine's integration and end-to-end suites.
//!
//! - [`context::TestContext`] builds a manager on the `testing` preset and
//!   installs a test-writer tracing subscriber once per process
//! - [`fixtures`] provides descriptors and plugin implementations used
//!   across suites
//!
//! ## Usage
//!
//! ```rust,no_run
//! use nextplug_tests::prelude::*;
//!
//! #[tokio::test]
//! async fn test_echo() -> anyhow::Result<()> {
//!     let ctx = TestContext::new()?;
//!     ctx.install_active(echo_metadata("echo-plugin"), echo_plugin("echo-plugin")).await?;
//!     let output = ctx.manager.execute_tool("echo-plugin", "echo", json!({"msg": "hi"})).await?;
//!     assert_eq!(output, json!({"msg": "hi"}));
//!     ctx.teardown().await
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod context;
pub mod fixtures;

/// Common imports for test suites.
pub mod prelude {
    pub use crate::context::TestContext;
    pub use crate::fixtures::*;
    pub use nextplug_core::prelude::*;
    pub use serde_json::{json, Value};
    pub use std::sync::Arc;
    pub use std::time::Duration;
}
