//! Typed event channels.
//!
//! Each component publishes one event enum through its own [`EventChannel`].
//! Consumers subscribe to exactly the categories they care about.

use crate::lifecycle::PluginState;
use crate::types::PerformanceSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;

/// Default buffered events per channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Broadcast channel for one event category.
///
/// Sending never blocks and never fails when nobody listens. Slow receivers
/// observe `RecvError::Lagged` instead of holding the sender back.
#[derive(Debug)]
pub struct EventChannel<E: Clone> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone + Send + 'static> EventChannel<E> {
    /// Create a channel buffering up to `capacity` events per receiver.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event, returning how many receivers got it.
    pub fn emit(&self, event: E) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E: Clone + Send + 'static> Default for EventChannel<E> {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// Lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// Plugin installed
    Installed {
        /// Plugin identifier
        plugin_id: String,
        /// Installed version
        version: String,
    },
    /// Plugin metadata replaced
    Updated {
        /// Plugin identifier
        plugin_id: String,
        /// Previous version
        from_version: String,
        /// New version
        to_version: String,
    },
    /// State transition
    StateChanged {
        /// Plugin identifier
        plugin_id: String,
        /// Previous state
        from: PluginState,
        /// New state
        to: PluginState,
        /// Transition time
        at: DateTime<Utc>,
    },
    /// Plugin enabled and active
    Enabled {
        /// Plugin identifier
        plugin_id: String,
    },
    /// Plugin disabled
    Disabled {
        /// Plugin identifier
        plugin_id: String,
    },
    /// Configuration changed
    Configured {
        /// Plugin identifier
        plugin_id: String,
    },
    /// Plugin removed
    Uninstalled {
        /// Plugin identifier
        plugin_id: String,
    },
    /// A lifecycle operation failed
    Error {
        /// Plugin identifier
        plugin_id: String,
        /// Failed operation
        operation: String,
        /// Error message
        message: String,
    },
}

impl LifecycleEvent {
    /// Plugin the event refers to.
    pub fn plugin_id(&self) -> &str {
        match self {
            Self::Installed { plugin_id, .. }
            | Self::Updated { plugin_id, .. }
            | Self::StateChanged { plugin_id, .. }
            | Self::Enabled { plugin_id }
            | Self::Disabled { plugin_id }
            | Self::Configured { plugin_id }
            | Self::Uninstalled { plugin_id }
            | Self::Error { plugin_id, .. } => plugin_id,
        }
    }
}

/// Operation kinds dispatched by the execution engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Tool call
    Tool,
    /// Action call
    Action,
    /// Resource read
    Resource,
}

impl OperationKind {
    /// Lowercase name used in permission and rate-limit keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Action => "action",
            Self::Resource => "resource",
        }
    }

    /// Key of the form `<kind>:<name>`.
    pub fn key(&self, name: &str) -> String {
        format!("{}:{name}", self.as_str())
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// A tool or action call finished
    Completed {
        /// Plugin identifier
        plugin_id: String,
        /// Operation kind
        kind: OperationKind,
        /// Operation name
        name: String,
        /// Whether the call succeeded
        success: bool,
        /// Wall-clock duration
        duration: Duration,
        /// Error code on failure
        error: Option<String>,
    },
    /// A resource was read
    ResourceAccessed {
        /// Plugin identifier
        plugin_id: String,
        /// Resource name
        name: String,
        /// Resource uri
        uri: String,
    },
}

/// Bus delivery notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    /// Message delivered to at least one receiver
    Delivered {
        /// Message id
        message_id: String,
        /// Receivers reached
        recipients: usize,
    },
    /// Message dropped after its TTL
    Expired {
        /// Message id
        message_id: String,
        /// Time spent queued
        age: Duration,
    },
    /// Direct message to an unknown recipient
    Undeliverable {
        /// Message id
        message_id: String,
        /// Addressed plugin
        recipient: String,
    },
}

/// Alerted metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Average response time above threshold
    ResponseTime,
    /// Success rate below threshold
    SuccessRate,
    /// Memory above threshold
    Memory,
    /// Error rate above threshold
    ErrorRate,
}

/// A threshold breach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Plugin identifier
    pub plugin_id: String,
    /// Breached metric
    pub kind: AlertKind,
    /// Observed value
    pub value: f64,
    /// Configured threshold
    pub threshold: f64,
    /// Detection time
    pub at: DateTime<Utc>,
}

/// Performance monitor notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// Threshold breach
    Alert(Alert),
    /// Periodic sample of one plugin
    Sampled {
        /// Plugin identifier
        plugin_id: String,
        /// Metrics at sample time
        snapshot: PerformanceSnapshot,
    },
}

/// Aggregate statistics for one hook key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookStatsEntry {
    /// Hook key (`<plugin>:<name>`)
    pub key: String,
    /// Executions
    pub count: u64,
    /// Successful executions
    pub successes: u64,
    /// Failed executions
    pub failures: u64,
    /// Total time in milliseconds
    pub total_ms: f64,
    /// Average time in milliseconds
    pub average_ms: f64,
}

/// Hook pipeline notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Periodic hook statistics
    Statistics {
        /// Per-hook entries, sorted by key
        hooks: Vec<HookStatsEntry>,
    },
    /// A hook failed and the chain continued
    HookFailed {
        /// Hook key
        key: String,
        /// Event name
        event: String,
        /// Error message
        message: String,
    },
}
