//! Per-plugin performance tracking with threshold alerts.

use crate::config::{MonitorSettings, MonitorThresholds};
use crate::error::{PluginError, PluginResult};
use crate::events::{Alert, AlertKind, EventChannel, MonitorEvent};
use crate::types::PerformanceSnapshot;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Plugin id used for the aggregate report.
pub const AGGREGATE_REPORT_ID: &str = "all";

/// Performance report for one plugin or the aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    /// Plugin id, or `"all"`
    pub plugin_id: String,
    /// Plugins covered
    pub plugins: usize,
    /// Metrics, request-weighted for the aggregate
    pub metrics: PerformanceSnapshot,
    /// Retained alerts for the covered plugins
    pub alerts: Vec<Alert>,
    /// Suggestions keyed off threshold breaches
    pub recommendations: Vec<String>,
    /// Generation time
    pub generated_at: DateTime<Utc>,
}

/// Samples per-plugin metrics and raises threshold alerts.
pub struct PerformanceMonitor {
    metrics: DashMap<String, PerformanceSnapshot>,
    settings: MonitorSettings,
    alerts: Mutex<VecDeque<Alert>>,
    events: Arc<EventChannel<MonitorEvent>>,
}

impl PerformanceMonitor {
    /// Create a monitor publishing on `events`.
    pub fn new(settings: MonitorSettings, events: Arc<EventChannel<MonitorEvent>>) -> Self {
        Self {
            metrics: DashMap::new(),
            alerts: Mutex::new(VecDeque::with_capacity(settings.alert_history)),
            settings,
            events,
        }
    }

    /// Start tracking a plugin. Existing figures are kept.
    pub fn register(&self, plugin_id: &str) {
        self.metrics.entry(plugin_id.to_string()).or_default();
    }

    /// Stop tracking a plugin and drop its alerts.
    pub fn unregister(&self, plugin_id: &str) {
        self.metrics.remove(plugin_id);
        self.alerts.lock().retain(|alert| alert.plugin_id != plugin_id);
    }

    /// Fold one call into a registered plugin's figures.
    pub fn update_metrics(&self, plugin_id: &str, execution_time: Duration, success: bool) -> Option<PerformanceSnapshot> {
        let mut snapshot = self.metrics.get_mut(plugin_id)?;
        snapshot.record(execution_time, success);
        Some(*snapshot)
    }

    /// Store a memory estimate for a registered plugin.
    pub fn record_memory_usage(&self, plugin_id: &str, bytes: u64) {
        if let Some(mut snapshot) = self.metrics.get_mut(plugin_id) {
            snapshot.memory_bytes = bytes;
        }
    }

    /// Current figures of one plugin.
    pub fn metrics(&self, plugin_id: &str) -> Option<PerformanceSnapshot> {
        self.metrics.get(plugin_id).map(|entry| *entry.value())
    }

    /// Tracked plugins.
    pub fn plugin_count(&self) -> usize {
        self.metrics.len()
    }

    /// Active thresholds.
    pub fn thresholds(&self) -> &MonitorThresholds {
        &self.settings.thresholds
    }

    fn breaches(&self, plugin_id: &str, snapshot: &PerformanceSnapshot, at: DateTime<Utc>) -> Vec<Alert> {
        let t = &self.settings.thresholds;
        let mut alerts = Vec::new();
        let mut push = |kind, value: f64, threshold: f64| {
            alerts.push(Alert {
                plugin_id: plugin_id.to_string(),
                kind,
                value,
                threshold,
                at,
            })
        };

        if snapshot.total_requests > 0 {
            if snapshot.avg_response_time_ms > t.max_response_time_ms {
                push(AlertKind::ResponseTime, snapshot.avg_response_time_ms, t.max_response_time_ms);
            }
            if snapshot.success_rate < t.min_success_rate {
                push(AlertKind::SuccessRate, snapshot.success_rate, t.min_success_rate);
            }
            if snapshot.error_rate() > t.max_error_rate {
                push(AlertKind::ErrorRate, snapshot.error_rate(), t.max_error_rate);
            }
        }
        if snapshot.memory_bytes > t.max_memory_bytes {
            push(AlertKind::Memory, snapshot.memory_bytes as f64, t.max_memory_bytes as f64);
        }
        alerts
    }

    /// Compare every plugin against the thresholds once.
    ///
    /// Emits one sample per plugin and one alert per violated threshold.
    pub fn sample(&self) -> Vec<Alert> {
        let now = Utc::now();
        let mut snapshots: Vec<(String, PerformanceSnapshot)> = self
            .metrics
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        snapshots.sort_by(|a, b| a.0.cmp(&b.0));

        let mut raised = Vec::new();
        for (plugin_id, snapshot) in snapshots {
            self.events.emit(MonitorEvent::Sampled {
                plugin_id: plugin_id.clone(),
                snapshot,
            });
            raised.extend(self.breaches(&plugin_id, &snapshot, now));
        }

        if !raised.is_empty() {
            let mut history = self.alerts.lock();
            for alert in &raised {
                if history.len() == self.settings.alert_history {
                    history.pop_front();
                }
                history.push_back(alert.clone());
            }
        }

        for alert in &raised {
            tracing::warn!(
                plugin_id = %alert.plugin_id,
                kind = ?alert.kind,
                value = alert.value,
                threshold = alert.threshold,
                "Performance threshold exceeded"
            );
            self.events.emit(MonitorEvent::Alert(alert.clone()));
        }
        raised
    }

    /// Retained alerts, oldest first.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().iter().cloned().collect()
    }

    /// Build a report for one plugin, or the request-weighted aggregate.
    pub fn report(&self, plugin_id: Option<&str>) -> PluginResult<PerformanceReport> {
        let (id, plugins, metrics) = match plugin_id {
            Some(id) => {
                let metrics = self.metrics(id).ok_or_else(|| PluginError::not_found(id))?;
                (id.to_string(), 1, metrics)
            }
            None => {
                let snapshots: Vec<PerformanceSnapshot> = self.metrics.iter().map(|entry| *entry.value()).collect();
                (AGGREGATE_REPORT_ID.to_string(), snapshots.len(), aggregate(&snapshots))
            }
        };

        let alerts = self
            .alerts
            .lock()
            .iter()
            .filter(|alert| plugin_id.map_or(true, |id| alert.plugin_id == id))
            .cloned()
            .collect();

        Ok(PerformanceReport {
            recommendations: self.recommendations(&metrics),
            plugin_id: id,
            plugins,
            metrics,
            alerts,
            generated_at: Utc::now(),
        })
    }

    fn recommendations(&self, metrics: &PerformanceSnapshot) -> Vec<String> {
        let t = &self.settings.thresholds;
        let mut recommendations = Vec::new();

        if metrics.total_requests > 0 && metrics.avg_response_time_ms > t.max_response_time_ms {
            recommendations.push(format!(
                "Average response time {:.1}ms exceeds {:.0}ms: cache results or move slow work out of handlers",
                metrics.avg_response_time_ms, t.max_response_time_ms
            ));
        }
        if metrics.total_requests > 0 && metrics.success_rate < t.min_success_rate {
            recommendations.push(format!(
                "Success rate {:.1}% is below {:.1}%: review handler error paths and input validation",
                metrics.success_rate, t.min_success_rate
            ));
        }
        if metrics.memory_bytes > t.max_memory_bytes {
            recommendations.push(format!(
                "Memory usage {} bytes exceeds {} bytes: release cached data or lower buffer sizes",
                metrics.memory_bytes, t.max_memory_bytes
            ));
        }
        if metrics.total_requests > 0 && metrics.error_rate() > t.max_error_rate {
            recommendations.push(format!(
                "Error rate {:.1}% exceeds {:.1}%: add retries or rate limits for failing operations",
                metrics.error_rate(),
                t.max_error_rate
            ));
        }
        if recommendations.is_empty() {
            recommendations.push("Performance is within configured thresholds".to_string());
        }
        recommendations
    }

    /// Sample on a fixed tick until `shutdown` fires.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        let interval = Duration::from_millis(self.settings.collection_interval_ms);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        monitor.sample();
                    }
                }
            }
            tracing::debug!("Performance monitor stopped");
        })
    }

    /// Subscribe to monitor events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }
}

/// Request-weighted aggregate of several snapshots.
fn aggregate(snapshots: &[PerformanceSnapshot]) -> PerformanceSnapshot {
    let total_requests: u64 = snapshots.iter().map(|s| s.total_requests).sum();
    let mut combined = PerformanceSnapshot {
        total_requests,
        failed_requests: snapshots.iter().map(|s| s.failed_requests).sum(),
        memory_bytes: snapshots.iter().map(|s| s.memory_bytes).sum(),
        ..PerformanceSnapshot::default()
    };

    if total_requests > 0 {
        let weight = |value: fn(&PerformanceSnapshot) -> f64| {
            snapshots
                .iter()
                .map(|s| value(s) * s.total_requests as f64)
                .sum::<f64>()
                / total_requests as f64
        };
        combined.avg_response_time_ms = weight(|s| s.avg_response_time_ms);
        combined.success_rate = weight(|s| s.success_rate);
    }
    combined
}
