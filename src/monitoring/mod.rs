//! Dashboard snapshots and metric time series.
//!
//! The orchestrator assembles dashboards by querying each component; this
//! module supplies the snapshot shapes and a bounded metric registry fed
//! by the periodic snapshot loop.

use crate::{context::ContextInventory, scheduler::AgentResourceStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Named metric series with bounded retention
pub struct MetricsRegistry {
    series: Arc<RwLock<HashMap<String, VecDeque<MetricPoint>>>>,
    retention: usize,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_retention(crate::constants::METRIC_RETENTION_COUNT)
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            series: Arc::new(RwLock::new(HashMap::new())),
            retention,
        }
    }

    pub async fn record(&self, name: &str, value: f64) {
        let mut series = self.series.write().await;
        let points = series.entry(name.to_string()).or_default();
        points.push_back(MetricPoint {
            timestamp: Utc::now(),
            value,
        });
        while points.len() > self.retention {
            points.pop_front();
        }
    }

    pub async fn series(&self, name: &str) -> Vec<MetricPoint> {
        let series = self.series.read().await;
        series
            .get(name)
            .map(|points| points.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn names(&self) -> Vec<String> {
        let series = self.series.read().await;
        let mut names: Vec<String> = series.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn latest(&self, name: &str) -> Option<MetricPoint> {
        let series = self.series.read().await;
        series.get(name).and_then(|points| points.back().copied())
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of one project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDashboard {
    pub project_id: String,
    pub generated_at: DateTime<Utc>,
    pub tasks_by_status: HashMap<String, usize>,
    pub total_tasks: usize,
    pub active_locks: usize,
    pub pending_locks: usize,
    pub pending_approvals: usize,
    pub agent_states: Vec<AgentResourceStatus>,
    pub context: ContextInventory,
}

/// Point-in-time view of one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDashboard {
    pub agent_id: String,
    pub generated_at: DateTime<Utc>,
    pub current_workload: f64,
    pub max_workload: f64,
    pub open_tasks: usize,
    pub held_locks: usize,
    pub unread_messages: usize,
    pub resource: Option<AgentResourceStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_and_read_series() {
        let registry = MetricsRegistry::new();
        registry.record("tasks.total", 3.0).await;
        registry.record("tasks.total", 5.0).await;

        let points = registry.series("tasks.total").await;
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].value, 5.0);
        assert_eq!(registry.latest("tasks.total").await.unwrap().value, 5.0);
        assert_eq!(registry.names().await, vec!["tasks.total".to_string()]);
    }

    #[tokio::test]
    async fn retention_bounds_series_length() {
        let registry = MetricsRegistry::with_retention(3);
        for i in 0..10 {
            registry.record("m", i as f64).await;
        }
        let points = registry.series("m").await;
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].value, 7.0);
    }

    #[tokio::test]
    async fn unknown_series_is_empty() {
        let registry = MetricsRegistry::new();
        assert!(registry.series("missing").await.is_empty());
        assert!(registry.latest("missing").await.is_none());
    }
}
