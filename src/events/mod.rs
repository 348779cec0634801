//! Append-only event log for structured agent interactions.
//!
//! Every audit-relevant state transition in the substrate (lock grants,
//! assignments, approval decisions) is recorded here. Callers that are not
//! audit-critical may fire-and-forget; audit-critical callers await the
//! append before reporting their own operation complete.

use crate::Result;
use chrono::{DateTime, Utc};
use flate2::{write::GzEncoder, Compression};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, VecDeque},
    path::Path,
    sync::Arc,
};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Kind of interaction being recorded
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskAssignment,
    Communication,
    CodeChange,
    Approval,
    LockActivity,
    SystemEvent,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// A single structured event record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub project_id: String,
    pub agent_id: String,
    pub kind: EventKind,
    pub action: String,
    pub content: String,
    pub context: HashMap<String, serde_json::Value>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub level: EventLevel,
    pub parent_id: Option<String>,
    pub session_id: Option<String>,
}

/// Builder-style constructor keeps call sites readable despite the wide
/// record shape.
impl EventRecord {
    pub fn new(
        project_id: impl Into<String>,
        agent_id: impl Into<String>,
        kind: EventKind,
        action: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("evt_{}", &Uuid::new_v4().simple().to_string()[..12]),
            timestamp: Utc::now(),
            project_id: project_id.into(),
            agent_id: agent_id.into(),
            kind,
            action: action.into(),
            content: content.into(),
            context: HashMap::new(),
            metadata: HashMap::new(),
            level: EventLevel::Info,
            parent_id: None,
            session_id: None,
        }
    }

    pub fn with_level(mut self, level: EventLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Capability interface consumed by components that emit events
///
/// Concrete implementations are wired at composition time so that no
/// component depends on the log's storage details.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    /// Append a record. Returns the record id once the log has accepted it.
    async fn append(&self, record: EventRecord) -> Result<String>;
}

/// Filter for event queries; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub project_id: Option<String>,
    pub agent_id: Option<String>,
    pub kind: Option<EventKind>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl EventFilter {
    fn matches(&self, record: &EventRecord) -> bool {
        if let Some(project_id) = &self.project_id {
            if &record.project_id != project_id {
                return false;
            }
        }
        if let Some(agent_id) = &self.agent_id {
            if &record.agent_id != agent_id {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if record.kind != kind {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if record.timestamp > until {
                return false;
            }
        }
        true
    }
}

/// In-memory append-only event log with bounded retention
pub struct EventLog {
    records: Arc<RwLock<VecDeque<EventRecord>>>,
    max_retained: usize,
}

impl EventLog {
    pub fn new() -> Self {
        Self::with_capacity(crate::constants::MAX_RETAINED_EVENTS)
    }

    pub fn with_capacity(max_retained: usize) -> Self {
        Self {
            records: Arc::new(RwLock::new(VecDeque::new())),
            max_retained,
        }
    }

    /// Query records matching the filter, newest first
    pub async fn query(&self, filter: &EventFilter) -> Vec<EventRecord> {
        let records = self.records.read().await;
        let limit = filter.limit.unwrap_or(usize::MAX);
        records
            .iter()
            .rev()
            .filter(|r| filter.matches(r))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Case-insensitive free-text search over content and action
    pub async fn search(&self, pattern: &str, limit: usize) -> Result<Vec<EventRecord>> {
        let regex = RegexBuilder::new(&regex::escape(pattern))
            .case_insensitive(true)
            .build()
            .map_err(|e| crate::FleetError::InvalidArgument(format!("bad search pattern: {e}")))?;

        let records = self.records.read().await;
        Ok(records
            .iter()
            .rev()
            .filter(|r| regex.is_match(&r.content) || regex.is_match(&r.action))
            .take(limit)
            .cloned()
            .collect())
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Export every record in the given time range into a gzipped tar
    /// archive containing one JSON file per record batch.
    pub async fn export_archive(
        &self,
        path: &Path,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        let filter = EventFilter {
            since,
            until,
            ..Default::default()
        };
        let mut selected = self.query(&filter).await;
        selected.reverse(); // archive in append order

        let file = std::fs::File::create(path)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut archive = tar::Builder::new(encoder);

        for (index, records) in selected.chunks(1000).enumerate() {
            let payload = serde_json::to_vec_pretty(records)?;
            let mut header = tar::Header::new_gnu();
            header.set_size(payload.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            archive.append_data(
                &mut header,
                format!("events/batch-{index:05}.json"),
                payload.as_slice(),
            )?;
        }

        archive.into_inner()?.finish()?;
        Ok(selected.len())
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EventSink for EventLog {
    async fn append(&self, record: EventRecord) -> Result<String> {
        let id = record.id.clone();
        if record.level >= EventLevel::Error {
            tracing::error!(
                project = %record.project_id,
                agent = %record.agent_id,
                action = %record.action,
                "{}",
                record.content
            );
        }

        let mut records = self.records.write().await;
        records.push_back(record);
        while records.len() > self.max_retained {
            records.pop_front();
        }
        Ok(id)
    }
}

/// Sink that drops everything; used by tests and degraded mode
pub struct NullEventSink;

#[async_trait::async_trait]
impl EventSink for NullEventSink {
    async fn append(&self, record: EventRecord) -> Result<String> {
        Ok(record.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(project: &str, agent: &str, kind: EventKind, action: &str) -> EventRecord {
        EventRecord::new(project, agent, kind, action, format!("{action} happened"))
    }

    #[tokio::test]
    async fn append_and_query_by_project_and_kind() {
        let log = EventLog::new();
        log.append(record("p1", "a1", EventKind::LockActivity, "lock_acquired"))
            .await
            .unwrap();
        log.append(record("p1", "a2", EventKind::TaskAssignment, "task_assigned"))
            .await
            .unwrap();
        log.append(record("p2", "a1", EventKind::LockActivity, "lock_released"))
            .await
            .unwrap();

        let filter = EventFilter {
            project_id: Some("p1".to_string()),
            kind: Some(EventKind::LockActivity),
            ..Default::default()
        };
        let hits = log.query(&filter).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].action, "lock_acquired");
    }

    #[tokio::test]
    async fn query_returns_newest_first() {
        let log = EventLog::new();
        for action in ["first", "second", "third"] {
            log.append(record("p1", "a1", EventKind::SystemEvent, action))
                .await
                .unwrap();
        }

        let hits = log.query(&EventFilter::default()).await;
        assert_eq!(hits[0].action, "third");
        assert_eq!(hits[2].action, "first");
    }

    #[tokio::test]
    async fn retention_drops_oldest_records() {
        let log = EventLog::with_capacity(2);
        for action in ["first", "second", "third"] {
            log.append(record("p1", "a1", EventKind::SystemEvent, action))
                .await
                .unwrap();
        }

        assert_eq!(log.len().await, 2);
        let hits = log.query(&EventFilter::default()).await;
        assert!(hits.iter().all(|r| r.action != "first"));
    }

    #[tokio::test]
    async fn search_is_case_insensitive() {
        let log = EventLog::new();
        log.append(record("p1", "a1", EventKind::Approval, "approval_granted"))
            .await
            .unwrap();

        let hits = log.search("APPROVAL", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(log.search("nonexistent", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn archive_export_writes_gzipped_tar() {
        let log = EventLog::new();
        for i in 0..5 {
            log.append(record("p1", "a1", EventKind::SystemEvent, &format!("event-{i}")))
                .await
                .unwrap();
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.tar.gz");
        let exported = log.export_archive(&path, None, None).await.unwrap();

        assert_eq!(exported, 5);
        let bytes = std::fs::read(&path).unwrap();
        // gzip magic number
        assert_eq!(bytes[0], 0x1f);
        assert_eq!(bytes[1], 0x8b);
    }
}
