//! Per-project file lock manager.
//!
//! Serializes concurrent access to workspace paths across agents. Grants
//! are immediate when compatible with the active set; everything else
//! queues FIFO per path. Contention is not an error: callers get a pending
//! lock back and are promoted when the path frees up.

use crate::{
    events::{EventKind, EventLevel, EventRecord, EventSink},
    FleetError, Result,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    Read,
    Write,
    Exclusive,
}

impl LockKind {
    /// Compatibility matrix: read pairs with read, everything else excludes
    pub fn compatible_with(&self, other: LockKind) -> bool {
        matches!((self, other), (LockKind::Read, LockKind::Read))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LockStatus {
    Active,
    Pending,
    Expired,
    Released,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLock {
    pub id: String,
    pub project_id: String,
    pub agent_id: String,
    pub path: String,
    pub kind: LockKind,
    pub status: LockStatus,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub timeout_secs: u64,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Outcome of an acquire call: contention yields a queued lock, never an error
#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    Granted(FileLock),
    Queued(FileLock),
}

impl AcquireOutcome {
    pub fn lock(&self) -> &FileLock {
        match self {
            AcquireOutcome::Granted(lock) | AcquireOutcome::Queued(lock) => lock,
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, AcquireOutcome::Granted(_))
    }
}

/// Result of a non-binding access probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessCheck {
    pub allowed: bool,
    pub blocking_locks: Vec<FileLock>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Multiple write-class locks active on one path; indicates a bug
    ConcurrentWrites,
    /// File modified on disk after a holder acquired its lock
    ModifiedAfterAcquisition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConflict {
    pub kind: ConflictKind,
    pub path: String,
    pub agents: Vec<String>,
    pub detail: String,
}

#[derive(Default)]
struct LockState {
    locks: HashMap<String, FileLock>,
    /// path -> active lock ids
    by_path: HashMap<String, HashSet<String>>,
    /// agent -> active lock ids
    by_agent: HashMap<String, HashSet<String>>,
    /// path -> pending lock ids in arrival order
    pending: HashMap<String, VecDeque<String>>,
}

/// Lock manager for a single project
///
/// All mutations go through one write lock, so individual releases are
/// atomic and the expiry sweep is idempotent by construction.
pub struct LockManager {
    project_id: String,
    default_timeout_secs: u64,
    state: Arc<RwLock<LockState>>,
    events: Arc<dyn EventSink>,
}

impl LockManager {
    pub fn new(
        project_id: impl Into<String>,
        default_timeout_secs: u64,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            default_timeout_secs,
            state: Arc::new(RwLock::new(LockState::default())),
            events,
        }
    }

    /// Acquire a lock on `path`, or queue the request FIFO when the path
    /// is contended. Same-agent re-acquisition never blocks on the agent's
    /// own locks.
    pub async fn acquire(
        &self,
        agent_id: &str,
        path: &str,
        kind: LockKind,
        timeout_secs: Option<u64>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<AcquireOutcome> {
        let path = normalize_path(path)?;
        let timeout_secs = timeout_secs.unwrap_or(self.default_timeout_secs);
        let now = Utc::now();

        let mut state = self.state.write().await;

        let grantable = Self::can_grant(&state, agent_id, &path, kind)
            && !Self::has_foreign_pending(&state, agent_id, &path);

        let status = if grantable {
            LockStatus::Active
        } else {
            LockStatus::Pending
        };
        let prefix = if grantable { "lock" } else { "pending" };
        let lock = FileLock {
            id: format!("{prefix}_{}", &Uuid::new_v4().simple().to_string()[..8]),
            project_id: self.project_id.clone(),
            agent_id: agent_id.to_string(),
            path: path.clone(),
            kind,
            status,
            acquired_at: now,
            expires_at: now + Duration::seconds(timeout_secs as i64),
            timeout_secs,
            metadata,
        };

        state.locks.insert(lock.id.clone(), lock.clone());
        if grantable {
            state.by_path.entry(path.clone()).or_default().insert(lock.id.clone());
            state
                .by_agent
                .entry(agent_id.to_string())
                .or_default()
                .insert(lock.id.clone());
        } else {
            state.pending.entry(path.clone()).or_default().push_back(lock.id.clone());
        }
        drop(state);

        // Lock grants are audit-critical, so the append is awaited.
        let action = if grantable { "lock_acquired" } else { "lock_queued" };
        self.events
            .append(
                EventRecord::new(
                    &self.project_id,
                    agent_id,
                    EventKind::LockActivity,
                    action,
                    format!("{action}: {kind:?} on {path}"),
                )
                .with_context("lock_id", serde_json::json!(lock.id))
                .with_context("path", serde_json::json!(path)),
            )
            .await?;

        Ok(if grantable {
            AcquireOutcome::Granted(lock)
        } else {
            AcquireOutcome::Queued(lock)
        })
    }

    /// Release a lock. Idempotent on unknown or already-released ids
    /// (returns `Ok(false)`); fails the holder check the same way.
    pub async fn release(&self, lock_id: &str, agent_id: Option<&str>) -> Result<bool> {
        let mut state = self.state.write().await;

        let lock = match state.locks.get(lock_id) {
            Some(lock) => lock.clone(),
            None => return Ok(false),
        };
        if let Some(agent_id) = agent_id {
            if lock.agent_id != agent_id {
                return Ok(false);
            }
        }

        Self::remove_lock(&mut state, lock_id, LockStatus::Released);
        let promoted = Self::promote_pending(&mut state, &lock.path);
        drop(state);

        self.log_release(&lock, "lock_released", EventLevel::Info).await?;
        self.log_promotions(&promoted).await?;
        Ok(true)
    }

    /// Non-binding probe: could `agent_id` access `path` right now?
    pub async fn check_access(
        &self,
        agent_id: &str,
        path: &str,
        kind: LockKind,
    ) -> Result<AccessCheck> {
        let path = normalize_path(path)?;
        let state = self.state.read().await;

        let blocking_locks: Vec<FileLock> = Self::active_on_path(&state, &path)
            .into_iter()
            .filter(|lock| lock.agent_id != agent_id && !kind.compatible_with(lock.kind))
            .collect();

        Ok(AccessCheck {
            allowed: blocking_locks.is_empty(),
            blocking_locks,
        })
    }

    /// All active locks in this project
    pub async fn active_locks(&self) -> Vec<FileLock> {
        let state = self.state.read().await;
        state
            .locks
            .values()
            .filter(|lock| lock.status == LockStatus::Active)
            .cloned()
            .collect()
    }

    pub async fn locks_for_agent(&self, agent_id: &str) -> Vec<FileLock> {
        let state = self.state.read().await;
        state
            .by_agent
            .get(agent_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.locks.get(id))
                    .filter(|lock| lock.status == LockStatus::Active)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn locks_for_path(&self, path: &str) -> Result<Vec<FileLock>> {
        let path = normalize_path(path)?;
        let state = self.state.read().await;
        Ok(Self::active_on_path(&state, &path))
    }

    /// All pending locks in this project, in no particular order
    pub async fn pending_locks(&self) -> Vec<FileLock> {
        let state = self.state.read().await;
        state
            .locks
            .values()
            .filter(|lock| lock.status == LockStatus::Pending)
            .cloned()
            .collect()
    }

    pub async fn pending_locks_for_path(&self, path: &str) -> Result<Vec<FileLock>> {
        let path = normalize_path(path)?;
        let state = self.state.read().await;
        Ok(state
            .pending
            .get(&path)
            .map(|queue| {
                queue
                    .iter()
                    .filter_map(|id| state.locks.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Detect anomalies on a path: concurrent write-class holders (should
    /// not occur absent a bug) and on-disk modification newer than any
    /// holder's acquisition.
    pub async fn detect_conflicts(&self, path: &str) -> Result<Vec<LockConflict>> {
        let normalized = normalize_path(path)?;
        let state = self.state.read().await;
        let active = Self::active_on_path(&state, &normalized);
        drop(state);

        let mut conflicts = Vec::new();

        let writers: Vec<&FileLock> = active
            .iter()
            .filter(|lock| !matches!(lock.kind, LockKind::Read))
            .collect();
        if writers.len() > 1 {
            conflicts.push(LockConflict {
                kind: ConflictKind::ConcurrentWrites,
                path: normalized.clone(),
                agents: writers.iter().map(|l| l.agent_id.clone()).collect(),
                detail: format!("{} write-class locks active simultaneously", writers.len()),
            });
        }

        if let Ok(meta) = std::fs::metadata(&normalized) {
            if let Ok(modified) = meta.modified() {
                let mtime: DateTime<Utc> = modified.into();
                for lock in &active {
                    if mtime > lock.acquired_at {
                        conflicts.push(LockConflict {
                            kind: ConflictKind::ModifiedAfterAcquisition,
                            path: normalized.clone(),
                            agents: vec![lock.agent_id.clone()],
                            detail: format!(
                                "file modified at {mtime} after lock acquired at {}",
                                lock.acquired_at
                            ),
                        });
                    }
                }
            }
        }

        Ok(conflicts)
    }

    /// Administrative: release every lock (active and pending) held by an
    /// agent and promote waiters.
    pub async fn force_release(&self, agent_id: &str) -> Result<usize> {
        let mut state = self.state.write().await;

        let victim_ids: Vec<String> = state
            .locks
            .values()
            .filter(|lock| {
                lock.agent_id == agent_id
                    && matches!(lock.status, LockStatus::Active | LockStatus::Pending)
            })
            .map(|lock| lock.id.clone())
            .collect();

        let mut touched_paths = HashSet::new();
        for id in &victim_ids {
            if let Some(lock) = state.locks.get(id) {
                touched_paths.insert(lock.path.clone());
            }
            Self::remove_lock(&mut state, id, LockStatus::Released);
        }

        let mut promoted = Vec::new();
        for path in &touched_paths {
            promoted.extend(Self::promote_pending(&mut state, path));
        }
        drop(state);

        self.events
            .append(
                EventRecord::new(
                    &self.project_id,
                    "system",
                    EventKind::LockActivity,
                    "force_release_locks",
                    format!("force released {} locks for agent {agent_id}", victim_ids.len()),
                )
                .with_level(EventLevel::Warning),
            )
            .await?;
        self.log_promotions(&promoted).await?;

        Ok(victim_ids.len())
    }

    /// Release every lock whose deadline has passed and promote waiters.
    /// Pending requests time out independently of active locks. Safe to
    /// run at any frequency.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        let expired: Vec<FileLock> = state
            .locks
            .values()
            .filter(|lock| {
                matches!(lock.status, LockStatus::Active | LockStatus::Pending)
                    && lock.expires_at <= now
            })
            .cloned()
            .collect();

        let mut touched_paths = HashSet::new();
        for lock in &expired {
            touched_paths.insert(lock.path.clone());
            Self::remove_lock(&mut state, &lock.id, LockStatus::Expired);
        }

        let mut promoted = Vec::new();
        for path in &touched_paths {
            promoted.extend(Self::promote_pending(&mut state, path));
        }
        drop(state);

        for lock in &expired {
            self.log_release(lock, "lock_expired", EventLevel::Warning).await?;
        }
        self.log_promotions(&promoted).await?;

        Ok(expired.len())
    }

    fn active_on_path(state: &LockState, path: &str) -> Vec<FileLock> {
        state
            .by_path
            .get(path)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.locks.get(id))
                    .filter(|lock| lock.status == LockStatus::Active)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Compatibility against the active set, ignoring the agent's own locks
    fn can_grant(state: &LockState, agent_id: &str, path: &str, kind: LockKind) -> bool {
        Self::active_on_path(state, path)
            .iter()
            .filter(|lock| lock.agent_id != agent_id)
            .all(|lock| kind.compatible_with(lock.kind))
    }

    /// A non-empty queue from other agents blocks fresh grants so that
    /// later-arrived readers cannot jump an earlier pending writer.
    fn has_foreign_pending(state: &LockState, agent_id: &str, path: &str) -> bool {
        state
            .pending
            .get(path)
            .map(|queue| {
                queue
                    .iter()
                    .filter_map(|id| state.locks.get(id))
                    .any(|lock| lock.agent_id != agent_id)
            })
            .unwrap_or(false)
    }

    fn remove_lock(state: &mut LockState, lock_id: &str, final_status: LockStatus) {
        if let Some(mut lock) = state.locks.remove(lock_id) {
            lock.status = final_status;
            if let Some(ids) = state.by_path.get_mut(&lock.path) {
                ids.remove(lock_id);
                if ids.is_empty() {
                    state.by_path.remove(&lock.path);
                }
            }
            if let Some(ids) = state.by_agent.get_mut(&lock.agent_id) {
                ids.remove(lock_id);
                if ids.is_empty() {
                    state.by_agent.remove(&lock.agent_id);
                }
            }
            if let Some(queue) = state.pending.get_mut(&lock.path) {
                queue.retain(|id| id != lock_id);
                if queue.is_empty() {
                    state.pending.remove(&lock.path);
                }
            }
        }
    }

    /// Promote the head of the queue while it remains grantable. A run of
    /// mutually compatible readers at the head is promoted together; the
    /// first incompatible waiter stops the run.
    fn promote_pending(state: &mut LockState, path: &str) -> Vec<FileLock> {
        let mut promoted = Vec::new();

        loop {
            let head_id = match state.pending.get(path).and_then(|q| q.front()) {
                Some(id) => id.clone(),
                None => break,
            };
            let head = match state.locks.get(&head_id) {
                Some(lock) => lock.clone(),
                None => {
                    if let Some(queue) = state.pending.get_mut(path) {
                        queue.pop_front();
                    }
                    continue;
                }
            };

            if !Self::can_grant(state, &head.agent_id, path, head.kind) {
                break;
            }

            let drained = match state.pending.get_mut(path) {
                Some(queue) => {
                    queue.pop_front();
                    queue.is_empty()
                }
                None => false,
            };
            if drained {
                state.pending.remove(path);
            }

            let now = Utc::now();
            if let Some(lock) = state.locks.get_mut(&head_id) {
                lock.status = LockStatus::Active;
                lock.acquired_at = now;
                lock.expires_at = now + Duration::seconds(lock.timeout_secs as i64);
                promoted.push(lock.clone());
            }
            state.by_path.entry(path.to_string()).or_default().insert(head_id.clone());
            state
                .by_agent
                .entry(head.agent_id.clone())
                .or_default()
                .insert(head_id);
        }

        promoted
    }

    async fn log_release(&self, lock: &FileLock, action: &str, level: EventLevel) -> Result<()> {
        self.events
            .append(
                EventRecord::new(
                    &self.project_id,
                    &lock.agent_id,
                    EventKind::LockActivity,
                    action,
                    format!("{action}: {:?} on {}", lock.kind, lock.path),
                )
                .with_level(level)
                .with_context("lock_id", serde_json::json!(lock.id)),
            )
            .await?;
        Ok(())
    }

    async fn log_promotions(&self, promoted: &[FileLock]) -> Result<()> {
        for lock in promoted {
            self.events
                .append(
                    EventRecord::new(
                        &self.project_id,
                        &lock.agent_id,
                        EventKind::LockActivity,
                        "pending_lock_activated",
                        format!("promoted {:?} lock on {}", lock.kind, lock.path),
                    )
                    .with_context("lock_id", serde_json::json!(lock.id)),
                )
                .await?;
        }
        Ok(())
    }
}

/// Lexical path normalization: strips `.` segments, resolves `..` where
/// possible, and collapses separators. Never touches the filesystem.
pub fn normalize_path(path: &str) -> Result<String> {
    if path.trim().is_empty() {
        return Err(FleetError::InvalidArgument("lock path cannot be empty".to_string()));
    }

    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() && !absolute {
                    return Err(FleetError::InvalidArgument(format!(
                        "lock path escapes its root: {path}"
                    )));
                }
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    Ok(if absolute {
        format!("/{joined}")
    } else {
        joined
    })
}
