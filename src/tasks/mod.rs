//! Task storage, hierarchy navigation, and progress rollup.
//!
//! Tasks form a tree through `parent_task_id`/`subtask_ids` plus a
//! separate dependency graph; both must stay acyclic. Progress rolls up:
//! a parent's percentage is the mean of its children's, and a parent whose
//! children are all completed is completed itself.

use crate::{
    events::{EventKind, EventRecord, EventSink},
    models::AgentProfile,
    FleetError, Result,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Epic,
    Story,
    Task,
    Subtask,
    Bug,
    Research,
}

impl TaskType {
    /// Complexity weight used by hierarchy-aware assignment
    pub fn complexity(&self) -> u8 {
        match self {
            TaskType::Epic => 10,
            TaskType::Story => 7,
            TaskType::Task => 5,
            TaskType::Subtask => 3,
            TaskType::Bug => 4,
            TaskType::Research => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Draft,
    Assigned,
    InProgress,
    Blocked,
    Review,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl TaskPriority {
    /// Sort rank, lower sorts first
    pub fn rank(&self) -> u8 {
        match self {
            TaskPriority::Critical => 0,
            TaskPriority::High => 1,
            TaskPriority::Medium => 2,
            TaskPriority::Low => 3,
        }
    }

    /// Score multiplier used by hierarchy-aware assignment
    pub fn factor(&self) -> f64 {
        match self {
            TaskPriority::Critical => 1.2,
            TaskPriority::High => 1.1,
            TaskPriority::Medium => 1.0,
            TaskPriority::Low => 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub created_by: String,
    pub assigned_to: Option<String>,
    pub parent_task_id: Option<String>,
    pub subtask_ids: Vec<String>,
    pub dependencies: HashSet<String>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub required_skills: HashSet<String>,
    pub file_paths: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub progress_percentage: u8,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Parameters for task creation; optional fields default to empty
#[derive(Debug, Clone)]
pub struct NewTask {
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub created_by: String,
    pub priority: TaskPriority,
    pub parent_task_id: Option<String>,
    pub required_skills: HashSet<String>,
    pub estimated_hours: Option<f64>,
    pub due_date: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub file_paths: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl NewTask {
    pub fn new(
        project_id: impl Into<String>,
        title: impl Into<String>,
        task_type: TaskType,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            title: title.into(),
            description: String::new(),
            task_type,
            created_by: created_by.into(),
            priority: TaskPriority::Medium,
            parent_task_id: None,
            required_skills: HashSet::new(),
            estimated_hours: None,
            due_date: None,
            tags: Vec::new(),
            file_paths: Vec::new(),
            acceptance_criteria: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_task_id = Some(parent_id.into());
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_skill(mut self, skill: impl Into<String>) -> Self {
        self.required_skills.insert(skill.into());
        self
    }

    pub fn with_estimate(mut self, hours: f64) -> Self {
        self.estimated_hours = Some(hours);
        self
    }

    pub fn with_due_date(mut self, due: DateTime<Utc>) -> Self {
        self.due_date = Some(due);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Assignment history record, one per (re)assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub id: String,
    pub task_id: String,
    pub agent_id: String,
    pub assigned_by: String,
    pub assigned_at: DateTime<Utc>,
    pub reason: String,
}

/// Hierarchy view: root-first parent chain plus immediate children
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskHierarchy {
    pub task: Task,
    pub parent_chain: Vec<Task>,
    pub children: Vec<Task>,
    pub total_subtasks: usize,
    pub completed_subtasks: usize,
}

/// Filter for task listing; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub project_id: Option<String>,
    pub assigned_to: Option<String>,
    pub task_type: Option<TaskType>,
    pub status: Option<TaskStatus>,
}

/// Suggested child task from a breakdown of an epic or story
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakdownSuggestion {
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub estimated_hours: f64,
}

#[derive(Default)]
struct TaskState {
    tasks: HashMap<String, Task>,
    agents: HashMap<String, AgentProfile>,
    assignments: Vec<AssignmentRecord>,
}

/// Task and agent store for the whole fleet
///
/// One async RwLock guards the state, which serializes writes per task and
/// per agent; reads observe a point-in-time snapshot.
pub struct TaskStore {
    state: Arc<RwLock<TaskState>>,
    events: Arc<dyn EventSink>,
}

impl TaskStore {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            state: Arc::new(RwLock::new(TaskState::default())),
            events,
        }
    }

    // --- agents -----------------------------------------------------------

    /// Register an agent. The reporting graph must stay acyclic and the
    /// named manager must exist.
    pub async fn register_agent(&self, agent: AgentProfile) -> Result<()> {
        let mut state = self.state.write().await;

        if let Some(manager_id) = &agent.reports_to {
            if manager_id == &agent.id {
                return Err(FleetError::InvalidArgument(format!(
                    "agent {} cannot report to itself",
                    agent.id
                )));
            }
            if !state.agents.contains_key(manager_id) {
                return Err(FleetError::NotFound(format!("manager {manager_id}")));
            }
            // Walking up from the manager must never reach the new agent
            let mut cursor = Some(manager_id.clone());
            while let Some(current) = cursor {
                if current == agent.id {
                    return Err(FleetError::Conflict(format!(
                        "registering {} would create a reporting cycle",
                        agent.id
                    )));
                }
                cursor = state.agents.get(&current).and_then(|a| a.reports_to.clone());
            }
        }

        if let Some(manager_id) = agent.reports_to.clone() {
            if let Some(manager) = state.agents.get_mut(&manager_id) {
                manager.direct_reports.insert(agent.id.clone());
            }
        }
        state.agents.insert(agent.id.clone(), agent);
        Ok(())
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<AgentProfile> {
        let state = self.state.read().await;
        state
            .agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| FleetError::NotFound(format!("agent {agent_id}")))
    }

    pub async fn list_agents(&self) -> Vec<AgentProfile> {
        let state = self.state.read().await;
        let mut agents: Vec<AgentProfile> = state.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    /// Adjust an agent's committed workload; clamps at zero
    pub async fn adjust_workload(&self, agent_id: &str, delta_hours: f64) -> Result<f64> {
        let mut state = self.state.write().await;
        let agent = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| FleetError::NotFound(format!("agent {agent_id}")))?;
        agent.current_workload = (agent.current_workload + delta_hours).max(0.0);
        Ok(agent.current_workload)
    }

    // --- tasks ------------------------------------------------------------

    pub async fn create_task(&self, new_task: NewTask) -> Result<Task> {
        if new_task.title.trim().is_empty() {
            return Err(FleetError::InvalidArgument("task title cannot be empty".to_string()));
        }

        let now = Utc::now();
        let task = Task {
            id: format!("task_{}", &Uuid::new_v4().simple().to_string()[..8]),
            project_id: new_task.project_id,
            title: new_task.title,
            description: new_task.description,
            task_type: new_task.task_type,
            status: TaskStatus::Draft,
            priority: new_task.priority,
            created_by: new_task.created_by,
            assigned_to: None,
            parent_task_id: new_task.parent_task_id,
            subtask_ids: Vec::new(),
            dependencies: HashSet::new(),
            estimated_hours: new_task.estimated_hours,
            actual_hours: None,
            due_date: new_task.due_date,
            created_at: now,
            updated_at: now,
            completed_at: None,
            tags: new_task.tags,
            required_skills: new_task.required_skills,
            file_paths: new_task.file_paths,
            acceptance_criteria: new_task.acceptance_criteria,
            progress_percentage: 0,
            metadata: new_task.metadata,
        };

        let mut state = self.state.write().await;
        if let Some(parent_id) = &task.parent_task_id {
            let parent = state
                .tasks
                .get(parent_id)
                .ok_or_else(|| FleetError::NotFound(format!("parent task {parent_id}")))?;
            if parent.project_id != task.project_id {
                return Err(FleetError::InvalidArgument(
                    "parent task belongs to a different project".to_string(),
                ));
            }
        }

        state.tasks.insert(task.id.clone(), task.clone());
        if let Some(parent_id) = task.parent_task_id.clone() {
            if let Some(parent) = state.tasks.get_mut(&parent_id) {
                parent.subtask_ids.push(task.id.clone());
                parent.updated_at = now;
            }
        }
        drop(state);

        self.events
            .append(
                EventRecord::new(
                    &task.project_id,
                    &task.created_by,
                    EventKind::TaskAssignment,
                    "task_created",
                    format!("created {:?}: {}", task.task_type, task.title),
                )
                .with_context("task_id", serde_json::json!(task.id)),
            )
            .await?;

        Ok(task)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Task> {
        let state = self.state.read().await;
        state
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| FleetError::NotFound(format!("task {task_id}")))
    }

    /// Move a task under a new parent (or detach it). Rejects moves that
    /// would put a task underneath its own subtree.
    pub async fn reparent_task(&self, task_id: &str, new_parent: Option<&str>) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.tasks.contains_key(task_id) {
            return Err(FleetError::NotFound(format!("task {task_id}")));
        }

        if let Some(parent_id) = new_parent {
            if !state.tasks.contains_key(parent_id) {
                return Err(FleetError::NotFound(format!("parent task {parent_id}")));
            }
            // The new parent must not be the task itself or any descendant
            let mut cursor = Some(parent_id.to_string());
            while let Some(current) = cursor {
                if current == task_id {
                    return Err(FleetError::Conflict(format!(
                        "reparenting {task_id} under {parent_id} would create a cycle"
                    )));
                }
                cursor = state
                    .tasks
                    .get(&current)
                    .and_then(|t| t.parent_task_id.clone());
            }
        }

        let old_parent = state
            .tasks
            .get(task_id)
            .and_then(|t| t.parent_task_id.clone());
        if let Some(old_parent_id) = old_parent {
            if let Some(parent) = state.tasks.get_mut(&old_parent_id) {
                parent.subtask_ids.retain(|id| id != task_id);
            }
        }

        if let Some(task) = state.tasks.get_mut(task_id) {
            task.parent_task_id = new_parent.map(|s| s.to_string());
            task.updated_at = Utc::now();
        }
        if let Some(parent_id) = new_parent {
            if let Some(parent) = state.tasks.get_mut(parent_id) {
                parent.subtask_ids.push(task_id.to_string());
            }
        }
        Ok(())
    }

    /// Delete a task. A task with subtasks requires `cascade`; otherwise
    /// reparent the children first.
    pub async fn delete_task(&self, task_id: &str, cascade: bool) -> Result<usize> {
        let mut state = self.state.write().await;
        let task = state
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| FleetError::NotFound(format!("task {task_id}")))?;

        if !task.subtask_ids.is_empty() && !cascade {
            return Err(FleetError::Conflict(format!(
                "task {task_id} has {} subtasks; delete them or reparent first",
                task.subtask_ids.len()
            )));
        }

        let mut to_delete = vec![task_id.to_string()];
        let mut queue: Vec<String> = task.subtask_ids.clone();
        while let Some(id) = queue.pop() {
            if let Some(child) = state.tasks.get(&id) {
                queue.extend(child.subtask_ids.clone());
            }
            to_delete.push(id);
        }

        for id in &to_delete {
            state.tasks.remove(id);
        }
        if let Some(parent_id) = &task.parent_task_id {
            if let Some(parent) = state.tasks.get_mut(parent_id) {
                parent.subtask_ids.retain(|id| id != task_id);
            }
        }
        // Dangling dependency references are dropped with the task
        let deleted: HashSet<&String> = to_delete.iter().collect();
        for remaining in state.tasks.values_mut() {
            remaining.dependencies.retain(|dep| !deleted.contains(dep));
        }

        Ok(to_delete.len())
    }

    /// Declare that `task_id` depends on `depends_on`. The dependency
    /// graph must stay acyclic.
    pub async fn link_dependency(&self, task_id: &str, depends_on: &str) -> Result<()> {
        if task_id == depends_on {
            return Err(FleetError::InvalidArgument(
                "a task cannot depend on itself".to_string(),
            ));
        }

        let mut state = self.state.write().await;
        if !state.tasks.contains_key(task_id) {
            return Err(FleetError::NotFound(format!("task {task_id}")));
        }
        if !state.tasks.contains_key(depends_on) {
            return Err(FleetError::NotFound(format!("task {depends_on}")));
        }

        // Reject if task_id is reachable from depends_on through existing edges
        let mut queue = vec![depends_on.to_string()];
        let mut seen = HashSet::new();
        while let Some(current) = queue.pop() {
            if current == task_id {
                return Err(FleetError::Conflict(format!(
                    "dependency {task_id} -> {depends_on} would create a cycle"
                )));
            }
            if seen.insert(current.clone()) {
                if let Some(task) = state.tasks.get(&current) {
                    queue.extend(task.dependencies.iter().cloned());
                }
            }
        }

        if let Some(task) = state.tasks.get_mut(task_id) {
            task.dependencies.insert(depends_on.to_string());
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    /// Assign a task to an agent. Task mutation, workload delta, and the
    /// history record commit together under the store's write lock; a
    /// failed precondition leaves no partial state.
    pub async fn assign(
        &self,
        task_id: &str,
        agent_id: &str,
        assigned_by: &str,
        reason: &str,
    ) -> Result<Task> {
        let mut state = self.state.write().await;

        let task = state
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| FleetError::NotFound(format!("task {task_id}")))?;
        let agent = state
            .agents
            .get(agent_id)
            .ok_or_else(|| FleetError::NotFound(format!("agent {agent_id}")))?;

        let estimate = task.estimated_hours.unwrap_or(0.0);
        let already_assigned = task.assigned_to.as_deref() == Some(agent_id);
        if !already_assigned && agent.current_workload + estimate > agent.max_workload {
            return Err(FleetError::CapacityExceeded(format!(
                "agent {agent_id} at {:.1}/{:.1}h cannot absorb {estimate:.1}h",
                agent.current_workload, agent.max_workload
            )));
        }

        // Reassignment hands the estimate back to the previous assignee
        if let Some(previous) = task.assigned_to.clone() {
            if previous != agent_id {
                if let Some(prev_agent) = state.agents.get_mut(&previous) {
                    prev_agent.current_workload =
                        (prev_agent.current_workload - estimate).max(0.0);
                }
            }
        }

        let now = Utc::now();
        if !already_assigned {
            if let Some(agent) = state.agents.get_mut(agent_id) {
                agent.current_workload += estimate;
            }
        }
        let updated = {
            let task = state
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| FleetError::NotFound(format!("task {task_id}")))?;
            task.assigned_to = Some(agent_id.to_string());
            task.status = TaskStatus::Assigned;
            task.updated_at = now;
            task.clone()
        };
        state.assignments.push(AssignmentRecord {
            id: format!("assign_{}", &Uuid::new_v4().simple().to_string()[..8]),
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
            assigned_by: assigned_by.to_string(),
            assigned_at: now,
            reason: reason.to_string(),
        });
        drop(state);

        // Assignment is audit-critical, so the append is awaited.
        self.events
            .append(
                EventRecord::new(
                    &updated.project_id,
                    assigned_by,
                    EventKind::TaskAssignment,
                    "task_assigned",
                    format!("assigned '{}' to {agent_id}", updated.title),
                )
                .with_context("task_id", serde_json::json!(task_id))
                .with_context("assigned_to", serde_json::json!(agent_id))
                .with_context("reason", serde_json::json!(reason)),
            )
            .await?;

        Ok(updated)
    }

    pub async fn assignment_history(&self, task_id: &str) -> Vec<AssignmentRecord> {
        let state = self.state.read().await;
        state
            .assignments
            .iter()
            .filter(|record| record.task_id == task_id)
            .cloned()
            .collect()
    }

    /// Update progress, clamping to [0, 100]. Reaching 100 completes the
    /// task and stamps `completed_at`, then ancestors recompute their
    /// progress as the mean of their children's.
    pub async fn update_progress(
        &self,
        task_id: &str,
        progress: u8,
        status: Option<TaskStatus>,
        actual_hours: Option<f64>,
    ) -> Result<Task> {
        let mut state = self.state.write().await;
        if !state.tasks.contains_key(task_id) {
            return Err(FleetError::NotFound(format!("task {task_id}")));
        }

        let now = Utc::now();
        let progress = progress.min(100);
        let parent_id = {
            let task = state
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| FleetError::NotFound(format!("task {task_id}")))?;
            task.progress_percentage = progress;
            task.updated_at = now;
            if let Some(status) = status {
                task.status = status;
            }
            if let Some(hours) = actual_hours {
                task.actual_hours = Some(hours);
            }
            if progress >= 100 {
                task.status = TaskStatus::Completed;
                task.completed_at = Some(now);
            }
            task.parent_task_id.clone()
        };

        // Rollup terminates at the root because the parent graph is a tree
        let mut cursor = parent_id;
        while let Some(current_id) = cursor {
            cursor = Self::recompute_parent(&mut state, &current_id, now);
        }

        let updated = state
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| FleetError::NotFound(format!("task {task_id}")))?;
        drop(state);

        self.events
            .append(
                EventRecord::new(
                    &updated.project_id,
                    updated.assigned_to.as_deref().unwrap_or("system"),
                    EventKind::TaskAssignment,
                    "task_progress_updated",
                    format!("'{}' now at {progress}%", updated.title),
                )
                .with_context("task_id", serde_json::json!(task_id)),
            )
            .await?;

        Ok(updated)
    }

    /// Recompute one parent from its children; returns the grandparent id
    /// when the walk should continue.
    fn recompute_parent(
        state: &mut TaskState,
        parent_id: &str,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let parent = state.tasks.get(parent_id)?;
        if parent.subtask_ids.is_empty() {
            return None;
        }

        let mut total: u32 = 0;
        let mut completed = 0usize;
        let mut counted = 0usize;
        for child_id in &parent.subtask_ids {
            if let Some(child) = state.tasks.get(child_id) {
                total += child.progress_percentage as u32;
                counted += 1;
                if child.status == TaskStatus::Completed {
                    completed += 1;
                }
            }
        }
        if counted == 0 {
            return None;
        }

        let mean = (total / counted as u32) as u8;
        let all_done = completed == counted;
        let grandparent = parent.parent_task_id.clone();

        let parent = state.tasks.get_mut(parent_id)?;
        parent.progress_percentage = mean;
        parent.updated_at = now;
        if all_done {
            parent.status = TaskStatus::Completed;
            parent.completed_at = Some(now);
        }

        grandparent
    }

    pub async fn get_hierarchy(&self, task_id: &str) -> Result<TaskHierarchy> {
        let state = self.state.read().await;
        let task = state
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| FleetError::NotFound(format!("task {task_id}")))?;

        let mut parent_chain = Vec::new();
        let mut cursor = task.parent_task_id.clone();
        while let Some(parent_id) = cursor {
            match state.tasks.get(&parent_id) {
                Some(parent) => {
                    cursor = parent.parent_task_id.clone();
                    parent_chain.push(parent.clone());
                }
                None => break,
            }
        }
        parent_chain.reverse(); // root first

        let children: Vec<Task> = task
            .subtask_ids
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .cloned()
            .collect();
        let completed_subtasks = children
            .iter()
            .filter(|c| c.status == TaskStatus::Completed)
            .count();

        Ok(TaskHierarchy {
            total_subtasks: task.subtask_ids.len(),
            completed_subtasks,
            task,
            parent_chain,
            children,
        })
    }

    /// List tasks matching the filter, ordered by (priority, due date,
    /// creation time) with missing due dates sorting last.
    pub async fn list_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        let state = self.state.read().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|task| {
                filter
                    .project_id
                    .as_ref()
                    .map(|p| &task.project_id == p)
                    .unwrap_or(true)
                    && filter
                        .assigned_to
                        .as_ref()
                        .map(|a| task.assigned_to.as_ref() == Some(a))
                        .unwrap_or(true)
                    && filter.task_type.map(|t| task.task_type == t).unwrap_or(true)
                    && filter.status.map(|s| task.status == s).unwrap_or(true)
            })
            .cloned()
            .collect();

        tasks.sort_by(|a, b| {
            a.priority
                .rank()
                .cmp(&b.priority.rank())
                .then_with(|| match (a.due_date, b.due_date) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                })
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        tasks
    }

    /// Suggest a standard breakdown for epics and stories. Other task
    /// types are already leaf-sized.
    pub async fn suggest_breakdown(&self, task_id: &str) -> Result<Vec<BreakdownSuggestion>> {
        let task = self.get_task(task_id).await?;

        let suggestions = match task.task_type {
            TaskType::Epic => {
                let estimate = task.estimated_hours.unwrap_or(40.0);
                vec![
                    BreakdownSuggestion {
                        title: format!("Research and planning for {}", task.title),
                        description: "Research requirements and produce a detailed plan".to_string(),
                        task_type: TaskType::Story,
                        estimated_hours: estimate * 0.2,
                    },
                    BreakdownSuggestion {
                        title: format!("Core implementation of {}", task.title),
                        description: "Main implementation work".to_string(),
                        task_type: TaskType::Story,
                        estimated_hours: estimate * 0.6,
                    },
                    BreakdownSuggestion {
                        title: format!("Testing and documentation for {}", task.title),
                        description: "Testing, documentation, and cleanup".to_string(),
                        task_type: TaskType::Story,
                        estimated_hours: estimate * 0.2,
                    },
                ]
            }
            TaskType::Story => {
                let estimate = task.estimated_hours.unwrap_or(8.0);
                vec![
                    BreakdownSuggestion {
                        title: format!("Setup for {}", task.title),
                        description: "Initial setup and scaffolding".to_string(),
                        task_type: TaskType::Task,
                        estimated_hours: estimate * 0.3,
                    },
                    BreakdownSuggestion {
                        title: format!("Implementation of {}", task.title),
                        description: "Core implementation".to_string(),
                        task_type: TaskType::Task,
                        estimated_hours: estimate * 0.5,
                    },
                    BreakdownSuggestion {
                        title: format!("Testing {}", task.title),
                        description: "Unit and integration tests".to_string(),
                        task_type: TaskType::Task,
                        estimated_hours: estimate * 0.2,
                    },
                ]
            }
            _ => Vec::new(),
        };

        Ok(suggestions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullEventSink;
    use crate::models::{AgentProfile, AgentRole};

    fn store() -> TaskStore {
        TaskStore::new(Arc::new(NullEventSink))
    }

    async fn agent(store: &TaskStore, id: &str, max_hours: f64) {
        store
            .register_agent(
                AgentProfile::new(id, id.to_uppercase(), AgentRole::IndividualContributor)
                    .with_max_workload(max_hours),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_task_links_parent() {
        let store = store();
        let epic = store
            .create_task(NewTask::new("p1", "Build auth", TaskType::Epic, "ceo"))
            .await
            .unwrap();
        let story = store
            .create_task(
                NewTask::new("p1", "Login flow", TaskType::Story, "ceo").with_parent(&epic.id),
            )
            .await
            .unwrap();

        let parent = store.get_task(&epic.id).await.unwrap();
        assert_eq!(parent.subtask_ids, vec![story.id.clone()]);
        assert_eq!(story.status, TaskStatus::Draft);
    }

    #[tokio::test]
    async fn missing_parent_is_rejected() {
        let store = store();
        let result = store
            .create_task(NewTask::new("p1", "Orphan", TaskType::Task, "ceo").with_parent("task_nope"))
            .await;
        assert!(matches!(result, Err(FleetError::NotFound(_))));
    }

    #[tokio::test]
    async fn reparent_rejects_cycles() {
        let store = store();
        let a = store
            .create_task(NewTask::new("p1", "A", TaskType::Epic, "ceo"))
            .await
            .unwrap();
        let b = store
            .create_task(NewTask::new("p1", "B", TaskType::Story, "ceo").with_parent(&a.id))
            .await
            .unwrap();
        let c = store
            .create_task(NewTask::new("p1", "C", TaskType::Task, "ceo").with_parent(&b.id))
            .await
            .unwrap();

        let result = store.reparent_task(&a.id, Some(&c.id)).await;
        assert!(matches!(result, Err(FleetError::Conflict(_))));
        // Valid moves still work
        store.reparent_task(&c.id, Some(&a.id)).await.unwrap();
    }

    #[tokio::test]
    async fn dependency_cycles_are_rejected() {
        let store = store();
        let a = store
            .create_task(NewTask::new("p1", "A", TaskType::Task, "ceo"))
            .await
            .unwrap();
        let b = store
            .create_task(NewTask::new("p1", "B", TaskType::Task, "ceo"))
            .await
            .unwrap();
        let c = store
            .create_task(NewTask::new("p1", "C", TaskType::Task, "ceo"))
            .await
            .unwrap();

        store.link_dependency(&b.id, &a.id).await.unwrap();
        store.link_dependency(&c.id, &b.id).await.unwrap();
        let result = store.link_dependency(&a.id, &c.id).await;
        assert!(matches!(result, Err(FleetError::Conflict(_))));
        let result = store.link_dependency(&a.id, &a.id).await;
        assert!(matches!(result, Err(FleetError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn assignment_moves_workload_atomically() {
        let store = store();
        agent(&store, "dev1", 40.0).await;
        let task = store
            .create_task(NewTask::new("p1", "Feature", TaskType::Task, "pm").with_estimate(8.0))
            .await
            .unwrap();

        let assigned = store.assign(&task.id, "dev1", "pm", "manual").await.unwrap();
        assert_eq!(assigned.status, TaskStatus::Assigned);
        assert_eq!(assigned.assigned_to.as_deref(), Some("dev1"));
        assert_eq!(store.get_agent("dev1").await.unwrap().current_workload, 8.0);
        assert_eq!(store.assignment_history(&task.id).await.len(), 1);
    }

    #[tokio::test]
    async fn assignment_respects_capacity() {
        let store = store();
        agent(&store, "dev1", 10.0).await;
        let task = store
            .create_task(NewTask::new("p1", "Big", TaskType::Task, "pm").with_estimate(16.0))
            .await
            .unwrap();

        let result = store.assign(&task.id, "dev1", "pm", "manual").await;
        assert!(matches!(result, Err(FleetError::CapacityExceeded(_))));
        // Nothing committed: no workload, no history, task untouched
        assert_eq!(store.get_agent("dev1").await.unwrap().current_workload, 0.0);
        assert!(store.assignment_history(&task.id).await.is_empty());
        assert_eq!(store.get_task(&task.id).await.unwrap().status, TaskStatus::Draft);
    }

    #[tokio::test]
    async fn reassignment_returns_hours_to_previous_assignee() {
        let store = store();
        agent(&store, "dev1", 40.0).await;
        agent(&store, "dev2", 40.0).await;
        let task = store
            .create_task(NewTask::new("p1", "Feature", TaskType::Task, "pm").with_estimate(8.0))
            .await
            .unwrap();

        store.assign(&task.id, "dev1", "pm", "manual").await.unwrap();
        store.assign(&task.id, "dev2", "pm", "rebalance").await.unwrap();

        assert_eq!(store.get_agent("dev1").await.unwrap().current_workload, 0.0);
        assert_eq!(store.get_agent("dev2").await.unwrap().current_workload, 8.0);
    }

    #[tokio::test]
    async fn progress_rolls_up_to_parent() {
        // Scenario: children at 100, 100, 50, 0; finishing the third puts
        // the parent at 75; finishing the last completes the parent.
        let store = store();
        let epic = store
            .create_task(NewTask::new("p1", "Epic", TaskType::Epic, "ceo"))
            .await
            .unwrap();
        let mut children = Vec::new();
        for i in 0..4 {
            children.push(
                store
                    .create_task(
                        NewTask::new("p1", format!("T{}", i + 1), TaskType::Task, "ceo")
                            .with_parent(&epic.id),
                    )
                    .await
                    .unwrap(),
            );
        }

        store.update_progress(&children[0].id, 100, None, None).await.unwrap();
        store.update_progress(&children[1].id, 100, None, None).await.unwrap();
        store
            .update_progress(&children[2].id, 50, Some(TaskStatus::InProgress), None)
            .await
            .unwrap();

        store.update_progress(&children[2].id, 100, None, None).await.unwrap();
        let parent = store.get_task(&epic.id).await.unwrap();
        assert_eq!(parent.progress_percentage, 75);
        assert_ne!(parent.status, TaskStatus::Completed);

        store.update_progress(&children[3].id, 100, None, None).await.unwrap();
        let parent = store.get_task(&epic.id).await.unwrap();
        assert_eq!(parent.progress_percentage, 100);
        assert_eq!(parent.status, TaskStatus::Completed);
        assert!(parent.completed_at.is_some());
    }

    #[tokio::test]
    async fn rollup_recurses_to_grandparent() {
        let store = store();
        let epic = store
            .create_task(NewTask::new("p1", "Epic", TaskType::Epic, "ceo"))
            .await
            .unwrap();
        let story = store
            .create_task(NewTask::new("p1", "Story", TaskType::Story, "ceo").with_parent(&epic.id))
            .await
            .unwrap();
        let task = store
            .create_task(NewTask::new("p1", "Task", TaskType::Task, "ceo").with_parent(&story.id))
            .await
            .unwrap();

        store.update_progress(&task.id, 100, None, None).await.unwrap();

        let story = store.get_task(&story.id).await.unwrap();
        let epic = store.get_task(&epic.id).await.unwrap();
        assert_eq!(story.status, TaskStatus::Completed);
        assert_eq!(epic.status, TaskStatus::Completed);
        assert_eq!(epic.progress_percentage, 100);
    }

    #[tokio::test]
    async fn progress_is_clamped() {
        let store = store();
        let task = store
            .create_task(NewTask::new("p1", "Task", TaskType::Task, "ceo"))
            .await
            .unwrap();
        let updated = store.update_progress(&task.id, 200, None, None).await.unwrap();
        assert_eq!(updated.progress_percentage, 100);
        assert_eq!(updated.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn listing_orders_by_priority_due_date_created() {
        let store = store();
        let due = Utc::now() + chrono::Duration::days(1);
        let low = store
            .create_task(NewTask::new("p1", "Low", TaskType::Task, "pm").with_priority(TaskPriority::Low))
            .await
            .unwrap();
        let critical_no_due = store
            .create_task(
                NewTask::new("p1", "Crit none", TaskType::Task, "pm")
                    .with_priority(TaskPriority::Critical),
            )
            .await
            .unwrap();
        let critical_due = store
            .create_task(
                NewTask::new("p1", "Crit due", TaskType::Task, "pm")
                    .with_priority(TaskPriority::Critical)
                    .with_due_date(due),
            )
            .await
            .unwrap();

        let listed = store
            .list_tasks(&TaskFilter {
                project_id: Some("p1".to_string()),
                ..Default::default()
            })
            .await;
        let ids: Vec<&str> = listed.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![critical_due.id.as_str(), critical_no_due.id.as_str(), low.id.as_str()]);
    }

    #[tokio::test]
    async fn delete_requires_cascade_for_parents() {
        let store = store();
        let epic = store
            .create_task(NewTask::new("p1", "Epic", TaskType::Epic, "ceo"))
            .await
            .unwrap();
        store
            .create_task(NewTask::new("p1", "Child", TaskType::Story, "ceo").with_parent(&epic.id))
            .await
            .unwrap();

        assert!(matches!(
            store.delete_task(&epic.id, false).await,
            Err(FleetError::Conflict(_))
        ));
        assert_eq!(store.delete_task(&epic.id, true).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn reporting_cycle_is_rejected() {
        let store = store();
        store
            .register_agent(AgentProfile::new("ceo", "CEO", AgentRole::Executive))
            .await
            .unwrap();
        store
            .register_agent(
                AgentProfile::new("mm", "MM", AgentRole::MiddleManagement).with_reports_to("ceo"),
            )
            .await
            .unwrap();

        // ceo -> mm would close the loop once mm reports to ceo
        let result = store
            .register_agent(AgentProfile::new("ceo", "CEO", AgentRole::Executive).with_reports_to("mm"))
            .await;
        assert!(matches!(result, Err(FleetError::Conflict(_))));
    }

    #[tokio::test]
    async fn breakdown_suggestions_follow_task_type() {
        let store = store();
        let epic = store
            .create_task(NewTask::new("p1", "Epic", TaskType::Epic, "ceo").with_estimate(40.0))
            .await
            .unwrap();
        let suggestions = store.suggest_breakdown(&epic.id).await.unwrap();
        assert_eq!(suggestions.len(), 3);
        assert!(suggestions.iter().all(|s| s.task_type == TaskType::Story));
        let total: f64 = suggestions.iter().map(|s| s.estimated_hours).sum();
        assert!((total - 40.0).abs() < 1e-9);

        let bug = store
            .create_task(NewTask::new("p1", "Bug", TaskType::Bug, "qa"))
            .await
            .unwrap();
        assert!(store.suggest_breakdown(&bug.id).await.unwrap().is_empty());
    }
}
