//! Composition root: owns every component, wires the capability traits,
//! runs the background loops, and implements the cross-component
//! workflows (assignment notifications, context indexing, promotion
//! triggers).
//!
//! Nothing in here is a singleton; construct an [`Orchestrator`] and pass
//! it where it is needed.

use crate::{
    assignment::{AssignmentAlgorithm, AssignmentEngine},
    approvals::{ApprovalEngine, OrgChart},
    config::CoreConfig,
    context::{ContextAssembler, EmbeddingProvider},
    events::{EventLog, EventSink},
    locks::LockManager,
    messaging::{AgentDirectory, MessageBus, MessagePriority, MessageSender},
    models::{AgentProfile, AgentRole, AuthorityLevel, Project},
    monitoring::{AgentDashboard, MetricsRegistry, ProjectDashboard},
    scheduler::{PersonalityProcess, ResourceScheduler},
    tasks::{NewTask, Task, TaskFilter, TaskStore},
    FleetError, Result,
};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tracing::{error, info};

/// Adapter exposing the agent store through the narrow capability traits
/// the bus and the approval engine consume.
struct Roster(Arc<TaskStore>);

#[async_trait::async_trait]
impl AgentDirectory for Roster {
    async fn role_of(&self, agent_id: &str) -> Option<AgentRole> {
        self.0.get_agent(agent_id).await.ok().map(|agent| agent.role)
    }

    async fn roster(&self) -> Vec<(String, AgentRole)> {
        self.0
            .list_agents()
            .await
            .into_iter()
            .map(|agent| (agent.id, agent.role))
            .collect()
    }
}

#[async_trait::async_trait]
impl OrgChart for Roster {
    async fn authority_of(&self, agent_id: &str) -> Option<AuthorityLevel> {
        self.0
            .get_agent(agent_id)
            .await
            .ok()
            .map(|agent| agent.authority())
    }

    async fn manager_of(&self, agent_id: &str) -> Option<String> {
        self.0
            .get_agent(agent_id)
            .await
            .ok()
            .and_then(|agent| agent.reports_to)
    }

    async fn roster_with_authority(&self) -> Vec<(String, AuthorityLevel)> {
        self.0
            .list_agents()
            .await
            .into_iter()
            .map(|agent| (agent.id.clone(), agent.authority()))
            .collect()
    }
}

pub struct Orchestrator {
    config: CoreConfig,
    pub events: Arc<EventLog>,
    pub tasks: Arc<TaskStore>,
    pub bus: Arc<MessageBus>,
    pub scheduler: Arc<ResourceScheduler>,
    pub approvals: Arc<ApprovalEngine>,
    pub context: Arc<ContextAssembler>,
    pub metrics: Arc<MetricsRegistry>,
    projects: RwLock<HashMap<String, Project>>,
    lock_managers: RwLock<HashMap<String, Arc<LockManager>>>,
    /// (UTC day, registrations so far) for the daily scaling limit
    registrations_today: RwLock<(chrono::NaiveDate, usize)>,
}

impl Orchestrator {
    pub fn new(config: CoreConfig) -> Self {
        Self::with_embeddings(config, None)
    }

    pub fn with_embeddings(
        config: CoreConfig,
        embeddings: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Self {
        info!("Initializing fleet coordination substrate");

        let events: Arc<EventLog> = Arc::new(EventLog::new());
        let sink: Arc<dyn EventSink> = events.clone();

        let tasks = Arc::new(TaskStore::new(sink.clone()));
        let roster = Arc::new(Roster(tasks.clone()));
        let bus = Arc::new(MessageBus::new(roster.clone(), sink.clone()));
        let sender: Arc<dyn MessageSender> = bus.clone();
        let scheduler = Arc::new(ResourceScheduler::new(sender.clone()));
        let approvals = Arc::new(ApprovalEngine::new(
            roster,
            sender,
            sink,
            config.allow_roster_fallback,
        ));
        let context = Arc::new(ContextAssembler::new(config.max_chunk_tokens, config.cache_size, embeddings));

        Self {
            config,
            events,
            tasks,
            bus,
            scheduler,
            approvals,
            context,
            metrics: Arc::new(MetricsRegistry::new()),
            projects: RwLock::new(HashMap::new()),
            lock_managers: RwLock::new(HashMap::new()),
            registrations_today: RwLock::new((chrono::Utc::now().date_naive(), 0)),
        }
    }

    // --- projects ---------------------------------------------------------

    pub async fn create_project(&self, name: &str) -> Project {
        let project = Project::new(name);
        let mut projects = self.projects.write().await;
        projects.insert(project.id.clone(), project.clone());
        project
    }

    pub async fn get_project(&self, project_id: &str) -> Result<Project> {
        let projects = self.projects.read().await;
        projects
            .get(project_id)
            .cloned()
            .ok_or_else(|| FleetError::NotFound(format!("project {project_id}")))
    }

    pub async fn list_projects(&self) -> Vec<Project> {
        let projects = self.projects.read().await;
        let mut listed: Vec<Project> = projects.values().cloned().collect();
        listed.sort_by(|a, b| a.id.cmp(&b.id));
        listed
    }

    /// Archival is the only way a project goes away; its resources stay
    /// queryable until then.
    pub async fn archive_project(&self, project_id: &str) -> Result<()> {
        let mut projects = self.projects.write().await;
        let project = projects
            .get_mut(project_id)
            .ok_or_else(|| FleetError::NotFound(format!("project {project_id}")))?;
        project.archived = true;
        Ok(())
    }

    /// Per-project lock manager, created on first use
    pub async fn locks(&self, project_id: &str) -> Arc<LockManager> {
        {
            let managers = self.lock_managers.read().await;
            if let Some(manager) = managers.get(project_id) {
                return manager.clone();
            }
        }
        let mut managers = self.lock_managers.write().await;
        managers
            .entry(project_id.to_string())
            .or_insert_with(|| {
                Arc::new(LockManager::new(
                    project_id,
                    self.config.default_lock_timeout_secs,
                    self.events.clone(),
                ))
            })
            .clone()
    }

    // --- agents -----------------------------------------------------------

    /// Register an agent with both the task store and the scheduler.
    /// Registrations are capped per UTC day by the scaling limit.
    pub async fn register_agent(
        &self,
        profile: AgentProfile,
        specializations: Vec<String>,
        personality: Option<PersonalityProcess>,
    ) -> Result<()> {
        {
            let mut counter = self.registrations_today.write().await;
            let today = chrono::Utc::now().date_naive();
            if counter.0 != today {
                *counter = (today, 0);
            }
            if counter.1 >= self.config.daily_scaling_limit {
                return Err(FleetError::CapacityExceeded(format!(
                    "daily scaling limit of {} registrations reached",
                    self.config.daily_scaling_limit
                )));
            }
            counter.1 += 1;
        }

        let agent_id = profile.id.clone();
        let role = profile.role;
        self.tasks.register_agent(profile).await?;
        self.scheduler
            .register_agent(&agent_id, role, specializations, personality)
            .await;
        Ok(())
    }

    // --- task workflows ---------------------------------------------------

    /// Create a task and index its description for context retrieval
    pub async fn create_task(&self, new_task: NewTask) -> Result<Task> {
        let task = self.tasks.create_task(new_task).await?;

        let body = format!(
            "Task: {}\nType: {:?}\nPriority: {:?}\n{}",
            task.title, task.task_type, task.priority, task.description
        );
        self.context
            .add_content(
                &task.project_id,
                &task.created_by,
                &body,
                crate::context::ChunkType::TaskDescription,
                HashMap::from([("task_id".to_string(), serde_json::json!(task.id))]),
            )
            .await?;

        Ok(task)
    }

    /// Assign a task, notify the assignee, and charge the scheduler for
    /// the context switch
    pub async fn assign_task(
        &self,
        task_id: &str,
        agent_id: &str,
        assigned_by: &str,
        reason: &str,
    ) -> Result<Task> {
        let task = self.tasks.assign(task_id, agent_id, assigned_by, reason).await?;

        self.bus
            .send_direct(
                assigned_by,
                agent_id,
                &format!("Task assigned: {}", task.title),
                &format!(
                    "You have been assigned '{}' ({:?}, priority {:?}).\n\n{}",
                    task.title, task.task_type, task.priority, task.description
                ),
                MessagePriority::High,
                HashMap::from([("task_id".to_string(), serde_json::json!(task.id))]),
            )
            .await?;

        // Assignment changes are a context switch for the assignee
        if let Err(e) = self.scheduler.begin_context_switch(agent_id).await {
            tracing::debug!("assignee not tracked by scheduler: {e}");
        }

        Ok(task)
    }

    /// Pick the best agent and assign, or return None when nobody fits
    pub async fn auto_assign(
        &self,
        task_id: &str,
        assigned_by: &str,
        algorithm: AssignmentAlgorithm,
    ) -> Result<Option<String>> {
        let task = self.tasks.get_task(task_id).await?;
        let agents = self.tasks.list_agents().await;

        let best = AssignmentEngine::select_best(&task, &agents, algorithm);
        match best {
            Some(agent_id) => {
                self.assign_task(task_id, &agent_id, assigned_by, &format!("auto_{algorithm:?}"))
                    .await?;
                Ok(Some(agent_id))
            }
            None => Ok(None),
        }
    }

    // --- dashboards -------------------------------------------------------

    pub async fn project_dashboard(&self, project_id: &str) -> Result<ProjectDashboard> {
        self.get_project(project_id).await?;

        let tasks = self
            .tasks
            .list_tasks(&TaskFilter {
                project_id: Some(project_id.to_string()),
                ..Default::default()
            })
            .await;
        let mut tasks_by_status: HashMap<String, usize> = HashMap::new();
        for task in &tasks {
            *tasks_by_status
                .entry(format!("{:?}", task.status))
                .or_default() += 1;
        }

        let locks = self.locks(project_id).await;
        let active_locks = locks.active_locks().await.len();
        let pending_locks = locks.pending_locks().await.len();

        Ok(ProjectDashboard {
            project_id: project_id.to_string(),
            generated_at: chrono::Utc::now(),
            total_tasks: tasks.len(),
            tasks_by_status,
            active_locks,
            pending_locks,
            pending_approvals: self.approvals.pending_count().await,
            agent_states: self.scheduler.all_statuses().await,
            context: self.context.inventory(project_id).await,
        })
    }

    pub async fn agent_dashboard(&self, agent_id: &str) -> Result<AgentDashboard> {
        let profile = self.tasks.get_agent(agent_id).await?;
        let open_tasks = self
            .tasks
            .list_tasks(&TaskFilter {
                assigned_to: Some(agent_id.to_string()),
                ..Default::default()
            })
            .await
            .iter()
            .filter(|t| !matches!(t.status, crate::tasks::TaskStatus::Completed | crate::tasks::TaskStatus::Cancelled))
            .count();

        let mut held_locks = 0;
        {
            let managers = self.lock_managers.read().await;
            for manager in managers.values() {
                held_locks += manager.locks_for_agent(agent_id).await.len();
            }
        }

        let unread_messages = self.bus.list_messages(agent_id, true, usize::MAX).await.len();

        Ok(AgentDashboard {
            agent_id: agent_id.to_string(),
            generated_at: chrono::Utc::now(),
            current_workload: profile.current_workload,
            max_workload: profile.max_workload,
            open_tasks,
            held_locks,
            unread_messages,
            resource: self.scheduler.status(agent_id).await.ok(),
        })
    }

    // --- background loops -------------------------------------------------

    /// Run every periodic sweep forever. Intended to be raced against the
    /// API server in `main`.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!("Starting background sweeps");

        let lock_sweeper = {
            let this = self.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(std::time::Duration::from_secs(
                    crate::constants::LOCK_SWEEP_INTERVAL_SECS,
                ));
                loop {
                    tick.tick().await;
                    if let Err(e) = this.sweep_locks().await {
                        error!("lock sweep failed: {e}");
                    }
                }
            })
        };

        let message_drainer = {
            let this = self.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(std::time::Duration::from_secs(
                    crate::constants::MESSAGE_DRAIN_INTERVAL_SECS,
                ));
                loop {
                    tick.tick().await;
                    if let Err(e) = this.scheduler.drain_due_messages().await {
                        error!("message drain failed: {e}");
                    }
                }
            })
        };

        let resource_sweeper = {
            let this = self.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(std::time::Duration::from_secs(
                    crate::constants::RESOURCE_SWEEP_INTERVAL_SECS,
                ));
                loop {
                    tick.tick().await;
                    if let Err(e) = this.scheduler.sweep_states().await {
                        error!("resource sweep failed: {e}");
                    }
                }
            })
        };

        let escalation_sweeper = {
            let this = self.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(std::time::Duration::from_secs(
                    crate::constants::ESCALATION_SWEEP_INTERVAL_SECS,
                ));
                loop {
                    tick.tick().await;
                    if let Err(e) = this.approvals.sweep_escalations().await {
                        error!("escalation sweep failed: {e}");
                    }
                }
            })
        };

        let metric_snapshotter = {
            let this = self.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(std::time::Duration::from_secs(
                    crate::constants::METRIC_SNAPSHOT_INTERVAL_SECS,
                ));
                loop {
                    tick.tick().await;
                    this.snapshot_metrics().await;
                }
            })
        };

        let _ = tokio::try_join!(
            lock_sweeper,
            message_drainer,
            resource_sweeper,
            escalation_sweeper,
            metric_snapshotter,
        )
        .map_err(|e| FleetError::Internal(anyhow::anyhow!("background loop panicked: {e}")))?;

        Ok(())
    }

    /// Expire due locks in every project; each manager's sweep also
    /// promotes waiters.
    pub async fn sweep_locks(&self) -> Result<usize> {
        let managers: Vec<Arc<LockManager>> = {
            let managers = self.lock_managers.read().await;
            managers.values().cloned().collect()
        };
        let mut expired = 0;
        for manager in managers {
            expired += manager.sweep_expired().await?;
        }
        Ok(expired)
    }

    /// Record fleet-level gauges into the metric registry
    pub async fn snapshot_metrics(&self) {
        let tasks = self.tasks.list_tasks(&TaskFilter::default()).await;
        let completed = tasks
            .iter()
            .filter(|t| t.status == crate::tasks::TaskStatus::Completed)
            .count();
        self.metrics.record("tasks.total", tasks.len() as f64).await;
        self.metrics.record("tasks.completed", completed as f64).await;
        self.metrics
            .record("approvals.pending", self.approvals.pending_count().await as f64)
            .await;
        self.metrics
            .record(
                "messages.delayed",
                self.scheduler.queued_message_count().await as f64,
            )
            .await;
        self.metrics
            .record("events.retained", self.events.len().await as f64)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskType;

    fn orchestrator() -> Arc<Orchestrator> {
        Arc::new(Orchestrator::new(CoreConfig::default()))
    }

    async fn seed_agent(orchestrator: &Orchestrator, id: &str, role: AgentRole, skill: &str) {
        orchestrator
            .register_agent(
                AgentProfile::new(id, id.to_uppercase(), role).with_skill(skill, 7),
                vec![],
                None,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_task_indexes_context() {
        let orchestrator = orchestrator();
        let project = orchestrator.create_project("apollo").await;
        orchestrator
            .create_task(
                NewTask::new(&project.id, "Build lock manager", TaskType::Story, "ceo")
                    .with_description("serialize concurrent file access"),
            )
            .await
            .unwrap();

        let inventory = orchestrator.context.inventory(&project.id).await;
        assert_eq!(inventory.total_chunks, 1);
    }

    #[tokio::test]
    async fn assign_task_notifies_assignee() {
        let orchestrator = orchestrator();
        let project = orchestrator.create_project("apollo").await;
        seed_agent(&orchestrator, "dev1", AgentRole::IndividualContributor, "backend").await;

        let task = orchestrator
            .create_task(NewTask::new(&project.id, "Feature", TaskType::Task, "pm").with_estimate(4.0))
            .await
            .unwrap();
        orchestrator
            .assign_task(&task.id, "dev1", "pm", "manual")
            .await
            .unwrap();

        let inbox = orchestrator.bus.list_messages("dev1", false, 10).await;
        assert!(inbox.iter().any(|m| m.subject.contains("Task assigned")));

        // Assignment lands as a context switch on the scheduler
        let status = orchestrator.scheduler.status("dev1").await.unwrap();
        assert_eq!(status.state, crate::scheduler::ResourceState::ContextSwitching);
    }

    #[tokio::test]
    async fn auto_assign_selects_and_assigns() {
        let orchestrator = orchestrator();
        let project = orchestrator.create_project("apollo").await;
        seed_agent(&orchestrator, "dev1", AgentRole::IndividualContributor, "backend").await;
        seed_agent(&orchestrator, "dev2", AgentRole::IndividualContributor, "frontend").await;

        let task = orchestrator
            .create_task(
                NewTask::new(&project.id, "API work", TaskType::Task, "pm").with_skill("backend"),
            )
            .await
            .unwrap();
        let chosen = orchestrator
            .auto_assign(&task.id, "pm", AssignmentAlgorithm::SkillBased)
            .await
            .unwrap();
        assert_eq!(chosen.as_deref(), Some("dev1"));

        let task = orchestrator.tasks.get_task(&task.id).await.unwrap();
        assert_eq!(task.assigned_to.as_deref(), Some("dev1"));
    }

    #[tokio::test]
    async fn auto_assign_returns_none_when_roster_is_empty() {
        let orchestrator = orchestrator();
        let project = orchestrator.create_project("apollo").await;
        let task = orchestrator
            .create_task(NewTask::new(&project.id, "Nobody home", TaskType::Task, "pm"))
            .await
            .unwrap();
        let chosen = orchestrator
            .auto_assign(&task.id, "pm", AssignmentAlgorithm::HierarchyAware)
            .await
            .unwrap();
        assert!(chosen.is_none());
    }

    #[tokio::test]
    async fn dashboards_summarize_state() {
        let orchestrator = orchestrator();
        let project = orchestrator.create_project("apollo").await;
        seed_agent(&orchestrator, "dev1", AgentRole::IndividualContributor, "backend").await;

        let task = orchestrator
            .create_task(NewTask::new(&project.id, "Work", TaskType::Task, "pm").with_estimate(2.0))
            .await
            .unwrap();
        orchestrator
            .assign_task(&task.id, "dev1", "pm", "manual")
            .await
            .unwrap();
        orchestrator
            .locks(&project.id)
            .await
            .acquire("dev1", "/src/main.rs", crate::locks::LockKind::Write, None, HashMap::new())
            .await
            .unwrap();

        let dashboard = orchestrator.project_dashboard(&project.id).await.unwrap();
        assert_eq!(dashboard.total_tasks, 1);
        assert_eq!(dashboard.active_locks, 1);
        assert_eq!(dashboard.tasks_by_status.get("Assigned"), Some(&1));

        let agent_view = orchestrator.agent_dashboard("dev1").await.unwrap();
        assert_eq!(agent_view.open_tasks, 1);
        assert_eq!(agent_view.held_locks, 1);
        assert_eq!(agent_view.current_workload, 2.0);
        assert!(agent_view.unread_messages >= 1);
    }

    #[tokio::test]
    async fn metric_snapshot_records_gauges() {
        let orchestrator = orchestrator();
        let project = orchestrator.create_project("apollo").await;
        orchestrator
            .create_task(NewTask::new(&project.id, "Work", TaskType::Task, "pm"))
            .await
            .unwrap();

        orchestrator.snapshot_metrics().await;
        assert_eq!(
            orchestrator.metrics.latest("tasks.total").await.unwrap().value,
            1.0
        );
    }

    #[tokio::test]
    async fn daily_scaling_limit_caps_registrations() {
        let config = CoreConfig {
            daily_scaling_limit: 2,
            ..Default::default()
        };
        let orchestrator = Arc::new(Orchestrator::new(config));
        seed_agent(&orchestrator, "a1", AgentRole::IndividualContributor, "backend").await;
        seed_agent(&orchestrator, "a2", AgentRole::IndividualContributor, "backend").await;

        let result = orchestrator
            .register_agent(
                AgentProfile::new("a3", "A3", AgentRole::IndividualContributor),
                vec![],
                None,
            )
            .await;
        assert!(matches!(result, Err(FleetError::CapacityExceeded(_))));
    }

    #[tokio::test]
    async fn missing_project_dashboard_is_not_found() {
        let orchestrator = orchestrator();
        let result = orchestrator.project_dashboard("proj_missing").await;
        assert!(matches!(result, Err(FleetError::NotFound(_))));
    }
}
