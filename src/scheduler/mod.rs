//! Resource-state scheduler: per-agent computational state and response
//! timing.
//!
//! Agents are modeled as compute resources, not as people keeping office
//! hours. Each agent carries a state machine (available /
//! exclusive_computation / awaiting_dependency / context_switching), a
//! computational load in [0, 1], and a personality process that scales
//! processing time. Responses that cannot go out immediately sit in a
//! delayed queue drained by a periodic tick.

use crate::{
    messaging::{MessagePriority, MessageSender},
    models::AgentRole,
    FleetError, Result,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    /// Ready for new work, low computational load
    Available,
    /// Resource-intensive task in flight; interruption carries a cost
    ExclusiveComputation,
    /// Paused on an unsatisfied dependency; responds almost instantly
    AwaitingDependency,
    /// Brief transition overhead between assignments
    ContextSwitching,
}

impl ResourceState {
    /// Response-time multiplier for the current state
    pub fn multiplier(&self) -> f64 {
        match self {
            ResourceState::Available => 1.0,
            ResourceState::ExclusiveComputation => 3.0,
            ResourceState::AwaitingDependency => 0.1,
            ResourceState::ContextSwitching => 1.5,
        }
    }
}

/// Process-shaped personality: affects how long work takes, nothing else
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PersonalityProcess {
    Perfectionist,
    RapidExecutor,
    ThoroughAnalyst,
    CollaborativeOptimizer,
    EfficientSpecialist,
}

impl PersonalityProcess {
    pub fn time_multiplier(&self) -> f64 {
        match self {
            PersonalityProcess::Perfectionist => 1.4,
            PersonalityProcess::RapidExecutor => 0.7,
            PersonalityProcess::ThoroughAnalyst => 1.6,
            PersonalityProcess::CollaborativeOptimizer => 1.2,
            PersonalityProcess::EfficientSpecialist => 0.9,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            PersonalityProcess::Perfectionist => "additional validation and quality checks",
            PersonalityProcess::RapidExecutor => "optimized execution path",
            PersonalityProcess::ThoroughAnalyst => "comprehensive analysis and verification",
            PersonalityProcess::CollaborativeOptimizer => "collaboration and consensus building",
            PersonalityProcess::EfficientSpecialist => "specialized expertise application",
        }
    }

    /// How strongly the agent seeks input before acting (0-1)
    pub fn collaboration_preference(&self) -> f64 {
        match self {
            PersonalityProcess::Perfectionist => 0.6,
            PersonalityProcess::RapidExecutor => 0.3,
            PersonalityProcess::ThoroughAnalyst => 0.5,
            PersonalityProcess::CollaborativeOptimizer => 0.9,
            PersonalityProcess::EfficientSpecialist => 0.4,
        }
    }

    pub fn default_for_role(role: AgentRole) -> Self {
        match role {
            AgentRole::Executive => PersonalityProcess::CollaborativeOptimizer,
            AgentRole::SeniorManagement => PersonalityProcess::ThoroughAnalyst,
            AgentRole::MiddleManagement => PersonalityProcess::CollaborativeOptimizer,
            AgentRole::IndividualContributor => PersonalityProcess::EfficientSpecialist,
            AgentRole::Intern => PersonalityProcess::EfficientSpecialist,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingIntensity {
    Minimal,
    Light,
    Moderate,
    Heavy,
    Intensive,
}

impl ProcessingIntensity {
    /// Computational load a task of this intensity adds
    pub fn load(&self) -> f64 {
        match self {
            ProcessingIntensity::Minimal => 0.1,
            ProcessingIntensity::Light => 0.2,
            ProcessingIntensity::Moderate => 0.4,
            ProcessingIntensity::Heavy => 0.7,
            ProcessingIntensity::Intensive => 0.9,
        }
    }

    /// Seconds lost when a task of this intensity is preempted
    pub fn interruption_cost_secs(&self) -> u32 {
        match self {
            ProcessingIntensity::Minimal => 1,
            ProcessingIntensity::Light => 3,
            ProcessingIntensity::Moderate => 8,
            ProcessingIntensity::Heavy => 20,
            ProcessingIntensity::Intensive => 45,
        }
    }

    /// Intensive work cannot be preempted at all
    pub fn interruptible(&self) -> bool {
        !matches!(self, ProcessingIntensity::Intensive)
    }
}

/// Duration template: seconds = base + complexity * span
#[derive(Debug, Clone, Copy)]
pub struct DurationTemplate {
    pub intensity: ProcessingIntensity,
    pub base_secs: f64,
    pub span_secs: f64,
}

impl DurationTemplate {
    pub fn duration_secs(&self, input_complexity: f64) -> f64 {
        self.base_secs + input_complexity.clamp(0.0, 1.0) * self.span_secs
    }
}

/// Per-task-type templates. Unknown task types fall back to
/// `simple_response`.
pub fn template_for(task_type: &str) -> DurationTemplate {
    match task_type {
        "code_review" => DurationTemplate {
            intensity: ProcessingIntensity::Moderate,
            base_secs: 30.0,
            span_secs: 120.0,
        },
        "architecture_analysis" => DurationTemplate {
            intensity: ProcessingIntensity::Heavy,
            base_secs: 180.0,
            span_secs: 600.0,
        },
        "bug_analysis" => DurationTemplate {
            intensity: ProcessingIntensity::Moderate,
            base_secs: 45.0,
            span_secs: 180.0,
        },
        "feature_implementation" => DurationTemplate {
            intensity: ProcessingIntensity::Heavy,
            base_secs: 300.0,
            span_secs: 1200.0,
        },
        "research_analysis" => DurationTemplate {
            intensity: ProcessingIntensity::Intensive,
            base_secs: 600.0,
            span_secs: 1800.0,
        },
        _ => DurationTemplate {
            intensity: ProcessingIntensity::Light,
            base_secs: 2.0,
            span_secs: 15.0,
        },
    }
}

/// A computational task in flight on an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeTask {
    pub id: String,
    pub agent_id: String,
    pub task_type: String,
    pub description: String,
    pub input_complexity: f64,
    pub started_at: DateTime<Utc>,
    pub estimated_completion: DateTime<Utc>,
    pub interruptible: bool,
    pub interruption_cost_secs: u32,
    pub awaiting_dependency: Option<String>,
    intensity: ProcessingIntensity,
}

/// Snapshot of an agent's computational disposition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResourceStatus {
    pub agent_id: String,
    pub state: ResourceState,
    pub state_until: Option<DateTime<Utc>>,
    pub current_task: Option<String>,
    pub computational_load: f64,
    pub tasks_completed: u64,
    pub average_task_secs: f64,
    pub last_context_switch: Option<DateTime<Utc>>,
}

/// Outcome of an interruption probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptVerdict {
    pub allowed: bool,
    pub cost_secs: u32,
    pub reason: String,
}

#[derive(Debug, Clone)]
struct ComputeProfile {
    personality: PersonalityProcess,
    specializations: Vec<String>,
    specialization_bonus: f64,
}

#[derive(Debug, Clone)]
struct AgentRecord {
    profile: ComputeProfile,
    state: ResourceState,
    state_until: Option<DateTime<Utc>>,
    prior_state: ResourceState,
    load: f64,
    active_tasks: Vec<String>,
    tasks_completed: u64,
    average_task_secs: f64,
    last_context_switch: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct DelayedMessage {
    from_agent: String,
    to_agent: String,
    subject: String,
    body: String,
    priority: MessagePriority,
    send_at: DateTime<Utc>,
}

#[derive(Default)]
struct SchedulerState {
    agents: HashMap<String, AgentRecord>,
    tasks: HashMap<String, ComputeTask>,
    delayed: VecDeque<DelayedMessage>,
}

pub struct ResourceScheduler {
    state: Arc<RwLock<SchedulerState>>,
    sender: Arc<dyn MessageSender>,
}

impl ResourceScheduler {
    pub fn new(sender: Arc<dyn MessageSender>) -> Self {
        Self {
            state: Arc::new(RwLock::new(SchedulerState::default())),
            sender,
        }
    }

    pub async fn register_agent(
        &self,
        agent_id: &str,
        role: AgentRole,
        specializations: Vec<String>,
        personality: Option<PersonalityProcess>,
    ) {
        let record = AgentRecord {
            profile: ComputeProfile {
                personality: personality.unwrap_or_else(|| PersonalityProcess::default_for_role(role)),
                specializations,
                specialization_bonus: 1.2,
            },
            state: ResourceState::Available,
            state_until: None,
            prior_state: ResourceState::Available,
            load: 0.0,
            active_tasks: Vec::new(),
            tasks_completed: 0,
            average_task_secs: 0.0,
            last_context_switch: None,
        };
        let mut state = self.state.write().await;
        state.agents.insert(agent_id.to_string(), record);
    }

    /// Start a computational task. Load above 0.8 moves the agent into
    /// exclusive computation.
    pub async fn start_task(
        &self,
        agent_id: &str,
        task_type: &str,
        description: &str,
        input_complexity: f64,
    ) -> Result<ComputeTask> {
        let template = template_for(task_type);
        let now = Utc::now();
        let duration = template.duration_secs(input_complexity);

        let task = ComputeTask {
            id: format!("comp_{}", &Uuid::new_v4().simple().to_string()[..8]),
            agent_id: agent_id.to_string(),
            task_type: task_type.to_string(),
            description: description.to_string(),
            input_complexity: input_complexity.clamp(0.0, 1.0),
            started_at: now,
            estimated_completion: now + Duration::seconds(duration as i64),
            interruptible: template.intensity.interruptible(),
            interruption_cost_secs: template.intensity.interruption_cost_secs(),
            awaiting_dependency: None,
            intensity: template.intensity,
        };

        let mut state = self.state.write().await;
        let record = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| FleetError::NotFound(format!("agent {agent_id}")))?;
        record.active_tasks.push(task.id.clone());
        record.load = (record.load + template.intensity.load()).min(1.0);
        if record.load > 0.8 {
            record.state = ResourceState::ExclusiveComputation;
        }
        state.tasks.insert(task.id.clone(), task.clone());

        Ok(task)
    }

    /// Declare that a running task waits on another task; the agent drops
    /// into awaiting_dependency until it resolves.
    pub async fn declare_dependency(&self, task_id: &str, depends_on: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let agent_id = {
            let task = state
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| FleetError::NotFound(format!("compute task {task_id}")))?;
            task.awaiting_dependency = Some(depends_on.to_string());
            task.agent_id.clone()
        };
        if let Some(record) = state.agents.get_mut(&agent_id) {
            record.state = ResourceState::AwaitingDependency;
        }
        Ok(())
    }

    /// A dependency completed; waiting agents resume
    pub async fn resolve_dependency(&self, dependency_id: &str) -> Result<usize> {
        let mut state = self.state.write().await;
        let mut resumed = Vec::new();
        for task in state.tasks.values_mut() {
            if task.awaiting_dependency.as_deref() == Some(dependency_id) {
                task.awaiting_dependency = None;
                resumed.push(task.agent_id.clone());
            }
        }
        for agent_id in &resumed {
            if let Some(record) = state.agents.get_mut(agent_id) {
                if record.state == ResourceState::AwaitingDependency {
                    record.state = if record.load > 0.8 {
                        ResourceState::ExclusiveComputation
                    } else {
                        ResourceState::Available
                    };
                }
            }
        }
        Ok(resumed.len())
    }

    pub async fn complete_task(&self, task_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let task = state
            .tasks
            .remove(task_id)
            .ok_or_else(|| FleetError::NotFound(format!("compute task {task_id}")))?;
        Self::settle_completed(&mut state, &task, Utc::now());
        Ok(())
    }

    pub async fn cancel_task(&self, task_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let task = state
            .tasks
            .remove(task_id)
            .ok_or_else(|| FleetError::NotFound(format!("compute task {task_id}")))?;
        if let Some(record) = state.agents.get_mut(&task.agent_id) {
            record.active_tasks.retain(|id| id != task_id);
            record.load = (record.load - task.intensity.load()).max(0.0);
            if record.load <= 0.8 && record.state == ResourceState::ExclusiveComputation {
                record.state = ResourceState::Available;
            }
        }
        Ok(())
    }

    fn settle_completed(state: &mut SchedulerState, task: &ComputeTask, now: DateTime<Utc>) {
        if let Some(record) = state.agents.get_mut(&task.agent_id) {
            record.active_tasks.retain(|id| id != &task.id);
            record.load = (record.load - task.intensity.load()).max(0.0);
            record.tasks_completed += 1;

            let elapsed = (now - task.started_at).num_seconds().max(0) as f64;
            record.average_task_secs = if record.average_task_secs == 0.0 {
                elapsed
            } else {
                record.average_task_secs * 0.8 + elapsed * 0.2
            };

            if record.load <= 0.8 && record.state == ResourceState::ExclusiveComputation {
                record.state = ResourceState::Available;
            }
        }
    }

    /// Mark an assignment change: the agent briefly context-switches and
    /// automatically settles back into its prior non-transient state.
    pub async fn begin_context_switch(&self, agent_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let record = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| FleetError::NotFound(format!("agent {agent_id}")))?;
        let now = Utc::now();
        if record.state != ResourceState::ContextSwitching {
            record.prior_state = record.state;
        }
        record.state = ResourceState::ContextSwitching;
        record.state_until = Some(now + Duration::seconds(crate::constants::CONTEXT_SWITCH_SECS));
        record.last_context_switch = Some(now);
        Ok(())
    }

    /// Can the agent be preempted right now, and at what cost?
    pub async fn can_interrupt(&self, agent_id: &str) -> InterruptVerdict {
        let state = self.state.read().await;
        let record = match state.agents.get(agent_id) {
            Some(record) => record,
            None => {
                return InterruptVerdict {
                    allowed: true,
                    cost_secs: 0,
                    reason: "agent not tracked".to_string(),
                }
            }
        };

        match record.state {
            ResourceState::Available => InterruptVerdict {
                allowed: true,
                cost_secs: 0,
                reason: "agent is available".to_string(),
            },
            ResourceState::AwaitingDependency => InterruptVerdict {
                allowed: true,
                cost_secs: 2,
                reason: "agent is waiting on a dependency".to_string(),
            },
            _ => {
                if let Some(task) = record
                    .active_tasks
                    .first()
                    .and_then(|id| state.tasks.get(id))
                {
                    if !task.interruptible {
                        InterruptVerdict {
                            allowed: false,
                            cost_secs: task.interruption_cost_secs,
                            reason: format!("cannot interrupt {} in progress", task.task_type),
                        }
                    } else {
                        InterruptVerdict {
                            allowed: true,
                            cost_secs: task.interruption_cost_secs,
                            reason: format!(
                                "can interrupt {} with {}s recovery",
                                task.task_type, task.interruption_cost_secs
                            ),
                        }
                    }
                } else {
                    InterruptVerdict {
                        allowed: true,
                        cost_secs: 5,
                        reason: "can interrupt with minimal cost".to_string(),
                    }
                }
            }
        }
    }

    /// Compute how long the agent needs before responding to an incoming
    /// request. Returns whole seconds (at least 1) plus the reason.
    pub async fn response_time(
        &self,
        agent_id: &str,
        task_type: &str,
        input_complexity: f64,
        requires_collaboration: bool,
    ) -> Result<(u64, String)> {
        let state = self.state.read().await;
        let record = state
            .agents
            .get(agent_id)
            .ok_or_else(|| FleetError::NotFound(format!("agent {agent_id}")))?;

        let template = template_for(task_type);
        let base = template.duration_secs(input_complexity);

        let personality = record.profile.personality;
        let mut reason = personality.reason().to_string();
        let mut duration = base * personality.time_multiplier();

        if record
            .profile
            .specializations
            .iter()
            .any(|spec| task_type.contains(spec.as_str()))
        {
            duration /= record.profile.specialization_bonus;
            reason.push_str(" with specialization efficiency");
        }

        duration *= 1.0 + record.load * 0.5;
        duration *= record.state.multiplier();

        if requires_collaboration && personality.collaboration_preference() > 0.7 {
            duration += crate::constants::COLLABORATION_SURCHARGE_SECS;
            reason.push_str(" including collaboration coordination");
        }

        Ok((duration.ceil().max(1.0) as u64, reason))
    }

    /// Queue a response for delivery after the computed delay. Delays of
    /// one second or less go out immediately. Queued messages are not
    /// cancellable; recipients may discard on receipt.
    pub async fn schedule_response(
        &self,
        from_agent: &str,
        to_agent: &str,
        subject: &str,
        body: &str,
        priority: MessagePriority,
        task_type: &str,
        input_complexity: f64,
    ) -> Result<u64> {
        let (delay_secs, _) = self
            .response_time(from_agent, task_type, input_complexity, false)
            .await?;

        if delay_secs <= 1 {
            self.sender
                .send_direct(from_agent, to_agent, subject, body, priority, HashMap::new())
                .await?;
            return Ok(0);
        }

        let mut state = self.state.write().await;
        state.delayed.push_back(DelayedMessage {
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            priority,
            send_at: Utc::now() + Duration::seconds(delay_secs as i64),
        });
        Ok(delay_secs)
    }

    /// Send every queued message whose time has come. Called by the drain
    /// tick; safe to call at any frequency.
    pub async fn drain_due_messages(&self) -> Result<usize> {
        let now = Utc::now();
        let due: Vec<DelayedMessage> = {
            let mut state = self.state.write().await;
            let mut due = Vec::new();
            let mut remaining = VecDeque::new();
            while let Some(message) = state.delayed.pop_front() {
                if message.send_at <= now {
                    due.push(message);
                } else {
                    remaining.push_back(message);
                }
            }
            state.delayed = remaining;
            due
        };

        let count = due.len();
        for message in due {
            self.sender
                .send_direct(
                    &message.from_agent,
                    &message.to_agent,
                    &message.subject,
                    &message.body,
                    message.priority,
                    HashMap::new(),
                )
                .await?;
        }
        Ok(count)
    }

    /// Periodic state sweep: finish due tasks and settle expired context
    /// switches back into their prior state.
    pub async fn sweep_states(&self) -> Result<usize> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        let due: Vec<ComputeTask> = state
            .tasks
            .values()
            .filter(|task| task.estimated_completion <= now && task.awaiting_dependency.is_none())
            .cloned()
            .collect();
        for task in &due {
            state.tasks.remove(&task.id);
            Self::settle_completed(&mut state, task, now);
        }

        for record in state.agents.values_mut() {
            if record.state == ResourceState::ContextSwitching {
                if let Some(until) = record.state_until {
                    if until <= now {
                        record.state = record.prior_state;
                        record.state_until = None;
                    }
                }
            }
        }

        Ok(due.len())
    }

    pub async fn status(&self, agent_id: &str) -> Result<AgentResourceStatus> {
        let state = self.state.read().await;
        let record = state
            .agents
            .get(agent_id)
            .ok_or_else(|| FleetError::NotFound(format!("agent {agent_id}")))?;
        // An available agent reports no current task even while light
        // background work contributes to its load.
        let current_task = if record.state == ResourceState::Available {
            None
        } else {
            record.active_tasks.first().cloned()
        };
        Ok(AgentResourceStatus {
            agent_id: agent_id.to_string(),
            state: record.state,
            state_until: record.state_until,
            current_task,
            computational_load: record.load,
            tasks_completed: record.tasks_completed,
            average_task_secs: record.average_task_secs,
            last_context_switch: record.last_context_switch,
        })
    }

    pub async fn all_statuses(&self) -> Vec<AgentResourceStatus> {
        let state = self.state.read().await;
        let mut ids: Vec<String> = state.agents.keys().cloned().collect();
        ids.sort();
        drop(state);

        let mut statuses = Vec::new();
        for id in ids {
            if let Ok(status) = self.status(&id).await {
                statuses.push(status);
            }
        }
        statuses
    }

    pub async fn queued_message_count(&self) -> usize {
        self.state.read().await.delayed.len()
    }
}
