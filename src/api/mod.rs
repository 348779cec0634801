//! HTTP surface over the coordination core.
//!
//! A thin axum adapter: handlers parse transport concerns, call the
//! orchestrator, and map typed errors onto status codes. No coordination
//! logic lives here.

use crate::{
    approvals::DecisionType,
    assignment::AssignmentAlgorithm,
    auth::{auth_middleware, create_auth_state},
    config::Config,
    context::{ChunkType, ContextFilter, SelectionStrategy},
    locks::LockKind,
    messaging::{CollaborationReply, MessagePriority},
    models::{AgentProfile, AgentRole},
    orchestrator::Orchestrator,
    rate_limit::{rate_limit_middleware, RateLimitState},
    tasks::{NewTask, TaskFilter, TaskStatus, TaskType},
    FleetError, Result,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::{collections::HashMap, str::FromStr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use validator::Validate;

const SERVICE_NAME: &str = "fleet-core";
const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

const ROUTE_HEALTH: &str = "/health";
const ROUTE_PROJECTS: &str = "/projects";
const ROUTE_PROJECT_DASHBOARD: &str = "/projects/{project_id}/dashboard";
const ROUTE_PROJECT_LOCKS: &str = "/projects/{project_id}/locks";
const ROUTE_PROJECT_LOCK_RELEASE: &str = "/projects/{project_id}/locks/{lock_id}/release";
const ROUTE_PROJECT_LOCK_CONFLICTS: &str = "/projects/{project_id}/locks/conflicts";
const ROUTE_PROJECT_CONTEXT: &str = "/projects/{project_id}/context";
const ROUTE_PROJECT_CONTEXT_QUERY: &str = "/projects/{project_id}/context/query";
const ROUTE_PROJECT_CONTEXT_SUMMARY: &str = "/projects/{project_id}/context/summary";
const ROUTE_AGENTS: &str = "/agents";
const ROUTE_AGENT_DASHBOARD: &str = "/agents/{agent_id}/dashboard";
const ROUTE_AGENT_MESSAGES: &str = "/agents/{agent_id}/messages";
const ROUTE_AGENT_MESSAGE_READ: &str = "/agents/{agent_id}/messages/{message_id}/read";
const ROUTE_TASKS: &str = "/tasks";
const ROUTE_TASK_ASSIGN: &str = "/tasks/{task_id}/assign";
const ROUTE_TASK_AUTO_ASSIGN: &str = "/tasks/{task_id}/auto-assign";
const ROUTE_TASK_PROGRESS: &str = "/tasks/{task_id}/progress";
const ROUTE_TASK_HIERARCHY: &str = "/tasks/{task_id}/hierarchy";
const ROUTE_MESSAGES_DIRECT: &str = "/messages/direct";
const ROUTE_MESSAGES_TEAM: &str = "/messages/team";
const ROUTE_MESSAGES_BROADCAST: &str = "/messages/broadcast";
const ROUTE_COLLABORATION_RESPOND: &str = "/collaborations/{request_id}/respond";
const ROUTE_APPROVALS: &str = "/approvals";
const ROUTE_APPROVAL_APPROVE: &str = "/approvals/{request_id}/approve";
const ROUTE_APPROVAL_REJECT: &str = "/approvals/{request_id}/reject";
const ROUTE_METRICS: &str = "/metrics/{name}";

/// Map a core error onto the transport's status code
fn status_for(error: &FleetError) -> StatusCode {
    match error {
        FleetError::NotFound(_) => StatusCode::NOT_FOUND,
        FleetError::Conflict(_) => StatusCode::CONFLICT,
        FleetError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        FleetError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        FleetError::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
        FleetError::CapacityExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
        FleetError::NoApprover(_) | FleetError::CannotEscalate(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

struct ApiError(FleetError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("internal error: {}", self.0);
            (status, Json(serde_json::json!({"error": "Internal server error"}))).into_response()
        } else {
            (status, Json(serde_json::json!({"error": self.0.to_string()}))).into_response()
        }
    }
}

impl From<FleetError> for ApiError {
    fn from(error: FleetError) -> Self {
        ApiError(error)
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn parse<T: FromStr<Err = String>>(value: &str) -> ApiResult<T> {
    value
        .parse()
        .map_err(|e: String| ApiError(FleetError::InvalidArgument(e)))
}

fn validate<T: Validate>(payload: &T) -> ApiResult<()> {
    payload
        .validate()
        .map_err(|e| ApiError(FleetError::InvalidArgument(e.to_string())))
}

#[derive(Clone)]
pub struct ApiServer {
    config: Config,
    orchestrator: Arc<Orchestrator>,
}

impl ApiServer {
    pub fn new(config: Config, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            config,
            orchestrator,
        }
    }

    pub fn router(&self) -> Router {
        let auth_state = create_auth_state(self.config.api.clone());
        let rate_state = Arc::new(RateLimitState::new());

        Router::new()
            .route(ROUTE_HEALTH, get(health))
            .route(ROUTE_PROJECTS, post(create_project).get(list_projects))
            .route(ROUTE_PROJECT_DASHBOARD, get(project_dashboard))
            .route(ROUTE_PROJECT_LOCKS, post(acquire_lock).get(list_locks))
            .route(ROUTE_PROJECT_LOCK_RELEASE, post(release_lock))
            .route(ROUTE_PROJECT_LOCK_CONFLICTS, get(detect_conflicts))
            .route(ROUTE_PROJECT_CONTEXT, post(add_context))
            .route(ROUTE_PROJECT_CONTEXT_QUERY, post(query_context))
            .route(ROUTE_PROJECT_CONTEXT_SUMMARY, get(context_summary))
            .route(ROUTE_AGENTS, post(register_agent).get(list_agents))
            .route(ROUTE_AGENT_DASHBOARD, get(agent_dashboard))
            .route(ROUTE_AGENT_MESSAGES, get(list_messages))
            .route(ROUTE_AGENT_MESSAGE_READ, post(mark_read))
            .route(ROUTE_TASKS, post(create_task).get(list_tasks))
            .route(ROUTE_TASK_ASSIGN, post(assign_task))
            .route(ROUTE_TASK_AUTO_ASSIGN, post(auto_assign_task))
            .route(ROUTE_TASK_PROGRESS, post(update_progress))
            .route(ROUTE_TASK_HIERARCHY, get(task_hierarchy))
            .route(ROUTE_MESSAGES_DIRECT, post(send_direct))
            .route(ROUTE_MESSAGES_TEAM, post(send_team))
            .route(ROUTE_MESSAGES_BROADCAST, post(broadcast))
            .route(ROUTE_COLLABORATION_RESPOND, post(respond_collaboration))
            .route(ROUTE_APPROVALS, post(request_approval))
            .route(ROUTE_APPROVAL_APPROVE, post(approve))
            .route(ROUTE_APPROVAL_REJECT, post(reject))
            .route(ROUTE_METRICS, get(metric_series))
            .layer(middleware::from_fn_with_state(rate_state, rate_limit_middleware))
            .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.orchestrator.clone())
    }

    pub async fn run(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.api.host, self.config.api.port);
        info!("API server listening on {addr}");
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, self.router())
            .await
            .map_err(|e| FleetError::Internal(anyhow::anyhow!("server error: {e}")))?;
        Ok(())
    }
}

// --- handlers ---------------------------------------------------------------

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": SERVICE_NAME,
        "version": SERVICE_VERSION,
        "status": "healthy",
    }))
}

#[derive(Debug, Deserialize, Validate)]
struct CreateProjectRequest {
    #[validate(length(min = 1, max = 200))]
    name: String,
}

async fn create_project(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(payload): Json<CreateProjectRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    validate(&payload)?;
    let project = orchestrator.create_project(&payload.name).await;
    Ok(Json(serde_json::json!({ "project": project })))
}

async fn list_projects(
    State(orchestrator): State<Arc<Orchestrator>>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "projects": orchestrator.list_projects().await }))
}

async fn project_dashboard(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let dashboard = orchestrator.project_dashboard(&project_id).await?;
    Ok(Json(serde_json::json!({ "dashboard": dashboard })))
}

#[derive(Debug, Deserialize, Validate)]
struct RegisterAgentRequest {
    #[validate(length(min = 1, max = 100))]
    id: String,
    #[validate(length(min = 1, max = 200))]
    name: String,
    role: String,
    #[serde(default)]
    skills: HashMap<String, u8>,
    #[serde(default)]
    specializations: Vec<String>,
    reports_to: Option<String>,
    max_workload: Option<f64>,
}

async fn register_agent(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(payload): Json<RegisterAgentRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    validate(&payload)?;
    let role: AgentRole = parse(&payload.role)?;

    let mut profile = AgentProfile::new(&payload.id, &payload.name, role);
    for (skill, level) in payload.skills {
        profile = profile.with_skill(skill, level);
    }
    if let Some(manager) = payload.reports_to {
        profile = profile.with_reports_to(manager);
    }
    if let Some(max_workload) = payload.max_workload {
        profile = profile.with_max_workload(max_workload);
    }

    orchestrator
        .register_agent(profile, payload.specializations, None)
        .await?;
    Ok(Json(serde_json::json!({ "agent_id": payload.id })))
}

async fn list_agents(State(orchestrator): State<Arc<Orchestrator>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "agents": orchestrator.tasks.list_agents().await }))
}

async fn agent_dashboard(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let dashboard = orchestrator.agent_dashboard(&agent_id).await?;
    Ok(Json(serde_json::json!({ "dashboard": dashboard })))
}

#[derive(Debug, Deserialize, Validate)]
struct CreateTaskRequest {
    project_id: String,
    #[validate(length(min = 1, max = 300))]
    title: String,
    #[serde(default)]
    description: String,
    task_type: String,
    created_by: String,
    priority: Option<String>,
    parent_task_id: Option<String>,
    #[serde(default)]
    required_skills: Vec<String>,
    estimated_hours: Option<f64>,
}

async fn create_task(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(payload): Json<CreateTaskRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    validate(&payload)?;
    let task_type: TaskType = serde_json::from_value(serde_json::json!(payload.task_type))
        .map_err(|_| ApiError(FleetError::InvalidArgument(format!(
            "unknown task type: {}",
            payload.task_type
        ))))?;

    let mut new_task = NewTask::new(
        &payload.project_id,
        &payload.title,
        task_type,
        &payload.created_by,
    )
    .with_description(&payload.description);
    if let Some(priority) = payload.priority {
        let priority = serde_json::from_value(serde_json::json!(priority))
            .map_err(|_| ApiError(FleetError::InvalidArgument("unknown priority".to_string())))?;
        new_task = new_task.with_priority(priority);
    }
    if let Some(parent) = payload.parent_task_id {
        new_task = new_task.with_parent(parent);
    }
    for skill in payload.required_skills {
        new_task = new_task.with_skill(skill);
    }
    if let Some(estimate) = payload.estimated_hours {
        new_task = new_task.with_estimate(estimate);
    }

    let task = orchestrator.create_task(new_task).await?;
    Ok(Json(serde_json::json!({ "task": task })))
}

#[derive(Debug, Deserialize)]
struct TaskListQuery {
    project_id: Option<String>,
    assigned_to: Option<String>,
    status: Option<String>,
}

async fn list_tasks(
    State(orchestrator): State<Arc<Orchestrator>>,
    Query(query): Query<TaskListQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let status: Option<TaskStatus> = match query.status {
        Some(raw) => Some(
            serde_json::from_value(serde_json::json!(raw))
                .map_err(|_| ApiError(FleetError::InvalidArgument("unknown status".to_string())))?,
        ),
        None => None,
    };
    let tasks = orchestrator
        .tasks
        .list_tasks(&TaskFilter {
            project_id: query.project_id,
            assigned_to: query.assigned_to,
            task_type: None,
            status,
        })
        .await;
    Ok(Json(serde_json::json!({ "tasks": tasks })))
}

#[derive(Debug, Deserialize)]
struct AssignRequest {
    agent_id: String,
    assigned_by: String,
    #[serde(default = "default_reason")]
    reason: String,
}

fn default_reason() -> String {
    "manual".to_string()
}

async fn assign_task(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(task_id): Path<String>,
    Json(payload): Json<AssignRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let task = orchestrator
        .assign_task(&task_id, &payload.agent_id, &payload.assigned_by, &payload.reason)
        .await?;
    Ok(Json(serde_json::json!({ "task": task })))
}

#[derive(Debug, Deserialize)]
struct AutoAssignRequest {
    assigned_by: String,
    algorithm: Option<String>,
}

async fn auto_assign_task(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(task_id): Path<String>,
    Json(payload): Json<AutoAssignRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let algorithm = match payload.algorithm {
        Some(raw) => parse::<AssignmentAlgorithm>(&raw)?,
        None => AssignmentAlgorithm::default(),
    };
    let chosen = orchestrator
        .auto_assign(&task_id, &payload.assigned_by, algorithm)
        .await?;
    Ok(Json(serde_json::json!({ "assigned_to": chosen })))
}

#[derive(Debug, Deserialize, Validate)]
struct ProgressRequest {
    #[validate(range(min = 0, max = 100))]
    progress: u8,
    status: Option<String>,
    actual_hours: Option<f64>,
}

async fn update_progress(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(task_id): Path<String>,
    Json(payload): Json<ProgressRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    validate(&payload)?;
    let status: Option<TaskStatus> = match payload.status {
        Some(raw) => Some(
            serde_json::from_value(serde_json::json!(raw))
                .map_err(|_| ApiError(FleetError::InvalidArgument("unknown status".to_string())))?,
        ),
        None => None,
    };
    let task = orchestrator
        .tasks
        .update_progress(&task_id, payload.progress, status, payload.actual_hours)
        .await?;
    Ok(Json(serde_json::json!({ "task": task })))
}

async fn task_hierarchy(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let hierarchy = orchestrator.tasks.get_hierarchy(&task_id).await?;
    Ok(Json(serde_json::json!({ "hierarchy": hierarchy })))
}

#[derive(Debug, Deserialize)]
struct AcquireLockRequest {
    agent_id: String,
    path: String,
    kind: String,
    timeout_secs: Option<u64>,
}

async fn acquire_lock(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(project_id): Path<String>,
    Json(payload): Json<AcquireLockRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let kind: LockKind = serde_json::from_value(serde_json::json!(payload.kind))
        .map_err(|_| ApiError(FleetError::InvalidArgument("unknown lock kind".to_string())))?;
    let outcome = orchestrator
        .locks(&project_id)
        .await
        .acquire(&payload.agent_id, &payload.path, kind, payload.timeout_secs, HashMap::new())
        .await?;
    Ok(Json(serde_json::json!({
        "granted": outcome.is_granted(),
        "lock": outcome.lock(),
    })))
}

#[derive(Debug, Deserialize)]
struct ReleaseLockRequest {
    agent_id: Option<String>,
}

async fn release_lock(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path((project_id, lock_id)): Path<(String, String)>,
    Json(payload): Json<ReleaseLockRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let released = orchestrator
        .locks(&project_id)
        .await
        .release(&lock_id, payload.agent_id.as_deref())
        .await?;
    Ok(Json(serde_json::json!({ "released": released })))
}

#[derive(Debug, Deserialize)]
struct LockListQuery {
    agent_id: Option<String>,
    path: Option<String>,
}

async fn list_locks(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(project_id): Path<String>,
    Query(query): Query<LockListQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let manager = orchestrator.locks(&project_id).await;
    let locks = if let Some(agent_id) = query.agent_id {
        manager.locks_for_agent(&agent_id).await
    } else if let Some(path) = query.path {
        manager.locks_for_path(&path).await?
    } else {
        manager.active_locks().await
    };
    Ok(Json(serde_json::json!({ "locks": locks })))
}

#[derive(Debug, Deserialize)]
struct ConflictQuery {
    path: String,
}

async fn detect_conflicts(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(project_id): Path<String>,
    Query(query): Query<ConflictQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let conflicts = orchestrator
        .locks(&project_id)
        .await
        .detect_conflicts(&query.path)
        .await?;
    Ok(Json(serde_json::json!({ "conflicts": conflicts })))
}

#[derive(Debug, Deserialize, Validate)]
struct SendDirectRequest {
    from_agent: String,
    to_agent: String,
    #[validate(length(min = 1, max = 300))]
    subject: String,
    #[validate(length(min = 1, max = 20000))]
    body: String,
    priority: Option<String>,
}

fn parse_priority(raw: Option<String>) -> ApiResult<MessagePriority> {
    match raw {
        None => Ok(MessagePriority::Normal),
        Some(raw) => serde_json::from_value(serde_json::json!(raw))
            .map_err(|_| ApiError(FleetError::InvalidArgument("unknown priority".to_string()))),
    }
}

async fn send_direct(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(payload): Json<SendDirectRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    validate(&payload)?;
    let priority = parse_priority(payload.priority)?;
    let message_id = orchestrator
        .bus
        .send_direct(
            &payload.from_agent,
            &payload.to_agent,
            &payload.subject,
            &payload.body,
            priority,
            HashMap::new(),
        )
        .await?;
    Ok(Json(serde_json::json!({ "message_id": message_id })))
}

#[derive(Debug, Deserialize, Validate)]
struct SendTeamRequest {
    from_agent: String,
    team_id: String,
    #[validate(length(min = 1, max = 300))]
    subject: String,
    #[validate(length(min = 1, max = 20000))]
    body: String,
    priority: Option<String>,
}

async fn send_team(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(payload): Json<SendTeamRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    validate(&payload)?;
    let priority = parse_priority(payload.priority)?;
    let message_id = orchestrator
        .bus
        .send_team(&payload.from_agent, &payload.team_id, &payload.subject, &payload.body, priority)
        .await?;
    Ok(Json(serde_json::json!({ "message_id": message_id })))
}

#[derive(Debug, Deserialize, Validate)]
struct BroadcastRequest {
    from_agent: String,
    #[validate(length(min = 1, max = 300))]
    subject: String,
    #[validate(length(min = 1, max = 20000))]
    body: String,
    target_roles: Option<Vec<String>>,
    priority: Option<String>,
}

async fn broadcast(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(payload): Json<BroadcastRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    validate(&payload)?;
    let priority = parse_priority(payload.priority)?;
    let target_roles = match payload.target_roles {
        None => None,
        Some(raw_roles) => {
            let mut roles = std::collections::HashSet::new();
            for raw in raw_roles {
                roles.insert(parse::<AgentRole>(&raw)?);
            }
            Some(roles)
        }
    };
    let message_id = orchestrator
        .bus
        .broadcast(&payload.from_agent, &payload.subject, &payload.body, target_roles, priority)
        .await?;
    Ok(Json(serde_json::json!({ "message_id": message_id })))
}

#[derive(Debug, Deserialize)]
struct MessageListQuery {
    unread_only: Option<bool>,
    limit: Option<usize>,
}

async fn list_messages(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(agent_id): Path<String>,
    Query(query): Query<MessageListQuery>,
) -> Json<serde_json::Value> {
    let messages = orchestrator
        .bus
        .list_messages(
            &agent_id,
            query.unread_only.unwrap_or(false),
            query.limit.unwrap_or(crate::constants::DEFAULT_MESSAGE_LIMIT),
        )
        .await;
    Json(serde_json::json!({ "messages": messages }))
}

async fn mark_read(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path((agent_id, message_id)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let marked = orchestrator.bus.mark_read(&agent_id, &message_id).await?;
    Ok(Json(serde_json::json!({ "marked": marked })))
}

#[derive(Debug, Deserialize)]
struct CollaborationResponseRequest {
    agent_id: String,
    reply: String,
    note: Option<String>,
}

async fn respond_collaboration(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(request_id): Path<String>,
    Json(payload): Json<CollaborationResponseRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let reply: CollaborationReply = serde_json::from_value(serde_json::json!(payload.reply))
        .map_err(|_| ApiError(FleetError::InvalidArgument("unknown reply".to_string())))?;
    orchestrator
        .bus
        .respond_to_collaboration(&payload.agent_id, &request_id, reply, payload.note.as_deref())
        .await?;
    Ok(Json(serde_json::json!({ "recorded": true })))
}

#[derive(Debug, Deserialize, Validate)]
struct ApprovalRequestBody {
    requester: String,
    decision_type: String,
    #[validate(length(min = 1, max = 300))]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    justification: String,
    amount: Option<i64>,
    priority: Option<String>,
}

async fn request_approval(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(payload): Json<ApprovalRequestBody>,
) -> ApiResult<Json<serde_json::Value>> {
    validate(&payload)?;
    let decision_type: DecisionType = parse(&payload.decision_type)?;
    let priority = parse_priority(payload.priority)?;
    let request = orchestrator
        .approvals
        .request(
            &payload.requester,
            decision_type,
            &payload.title,
            &payload.description,
            &payload.justification,
            payload.amount,
            priority,
        )
        .await?;
    Ok(Json(serde_json::json!({ "request": request })))
}

#[derive(Debug, Deserialize)]
struct DecisionRequest {
    approver: String,
    #[serde(default)]
    reasoning: String,
}

async fn approve(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(request_id): Path<String>,
    Json(payload): Json<DecisionRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let approved = orchestrator
        .approvals
        .approve(&payload.approver, &request_id, &payload.reasoning)
        .await?;
    Ok(Json(serde_json::json!({ "approved": approved })))
}

async fn reject(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(request_id): Path<String>,
    Json(payload): Json<DecisionRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let rejected = orchestrator
        .approvals
        .reject(&payload.approver, &request_id, &payload.reasoning)
        .await?;
    Ok(Json(serde_json::json!({ "rejected": rejected })))
}

#[derive(Debug, Deserialize, Validate)]
struct AddContextRequest {
    agent_id: String,
    #[validate(length(min = 1))]
    content: String,
    content_type: String,
}

async fn add_context(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(project_id): Path<String>,
    Json(payload): Json<AddContextRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    validate(&payload)?;
    let chunk_type: ChunkType = parse(&payload.content_type)?;
    let chunk_ids = orchestrator
        .context
        .add_content(&project_id, &payload.agent_id, &payload.content, chunk_type, HashMap::new())
        .await?;
    Ok(Json(serde_json::json!({ "chunk_ids": chunk_ids })))
}

#[derive(Debug, Deserialize, Validate)]
struct QueryContextRequest {
    agent_id: String,
    #[validate(length(min = 1, max = 2000))]
    query: String,
    budget_tokens: Option<usize>,
    strategy: Option<String>,
}

async fn query_context(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(project_id): Path<String>,
    Json(payload): Json<QueryContextRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    validate(&payload)?;
    let strategy = match payload.strategy {
        Some(raw) => parse::<SelectionStrategy>(&raw)?,
        None => SelectionStrategy::default(),
    };
    let context = orchestrator
        .context
        .assemble(
            &project_id,
            &payload.agent_id,
            &payload.query,
            payload.budget_tokens.unwrap_or(8000),
            strategy,
            &ContextFilter::default(),
        )
        .await?;
    Ok(Json(serde_json::json!({ "context": context })))
}

async fn context_summary(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(project_id): Path<String>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "summary": orchestrator.context.inventory(&project_id).await }))
}

async fn metric_series(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(name): Path<String>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "series": orchestrator.metrics.series(&name).await }))
}
