//! Authority-bounded approval routing with timeout-driven escalation.
//!
//! A request walks up the requester's reporting chain to the first agent
//! whose authority covers the decision, optionally falling back to a
//! roster scan when the chain runs out. Pending requests escalate when a
//! rule fires; a request that cannot climb any higher is marked escalated
//! and stays with its current approver.

use crate::{
    events::{EventKind, EventRecord, EventSink},
    messaging::{MessagePriority, MessageSender},
    models::AuthorityLevel,
    FleetError, Result,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, str::FromStr, sync::Arc};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    Strategic,
    Budget,
    Hiring,
    Operational,
    Technical,
    Policy,
    Emergency,
}

impl FromStr for DecisionType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "strategic" => Ok(DecisionType::Strategic),
            "budget" => Ok(DecisionType::Budget),
            "hiring" => Ok(DecisionType::Hiring),
            "operational" => Ok(DecisionType::Operational),
            "technical" => Ok(DecisionType::Technical),
            "policy" => Ok(DecisionType::Policy),
            "emergency" => Ok(DecisionType::Emergency),
            _ => Err(format!("Unknown decision type: {s}")),
        }
    }
}

/// Minimum authority required for a decision. Budget requests scale with
/// the amount; everything else consults a fixed table.
pub fn required_authority(decision_type: DecisionType, amount: Option<i64>) -> AuthorityLevel {
    if decision_type == DecisionType::Budget {
        if let Some(amount) = amount {
            return if amount > 100_000 {
                AuthorityLevel::Executive
            } else if amount > 25_000 {
                AuthorityLevel::SeniorManagement
            } else if amount > 5_000 {
                AuthorityLevel::MiddleManagement
            } else {
                AuthorityLevel::IndividualContributor
            };
        }
    }

    match decision_type {
        DecisionType::Strategic | DecisionType::Policy => AuthorityLevel::Executive,
        DecisionType::Budget | DecisionType::Hiring => AuthorityLevel::SeniorManagement,
        DecisionType::Operational | DecisionType::Technical | DecisionType::Emergency => {
            AuthorityLevel::MiddleManagement
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Escalated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub requester: String,
    pub decision_type: DecisionType,
    pub title: String,
    pub description: String,
    pub justification: String,
    pub amount: Option<i64>,
    pub priority: MessagePriority,
    pub current_approver: String,
    /// Approvers already traversed, oldest first
    pub chain: Vec<String>,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When the first escalation rule for this decision type fires
    pub deadline: DateTime<Utc>,
    pub resolution_reason: Option<String>,
}

/// Time-based escalation rule evaluated by the background sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRule {
    pub name: String,
    /// Applies only to this decision type when set
    pub decision_type: Option<DecisionType>,
    pub after_hours: f64,
}

impl EscalationRule {
    fn fires(&self, request: &ApprovalRequest, now: DateTime<Utc>) -> bool {
        if let Some(decision_type) = self.decision_type {
            if request.decision_type != decision_type {
                return false;
            }
        }
        let hours_elapsed = (now - request.updated_at).num_seconds() as f64 / 3600.0;
        hours_elapsed >= self.after_hours
    }
}

/// Default rule set: budgets stall after a day, emergencies after an hour
pub fn default_escalation_rules() -> Vec<EscalationRule> {
    vec![
        EscalationRule {
            name: "budget_unreviewed".to_string(),
            decision_type: Some(DecisionType::Budget),
            after_hours: 24.0,
        },
        EscalationRule {
            name: "emergency_unreviewed".to_string(),
            decision_type: Some(DecisionType::Emergency),
            after_hours: 1.0,
        },
        EscalationRule {
            name: "stale_request".to_string(),
            decision_type: None,
            after_hours: 72.0,
        },
    ]
}

/// Reporting-chain lookups the engine needs, supplied by the agent store
#[async_trait::async_trait]
pub trait OrgChart: Send + Sync {
    async fn authority_of(&self, agent_id: &str) -> Option<AuthorityLevel>;
    async fn manager_of(&self, agent_id: &str) -> Option<String>;
    async fn roster_with_authority(&self) -> Vec<(String, AuthorityLevel)>;
}

pub struct ApprovalEngine {
    requests: Arc<RwLock<HashMap<String, ApprovalRequest>>>,
    rules: Vec<EscalationRule>,
    org: Arc<dyn OrgChart>,
    sender: Arc<dyn MessageSender>,
    events: Arc<dyn EventSink>,
    allow_roster_fallback: bool,
}

impl ApprovalEngine {
    pub fn new(
        org: Arc<dyn OrgChart>,
        sender: Arc<dyn MessageSender>,
        events: Arc<dyn EventSink>,
        allow_roster_fallback: bool,
    ) -> Self {
        Self {
            requests: Arc::new(RwLock::new(HashMap::new())),
            rules: default_escalation_rules(),
            org,
            sender,
            events,
            allow_roster_fallback,
        }
    }

    pub fn with_rules(mut self, rules: Vec<EscalationRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Submit a decision for approval. Routing finds the lowest-authority
    /// approver that can still cover the decision.
    #[allow(clippy::too_many_arguments)]
    pub async fn request(
        &self,
        requester: &str,
        decision_type: DecisionType,
        title: &str,
        description: &str,
        justification: &str,
        amount: Option<i64>,
        priority: MessagePriority,
    ) -> Result<ApprovalRequest> {
        let required = required_authority(decision_type, amount);
        let approver = self
            .find_approver(requester, required)
            .await
            .ok_or_else(|| FleetError::NoApprover(format!("{decision_type:?}")))?;

        let now = Utc::now();
        let review_window_hours = self
            .rules
            .iter()
            .filter(|rule| rule.decision_type.map(|t| t == decision_type).unwrap_or(true))
            .map(|rule| rule.after_hours)
            .fold(f64::INFINITY, f64::min);
        let deadline = if review_window_hours.is_finite() {
            now + chrono::Duration::seconds((review_window_hours * 3600.0) as i64)
        } else {
            now + chrono::Duration::days(365)
        };

        let request = ApprovalRequest {
            id: format!("appr_{}", &Uuid::new_v4().simple().to_string()[..8]),
            requester: requester.to_string(),
            decision_type,
            title: title.to_string(),
            description: description.to_string(),
            justification: justification.to_string(),
            amount,
            priority,
            current_approver: approver.clone(),
            chain: Vec::new(),
            status: ApprovalStatus::Pending,
            created_at: now,
            updated_at: now,
            deadline,
            resolution_reason: None,
        };

        {
            let mut requests = self.requests.write().await;
            requests.insert(request.id.clone(), request.clone());
        }

        let amount_line = amount
            .map(|a| format!("\nRequested amount: {a}"))
            .unwrap_or_default();
        self.sender
            .send_direct(
                "system",
                &approver,
                &format!("APPROVAL NEEDED: {title}"),
                &format!(
                    "Type: {decision_type:?}\nRequested by: {requester}\n\n{description}\n\nJustification:\n{justification}{amount_line}\n\nRequest id: {}",
                    request.id
                ),
                priority,
                HashMap::from([("approval_request_id".to_string(), serde_json::json!(request.id))]),
            )
            .await?;

        self.audit(&request, "approval_requested", &format!("routed to {approver}"))
            .await?;

        Ok(request)
    }

    /// Walk the reporting chain for the first sufficient approver; fall
    /// back to a roster scan only when configured to.
    async fn find_approver(&self, requester: &str, required: AuthorityLevel) -> Option<String> {
        let mut cursor = self.org.manager_of(requester).await;
        let mut hops = 0;
        while let Some(candidate) = cursor {
            if hops > 100 {
                break; // acyclic by invariant, bounded regardless
            }
            if let Some(authority) = self.org.authority_of(&candidate).await {
                if authority >= required {
                    return Some(candidate);
                }
            }
            cursor = self.org.manager_of(&candidate).await;
            hops += 1;
        }

        if !self.allow_roster_fallback {
            return None;
        }

        // Lowest sufficient authority wins; ties resolve on agent id
        let mut candidates: Vec<(AuthorityLevel, String)> = self
            .org
            .roster_with_authority()
            .await
            .into_iter()
            .filter(|(id, authority)| id != requester && *authority >= required)
            .map(|(id, authority)| (authority, id))
            .collect();
        candidates.sort();
        candidates.into_iter().next().map(|(_, id)| id)
    }

    /// Approve a pending request. Only the current approver may act, and
    /// only while their authority still covers the decision; stale
    /// authority escalates instead of approving.
    pub async fn approve(&self, approver: &str, request_id: &str, reasoning: &str) -> Result<bool> {
        let request = self.get(request_id).await?;
        if request.status != ApprovalStatus::Pending || request.current_approver != approver {
            return Ok(false);
        }

        let required = required_authority(request.decision_type, request.amount);
        let authority = self.org.authority_of(approver).await;
        if authority.map(|a| a < required).unwrap_or(true) {
            self.escalate(request_id, "insufficient authority at decision time")
                .await?;
            return Ok(false);
        }

        let updated = {
            let mut requests = self.requests.write().await;
            let request = requests
                .get_mut(request_id)
                .ok_or_else(|| FleetError::NotFound(format!("approval request {request_id}")))?;
            request.status = ApprovalStatus::Approved;
            request.chain.push(approver.to_string());
            request.updated_at = Utc::now();
            request.resolution_reason = Some(reasoning.to_string());
            request.clone()
        };

        self.sender
            .send_direct(
                approver,
                &updated.requester,
                &format!("APPROVED: {}", updated.title),
                &format!("Your request has been approved.\n\nReasoning: {reasoning}"),
                MessagePriority::High,
                HashMap::from([("approval_request_id".to_string(), serde_json::json!(request_id))]),
            )
            .await?;
        self.audit(&updated, "approval_granted", reasoning).await?;

        Ok(true)
    }

    pub async fn reject(&self, approver: &str, request_id: &str, reasoning: &str) -> Result<bool> {
        let request = self.get(request_id).await?;
        if request.status != ApprovalStatus::Pending || request.current_approver != approver {
            return Ok(false);
        }

        let updated = {
            let mut requests = self.requests.write().await;
            let request = requests
                .get_mut(request_id)
                .ok_or_else(|| FleetError::NotFound(format!("approval request {request_id}")))?;
            request.status = ApprovalStatus::Rejected;
            request.chain.push(approver.to_string());
            request.updated_at = Utc::now();
            request.resolution_reason = Some(reasoning.to_string());
            request.clone()
        };

        self.sender
            .send_direct(
                approver,
                &updated.requester,
                &format!("REJECTED: {}", updated.title),
                &format!("Your request has been rejected.\n\nReason: {reasoning}"),
                MessagePriority::High,
                HashMap::from([("approval_request_id".to_string(), serde_json::json!(request_id))]),
            )
            .await?;
        self.audit(&updated, "approval_rejected", reasoning).await?;

        Ok(true)
    }

    /// Move a pending request to the current approver's manager. Fails
    /// with `CannotEscalate` when there is nobody higher.
    pub async fn escalate(&self, request_id: &str, reason: &str) -> Result<ApprovalRequest> {
        let request = self.get(request_id).await?;
        if request.status != ApprovalStatus::Pending {
            return Err(FleetError::Conflict(format!(
                "approval request {request_id} is not pending"
            )));
        }

        let next = self
            .org
            .manager_of(&request.current_approver)
            .await
            .ok_or_else(|| FleetError::CannotEscalate(request_id.to_string()))?;

        let updated = {
            let mut requests = self.requests.write().await;
            let request = requests
                .get_mut(request_id)
                .ok_or_else(|| FleetError::NotFound(format!("approval request {request_id}")))?;
            request.chain.push(request.current_approver.clone());
            request.current_approver = next.clone();
            request.updated_at = Utc::now();
            request.clone()
        };

        self.sender
            .send_direct(
                "system",
                &next,
                &format!("ESCALATED APPROVAL: {}", updated.title),
                &format!(
                    "An approval request was escalated to you.\nReason: {reason}\n\n{}\n\nRequest id: {request_id}",
                    updated.description
                ),
                MessagePriority::High,
                HashMap::from([("approval_request_id".to_string(), serde_json::json!(request_id))]),
            )
            .await?;
        self.audit(&updated, "approval_escalated", reason).await?;

        Ok(updated)
    }

    /// Evaluate escalation rules against every pending request; each
    /// request escalates at most once per sweep. A request with no higher
    /// approver is marked escalated in place and keeps its approver.
    pub async fn sweep_escalations(&self) -> Result<usize> {
        let now = Utc::now();
        let pending: Vec<ApprovalRequest> = {
            let requests = self.requests.read().await;
            requests
                .values()
                .filter(|r| r.status == ApprovalStatus::Pending)
                .cloned()
                .collect()
        };

        let mut escalated = 0;
        for request in pending {
            let fired = self.rules.iter().find(|rule| rule.fires(&request, now));
            let rule = match fired {
                Some(rule) => rule.clone(),
                None => continue,
            };

            match self.escalate(&request.id, &format!("timeout: {}", rule.name)).await {
                Ok(_) => escalated += 1,
                Err(FleetError::CannotEscalate(_)) => {
                    // Top of the chain: flag the stall, keep the approver
                    let updated = {
                        let mut requests = self.requests.write().await;
                        match requests.get_mut(&request.id) {
                            Some(request) => {
                                request.status = ApprovalStatus::Escalated;
                                request.updated_at = now;
                                request.resolution_reason =
                                    Some(format!("timeout: {}", rule.name));
                                request.clone()
                            }
                            None => continue,
                        }
                    };
                    self.audit(&updated, "approval_stalled", "no higher approver")
                        .await?;
                    escalated += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(escalated)
    }

    pub async fn get(&self, request_id: &str) -> Result<ApprovalRequest> {
        let requests = self.requests.read().await;
        requests
            .get(request_id)
            .cloned()
            .ok_or_else(|| FleetError::NotFound(format!("approval request {request_id}")))
    }

    pub async fn pending_for(&self, approver: &str) -> Vec<ApprovalRequest> {
        let requests = self.requests.read().await;
        let mut pending: Vec<ApprovalRequest> = requests
            .values()
            .filter(|r| r.status == ApprovalStatus::Pending && r.current_approver == approver)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        pending
    }

    pub async fn pending_count(&self) -> usize {
        let requests = self.requests.read().await;
        requests
            .values()
            .filter(|r| r.status == ApprovalStatus::Pending)
            .count()
    }

    async fn audit(&self, request: &ApprovalRequest, action: &str, detail: &str) -> Result<()> {
        // Approval transitions are audit-critical; the append is awaited.
        self.events
            .append(
                EventRecord::new(
                    "",
                    &request.current_approver,
                    EventKind::Approval,
                    action,
                    format!("{action} for '{}': {detail}", request.title),
                )
                .with_context("request_id", serde_json::json!(request.id))
                .with_context("requester", serde_json::json!(request.requester))
                .with_context("decision_type", serde_json::json!(format!("{:?}", request.decision_type))),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullEventSink;
    use std::sync::Mutex;

    /// ic -> mm -> sm -> exec reporting chain
    struct ChainOrg {
        chain: HashMap<String, (AuthorityLevel, Option<String>)>,
    }

    impl ChainOrg {
        fn standard() -> Self {
            let mut chain = HashMap::new();
            chain.insert(
                "ic".to_string(),
                (AuthorityLevel::IndividualContributor, Some("mm".to_string())),
            );
            chain.insert(
                "mm".to_string(),
                (AuthorityLevel::MiddleManagement, Some("sm".to_string())),
            );
            chain.insert(
                "sm".to_string(),
                (AuthorityLevel::SeniorManagement, Some("exec".to_string())),
            );
            chain.insert("exec".to_string(), (AuthorityLevel::Executive, None));
            Self { chain }
        }
    }

    #[async_trait::async_trait]
    impl OrgChart for ChainOrg {
        async fn authority_of(&self, agent_id: &str) -> Option<AuthorityLevel> {
            self.chain.get(agent_id).map(|(level, _)| *level)
        }

        async fn manager_of(&self, agent_id: &str) -> Option<String> {
            self.chain.get(agent_id).and_then(|(_, manager)| manager.clone())
        }

        async fn roster_with_authority(&self) -> Vec<(String, AuthorityLevel)> {
            self.chain
                .iter()
                .map(|(id, (level, _))| (id.clone(), *level))
                .collect()
        }
    }

    struct RecordingSender(Mutex<Vec<(String, String)>>);

    #[async_trait::async_trait]
    impl MessageSender for RecordingSender {
        async fn send_direct(
            &self,
            _from: &str,
            to_agent: &str,
            subject: &str,
            _body: &str,
            _priority: MessagePriority,
            _metadata: HashMap<String, serde_json::Value>,
        ) -> Result<String> {
            self.0
                .lock()
                .unwrap()
                .push((to_agent.to_string(), subject.to_string()));
            Ok("msg_test".to_string())
        }
    }

    fn engine(fallback: bool) -> (ApprovalEngine, Arc<RecordingSender>) {
        let sender = Arc::new(RecordingSender(Mutex::new(Vec::new())));
        let engine = ApprovalEngine::new(
            Arc::new(ChainOrg::standard()),
            sender.clone(),
            Arc::new(NullEventSink),
            fallback,
        );
        (engine, sender)
    }

    #[test]
    fn budget_authority_scales_with_amount() {
        assert_eq!(
            required_authority(DecisionType::Budget, Some(200_000)),
            AuthorityLevel::Executive
        );
        assert_eq!(
            required_authority(DecisionType::Budget, Some(50_000)),
            AuthorityLevel::SeniorManagement
        );
        assert_eq!(
            required_authority(DecisionType::Budget, Some(10_000)),
            AuthorityLevel::MiddleManagement
        );
        assert_eq!(
            required_authority(DecisionType::Budget, Some(500)),
            AuthorityLevel::IndividualContributor
        );
        assert_eq!(
            required_authority(DecisionType::Strategic, None),
            AuthorityLevel::Executive
        );
        assert_eq!(
            required_authority(DecisionType::Technical, None),
            AuthorityLevel::MiddleManagement
        );
    }

    #[tokio::test]
    async fn large_budget_routes_straight_to_executive() {
        // Scenario: 200k budget from an IC whose chain is ic->mm->sm->exec
        let (engine, sender) = engine(true);
        let request = engine
            .request(
                "ic",
                DecisionType::Budget,
                "New GPU cluster",
                "buy hardware",
                "we need compute",
                Some(200_000),
                MessagePriority::High,
            )
            .await
            .unwrap();

        assert_eq!(request.current_approver, "exec");
        assert_eq!(request.status, ApprovalStatus::Pending);
        let sent = sender.0.lock().unwrap();
        assert!(sent.iter().any(|(to, subject)| to == "exec" && subject.contains("APPROVAL")));
    }

    #[tokio::test]
    async fn small_budget_stops_at_first_sufficient_manager() {
        let (engine, _) = engine(true);
        let request = engine
            .request(
                "ic",
                DecisionType::Budget,
                "Team lunch",
                "morale",
                "team event",
                Some(10_000),
                MessagePriority::Normal,
            )
            .await
            .unwrap();
        assert_eq!(request.current_approver, "mm");
    }

    #[tokio::test]
    async fn approve_requires_current_approver() {
        let (engine, _) = engine(true);
        let request = engine
            .request(
                "ic",
                DecisionType::Technical,
                "Switch database",
                "migrate",
                "performance",
                None,
                MessagePriority::Normal,
            )
            .await
            .unwrap();

        assert!(!engine.approve("sm", &request.id, "looks fine").await.unwrap());
        assert!(engine.approve("mm", &request.id, "approved").await.unwrap());

        let updated = engine.get(&request.id).await.unwrap();
        assert_eq!(updated.status, ApprovalStatus::Approved);
        assert_eq!(updated.chain, vec!["mm".to_string()]);

        // Already resolved: further decisions are no-ops
        assert!(!engine.reject("mm", &request.id, "changed my mind").await.unwrap());
    }

    #[tokio::test]
    async fn reject_notifies_requester() {
        let (engine, sender) = engine(true);
        let request = engine
            .request(
                "ic",
                DecisionType::Technical,
                "Rewrite in brainfuck",
                "rewrite",
                "fun",
                None,
                MessagePriority::Low,
            )
            .await
            .unwrap();
        assert!(engine.reject("mm", &request.id, "no").await.unwrap());

        let sent = sender.0.lock().unwrap();
        assert!(sent.iter().any(|(to, subject)| to == "ic" && subject.starts_with("REJECTED")));
    }

    #[tokio::test]
    async fn escalate_walks_up_and_fails_at_the_top() {
        let (engine, _) = engine(true);
        let request = engine
            .request(
                "ic",
                DecisionType::Technical,
                "Refactor",
                "refactor",
                "debt",
                None,
                MessagePriority::Normal,
            )
            .await
            .unwrap();
        assert_eq!(request.current_approver, "mm");

        let updated = engine.escalate(&request.id, "taking too long").await.unwrap();
        assert_eq!(updated.current_approver, "sm");
        assert_eq!(updated.chain, vec!["mm".to_string()]);

        let updated = engine.escalate(&request.id, "still waiting").await.unwrap();
        assert_eq!(updated.current_approver, "exec");

        let result = engine.escalate(&request.id, "anyone?").await;
        assert!(matches!(result, Err(FleetError::CannotEscalate(_))));
    }

    #[tokio::test]
    async fn timeout_with_no_higher_approver_marks_escalated_in_place() {
        // Scenario: 200k budget lands on exec; the timeout sweep cannot
        // climb higher, so the request is flagged and keeps its approver.
        let (engine, _) = engine(true);
        let request = engine
            .request(
                "ic",
                DecisionType::Budget,
                "Datacenter",
                "build one",
                "scale",
                Some(200_000),
                MessagePriority::High,
            )
            .await
            .unwrap();
        assert_eq!(request.current_approver, "exec");

        // Age the request past the budget rule's 24h window
        {
            let mut requests = engine.requests.write().await;
            let entry = requests.get_mut(&request.id).unwrap();
            entry.updated_at = Utc::now() - chrono::Duration::hours(25);
        }

        assert_eq!(engine.sweep_escalations().await.unwrap(), 1);
        let updated = engine.get(&request.id).await.unwrap();
        assert_eq!(updated.status, ApprovalStatus::Escalated);
        assert_eq!(updated.current_approver, "exec");
        assert!(updated.resolution_reason.as_deref().unwrap().starts_with("timeout"));
    }

    #[tokio::test]
    async fn sweep_escalates_once_per_evaluation() {
        let (engine, _) = engine(true);
        let request = engine
            .request(
                "ic",
                DecisionType::Emergency,
                "Prod down",
                "fix it",
                "outage",
                None,
                MessagePriority::Urgent,
            )
            .await
            .unwrap();
        assert_eq!(request.current_approver, "mm");

        {
            let mut requests = engine.requests.write().await;
            requests.get_mut(&request.id).unwrap().updated_at =
                Utc::now() - chrono::Duration::hours(2);
        }

        assert_eq!(engine.sweep_escalations().await.unwrap(), 1);
        let updated = engine.get(&request.id).await.unwrap();
        // One hop, not a climb to the top in a single sweep
        assert_eq!(updated.current_approver, "sm");
        assert_eq!(updated.status, ApprovalStatus::Pending);
        // The escalation refreshed updated_at, so nothing fires now
        assert_eq!(engine.sweep_escalations().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn no_approver_without_fallback() {
        // An org of only individual contributors cannot approve anything
        struct FlatOrg;

        #[async_trait::async_trait]
        impl OrgChart for FlatOrg {
            async fn authority_of(&self, _agent_id: &str) -> Option<AuthorityLevel> {
                Some(AuthorityLevel::IndividualContributor)
            }
            async fn manager_of(&self, _agent_id: &str) -> Option<String> {
                None
            }
            async fn roster_with_authority(&self) -> Vec<(String, AuthorityLevel)> {
                vec![
                    ("a".to_string(), AuthorityLevel::IndividualContributor),
                    ("b".to_string(), AuthorityLevel::IndividualContributor),
                ]
            }
        }

        let engine = ApprovalEngine::new(
            Arc::new(FlatOrg),
            Arc::new(RecordingSender(Mutex::new(Vec::new()))),
            Arc::new(NullEventSink),
            true,
        );
        let result = engine
            .request(
                "a",
                DecisionType::Strategic,
                "Pivot",
                "pivot the company",
                "trust me",
                None,
                MessagePriority::High,
            )
            .await;
        assert!(matches!(result, Err(FleetError::NoApprover(_))));
    }

    #[tokio::test]
    async fn roster_fallback_is_configurable() {
        // Requester with no manager: chain walk yields nothing, only the
        // roster scan can find the executive.
        struct NoManagerOrg;

        #[async_trait::async_trait]
        impl OrgChart for NoManagerOrg {
            async fn authority_of(&self, agent_id: &str) -> Option<AuthorityLevel> {
                match agent_id {
                    "exec" => Some(AuthorityLevel::Executive),
                    _ => Some(AuthorityLevel::IndividualContributor),
                }
            }
            async fn manager_of(&self, _agent_id: &str) -> Option<String> {
                None
            }
            async fn roster_with_authority(&self) -> Vec<(String, AuthorityLevel)> {
                vec![
                    ("loner".to_string(), AuthorityLevel::IndividualContributor),
                    ("exec".to_string(), AuthorityLevel::Executive),
                ]
            }
        }

        let sender = Arc::new(RecordingSender(Mutex::new(Vec::new())));
        let with_fallback = ApprovalEngine::new(
            Arc::new(NoManagerOrg),
            sender.clone(),
            Arc::new(NullEventSink),
            true,
        );
        let request = with_fallback
            .request(
                "loner",
                DecisionType::Strategic,
                "Plan",
                "plan",
                "reasons",
                None,
                MessagePriority::Normal,
            )
            .await
            .unwrap();
        assert_eq!(request.current_approver, "exec");

        let without_fallback = ApprovalEngine::new(
            Arc::new(NoManagerOrg),
            sender,
            Arc::new(NullEventSink),
            false,
        );
        let result = without_fallback
            .request(
                "loner",
                DecisionType::Strategic,
                "Plan",
                "plan",
                "reasons",
                None,
                MessagePriority::Normal,
            )
            .await;
        assert!(matches!(result, Err(FleetError::NoApprover(_))));
    }
}
