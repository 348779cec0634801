//! Inter-agent messaging: direct, team, broadcast, and collaboration
//! requests.
//!
//! Addressing is a tagged variant, so a message targets exactly one of an
//! agent, a team, or a broadcast audience. Messages from one sender to one
//! recipient arrive in send order; no ordering is promised across senders.
//! Priority is recipient metadata and never reorders delivery.

use crate::{
    events::{EventKind, EventRecord, EventSink},
    models::AgentRole,
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
pub enum MessageKind {
    Direct,
    Team,
    Broadcast,
    TaskUpdate,
    MeetingInvite,
    CollaborationRequest,
    StatusUpdate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Exactly one destination per message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "target")]
pub enum Address {
    Agent { agent_id: String },
    Team { team_id: String },
    Broadcast { target_roles: Option<HashSet<AgentRole>> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub from_agent: String,
    pub address: Address,
    pub kind: MessageKind,
    pub priority: MessagePriority,
    pub subject: String,
    pub body: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    pub read_by: HashSet<String>,
    pub replied: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub description: String,
    pub members: HashSet<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CollaborationReply {
    Accept,
    Decline,
    Counter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationRequest {
    pub id: String,
    pub from_agent: String,
    pub to_agents: Vec<String>,
    pub task_id: String,
    pub description: String,
    pub required_skills: Vec<String>,
    pub urgency: MessagePriority,
    pub created_at: DateTime<Utc>,
    pub responses: HashMap<String, CollaborationReply>,
}

/// Narrow send capability consumed by components that only need to
/// notify agents (approvals, scheduler). Wired at composition time.
#[async_trait::async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_direct(
        &self,
        from_agent: &str,
        to_agent: &str,
        subject: &str,
        body: &str,
        priority: MessagePriority,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<String>;
}

/// Roster lookups the bus needs for broadcast fan-out, supplied by the
/// agent store at composition time.
#[async_trait::async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn role_of(&self, agent_id: &str) -> Option<AgentRole>;
    async fn roster(&self) -> Vec<(String, AgentRole)>;
}

#[derive(Default)]
struct BusState {
    messages: Vec<Message>,
    by_id: HashMap<String, usize>,
    teams: HashMap<String, Team>,
    collaborations: HashMap<String, CollaborationRequest>,
}

pub struct MessageBus {
    state: Arc<RwLock<BusState>>,
    directory: Arc<dyn AgentDirectory>,
    events: Arc<dyn EventSink>,
}

impl MessageBus {
    pub fn new(directory: Arc<dyn AgentDirectory>, events: Arc<dyn EventSink>) -> Self {
        Self {
            state: Arc::new(RwLock::new(BusState::default())),
            directory,
            events,
        }
    }

    pub async fn send_direct(
        &self,
        from_agent: &str,
        to_agent: &str,
        subject: &str,
        body: &str,
        priority: MessagePriority,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<String> {
        self.send_with_kind(
            from_agent,
            Address::Agent {
                agent_id: to_agent.to_string(),
            },
            MessageKind::Direct,
            subject,
            body,
            priority,
            metadata,
        )
        .await
    }

    /// Send to a team channel. A sender outside the team joins it first.
    pub async fn send_team(
        &self,
        from_agent: &str,
        team_id: &str,
        subject: &str,
        body: &str,
        priority: MessagePriority,
    ) -> Result<String> {
        {
            let mut state = self.state.write().await;
            let team = state
                .teams
                .get_mut(team_id)
                .ok_or_else(|| FleetError::NotFound(format!("team {team_id}")))?;
            team.members.insert(from_agent.to_string());
            team.last_activity = Utc::now();
        }

        self.send_with_kind(
            from_agent,
            Address::Team {
                team_id: team_id.to_string(),
            },
            MessageKind::Team,
            subject,
            body,
            priority,
            HashMap::new(),
        )
        .await
    }

    /// Broadcast to every agent, or to agents in `target_roles` when set
    pub async fn broadcast(
        &self,
        from_agent: &str,
        subject: &str,
        body: &str,
        target_roles: Option<HashSet<AgentRole>>,
        priority: MessagePriority,
    ) -> Result<String> {
        self.send_with_kind(
            from_agent,
            Address::Broadcast { target_roles },
            MessageKind::Broadcast,
            subject,
            body,
            priority,
            HashMap::new(),
        )
        .await
    }

    async fn send_with_kind(
        &self,
        from_agent: &str,
        address: Address,
        kind: MessageKind,
        subject: &str,
        body: &str,
        priority: MessagePriority,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<String> {
        if body.is_empty() {
            return Err(FleetError::InvalidArgument("message body cannot be empty".to_string()));
        }

        let message = Message {
            id: format!("msg_{}", &Uuid::new_v4().simple().to_string()[..12]),
            from_agent: from_agent.to_string(),
            address,
            kind,
            priority,
            subject: subject.to_string(),
            body: body.to_string(),
            metadata,
            timestamp: Utc::now(),
            read_by: HashSet::new(),
            replied: false,
        };
        let message_id = message.id.clone();

        {
            let mut state = self.state.write().await;
            let index = state.messages.len();
            state.by_id.insert(message_id.clone(), index);
            state.messages.push(message);
        }

        // Durability comes from the event log; callers do not wait on it.
        let events = self.events.clone();
        let record = EventRecord::new(
            "",
            from_agent,
            EventKind::Communication,
            "message_sent",
            format!("{kind:?} message: {subject}"),
        )
        .with_context("message_id", serde_json::json!(message_id));
        tokio::spawn(async move {
            if let Err(e) = events.append(record).await {
                tracing::warn!("failed to log message event: {e}");
            }
        });

        Ok(message_id)
    }

    /// Whether `agent_id` is a legitimate recipient of `message`
    async fn is_recipient(&self, agent_id: &str, message: &Message) -> bool {
        if message.from_agent == agent_id {
            return false;
        }
        match &message.address {
            Address::Agent { agent_id: target } => target == agent_id,
            Address::Team { team_id } => {
                let state = self.state.read().await;
                state
                    .teams
                    .get(team_id)
                    .map(|team| team.members.contains(agent_id))
                    .unwrap_or(false)
            }
            Address::Broadcast { target_roles } => match target_roles {
                None => true,
                Some(roles) => match self.directory.role_of(agent_id).await {
                    Some(role) => roles.contains(&role),
                    None => false,
                },
            },
        }
    }

    /// Mailbox listing, newest first
    pub async fn list_messages(
        &self,
        agent_id: &str,
        unread_only: bool,
        limit: usize,
    ) -> Vec<Message> {
        let snapshot: Vec<Message> = {
            let state = self.state.read().await;
            state.messages.iter().rev().cloned().collect()
        };

        let mut result = Vec::new();
        for message in snapshot {
            if result.len() >= limit {
                break;
            }
            if unread_only && message.read_by.contains(agent_id) {
                continue;
            }
            if self.is_recipient(agent_id, &message).await {
                result.push(message);
            }
        }
        result
    }

    /// Mark a message read by `agent_id`; only legitimate recipients may
    pub async fn mark_read(&self, agent_id: &str, message_id: &str) -> Result<bool> {
        let message = {
            let state = self.state.read().await;
            match state.by_id.get(message_id) {
                Some(&index) => state.messages[index].clone(),
                None => return Ok(false),
            }
        };

        if !self.is_recipient(agent_id, &message).await {
            return Ok(false);
        }

        let mut state = self.state.write().await;
        if let Some(&index) = state.by_id.get(message_id) {
            state.messages[index].read_by.insert(agent_id.to_string());
        }
        Ok(true)
    }

    // --- teams ------------------------------------------------------------

    pub async fn create_team(
        &self,
        created_by: &str,
        name: &str,
        description: &str,
        member_ids: Vec<String>,
    ) -> Result<Team> {
        let mut members: HashSet<String> = member_ids.into_iter().collect();
        members.insert(created_by.to_string());

        let team = Team {
            id: format!("team_{}", &Uuid::new_v4().simple().to_string()[..8]),
            name: name.to_string(),
            description: description.to_string(),
            members,
            created_by: created_by.to_string(),
            created_at: Utc::now(),
            last_activity: Utc::now(),
        };

        {
            let mut state = self.state.write().await;
            state.teams.insert(team.id.clone(), team.clone());
        }

        // Tell every member except the creator that they were added
        for member in team.members.iter().filter(|m| *m != created_by) {
            self.send_direct(
                "system",
                member,
                &format!("Added to team: {name}"),
                &format!("You have been added to the '{name}' team by {created_by}. {description}"),
                MessagePriority::Normal,
                HashMap::from([("team_id".to_string(), serde_json::json!(team.id))]),
            )
            .await?;
        }

        Ok(team)
    }

    pub async fn add_team_member(
        &self,
        team_id: &str,
        agent_id: &str,
        added_by: &str,
    ) -> Result<bool> {
        let (name, description, newly_added) = {
            let mut state = self.state.write().await;
            let team = state
                .teams
                .get_mut(team_id)
                .ok_or_else(|| FleetError::NotFound(format!("team {team_id}")))?;
            let newly_added = team.members.insert(agent_id.to_string());
            (team.name.clone(), team.description.clone(), newly_added)
        };

        if newly_added {
            self.send_direct(
                added_by,
                agent_id,
                &format!("Added to team: {name}"),
                &format!("You have been added to the '{name}' team. {description}"),
                MessagePriority::Normal,
                HashMap::from([("team_id".to_string(), serde_json::json!(team_id))]),
            )
            .await?;
        }
        Ok(newly_added)
    }

    pub async fn get_team(&self, team_id: &str) -> Result<Team> {
        let state = self.state.read().await;
        state
            .teams
            .get(team_id)
            .cloned()
            .ok_or_else(|| FleetError::NotFound(format!("team {team_id}")))
    }

    pub async fn teams_for_agent(&self, agent_id: &str) -> Vec<Team> {
        let state = self.state.read().await;
        let mut teams: Vec<Team> = state
            .teams
            .values()
            .filter(|team| team.members.contains(agent_id))
            .cloned()
            .collect();
        teams.sort_by(|a, b| a.id.cmp(&b.id));
        teams
    }

    // --- collaboration ----------------------------------------------------

    /// Ask other agents for help on a task. Each invitee receives a
    /// collaboration-request message carrying the request id.
    pub async fn request_collaboration(
        &self,
        from_agent: &str,
        to_agents: Vec<String>,
        task_id: &str,
        description: &str,
        required_skills: Vec<String>,
        urgency: MessagePriority,
    ) -> Result<String> {
        if to_agents.is_empty() {
            return Err(FleetError::InvalidArgument(
                "collaboration request needs at least one invitee".to_string(),
            ));
        }

        let request = CollaborationRequest {
            id: format!("collab_{}", &Uuid::new_v4().simple().to_string()[..8]),
            from_agent: from_agent.to_string(),
            to_agents: to_agents.clone(),
            task_id: task_id.to_string(),
            description: description.to_string(),
            required_skills: required_skills.clone(),
            urgency,
            created_at: Utc::now(),
            responses: HashMap::new(),
        };
        let request_id = request.id.clone();

        {
            let mut state = self.state.write().await;
            state.collaborations.insert(request_id.clone(), request);
        }

        for invitee in &to_agents {
            self.send_with_kind(
                from_agent,
                Address::Agent {
                    agent_id: invitee.clone(),
                },
                MessageKind::CollaborationRequest,
                &format!("Collaboration request: {description}"),
                &format!(
                    "Help needed on task {task_id}. Required skills: {}. Reply accept, decline, or counter.",
                    required_skills.join(", ")
                ),
                urgency,
                HashMap::from([
                    ("collaboration_request_id".to_string(), serde_json::json!(request_id)),
                    ("task_id".to_string(), serde_json::json!(task_id)),
                ]),
            )
            .await?;
        }

        Ok(request_id)
    }

    /// Record an invitee's reply and notify the requester
    pub async fn respond_to_collaboration(
        &self,
        agent_id: &str,
        request_id: &str,
        reply: CollaborationReply,
        note: Option<&str>,
    ) -> Result<()> {
        let requester = {
            let mut state = self.state.write().await;
            let request = state
                .collaborations
                .get_mut(request_id)
                .ok_or_else(|| FleetError::NotFound(format!("collaboration request {request_id}")))?;
            if !request.to_agents.iter().any(|a| a == agent_id) {
                return Err(FleetError::PermissionDenied(format!(
                    "agent {agent_id} was not invited to {request_id}"
                )));
            }
            request.responses.insert(agent_id.to_string(), reply);
            request.from_agent.clone()
        };

        let mut body = format!("Response to collaboration request: {reply:?}");
        if let Some(note) = note {
            body.push_str(&format!("\nNote: {note}"));
        }
        self.send_direct(
            agent_id,
            &requester,
            &format!("Re: collaboration request - {reply:?}"),
            &body,
            MessagePriority::Normal,
            HashMap::from([
                ("collaboration_request_id".to_string(), serde_json::json!(request_id)),
            ]),
        )
        .await?;

        Ok(())
    }

    pub async fn get_collaboration(&self, request_id: &str) -> Result<CollaborationRequest> {
        let state = self.state.read().await;
        state
            .collaborations
            .get(request_id)
            .cloned()
            .ok_or_else(|| FleetError::NotFound(format!("collaboration request {request_id}")))
    }

    /// Invite agents to a meeting at `scheduled_for`
    pub async fn schedule_meeting(
        &self,
        organizer: &str,
        attendees: Vec<String>,
        subject: &str,
        description: &str,
        scheduled_for: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let mut invite_ids = Vec::new();
        for attendee in &attendees {
            let id = self
                .send_with_kind(
                    organizer,
                    Address::Agent {
                        agent_id: attendee.clone(),
                    },
                    MessageKind::MeetingInvite,
                    &format!("Meeting invitation: {subject}"),
                    &format!(
                        "You are invited to a meeting at {scheduled_for}.\n\n{description}\n\nReply accept or decline."
                    ),
                    MessagePriority::High,
                    HashMap::from([("scheduled_for".to_string(), serde_json::json!(scheduled_for))]),
                )
                .await?;
            invite_ids.push(id);
        }
        Ok(invite_ids)
    }
}

#[async_trait::async_trait]
impl MessageSender for MessageBus {
    async fn send_direct(
        &self,
        from_agent: &str,
        to_agent: &str,
        subject: &str,
        body: &str,
        priority: MessagePriority,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<String> {
        MessageBus::send_direct(self, from_agent, to_agent, subject, body, priority, metadata).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullEventSink;

    struct FixedDirectory(Vec<(String, AgentRole)>);

    #[async_trait::async_trait]
    impl AgentDirectory for FixedDirectory {
        async fn role_of(&self, agent_id: &str) -> Option<AgentRole> {
            self.0
                .iter()
                .find(|(id, _)| id == agent_id)
                .map(|(_, role)| *role)
        }

        async fn roster(&self) -> Vec<(String, AgentRole)> {
            self.0.clone()
        }
    }

    fn bus() -> MessageBus {
        let directory = FixedDirectory(vec![
            ("ceo".to_string(), AgentRole::Executive),
            ("dev1".to_string(), AgentRole::IndividualContributor),
            ("dev2".to_string(), AgentRole::IndividualContributor),
            ("mm".to_string(), AgentRole::MiddleManagement),
        ]);
        MessageBus::new(Arc::new(directory), Arc::new(NullEventSink))
    }

    #[tokio::test]
    async fn direct_messages_arrive_in_send_order() {
        let bus = bus();
        for i in 0..5 {
            bus.send_direct("dev1", "dev2", "s", &format!("message {i}"), Default::default(), HashMap::new())
                .await
                .unwrap();
        }

        let mut inbox = bus.list_messages("dev2", false, 50).await;
        inbox.reverse(); // listing is newest-first
        let bodies: Vec<&str> = inbox.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["message 0", "message 1", "message 2", "message 3", "message 4"]);
    }

    #[tokio::test]
    async fn sender_does_not_receive_own_message() {
        let bus = bus();
        bus.send_direct("dev1", "dev2", "s", "hello", Default::default(), HashMap::new())
            .await
            .unwrap();
        assert!(bus.list_messages("dev1", false, 50).await.is_empty());
        assert!(bus.list_messages("ceo", false, 50).await.is_empty());
    }

    #[tokio::test]
    async fn team_send_auto_joins_sender_and_fans_out() {
        let bus = bus();
        let team = bus
            .create_team("mm", "core", "Core team", vec!["dev1".to_string()])
            .await
            .unwrap();

        // dev2 is not a member; sending joins them
        bus.send_team("dev2", &team.id, "standup", "notes", Default::default())
            .await
            .unwrap();
        let team = bus.get_team(&team.id).await.unwrap();
        assert!(team.members.contains("dev2"));

        // dev1 sees the team message, dev2 (the sender) does not
        let dev1_inbox = bus.list_messages("dev1", false, 50).await;
        assert!(dev1_inbox.iter().any(|m| m.subject == "standup"));
        let dev2_inbox = bus.list_messages("dev2", false, 50).await;
        assert!(!dev2_inbox.iter().any(|m| m.subject == "standup"));
    }

    #[tokio::test]
    async fn send_to_missing_team_fails() {
        let bus = bus();
        let result = bus
            .send_team("dev1", "team_missing", "s", "b", Default::default())
            .await;
        assert!(matches!(result, Err(FleetError::NotFound(_))));
    }

    #[tokio::test]
    async fn broadcast_respects_target_roles() {
        let bus = bus();
        bus.broadcast(
            "ceo",
            "leadership sync",
            "quarterly goals",
            Some(HashSet::from([AgentRole::MiddleManagement])),
            MessagePriority::High,
        )
        .await
        .unwrap();

        assert_eq!(bus.list_messages("mm", false, 50).await.len(), 1);
        assert!(bus.list_messages("dev1", false, 50).await.is_empty());

        bus.broadcast("ceo", "all hands", "everyone", None, Default::default())
            .await
            .unwrap();
        assert_eq!(bus.list_messages("dev1", false, 50).await.len(), 1);
    }

    #[tokio::test]
    async fn mark_read_requires_recipient() {
        let bus = bus();
        let id = bus
            .send_direct("dev1", "dev2", "s", "hello", Default::default(), HashMap::new())
            .await
            .unwrap();

        assert!(!bus.mark_read("ceo", &id).await.unwrap());
        assert!(bus.mark_read("dev2", &id).await.unwrap());
        assert!(!bus.mark_read("dev2", "msg_missing").await.unwrap());

        let unread = bus.list_messages("dev2", true, 50).await;
        assert!(unread.is_empty());
    }

    #[tokio::test]
    async fn listing_honors_limit() {
        let bus = bus();
        for i in 0..10 {
            bus.send_direct("dev1", "dev2", "s", &format!("m{i}"), Default::default(), HashMap::new())
                .await
                .unwrap();
        }
        let inbox = bus.list_messages("dev2", false, 3).await;
        assert_eq!(inbox.len(), 3);
        assert_eq!(inbox[0].body, "m9");
    }

    #[tokio::test]
    async fn collaboration_round_trip() {
        let bus = bus();
        let request_id = bus
            .request_collaboration(
                "dev1",
                vec!["dev2".to_string(), "mm".to_string()],
                "task_1",
                "need a reviewer",
                vec!["backend".to_string()],
                MessagePriority::High,
            )
            .await
            .unwrap();

        // Both invitees got a request message
        assert_eq!(
            bus.list_messages("dev2", false, 50)
                .await
                .iter()
                .filter(|m| m.kind == MessageKind::CollaborationRequest)
                .count(),
            1
        );

        // Uninvited agents cannot respond
        let result = bus
            .respond_to_collaboration("ceo", &request_id, CollaborationReply::Accept, None)
            .await;
        assert!(matches!(result, Err(FleetError::PermissionDenied(_))));

        bus.respond_to_collaboration("dev2", &request_id, CollaborationReply::Accept, Some("on it"))
            .await
            .unwrap();
        let request = bus.get_collaboration(&request_id).await.unwrap();
        assert_eq!(request.responses.get("dev2"), Some(&CollaborationReply::Accept));

        // Requester was notified of the reply
        let dev1_inbox = bus.list_messages("dev1", false, 50).await;
        assert!(dev1_inbox.iter().any(|m| m.body.contains("Accept")));
    }

    #[tokio::test]
    async fn meeting_invites_reach_all_attendees() {
        let bus = bus();
        let ids = bus
            .schedule_meeting(
                "mm",
                vec!["dev1".to_string(), "dev2".to_string()],
                "planning",
                "sprint planning",
                Utc::now() + chrono::Duration::hours(2),
            )
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        let inbox = bus.list_messages("dev1", false, 50).await;
        assert!(inbox.iter().any(|m| m.kind == MessageKind::MeetingInvite));
    }
}
