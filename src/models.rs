use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    str::FromStr,
};
use uuid::Uuid;

/// Organizational role of an agent
///
/// Roles are structural: they determine the default hierarchy level and
/// the authority level used by the approval engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Executive,
    SeniorManagement,
    MiddleManagement,
    IndividualContributor,
    Intern,
}

impl AgentRole {
    /// Default hierarchy level (1-100) for a freshly registered agent
    pub fn default_hierarchy_level(&self) -> u8 {
        match self {
            AgentRole::Executive => 100,
            AgentRole::SeniorManagement => 80,
            AgentRole::MiddleManagement => 60,
            AgentRole::IndividualContributor => 40,
            AgentRole::Intern => 20,
        }
    }

    pub fn authority(&self) -> AuthorityLevel {
        match self {
            AgentRole::Executive => AuthorityLevel::Executive,
            AgentRole::SeniorManagement => AuthorityLevel::SeniorManagement,
            AgentRole::MiddleManagement => AuthorityLevel::MiddleManagement,
            AgentRole::IndividualContributor => AuthorityLevel::IndividualContributor,
            AgentRole::Intern => AuthorityLevel::Intern,
        }
    }
}

impl FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "executive" => Ok(AgentRole::Executive),
            "senior_management" => Ok(AgentRole::SeniorManagement),
            "middle_management" => Ok(AgentRole::MiddleManagement),
            "individual_contributor" => Ok(AgentRole::IndividualContributor),
            "intern" => Ok(AgentRole::Intern),
            _ => Err(format!("Unknown agent role: {s}")),
        }
    }
}

/// Ordinal authority rank used to gate approvals
///
/// Ordering is meaningful: `Intern < IndividualContributor <
/// MiddleManagement < SeniorManagement < Executive`.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityLevel {
    Intern,
    IndividualContributor,
    MiddleManagement,
    SeniorManagement,
    Executive,
}

/// Performance metrics tracked per agent, fed by completed work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub completion_rate: f64,
    pub quality_score: f64,
    pub speed_factor: f64,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            completion_rate: 0.8,
            quality_score: 0.7,
            speed_factor: 1.0,
        }
    }
}

/// Agent profile with skills, workload, and reporting relationships
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    pub role: AgentRole,
    pub skills: HashSet<String>,
    /// skill -> proficiency (1-10)
    pub skill_levels: HashMap<String, u8>,
    /// 1-100, higher is more senior
    pub hierarchy_level: u8,
    /// Hours of currently assigned work
    pub current_workload: f64,
    /// Maximum hours of assigned work
    pub max_workload: f64,
    pub reports_to: Option<String>,
    pub direct_reports: HashSet<String>,
    pub performance: PerformanceMetrics,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AgentProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: AgentRole) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
            skills: HashSet::new(),
            skill_levels: HashMap::new(),
            hierarchy_level: role.default_hierarchy_level(),
            current_workload: 0.0,
            max_workload: 40.0,
            reports_to: None,
            direct_reports: HashSet::new(),
            performance: PerformanceMetrics::default(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_skill(mut self, skill: impl Into<String>, level: u8) -> Self {
        let skill = skill.into();
        self.skills.insert(skill.clone());
        self.skill_levels.insert(skill, level.clamp(1, 10));
        self
    }

    pub fn with_max_workload(mut self, hours: f64) -> Self {
        self.max_workload = hours;
        self
    }

    pub fn with_reports_to(mut self, manager_id: impl Into<String>) -> Self {
        self.reports_to = Some(manager_id.into());
        self
    }

    /// Fraction of capacity currently committed, clamped to [0, 1]
    pub fn load_ratio(&self) -> f64 {
        if self.max_workload <= 0.0 {
            return 1.0;
        }
        (self.current_workload / self.max_workload).clamp(0.0, 1.0)
    }

    pub fn authority(&self) -> AuthorityLevel {
        self.role.authority()
    }
}

/// A project owns its agents, tasks, locks, channels, and content chunks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub archived: bool,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: format!("proj_{}", &Uuid::new_v4().simple().to_string()[..8]),
            name: name.into(),
            created_at: Utc::now(),
            archived: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_levels_are_ordered() {
        assert!(AuthorityLevel::Intern < AuthorityLevel::IndividualContributor);
        assert!(AuthorityLevel::IndividualContributor < AuthorityLevel::MiddleManagement);
        assert!(AuthorityLevel::MiddleManagement < AuthorityLevel::SeniorManagement);
        assert!(AuthorityLevel::SeniorManagement < AuthorityLevel::Executive);
    }

    #[test]
    fn role_parsing_round_trips() {
        for (text, role) in [
            ("executive", AgentRole::Executive),
            ("senior_management", AgentRole::SeniorManagement),
            ("middle_management", AgentRole::MiddleManagement),
            ("individual_contributor", AgentRole::IndividualContributor),
            ("intern", AgentRole::Intern),
        ] {
            assert_eq!(text.parse::<AgentRole>().unwrap(), role);
        }
        assert!("ceo".parse::<AgentRole>().is_err());
    }

    #[test]
    fn load_ratio_is_clamped() {
        let mut agent = AgentProfile::new("a-1", "Ada", AgentRole::IndividualContributor);
        agent.max_workload = 40.0;
        agent.current_workload = 60.0;
        assert_eq!(agent.load_ratio(), 1.0);

        agent.max_workload = 0.0;
        assert_eq!(agent.load_ratio(), 1.0);
    }
}
