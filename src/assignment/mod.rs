//! Skill-, workload-, hierarchy-, and experience-based task assignment.
//!
//! All four algorithms are total: given any candidate set they produce a
//! best agent or none. Scoring ties break on the lower agent id so that
//! repeated runs over the same roster pick the same agent.

use crate::{
    models::AgentProfile,
    tasks::{Task, TaskPriority},
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentAlgorithm {
    SkillBased,
    WorkloadBalanced,
    #[default]
    HierarchyAware,
    ExperienceWeighted,
}

impl FromStr for AssignmentAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skill_based" => Ok(AssignmentAlgorithm::SkillBased),
            "workload_balanced" => Ok(AssignmentAlgorithm::WorkloadBalanced),
            "hierarchy_aware" => Ok(AssignmentAlgorithm::HierarchyAware),
            "experience_weighted" => Ok(AssignmentAlgorithm::ExperienceWeighted),
            _ => Err(format!("Unknown assignment algorithm: {s}")),
        }
    }
}

pub struct AssignmentEngine;

impl AssignmentEngine {
    /// Pick the best agent for `task` among `agents`, or `None` when no
    /// agent is eligible. Agents already at capacity are never considered.
    pub fn select_best(
        task: &Task,
        agents: &[AgentProfile],
        algorithm: AssignmentAlgorithm,
    ) -> Option<String> {
        let eligible: Vec<&AgentProfile> = agents
            .iter()
            .filter(|agent| agent.current_workload < agent.max_workload)
            .collect();
        if eligible.is_empty() {
            return None;
        }

        match algorithm {
            AssignmentAlgorithm::SkillBased => Self::skill_based(task, &eligible),
            AssignmentAlgorithm::WorkloadBalanced => Self::workload_balanced(task, &eligible),
            AssignmentAlgorithm::HierarchyAware => Self::hierarchy_aware(task, &eligible),
            AssignmentAlgorithm::ExperienceWeighted => Self::experience_weighted(task, &eligible),
        }
    }

    /// Mean proficiency over the required skills; a missing skill counts
    /// as zero. At least one required skill must match when any are
    /// required. Ties prefer the lighter workload, then the lower id.
    fn skill_based(task: &Task, agents: &[&AgentProfile]) -> Option<String> {
        let mut best: Option<(f64, f64, &AgentProfile)> = None;

        for agent in agents {
            if !task.required_skills.is_empty() {
                let matches = task
                    .required_skills
                    .iter()
                    .filter(|skill| agent.skills.contains(*skill))
                    .count();
                if matches == 0 {
                    continue;
                }
            }

            let score = if task.required_skills.is_empty() {
                0.0
            } else {
                let total: u32 = task
                    .required_skills
                    .iter()
                    .map(|skill| *agent.skill_levels.get(skill).unwrap_or(&0) as u32)
                    .sum();
                total as f64 / task.required_skills.len() as f64
            };

            let replace = match &best {
                None => true,
                Some((best_score, best_load, best_agent)) => {
                    score > *best_score
                        || (score == *best_score && agent.current_workload < *best_load)
                        || (score == *best_score
                            && agent.current_workload == *best_load
                            && agent.id < best_agent.id)
                }
            };
            if replace {
                best = Some((score, agent.current_workload, agent));
            }
        }

        best.map(|(_, _, agent)| agent.id.clone())
    }

    /// Lowest utilization among agents possessing any required skill
    fn workload_balanced(task: &Task, agents: &[&AgentProfile]) -> Option<String> {
        let mut best: Option<(f64, &AgentProfile)> = None;

        for agent in agents {
            if !task.required_skills.is_empty()
                && !task
                    .required_skills
                    .iter()
                    .any(|skill| agent.skills.contains(skill))
            {
                continue;
            }

            let utilization = agent.load_ratio();
            let replace = match &best {
                None => true,
                Some((best_util, best_agent)) => {
                    utilization < *best_util
                        || (utilization == *best_util && agent.id < best_agent.id)
                }
            };
            if replace {
                best = Some((utilization, agent));
            }
        }

        best.map(|(_, agent)| agent.id.clone())
    }

    /// Weighted blend of skill match, hierarchy fit for the task's
    /// complexity, and remaining capacity, scaled by priority
    fn hierarchy_aware(task: &Task, agents: &[&AgentProfile]) -> Option<String> {
        let complexity = task.task_type.complexity() as f64;
        let mut best: Option<(f64, &AgentProfile)> = None;

        for agent in agents {
            let skill_match = if task.required_skills.is_empty() {
                1.0
            } else {
                let matching = task
                    .required_skills
                    .iter()
                    .filter(|skill| agent.skills.contains(*skill))
                    .count();
                matching as f64 / task.required_skills.len() as f64
            };

            let hierarchy_match =
                (agent.hierarchy_level as f64 / (complexity * 10.0)).min(1.0);
            let workload_factor = if agent.max_workload > 0.0 {
                (1.0 - agent.current_workload / agent.max_workload).max(0.0)
            } else {
                0.5
            };

            let score = (skill_match * 0.4 + hierarchy_match * 0.3 + workload_factor * 0.3)
                * task.priority.factor();

            let replace = match &best {
                None => true,
                Some((best_score, best_agent)) => {
                    score > *best_score || (score == *best_score && agent.id < best_agent.id)
                }
            };
            if replace {
                best = Some((score, agent));
            }
        }

        best.map(|(_, agent)| agent.id.clone())
    }

    /// Skill depth plus track record, scaled by the agent's speed factor
    fn experience_weighted(task: &Task, agents: &[&AgentProfile]) -> Option<String> {
        let mut best: Option<(f64, &AgentProfile)> = None;

        for agent in agents {
            let skill_sum: u32 = task
                .required_skills
                .iter()
                .filter(|skill| agent.skills.contains(*skill))
                .map(|skill| *agent.skill_levels.get(skill).unwrap_or(&1) as u32)
                .sum();

            let experience_factor = agent.hierarchy_level as f64 / 100.0;
            let score = (skill_sum as f64 * 0.3
                + agent.performance.completion_rate * 0.25
                + agent.performance.quality_score * 0.25
                + experience_factor * 0.2)
                * agent.performance.speed_factor;

            let replace = match &best {
                None => true,
                Some((best_score, best_agent)) => {
                    score > *best_score || (score == *best_score && agent.id < best_agent.id)
                }
            };
            if replace {
                best = Some((score, agent));
            }
        }

        best.map(|(_, agent)| agent.id.clone())
    }
}
