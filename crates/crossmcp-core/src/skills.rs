//! Skill discovery contract.
//!
//! The corpus, index, and embedding backends live outside the gateway;
//! flows consume this search/load/list surface. A static in-memory
//! implementation ships for local deployments and tests.

use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use crossmcp_protocol::types::{RankedSkill, Skill, SkillLoadResult};
use parking_lot::RwLock;
use std::fmt;

/// Options for [`SkillRegistry::search`].
#[derive(Debug, Clone, Default)]
pub struct SkillSearchOptions {
    /// Maximum results to return
    pub limit: Option<usize>,
}

/// Options for [`SkillRegistry::list_skills`].
#[derive(Debug, Clone, Default)]
pub struct SkillListOptions {
    /// Maximum results to return
    pub limit: Option<usize>,
}

/// Skill discovery surface consumed by the skill flows.
#[async_trait]
pub trait SkillRegistry: Send + Sync {
    /// Rank skills against a free-text query.
    async fn search(&self, query: &str, opts: SkillSearchOptions) -> CoreResult<Vec<RankedSkill>>;

    /// Load a skill and report which referenced tools are available.
    ///
    /// `available_tools` is computed against the calling scope's tool
    /// pool by the flow; implementations report the skill's tool list.
    async fn load_skill(&self, id: &str) -> CoreResult<Skill>;

    /// List known skills.
    async fn list_skills(&self, opts: SkillListOptions) -> CoreResult<Vec<Skill>>;
}

/// Completes a loaded skill against the tools actually registered.
pub fn resolve_skill_load(skill: Skill, registered_tools: &[String]) -> SkillLoadResult {
    let (available, missing): (Vec<String>, Vec<String>) = skill
        .tools
        .iter()
        .cloned()
        .partition(|tool| registered_tools.iter().any(|t| t == tool));

    let is_complete = missing.is_empty();
    let warning = if is_complete {
        None
    } else {
        Some(format!(
            "skill '{}' references {} unregistered tool(s): {}",
            skill.id,
            missing.len(),
            missing.join(", ")
        ))
    };

    SkillLoadResult {
        skill,
        available_tools: available,
        missing_tools: missing,
        is_complete,
        warning,
    }
}

/// Fixed in-memory skill set with substring ranking.
pub struct StaticSkillRegistry {
    skills: RwLock<Vec<Skill>>,
}

impl fmt::Debug for StaticSkillRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticSkillRegistry")
            .field("len", &self.skills.read().len())
            .finish()
    }
}

impl StaticSkillRegistry {
    /// Registry over a fixed skill set.
    pub fn new(skills: Vec<Skill>) -> Self {
        Self {
            skills: RwLock::new(skills),
        }
    }
}

#[async_trait]
impl SkillRegistry for StaticSkillRegistry {
    async fn search(&self, query: &str, opts: SkillSearchOptions) -> CoreResult<Vec<RankedSkill>> {
        let needle = query.to_lowercase();
        let mut ranked: Vec<RankedSkill> = self
            .skills
            .read()
            .iter()
            .filter_map(|skill| {
                let name_hit = skill.name.to_lowercase().contains(&needle);
                let desc_hit = skill
                    .description
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase().contains(&needle));
                let score = match (name_hit, desc_hit) {
                    (true, _) => 1.0,
                    (false, true) => 0.5,
                    (false, false) => return None,
                };
                Some(RankedSkill {
                    skill: skill.clone(),
                    score,
                })
            })
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        if let Some(limit) = opts.limit {
            ranked.truncate(limit);
        }
        Ok(ranked)
    }

    async fn load_skill(&self, id: &str) -> CoreResult<Skill> {
        self.skills
            .read()
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("skill", id))
    }

    async fn list_skills(&self, opts: SkillListOptions) -> CoreResult<Vec<Skill>> {
        let mut skills = self.skills.read().clone();
        if let Some(limit) = opts.limit {
            skills.truncate(limit);
        }
        Ok(skills)
    }
}
