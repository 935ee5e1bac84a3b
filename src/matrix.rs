// src/matrix.rs
//! Expansion of a scenario × agent selection into ordered combinations.

use crate::models::{Agent, ModelConfig, Scenario, Skill};

/// A scenario together with the skill it exercises, if any.
#[derive(Debug, Clone)]
pub struct ResolvedScenario {
    pub scenario: Scenario,
    pub skill: Option<Skill>,
}

/// One (scenario, agent) pairing to execute. Borrowed from the plan that produced it.
#[derive(Debug, Clone, Copy)]
pub struct Combination<'a> {
    pub index: usize,
    pub scenario: &'a Scenario,
    pub skill: Option<&'a Skill>,
    pub agent: Option<&'a Agent>,
}

impl Combination<'_> {
    pub fn label(&self) -> String {
        match self.agent {
            Some(agent) => format!("{} × {}", self.scenario.name, agent.name),
            None => self.scenario.name.clone(),
        }
    }
}

/// The resolved selection of a run.
#[derive(Debug, Clone, Default)]
pub struct MatrixPlan {
    scenarios: Vec<ResolvedScenario>,
    agents: Vec<Agent>,
}

impl MatrixPlan {
    pub fn new(scenarios: Vec<ResolvedScenario>, agents: Vec<Agent>) -> Self {
        Self { scenarios, agents }
    }

    pub fn scenarios(&self) -> &[ResolvedScenario] {
        &self.scenarios
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// scenarios × max(agents, 1)
    pub fn len(&self) -> usize {
        self.scenarios.len() * self.agents.len().max(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Scenario-major, agent-minor. With no agents each scenario is paired with `None` once.
    pub fn combinations(&self) -> impl Iterator<Item = Combination<'_>> + '_ {
        let agents: Vec<Option<&Agent>> = if self.agents.is_empty() {
            vec![None]
        } else {
            self.agents.iter().map(Some).collect()
        };

        self.scenarios
            .iter()
            .flat_map(move |resolved| {
                agents.clone().into_iter().map(move |agent| (resolved, agent))
            })
            .enumerate()
            .map(|(index, (resolved, agent))| Combination {
                index,
                scenario: &resolved.scenario,
                skill: resolved.skill.as_ref(),
                agent,
            })
    }

    /// The shared skill id when every scenario targets the same skill.
    pub fn common_skill_id(&self) -> Option<&str> {
        let mut ids = self
            .scenarios
            .iter()
            .map(|s| s.skill.as_ref().map(|skill| skill.id.as_str()));
        let first = ids.next()??;
        ids.all(|id| id == Some(first)).then_some(first)
    }
}

/// Override first, then the agent's own model, then the fixed default.
pub fn effective_model(model_override: Option<&ModelConfig>, agent: Option<&Agent>) -> ModelConfig {
    model_override
        .or_else(|| agent.and_then(|a| a.model.as_ref()))
        .cloned()
        .unwrap_or_default()
}
