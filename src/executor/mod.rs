// src/executor/mod.rs

use async_trait::async_trait;

use crate::errors::Result;
use crate::models::{Agent, EvalRunResult, ModelConfig, Scenario, Skill};

pub mod mock;

pub use mock::{MockConfig, MockExecutor};

/// Backend that runs one scenario, optionally under a skill and an agent, and
/// reports per-assertion outcomes.
///
/// The runner treats implementations as black boxes: any retry or error
/// semantics are theirs. An `Err` drops the combination from the run.
#[async_trait]
pub trait ScenarioExecutor: Send + Sync {
    async fn execute(
        &self,
        skill: Option<&Skill>,
        scenario: &Scenario,
        model: &ModelConfig,
        agent: Option<&Agent>,
    ) -> Result<EvalRunResult>;
}
