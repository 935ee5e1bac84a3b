// src/executor/mock.rs

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::errors::{EvalError, Result};
use crate::executor::ScenarioExecutor;
use crate::models::{
    Agent, AgentKind, Assertion, AssertionKind, AssertionResult, AssertionStatus, EvalRunResult,
    MetricsSnapshot, ModelConfig, Scenario, Skill,
};

/// Knobs for the simulated backend.
#[derive(Debug, Clone, PartialEq)]
pub struct MockConfig {
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub pass_probability: f64,
    pub error_probability: f64,
    /// Probability that a whole execution fails instead of producing a result.
    pub failure_rate: f64,
    pub seed: Option<u64>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            min_latency_ms: 200,
            max_latency_ms: 1500,
            pass_probability: 0.8,
            error_probability: 0.02,
            failure_rate: 0.0,
            seed: None,
        }
    }
}

impl MockConfig {
    /// No latency, fixed seed.
    pub fn instant(seed: u64) -> Self {
        Self {
            min_latency_ms: 0,
            max_latency_ms: 0,
            seed: Some(seed),
            ..Self::default()
        }
    }
}

/// Simulates agent executions: sleeps for a random latency and draws a
/// pass/fail/error outcome per assertion.
pub struct MockExecutor {
    config: MockConfig,
    rng: Mutex<StdRng>,
}

impl MockExecutor {
    pub fn new(config: MockConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &MockConfig {
        &self.config
    }
}

/// USD per million (input, output) tokens.
fn price_per_million(model: &str) -> (f64, f64) {
    if model.starts_with("claude-3-opus") {
        (15.0, 75.0)
    } else if model.starts_with("claude-3-sonnet") || model.starts_with("claude-3-5-sonnet") {
        (3.0, 15.0)
    } else if model.starts_with("claude-3-haiku") {
        (0.25, 1.25)
    } else if model.starts_with("gpt-4o-mini") {
        (0.15, 0.6)
    } else if model.starts_with("gpt-4o") {
        (2.5, 10.0)
    } else {
        (1.0, 3.0)
    }
}

fn outcome_message(assertion: &Assertion, status: AssertionStatus) -> String {
    match status {
        AssertionStatus::Error => format!(
            "Assertion '{}' could not be evaluated ({})",
            assertion.name,
            assertion.check.describe()
        ),
        AssertionStatus::Passed => match &assertion.check {
            AssertionKind::FileExists { path } => format!("Found {}", path),
            AssertionKind::ContentMatches { path, pattern } => {
                format!("{} matched /{}/", path, pattern)
            }
            AssertionKind::BuildSucceeds { command } => format!("`{}` exited with 0", command),
            AssertionKind::ToolCalled { tool } => format!("{} was called", tool),
            AssertionKind::LlmJudge { .. } => "Judge verdict: PASS".to_string(),
        },
        AssertionStatus::Failed => match &assertion.check {
            AssertionKind::FileExists { path } => format!("Expected file {} was not created", path),
            AssertionKind::ContentMatches { path, pattern } => {
                format!("{} does not match /{}/", path, pattern)
            }
            AssertionKind::BuildSucceeds { command } => format!("`{}` exited with 1", command),
            AssertionKind::ToolCalled { tool } => format!("{} was never called", tool),
            AssertionKind::LlmJudge { criteria } => {
                format!("Judge verdict: FAIL ({})", criteria)
            }
        },
    }
}

#[async_trait]
impl ScenarioExecutor for MockExecutor {
    async fn execute(
        &self,
        skill: Option<&Skill>,
        scenario: &Scenario,
        model: &ModelConfig,
        agent: Option<&Agent>,
    ) -> Result<EvalRunResult> {
        let prompt = scenario.rendered_prompt();

        // Draw everything up front so the lock is not held across the sleep.
        let (latency_ms, crashed, assertion_results, output_tokens, tool_calls) = {
            let mut rng = self.rng.lock().await;
            let latency_ms = if self.config.max_latency_ms > self.config.min_latency_ms {
                rng.gen_range(self.config.min_latency_ms..=self.config.max_latency_ms)
            } else {
                self.config.min_latency_ms
            };
            let crashed = rng.gen_bool(self.config.failure_rate);

            let assertion_results: Vec<AssertionResult> = scenario
                .assertions
                .iter()
                .map(|assertion| {
                    let status = if rng.gen_bool(self.config.error_probability) {
                        AssertionStatus::Error
                    } else if rng.gen_bool(self.config.pass_probability) {
                        AssertionStatus::Passed
                    } else {
                        AssertionStatus::Failed
                    };
                    AssertionResult {
                        assertion_id: assertion.id.clone(),
                        assertion_name: assertion.name.clone(),
                        status,
                        message: outcome_message(assertion, status),
                        duration_ms: rng.gen_range(5..=250),
                    }
                })
                .collect();

            let output_tokens = rng.gen_range(200..=2000u64).min(u64::from(model.max_tokens));
            let tool_calls = match agent.map(|a| &a.kind) {
                Some(AgentKind::Cli { .. }) => rng.gen_range(1..=12),
                _ => 0,
            };
            (latency_ms, crashed, assertion_results, output_tokens, tool_calls)
        };

        log::debug!(
            "Mock executing '{}' on {} ({}ms)",
            scenario.name,
            model.label(),
            latency_ms
        );

        if latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(latency_ms)).await;
        }

        if crashed {
            return Err(EvalError::ExecutionFailed {
                scenario: scenario.id.clone(),
                reason: format!(
                    "{} exited unexpectedly",
                    agent.map(|a| a.name.as_str()).unwrap_or("model session")
                ),
            });
        }

        let instruction_chars = skill.map(|s| s.instructions.len()).unwrap_or(0);
        let input_tokens = ((prompt.len() + instruction_chars) / 4 + 1) as u64;
        let (input_price, output_price) = price_per_million(&model.model);
        let cost_usd = (input_tokens as f64 * input_price + output_tokens as f64 * output_price)
            / 1_000_000.0;

        let duration_ms =
            latency_ms + assertion_results.iter().map(|a| a.duration_ms).sum::<u64>();

        Ok(EvalRunResult::new(
            scenario,
            agent,
            model.clone(),
            assertion_results,
            duration_ms,
            MetricsSnapshot {
                input_tokens,
                output_tokens,
                tool_calls,
                cost_usd,
            },
        ))
    }
}
