// src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::catalog::render_template;
use crate::errors::EvalError;

/// Skill id recorded on runs whose scenarios do not share a single skill.
pub const SUITE_SKILL_ID: &str = "suite";

/// Model settings handed to the execution backend for one combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

impl Default for ModelConfig {
    /// Used when neither an override nor the agent names a model.
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-3-sonnet".to_string(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl ModelConfig {
    /// `provider:model`, e.g. `anthropic:claude-3-sonnet`.
    pub fn label(&self) -> String {
        format!("{}:{}", self.provider, self.model)
    }
}

/// An instruction document an agent is evaluated against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub instructions: String,
    #[serde(default = "default_skill_version")]
    pub version: String,
}

fn default_skill_version() -> String {
    "1.0.0".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssertionKind {
    FileExists { path: String },
    ContentMatches { path: String, pattern: String },
    BuildSucceeds { command: String },
    ToolCalled { tool: String },
    LlmJudge { criteria: String },
}

impl AssertionKind {
    pub fn describe(&self) -> String {
        match self {
            AssertionKind::FileExists { path } => format!("file {} exists", path),
            AssertionKind::ContentMatches { path, pattern } => {
                format!("{} matches /{}/", path, pattern)
            }
            AssertionKind::BuildSucceeds { command } => format!("`{}` succeeds", command),
            AssertionKind::ToolCalled { tool } => format!("tool {} is called", tool),
            AssertionKind::LlmJudge { criteria } => format!("judge: {}", criteria),
        }
    }
}

/// A single pass/fail check evaluated per combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub id: String,
    pub name: String,
    pub check: AssertionKind,
}

/// A named test case: trigger prompt, expected files and assertions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub skill_id: Option<String>,
    pub trigger_prompt: String,
    #[serde(default)]
    pub expected_files: Vec<String>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
    /// Values substituted into `{{key}}` placeholders of the trigger prompt.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl Scenario {
    pub fn rendered_prompt(&self) -> String {
        match &self.metadata {
            Some(metadata) => render_template(&self.trigger_prompt, metadata),
            None => self.trigger_prompt.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentKind {
    Cli {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Model,
}

/// A configured executor that can be pointed at a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub kind: AgentKind,
    #[serde(default)]
    pub model: Option<ModelConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Cancelled)
    }

    /// Transitions are one-directional: pending → running → {completed | cancelled},
    /// and a pending run may be cancelled before it starts.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Pending, RunStatus::Cancelled)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Cancelled)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(EvalError::Config(format!("unknown run status '{}'", other))),
        }
    }
}

/// A named set of agents selected together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub agent_ids: Vec<String>,
}

/// The selection and knobs a run was started with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub scenario_ids: Vec<String>,
    /// Explicit agents followed by the target group's, without duplicates.
    pub agent_ids: Vec<String>,
    #[serde(default)]
    pub target_group_id: Option<String>,
    pub model_override: Option<ModelConfig>,
    pub parallelism: u32,
    pub timeout_ms: u64,
}

/// Body of a request to start a matrix run.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RunRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub scenario_ids: Vec<String>,
    #[serde(default)]
    pub agent_ids: Vec<String>,
    #[serde(default)]
    pub target_group_id: Option<String>,
    #[serde(default)]
    pub model_override: Option<ModelConfig>,
    #[serde(default)]
    pub parallelism: Option<u32>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssertionStatus {
    Passed,
    Failed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionResult {
    pub assertion_id: String,
    pub assertion_name: String,
    pub status: AssertionStatus,
    pub message: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub tool_calls: u32,
    pub cost_usd: f64,
}

/// Outcome of one (scenario, agent) combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalRunResult {
    pub scenario_id: String,
    pub scenario_name: String,
    pub agent_id: Option<String>,
    pub agent_name: Option<String>,
    pub model_config: ModelConfig,
    pub assertion_results: Vec<AssertionResult>,
    pub passed: usize,
    pub failed: usize,
    pub pass_rate: f64,
    pub duration_ms: u64,
    pub metrics: MetricsSnapshot,
    pub completed_at: DateTime<Utc>,
}

impl EvalRunResult {
    /// Builds a result and derives the counts from the assertion outcomes.
    /// Errored assertions count as failed.
    pub fn new(
        scenario: &Scenario,
        agent: Option<&Agent>,
        model_config: ModelConfig,
        assertion_results: Vec<AssertionResult>,
        duration_ms: u64,
        metrics: MetricsSnapshot,
    ) -> Self {
        let passed = assertion_results
            .iter()
            .filter(|a| a.status == AssertionStatus::Passed)
            .count();
        let failed = assertion_results.len() - passed;

        Self {
            scenario_id: scenario.id.clone(),
            scenario_name: scenario.name.clone(),
            agent_id: agent.map(|a| a.id.clone()),
            agent_name: agent.map(|a| a.name.clone()),
            model_config,
            assertion_results,
            passed,
            failed,
            pass_rate: percentage(passed, passed + failed),
            duration_ms,
            metrics,
            completed_at: Utc::now(),
        }
    }

    pub fn is_passing(&self) -> bool {
        self.failed == 0
    }
}

/// Totals computed when a run is finalized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub total_combinations: usize,
    pub completed_combinations: usize,
    /// Combinations whose execution failed or timed out; they have no result.
    pub skipped_combinations: usize,
    pub passing_combinations: usize,
    pub passed: usize,
    pub failed: usize,
    pub pass_rate: f64,
    pub total_duration_ms: u64,
    pub avg_duration_ms: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

impl AggregateMetrics {
    pub fn from_results(results: &[EvalRunResult], total: usize, skipped: usize) -> Self {
        let mut metrics = AggregateMetrics {
            total_combinations: total,
            completed_combinations: results.len(),
            skipped_combinations: skipped,
            ..Default::default()
        };

        for result in results {
            metrics.passed += result.passed;
            metrics.failed += result.failed;
            metrics.total_duration_ms += result.duration_ms;
            metrics.input_tokens += result.metrics.input_tokens;
            metrics.output_tokens += result.metrics.output_tokens;
            metrics.cost_usd += result.metrics.cost_usd;
            if result.is_passing() {
                metrics.passing_combinations += 1;
            }
        }

        metrics.pass_rate = percentage(metrics.passed, metrics.passed + metrics.failed);
        if !results.is_empty() {
            metrics.avg_duration_ms = metrics.total_duration_ms / results.len() as u64;
        }
        metrics
    }
}

/// One evaluation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalRun {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub skill_id: String,
    pub config: RunConfig,
    pub status: RunStatus,
    pub progress: u8,
    pub total_combinations: usize,
    pub results: Vec<EvalRunResult>,
    pub aggregate_metrics: Option<AggregateMetrics>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl EvalRun {
    pub fn new(
        project_id: impl Into<String>,
        name: impl Into<String>,
        skill_id: impl Into<String>,
        config: RunConfig,
        total_combinations: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            name: name.into(),
            skill_id: skill_id.into(),
            config,
            status: RunStatus::Pending,
            progress: 0,
            total_combinations,
            results: Vec::new(),
            aggregate_metrics: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// A finalized run accepts no further mutation.
    pub fn is_finalized(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Lightweight view of a run used for polling.
#[derive(Debug, Clone, Serialize)]
pub struct RunProgress {
    pub id: String,
    pub status: RunStatus,
    pub progress: u8,
    pub results: usize,
    pub total_combinations: usize,
}

impl From<&EvalRun> for RunProgress {
    fn from(run: &EvalRun) -> Self {
        Self {
            id: run.id.clone(),
            status: run.status,
            progress: run.progress,
            results: run.results.len(),
            total_combinations: run.total_combinations,
        }
    }
}

/// `round(done / total * 100)`, 0 when there is nothing to do.
pub fn progress_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((done.min(total) as f64 / total as f64) * 100.0).round() as u8
}

pub(crate) fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
