// src/report.rs
//! Breakdowns, failure analysis and run-to-run comparison.

use serde::Serialize;
use std::collections::HashMap;

use crate::models::{
    percentage, AggregateMetrics, AssertionStatus, EvalRun, EvalRunResult, RunStatus,
};

const NO_AGENT: &str = "none";

/// Pass/fail totals for one agent or one scenario.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breakdown {
    pub key: String,
    pub label: String,
    pub combinations: usize,
    pub passing_combinations: usize,
    pub passed: usize,
    pub failed: usize,
    pub pass_rate: f64,
    pub avg_duration_ms: u64,
    #[serde(skip)]
    total_duration_ms: u64,
}

impl Breakdown {
    fn new(key: String, label: String) -> Self {
        Self {
            key,
            label,
            combinations: 0,
            passing_combinations: 0,
            passed: 0,
            failed: 0,
            pass_rate: 0.0,
            avg_duration_ms: 0,
            total_duration_ms: 0,
        }
    }

    fn add(&mut self, result: &EvalRunResult) {
        self.combinations += 1;
        if result.is_passing() {
            self.passing_combinations += 1;
        }
        self.passed += result.passed;
        self.failed += result.failed;
        self.total_duration_ms += result.duration_ms;
        self.pass_rate = percentage(self.passed, self.passed + self.failed);
        self.avg_duration_ms = self.total_duration_ms / self.combinations as u64;
    }
}

/// One assertion that failed somewhere in the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureGroup {
    pub scenario_id: String,
    pub scenario_name: String,
    pub assertion_id: String,
    pub assertion_name: String,
    pub occurrences: usize,
    /// Occurrences where the assertion could not be evaluated at all.
    pub errors: usize,
    pub agents: Vec<String>,
    pub sample_message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub run_name: String,
    pub status: RunStatus,
    pub aggregate: AggregateMetrics,
    pub by_agent: Vec<Breakdown>,
    pub by_scenario: Vec<Breakdown>,
    pub failures: Vec<FailureGroup>,
}

/// Groups results by `key`, keeping first-seen order.
fn breakdown_by<F>(results: &[EvalRunResult], key: F) -> Vec<Breakdown>
where
    F: Fn(&EvalRunResult) -> (String, String),
{
    let mut rows: Vec<Breakdown> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for result in results {
        let (key, label) = key(result);
        let position = *index.entry(key.clone()).or_insert_with(|| {
            rows.push(Breakdown::new(key, label));
            rows.len() - 1
        });
        rows[position].add(result);
    }
    rows
}

fn failure_analysis(results: &[EvalRunResult]) -> Vec<FailureGroup> {
    let mut groups: Vec<FailureGroup> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for result in results {
        let agent = result
            .agent_name
            .clone()
            .unwrap_or_else(|| "no agent".to_string());
        for assertion in &result.assertion_results {
            if assertion.status == AssertionStatus::Passed {
                continue;
            }
            let key = (result.scenario_id.clone(), assertion.assertion_id.clone());
            let position = *index.entry(key).or_insert_with(|| {
                groups.push(FailureGroup {
                    scenario_id: result.scenario_id.clone(),
                    scenario_name: result.scenario_name.clone(),
                    assertion_id: assertion.assertion_id.clone(),
                    assertion_name: assertion.assertion_name.clone(),
                    occurrences: 0,
                    errors: 0,
                    agents: Vec::new(),
                    sample_message: assertion.message.clone(),
                });
                groups.len() - 1
            });

            let group = &mut groups[position];
            group.occurrences += 1;
            if assertion.status == AssertionStatus::Error {
                group.errors += 1;
            }
            if !group.agents.contains(&agent) {
                group.agents.push(agent.clone());
            }
        }
    }

    groups.sort_by(|a, b| {
        b.occurrences
            .cmp(&a.occurrences)
            .then_with(|| a.scenario_id.cmp(&b.scenario_id))
            .then_with(|| a.assertion_id.cmp(&b.assertion_id))
    });
    groups
}

impl RunReport {
    pub fn from_run(run: &EvalRun) -> Self {
        let aggregate = run.aggregate_metrics.clone().unwrap_or_else(|| {
            AggregateMetrics::from_results(&run.results, run.total_combinations, 0)
        });

        Self {
            run_id: run.id.clone(),
            run_name: run.name.clone(),
            status: run.status,
            aggregate,
            by_agent: breakdown_by(&run.results, |r| match (&r.agent_id, &r.agent_name) {
                (Some(id), Some(name)) => (id.clone(), name.clone()),
                (Some(id), None) => (id.clone(), id.clone()),
                _ => (NO_AGENT.to_string(), "No agent".to_string()),
            }),
            by_scenario: breakdown_by(&run.results, |r| {
                (r.scenario_id.clone(), r.scenario_name.clone())
            }),
            failures: failure_analysis(&run.results),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioDelta {
    pub scenario_id: String,
    pub scenario_name: String,
    pub base_pass_rate: Option<f64>,
    pub candidate_pass_rate: Option<f64>,
    pub delta: Option<f64>,
}

/// Pass-rate differences between two runs, scenario by scenario.
#[derive(Debug, Clone, Serialize)]
pub struct RunComparison {
    pub base_run_id: String,
    pub candidate_run_id: String,
    pub base_pass_rate: f64,
    pub candidate_pass_rate: f64,
    pub delta: f64,
    pub scenarios: Vec<ScenarioDelta>,
    pub regressions: Vec<String>,
    pub improvements: Vec<String>,
}

impl RunComparison {
    pub fn between(base: &EvalRun, candidate: &EvalRun) -> Self {
        let base_report = RunReport::from_run(base);
        let candidate_report = RunReport::from_run(candidate);

        let base_rates: HashMap<&str, f64> = base_report
            .by_scenario
            .iter()
            .map(|row| (row.key.as_str(), row.pass_rate))
            .collect();
        let candidate_rates: HashMap<&str, f64> = candidate_report
            .by_scenario
            .iter()
            .map(|row| (row.key.as_str(), row.pass_rate))
            .collect();

        // base scenarios first, then the ones only the candidate ran
        let mut scenarios = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for row in base_report
            .by_scenario
            .iter()
            .chain(candidate_report.by_scenario.iter())
        {
            if !seen.insert(row.key.as_str()) {
                continue;
            }
            let base_pass_rate = base_rates.get(row.key.as_str()).copied();
            let candidate_pass_rate = candidate_rates.get(row.key.as_str()).copied();
            let delta = match (base_pass_rate, candidate_pass_rate) {
                (Some(b), Some(c)) => Some(c - b),
                _ => None,
            };
            scenarios.push(ScenarioDelta {
                scenario_id: row.key.clone(),
                scenario_name: row.label.clone(),
                base_pass_rate,
                candidate_pass_rate,
                delta,
            });
        }

        let regressions = scenarios
            .iter()
            .filter(|s| s.delta.is_some_and(|d| d < -f64::EPSILON))
            .map(|s| s.scenario_id.clone())
            .collect();
        let improvements = scenarios
            .iter()
            .filter(|s| s.delta.is_some_and(|d| d > f64::EPSILON))
            .map(|s| s.scenario_id.clone())
            .collect();

        Self {
            base_run_id: base.id.clone(),
            candidate_run_id: candidate.id.clone(),
            base_pass_rate: base_report.aggregate.pass_rate,
            candidate_pass_rate: candidate_report.aggregate.pass_rate,
            delta: candidate_report.aggregate.pass_rate - base_report.aggregate.pass_rate,
            scenarios,
            regressions,
            improvements,
        }
    }
}
