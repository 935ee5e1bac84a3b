// src/runner.rs
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

use crate::catalog::{validate_model, EntityLookup};
use crate::errors::{EvalError, Result};
use crate::events::{self, RunEvent};
use crate::executor::ScenarioExecutor;
use crate::matrix::{effective_model, Combination, MatrixPlan, ResolvedScenario};
use crate::models::{
    progress_percent, AggregateMetrics, Agent, EvalRun, EvalRunResult, ModelConfig, RunConfig,
    RunRequest, RunStatus, SUITE_SKILL_ID,
};
use crate::store::RunStore;

/// Defaults applied to every run the runner creates.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub project_id: String,
    /// Per-combination timeout when the request does not give one. 0 disables it.
    pub default_timeout_ms: u64,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            project_id: "default".to_string(),
            default_timeout_ms: 120_000,
        }
    }
}

/// A run that exists in the store and is ready to execute.
#[derive(Debug)]
pub struct PreparedRun {
    pub run: EvalRun,
    plan: MatrixPlan,
}

impl PreparedRun {
    pub fn plan(&self) -> &MatrixPlan {
        &self.plan
    }
}

/// Expands scenario × agent selections and executes them one after another.
#[derive(Clone)]
pub struct MatrixRunner {
    lookup: Arc<dyn EntityLookup>,
    executor: Arc<dyn ScenarioExecutor>,
    store: Arc<dyn RunStore>,
    events: broadcast::Sender<RunEvent>,
    settings: RunnerSettings,
}

impl MatrixRunner {
    pub fn new(
        lookup: Arc<dyn EntityLookup>,
        executor: Arc<dyn ScenarioExecutor>,
        store: Arc<dyn RunStore>,
        settings: RunnerSettings,
    ) -> Self {
        let (events, _) = events::channel();
        Self {
            lookup,
            executor,
            store,
            events,
            settings,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Prepares and executes a run to completion.
    pub async fn run_evaluation_matrix(&self, request: RunRequest) -> Result<EvalRun> {
        let prepared = self.prepare(request).await?;
        self.execute(prepared).await
    }

    /// Resolves the selection into a plan. Missing scenarios, skills and agents
    /// are logged and left out.
    pub fn plan(&self, request: &RunRequest) -> Result<MatrixPlan> {
        if request.scenario_ids.is_empty() {
            return Err(EvalError::EmptySelection);
        }

        let mut scenarios = Vec::with_capacity(request.scenario_ids.len());
        for scenario_id in &request.scenario_ids {
            let Some(scenario) = self.lookup.scenario(scenario_id) else {
                log::warn!("Skipping scenario '{}': not found", scenario_id);
                continue;
            };
            let skill = match &scenario.skill_id {
                Some(skill_id) => match self.lookup.skill(skill_id) {
                    Some(skill) => Some(skill),
                    None => {
                        log::warn!(
                            "Skipping scenario '{}': skill '{}' not found",
                            scenario_id,
                            skill_id
                        );
                        continue;
                    }
                },
                None => None,
            };
            scenarios.push(ResolvedScenario { scenario, skill });
        }

        let agent_ids = self.selected_agent_ids(request)?;
        let agents: Vec<Agent> = agent_ids
            .iter()
            .filter_map(|agent_id| {
                let agent = self.lookup.agent(agent_id);
                if agent.is_none() {
                    log::warn!("Skipping agent '{}': not found", agent_id);
                }
                agent
            })
            .collect();

        // An agent selection that resolves to nothing must not turn into a
        // run without agents.
        if scenarios.is_empty() || (!agent_ids.is_empty() && agents.is_empty()) {
            return Err(EvalError::NothingToRun);
        }

        Ok(MatrixPlan::new(scenarios, agents))
    }

    /// Explicit agent ids followed by the members of the requested target
    /// group, first occurrence kept.
    pub fn selected_agent_ids(&self, request: &RunRequest) -> Result<Vec<String>> {
        let mut agent_ids = request.agent_ids.clone();
        if let Some(group_id) = &request.target_group_id {
            let group = self.lookup.target_group(group_id).ok_or_else(|| {
                EvalError::InvalidRequest(format!("unknown target group '{}'", group_id))
            })?;
            for agent_id in group.agent_ids {
                if !agent_ids.contains(&agent_id) {
                    agent_ids.push(agent_id);
                }
            }
        }
        Ok(agent_ids)
    }

    /// Creates the run record (`pending`) for a request.
    pub async fn prepare(&self, request: RunRequest) -> Result<PreparedRun> {
        if let Some(model) = &request.model_override {
            validate_model("model override", model)
                .map_err(|e| EvalError::InvalidRequest(e.to_string()))?;
        }

        let plan = self.plan(&request)?;
        let agent_ids = self.selected_agent_ids(&request)?;
        let skill_id = plan.common_skill_id().unwrap_or(SUITE_SKILL_ID).to_string();
        let name = request
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| default_run_name(&plan));

        let config = RunConfig {
            scenario_ids: request.scenario_ids,
            agent_ids,
            target_group_id: request.target_group_id,
            model_override: request.model_override,
            parallelism: request.parallelism.unwrap_or(1).max(1),
            timeout_ms: request.timeout_ms.unwrap_or(self.settings.default_timeout_ms),
        };

        let run = EvalRun::new(
            self.settings.project_id.clone(),
            name,
            skill_id,
            config,
            plan.len(),
        );
        self.store.create_run(&run).await?;
        log::info!(
            "Created run {} '{}' with {} combination(s)",
            run.id,
            run.name,
            run.total_combinations
        );

        Ok(PreparedRun { run, plan })
    }

    /// Executes every combination of a prepared run in order, then finalizes it.
    ///
    /// Failed or timed out combinations are dropped and counted as skipped.
    /// The run stops early when its stored status becomes `cancelled`.
    /// Only store failures are returned as errors.
    pub async fn execute(&self, prepared: PreparedRun) -> Result<EvalRun> {
        let PreparedRun { run, plan } = prepared;
        let run_id = run.id.as_str();
        let total = plan.len();

        match self.store.set_status(run_id, RunStatus::Running).await {
            Ok(_) => {}
            Err(EvalError::InvalidTransition {
                from: RunStatus::Cancelled,
                ..
            }) => {
                log::info!("Run {} was cancelled before it started", run_id);
                return self.finish(run_id, RunStatus::Cancelled, total, 0).await;
            }
            Err(e) => return Err(e),
        }

        self.publish(RunEvent::RunStarted {
            run_id: run_id.to_string(),
            name: run.name.clone(),
            total_combinations: total,
        });
        let started = Instant::now();

        let mut attempted = 0;
        let mut skipped = 0;
        let mut status = RunStatus::Completed;

        for combination in plan.combinations() {
            if self.store.status(run_id).await? == RunStatus::Cancelled {
                log::info!(
                    "Run {} cancelled after {}/{} combination(s)",
                    run_id,
                    attempted,
                    total
                );
                status = RunStatus::Cancelled;
                break;
            }

            let model = effective_model(run.config.model_override.as_ref(), combination.agent);
            log::debug!(
                "Run {} [{}/{}] {} on {}",
                run_id,
                combination.index + 1,
                total,
                combination.label(),
                model.label()
            );

            let outcome = self
                .execute_combination(&combination, &model, run.config.timeout_ms)
                .await;
            attempted += 1;
            let progress = progress_percent(attempted, total);

            match outcome {
                Ok(result) => {
                    if let Err(e) = self.store.append_result(run_id, &result, progress).await {
                        log::error!("Failed to store result for run {}: {}", run_id, e);
                        return Err(e);
                    }
                    self.publish(RunEvent::ResultAppended {
                        run_id: run_id.to_string(),
                        index: combination.index,
                        scenario_id: result.scenario_id.clone(),
                        agent_id: result.agent_id.clone(),
                        passed: result.passed,
                        failed: result.failed,
                        progress,
                    });
                }
                Err(e) => {
                    skipped += 1;
                    log::warn!(
                        "Run {}: dropping combination {} ({}): {}",
                        run_id,
                        combination.index,
                        combination.label(),
                        e
                    );
                    if let Err(store_err) = self.store.set_progress(run_id, progress).await {
                        log::error!("Failed to update progress for run {}: {}", run_id, store_err);
                        return Err(store_err);
                    }
                    self.publish(RunEvent::CombinationSkipped {
                        run_id: run_id.to_string(),
                        index: combination.index,
                        scenario_id: combination.scenario.id.clone(),
                        agent_id: combination.agent.map(|a| a.id.clone()),
                        reason: e.to_string(),
                        progress,
                    });
                }
            }
        }

        let finished = self.finish(run_id, status, total, skipped).await?;
        log::info!(
            "Run {} finished as {} in {}ms: {}/{} assertions passed, {} combination(s) skipped",
            run_id,
            finished.status,
            started.elapsed().as_millis(),
            finished.aggregate_metrics.as_ref().map(|a| a.passed).unwrap_or(0),
            finished
                .aggregate_metrics
                .as_ref()
                .map(|a| a.passed + a.failed)
                .unwrap_or(0),
            skipped
        );
        Ok(finished)
    }

    async fn execute_combination(
        &self,
        combination: &Combination<'_>,
        model: &ModelConfig,
        timeout_ms: u64,
    ) -> Result<EvalRunResult> {
        let call = self.executor.execute(
            combination.skill,
            combination.scenario,
            model,
            combination.agent,
        );

        if timeout_ms == 0 {
            return call.await;
        }

        tokio::time::timeout(Duration::from_millis(timeout_ms), call)
            .await
            .map_err(|_| EvalError::Timeout {
                scenario: combination.scenario.id.clone(),
                timeout_ms,
            })?
    }

    async fn finish(
        &self,
        run_id: &str,
        status: RunStatus,
        total: usize,
        skipped: usize,
    ) -> Result<EvalRun> {
        let current = self.store.get_run(run_id).await?;
        let aggregate = AggregateMetrics::from_results(&current.results, total, skipped);
        let finished = self.store.finalize_run(run_id, status, aggregate).await?;

        self.publish(RunEvent::RunFinished {
            run_id: run_id.to_string(),
            status: finished.status,
            aggregate: finished.aggregate_metrics.clone().unwrap_or_default(),
        });
        Ok(finished)
    }

    fn publish(&self, event: RunEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn default_run_name(plan: &MatrixPlan) -> String {
    let scenarios = plan.scenarios().len();
    let agents = plan.agents().len();
    if agents == 0 {
        format!("{} scenario(s)", scenarios)
    } else {
        format!("{} scenario(s) × {} agent(s)", scenarios, agents)
    }
}
