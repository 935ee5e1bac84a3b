// src/store/mod.rs
//! Persistence of evaluation runs.
//!
//! Both backends share the same rules, enforced by the helpers below:
//! - status moves only along `RunStatus::can_transition_to`;
//! - results are appended only while the run is running or cancelled but
//!   not yet finalized (an in-flight combination may still land);
//! - progress never goes down;
//! - a run cancelled by the user stays cancelled when the runner finalizes it;
//! - a finalized run rejects every further mutation.

use async_trait::async_trait;

use crate::errors::{EvalError, Result};
use crate::models::{AggregateMetrics, EvalRun, EvalRunResult, RunStatus};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persists a new run as given (normally `pending`).
    async fn create_run(&self, run: &EvalRun) -> Result<()>;

    async fn set_status(&self, run_id: &str, status: RunStatus) -> Result<EvalRun>;

    /// Appends one combination result and raises progress to `progress`.
    async fn append_result(&self, run_id: &str, result: &EvalRunResult, progress: u8) -> Result<()>;

    /// Raises progress without a result, for combinations that were dropped.
    async fn set_progress(&self, run_id: &str, progress: u8) -> Result<()>;

    /// Records the aggregate, the terminal status and the completion time.
    async fn finalize_run(
        &self,
        run_id: &str,
        status: RunStatus,
        aggregate: AggregateMetrics,
    ) -> Result<EvalRun>;

    async fn get_run(&self, run_id: &str) -> Result<EvalRun>;

    /// Newest first.
    async fn list_runs(&self) -> Result<Vec<EvalRun>>;

    async fn status(&self, run_id: &str) -> Result<RunStatus> {
        Ok(self.get_run(run_id).await?.status)
    }

    /// Marks a run cancelled. Idempotent until the run is finalized.
    async fn cancel_run(&self, run_id: &str) -> Result<EvalRun> {
        let run = self.get_run(run_id).await?;
        if run.status == RunStatus::Cancelled && !run.is_finalized() {
            return Ok(run);
        }
        self.set_status(run_id, RunStatus::Cancelled).await
    }
}

pub(crate) fn check_transition(
    run_id: &str,
    current: RunStatus,
    finalized: bool,
    next: RunStatus,
) -> Result<()> {
    if finalized {
        return Err(EvalError::RunFinalized {
            id: run_id.to_string(),
            status: current,
        });
    }
    if !current.can_transition_to(next) {
        return Err(EvalError::InvalidTransition {
            id: run_id.to_string(),
            from: current,
            to: next,
        });
    }
    Ok(())
}

pub(crate) fn check_appendable(run_id: &str, current: RunStatus, finalized: bool) -> Result<()> {
    if finalized {
        return Err(EvalError::RunFinalized {
            id: run_id.to_string(),
            status: current,
        });
    }
    match current {
        RunStatus::Running | RunStatus::Cancelled => Ok(()),
        other => Err(EvalError::InvalidTransition {
            id: run_id.to_string(),
            from: other,
            to: RunStatus::Running,
        }),
    }
}

/// The status a run ends with when the runner asks for `requested`.
pub(crate) fn finalized_status(
    run_id: &str,
    current: RunStatus,
    finalized: bool,
    requested: RunStatus,
) -> Result<RunStatus> {
    if finalized {
        return Err(EvalError::RunFinalized {
            id: run_id.to_string(),
            status: current,
        });
    }
    match (current, requested) {
        (RunStatus::Cancelled, _) => Ok(RunStatus::Cancelled),
        (RunStatus::Running, RunStatus::Completed | RunStatus::Cancelled) => Ok(requested),
        (RunStatus::Pending, RunStatus::Cancelled) => Ok(RunStatus::Cancelled),
        (from, to) => Err(EvalError::InvalidTransition {
            id: run_id.to_string(),
            from,
            to,
        }),
    }
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every `RunStore` must show; run against each backend.

    use super::*;
    use crate::models::{MetricsSnapshot, ModelConfig, RunConfig, Scenario};

    pub fn new_run(name: &str) -> EvalRun {
        EvalRun::new(
            "proj",
            name,
            "skill-1",
            RunConfig {
                scenario_ids: vec!["s1".to_string()],
                agent_ids: vec![],
                target_group_id: None,
                model_override: None,
                parallelism: 1,
                timeout_ms: 1000,
            },
            2,
        )
    }

    pub fn result(scenario_id: &str) -> EvalRunResult {
        let scenario = Scenario {
            id: scenario_id.to_string(),
            name: scenario_id.to_string(),
            description: None,
            skill_id: None,
            trigger_prompt: "go".to_string(),
            expected_files: vec![],
            assertions: vec![],
            metadata: None,
        };
        EvalRunResult::new(
            &scenario,
            None,
            ModelConfig::default(),
            vec![],
            12,
            MetricsSnapshot::default(),
        )
    }

    pub async fn lifecycle(store: &dyn RunStore) {
        let run = new_run("lifecycle");
        store.create_run(&run).await.unwrap();
        assert_eq!(store.status(&run.id).await.unwrap(), RunStatus::Pending);

        // appending before the run starts is refused
        assert!(store.append_result(&run.id, &result("s1"), 50).await.is_err());

        store.set_status(&run.id, RunStatus::Running).await.unwrap();
        store.append_result(&run.id, &result("s1"), 50).await.unwrap();
        store.append_result(&run.id, &result("s2"), 40).await.unwrap();

        store.set_progress(&run.id, 20).await.unwrap();

        let loaded = store.get_run(&run.id).await.unwrap();
        assert_eq!(loaded.progress, 50, "progress never decreases");
        let order: Vec<&str> = loaded.results.iter().map(|r| r.scenario_id.as_str()).collect();
        assert_eq!(order, vec!["s1", "s2"]);

        let aggregate = AggregateMetrics::from_results(&loaded.results, 2, 0);
        let finished = store
            .finalize_run(&run.id, RunStatus::Completed, aggregate.clone())
            .await
            .unwrap();
        assert_eq!(finished.status, RunStatus::Completed);
        assert!(finished.completed_at.is_some());
        assert_eq!(finished.aggregate_metrics, Some(aggregate.clone()));

        // finalized runs are immutable
        assert!(matches!(
            store.append_result(&run.id, &result("s3"), 100).await,
            Err(EvalError::RunFinalized { .. })
        ));
        assert!(matches!(
            store.set_progress(&run.id, 100).await,
            Err(EvalError::RunFinalized { .. })
        ));
        assert!(matches!(
            store.cancel_run(&run.id).await,
            Err(EvalError::RunFinalized { .. })
        ));
        assert!(matches!(
            store.finalize_run(&run.id, RunStatus::Completed, aggregate).await,
            Err(EvalError::RunFinalized { .. })
        ));
    }

    pub async fn cancellation_wins(store: &dyn RunStore) {
        let run = new_run("cancelled");
        store.create_run(&run).await.unwrap();
        store.set_status(&run.id, RunStatus::Running).await.unwrap();

        let cancelled = store.cancel_run(&run.id).await.unwrap();
        assert_eq!(cancelled.status, RunStatus::Cancelled);
        // second cancel is a no-op
        store.cancel_run(&run.id).await.unwrap();

        // the in-flight combination may still land
        store.append_result(&run.id, &result("s1"), 50).await.unwrap();

        let finished = store
            .finalize_run(&run.id, RunStatus::Completed, AggregateMetrics::default())
            .await
            .unwrap();
        assert_eq!(finished.status, RunStatus::Cancelled);
        assert_eq!(finished.results.len(), 1);
    }

    pub async fn missing_runs(store: &dyn RunStore) {
        assert!(matches!(
            store.get_run("nope").await,
            Err(EvalError::RunNotFound(id)) if id == "nope"
        ));
        assert!(matches!(
            store.set_status("nope", RunStatus::Running).await,
            Err(EvalError::RunNotFound(_))
        ));
        assert!(matches!(
            store.append_result("nope", &result("s1"), 10).await,
            Err(EvalError::RunNotFound(_))
        ));
    }

    pub async fn listing(store: &dyn RunStore) {
        let first = new_run("first");
        store.create_run(&first).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = new_run("second");
        store.create_run(&second).await.unwrap();

        let names: Vec<String> = store
            .list_runs()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["second".to_string(), "first".to_string()]);
    }
}
