// src/store/memory.rs

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::errors::{EvalError, Result};
use crate::models::{AggregateMetrics, EvalRun, EvalRunResult, RunStatus};
use crate::store::{check_appendable, check_transition, finalized_status, RunStore};

#[derive(Default)]
struct MemoryState {
    runs: HashMap<String, EvalRun>,
    order: Vec<String>,
}

/// Process-lifetime run store.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn create_run(&self, run: &EvalRun) -> Result<()> {
        let mut state = self.state.write().await;
        if state.runs.contains_key(&run.id) {
            return Err(EvalError::DuplicateRun(run.id.clone()));
        }
        state.order.push(run.id.clone());
        state.runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn set_status(&self, run_id: &str, status: RunStatus) -> Result<EvalRun> {
        let mut state = self.state.write().await;
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| EvalError::RunNotFound(run_id.to_string()))?;
        check_transition(run_id, run.status, run.is_finalized(), status)?;
        run.status = status;
        Ok(run.clone())
    }

    async fn append_result(
        &self,
        run_id: &str,
        result: &EvalRunResult,
        progress: u8,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| EvalError::RunNotFound(run_id.to_string()))?;
        check_appendable(run_id, run.status, run.is_finalized())?;
        run.results.push(result.clone());
        run.progress = run.progress.max(progress);
        Ok(())
    }

    async fn set_progress(&self, run_id: &str, progress: u8) -> Result<()> {
        let mut state = self.state.write().await;
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| EvalError::RunNotFound(run_id.to_string()))?;
        check_appendable(run_id, run.status, run.is_finalized())?;
        run.progress = run.progress.max(progress);
        Ok(())
    }

    async fn finalize_run(
        &self,
        run_id: &str,
        status: RunStatus,
        aggregate: AggregateMetrics,
    ) -> Result<EvalRun> {
        let mut state = self.state.write().await;
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| EvalError::RunNotFound(run_id.to_string()))?;
        run.status = finalized_status(run_id, run.status, run.is_finalized(), status)?;
        run.aggregate_metrics = Some(aggregate);
        run.completed_at = Some(Utc::now());
        Ok(run.clone())
    }

    async fn get_run(&self, run_id: &str) -> Result<EvalRun> {
        let state = self.state.read().await;
        state
            .runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| EvalError::RunNotFound(run_id.to_string()))
    }

    async fn list_runs(&self) -> Result<Vec<EvalRun>> {
        let state = self.state.read().await;
        Ok(state
            .order
            .iter()
            .rev()
            .filter_map(|id| state.runs.get(id).cloned())
            .collect())
    }

    async fn status(&self, run_id: &str) -> Result<RunStatus> {
        let state = self.state.read().await;
        state
            .runs
            .get(run_id)
            .map(|run| run.status)
            .ok_or_else(|| EvalError::RunNotFound(run_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;

    #[tokio::test]
    async fn test_lifecycle() {
        contract::lifecycle(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_cancellation_wins() {
        contract::cancellation_wins(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_missing_runs() {
        contract::missing_runs(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_listing() {
        contract::listing(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_duplicate_create_is_rejected() {
        let store = MemoryStore::new();
        let run = contract::new_run("dup");
        store.create_run(&run).await.unwrap();
        assert!(matches!(
            store.create_run(&run).await,
            Err(EvalError::DuplicateRun(_))
        ));
    }
}
