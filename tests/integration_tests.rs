// tests/integration_tests.rs
use skilleval::catalog::Catalog;
use skilleval::errors::EvalError;
use skilleval::events::RunEvent;
use skilleval::executor::{MockConfig, MockExecutor};
use skilleval::models::{ModelConfig, RunRequest, RunStatus};
use skilleval::report::{RunComparison, RunReport};
use skilleval::runner::{MatrixRunner, RunnerSettings};
use skilleval::store::{MemoryStore, RunStore, SqliteStore};
use std::io::Write;
use std::sync::Arc;

const EXAMPLE_CATALOG: &str = include_str!("../catalog.example.toml");

fn runner_with(store: Arc<dyn RunStore>, mock: MockConfig) -> MatrixRunner {
    let catalog = Arc::new(Catalog::from_toml(EXAMPLE_CATALOG).unwrap());
    MatrixRunner::new(
        catalog,
        Arc::new(MockExecutor::new(mock)),
        store,
        RunnerSettings {
            project_id: "demo".to_string(),
            default_timeout_ms: 5_000,
        },
    )
}

fn request(scenarios: &[&str], agents: &[&str]) -> RunRequest {
    RunRequest {
        scenario_ids: scenarios.iter().map(|s| s.to_string()).collect(),
        agent_ids: agents.iter().map(|a| a.to_string()).collect(),
        ..RunRequest::default()
    }
}

#[test]
fn test_catalog_loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(EXAMPLE_CATALOG.as_bytes()).unwrap();

    let catalog = Catalog::load(file.path()).unwrap();

    assert_eq!(catalog.project_id(), Some("demo"));
    assert_eq!(catalog.skills().len(), 2);
    assert_eq!(catalog.agents().len(), 3);
    assert_eq!(catalog.scenarios().len(), 3);
    assert_eq!(
        catalog.scenarios()[0].rendered_prompt(),
        "Add a sum function to src/lib.rs"
    );
}

#[test]
fn test_missing_catalog_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = Catalog::load(dir.path().join("catalog.toml"));
    assert!(matches!(result, Err(EvalError::FileRead(_))));
}

#[tokio::test]
async fn test_full_matrix_in_memory() {
    let runner = runner_with(Arc::new(MemoryStore::new()), MockConfig::instant(11));
    let mut events = runner.subscribe();

    let run = runner
        .run_evaluation_matrix(request(
            &["add-fn", "fix-unwrap", "write-commit"],
            &["claude-cli", "gpt-4o"],
        ))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.project_id, "demo");
    assert_eq!(run.skill_id, "suite");
    assert_eq!(run.total_combinations, 6);
    assert_eq!(run.results.len(), 6);
    assert_eq!(run.progress, 100);

    let pairs: Vec<(&str, Option<&str>)> = run
        .results
        .iter()
        .map(|r| (r.scenario_id.as_str(), r.agent_id.as_deref()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("add-fn", Some("claude-cli")),
            ("add-fn", Some("gpt-4o")),
            ("fix-unwrap", Some("claude-cli")),
            ("fix-unwrap", Some("gpt-4o")),
            ("write-commit", Some("claude-cli")),
            ("write-commit", Some("gpt-4o")),
        ]
    );

    // agents without a model fall back to the default
    assert_eq!(run.results[0].model_config, ModelConfig::default());
    assert_eq!(run.results[1].model_config.model, "gpt-4o");

    let aggregate = run.aggregate_metrics.clone().unwrap();
    let assertions: usize = run.results.iter().map(|r| r.passed + r.failed).sum();
    assert_eq!(aggregate.passed + aggregate.failed, assertions);
    assert_eq!(aggregate.completed_combinations, 6);
    assert_eq!(aggregate.skipped_combinations, 0);

    let mut progress = Vec::new();
    let mut finished = false;
    while let Ok(event) = events.try_recv() {
        if let Some(p) = event.progress() {
            progress.push(p);
        }
        if let RunEvent::RunFinished { status, .. } = event {
            assert_eq!(status, RunStatus::Completed);
            finished = true;
        }
    }
    assert!(finished);
    assert_eq!(progress, vec![17, 33, 50, 67, 83, 100]);
}

#[tokio::test]
async fn test_full_matrix_in_sqlite_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("runs.db").display());

    let run = {
        let store = Arc::new(SqliteStore::connect(&url).await.unwrap());
        let runner = runner_with(store, MockConfig::instant(3));
        let mut req = request(&["add-fn", "write-commit"], &["local-llama"]);
        req.name = Some("nightly".to_string());
        runner.run_evaluation_matrix(req).await.unwrap()
    };

    let reopened = SqliteStore::connect(&url).await.unwrap();
    let loaded = reopened.get_run(&run.id).await.unwrap();

    assert_eq!(loaded.name, "nightly");
    assert_eq!(loaded.status, RunStatus::Completed);
    let outcomes = |r: &skilleval::models::EvalRunResult| {
        (r.scenario_id.clone(), r.agent_id.clone(), r.passed, r.failed)
    };
    assert_eq!(
        loaded.results.iter().map(outcomes).collect::<Vec<_>>(),
        run.results.iter().map(outcomes).collect::<Vec<_>>()
    );
    let (stored, original) = (
        loaded.aggregate_metrics.unwrap(),
        run.aggregate_metrics.unwrap(),
    );
    assert_eq!(stored.passed, original.passed);
    assert_eq!(stored.completed_combinations, 2);
    assert_eq!(reopened.list_runs().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_model_override_applies_everywhere() {
    let runner = runner_with(Arc::new(MemoryStore::new()), MockConfig::instant(5));
    let haiku = ModelConfig {
        provider: "anthropic".to_string(),
        model: "claude-3-haiku".to_string(),
        temperature: 0.0,
        max_tokens: 512,
    };
    let mut req = request(&["add-fn"], &["claude-cli", "gpt-4o", "local-llama"]);
    req.model_override = Some(haiku.clone());

    let run = runner.run_evaluation_matrix(req).await.unwrap();

    assert_eq!(run.results.len(), 3);
    assert!(run.results.iter().all(|r| r.model_config == haiku));
}

#[tokio::test]
async fn test_failing_executions_are_counted_as_skipped() {
    let mock = MockConfig {
        failure_rate: 1.0,
        ..MockConfig::instant(9)
    };
    let runner = runner_with(Arc::new(MemoryStore::new()), mock);

    let run = runner
        .run_evaluation_matrix(request(&["add-fn", "fix-unwrap"], &[]))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.results.is_empty());
    assert_eq!(run.progress, 100);
    let aggregate = run.aggregate_metrics.unwrap();
    assert_eq!(aggregate.total_combinations, 2);
    assert_eq!(aggregate.skipped_combinations, 2);
    assert_eq!(aggregate.pass_rate, 0.0);
}

#[tokio::test]
async fn test_empty_selection_creates_nothing() {
    let store = Arc::new(MemoryStore::new());
    let runner = runner_with(store.clone(), MockConfig::instant(1));

    let result = runner.run_evaluation_matrix(request(&[], &["gpt-4o"])).await;

    assert!(matches!(result, Err(EvalError::EmptySelection)));
    assert!(store.list_runs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reports_and_comparison_across_runs() {
    let runner = runner_with(Arc::new(MemoryStore::new()), MockConfig::instant(21));
    let scenarios = ["add-fn", "fix-unwrap", "write-commit"];

    let base = runner
        .run_evaluation_matrix(request(&scenarios, &["claude-cli"]))
        .await
        .unwrap();
    let candidate = runner
        .run_evaluation_matrix(request(&scenarios, &["gpt-4o"]))
        .await
        .unwrap();

    let report = RunReport::from_run(&base);
    assert_eq!(report.by_scenario.len(), 3);
    assert_eq!(report.by_agent.len(), 1);
    assert_eq!(report.by_agent[0].key, "claude-cli");
    let failed_assertions: usize = report.failures.iter().map(|f| f.occurrences).sum();
    assert_eq!(failed_assertions, report.aggregate.failed);

    let comparison = RunComparison::between(&base, &candidate);
    assert_eq!(comparison.scenarios.len(), 3);
    assert!(
        (comparison.delta - (comparison.candidate_pass_rate - comparison.base_pass_rate)).abs()
            < 1e-9
    );
    for id in comparison.regressions.iter().chain(comparison.improvements.iter()) {
        assert!(scenarios.contains(&id.as_str()));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_runs_share_one_sqlite_file() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("runs.db").display());
    let store: Arc<dyn RunStore> = Arc::new(SqliteStore::connect(&url).await.unwrap());

    let mut handles = Vec::new();
    for seed in 0..6 {
        let runner = runner_with(store.clone(), MockConfig::instant(seed));
        handles.push(tokio::spawn(async move {
            runner
                .run_evaluation_matrix(request(
                    &["add-fn", "fix-unwrap", "write-commit"],
                    &["claude-cli", "gpt-4o", "local-llama"],
                ))
                .await
        }));
    }

    for handle in handles {
        let run = handle.await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.results.len(), 9);
        assert!(run.completed_at.is_some());
    }

    let runs = store.list_runs().await.unwrap();
    assert_eq!(runs.len(), 6);
    assert!(runs.iter().all(|r| r.is_finalized() && r.progress == 100));
}
