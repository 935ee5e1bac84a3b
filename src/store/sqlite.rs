// src/store/sqlite.rs
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::errors::{EvalError, Result};
use crate::models::{AggregateMetrics, EvalRun, EvalRunResult, RunStatus};
use crate::store::{check_appendable, check_transition, finalized_status, RunStore};

/// Run store backed by a SQLite database.
///
/// Every mutation runs inside `writer`, so a read-then-write transaction
/// never has to upgrade its lock while another writer of this store holds one.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    writer: Arc<Mutex<()>>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database behind a `sqlite:<path>` url
    /// and applies pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let db_path = db_path_from_url(database_url)?;

        // Create parent directory BEFORE attempting to connect
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
                log::debug!("Ensured database directory {}", parent.display());
            }
        }

        let absolute_path = if db_path.is_relative() {
            std::env::current_dir()?.join(&db_path)
        } else {
            db_path
        };

        log::debug!("📦 Connecting to sqlite://{}", absolute_path.display());

        let options = SqliteConnectOptions::new()
            .filename(&absolute_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    /// Private in-memory database; a single connection that is never recycled.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        log::info!("✅ Database migrations completed");
        Ok(Self {
            pool,
            writer: Arc::new(Mutex::new(())),
        })
    }

    async fn load_results(&self, run_id: &str) -> Result<Vec<EvalRunResult>> {
        let rows = sqlx::query(
            r#"
            SELECT payload FROM eval_run_results
            WHERE run_id = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<EvalRunResult> {
                let payload: String = row.try_get("payload")?;
                Ok(serde_json::from_str(&payload)?)
            })
            .collect()
    }

    async fn hydrate(&self, row: &SqliteRow) -> Result<EvalRun> {
        let mut run = run_from_row(row)?;
        run.results = self.load_results(&run.id).await?;
        Ok(run)
    }
}

fn db_path_from_url(database_url: &str) -> Result<PathBuf> {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .ok_or_else(|| EvalError::Config("DATABASE_URL must start with 'sqlite:'".into()))?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(EvalError::Config("DATABASE_URL has no database path".into()));
    }
    Ok(PathBuf::from(path))
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| EvalError::Database(sqlx::Error::Decode(Box::new(e))))
}

/// Status, finalized flag.
struct RunHeader {
    status: RunStatus,
    finalized: bool,
}

async fn fetch_header<'e, E>(executor: E, run_id: &str) -> Result<RunHeader>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let row = sqlx::query("SELECT status, completed_at FROM eval_runs WHERE id = ?")
        .bind(run_id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| EvalError::RunNotFound(run_id.to_string()))?;

    let status: String = row.try_get("status")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;
    Ok(RunHeader {
        status: status.parse()?,
        finalized: completed_at.is_some(),
    })
}

fn run_from_row(row: &SqliteRow) -> Result<EvalRun> {
    let config: String = row.try_get("config")?;
    let status: String = row.try_get("status")?;
    let progress: i64 = row.try_get("progress")?;
    let total_combinations: i64 = row.try_get("total_combinations")?;
    let aggregate: Option<String> = row.try_get("aggregate_metrics")?;
    let started_at: String = row.try_get("started_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;

    Ok(EvalRun {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        name: row.try_get("name")?,
        skill_id: row.try_get("skill_id")?,
        config: serde_json::from_str(&config)?,
        status: status.parse()?,
        progress: progress.clamp(0, 100) as u8,
        total_combinations: total_combinations.max(0) as usize,
        results: Vec::new(),
        aggregate_metrics: aggregate.as_deref().map(serde_json::from_str).transpose()?,
        started_at: parse_timestamp(&started_at)?,
        completed_at: completed_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

const RUN_COLUMNS: &str = "id, project_id, name, skill_id, config, status, progress, \
                           total_combinations, aggregate_metrics, started_at, completed_at";

#[async_trait]
impl RunStore for SqliteStore {
    async fn create_run(&self, run: &EvalRun) -> Result<()> {
        let _guard = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO eval_runs (
                id, project_id, name, skill_id, config, status, progress,
                total_combinations, aggregate_metrics, started_at, completed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.project_id)
        .bind(&run.name)
        .bind(&run.skill_id)
        .bind(serde_json::to_string(&run.config)?)
        .bind(run.status.as_str())
        .bind(i64::from(run.progress))
        .bind(run.total_combinations as i64)
        .bind(run.aggregate_metrics.as_ref().map(serde_json::to_string).transpose()?)
        .bind(timestamp(&run.started_at))
        .bind(run.completed_at.as_ref().map(timestamp))
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(EvalError::DuplicateRun(run.id.clone()));
            }
            Err(e) => return Err(e.into()),
        }

        for (seq, result) in run.results.iter().enumerate() {
            sqlx::query("INSERT INTO eval_run_results (run_id, seq, payload) VALUES (?, ?, ?)")
                .bind(&run.id)
                .bind(seq as i64)
                .bind(serde_json::to_string(result)?)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn set_status(&self, run_id: &str, status: RunStatus) -> Result<EvalRun> {
        let _guard = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;
        let header = fetch_header(&mut *tx, run_id).await?;
        check_transition(run_id, header.status, header.finalized, status)?;

        sqlx::query("UPDATE eval_runs SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(run_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_run(run_id).await
    }

    async fn append_result(
        &self,
        run_id: &str,
        result: &EvalRunResult,
        progress: u8,
    ) -> Result<()> {
        let _guard = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;
        let header = fetch_header(&mut *tx, run_id).await?;
        check_appendable(run_id, header.status, header.finalized)?;

        sqlx::query(
            r#"
            INSERT INTO eval_run_results (run_id, seq, payload)
            VALUES (?, (SELECT COUNT(*) FROM eval_run_results WHERE run_id = ?), ?)
            "#,
        )
        .bind(run_id)
        .bind(run_id)
        .bind(serde_json::to_string(result)?)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE eval_runs SET progress = MAX(progress, ?) WHERE id = ?")
            .bind(i64::from(progress))
            .bind(run_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn set_progress(&self, run_id: &str, progress: u8) -> Result<()> {
        let _guard = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;
        let header = fetch_header(&mut *tx, run_id).await?;
        check_appendable(run_id, header.status, header.finalized)?;

        sqlx::query("UPDATE eval_runs SET progress = MAX(progress, ?) WHERE id = ?")
            .bind(i64::from(progress))
            .bind(run_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn finalize_run(
        &self,
        run_id: &str,
        status: RunStatus,
        aggregate: AggregateMetrics,
    ) -> Result<EvalRun> {
        let _guard = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;
        let header = fetch_header(&mut *tx, run_id).await?;
        let final_status = finalized_status(run_id, header.status, header.finalized, status)?;

        sqlx::query(
            r#"
            UPDATE eval_runs
            SET status = ?, aggregate_metrics = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(final_status.as_str())
        .bind(serde_json::to_string(&aggregate)?)
        .bind(timestamp(&Utc::now()))
        .bind(run_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.get_run(run_id).await
    }

    async fn get_run(&self, run_id: &str) -> Result<EvalRun> {
        let sql = format!("SELECT {} FROM eval_runs WHERE id = ?", RUN_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EvalError::RunNotFound(run_id.to_string()))?;

        self.hydrate(&row).await
    }

    async fn list_runs(&self) -> Result<Vec<EvalRun>> {
        let sql = format!(
            "SELECT {} FROM eval_runs ORDER BY started_at DESC, rowid DESC",
            RUN_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in &rows {
            runs.push(self.hydrate(row).await?);
        }
        Ok(runs)
    }

    async fn status(&self, run_id: &str) -> Result<RunStatus> {
        Ok(fetch_header(&self.pool, run_id).await?.status)
    }
}
