// src/api/handlers/runs.rs
use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::api::AppState;
use crate::errors::EvalError;
use crate::models::{RunProgress, RunRequest};
use crate::report::{RunComparison, RunReport};

type HandlerResult = Result<HttpResponse, EvalError>;

#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    pub base: String,
    pub candidate: String,
}

/// Creates the run and answers 202 right away; the matrix executes in the
/// background and reports through the event feed.
pub async fn create_run(state: web::Data<AppState>, req: web::Json<RunRequest>) -> HandlerResult {
    let prepared = state.runner.prepare(req.into_inner()).await?;
    let run = prepared.run.clone();

    let runner = state.runner.clone();
    actix_web::rt::spawn(async move {
        let run_id = prepared.run.id.clone();
        if let Err(e) = runner.execute(prepared).await {
            log::error!("Run {} aborted: {}", run_id, e);
        }
    });

    Ok(HttpResponse::Accepted().json(run))
}

pub async fn list_runs(state: web::Data<AppState>) -> HandlerResult {
    let runs = state.runner.store().list_runs().await?;
    Ok(HttpResponse::Ok().json(runs))
}

pub async fn get_run(state: web::Data<AppState>, path: web::Path<String>) -> HandlerResult {
    let run = state.runner.store().get_run(&path).await?;
    Ok(HttpResponse::Ok().json(run))
}

pub async fn get_status(state: web::Data<AppState>, path: web::Path<String>) -> HandlerResult {
    let run = state.runner.store().get_run(&path).await?;
    Ok(HttpResponse::Ok().json(RunProgress::from(&run)))
}

pub async fn cancel_run(state: web::Data<AppState>, path: web::Path<String>) -> HandlerResult {
    let run = state.runner.store().cancel_run(&path).await?;
    log::info!("Run {} cancelled on request", run.id);
    Ok(HttpResponse::Ok().json(run))
}

pub async fn get_report(state: web::Data<AppState>, path: web::Path<String>) -> HandlerResult {
    let run = state.runner.store().get_run(&path).await?;
    Ok(HttpResponse::Ok().json(RunReport::from_run(&run)))
}

pub async fn compare_runs(
    state: web::Data<AppState>,
    query: web::Query<CompareQuery>,
) -> HandlerResult {
    let store = state.runner.store();
    let base = store.get_run(&query.base).await?;
    let candidate = store.get_run(&query.candidate).await?;
    Ok(HttpResponse::Ok().json(RunComparison::between(&base, &candidate)))
}
