// src/api/handlers/mod.rs
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;

use crate::errors::EvalError;

mod catalog;
mod health;
mod runs;
pub mod ws;

pub use catalog::{list_agents, list_scenarios, list_skills, list_target_groups};
pub use health::health_check;
pub use runs::{cancel_run, compare_runs, create_run, get_report, get_run, get_status, list_runs};
pub use ws::{ws_handler, WsBroker};

impl ResponseError for EvalError {
    fn status_code(&self) -> StatusCode {
        match self {
            EvalError::EmptySelection
            | EvalError::NothingToRun
            | EvalError::InvalidRequest(_)
            | EvalError::Config(_) => StatusCode::BAD_REQUEST,
            EvalError::RunNotFound(_) => StatusCode::NOT_FOUND,
            EvalError::DuplicateRun(_)
            | EvalError::RunFinalized { .. }
            | EvalError::InvalidTransition { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("Request failed: {}", self);
        }
        HttpResponse::build(status).json(json!({ "error": self.to_string() }))
    }
}
