// src/api/handlers/health.rs
use actix_web::{web, HttpResponse, Result};
use serde_json::json;

use crate::api::AppState;

pub async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "skilleval",
        "version": env!("CARGO_PKG_VERSION"),
        "project_id": state.config.project_id,
        "store": if state.config.uses_memory_store() { "memory" } else { "sqlite" },
    })))
}
