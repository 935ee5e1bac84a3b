// src/api/handlers/catalog.rs
use actix_web::{web, HttpResponse, Result};

use crate::api::AppState;

pub async fn list_skills(state: web::Data<AppState>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.catalog.skills()))
}

pub async fn list_scenarios(state: web::Data<AppState>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.catalog.scenarios()))
}

pub async fn list_agents(state: web::Data<AppState>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.catalog.agents()))
}

pub async fn list_target_groups(state: web::Data<AppState>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.catalog.target_groups()))
}
