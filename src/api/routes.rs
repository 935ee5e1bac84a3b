// src/api/routes.rs
use actix_web::web;
use super::handlers;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(handlers::health_check))
            .route("/skills", web::get().to(handlers::list_skills))
            .route("/scenarios", web::get().to(handlers::list_scenarios))
            .route("/agents", web::get().to(handlers::list_agents))
            .route("/target-groups", web::get().to(handlers::list_target_groups))
            .service(
                web::scope("/runs")
                    .route("", web::post().to(handlers::create_run))
                    .route("", web::get().to(handlers::list_runs))
                    // before /{id}
                    .route("/compare", web::get().to(handlers::compare_runs))
                    .route("/{id}", web::get().to(handlers::get_run))
                    .route("/{id}/status", web::get().to(handlers::get_status))
                    .route("/{id}/cancel", web::post().to(handlers::cancel_run))
                    .route("/{id}/report", web::get().to(handlers::get_report))
            )
            .route("/ws", web::get().to(handlers::ws_handler))
    );
}
