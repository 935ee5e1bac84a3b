// src/main.rs
use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use std::io;
use std::sync::Arc;

use skilleval::api::{configure_routes, forward_events, AppState, WsBroker};
use skilleval::banner;
use skilleval::catalog::Catalog;
use skilleval::config::AppConfig;
use skilleval::errors::EvalError;
use skilleval::executor::MockExecutor;
use skilleval::runner::MatrixRunner;
use skilleval::store::{MemoryStore, RunStore, SqliteStore};

fn startup_error(e: EvalError) -> io::Error {
    io::Error::other(e.to_string())
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    banner::print_banner();

    if let Err(e) = dotenvy::dotenv() {
        eprintln!("⚠️  Warning: Could not load .env file: {}", e);
        eprintln!("   Falling back to process environment");
    }

    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let app_config = AppConfig::from_env().map_err(startup_error)?;

    let catalog = if app_config.catalog_path.exists() {
        Catalog::load(&app_config.catalog_path).map_err(startup_error)?
    } else {
        log::warn!(
            "Catalog {} not found, starting with an empty catalog",
            app_config.catalog_path.display()
        );
        Catalog::default()
    };
    log::info!(
        "Loaded {} skill(s), {} agent(s), {} scenario(s)",
        catalog.skills().len(),
        catalog.agents().len(),
        catalog.scenarios().len()
    );

    let store: Arc<dyn RunStore> = if app_config.uses_memory_store() {
        log::info!("Using in-memory run store");
        Arc::new(MemoryStore::new())
    } else {
        log::info!("Using SQLite run store at {}", app_config.database_url);
        Arc::new(
            SqliteStore::connect(&app_config.database_url)
                .await
                .map_err(startup_error)?,
        )
    };

    let mut settings = app_config.runner_settings();
    if let Some(project_id) = catalog.project_id() {
        settings.project_id = project_id.to_string();
    }

    let catalog = Arc::new(catalog);
    let runner = MatrixRunner::new(
        catalog.clone(),
        Arc::new(MockExecutor::new(app_config.mock.clone())),
        store,
        settings,
    );

    let broker = WsBroker::new();
    actix_web::rt::spawn(forward_events(broker.clone(), runner.subscribe()));

    let bind = (app_config.host.clone(), app_config.port);
    let state = AppState::new(app_config, catalog, runner);

    log::info!("Starting server on http://{}:{}", bind.0, bind.1);

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .app_data(web::Data::new(state.clone()))
            .app_data(web::Data::new(broker.clone()))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .configure(configure_routes)
    })
    .bind(bind)?
    .run()
    .await
}
