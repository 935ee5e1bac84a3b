// src/api/state.rs
use crate::catalog::Catalog;
use crate::config::AppConfig;
use crate::runner::MatrixRunner;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub catalog: Arc<Catalog>,
    pub runner: MatrixRunner,
}

impl AppState {
    pub fn new(config: AppConfig, catalog: Arc<Catalog>, runner: MatrixRunner) -> Self {
        Self {
            config: Arc::new(config),
            catalog,
            runner,
        }
    }
}
