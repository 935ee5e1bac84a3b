// src/errors.rs
use thiserror::Error;

use crate::models::RunStatus;

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Failed to read file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse TOML catalog: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Failed to (de)serialize JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No scenarios selected")]
    EmptySelection,

    #[error("None of the selected scenarios or agents could be resolved")]
    NothingToRun,

    #[error("Run '{0}' not found")]
    RunNotFound(String),

    #[error("Run '{0}' already exists")]
    DuplicateRun(String),

    #[error("Run '{id}' is already finalized with status {status}")]
    RunFinalized { id: String, status: RunStatus },

    #[error("Run '{id}' cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("Execution of scenario '{scenario}' failed: {reason}")]
    ExecutionFailed { scenario: String, reason: String },

    #[error("Execution of scenario '{scenario}' timed out after {timeout_ms}ms")]
    Timeout { scenario: String, timeout_ms: u64 },
}

pub type Result<T> = std::result::Result<T, EvalError>;
