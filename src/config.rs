// src/config.rs
use std::path::PathBuf;
use std::str::FromStr;

use crate::errors::{EvalError, Result};
use crate::executor::MockConfig;
use crate::runner::RunnerSettings;

/// `DATABASE_URL` value that selects the in-memory run store.
pub const MEMORY_DATABASE: &str = "memory";

/// High-level application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// `sqlite:<path>` or `memory`.
    pub database_url: String,
    pub catalog_path: PathBuf,
    pub project_id: String,
    pub default_timeout_ms: u64,
    pub mock: MockConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let defaults = MockConfig::default();
        let mock = MockConfig {
            min_latency_ms: parse_or(&get, "EVAL_MOCK_MIN_LATENCY_MS", defaults.min_latency_ms)?,
            max_latency_ms: parse_or(&get, "EVAL_MOCK_MAX_LATENCY_MS", defaults.max_latency_ms)?,
            pass_probability: parse_or(
                &get,
                "EVAL_MOCK_PASS_PROBABILITY",
                defaults.pass_probability,
            )?,
            error_probability: parse_or(
                &get,
                "EVAL_MOCK_ERROR_PROBABILITY",
                defaults.error_probability,
            )?,
            failure_rate: parse_or(&get, "EVAL_MOCK_FAILURE_RATE", defaults.failure_rate)?,
            seed: get("EVAL_MOCK_SEED").map(|raw| parse("EVAL_MOCK_SEED", &raw)).transpose()?,
        };

        if mock.min_latency_ms > mock.max_latency_ms {
            return Err(EvalError::Config(format!(
                "EVAL_MOCK_MIN_LATENCY_MS ({}) is greater than EVAL_MOCK_MAX_LATENCY_MS ({})",
                mock.min_latency_ms, mock.max_latency_ms
            )));
        }
        for (key, value) in [
            ("EVAL_MOCK_PASS_PROBABILITY", mock.pass_probability),
            ("EVAL_MOCK_ERROR_PROBABILITY", mock.error_probability),
            ("EVAL_MOCK_FAILURE_RATE", mock.failure_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EvalError::Config(format!(
                    "{} must be between 0 and 1, got {}",
                    key, value
                )));
            }
        }

        let database_url = match get("DATABASE_URL") {
            Some(url) => url,
            None => default_database_url()?,
        };
        if database_url != MEMORY_DATABASE && !database_url.starts_with("sqlite:") {
            return Err(EvalError::Config(format!(
                "DATABASE_URL must be '{}' or start with 'sqlite:', got '{}'",
                MEMORY_DATABASE, database_url
            )));
        }

        Ok(AppConfig {
            host: get("EVAL_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&get, "EVAL_PORT", 8080)?,
            database_url,
            catalog_path: get("EVAL_CATALOG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("catalog.toml")),
            project_id: get("EVAL_PROJECT").unwrap_or_else(|| "default".to_string()),
            default_timeout_ms: parse_or(&get, "EVAL_TIMEOUT_MS", 120_000)?,
            mock,
        })
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            project_id: self.project_id.clone(),
            default_timeout_ms: self.default_timeout_ms,
        }
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url == MEMORY_DATABASE
    }
}

fn default_database_url() -> Result<String> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        EvalError::Config("No data directory found; set DATABASE_URL explicitly".to_string())
    })?;
    Ok(format!(
        "sqlite:{}",
        data_dir.join("skilleval").join("skilleval.db").display()
    ))
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| EvalError::Config(format!("{} has an invalid value '{}'", key, raw)))
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => parse(key, &raw),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("DATABASE_URL", "sqlite:runs.db")]).unwrap();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.database_url, "sqlite:runs.db");
        assert_eq!(config.catalog_path, PathBuf::from("catalog.toml"));
        assert_eq!(config.project_id, "default");
        assert_eq!(config.default_timeout_ms, 120_000);
        assert_eq!(config.mock, MockConfig::default());
        assert!(!config.uses_memory_store());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("EVAL_HOST", "127.0.0.1"),
            ("EVAL_PORT", "9000"),
            ("DATABASE_URL", "memory"),
            ("EVAL_CATALOG", "demo/catalog.toml"),
            ("EVAL_PROJECT", "agents"),
            ("EVAL_TIMEOUT_MS", "500"),
            ("EVAL_MOCK_MIN_LATENCY_MS", "0"),
            ("EVAL_MOCK_MAX_LATENCY_MS", " 10 "),
            ("EVAL_MOCK_PASS_PROBABILITY", "0.5"),
            ("EVAL_MOCK_SEED", "42"),
        ])
        .unwrap();

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert!(config.uses_memory_store());
        assert_eq!(config.catalog_path, PathBuf::from("demo/catalog.toml"));
        assert_eq!(config.mock.max_latency_ms, 10);
        assert_eq!(config.mock.pass_probability, 0.5);
        assert_eq!(config.mock.seed, Some(42));

        let settings = config.runner_settings();
        assert_eq!(settings.project_id, "agents");
        assert_eq!(settings.default_timeout_ms, 500);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            config_from(&[("DATABASE_URL", "memory"), ("EVAL_PORT", "eighty")]),
            Err(EvalError::Config(msg)) if msg.contains("EVAL_PORT")
        ));
        assert!(matches!(
            config_from(&[("DATABASE_URL", "memory"), ("EVAL_MOCK_PASS_PROBABILITY", "1.5")]),
            Err(EvalError::Config(_))
        ));
        assert!(matches!(
            config_from(&[
                ("DATABASE_URL", "memory"),
                ("EVAL_MOCK_MIN_LATENCY_MS", "100"),
                ("EVAL_MOCK_MAX_LATENCY_MS", "10"),
            ]),
            Err(EvalError::Config(_))
        ));
        assert!(matches!(
            config_from(&[("DATABASE_URL", "postgres://localhost/db")]),
            Err(EvalError::Config(_))
        ));
    }
}
