//! Configuration module for ledger-sync-service.

mod engine;

pub use engine::{AccountBook, AccountRole, ApproximateMatchPolicy, BankAccount, Chart, EngineSettings};

use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

/// Settings file stem, resolved by the `config` crate (`ledger-sync.toml`, ...).
pub const SETTINGS_FILE: &str = "ledger-sync";
/// Prefix for engine setting overrides, e.g. `LEDGER_SYNC__CONCEPT_WIDTH=40`.
pub const SETTINGS_ENV_PREFIX: &str = "LEDGER_SYNC";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    /// Absent for offline simulation.
    pub database: Option<DatabaseConfig>,
    pub engine: EngineSettings,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let engine: EngineSettings =
            core_config::load_settings(SETTINGS_FILE, SETTINGS_ENV_PREFIX)?;
        engine.validate()?;

        let database = env::var("DATABASE_URL").ok().map(|url| DatabaseConfig {
            url,
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
        });

        Ok(Self {
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "ledger-sync".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database,
            engine,
        })
    }

    /// Database settings, required for anything that touches the real store.
    pub fn require_database(&self) -> Result<&DatabaseConfig, AppError> {
        self.database
            .as_ref()
            .ok_or_else(|| AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required")))
    }
}
