//! # Process configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! `ledger.toml`, then `LEDGER__*` environment variables (`__` separates
//! nested keys, e.g. `LEDGER__LOG__LEVEL`). A `.env` file is loaded first.
//!
//! The `defaults` table only seeds the stored system configuration on first
//! start; after that the database row is authoritative.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use config::{Config, Environment, File};
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub use secrecy::ExposeSecret;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Postgres connection string. Without one the ledger runs in memory.
    pub database_url: Option<SecretString>,
    pub db_max_connections: u32,
    pub server_addr: SocketAddr,
    pub migrate_on_start: bool,
    /// Shared secret for `/admin` routes. Unset means every admin call is refused.
    pub admin_token: Option<SecretString>,
    pub request_timeout_secs: u64,
    pub log: LogConfig,
    pub defaults: LedgerDefaults,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub json: bool,
}

/// Seed values for the stored system configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LedgerDefaults {
    pub formula_a: f64,
    pub formula_b: f64,
    pub cycle_duration_minutes: i32,
    pub rating_timeout_minutes: i32,
}

impl AppConfig {
    /// Loads `.env`, `ledger.toml` and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "loaded .env");
        }
        Self::build(Some("ledger"), Environment::with_prefix("LEDGER").separator("__"))
    }

    /// Loads from an explicit variable map instead of the process environment.
    pub fn from_map(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::build(None, Environment::with_prefix("LEDGER").separator("__").source(Some(vars)))
    }

    fn build(file: Option<&str>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("db_max_connections", 10)?
            .set_default("server_addr", "0.0.0.0:8080")?
            .set_default("migrate_on_start", true)?
            .set_default("request_timeout_secs", 10)?
            .set_default("log.level", "info")?
            .set_default("log.json", false)?
            .set_default("defaults.formula_a", 1.0)?
            .set_default("defaults.formula_b", 1.0)?
            .set_default("defaults.cycle_duration_minutes", 60)?
            .set_default("defaults.rating_timeout_minutes", 10)?;
        if let Some(name) = file {
            builder = builder.add_source(File::with_name(name).required(false));
        }
        let config: AppConfig = builder.add_source(env.try_parsing(true)).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.defaults;
        if !(d.formula_a.is_finite() && d.formula_a > 0.0 && d.formula_b.is_finite() && d.formula_b > 0.0) {
            return Err(ConfigError::Invalid("formula coefficients must be positive".into()));
        }
        if d.cycle_duration_minutes < 15 {
            return Err(ConfigError::Invalid("cycle duration must be at least 15 minutes".into()));
        }
        if d.rating_timeout_minutes <= 0 {
            return Err(ConfigError::Invalid("rating timeout must be positive".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request timeout must be positive".into()));
        }
        if self.db_max_connections == 0 {
            return Err(ConfigError::Invalid("db_max_connections must be positive".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
