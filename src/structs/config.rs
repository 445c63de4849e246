use anyhow::Result;
use config::{Config as RawConfig, Environment, File};
use serde::{Deserialize, Serialize};

use std::path::Path;

use crate::cli::Args;

/// Service settings for the platform processes.
///
/// Loaded from `adarena.toml` (or `--config`) with `ADARENA_*` environment
/// overrides (example: `ADARENA_ADMIN__PASSWORD`). Game rules live in the
/// database, not here; see `bootstrap` for the YAML that seeds them.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub server: ServerSettings,
    pub admin: AdminSettings,
    pub runner: RunnerSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// SQLite database file path.
    pub file: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminSettings {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Concurrent jobs drained from the queue.
    pub max_jobs: usize,

    /// Size of the bounded checker subprocess pool.
    pub checkers: usize,
}

impl Settings {
    pub fn from_sources(cli: &Args) -> Result<Self> {
        let mut builder = RawConfig::builder();

        // 1. CLI-specified config file
        if let Some(ref path) = cli.config {
            builder = builder.add_source(File::from(path.clone()));
        }
        // 2. Local ./adarena.toml
        else if Path::new("adarena.toml").exists() {
            builder = builder.add_source(File::with_name("adarena.toml"));
        }

        // Env overrides (example: `ADARENA_SERVER__PORT`)
        builder = builder.add_source(Environment::with_prefix("ADARENA").separator("__"));

        let built = builder.build()?;
        Ok(built.try_deserialize()?)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseSettings::default(),
            server: ServerSettings::default(),
            admin: AdminSettings::default(),
            runner: RunnerSettings::default(),
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            file: "adarena.sqlite".to_string(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "changeme".to_string(),
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            max_jobs: 8,
            checkers: 4,
        }
    }
}
