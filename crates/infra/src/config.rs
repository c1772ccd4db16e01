//! Service configuration.
//!
//! Loaded from a YAML file, then overridden from the environment. Every
//! section has defaults, so an empty (or missing) file is a valid dev config.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgSslMode};

pub use simbench_observability::LogFormat;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
    #[error("invalid database {field}: {source}")]
    Database {
        field: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub migrations: MigrationsConfig,
    pub worker: WorkerSettings,
    pub advisor: AdvisorConfig,
    pub sessions: SessionSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Database connection settings.
///
/// `url` wins when set; otherwise the connection is assembled from the parts.
/// An empty `host` and `url` means "no database" (in-memory store).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub sslmode: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: String::new(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            dbname: "simbench".to_string(),
            sslmode: "disable".to_string(),
            max_connections: 10,
        }
    }
}

impl DatabaseConfig {
    /// Connection options, or `None` when no database is configured.
    ///
    /// The parts are passed as discrete options, never spliced into a URL,
    /// so credentials may contain any character.
    pub fn connect_options(&self) -> Result<Option<PgConnectOptions>, ConfigError> {
        if let Some(url) = self.url.as_deref().filter(|u| !u.is_empty()) {
            let options = PgConnectOptions::from_str(url)
                .map_err(|source| ConfigError::Database { field: "url", source })?;
            return Ok(Some(options));
        }
        if self.host.is_empty() {
            return Ok(None);
        }

        let ssl_mode = PgSslMode::from_str(&self.sslmode)
            .map_err(|source| ConfigError::Database { field: "sslmode", source })?;
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.dbname)
            .ssl_mode(ssl_mode);
        if !self.password.is_empty() {
            options = options.password(&self.password);
        }
        Ok(Some(options))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    pub auto_run: bool,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self { auto_run: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub enabled: bool,
    pub poll_interval_secs: u64,
    pub execution_timeout_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 5,
            execution_timeout_secs: 300,
        }
    }
}

impl WorkerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    pub url: String,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub backend: SessionBackend,
    pub redis_url: String,
    pub ttl_secs: i64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            backend: SessionBackend::Memory,
            redis_url: "redis://localhost:6379".to_string(),
            ttl_secs: 24 * 60 * 60,
        }
    }
}

impl SessionSettings {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs.max(1))
    }
}

impl ServiceConfig {
    /// Read `path` (missing file = defaults) and apply process env overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };
        config.apply_env_overrides_from(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    /// Apply overrides from a lookup function (the process env in production).
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = get("SERVER_PORT") {
            self.server.port = parse_env("SERVER_PORT", v)?;
        }
        if let Some(v) = get("DB_HOST") {
            self.database.host = v;
        }
        if let Some(v) = get("DB_PORT") {
            self.database.port = parse_env("DB_PORT", v)?;
        }
        if let Some(v) = get("DB_USER") {
            self.database.user = v;
        }
        if let Some(v) = get("DB_PASSWORD") {
            self.database.password = v;
        }
        if let Some(v) = get("DB_NAME") {
            self.database.dbname = v;
        }
        if let Some(v) = get("DATABASE_URL") {
            self.database.url = Some(v);
        }
        if let Some(v) = get("ADVISOR_URL") {
            self.advisor.url = v;
        }
        if let Some(v) = get("REDIS_URL") {
            self.sessions.redis_url = v;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { key, value })
}
