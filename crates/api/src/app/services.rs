use std::sync::Arc;

use simbench_auth::{Role, RoleDirectory, StaticRoleDirectory};
use simbench_infra::config::{ConfigError, ServiceConfig, SessionBackend};
use simbench_infra::jobs::{InMemoryJobStore, JobStore, JobStoreError, PostgresJobStore};
use simbench_infra::sessions::{InMemorySessionStore, SessionStore, SessionStoreError};

/// Shared handles injected into handlers and middleware.
#[derive(Clone)]
pub struct AppServices {
    pub jobs: Arc<dyn JobStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub roles: Arc<dyn RoleDirectory>,
}

impl AppServices {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        sessions: Arc<dyn SessionStore>,
        roles: Arc<dyn RoleDirectory>,
    ) -> Self {
        Self {
            jobs,
            sessions,
            roles,
        }
    }

    /// Everything in memory; every user is a simulator.
    pub fn in_memory() -> Self {
        Self::new(
            InMemoryJobStore::arc(),
            Arc::new(InMemorySessionStore::default()),
            Arc::new(StaticRoleDirectory::new(vec![Role::SIMULATOR])),
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceInitError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("job store: {0}")]
    Jobs(#[from] JobStoreError),
    #[error("session store: {0}")]
    Sessions(#[from] SessionStoreError),
    #[error("redis sessions requested but the binary was built without the `redis` feature")]
    RedisDisabled,
}

/// Wire stores according to `config`.
///
/// No database configured means the in-memory job store (dev mode).
pub async fn build_services(config: &ServiceConfig) -> Result<AppServices, ServiceInitError> {
    let jobs: Arc<dyn JobStore> = match config.database.connect_options()? {
        Some(options) => {
            let host = options.get_host().to_string();
            let store =
                PostgresJobStore::connect_with(options, config.database.max_connections).await?;
            if config.migrations.auto_run {
                store.migrate().await?;
                tracing::info!("database migrations applied");
            }
            tracing::info!(%host, "using postgres job store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("no database configured; using in-memory job store");
            InMemoryJobStore::arc()
        }
    };

    let sessions: Arc<dyn SessionStore> = match config.sessions.backend {
        SessionBackend::Memory => Arc::new(InMemorySessionStore::new(config.sessions.ttl())),
        #[cfg(feature = "redis")]
        SessionBackend::Redis => Arc::new(simbench_infra::sessions::RedisSessionStore::with_ttl(
            &config.sessions.redis_url,
            config.sessions.ttl(),
        )?),
        #[cfg(not(feature = "redis"))]
        SessionBackend::Redis => return Err(ServiceInitError::RedisDisabled),
    };

    let roles: Arc<dyn RoleDirectory> = Arc::new(StaticRoleDirectory::new(vec![Role::SIMULATOR]));

    Ok(AppServices::new(jobs, sessions, roles))
}
