/// Application context and dependency injection
use crate::{
    codes::ActivationCodeRegistry,
    config::ServerConfig,
    db,
    error::{EngineError, EngineResult},
    ledger::EntitlementLedger,
    quota::QuotaEnforcer,
    resources::ResourceStore,
    users::UserDirectory,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub users: Arc<UserDirectory>,
    pub codes: Arc<ActivationCodeRegistry>,
    pub ledger: Arc<EntitlementLedger>,
    pub quota: Arc<QuotaEnforcer>,
    pub resources: Arc<ResourceStore>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> EngineResult<Self> {
        config.validate()?;

        if !config.storage.data_directory.exists() {
            tokio::fs::create_dir_all(&config.storage.data_directory)
                .await
                .map_err(|e| {
                    EngineError::Internal(format!(
                        "Failed to create directory {:?}: {}",
                        config.storage.data_directory, e
                    ))
                })?;
        }

        let options = db::DatabaseOptions {
            max_connections: config.storage.max_connections,
            ..Default::default()
        };
        let pool = db::create_pool(&config.storage.database, options).await?;
        db::run_migrations(&pool).await?;
        db::test_connection(&pool).await?;

        tracing::info!(database = ?config.storage.database, "database ready");

        Ok(Self::from_pool(config, pool))
    }

    /// Wire services over an already migrated pool
    pub fn from_pool(config: ServerConfig, db: SqlitePool) -> Self {
        let quota = QuotaEnforcer::new(db.clone());
        let resources = ResourceStore::new(db.clone(), quota.clone(), &config.engine);

        Self {
            users: Arc::new(UserDirectory::new(db.clone())),
            codes: Arc::new(ActivationCodeRegistry::new(db.clone(), config.engine.clone())),
            ledger: Arc::new(EntitlementLedger::new(db.clone())),
            quota: Arc::new(quota),
            resources: Arc::new(resources),
            config: Arc::new(config),
            db,
        }
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
