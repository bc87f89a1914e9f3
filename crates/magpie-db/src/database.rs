use magpie_core::HarvestError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::store::PgProfileStore;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Configuration for the database connection pool.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// Read configuration from the environment:
    /// `DATABASE_URL` (required), `DATABASE_MAX_CONNECTIONS` (optional).
    pub fn from_env() -> Result<Self, HarvestError> {
        let url = std::env::var("DATABASE_URL")
            .map_err(|_| HarvestError::Config("DATABASE_URL not set".into()))?;

        let mut config = Self::new(url);
        if let Ok(raw) = std::env::var("DATABASE_MAX_CONNECTIONS") {
            let parsed: u32 = raw.parse().map_err(|_| {
                HarvestError::Config(format!(
                    "invalid DATABASE_MAX_CONNECTIONS `{raw}`: must be a positive integer"
                ))
            })?;
            if parsed == 0 {
                return Err(HarvestError::Config(
                    "DATABASE_MAX_CONNECTIONS must be at least 1".into(),
                ));
            }
            config.max_connections = parsed;
        }
        Ok(config)
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }
}

/// Central database facade — owns the connection pool, runs migrations,
/// and vends the store.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, HarvestError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| HarvestError::Database(format!("failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), HarvestError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| HarvestError::Database(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Get a [`PgProfileStore`] backed by this pool.
    pub fn profile_store(&self) -> PgProfileStore {
        PgProfileStore::new(self.pool.clone())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
