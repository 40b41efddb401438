use skein_core::CrawlError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::DatabaseConfig;
use crate::fingerprint_filter::FingerprintFilter;
use crate::record_repository::RecordRepository;

/// Central database facade: owns the connection pool, runs migrations,
/// and vends repository and filter instances.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, CrawlError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| CrawlError::DatabaseError(format!("Failed to connect: {e}")))?;

        tracing::info!(max_connections = config.max_connections, "Connected to database");
        Ok(Self { pool })
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), CrawlError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CrawlError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get a [`RecordRepository`] backed by this pool.
    pub fn record_repo(&self) -> RecordRepository {
        RecordRepository::new(self.pool.clone())
    }

    /// Get a [`FingerprintFilter`] writing to the named set.
    pub fn fingerprint_filter(&self, set_name: &str) -> FingerprintFilter {
        FingerprintFilter::new(self.pool.clone(), set_name)
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
