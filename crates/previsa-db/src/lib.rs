//! # previsa-db
//!
//! PostgreSQL persistence layer for previsa.
//!
//! This crate provides:
//! - Connection pool management
//! - The durable job table backing the queue
//! - The practice/provider catalog with pgvector and pg_trgm hybrid search
//! - Agreement lookups
//! - Transactional storage of pre-authorization aggregates
//! - In-memory twins of every repository for tests and embedded use
//!
//! ## Example
//!
//! ```rust,ignore
//! use previsa_db::{Database, JobRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/previsa").await?;
//!     let queued = db.jobs.list_queued().await?;
//!     println!("{} jobs waiting", queued.len());
//!     Ok(())
//! }
//! ```

pub mod agreements;
pub mod catalog;
pub mod jobs;
pub mod memory;
pub mod pool;
pub mod pre_authorizations;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use previsa_core::*;

pub use agreements::PgAgreementRepository;
pub use catalog::PgCatalogRepository;
pub use jobs::PgJobRepository;
pub use memory::{
    MemoryAgreementRepository, MemoryCatalogRepository, MemoryJobRepository,
    MemoryPreAuthorizationRepository,
};
pub use pool::{connect_pool, PoolConfig, PoolHealth};
pub use pre_authorizations::PgPreAuthorizationRepository;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Durable job table.
    pub jobs: PgJobRepository,
    /// Practice and provider catalog.
    pub catalog: PgCatalogRepository,
    /// Provider/practice agreements.
    pub agreements: PgAgreementRepository,
    /// Generated pre-authorizations.
    pub pre_authorizations: PgPreAuthorizationRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            jobs: PgJobRepository::new(pool.clone()),
            catalog: PgCatalogRepository::new(pool.clone()),
            agreements: PgAgreementRepository::new(pool.clone()),
            pre_authorizations: PgPreAuthorizationRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = connect_pool(url, &PoolConfig::default()).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = connect_pool(url, &config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
