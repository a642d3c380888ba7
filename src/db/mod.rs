//! PostgreSQL pool for the `postgres` store backend
//!
//! [`Database::connect`] is the only way in: it opens the pool, applies
//! `migrations/`, and pings once so a bad `DATABASE_URL` fails at startup
//! rather than on the first loan request.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::{Duration, Instant};

use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("Failed to run migrations: {0}")]
    Migrate(#[source] sqlx::migrate::MigrateError),

    #[error("Database unreachable: {0}")]
    Unreachable(#[source] sqlx::Error),
}

/// Apply the schema in `migrations/`
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(DbError::Migrate)
}

/// Pool handle shared by [`crate::store::PgStore`] and the health endpoint
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &Config) -> Result<Self, DbError> {
        tracing::info!(
            url = %config.database_url_masked(),
            max_connections = config.db_max_connections,
            "Connecting to database"
        );
        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(600))
            .connect(&config.database_url)
            .await
            .map_err(DbError::Connect)?;

        run_migrations(&pool).await?;
        let database = Self { pool };
        let latency = database.ping().await?;
        tracing::info!(latency_ms = latency.as_millis() as u64, "Database ready");
        Ok(database)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round trip of a trivial query
    pub async fn ping(&self) -> Result<Duration, DbError> {
        let started = Instant::now();
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(DbError::Unreachable)?;
        Ok(started.elapsed())
    }
}
