//! Postgres-backed repository implementations.

mod catalog;
mod reviews;
mod util;

pub use util::map_sqlx_error;

use std::sync::Arc;
use std::time::Duration;

use sqlx::{
    Postgres, Transaction,
    postgres::{PgPool, PgPoolOptions},
    query,
};

use crate::application::repos::RepoError;

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
    lock_timeout: Duration,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            lock_timeout: Duration::ZERO,
        }
    }

    /// Bounds how long a transaction waits for a row lock. Expiry surfaces as
    /// a retryable error instead of queueing behind a stuck writer.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Opens a write transaction with the configured lock timeout applied.
    pub async fn begin(&self) -> Result<Transaction<'_, Postgres>, RepoError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let millis = self.lock_timeout.as_millis();
        if millis > 0 {
            // SET does not accept bind parameters
            query(&format!("SET LOCAL lock_timeout = '{millis}ms'"))
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }
        Ok(tx)
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }
}
