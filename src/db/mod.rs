//! Database connection pool, migrations, and health check.
//!
//! One Postgres pool backs both the task tables and the pgmq dispatch
//! channels.

pub mod pgmq;
pub mod tasks;

use std::time::Duration;

use crate::error::Result;
use crate::retry::{RetryPolicy, retry};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

/// Database handle. Owns the connection pool shared across all modules.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(url, 10).await
    }

    /// Connect with an explicit pool size.
    pub async fn connect_with(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Connect and ping, retrying on failure with a constant 3s backoff up to
    /// five times. Startup is the only place connectivity errors are retried.
    pub async fn connect_with_retry(url: &str, max_connections: u32) -> Result<Self> {
        let policy = RetryPolicy::constant(Duration::from_secs(3), 5);
        let db = retry(&policy, |attempt| async move {
            let db = Self::connect_with(url, max_connections).await.inspect_err(|e| {
                error!(attempt, error = %e, "failed to connect to postgres, retrying");
            })?;
            db.health_check().await?;
            Ok(db)
        })
        .await?;
        info!("postgres connection established");
        Ok(db)
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl From<PgPool> for Db {
    fn from(pool: PgPool) -> Self {
        Self { pool }
    }
}
