//! Database connection pool, migrations and locked units of work.
//!
//! This module provides utilities for:
//! - Creating and managing a PostgreSQL connection pool
//! - Running database migrations automatically
//! - Opening transactions that hold row locks with a bounded wait
//! - Retrying a unit of work when lock contention aborts it

use std::{future::Future, time::Duration};

use sqlx::{Pool, Postgres};

use crate::error::AppError;

/// Type alias for PostgreSQL connection pool.
pub type DbPool = Pool<Postgres>;

/// Type alias for an open database transaction.
pub type DbTx = sqlx::Transaction<'static, Postgres>;

/// Create a new PostgreSQL connection pool.
///
/// # Errors
///
/// Returns an error if:
/// - Database connection string is invalid
/// - Cannot connect to PostgreSQL server
/// - Database authentication fails
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Run database migrations from the `migrations/` directory.
///
/// Migrations are tracked in the `_sqlx_migrations` table, so each migration runs only once.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// How long a locked unit of work waits for row locks, and how many times it
/// is retried when the wait times out or the database aborts it.
#[derive(Debug, Clone, Copy)]
pub struct LockPolicy {
    pub lock_timeout_ms: u64,
    pub max_retries: u32,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5000,
            max_retries: 3,
        }
    }
}

/// Begin a transaction whose lock waits are bounded by `policy.lock_timeout_ms`.
///
/// A lock wait that exceeds the timeout fails with SQLSTATE 55P03, which
/// converts to [`AppError::LockContention`].
pub async fn begin_locked(pool: &DbPool, policy: LockPolicy) -> Result<DbTx, AppError> {
    let mut tx = pool.begin().await?;

    // SET LOCAL does not accept bind parameters
    sqlx::query(&format!(
        "SET LOCAL lock_timeout = '{}ms'",
        policy.lock_timeout_ms
    ))
    .execute(&mut *tx)
    .await?;

    Ok(tx)
}

/// Run `op` until it succeeds, fails with a non-contention error, or the
/// retry budget is spent.
///
/// Each attempt must open and commit its own transaction; an attempt that
/// fails with [`AppError::LockContention`] has already been rolled back by
/// dropping its transaction.
pub async fn with_retry<T, F, Fut>(policy: LockPolicy, mut op: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 0;

    loop {
        match op().await {
            Err(AppError::LockContention) if attempt < policy.max_retries => {
                attempt += 1;
                tracing::warn!(attempt, "lock contention, retrying unit of work");
                tokio::time::sleep(backoff(attempt)).await;
            }
            Err(AppError::LockContention) => {
                tracing::warn!(attempts = attempt + 1, "lock contention persisted, giving up");
                return Err(AppError::ConflictingUpdate);
            }
            other => return other,
        }
    }
}

/// Linear backoff with jitter so competing retries spread out.
fn backoff(attempt: u32) -> Duration {
    let jitter: u64 = rand::random_range(0..25);
    Duration::from_millis(50 * u64::from(attempt) + jitter)
}
