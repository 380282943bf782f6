//! Helpers for tests that run compiled statements against a real database.
//!
//! [`TestDatabase`] owns a single-connection pool so every statement of a test
//! sees the same in-memory schema. [`rolled_back`] hands an [`Executor`] bound
//! to an open transaction to the test body and discards its writes afterwards.

use std::future::Future;
use std::pin::Pin;

use crate::driver::Driver;
use crate::error::StratumResult;
use crate::executor::Executor;

/// Body of a [`rolled_back`] run, borrowing the transaction's executor.
pub type TransactionBody<'c, T> = Pin<Box<dyn Future<Output = StratumResult<T>> + 'c>>;

/// Run `body` inside a transaction that is rolled back whatever the outcome.
///
/// The body's error wins over a rollback failure.
pub async fn rolled_back<DB, F, T>(pool: &sqlx::Pool<DB>, body: F) -> StratumResult<T>
where
    DB: Driver,
    F: for<'c> FnOnce(Executor<'c, DB>) -> TransactionBody<'c, T>,
{
    let mut tx = pool.begin().await?;
    let outcome = body(Executor::Conn(&mut *tx)).await;
    let rollback = tx.rollback().await;

    match (outcome, rollback) {
        (Err(err), _) => Err(err),
        (Ok(_), Err(err)) => Err(err.into()),
        (Ok(value), Ok(())) => Ok(value),
    }
}

/// A pool reserved for one test.
pub struct TestDatabase<DB: Driver> {
    pool: sqlx::Pool<DB>,
}

impl<DB: Driver> TestDatabase<DB> {
    pub fn pool(&self) -> &sqlx::Pool<DB> {
        &self.pool
    }

    /// Same as [`rolled_back`] over this database's pool.
    pub async fn rolled_back<F, T>(&self, body: F) -> StratumResult<T>
    where
        F: for<'c> FnOnce(Executor<'c, DB>) -> TransactionBody<'c, T>,
    {
        rolled_back(&self.pool, body).await
    }
}

#[cfg(feature = "sqlite")]
impl TestDatabase<sqlx::Sqlite> {
    /// Empty in-memory SQLite database.
    pub async fn in_memory() -> StratumResult<Self> {
        // One connection, otherwise each connection opens its own empty database.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    /// In-memory SQLite database with the tables of `ddl` created.
    ///
    /// Statements are separated by `;` and run in order.
    pub async fn with_tables(ddl: &str) -> StratumResult<Self> {
        let db = Self::in_memory().await?;
        let statements = ddl.split(';').map(str::trim).filter(|sql| !sql.is_empty());
        for sql in statements {
            sqlx::query(sql).execute(db.pool()).await?;
        }
        tracing::debug!(tables = ddl.matches("CREATE TABLE").count(), "test database ready");
        Ok(db)
    }
}
