//! # Immediate Write Transactions
//!
//! Every mutating inventory operation runs inside one SQLite
//! `BEGIN IMMEDIATE` transaction: the write lock is taken up front, the
//! whole operation either commits or rolls back, and lock contention
//! simply blocks the caller (bounded by the pool's busy timeout) rather
//! than retrying optimistically.

use crate::errors::{CertfleetError, Result};
use crate::storage::DbPool;
use futures::future::BoxFuture;
use sqlx::SqliteConnection;

/// Run `op` inside an immediate write transaction on one pooled
/// connection. On `Err` the transaction is rolled back and the error
/// propagated; a rollback failure is logged but does not mask the
/// original error.
pub async fn with_immediate_tx<T, F>(pool: &DbPool, op: F) -> Result<T>
where
    F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T>>,
{
    let mut conn = pool.acquire().await.map_err(|e| {
        CertfleetError::database(e, "Failed to acquire connection for write transaction")
    })?;

    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut *conn)
        .await
        .map_err(|e| CertfleetError::database(e, "Failed to begin immediate transaction"))?;

    match op(&mut conn).await {
        Ok(value) => {
            sqlx::query("COMMIT")
                .execute(&mut *conn)
                .await
                .map_err(|e| CertfleetError::database(e, "Failed to commit transaction"))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                tracing::error!(
                    error = %rollback_err,
                    "Rollback failed after aborted write transaction"
                );
            }
            Err(err)
        }
    }
}
