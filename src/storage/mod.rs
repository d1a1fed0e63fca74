//! SQLite-backed persistence: pool, migrations, transactions, and the
//! repository layer.

pub mod migrations;
pub mod pool;
pub mod repositories;
pub mod tx;

pub use pool::{create_pool, get_pool_stats, DbPool, PoolStats};
pub use repositories::{CertificateRepository, PrincipalRepository};
pub use tx::with_immediate_tx;

use crate::errors::{CertfleetError, Result};

/// Verify the database is reachable with a trivial query.
pub async fn check_connection(pool: &DbPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(|e| CertfleetError::database(e, "Database connection check failed"))?;
    Ok(())
}
