//! Principal repository: the identity directory collaborator.
//!
//! Resolves external principal UUIDs to internal row ids and registers
//! principals for tests and provisioning. Ownership of inventory
//! resources always references the internal id.

use crate::acl::PrincipalContext;
use crate::domain::PrincipalId;
use crate::errors::{CertfleetError, Operation, Result};
use crate::storage::DbPool;
use sqlx::FromRow;
use tracing::instrument;

/// A principal as stored in the identity directory.
#[derive(Debug, Clone, FromRow)]
pub struct PrincipalData {
    pub id: i64,
    pub uuid: String,
    pub name: String,
}

pub struct PrincipalRepository {
    pool: DbPool,
}

impl PrincipalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Register a new principal and return its acting context.
    #[instrument(skip(self), fields(name = %name), name = "db_create_principal")]
    pub async fn create(&self, name: &str) -> Result<PrincipalContext> {
        let id = PrincipalId::new();

        let result = sqlx::query("INSERT INTO principals (uuid, name) VALUES ($1, $2)")
            .bind(id.as_str())
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| CertfleetError::database(e, "Failed to create principal"))?;

        Ok(PrincipalContext { id, rowid: result.last_insert_rowid() })
    }

    /// Resolve an external principal UUID to an acting context.
    #[instrument(skip(self), fields(principal = %id), name = "db_resolve_principal")]
    pub async fn resolve(&self, id: &PrincipalId) -> Result<PrincipalContext> {
        let row: Option<PrincipalData> =
            sqlx::query_as("SELECT id, uuid, name FROM principals WHERE uuid = $1")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| CertfleetError::database(e, "Failed to resolve principal"))?;

        match row {
            Some(data) => Ok(PrincipalContext {
                id: PrincipalId::from_string(data.uuid),
                rowid: data.id,
            }),
            None => Err(CertfleetError::not_found("principal", id.as_str())),
        }
    }

    /// Grant the full set of certificate capabilities to a principal.
    /// Provisioning convenience for operators and tests.
    pub async fn grant_certificate_capabilities(
        &self,
        ctx: &PrincipalContext,
        operations: &[Operation],
    ) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| CertfleetError::database(e, "Failed to acquire connection"))?;

        for operation in operations {
            crate::acl::grant_capability(
                &mut conn,
                ctx.rowid,
                *operation,
                crate::storage::repositories::certificate::TLS_CERTIFICATE_KIND,
            )
            .await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations;

    async fn test_pool() -> DbPool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect in-memory database");
        migrations::run_migrations(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn test_create_and_resolve() {
        let pool = test_pool().await;
        let repo = PrincipalRepository::new(pool);

        let created = repo.create("scanner").await.expect("create principal");
        let resolved = repo.resolve(&created.id).await.expect("resolve principal");

        assert_eq!(resolved.id, created.id);
        assert_eq!(resolved.rowid, created.rowid);
    }

    #[tokio::test]
    async fn test_resolve_unknown_is_not_found() {
        let pool = test_pool().await;
        let repo = PrincipalRepository::new(pool);

        let err = repo.resolve(&PrincipalId::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
