//! # Access Control Gate
//!
//! Coarse per-kind capability checks, instance-level permission grants,
//! and the visibility scope every resource query is intersected with.
//!
//! Policy: the coarse capability check is the only place that answers
//! `PermissionDenied`. A resource the acting principal cannot see is
//! reported `NotFound` everywhere, so existence is never leaked through
//! instance-level ACL failures.

use crate::domain::{PermissionId, PrincipalId};
use crate::errors::{CertfleetError, Operation, Result};
use crate::query::Scope;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

/// Acting principal, resolved from the identity directory. Threaded
/// explicitly through every service and query call; there is no ambient
/// "current user".
#[derive(Debug, Clone)]
pub struct PrincipalContext {
    pub id: PrincipalId,
    pub rowid: i64,
}

/// Check the coarse capability: may the principal perform `operation`
/// on resources of `resource_kind` at all?
pub async fn may(
    conn: &mut SqliteConnection,
    principal: i64,
    operation: Operation,
    resource_kind: &str,
) -> Result<bool> {
    let granted: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM capabilities
          WHERE principal = $1 AND operation = $2 AND resource_kind = $3",
    )
    .bind(principal)
    .bind(operation.as_str())
    .bind(resource_kind)
    .fetch_optional(conn)
    .await
    .map_err(|e| CertfleetError::database(e, "Failed to check capability"))?;

    Ok(granted.is_some())
}

/// Coarse capability check that fails closed before any storage is
/// touched by the calling operation.
pub async fn ensure_may(
    conn: &mut SqliteConnection,
    principal: &PrincipalContext,
    operation: Operation,
    resource_kind: &str,
) -> Result<()> {
    if may(conn, principal.rowid, operation, resource_kind).await? {
        Ok(())
    } else {
        Err(CertfleetError::permission_denied(operation.as_str(), resource_kind))
    }
}

/// Grant a coarse capability to a principal.
pub async fn grant_capability(
    conn: &mut SqliteConnection,
    principal: i64,
    operation: Operation,
    resource_kind: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO capabilities (principal, operation, resource_kind)
         VALUES ($1, $2, $3)",
    )
    .bind(principal)
    .bind(operation.as_str())
    .bind(resource_kind)
    .execute(conn)
    .await
    .map_err(|e| CertfleetError::database(e, "Failed to grant capability"))?;

    Ok(())
}

/// Revoke a coarse capability from a principal.
pub async fn revoke_capability(
    conn: &mut SqliteConnection,
    principal: i64,
    operation: Operation,
    resource_kind: &str,
) -> Result<()> {
    sqlx::query(
        "DELETE FROM capabilities
          WHERE principal = $1 AND operation = $2 AND resource_kind = $3",
    )
    .bind(principal)
    .bind(operation.as_str())
    .bind(resource_kind)
    .execute(conn)
    .await
    .map_err(|e| CertfleetError::database(e, "Failed to revoke capability"))?;

    Ok(())
}

/// Grant an instance-level permission on one resource, layered on top
/// of the coarse capability check.
pub async fn grant_on_resource(
    conn: &mut SqliteConnection,
    principal: i64,
    operation: Operation,
    resource_kind: &str,
    resource: i64,
) -> Result<PermissionId> {
    let id = PermissionId::new();

    sqlx::query(
        "INSERT INTO permissions (uuid, principal, operation, resource_kind, resource)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(id.as_str())
    .bind(principal)
    .bind(operation.as_str())
    .bind(resource_kind)
    .bind(resource)
    .execute(conn)
    .await
    .map_err(|e| CertfleetError::database(e, "Failed to grant instance permission"))?;

    Ok(id)
}

/// Remove every instance-level grant referencing exactly one resource.
/// Part of the resource's cascade closure on deletion.
pub async fn remove_resource_permissions(
    conn: &mut SqliteConnection,
    resource_kind: &str,
    resource: i64,
) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM permissions WHERE resource_kind = $1 AND resource = $2",
    )
    .bind(resource_kind)
    .bind(resource)
    .execute(conn)
    .await
    .map_err(|e| CertfleetError::database(e, "Failed to remove resource permissions"))?;

    Ok(result.rows_affected())
}

/// Visibility scope for one principal over one resource kind: rows the
/// principal owns, plus rows it holds an instance-level read grant on.
/// Participates in the same statement as filtering and counting, so
/// counts reflect only visible rows.
#[derive(Debug, Clone)]
pub struct VisibilityScope {
    principal: i64,
    resource_kind: &'static str,
}

impl VisibilityScope {
    pub fn new(principal: i64, resource_kind: &'static str) -> Self {
        Self { principal, resource_kind }
    }
}

impl Scope for VisibilityScope {
    fn push_predicate(&self, builder: &mut QueryBuilder<'_, Sqlite>, table: &str) {
        builder.push(format!("({}.owner = ", table));
        builder.push_bind(self.principal);
        builder.push(
            " OR EXISTS (SELECT 1 FROM permissions WHERE permissions.resource_kind = ",
        );
        builder.push_bind(self.resource_kind);
        builder.push(format!(
            " AND permissions.resource = {}.id AND permissions.principal = ",
            table
        ));
        builder.push_bind(self.principal);
        builder.push(" AND permissions.operation = 'read'))");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{migrations, DbPool};

    async fn test_pool() -> DbPool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect in-memory database");
        migrations::run_migrations(&pool).await.expect("migrations");
        pool
    }

    async fn test_principal(conn: &mut SqliteConnection, name: &str) -> (PrincipalId, i64) {
        let id = PrincipalId::new();
        let result = sqlx::query("INSERT INTO principals (uuid, name) VALUES ($1, $2)")
            .bind(id.as_str())
            .bind(name)
            .execute(conn)
            .await
            .expect("insert principal");
        (id, result.last_insert_rowid())
    }

    #[tokio::test]
    async fn capability_check_fails_closed() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let (id, rowid) = test_principal(&mut conn, "alice").await;
        let ctx = PrincipalContext { id, rowid };

        assert!(!may(&mut conn, rowid, Operation::Delete, "tls_certificate").await.unwrap());
        let err = ensure_may(&mut conn, &ctx, Operation::Delete, "tls_certificate")
            .await
            .unwrap_err();
        assert!(matches!(err, CertfleetError::PermissionDenied { .. }));

        grant_capability(&mut conn, rowid, Operation::Delete, "tls_certificate")
            .await
            .unwrap();
        assert!(may(&mut conn, rowid, Operation::Delete, "tls_certificate").await.unwrap());
        ensure_may(&mut conn, &ctx, Operation::Delete, "tls_certificate").await.unwrap();
    }

    #[tokio::test]
    async fn capability_grant_is_idempotent_and_revocable() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let (_, rowid) = test_principal(&mut conn, "bob").await;

        grant_capability(&mut conn, rowid, Operation::Read, "tls_certificate").await.unwrap();
        grant_capability(&mut conn, rowid, Operation::Read, "tls_certificate").await.unwrap();
        assert!(may(&mut conn, rowid, Operation::Read, "tls_certificate").await.unwrap());

        revoke_capability(&mut conn, rowid, Operation::Read, "tls_certificate").await.unwrap();
        assert!(!may(&mut conn, rowid, Operation::Read, "tls_certificate").await.unwrap());
    }

    #[tokio::test]
    async fn capability_is_scoped_per_operation_and_kind() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let (_, rowid) = test_principal(&mut conn, "carol").await;

        grant_capability(&mut conn, rowid, Operation::Read, "tls_certificate").await.unwrap();

        assert!(!may(&mut conn, rowid, Operation::Modify, "tls_certificate").await.unwrap());
        assert!(!may(&mut conn, rowid, Operation::Read, "other_kind").await.unwrap());
    }

    #[tokio::test]
    async fn instance_grants_cascade_per_resource() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let (_, rowid) = test_principal(&mut conn, "dave").await;

        grant_on_resource(&mut conn, rowid, Operation::Read, "tls_certificate", 7)
            .await
            .unwrap();
        grant_on_resource(&mut conn, rowid, Operation::Modify, "tls_certificate", 7)
            .await
            .unwrap();
        grant_on_resource(&mut conn, rowid, Operation::Read, "tls_certificate", 8)
            .await
            .unwrap();

        let removed =
            remove_resource_permissions(&mut conn, "tls_certificate", 7).await.unwrap();
        assert_eq!(removed, 2);

        // Grants on other resources are untouched.
        let remaining: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM permissions WHERE resource_kind = 'tls_certificate'",
        )
        .fetch_one(&mut *conn)
        .await
        .unwrap();
        assert_eq!(remaining, 1);
    }
}
