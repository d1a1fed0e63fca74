//! Tag association repository.
//!
//! Tags attach free-form labels to inventory resources. The inventory
//! only needs enough of this surface to keep the deletion closure
//! honest: associations referencing a deleted resource must go with it.

use crate::errors::{CertfleetError, Result};
use sqlx::SqliteConnection;

/// Attach a tag to a resource.
pub async fn tag_resource(
    conn: &mut SqliteConnection,
    tag: &str,
    resource_kind: &str,
    resource: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO tag_associations (tag, resource_kind, resource) VALUES ($1, $2, $3)",
    )
    .bind(tag)
    .bind(resource_kind)
    .bind(resource)
    .execute(conn)
    .await
    .map_err(|e| CertfleetError::database(e, "Failed to tag resource"))?;

    Ok(())
}

/// Remove every tag association referencing exactly one resource. Part
/// of the resource's cascade closure on deletion.
pub async fn remove_resource_tags(
    conn: &mut SqliteConnection,
    resource_kind: &str,
    resource: i64,
) -> Result<u64> {
    let result =
        sqlx::query("DELETE FROM tag_associations WHERE resource_kind = $1 AND resource = $2")
            .bind(resource_kind)
            .bind(resource)
            .execute(conn)
            .await
            .map_err(|e| CertfleetError::database(e, "Failed to remove resource tags"))?;

    Ok(result.rows_affected())
}
