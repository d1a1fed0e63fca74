//! TLS certificate repository.
//!
//! Declares the certificate column map consumed by the query engine,
//! the read API (list/count/get), and the connection-level write
//! helpers the certificate service composes inside its immediate
//! transactions.

use crate::domain::{
    CertificateFormat, CertificateId, PrincipalId, TlsCertificateData, Trust,
};
use crate::errors::{CertfleetError, Operation, Result};
use crate::query::{self, Column, ColumnKind, ColumnMap, Comparator, FilterSpec, Scope};
use crate::storage::DbPool;
use once_cell::sync::Lazy;
use sqlx::{FromRow, Row, SqliteConnection};
use std::str::FromStr;
use tracing::instrument;

/// Resource kind name used in ACL and tag rows.
pub const TLS_CERTIFICATE_KIND: &str = "tls_certificate";

/// Storage table of the certificate inventory.
pub const TLS_CERTIFICATE_TABLE: &str = "tls_certificates";

/// Derived validity flag: inside the activation/expiration window at
/// the query's captured "now", with -1 meaning an unbounded side. Used
/// identically for row selection and counting, so filters on `valid`
/// stay consistent between the two.
const VALID_EXPR: &str = "(CASE WHEN (tls_certificates.expiration_time >= {now} \
     OR tls_certificates.expiration_time = -1) \
     AND (tls_certificates.activation_time <= {now} \
     OR tls_certificates.activation_time = -1) THEN 1 ELSE 0 END)";

/// Most recent observation timestamp across the certificate's sources.
const LAST_COLLECTED_EXPR: &str = "(SELECT max(timestamp) FROM tls_certificate_sources \
     WHERE tls_certificate_sources.tls_certificate = tls_certificates.id)";

static CERTIFICATE_COLUMNS: &[Column] = &[
    Column::text("uuid", "tls_certificates.uuid"),
    Column::text(
        "owner",
        "(SELECT uuid FROM principals WHERE principals.id = tls_certificates.owner)",
    ),
    Column::text("name", "tls_certificates.name"),
    Column::text("comment", "tls_certificates.comment"),
    Column::integer("created", "tls_certificates.creation_time"),
    Column::integer("modified", "tls_certificates.modification_time"),
    Column::text("certificate", "tls_certificates.certificate"),
    Column::text("subject_dn", "tls_certificates.subject_dn"),
    Column::text("issuer_dn", "tls_certificates.issuer_dn"),
    Column::integer("trust", "tls_certificates.trust"),
    Column::text("md5_fingerprint", "tls_certificates.md5_fingerprint"),
    Column::text("sha256_fingerprint", "tls_certificates.sha256_fingerprint"),
    Column::text("serial", "tls_certificates.serial"),
    Column::text("certificate_format", "tls_certificates.certificate_format"),
    Column::integer("activates", "tls_certificates.activation_time"),
    Column::integer("expires", "tls_certificates.expiration_time"),
    Column::computed("valid", VALID_EXPR, VALID_EXPR, ColumnKind::Integer),
    Column::computed(
        "last_collected",
        LAST_COLLECTED_EXPR,
        LAST_COLLECTED_EXPR,
        ColumnKind::Integer,
    ),
];

/// Certificate column map, checked once at first use for completeness
/// against the persisted fields of the entity.
pub static CERTIFICATE_COLUMN_MAP: Lazy<ColumnMap> = Lazy::new(|| {
    let map = ColumnMap::new(TLS_CERTIFICATE_KIND, TLS_CERTIFICATE_TABLE, CERTIFICATE_COLUMNS);
    map.ensure_covers(&[
        "uuid",
        "owner",
        "name",
        "comment",
        "created",
        "modified",
        "certificate",
        "subject_dn",
        "issuer_dn",
        "trust",
        "md5_fingerprint",
        "sha256_fingerprint",
        "serial",
        "certificate_format",
        "activates",
        "expires",
    ])
    .expect("certificate column map must cover all persisted fields");
    map
});

// ============================================================================
// Database Row Type
// ============================================================================

#[derive(Debug, Clone, FromRow)]
struct CertificateRow {
    uuid: String,
    owner: String,
    name: String,
    comment: String,
    created: i64,
    modified: i64,
    certificate: String,
    subject_dn: String,
    issuer_dn: String,
    trust: Option<i64>,
    md5_fingerprint: String,
    sha256_fingerprint: String,
    serial: String,
    certificate_format: String,
    activates: i64,
    expires: i64,
    last_collected: Option<i64>,
}

impl From<CertificateRow> for TlsCertificateData {
    fn from(row: CertificateRow) -> Self {
        TlsCertificateData {
            id: CertificateId::from_string(row.uuid),
            owner: PrincipalId::from_string(row.owner),
            name: row.name,
            comment: row.comment,
            creation_time: row.created,
            modification_time: row.modified,
            certificate: row.certificate,
            subject_dn: row.subject_dn,
            issuer_dn: row.issuer_dn,
            trust: Trust::from_column(row.trust),
            activation_time: row.activates,
            expiration_time: row.expires,
            md5_fingerprint: row.md5_fingerprint,
            sha256_fingerprint: row.sha256_fingerprint,
            serial: row.serial,
            certificate_format: CertificateFormat::from_str(&row.certificate_format)
                .unwrap_or(CertificateFormat::Unknown),
            last_collected: row.last_collected,
        }
    }
}

// ============================================================================
// Read API
// ============================================================================

pub struct CertificateRepository {
    pool: DbPool,
}

impl CertificateRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// List certificates matching the filter inside the visibility
    /// scope, in deterministic order with pagination applied.
    #[instrument(skip(self, scope, spec), name = "db_list_tls_certificates")]
    pub async fn list(
        &self,
        scope: &dyn Scope,
        spec: &FilterSpec,
        now: i64,
    ) -> Result<Vec<TlsCertificateData>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| CertfleetError::database(e, "Failed to acquire connection"))?;

        let rows =
            query::select_rows(&mut conn, &CERTIFICATE_COLUMN_MAP, scope, spec, now).await?;

        rows.iter()
            .map(|row| {
                CertificateRow::from_row(row)
                    .map(TlsCertificateData::from)
                    .map_err(|e| CertfleetError::database(e, "Failed to decode certificate row"))
            })
            .collect()
    }

    /// Count certificates matching the filter inside the visibility
    /// scope, ignoring pagination.
    #[instrument(skip(self, scope, spec), name = "db_count_tls_certificates")]
    pub async fn count(&self, scope: &dyn Scope, spec: &FilterSpec, now: i64) -> Result<i64> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| CertfleetError::database(e, "Failed to acquire connection"))?;

        query::count(&mut conn, &CERTIFICATE_COLUMN_MAP, scope, spec, now).await
    }

    /// Fetch one certificate by UUID inside the visibility scope.
    #[instrument(skip(self, scope), fields(id = %id), name = "db_get_tls_certificate")]
    pub async fn get(
        &self,
        scope: &dyn Scope,
        id: &CertificateId,
        now: i64,
    ) -> Result<Option<TlsCertificateData>> {
        let spec = FilterSpec::new()
            .with_text("uuid", Comparator::Eq, id.as_str())
            .paginate(0, 1);

        Ok(self.list(scope, &spec, now).await?.into_iter().next())
    }
}

// ============================================================================
// Connection-level write helpers (composed inside immediate transactions)
// ============================================================================

/// Internal handle of a certificate resolved for a specific operation.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedCertificate {
    pub rowid: i64,
    pub owner: i64,
}

/// Resolve a certificate UUID for `operation` by the acting principal:
/// the row must exist and be either owned by the principal or covered
/// by a matching instance-level grant. `None` means "not found" to the
/// caller regardless of whether the row exists for someone else.
pub async fn resolve_with_permission(
    conn: &mut SqliteConnection,
    principal: i64,
    id: &CertificateId,
    operation: Operation,
) -> Result<Option<ResolvedCertificate>> {
    let row = sqlx::query(
        "SELECT id, owner FROM tls_certificates
          WHERE uuid = $1
            AND (owner = $2
                 OR EXISTS (SELECT 1 FROM permissions
                             WHERE permissions.resource_kind = $3
                               AND permissions.resource = tls_certificates.id
                               AND permissions.principal = $2
                               AND permissions.operation = $4))",
    )
    .bind(id.as_str())
    .bind(principal)
    .bind(TLS_CERTIFICATE_KIND)
    .bind(operation.as_str())
    .fetch_optional(conn)
    .await
    .map_err(|e| CertfleetError::database(e, "Failed to resolve certificate"))?;

    Ok(row.map(|r| ResolvedCertificate { rowid: r.get("id"), owner: r.get("owner") }))
}

/// Fields of a new certificate row; decode results plus user input.
#[derive(Debug, Clone)]
pub struct NewCertificate<'a> {
    pub owner: i64,
    pub name: &'a str,
    pub comment: &'a str,
    pub certificate_b64: &'a str,
    pub subject_dn: &'a str,
    pub issuer_dn: &'a str,
    pub trust: Trust,
    pub activation_time: i64,
    pub expiration_time: i64,
    pub md5_fingerprint: &'a str,
    pub sha256_fingerprint: &'a str,
    pub serial: &'a str,
    pub certificate_format: CertificateFormat,
    pub created: i64,
}

/// Insert a certificate row with creation_time = modification_time.
pub async fn insert(
    conn: &mut SqliteConnection,
    id: &CertificateId,
    certificate: &NewCertificate<'_>,
) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO tls_certificates
           (uuid, owner, name, comment, creation_time, modification_time,
            certificate, subject_dn, issuer_dn, trust,
            activation_time, expiration_time,
            md5_fingerprint, sha256_fingerprint, serial, certificate_format)
         VALUES ($1, $2, $3, $4, $5, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
    )
    .bind(id.as_str())
    .bind(certificate.owner)
    .bind(certificate.name)
    .bind(certificate.comment)
    .bind(certificate.created)
    .bind(certificate.certificate_b64)
    .bind(certificate.subject_dn)
    .bind(certificate.issuer_dn)
    .bind(certificate.trust.to_column())
    .bind(certificate.activation_time)
    .bind(certificate.expiration_time)
    .bind(certificate.md5_fingerprint)
    .bind(certificate.sha256_fingerprint)
    .bind(certificate.serial)
    .bind(certificate.certificate_format.as_str())
    .execute(conn)
    .await
    .map_err(|e| CertfleetError::database(e, "Failed to insert certificate"))?;

    Ok(result.last_insert_rowid())
}

/// Whether the owner already has a certificate with this name.
/// Name uniqueness is enforced per owner on copy.
pub async fn name_exists(
    conn: &mut SqliteConnection,
    owner: i64,
    name: &str,
) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM tls_certificates WHERE owner = $1 AND name = $2 LIMIT 1",
    )
    .bind(owner)
    .bind(name)
    .fetch_optional(conn)
    .await
    .map_err(|e| CertfleetError::database(e, "Failed to check certificate name"))?;

    Ok(found.is_some())
}

/// Stored certificate fields needed to duplicate a row.
#[derive(Debug, Clone, FromRow)]
pub struct StoredCertificate {
    pub name: String,
    pub comment: String,
    pub certificate: String,
    pub subject_dn: String,
    pub issuer_dn: String,
    pub trust: Option<i64>,
    pub activation_time: i64,
    pub expiration_time: i64,
    pub md5_fingerprint: String,
    pub sha256_fingerprint: String,
    pub serial: String,
    pub certificate_format: String,
}

/// Fetch the copyable fields of a certificate row.
pub async fn fetch_stored(
    conn: &mut SqliteConnection,
    rowid: i64,
) -> Result<StoredCertificate> {
    sqlx::query_as(
        "SELECT name, comment, certificate, subject_dn, issuer_dn, trust,
                activation_time, expiration_time,
                md5_fingerprint, sha256_fingerprint, serial, certificate_format
           FROM tls_certificates WHERE id = $1",
    )
    .bind(rowid)
    .fetch_one(conn)
    .await
    .map_err(|e| CertfleetError::database(e, "Failed to fetch certificate for copy"))
}

/// Update the comment, bumping modification_time.
pub async fn update_comment(
    conn: &mut SqliteConnection,
    rowid: i64,
    comment: &str,
    now: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE tls_certificates SET comment = $1, modification_time = $2 WHERE id = $3",
    )
    .bind(comment)
    .bind(now)
    .bind(rowid)
    .execute(conn)
    .await
    .map_err(|e| CertfleetError::database(e, "Failed to update certificate comment"))?;

    Ok(())
}

/// Update the name, bumping modification_time.
pub async fn update_name(
    conn: &mut SqliteConnection,
    rowid: i64,
    name: &str,
    now: i64,
) -> Result<()> {
    sqlx::query("UPDATE tls_certificates SET name = $1, modification_time = $2 WHERE id = $3")
        .bind(name)
        .bind(now)
        .bind(rowid)
        .execute(conn)
        .await
        .map_err(|e| CertfleetError::database(e, "Failed to update certificate name"))?;

    Ok(())
}

/// Update the trust annotation, bumping modification_time.
pub async fn update_trust(
    conn: &mut SqliteConnection,
    rowid: i64,
    trust: Trust,
    now: i64,
) -> Result<()> {
    sqlx::query("UPDATE tls_certificates SET trust = $1, modification_time = $2 WHERE id = $3")
        .bind(trust.to_column())
        .bind(now)
        .bind(rowid)
        .execute(conn)
        .await
        .map_err(|e| CertfleetError::database(e, "Failed to update certificate trust"))?;

    Ok(())
}

/// Delete a certificate and exactly its closure: instance-level
/// permission grants, tag associations, and source observations
/// referencing this row, then the row itself. Rows belonging to other
/// certificates are never touched.
pub async fn delete_closure(conn: &mut SqliteConnection, rowid: i64) -> Result<()> {
    crate::acl::remove_resource_permissions(conn, TLS_CERTIFICATE_KIND, rowid).await?;
    super::tags::remove_resource_tags(conn, TLS_CERTIFICATE_KIND, rowid).await?;

    sqlx::query("DELETE FROM tls_certificate_sources WHERE tls_certificate = $1")
        .bind(rowid)
        .execute(&mut *conn)
        .await
        .map_err(|e| CertfleetError::database(e, "Failed to delete certificate sources"))?;

    sqlx::query("DELETE FROM tls_certificates WHERE id = $1")
        .bind(rowid)
        .execute(conn)
        .await
        .map_err(|e| CertfleetError::database(e, "Failed to delete certificate"))?;

    Ok(())
}

/// Re-point ownership of every certificate from one principal to
/// another; used when a principal is deleted and its resources are
/// inherited.
pub async fn reassign_owner(
    conn: &mut SqliteConnection,
    from: i64,
    to: i64,
) -> Result<u64> {
    let result = sqlx::query("UPDATE tls_certificates SET owner = $1 WHERE owner = $2")
        .bind(to)
        .bind(from)
        .execute(conn)
        .await
        .map_err(|e| CertfleetError::database(e, "Failed to reassign certificates"))?;

    Ok(result.rows_affected())
}

/// Row ids of all certificates owned by a principal.
pub async fn owned_rowids(conn: &mut SqliteConnection, owner: i64) -> Result<Vec<i64>> {
    sqlx::query_scalar("SELECT id FROM tls_certificates WHERE owner = $1 ORDER BY id")
        .bind(owner)
        .fetch_all(conn)
        .await
        .map_err(|e| CertfleetError::database(e, "Failed to list owned certificates"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_map_is_complete() {
        // Forces the Lazy init, which panics on an incomplete map.
        assert_eq!(CERTIFICATE_COLUMN_MAP.resource_kind(), TLS_CERTIFICATE_KIND);
        assert_eq!(CERTIFICATE_COLUMN_MAP.table(), TLS_CERTIFICATE_TABLE);
    }

    #[test]
    fn column_map_rejects_unknown_keys() {
        assert!(CERTIFICATE_COLUMN_MAP.get("subject_dn").is_ok());
        assert!(CERTIFICATE_COLUMN_MAP.get("not_a_column").is_err());
    }

    #[test]
    fn valid_expression_uses_now_token() {
        // The computed validity column must be time-parameterized so a
        // list/count pair evaluated at one captured instant agrees.
        let column = CERTIFICATE_COLUMN_MAP.get("valid").unwrap();
        assert!(column.select.contains("{now}"));
    }
}
