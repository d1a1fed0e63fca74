//! # Certificate Service
//!
//! Orchestrates the certificate inventory: decode, access control,
//! storage. Every mutating operation runs the coarse capability check
//! first and then executes as one immediate write transaction, so a
//! failure at any step leaves no partial state.

use crate::acl::{self, PrincipalContext, VisibilityScope};
use crate::decoder::{self, DecodeError};
use crate::domain::{
    CertificateFormat, CertificateId, CertificateSourceData, SourceId, TlsCertificateData, Trust,
};
use crate::errors::{CertfleetError, Operation, Result};
use crate::query::FilterSpec;
use crate::storage::repositories::certificate::{
    self, CertificateRepository, NewCertificate, TLS_CERTIFICATE_KIND,
};
use crate::storage::repositories::source::{self, NewLocation, NewOrigin, NewSource};
use crate::storage::{with_immediate_tx, DbPool};
use chrono::Utc;
use std::str::FromStr;
use tracing::{info, instrument};
use validator::Validate;

/// Sentinel accepted by [`ModifyTlsCertificateRequest::trust`]: leave
/// the stored trust annotation unchanged.
pub const TRUST_KEEP: i64 = -1;

#[derive(Debug, Clone, Validate)]
pub struct CreateTlsCertificateRequest {
    /// Display name; defaults to the SHA-256 fingerprint when absent
    #[validate(length(max = 255, message = "Name must not exceed 255 characters"))]
    pub name: Option<String>,

    #[validate(length(max = 4096, message = "Comment must not exceed 4096 characters"))]
    pub comment: Option<String>,

    /// Base64-encoded certificate blob (PEM or DER payload)
    #[validate(length(min = 1, message = "Certificate blob is required"))]
    pub certificate_b64: String,

    /// Initial trust annotation
    pub trust: Trust,
}

#[derive(Debug, Clone, Validate)]
pub struct CopyTlsCertificateRequest {
    /// Name of the copy; defaults to the source's name
    #[validate(length(max = 255, message = "Name must not exceed 255 characters"))]
    pub name: Option<String>,

    /// Comment of the copy; defaults to the source's comment
    #[validate(length(max = 4096, message = "Comment must not exceed 4096 characters"))]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Validate)]
pub struct ModifyTlsCertificateRequest {
    #[validate(length(max = 255, message = "Name must not exceed 255 characters"))]
    pub name: Option<String>,

    #[validate(length(max = 4096, message = "Comment must not exceed 4096 characters"))]
    pub comment: Option<String>,

    /// Trust update: [`TRUST_KEEP`] leaves the annotation unchanged,
    /// 0 sets untrusted, 1 sets trusted.
    #[validate(range(min = -1, max = 1, message = "Trust must be -1, 0, or 1"))]
    pub trust: i64,
}

impl Default for ModifyTlsCertificateRequest {
    fn default() -> Self {
        Self { name: None, comment: None, trust: TRUST_KEEP }
    }
}

/// One observation to record against a certificate.
#[derive(Debug, Clone, Validate)]
pub struct RecordSourceRequest {
    /// Observation time (epoch seconds)
    pub timestamp: i64,

    /// TLS protocol versions seen, comma separated
    #[validate(length(min = 1, message = "TLS versions string is required"))]
    pub tls_versions: String,

    pub host_ip: Option<String>,
    pub port: Option<u16>,

    pub origin_type: Option<String>,
    pub origin_id: Option<String>,
    pub origin_data: Option<String>,
}

/// One page of an enumeration, with the total count of visible matches
/// evaluated at the same instant as the rows.
#[derive(Debug, Clone)]
pub struct CertificatePage {
    pub certificates: Vec<TlsCertificateData>,
    pub total: i64,
}

pub struct CertificateService {
    pool: DbPool,
    repository: CertificateRepository,
}

impl CertificateService {
    pub fn new(pool: DbPool) -> Self {
        let repository = CertificateRepository::new(pool.clone());
        Self { pool, repository }
    }

    fn scope(&self, ctx: &PrincipalContext) -> VisibilityScope {
        VisibilityScope::new(ctx.rowid, TLS_CERTIFICATE_KIND)
    }

    fn map_decode_error(error: DecodeError) -> CertfleetError {
        match error {
            DecodeError::NotEncoded => {
                CertfleetError::validation_field("Certificate is not valid Base64", "certificate")
            }
            DecodeError::InvalidCertificate => {
                CertfleetError::validation_field("Invalid certificate content", "certificate")
            }
        }
    }

    /// Ingest a certificate blob. Decoding happens before any write;
    /// the name defaults to the SHA-256 fingerprint. Two identical
    /// blobs may coexist as distinct records: identity is the generated
    /// id, fingerprints are metadata.
    #[instrument(skip(self, ctx, request), fields(principal = %ctx.id), name = "create_tls_certificate")]
    pub async fn create(
        &self,
        ctx: &PrincipalContext,
        request: CreateTlsCertificateRequest,
    ) -> Result<TlsCertificateData> {
        request.validate()?;
        let info =
            decoder::decode_b64(&request.certificate_b64).map_err(Self::map_decode_error)?;

        let id = CertificateId::new();
        let sha256 = info.sha256_fingerprint.clone();
        let now = Utc::now().timestamp();
        let name = request.name.clone().unwrap_or_else(|| info.sha256_fingerprint.clone());
        let comment = request.comment.clone().unwrap_or_default();

        let tx_ctx = ctx.clone();
        let tx_id = id.clone();
        with_immediate_tx(&self.pool, move |conn| {
            Box::pin(async move {
                acl::ensure_may(conn, &tx_ctx, Operation::Create, TLS_CERTIFICATE_KIND).await?;

                certificate::insert(
                    conn,
                    &tx_id,
                    &NewCertificate {
                        owner: tx_ctx.rowid,
                        name: &name,
                        comment: &comment,
                        certificate_b64: &request.certificate_b64,
                        subject_dn: &info.subject_dn,
                        issuer_dn: &info.issuer_dn,
                        trust: request.trust,
                        activation_time: info.activation_time,
                        expiration_time: info.expiration_time,
                        md5_fingerprint: &info.md5_fingerprint,
                        sha256_fingerprint: &info.sha256_fingerprint,
                        serial: &info.serial,
                        certificate_format: info.format,
                        created: now,
                    },
                )
                .await?;
                Ok(())
            })
        })
        .await?;

        info!(id = %id, sha256 = %sha256, "Created TLS certificate");
        self.fetch_visible(ctx, &id).await
    }

    /// Duplicate a visible certificate under the acting principal.
    /// Name and comment default to the source's; a name collision among
    /// the principal's certificates is a conflict.
    #[instrument(skip(self, ctx, request), fields(principal = %ctx.id, source = %source_id), name = "copy_tls_certificate")]
    pub async fn copy(
        &self,
        ctx: &PrincipalContext,
        source_id: &CertificateId,
        request: CopyTlsCertificateRequest,
    ) -> Result<TlsCertificateData> {
        request.validate()?;

        let id = CertificateId::new();
        let now = Utc::now().timestamp();

        let tx_ctx = ctx.clone();
        let tx_id = id.clone();
        let tx_source = source_id.clone();
        with_immediate_tx(&self.pool, move |conn| {
            Box::pin(async move {
                acl::ensure_may(conn, &tx_ctx, Operation::Create, TLS_CERTIFICATE_KIND).await?;

                let resolved = certificate::resolve_with_permission(
                    conn,
                    tx_ctx.rowid,
                    &tx_source,
                    Operation::Read,
                )
                .await?
                .ok_or_else(|| {
                    CertfleetError::not_found(TLS_CERTIFICATE_KIND, tx_source.as_str())
                })?;

                let stored = certificate::fetch_stored(conn, resolved.rowid).await?;
                let name = request.name.as_deref().unwrap_or(&stored.name);
                let comment = request.comment.as_deref().unwrap_or(&stored.comment);

                if certificate::name_exists(conn, tx_ctx.rowid, name).await? {
                    return Err(CertfleetError::conflict(
                        format!("A TLS certificate named '{}' already exists", name),
                        TLS_CERTIFICATE_KIND,
                    ));
                }

                let format = CertificateFormat::from_str(&stored.certificate_format)
                    .unwrap_or(CertificateFormat::Unknown);
                certificate::insert(
                    conn,
                    &tx_id,
                    &NewCertificate {
                        owner: tx_ctx.rowid,
                        name,
                        comment,
                        certificate_b64: &stored.certificate,
                        subject_dn: &stored.subject_dn,
                        issuer_dn: &stored.issuer_dn,
                        trust: Trust::from_column(stored.trust),
                        activation_time: stored.activation_time,
                        expiration_time: stored.expiration_time,
                        md5_fingerprint: &stored.md5_fingerprint,
                        sha256_fingerprint: &stored.sha256_fingerprint,
                        serial: &stored.serial,
                        certificate_format: format,
                        created: now,
                    },
                )
                .await?;
                Ok(())
            })
        })
        .await?;

        info!(id = %id, source = %source_id, "Copied TLS certificate");
        self.fetch_visible(ctx, &id).await
    }

    /// Partial update of the mutable fields. Only supplied fields
    /// change; each change bumps modification_time. The immutable
    /// decode-derived fields (DNs, fingerprints, validity window) are
    /// never touched.
    #[instrument(skip(self, ctx, request), fields(principal = %ctx.id, id = %id), name = "modify_tls_certificate")]
    pub async fn modify(
        &self,
        ctx: &PrincipalContext,
        id: &CertificateId,
        request: ModifyTlsCertificateRequest,
    ) -> Result<TlsCertificateData> {
        request.validate()?;
        let now = Utc::now().timestamp();

        let tx_ctx = ctx.clone();
        let tx_id = id.clone();
        with_immediate_tx(&self.pool, move |conn| {
            Box::pin(async move {
                acl::ensure_may(conn, &tx_ctx, Operation::Modify, TLS_CERTIFICATE_KIND).await?;

                let resolved = certificate::resolve_with_permission(
                    conn,
                    tx_ctx.rowid,
                    &tx_id,
                    Operation::Modify,
                )
                .await?
                .ok_or_else(|| {
                    CertfleetError::not_found(TLS_CERTIFICATE_KIND, tx_id.as_str())
                })?;

                if let Some(name) = &request.name {
                    certificate::update_name(conn, resolved.rowid, name, now).await?;
                }
                if let Some(comment) = &request.comment {
                    certificate::update_comment(conn, resolved.rowid, comment, now).await?;
                }
                if request.trust != TRUST_KEEP {
                    let trust = Trust::from_column(Some(request.trust));
                    certificate::update_trust(conn, resolved.rowid, trust, now).await?;
                }
                Ok(())
            })
        })
        .await?;

        info!(id = %id, "Modified TLS certificate");
        self.fetch_visible(ctx, id).await
    }

    /// Delete a certificate and its closure: instance-level grants, tag
    /// associations, and source observations. There is no trash for
    /// certificates; the `ultimate` flag is accepted for interface
    /// symmetry but deletion is always immediate.
    #[instrument(skip(self, ctx), fields(principal = %ctx.id, id = %id), name = "delete_tls_certificate")]
    pub async fn delete(
        &self,
        ctx: &PrincipalContext,
        id: &CertificateId,
        _ultimate: bool,
    ) -> Result<()> {
        let tx_ctx = ctx.clone();
        let tx_id = id.clone();
        with_immediate_tx(&self.pool, move |conn| {
            Box::pin(async move {
                acl::ensure_may(conn, &tx_ctx, Operation::Delete, TLS_CERTIFICATE_KIND).await?;

                let resolved = certificate::resolve_with_permission(
                    conn,
                    tx_ctx.rowid,
                    &tx_id,
                    Operation::Delete,
                )
                .await?
                .ok_or_else(|| {
                    CertfleetError::not_found(TLS_CERTIFICATE_KIND, tx_id.as_str())
                })?;

                certificate::delete_closure(conn, resolved.rowid).await
            })
        })
        .await?;

        info!(id = %id, "Deleted TLS certificate");
        Ok(())
    }

    /// Re-point ownership of every certificate from one principal to
    /// another. Maintenance path for principal removal, where resources
    /// are inherited rather than orphaned.
    #[instrument(skip(self, from, to), fields(from = %from.id, to = %to.id), name = "reassign_tls_certificates")]
    pub async fn bulk_reassign(
        &self,
        from: &PrincipalContext,
        to: &PrincipalContext,
    ) -> Result<u64> {
        let from_rowid = from.rowid;
        let to_rowid = to.rowid;
        let reassigned = with_immediate_tx(&self.pool, move |conn| {
            Box::pin(
                async move { certificate::reassign_owner(conn, from_rowid, to_rowid).await },
            )
        })
        .await?;

        info!(from = %from.id, to = %to.id, count = reassigned, "Reassigned TLS certificates");
        Ok(reassigned)
    }

    /// Delete every certificate a principal owns, each with its full
    /// closure. Maintenance path for principal removal without an heir.
    #[instrument(skip(self, principal), fields(principal = %principal.id), name = "bulk_delete_tls_certificates")]
    pub async fn bulk_delete(&self, principal: &PrincipalContext) -> Result<u64> {
        let owner = principal.rowid;
        let deleted = with_immediate_tx(&self.pool, move |conn| {
            Box::pin(async move {
                let rowids = certificate::owned_rowids(conn, owner).await?;
                let count = rowids.len() as u64;
                for rowid in rowids {
                    certificate::delete_closure(conn, rowid).await?;
                }
                Ok(count)
            })
        })
        .await?;

        info!(principal = %principal.id, count = deleted, "Deleted owned TLS certificates");
        Ok(deleted)
    }

    /// Fetch one visible certificate.
    #[instrument(skip(self, ctx), fields(principal = %ctx.id, id = %id), name = "get_tls_certificate")]
    pub async fn get(
        &self,
        ctx: &PrincipalContext,
        id: &CertificateId,
    ) -> Result<Option<TlsCertificateData>> {
        self.ensure_read(ctx).await?;
        self.repository.get(&self.scope(ctx), id, Utc::now().timestamp()).await
    }

    /// Fetch one visible certificate, reporting an invisible or missing
    /// one uniformly as not found.
    pub async fn require(
        &self,
        ctx: &PrincipalContext,
        id: &CertificateId,
    ) -> Result<TlsCertificateData> {
        self.ensure_read(ctx).await?;
        self.fetch_visible(ctx, id).await
    }

    /// Fetch through the visibility scope without the coarse read
    /// check; used to return records from mutations the principal just
    /// performed.
    async fn fetch_visible(
        &self,
        ctx: &PrincipalContext,
        id: &CertificateId,
    ) -> Result<TlsCertificateData> {
        self.repository
            .get(&self.scope(ctx), id, Utc::now().timestamp())
            .await?
            .ok_or_else(|| CertfleetError::not_found(TLS_CERTIFICATE_KIND, id.as_str()))
    }

    /// Enumerate visible certificates: the filtered page plus the total
    /// count of visible matches, both evaluated against one captured
    /// "now" so derived validity is consistent between them.
    #[instrument(skip(self, ctx, spec), fields(principal = %ctx.id), name = "list_tls_certificates")]
    pub async fn enumerate(
        &self,
        ctx: &PrincipalContext,
        spec: &FilterSpec,
    ) -> Result<CertificatePage> {
        self.ensure_read(ctx).await?;
        let scope = self.scope(ctx);
        let now = Utc::now().timestamp();

        let certificates = self.repository.list(&scope, spec, now).await?;
        let total = self.repository.count(&scope, spec, now).await?;

        Ok(CertificatePage { certificates, total })
    }

    /// Source observations of a visible certificate, newest first.
    #[instrument(skip(self, ctx), fields(principal = %ctx.id, id = %id), name = "list_tls_certificate_sources")]
    pub async fn sources(
        &self,
        ctx: &PrincipalContext,
        id: &CertificateId,
    ) -> Result<Vec<CertificateSourceData>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| CertfleetError::database(e, "Failed to acquire connection"))?;

        acl::ensure_may(&mut conn, ctx, Operation::Read, TLS_CERTIFICATE_KIND).await?;

        let resolved =
            certificate::resolve_with_permission(&mut conn, ctx.rowid, id, Operation::Read)
                .await?
                .ok_or_else(|| CertfleetError::not_found(TLS_CERTIFICATE_KIND, id.as_str()))?;

        source::sources_for(&mut conn, resolved.rowid).await
    }

    /// Record one source observation against a visible certificate.
    /// Location and origin rows are shared by value across the whole
    /// inventory; observations themselves are append-only.
    #[instrument(skip(self, ctx, request), fields(principal = %ctx.id, id = %id), name = "record_tls_certificate_source")]
    pub async fn record_source(
        &self,
        ctx: &PrincipalContext,
        id: &CertificateId,
        request: RecordSourceRequest,
    ) -> Result<SourceId> {
        request.validate()?;

        if request.host_ip.is_some() != request.port.is_some() {
            return Err(CertfleetError::validation(
                "Source location requires both host_ip and port",
            ));
        }
        if request.origin_type.is_some() != request.origin_id.is_some() {
            return Err(CertfleetError::validation(
                "Source origin requires both origin_type and origin_id",
            ));
        }

        let tx_ctx = ctx.clone();
        let tx_id = id.clone();
        let source_id = with_immediate_tx(&self.pool, move |conn| {
            Box::pin(async move {
                acl::ensure_may(conn, &tx_ctx, Operation::Modify, TLS_CERTIFICATE_KIND).await?;

                let resolved = certificate::resolve_with_permission(
                    conn,
                    tx_ctx.rowid,
                    &tx_id,
                    Operation::Modify,
                )
                .await?
                .ok_or_else(|| {
                    CertfleetError::not_found(TLS_CERTIFICATE_KIND, tx_id.as_str())
                })?;

                let location = match (&request.host_ip, request.port) {
                    (Some(host_ip), Some(port)) => Some(NewLocation { host_ip, port }),
                    _ => None,
                };
                let origin = match (&request.origin_type, &request.origin_id) {
                    (Some(origin_type), Some(origin_id)) => Some(NewOrigin {
                        origin_type,
                        origin_id,
                        origin_data: request.origin_data.as_deref(),
                    }),
                    _ => None,
                };

                source::insert_source(
                    conn,
                    resolved.rowid,
                    &NewSource {
                        timestamp: request.timestamp,
                        tls_versions: &request.tls_versions,
                        location,
                        origin,
                    },
                )
                .await
            })
        })
        .await?;

        info!(id = %id, source = %source_id, "Recorded TLS certificate source");
        Ok(source_id)
    }

    /// Whether anything references this certificate in a way that
    /// blocks deletion. Nothing does: observations are owned by the
    /// certificate and go with it.
    pub fn in_use(&self, _certificate: &TlsCertificateData) -> bool {
        false
    }

    /// Whether the certificate's mutable fields may be edited at all.
    /// Certificates carry no immutable-after-publish state.
    pub fn writable(&self, _certificate: &TlsCertificateData) -> bool {
        true
    }

    async fn ensure_read(&self, ctx: &PrincipalContext) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| CertfleetError::database(e, "Failed to acquire connection"))?;
        acl::ensure_may(&mut conn, ctx, Operation::Read, TLS_CERTIFICATE_KIND).await
    }
}
