//! # Domain Model
//!
//! Core domain types for the certificate inventory: type-safe resource
//! identifiers and the certificate/source data model.

pub mod certificate;
pub mod id;

pub use certificate::{
    is_valid_at, CertificateFormat, CertificateSourceData, SourceLocation, SourceOrigin,
    TlsCertificateData, Trust, UNBOUNDED_TIME,
};
pub use id::{CertificateId, LocationId, OriginId, PermissionId, PrincipalId, SourceId};
