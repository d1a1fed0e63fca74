//! Service layer orchestrating decoding, access control, and storage.

mod certificate_service;

pub use certificate_service::{
    CertificatePage, CertificateService, CopyTlsCertificateRequest,
    CreateTlsCertificateRequest, ModifyTlsCertificateRequest, RecordSourceRequest,
    TRUST_KEEP,
};
