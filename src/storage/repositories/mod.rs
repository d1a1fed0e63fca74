//! Repository layer over the SQLite inventory store.

pub mod certificate;
pub mod principal;
pub mod source;
pub mod tags;

pub use certificate::{CertificateRepository, TLS_CERTIFICATE_KIND, TLS_CERTIFICATE_TABLE};
pub use principal::PrincipalRepository;
