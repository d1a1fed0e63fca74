//! Certificate and observation-source data model.
//!
//! These are the caller-facing shapes produced by the repositories.
//! Validity is always derived from the stored activation/expiration
//! window and a caller-supplied "now"; it is never persisted.

use crate::domain::{CertificateId, LocationId, OriginId, PrincipalId, SourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sentinel for a validity bound the certificate does not define.
///
/// RFC 5280 uses the GeneralizedTime 99991231235959Z for "no
/// well-defined expiry"; both that and a missing bound map to this
/// sentinel rather than zero, so epoch-0 certificates stay meaningful.
pub const UNBOUNDED_TIME: i64 = -1;

/// Detected encoding of a stored certificate blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertificateFormat {
    Unknown,
    Der,
    Pem,
}

impl CertificateFormat {
    /// Stable storage/display name of the format.
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateFormat::Unknown => "unknown",
            CertificateFormat::Der => "DER",
            CertificateFormat::Pem => "PEM",
        }
    }
}

impl fmt::Display for CertificateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CertificateFormat {
    type Err = ();

    /// Never fails: anything unrecognized is `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "DER" => CertificateFormat::Der,
            "PEM" => CertificateFormat::Pem,
            _ => CertificateFormat::Unknown,
        })
    }
}

/// User-set trust annotation, independent of parse results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trust {
    Untrusted,
    Trusted,
    Unset,
}

impl Trust {
    /// Storage encoding: NULL for unset, 0/1 otherwise.
    pub fn to_column(self) -> Option<i64> {
        match self {
            Trust::Untrusted => Some(0),
            Trust::Trusted => Some(1),
            Trust::Unset => None,
        }
    }

    /// Decode the storage encoding.
    pub fn from_column(value: Option<i64>) -> Self {
        match value {
            Some(0) => Trust::Untrusted,
            Some(_) => Trust::Trusted,
            None => Trust::Unset,
        }
    }
}

/// Compute the derived validity flag for a validity window at `now`.
///
/// A certificate is valid iff the expiration bound has not passed (or is
/// unbounded) and the activation bound has been reached (or is
/// unbounded). Both comparisons are inclusive: a certificate expiring
/// exactly now is still valid.
pub fn is_valid_at(activation_time: i64, expiration_time: i64, now: i64) -> bool {
    (expiration_time == UNBOUNDED_TIME || expiration_time >= now)
        && (activation_time == UNBOUNDED_TIME || activation_time <= now)
}

/// A TLS certificate record as stored in the inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsCertificateData {
    /// External identifier, immutable once assigned
    pub id: CertificateId,

    /// Owning principal
    pub owner: PrincipalId,

    /// Human name; defaults to the SHA-256 fingerprint at creation
    pub name: String,

    /// Free-text comment
    pub comment: String,

    /// Record creation time (epoch seconds)
    pub creation_time: i64,

    /// Last modification time (epoch seconds)
    pub modification_time: i64,

    /// Original base64 blob exactly as submitted
    pub certificate: String,

    /// Subject distinguished name
    pub subject_dn: String,

    /// Issuer distinguished name
    pub issuer_dn: String,

    /// User-set trust annotation
    pub trust: Trust,

    /// Lower validity bound (epoch seconds, UNBOUNDED_TIME = none)
    pub activation_time: i64,

    /// Upper validity bound (epoch seconds, UNBOUNDED_TIME = none)
    pub expiration_time: i64,

    /// MD5 digest of the DER encoding, lowercase hex
    pub md5_fingerprint: String,

    /// SHA-256 digest of the DER encoding, lowercase hex
    pub sha256_fingerprint: String,

    /// Serial number, lowercase colon-separated hex
    pub serial: String,

    /// Detected encoding of the submitted blob
    pub certificate_format: CertificateFormat,

    /// Most recent source observation (epoch seconds), if any
    pub last_collected: Option<i64>,
}

impl TlsCertificateData {
    /// Whether the validity window covers the given instant.
    pub fn is_valid_at(&self, now: i64) -> bool {
        is_valid_at(self.activation_time, self.expiration_time, now)
    }

    /// Whether the validity window covers the current wall clock.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now().timestamp())
    }
}

/// A network location a certificate was observed at, deduplicated by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub id: LocationId,
    pub host_ip: String,
    pub port: u16,
}

/// The scan/task a certificate observation came from, deduplicated by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOrigin {
    pub id: OriginId,
    pub origin_type: String,
    pub origin_id: String,
    pub origin_data: Option<String>,
}

/// One observation of a certificate: when and where it was seen.
/// Append-only; never mutated after insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateSourceData {
    pub id: SourceId,

    /// Observation time (epoch seconds)
    pub timestamp: i64,

    /// TLS protocol versions seen at the observation, comma separated
    pub tls_versions: String,

    pub location: Option<SourceLocation>,

    pub origin: Option<SourceOrigin>,
}

impl CertificateSourceData {
    /// Observation time rendered as an RFC 3339 / ISO 8601 string.
    pub fn iso_timestamp(&self) -> String {
        DateTime::<Utc>::from_timestamp(self.timestamp, 0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default()
    }
}
