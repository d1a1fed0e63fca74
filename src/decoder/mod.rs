//! # Certificate Decoder
//!
//! Pure decoding of submitted certificate blobs into the canonical
//! identity/validity metadata the inventory keys on. No persistence,
//! no clock access: identical input bytes always yield identical
//! output, which is what makes fingerprints usable as stable content
//! identifiers across re-ingestion.

use crate::domain::{CertificateFormat, UNBOUNDED_TIME};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use md5::Md5;
use sha2::{Digest, Sha256};
use x509_parser::certificate::X509Certificate;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::FromDer;

/// Epoch seconds of GeneralizedTime 99991231235959Z, which RFC 5280
/// defines as "no well-defined expiration date".
const NO_WELL_DEFINED_EXPIRY: i64 = 253_402_300_799;

/// Decode failure classes, kept deliberately coarse: callers only need
/// to distinguish "not base64 at all" from "base64 of something that is
/// not a certificate".
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Input is not valid base64, or decodes to an empty payload
    #[error("certificate is not valid Base64")]
    NotEncoded,

    /// Payload is neither a parseable DER nor PEM certificate
    #[error("invalid certificate content")]
    InvalidCertificate,
}

/// Structured metadata extracted from a certificate blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    /// Subject distinguished name, canonical rendering
    pub subject_dn: String,

    /// Issuer distinguished name, canonical rendering
    pub issuer_dn: String,

    /// Serial number, lowercase colon-separated hex
    pub serial: String,

    /// Lower validity bound (epoch seconds, UNBOUNDED_TIME = none)
    pub activation_time: i64,

    /// Upper validity bound (epoch seconds, UNBOUNDED_TIME = none)
    pub expiration_time: i64,

    /// MD5 digest of the DER encoding, lowercase hex
    pub md5_fingerprint: String,

    /// SHA-256 digest of the DER encoding, lowercase hex
    pub sha256_fingerprint: String,

    /// Encoding the blob was submitted in
    pub format: CertificateFormat,
}

/// Decode a base64-encoded certificate blob (PEM or DER payload).
pub fn decode_b64(certificate_b64: &str) -> Result<CertificateInfo, DecodeError> {
    // Collectors hand us base64 with embedded line breaks; the strict
    // engine rejects those, so strip ASCII whitespace first.
    let compact: String =
        certificate_b64.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    let raw = BASE64.decode(compact.as_bytes()).map_err(|_| DecodeError::NotEncoded)?;
    if raw.is_empty() {
        return Err(DecodeError::NotEncoded);
    }

    decode(&raw)
}

/// Decode a raw certificate byte blob (PEM or DER).
pub fn decode(raw: &[u8]) -> Result<CertificateInfo, DecodeError> {
    if looks_like_pem(raw) {
        if let Ok(info) = decode_pem(raw) {
            return Ok(info);
        }
        // Armor markers can appear in garbage; fall through to DER.
        decode_der(raw)
    } else {
        match decode_der(raw) {
            Ok(info) => Ok(info),
            Err(_) => decode_pem(raw),
        }
    }
}

fn looks_like_pem(raw: &[u8]) -> bool {
    raw.windows(10).any(|w| w == b"-----BEGIN")
}

fn decode_pem(raw: &[u8]) -> Result<CertificateInfo, DecodeError> {
    let (_, pem) = parse_x509_pem(raw).map_err(|_| DecodeError::InvalidCertificate)?;
    if pem.label != "CERTIFICATE" {
        return Err(DecodeError::InvalidCertificate);
    }
    let cert = pem.parse_x509().map_err(|_| DecodeError::InvalidCertificate)?;
    Ok(extract(&cert, &pem.contents, CertificateFormat::Pem))
}

fn decode_der(raw: &[u8]) -> Result<CertificateInfo, DecodeError> {
    let (rest, cert) =
        X509Certificate::from_der(raw).map_err(|_| DecodeError::InvalidCertificate)?;
    if !rest.is_empty() {
        return Err(DecodeError::InvalidCertificate);
    }
    Ok(extract(&cert, raw, CertificateFormat::Der))
}

/// Pull owned metadata out of a parsed certificate. Fingerprints are
/// always computed over the DER encoding, regardless of how the blob
/// was submitted, so the same certificate carries the same fingerprints
/// whether it arrived armored or not.
fn extract(cert: &X509Certificate<'_>, der: &[u8], format: CertificateFormat) -> CertificateInfo {
    let not_before = cert.validity().not_before.timestamp();
    let not_after = cert.validity().not_after.timestamp();

    let expiration_time =
        if not_after >= NO_WELL_DEFINED_EXPIRY { UNBOUNDED_TIME } else { not_after };

    CertificateInfo {
        subject_dn: cert.subject().to_string(),
        issuer_dn: cert.issuer().to_string(),
        serial: cert.raw_serial_as_string(),
        activation_time: not_before,
        expiration_time,
        md5_fingerprint: hex::encode(Md5::digest(der)),
        sha256_fingerprint: hex::encode(Sha256::digest(der)),
        format,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD as BASE64;

    const PEM_FIXTURE: &[u8] = include_bytes!("../../tests/fixtures/scanned.pem");
    const DER_FIXTURE: &[u8] = include_bytes!("../../tests/fixtures/scanned.der");

    #[test]
    fn rejects_invalid_base64() {
        assert_eq!(decode_b64("not-base64!!"), Err(DecodeError::NotEncoded));
    }

    #[test]
    fn rejects_empty_payload() {
        assert_eq!(decode_b64(""), Err(DecodeError::NotEncoded));
    }

    #[test]
    fn rejects_non_certificate_payload() {
        let b64 = BASE64.encode(b"clearly not a certificate");
        assert_eq!(decode_b64(&b64), Err(DecodeError::InvalidCertificate));
    }

    #[test]
    fn decodes_pem_fixture() {
        let info = decode(PEM_FIXTURE).expect("decode PEM");
        assert_eq!(info.format, CertificateFormat::Pem);
        assert!(info.subject_dn.contains("CN=inventory.example.org"));
        // Self-signed: issuer equals subject.
        assert_eq!(info.subject_dn, info.issuer_dn);
        assert_eq!(info.serial, "0a:b3:4f:2a:91");
    }

    #[test]
    fn decodes_der_fixture() {
        let info = decode(DER_FIXTURE).expect("decode DER");
        assert_eq!(info.format, CertificateFormat::Der);
        assert_eq!(info.activation_time, 1787670537);
        assert_eq!(info.expiration_time, 2103030537);
    }

    #[test]
    fn reference_fingerprints() {
        // Reference values computed with md5sum/sha256sum over the DER file.
        let info = decode(DER_FIXTURE).expect("decode DER");
        assert_eq!(info.md5_fingerprint, "abdac9df9382c5f0955fa7da427d1620");
        assert_eq!(
            info.sha256_fingerprint,
            "03a7eea54c577eb28fd70c66e60eb6ed8ab26c6254a3597c38f98032f10596ea"
        );
    }

    #[test]
    fn pem_and_der_fingerprints_agree() {
        let pem = decode(PEM_FIXTURE).expect("decode PEM");
        let der = decode(DER_FIXTURE).expect("decode DER");
        assert_eq!(pem.md5_fingerprint, der.md5_fingerprint);
        assert_eq!(pem.sha256_fingerprint, der.sha256_fingerprint);
        assert_eq!(pem.serial, der.serial);
        assert_eq!(pem.subject_dn, der.subject_dn);
    }

    #[test]
    fn decode_is_deterministic() {
        let a = decode(DER_FIXTURE).expect("first decode");
        let b = decode(DER_FIXTURE).expect("second decode");
        assert_eq!(a, b);
    }

    #[test]
    fn base64_with_line_breaks_is_accepted() {
        let mut b64 = BASE64.encode(DER_FIXTURE);
        // Re-wrap at 64 columns the way PEM emitters do.
        let wrapped: String = b64
            .as_bytes()
            .chunks(64)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect::<Vec<_>>()
            .join("\n");
        b64 = wrapped;
        let info = decode_b64(&b64).expect("decode wrapped base64");
        assert_eq!(info.format, CertificateFormat::Der);
    }
}
