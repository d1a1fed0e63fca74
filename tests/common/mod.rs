//! Shared test support: in-memory database, provisioned principals,
//! and the fixture certificate.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use certfleet::acl::PrincipalContext;
use certfleet::errors::Operation;
use certfleet::services::CertificateService;
use certfleet::storage::{migrations, DbPool, PrincipalRepository};

pub const PEM_FIXTURE: &[u8] = include_bytes!("../fixtures/scanned.pem");
pub const DER_FIXTURE: &[u8] = include_bytes!("../fixtures/scanned.der");

pub const FIXTURE_SHA256: &str =
    "03a7eea54c577eb28fd70c66e60eb6ed8ab26c6254a3597c38f98032f10596ea";
pub const FIXTURE_MD5: &str = "abdac9df9382c5f0955fa7da427d1620";

/// The fixture certificate as collectors submit it: base64 of the blob.
pub fn fixture_b64() -> String {
    BASE64.encode(PEM_FIXTURE)
}

pub fn fixture_der_b64() -> String {
    BASE64.encode(DER_FIXTURE)
}

pub struct TestHarness {
    pub pool: DbPool,
    pub service: CertificateService,
    pub principals: PrincipalRepository,
}

impl TestHarness {
    pub async fn new() -> Self {
        // A single connection keeps every component on the same
        // in-memory database.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect in-memory database");
        migrations::run_migrations(&pool).await.expect("migrations");

        let service = CertificateService::new(pool.clone());
        let principals = PrincipalRepository::new(pool.clone());
        Self { pool, service, principals }
    }

    /// Principal with every certificate capability granted.
    pub async fn operator(&self, name: &str) -> PrincipalContext {
        let ctx = self.principals.create(name).await.expect("create principal");
        self.principals
            .grant_certificate_capabilities(
                &ctx,
                &[Operation::Read, Operation::Create, Operation::Modify, Operation::Delete],
            )
            .await
            .expect("grant capabilities");
        ctx
    }

    /// Principal that may only read certificates.
    pub async fn reader(&self, name: &str) -> PrincipalContext {
        let ctx = self.principals.create(name).await.expect("create principal");
        self.principals
            .grant_certificate_capabilities(&ctx, &[Operation::Read])
            .await
            .expect("grant capabilities");
        ctx
    }

    /// Principal with no capabilities at all.
    pub async fn stranger(&self, name: &str) -> PrincipalContext {
        self.principals.create(name).await.expect("create principal")
    }
}
