//! # Certfleet
//!
//! Management core for an inventory of TLS certificates observed across
//! a fleet: ingestion of collector-submitted certificate blobs, derived
//! identity metadata (fingerprints, DNs, validity windows), filtered and
//! permission-scoped enumeration, and the full CRUD lifecycle with
//! cascade-safe deletion.
//!
//! ## Architecture
//!
//! ```text
//! Certificate Service → Access Control Gate → Query Engine
//!         ↓                      ↓                 ↓
//!     Decoder              Persistence Layer (SQLite)
//! ```
//!
//! ## Core Components
//!
//! - **Decoder**: pure X.509 decoding of submitted blobs into
//!   fingerprints, DNs, serial, and the validity window
//! - **Query Engine**: declarative column-map driven filtering,
//!   sorting, and pagination compiled to parameterized SQL
//! - **Access Control Gate**: coarse capabilities plus instance-level
//!   grants; every query is intersected with a visibility scope
//! - **Certificate Service**: orchestrates decode, ACL, and storage;
//!   every mutation is one immediate write transaction
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use certfleet::config::AppConfig;
//! use certfleet::services::CertificateService;
//! use certfleet::Result;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = AppConfig::load()?;
//!     certfleet::observability::init_tracing(&config.observability)?;
//!     let pool = certfleet::storage::create_pool(&config.database).await?;
//!     let _service = CertificateService::new(pool);
//!     Ok(())
//! }
//! ```

pub mod acl;
pub mod config;
pub mod decoder;
pub mod domain;
pub mod errors;
pub mod observability;
pub mod query;
pub mod services;
pub mod storage;

// Re-export commonly used types and traits
pub use acl::PrincipalContext;
pub use config::AppConfig;
pub use errors::{CertfleetError, Operation, Result};
pub use services::CertificateService;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
