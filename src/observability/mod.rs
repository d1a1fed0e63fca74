//! # Observability Infrastructure
//!
//! Structured logging for the certfleet management core via the
//! `tracing` ecosystem. Repository and service entry points carry
//! `#[instrument]` spans; this module wires up the subscriber.

use crate::config::ObservabilityConfig;
use crate::errors::Result;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// The filter honors `RUST_LOG` when set and falls back to the
/// configured log level. Safe to call more than once; later calls are
/// no-ops (the first subscriber wins), which keeps test binaries that
/// initialize logging in several places from panicking.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("certfleet={}", config.log_level)));

    let result = if config.json_logging {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .try_init()
    } else {
        fmt().with_env_filter(filter).try_init()
    };

    if result.is_ok() {
        info!(
            service_name = %config.service_name,
            log_level = %config.log_level,
            json_logging = config.json_logging,
            "Tracing initialized"
        );
    }

    Ok(())
}
