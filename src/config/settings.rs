//! # Configuration Settings
//!
//! Defines the configuration structure for the certfleet management core.

use crate::errors::{CertfleetError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Database configuration
    #[validate(nested)]
    pub database: DatabaseConfig,

    /// Observability configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from environment variables with `CERTFLEET_`
    /// prefix (e.g. `CERTFLEET_DATABASE__URL`), falling back to defaults.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        // Unset sections fall back to serde defaults; a malformed value
        // is an error, never a silent fallback.
        let loaded: AppConfig = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("CERTFLEET")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        let merged = AppConfig {
            database: DatabaseConfig::from_env_or(loaded.database),
            observability: loaded.observability,
        };

        merged.validate()?;
        Ok(merged)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        // Use validator crate for basic validation
        Validate::validate(self).map_err(CertfleetError::from)?;

        // Custom validation logic that goes beyond the derive
        if !self.database.url.starts_with("sqlite:") {
            return Err(CertfleetError::validation(
                "Database URL must be a sqlite:// URL",
            ));
        }

        Ok(())
    }
}

/// Database connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[validate(length(min = 1, message = "Database URL cannot be empty"))]
    pub url: String,

    /// Maximum number of connections in the pool
    #[validate(range(
        min = 1,
        max = 100,
        message = "Max connections must be between 1 and 100"
    ))]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[validate(range(
        min = 0,
        max = 50,
        message = "Min connections must be between 0 and 50"
    ))]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[validate(range(
        min = 1,
        max = 60,
        message = "Connect timeout must be between 1 and 60 seconds"
    ))]
    pub connect_timeout_seconds: u64,

    /// Idle timeout in seconds (0 = no timeout)
    pub idle_timeout_seconds: u64,

    /// Enable automatic migrations
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/certfleet.db".to_string(),
            max_connections: 10,
            min_connections: 0,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 600,
            auto_migrate: true,
        }
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Get idle timeout as Duration (None if 0)
    pub fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_timeout_seconds))
        }
    }

    /// Check if this is an in-memory SQLite configuration
    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:")
    }

    /// Overlay plain environment variables over an already-loaded config.
    /// `DATABASE_URL` wins over the prefixed form for sqlx CLI parity.
    fn from_env_or(base: DatabaseConfig) -> Self {
        let url = std::env::var("DATABASE_URL").unwrap_or(base.url);

        Self { url, ..base }
    }
}

/// Observability configuration for logging and tracing
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing service name
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// Log level (trace, debug, info, warn, error)
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "certfleet".to_string(),
            log_level: "info".to_string(),
            json_logging: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_validate_rejects_empty_url() {
        let config = AppConfig {
            database: DatabaseConfig { url: String::new(), ..Default::default() },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_sqlite_url() {
        let config = AppConfig {
            database: DatabaseConfig {
                url: "postgresql://localhost/certfleet".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_max_connections() {
        let config = AppConfig {
            database: DatabaseConfig { max_connections: 0, ..Default::default() },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_idle_timeout_zero_means_none() {
        let config = DatabaseConfig { idle_timeout_seconds: 0, ..Default::default() };
        assert!(config.idle_timeout().is_none());

        let config = DatabaseConfig { idle_timeout_seconds: 30, ..Default::default() };
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_load_applies_partial_overrides_and_rejects_malformed() {
        // One sequential test: the environment is process-global.
        std::env::remove_var("DATABASE_URL");
        std::env::set_var("CERTFLEET_OBSERVABILITY__LOG_LEVEL", "debug");
        let config = AppConfig::load().expect("load with partial override");
        std::env::remove_var("CERTFLEET_OBSERVABILITY__LOG_LEVEL");

        // A single overridden field wins; everything else keeps defaults.
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.database.max_connections, 10);
        assert!(config.database.url.starts_with("sqlite:"));

        std::env::set_var("CERTFLEET_DATABASE__MAX_CONNECTIONS", "lots");
        let result = AppConfig::load();
        std::env::remove_var("CERTFLEET_DATABASE__MAX_CONNECTIONS");

        let err = result.err().expect("malformed value must not be ignored");
        assert!(matches!(err, CertfleetError::Config { .. }));
    }

    #[test]
    fn test_in_memory_detection() {
        let config = DatabaseConfig { url: "sqlite://:memory:".to_string(), ..Default::default() };
        assert!(config.is_in_memory());
        assert!(!DatabaseConfig::default().is_in_memory());
    }
}
