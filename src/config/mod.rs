//! # Configuration Management
//!
//! Application configuration for the certfleet management core, loaded
//! from the environment with validated defaults.

mod settings;

pub use settings::{AppConfig, DatabaseConfig, ObservabilityConfig};
