//! # Error Types
//!
//! Error handling for the certfleet management core, built on `thiserror`.
//!
//! The taxonomy distinguishes the four caller-visible classes every
//! operation can surface (permission denied, not found, conflict,
//! validation) from infrastructure failures (database, I/O, config),
//! which always abort the current operation with a full rollback.

use std::fmt;

/// Custom result type for certfleet operations
pub type Result<T> = std::result::Result<T, CertfleetError>;

/// Main error type for the certfleet management core
#[derive(thiserror::Error, Debug)]
pub enum CertfleetError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Database and storage errors
    #[error("Database error: {context}")]
    Database {
        #[source]
        source: sqlx::Error,
        context: String,
    },

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// Validation errors (malformed input, invalid certificate content)
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// The acting principal lacks the coarse capability for an operation
    #[error("Permission denied: {operation} on {resource_kind}")]
    PermissionDenied {
        operation: String,
        resource_kind: String,
    },

    /// Resource does not resolve, or resolves but is invisible to the
    /// acting principal (invisible resources report NotFound, never
    /// PermissionDenied, so existence is not leaked)
    #[error("Resource not found: {resource_type} with ID '{id}'")]
    NotFound {
        resource_type: String,
        id: String,
    },

    /// Resource conflict errors (e.g. name already exists)
    #[error("Resource conflict: {message}")]
    Conflict {
        message: String,
        resource_type: String,
    },

    /// A filter or sort key outside the resource kind's column map.
    /// Column maps are closed sets; unknown keys are rejected, not ignored.
    #[error("Unknown filter column: '{column}' for {resource_kind}")]
    UnknownFilterColumn {
        column: String,
        resource_kind: String,
    },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Operations a principal may be granted on a resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Read,
    Create,
    Modify,
    Delete,
}

impl Operation {
    /// Stable storage/display name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Create => "create",
            Operation::Modify => "modify",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl CertfleetError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create a database error with context
    pub fn database<S: Into<String>>(source: sqlx::Error, context: S) -> Self {
        Self::Database { source, context: context.into() }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create a permission denied error
    pub fn permission_denied<O: Into<String>, R: Into<String>>(
        operation: O,
        resource_kind: R,
    ) -> Self {
        Self::PermissionDenied {
            operation: operation.into(),
            resource_kind: resource_kind.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::NotFound { resource_type: resource_type.into(), id: id.into() }
    }

    /// Create a conflict error
    pub fn conflict<M: Into<String>, R: Into<String>>(message: M, resource_type: R) -> Self {
        Self::Conflict { message: message.into(), resource_type: resource_type.into() }
    }

    /// Create an unknown filter column error
    pub fn unknown_filter_column<C: Into<String>, R: Into<String>>(
        column: C,
        resource_kind: R,
    ) -> Self {
        Self::UnknownFilterColumn {
            column: column.into(),
            resource_kind: resource_kind.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Whether this error leaks no information about resource existence.
    ///
    /// Instance-level ACL failures must surface as `NotFound`; only the
    /// coarse capability check may answer `PermissionDenied`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CertfleetError::NotFound { .. })
    }

    /// Check if this error should be retried by a caller that wants to.
    /// Nothing is retried inside the core itself.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CertfleetError::Database { .. } | CertfleetError::Io { .. }
        )
    }
}

// Error conversions for common external error types
impl From<sqlx::Error> for CertfleetError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database { source: error, context: "Database operation failed".to_string() }
    }
}

impl From<std::io::Error> for CertfleetError {
    fn from(error: std::io::Error) -> Self {
        Self::Io { source: error, context: "I/O operation failed".to_string() }
    }
}

impl From<serde_json::Error> for CertfleetError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { source: error, context: "JSON serialization failed".to_string() }
    }
}

impl From<config::ConfigError> for CertfleetError {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}

impl From<validator::ValidationErrors> for CertfleetError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::validation(format!("Validation failed: {}", message))
    }
}
