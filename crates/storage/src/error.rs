//! Storage error types and result alias.
//!
//! Every ticket store and key material backend maps its internal failures to
//! [`StorageError`], so the lifecycle manager can classify them without
//! knowing which backend produced them.
//!
//! # Error Types
//!
//! - [`StorageError::NotFound`] - The requested document or key material does not exist
//! - [`StorageError::Corrupt`] - A stored document exists but cannot be parsed
//! - [`StorageError::Io`] - Filesystem or other backend I/O failure
//! - [`StorageError::InvalidTenant`] - A tenant identifier failed validation
//! - [`StorageError::Internal`] - Backend-specific internal errors
//!
//! # Example
//!
//! ```
//! use ticketbroker_storage::{StorageError, StorageResult};
//!
//! fn lookup(path: &str) -> StorageResult<Vec<u8>> {
//!     Err(StorageError::not_found(path))
//! }
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// Errors preserve their source chain via the `#[source]` attribute, enabling
/// debugging tools to display the full error context.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The requested document or key material does not exist.
    #[error("Not found: {resource}")]
    NotFound {
        /// Description of the missing resource (e.g. `20304050607/response`).
        resource: String,
    },

    /// A stored document exists but does not match the expected shape.
    ///
    /// This usually means a required field (token, sign, expiration time)
    /// is missing or a timestamp is malformed. Corrupt documents are not
    /// repaired automatically and need operator attention or a forced
    /// renewal.
    #[error("Corrupt document {resource}: {message}")]
    Corrupt {
        /// Description of the corrupt resource.
        resource: String,
        /// What failed to parse.
        message: String,
        /// The underlying parse error.
        #[source]
        source: Option<BoxError>,
    },

    /// Filesystem or backend I/O failure.
    #[error("I/O error: {message}")]
    Io {
        /// Description of the failed operation.
        message: String,
        /// The underlying I/O error.
        #[source]
        source: Option<BoxError>,
    },

    /// A tenant identifier failed validation.
    #[error("Invalid tenant identifier {value:?}: {reason}")]
    InvalidTenant {
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Internal storage backend error.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },
}

impl StorageError {
    /// Creates a new `NotFound` error for the given resource.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound { resource: resource.into() }
    }

    /// Creates a new `Corrupt` error.
    #[must_use]
    pub fn corrupt(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt { resource: resource.into(), message: message.into(), source: None }
    }

    /// Creates a new `Corrupt` error with a source error.
    #[must_use]
    pub fn corrupt_with_source(
        resource: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Corrupt {
            resource: resource.into(),
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Creates a new `Io` error with the given message.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io { message: message.into(), source: None }
    }

    /// Creates a new `Io` error with a message and source error.
    #[must_use]
    pub fn io_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Returns `true` if this error means the resource does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if this error means a stored document is unreadable.
    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}

/// Configuration validation error.
///
/// Returned by config builders and `validate()` methods when a value is out
/// of range or missing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric or duration value was below its minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Name of the offending field.
        field: &'static str,
        /// Minimum accepted value, rendered for display.
        min: String,
        /// Rejected value, rendered for display.
        value: String,
    },

    /// A required value was empty.
    #[error("{field} must not be empty")]
    Empty {
        /// Name of the offending field.
        field: &'static str,
    },

    /// A value could not be parsed.
    #[error("{field} is invalid: {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            StorageError::not_found("20304050607/response").to_string(),
            "Not found: 20304050607/response"
        );
        assert_eq!(
            StorageError::corrupt("20304050607/response", "missing token").to_string(),
            "Corrupt document 20304050607/response: missing token"
        );
        assert_eq!(StorageError::io("disk full").to_string(), "I/O error: disk full");
    }

    #[test]
    fn test_io_error_preserves_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err = StorageError::io_with_source("writing request", io);

        let source = err.source().expect("source chain must be preserved");
        assert_eq!(source.to_string(), "read-only");
    }

    #[test]
    fn test_predicates() {
        assert!(StorageError::not_found("x").is_not_found());
        assert!(!StorageError::not_found("x").is_corrupt());
        assert!(StorageError::corrupt("x", "y").is_corrupt());
        assert!(!StorageError::internal("x").is_not_found());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::BelowMinimum {
            field: "max_attempts",
            min: "1".into(),
            value: "0".into(),
        };
        assert_eq!(err.to_string(), "max_attempts must be at least 1, got 0");
        assert_eq!(ConfigError::Empty { field: "service" }.to_string(), "service must not be empty");
    }
}
