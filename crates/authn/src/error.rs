//! Ticket lifecycle error types.
//!
//! This module defines errors that can occur while obtaining, renewing or
//! reading a tenant's ticket, and their classification for metrics, retry
//! and operator alerting.

use std::{fmt, sync::Arc};

use thiserror::Error;
use ticketbroker_storage::{ConfigError, StorageError, TenantId};

use crate::remote::RemoteError;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Ticket lifecycle errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`. New variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// The tenant has no key material. Not retryable until it is provisioned.
    #[error("Tenant {tenant} is not provisioned")]
    NotProvisioned {
        /// The tenant that was looked up.
        tenant: TenantId,
    },

    /// The remote authority call failed after any applicable retries.
    #[error("Remote authority error: {0}")]
    Remote(
        /// The classified remote failure.
        #[from]
        RemoteError,
    ),

    /// The ticket request could not be signed, usually because the key or
    /// certificate is malformed.
    #[error("Signing failed: {message}")]
    Signing {
        /// Description of the failure.
        message: String,
        /// The underlying crypto error.
        #[source]
        source: Option<BoxError>,
    },

    /// Reading or writing ticket documents or key material failed.
    ///
    /// Wraps the original [`StorageError`] to preserve the full error source
    /// chain. A [`StorageError::Corrupt`] stored response is reported here
    /// and is never replaced implicitly.
    #[error("Ticket storage error: {0}")]
    Storage(
        /// The underlying storage error.
        #[source]
        StorageError,
    ),

    /// The trusted time source could not be queried.
    #[error("Time source error: {message}")]
    TimeSource {
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// A configuration value was rejected.
    #[error("Configuration error: {0}")]
    Config(
        /// The underlying validation error.
        #[from]
        ConfigError,
    ),
}

impl AuthError {
    /// Creates a `NotProvisioned` error.
    #[must_use]
    pub fn not_provisioned(tenant: &TenantId) -> Self {
        Self::NotProvisioned { tenant: tenant.clone() }
    }

    /// Creates a `Signing` error.
    #[must_use]
    pub fn signing(message: impl Into<String>) -> Self {
        Self::Signing { message: message.into(), source: None }
    }

    /// Creates a `Signing` error with a source error.
    #[must_use]
    pub fn signing_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Signing { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a `TimeSource` error.
    #[must_use]
    pub fn time_source(message: impl Into<String>) -> Self {
        Self::TimeSource { message: message.into(), source: None }
    }

    /// Creates a `TimeSource` error with a source error.
    #[must_use]
    pub fn time_source_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::TimeSource { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Classifies the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotProvisioned { .. } => ErrorKind::NotProvisioned,
            Self::Remote(RemoteError::Network { .. }) => ErrorKind::Network,
            Self::Remote(RemoteError::Transport { .. }) => ErrorKind::Transport,
            Self::Remote(RemoteError::Fault { .. }) => ErrorKind::RemoteFault,
            Self::Remote(RemoteError::MalformedResponse { .. }) => ErrorKind::MalformedResponse,
            Self::Remote(_) => ErrorKind::Unknown,
            Self::Signing { .. } => ErrorKind::Signing,
            Self::Storage(e) if e.is_corrupt() => ErrorKind::Corrupt,
            Self::Storage(_) => ErrorKind::Storage,
            Self::TimeSource { .. } => ErrorKind::TimeSource,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Returns `true` if repeating the operation later may succeed without
    /// operator action.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Remote(e) if e.is_retryable())
    }

    /// Returns `true` for failures that need operator attention: corrupt
    /// documents and unparseable authority responses.
    #[must_use]
    pub fn needs_operator(&self) -> bool {
        matches!(self.kind(), ErrorKind::Corrupt | ErrorKind::MalformedResponse)
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        AuthError::Storage(err)
    }
}

/// Classification of an [`AuthError`], used for metrics labels and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Tenant has no key material.
    NotProvisioned,
    /// Connection not established or timed out.
    Network,
    /// Malformed HTTP or transport-level failure.
    Transport,
    /// Explicit rejection by the authority.
    RemoteFault,
    /// Authority response could not be parsed.
    MalformedResponse,
    /// Stored document could not be parsed.
    Corrupt,
    /// Request could not be signed.
    Signing,
    /// Other storage failure.
    Storage,
    /// Trusted time unavailable.
    TimeSource,
    /// Invalid configuration.
    Config,
    /// Unclassified remote failure.
    Unknown,
}

impl ErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [ErrorKind; 11] = [
        ErrorKind::NotProvisioned,
        ErrorKind::Network,
        ErrorKind::Transport,
        ErrorKind::RemoteFault,
        ErrorKind::MalformedResponse,
        ErrorKind::Corrupt,
        ErrorKind::Signing,
        ErrorKind::Storage,
        ErrorKind::TimeSource,
        ErrorKind::Config,
        ErrorKind::Unknown,
    ];

    /// Stable snake_case label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotProvisioned => "not_provisioned",
            ErrorKind::Network => "network",
            ErrorKind::Transport => "transport",
            ErrorKind::RemoteFault => "remote_fault",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::Corrupt => "corrupt",
            ErrorKind::Signing => "signing",
            ErrorKind::Storage => "storage",
            ErrorKind::TimeSource => "time_source",
            ErrorKind::Config => "config",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type alias for ticket lifecycle operations.
pub type Result<T> = std::result::Result<T, AuthError>;
