//! Error types for the SOAP clients.
//!
//! Failures of an individual call are [`RemoteError`]s, classified the same
//! way for the authentication and invoicing services. [`WsaaError`] covers
//! what can go wrong around a call: building a client or shaping a request.

use ticketbroker_authn::RemoteError;
use ticketbroker_storage::ConfigError;
use thiserror::Error;

/// Result type alias for client construction and business calls.
pub type Result<T> = std::result::Result<T, WsaaError>;

/// Errors raised by the SOAP client crate.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WsaaError {
    /// The configuration failed validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The HTTP client could not be built.
    #[error("HTTP client error: {message}")]
    Client {
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// The operation name is not a valid XML element name.
    #[error("Invalid operation name '{operation}'")]
    InvalidOperation {
        /// The rejected name.
        operation: String,
    },

    /// The remote call failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl WsaaError {
    /// Returns `true` if the call may succeed when repeated.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Remote(err) if err.is_retryable())
    }
}
