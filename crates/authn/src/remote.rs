//! Remote authority client abstraction.
//!
//! [`RemoteAuthClient`] sends a signed ticket request to the authority and
//! returns the issued [`TicketResponse`]. Implementations classify every
//! failure into a [`RemoteError`] variant; the retry decorator in
//! [`crate::retry`] only repeats the retryable ones.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use ticketbroker_storage::TicketResponse;

use crate::error::BoxError;

/// Classified failure of a remote login call.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum RemoteError {
    /// Connection not established or timed out. Retryable.
    #[error("Network error: {message}")]
    Network {
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// Malformed HTTP or other transport-level failure. Retryable.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// Explicit rejection by the authority, surfaced verbatim.
    #[error("Remote fault {code}: {message}")]
    Fault {
        /// Fault code as reported by the authority.
        code: String,
        /// Fault text as reported by the authority.
        message: String,
    },

    /// The response could not be parsed into a ticket.
    #[error("Malformed response: {message}")]
    MalformedResponse {
        /// Description of what was wrong.
        message: String,
        /// The underlying parse error.
        #[source]
        source: Option<BoxError>,
    },

    /// Any other failure.
    #[error("Unknown remote error: {message}")]
    Unknown {
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },
}

impl RemoteError {
    /// Creates a `Network` error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into(), source: None }
    }

    /// Creates a `Network` error with a source error.
    #[must_use]
    pub fn network_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Network { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a `Transport` error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into(), source: None }
    }

    /// Creates a `Transport` error with a source error.
    #[must_use]
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a `Fault` error.
    #[must_use]
    pub fn fault(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fault { code: code.into(), message: message.into() }
    }

    /// Creates a `MalformedResponse` error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse { message: message.into(), source: None }
    }

    /// Creates a `MalformedResponse` error with a source error.
    #[must_use]
    pub fn malformed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::MalformedResponse { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates an `Unknown` error.
    #[must_use]
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown { message: message.into(), source: None }
    }

    /// Creates an `Unknown` error with a source error.
    #[must_use]
    pub fn unknown_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unknown { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Returns `true` for network and transport failures.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Transport { .. })
    }

    /// Short label used in logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Transport { .. } => "transport",
            Self::Fault { .. } => "remote_fault",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::Unknown { .. } => "unknown",
        }
    }
}

/// Exchanges a signed ticket request for a ticket.
///
/// `signed_request` is the transport encoding of the CMS blob produced by
/// [`Signer`](crate::Signer). Implementations must not retry internally;
/// wrap them in [`RetryingAuthClient`](crate::RetryingAuthClient) instead.
#[async_trait]
pub trait RemoteAuthClient: Send + Sync {
    /// Performs one login call.
    async fn login(&self, signed_request: &str) -> Result<TicketResponse, RemoteError>;
}

#[async_trait]
impl<C: RemoteAuthClient + ?Sized> RemoteAuthClient for Arc<C> {
    async fn login(&self, signed_request: &str) -> Result<TicketResponse, RemoteError> {
        (**self).login(signed_request).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_only_network_and_transport_retry() {
        assert!(RemoteError::network("timed out").is_retryable());
        assert!(RemoteError::transport("HTTP 502").is_retryable());
        assert!(!RemoteError::fault("ns1:coe.alreadyAuthenticated", "ya posee un TA valido").is_retryable());
        assert!(!RemoteError::malformed("missing token").is_retryable());
        assert!(!RemoteError::unknown("?").is_retryable());
    }

    #[test]
    fn test_fault_is_verbatim() {
        let err = RemoteError::fault("ns1:cms.sign.invalid", "Firma inválida o algoritmo no soportado");
        assert_eq!(
            err.to_string(),
            "Remote fault ns1:cms.sign.invalid: Firma inválida o algoritmo no soportado"
        );
        assert_eq!(err.kind(), "remote_fault");
    }

    #[test]
    fn test_source_chain_is_kept() {
        let err = RemoteError::network_with_source(
            "connecting",
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        );
        assert_eq!(err.source().unwrap().to_string(), "refused");
    }
}
