//! Authenticated calls to the electronic invoicing service.
//!
//! Payload shapes belong to the caller: [`WsfeClient::forward`] only wraps
//! an XML fragment with the operation element and the `Auth` block, and
//! hands back the raw response body. Business errors reported inside a
//! successful response (`<Errors>`) are left for the caller to read.

use ticketbroker_authn::{RemoteError, RetryConfig, with_retry};
use ticketbroker_storage::Credentials;

use crate::{
    client::{build_http_client, post_envelope},
    config::WsfeConfig,
    error::{Result, WsaaError},
    soap::{self, DummyStatus, WSFE_NAMESPACE},
};

/// Client for `wsfev1` business operations.
///
/// Calls are retried on network and transport failures following
/// [`WsfeConfig::retry`]; faults are returned on the first occurrence.
#[derive(Debug, Clone)]
pub struct WsfeClient {
    http: reqwest::Client,
    endpoint: String,
    retry: RetryConfig,
}

impl WsfeClient {
    /// Creates a client from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`WsaaError::Config`] if the configuration is invalid or
    /// [`WsaaError::Client`] if the HTTP client cannot be built.
    pub fn new(config: &WsfeConfig) -> Result<Self> {
        config.validate()?;
        let http = build_http_client(config.timeout, config.connect_timeout)?;
        Ok(Self { http, endpoint: config.endpoint().to_owned(), retry: config.retry.clone() })
    }

    /// The `wsfev1` endpoint in use.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sends `operation` with `credentials` and `body`, returning the raw
    /// response envelope.
    ///
    /// `body` is the XML content that follows `Auth` inside the operation
    /// element, for example
    /// `<ar:PtoVta>1</ar:PtoVta><ar:CbteTipo>6</ar:CbteTipo>`.
    ///
    /// # Errors
    ///
    /// - [`WsaaError::InvalidOperation`] if `operation` is not an XML name.
    /// - [`WsaaError::Remote`] if the call fails, including SOAP faults.
    #[tracing::instrument(skip(self, credentials, body), fields(tenant = %credentials.cuit))]
    pub async fn forward(
        &self,
        operation: &str,
        credentials: &Credentials,
        body: &str,
    ) -> Result<String> {
        if !soap::is_xml_name(operation) {
            return Err(WsaaError::InvalidOperation { operation: operation.to_owned() });
        }
        let envelope = soap::business_request(operation, Some(credentials), body);
        let response = self.call(operation, envelope).await?;
        soap::parse_envelope(&response)?;
        Ok(response)
    }

    /// Calls `FEDummy`, the service's unauthenticated health probe.
    ///
    /// # Errors
    ///
    /// Returns [`WsaaError::Remote`] if the call fails or the answer lacks a
    /// status field.
    #[tracing::instrument(skip(self))]
    pub async fn dummy(&self) -> Result<DummyStatus> {
        let envelope = soap::business_request("FEDummy", None, "");
        let response = self.call("FEDummy", envelope).await?;
        let status = soap::parse_dummy_response(&response)?;
        if !status.is_ok() {
            tracing::warn!(
                app_server = %status.app_server,
                db_server = %status.db_server,
                auth_server = %status.auth_server,
                "invoicing service degraded"
            );
        }
        Ok(status)
    }

    async fn call(&self, operation: &str, envelope: String) -> std::result::Result<String, RemoteError> {
        let action = format!("{WSFE_NAMESPACE}{operation}");
        with_retry(&self.retry, None, operation, || {
            post_envelope(&self.http, &self.endpoint, &action, envelope.clone())
        })
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use ticketbroker_storage::testutil::tenant_id;

    use super::*;

    #[tokio::test]
    async fn test_invalid_operation_is_rejected_without_a_call() {
        let config = WsfeConfig::builder().endpoint("http://127.0.0.1:9/wsfev1").build();
        let client = WsfeClient::new(&config).unwrap();
        let credentials =
            Credentials { token: "T".to_owned(), sign: "S".to_owned(), cuit: tenant_id("20304050607") };

        let err = client.forward("FE Dummy", &credentials, "").await.unwrap_err();
        assert!(matches!(err, WsaaError::InvalidOperation { .. }));
    }

    #[test]
    fn test_invalid_retry_policy_is_rejected() {
        let config = WsfeConfig::builder()
            .retry(RetryConfig::builder().max_attempts(0).build())
            .build();
        assert!(matches!(WsfeClient::new(&config), Err(WsaaError::Config(_))));
    }
}
