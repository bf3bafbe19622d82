//! `loginCms` client for the authentication service.

use async_trait::async_trait;
use reqwest::header;
use ticketbroker_authn::{RemoteAuthClient, RemoteError};
use ticketbroker_storage::TicketResponse;

use crate::{
    config::WsaaConfig,
    error::{Result, WsaaError},
    soap,
};

/// [`RemoteAuthClient`] that calls `loginCms` over HTTPS.
///
/// Failures are classified for the retry layer: connection and timeout
/// errors are [`RemoteError::Network`], other HTTP failures
/// [`RemoteError::Transport`], SOAP faults [`RemoteError::Fault`] and
/// unparseable answers [`RemoteError::MalformedResponse`]. The client does
/// not retry on its own.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct WsaaClient {
    http: reqwest::Client,
    endpoint: String,
}

impl WsaaClient {
    /// Creates a client from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`WsaaError::Config`] if the configuration is invalid or
    /// [`WsaaError::Client`] if the HTTP client cannot be built.
    pub fn new(config: &WsaaConfig) -> Result<Self> {
        config.validate()?;
        let http = build_http_client(config.timeout, config.connect_timeout)?;
        Ok(Self { http, endpoint: config.endpoint().to_owned() })
    }

    /// The `LoginCms` endpoint in use.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RemoteAuthClient for WsaaClient {
    #[tracing::instrument(name = "login_cms", skip(self, signed_request), fields(endpoint = %self.endpoint))]
    async fn login(&self, signed_request: &str) -> std::result::Result<TicketResponse, RemoteError> {
        tracing::info!("requesting ticket from authentication service");
        let envelope = soap::login_cms_request(signed_request);
        let body = post_envelope(&self.http, &self.endpoint, "", envelope).await?;
        let ticket = soap::parse_login_cms_response(&body)?;
        tracing::info!(expires_at = %ticket.expiration_time, "ticket received");
        Ok(ticket)
    }
}

pub(crate) fn build_http_client(
    timeout: std::time::Duration,
    connect_timeout: std::time::Duration,
) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|source| WsaaError::Client { message: "failed to build HTTP client".to_owned(), source })
}

/// Posts a SOAP envelope and returns the response body.
///
/// A non-2xx answer carrying a SOAP fault is returned as that fault; any
/// other non-2xx answer is a transport error.
pub(crate) async fn post_envelope(
    http: &reqwest::Client,
    endpoint: &str,
    soap_action: &str,
    envelope: String,
) -> std::result::Result<String, RemoteError> {
    let response = http
        .post(endpoint)
        .header(header::CONTENT_TYPE, "text/xml; charset=utf-8")
        .header("SOAPAction", format!("\"{soap_action}\""))
        .body(envelope)
        .send()
        .await
        .map_err(classify)?;

    let status = response.status();
    let body = response.text().await.map_err(classify)?;
    if status.is_success() {
        return Ok(body);
    }

    match soap::parse_envelope(&body) {
        Err(fault @ RemoteError::Fault { .. }) => {
            tracing::debug!(%status, error = %fault, "SOAP fault received");
            Err(fault)
        },
        _ => Err(RemoteError::transport(format!("HTTP {status}"))),
    }
}

/// Maps a `reqwest` failure onto the retry classification.
pub(crate) fn classify(err: reqwest::Error) -> RemoteError {
    if err.is_connect() || err.is_timeout() {
        RemoteError::network_with_source("could not reach service", err)
    } else if err.is_request() || err.is_body() || err.is_decode() || err.is_redirect() {
        RemoteError::transport_with_source("HTTP exchange failed", err)
    } else {
        tracing::error!(error = %err, "unclassified HTTP client error");
        RemoteError::unknown_with_source("HTTP client error", err)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_is_rejected_before_building() {
        let config = WsaaConfig::builder().endpoint("wsaa.afip.gov.ar").build();
        assert!(matches!(WsaaClient::new(&config), Err(WsaaError::Config(_))));
    }

    #[test]
    fn test_endpoint_comes_from_config() {
        let client = WsaaClient::new(&WsaaConfig::default()).unwrap();
        assert_eq!(client.endpoint(), crate::config::WSAA_TESTING_ENDPOINT);
    }
}
