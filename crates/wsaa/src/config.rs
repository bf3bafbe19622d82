//! Endpoint and transport configuration for the SOAP clients.
//!
//! Both [`WsaaConfig`] and [`WsfeConfig`] resolve their endpoint from an
//! [`Environment`] unless an explicit `endpoint` overrides it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use ticketbroker_authn::RetryConfig;
use ticketbroker_storage::ConfigError;

/// Authentication service, homologation environment.
pub const WSAA_TESTING_ENDPOINT: &str = "https://wsaahomo.afip.gov.ar/ws/services/LoginCms";

/// Authentication service, production environment.
pub const WSAA_PRODUCTION_ENDPOINT: &str = "https://wsaa.afip.gov.ar/ws/services/LoginCms";

/// Invoicing service, homologation environment.
pub const WSFE_TESTING_ENDPOINT: &str = "https://wswhomo.afip.gov.ar/wsfev1/service.asmx";

/// Invoicing service, production environment.
pub const WSFE_PRODUCTION_ENDPOINT: &str = "https://servicios1.afip.gov.ar/wsfev1/service.asmx";

/// Default bound on a whole authentication call (30 seconds).
const DEFAULT_WSAA_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on a whole invoicing call (20 seconds).
const DEFAULT_WSFE_TIMEOUT: Duration = Duration::from_secs(20);

/// Default connection timeout (5 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Which deployment of the authority's services to talk to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Homologation services.
    #[default]
    Testing,
    /// Production services.
    Production,
}

impl Environment {
    /// The `LoginCms` endpoint for this environment.
    #[must_use]
    pub fn wsaa_endpoint(self) -> &'static str {
        match self {
            Self::Testing => WSAA_TESTING_ENDPOINT,
            Self::Production => WSAA_PRODUCTION_ENDPOINT,
        }
    }

    /// The `wsfev1` endpoint for this environment.
    #[must_use]
    pub fn wsfe_endpoint(self) -> &'static str {
        match self {
            Self::Testing => WSFE_TESTING_ENDPOINT,
            Self::Production => WSFE_PRODUCTION_ENDPOINT,
        }
    }
}

/// Configuration for [`WsaaClient`](crate::WsaaClient).
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
///
/// use ticketbroker_wsaa::{Environment, WsaaConfig};
///
/// let config = WsaaConfig::builder()
///     .environment(Environment::Production)
///     .timeout(Duration::from_secs(15))
///     .build();
/// assert_eq!(config.endpoint(), "https://wsaa.afip.gov.ar/ws/services/LoginCms");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct WsaaConfig {
    /// Deployment to use when no explicit endpoint is set.
    #[serde(default)]
    #[builder(default)]
    pub environment: Environment,

    /// Overrides the environment's endpoint.
    #[serde(default)]
    #[builder(into)]
    pub endpoint: Option<String>,

    /// Upper bound on one HTTP exchange.
    #[serde(with = "humantime_serde", default = "default_wsaa_timeout")]
    #[builder(default = DEFAULT_WSAA_TIMEOUT)]
    pub timeout: Duration,

    /// Upper bound on establishing the connection.
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    #[builder(default = DEFAULT_CONNECT_TIMEOUT)]
    pub connect_timeout: Duration,
}

fn default_wsaa_timeout() -> Duration {
    DEFAULT_WSAA_TIMEOUT
}

fn default_wsfe_timeout() -> Duration {
    DEFAULT_WSFE_TIMEOUT
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

impl Default for WsaaConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl WsaaConfig {
    /// The endpoint requests are sent to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(self.environment.wsaa_endpoint())
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the endpoint is not an `http(s)` URL or a
    /// timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_transport(self.endpoint(), self.timeout, self.connect_timeout)
    }
}

/// Configuration for [`WsfeClient`](crate::WsfeClient).
///
/// Business calls are retried on network and transport failures with the
/// same policy the ticket lifecycle uses for logins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct WsfeConfig {
    /// Deployment to use when no explicit endpoint is set.
    #[serde(default)]
    #[builder(default)]
    pub environment: Environment,

    /// Overrides the environment's endpoint.
    #[serde(default)]
    #[builder(into)]
    pub endpoint: Option<String>,

    /// Upper bound on one HTTP exchange.
    #[serde(with = "humantime_serde", default = "default_wsfe_timeout")]
    #[builder(default = DEFAULT_WSFE_TIMEOUT)]
    pub timeout: Duration,

    /// Upper bound on establishing the connection.
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    #[builder(default = DEFAULT_CONNECT_TIMEOUT)]
    pub connect_timeout: Duration,

    /// Retry policy for business calls.
    #[serde(default)]
    #[builder(default)]
    pub retry: RetryConfig,
}

impl Default for WsfeConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl WsfeConfig {
    /// The endpoint requests are sent to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(self.environment.wsfe_endpoint())
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the endpoint is not an `http(s)` URL, a
    /// timeout is zero or the retry policy is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_transport(self.endpoint(), self.timeout, self.connect_timeout)?;
        self.retry.validate()
    }
}

fn validate_transport(
    endpoint: &str,
    timeout: Duration,
    connect_timeout: Duration,
) -> Result<(), ConfigError> {
    let url = reqwest::Url::parse(endpoint)
        .map_err(|e| ConfigError::Invalid { field: "endpoint", reason: e.to_string() })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid {
            field: "endpoint",
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    for (field, value) in [("timeout", timeout), ("connect_timeout", connect_timeout)] {
        if value.is_zero() {
            return Err(ConfigError::BelowMinimum {
                field,
                min: "1ms".to_owned(),
                value: format!("{value:?}"),
            });
        }
    }
    Ok(())
}
