//! Configuration for the ticket lifecycle.
//!
//! Every struct here deserializes with `#[serde(deny_unknown_fields)]`,
//! accepts human-readable durations (`"500ms"`, `"11h"`) and validates into
//! [`ConfigError`]. Defaults follow the authority's published limits:
//!
//! | Setting | Default |
//! |---------|---------|
//! | remote attempts | 3 |
//! | backoff between attempts | 500ms |
//! | per-attempt timeout | 30s |
//! | sweep interval | 11h |
//! | request window lead / validity | 10m / 10m |
//! | time server | `time.afip.gov.ar:123` |

use std::time::Duration;

use serde::{Deserialize, Serialize};
use ticketbroker_storage::ConfigError;

/// Default total number of remote attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default fixed wait between remote attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

/// Default bound on a single remote attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between renewal sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(11 * 60 * 60);

/// Default service name placed in every ticket request.
pub const DEFAULT_SERVICE: &str = "wsfe";

/// Default number of tenants whose last response is kept in memory.
pub const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

/// Default SNTP server.
pub const DEFAULT_NTP_SERVER: &str = "time.afip.gov.ar:123";

/// Retry policy for the remote login call.
///
/// Only network and transport failures are retried. Attempts are separated
/// by a fixed `backoff`; each attempt is bounded by `attempt_timeout` and a
/// timeout counts as a network failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    #[builder(default = default_max_attempts())]
    pub max_attempts: u32,

    /// Wait between attempts.
    #[serde(with = "humantime_serde", default = "default_backoff")]
    #[builder(default = default_backoff())]
    pub backoff: Duration,

    /// Upper bound on one remote call.
    #[serde(with = "humantime_serde", default = "default_attempt_timeout")]
    #[builder(default = default_attempt_timeout())]
    pub attempt_timeout: Duration,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_backoff() -> Duration {
    DEFAULT_BACKOFF
}

fn default_attempt_timeout() -> Duration {
    DEFAULT_ATTEMPT_TIMEOUT
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: default_backoff(),
            attempt_timeout: default_attempt_timeout(),
        }
    }
}

impl RetryConfig {
    /// Validates the policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if `max_attempts` is zero or
    /// `attempt_timeout` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts < 1 {
            return Err(ConfigError::BelowMinimum {
                field: "max_attempts",
                min: "1".to_owned(),
                value: self.max_attempts.to_string(),
            });
        }
        if self.attempt_timeout.is_zero() {
            return Err(ConfigError::BelowMinimum {
                field: "attempt_timeout",
                min: "1ms".to_owned(),
                value: format!("{:?}", self.attempt_timeout),
            });
        }
        Ok(())
    }
}

/// Renewal sweep configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Time between sweeps.
    #[serde(with = "humantime_serde", default = "default_sweep_interval")]
    #[builder(default = default_sweep_interval())]
    pub interval: Duration,

    /// Run the first sweep immediately instead of after one interval.
    #[serde(default = "default_run_on_start")]
    #[builder(default = default_run_on_start())]
    pub run_on_start: bool,
}

fn default_sweep_interval() -> Duration {
    DEFAULT_SWEEP_INTERVAL
}

fn default_run_on_start() -> bool {
    true
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { interval: default_sweep_interval(), run_on_start: default_run_on_start() }
    }
}

impl SchedulerConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if the interval is under one second.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval < Duration::from_secs(1) {
            return Err(ConfigError::BelowMinimum {
                field: "interval",
                min: "1s".to_owned(),
                value: format!("{:?}", self.interval),
            });
        }
        Ok(())
    }
}

/// Configuration for [`TicketManager`](crate::TicketManager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct ManagerConfig {
    /// Service name requested in every ticket.
    #[serde(default = "default_service")]
    #[builder(into, default = default_service())]
    pub service: String,

    /// Remote retry policy.
    #[serde(default)]
    #[builder(default)]
    pub retry: RetryConfig,

    /// Maximum tenants held in the in-memory response cache.
    #[serde(default = "default_cache_capacity")]
    #[builder(default = default_cache_capacity())]
    pub cache_capacity: u64,
}

fn default_service() -> String {
    DEFAULT_SERVICE.to_owned()
}

fn default_cache_capacity() -> u64 {
    DEFAULT_CACHE_CAPACITY
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            service: default_service(),
            retry: RetryConfig::default(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl ManagerConfig {
    /// Validates the configuration, including the nested retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the service name is blank or the retry
    /// policy is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.trim().is_empty() {
            return Err(ConfigError::Empty { field: "service" });
        }
        self.retry.validate()
    }
}

/// Shape of the validity window placed in each ticket request.
///
/// The request's generation time is `lead` before the trusted instant and
/// its expiration time is `validity` after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct WindowConfig {
    /// How far before the trusted instant the window opens.
    #[serde(with = "humantime_serde", default = "default_window_lead")]
    #[builder(default = default_window_lead())]
    pub lead: Duration,

    /// How far after the trusted instant the window closes.
    #[serde(with = "humantime_serde", default = "default_window_validity")]
    #[builder(default = default_window_validity())]
    pub validity: Duration,
}

fn default_window_lead() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_window_validity() -> Duration {
    Duration::from_secs(10 * 60)
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { lead: default_window_lead(), validity: default_window_validity() }
    }
}

impl WindowConfig {
    /// Validates the window.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `validity` is zero or either bound exceeds
    /// one day.
    pub fn validate(&self) -> Result<(), ConfigError> {
        const DAY: Duration = Duration::from_secs(24 * 60 * 60);
        if self.validity.is_zero() {
            return Err(ConfigError::BelowMinimum {
                field: "validity",
                min: "1s".to_owned(),
                value: format!("{:?}", self.validity),
            });
        }
        for (field, value) in [("lead", self.lead), ("validity", self.validity)] {
            if value > DAY {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must not exceed 24h, got {value:?}"),
                });
            }
        }
        Ok(())
    }
}

/// SNTP time source configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct NtpConfig {
    /// `host:port` of the time server.
    #[serde(default = "default_ntp_server")]
    #[builder(into, default = default_ntp_server())]
    pub server: String,

    /// Bound on one query, including DNS resolution.
    #[serde(with = "humantime_serde", default = "default_ntp_timeout")]
    #[builder(default = default_ntp_timeout())]
    pub timeout: Duration,

    /// Request window derived from the server's time.
    #[serde(default)]
    #[builder(default)]
    pub window: WindowConfig,
}

fn default_ntp_server() -> String {
    DEFAULT_NTP_SERVER.to_owned()
}

fn default_ntp_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for NtpConfig {
    fn default() -> Self {
        Self {
            server: default_ntp_server(),
            timeout: default_ntp_timeout(),
            window: WindowConfig::default(),
        }
    }
}

impl NtpConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the server is blank, the timeout is zero or
    /// the window is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.trim().is_empty() {
            return Err(ConfigError::Empty { field: "server" });
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::BelowMinimum {
                field: "timeout",
                min: "1ms".to_owned(),
                value: format!("{:?}", self.timeout),
            });
        }
        self.window.validate()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_retry_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.backoff, Duration::from_millis(500));
        assert_eq!(config.attempt_timeout, Duration::from_secs(30));
        assert_eq!(RetryConfig::builder().build(), config);
    }

    #[test]
    fn test_manager_config_from_json() {
        let config: ManagerConfig = serde_json::from_str(
            r#"{"service": "wsfe", "retry": {"max_attempts": 5, "backoff": "1s"}}"#,
        )
        .unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff, Duration::from_secs(1));
        assert_eq!(config.retry.attempt_timeout, DEFAULT_ATTEMPT_TIMEOUT);
        assert_eq!(config.cache_capacity, DEFAULT_CACHE_CAPACITY);
        config.validate().unwrap();
    }

    #[test]
    fn test_scheduler_config_parses_hours() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{"interval": "11h", "run_on_start": false}"#).unwrap();
        assert_eq!(config.interval, DEFAULT_SWEEP_INTERVAL);
        assert!(!config.run_on_start);
    }

    #[rstest]
    #[case::retry(r#"{"max_attempts": 1, "jitter": true}"#)]
    #[case::empty_field_name(r#"{"": 1}"#)]
    fn test_unknown_fields_are_rejected(#[case] json: &str) {
        assert!(serde_json::from_str::<RetryConfig>(json).is_err());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = RetryConfig::builder().max_attempts(0).build();
        assert_eq!(
            config.validate(),
            Err(ConfigError::BelowMinimum {
                field: "max_attempts",
                min: "1".to_owned(),
                value: "0".to_owned(),
            })
        );
    }

    #[test]
    fn test_blank_service_rejected() {
        let config = ManagerConfig::builder().service("  ").build();
        assert_eq!(config.validate(), Err(ConfigError::Empty { field: "service" }));
    }

    #[test]
    fn test_scheduler_interval_minimum() {
        let config = SchedulerConfig::builder().interval(Duration::from_millis(10)).build();
        assert!(matches!(config.validate(), Err(ConfigError::BelowMinimum { field: "interval", .. })));
    }

    #[test]
    fn test_window_bounds() {
        WindowConfig::default().validate().unwrap();
        let zero = WindowConfig::builder().validity(Duration::ZERO).build();
        assert!(matches!(zero.validate(), Err(ConfigError::BelowMinimum { field: "validity", .. })));
        let long = WindowConfig::builder().lead(Duration::from_secs(2 * 24 * 3600)).build();
        assert!(matches!(long.validate(), Err(ConfigError::Invalid { field: "lead", .. })));
    }

    #[test]
    fn test_ntp_defaults_target_authority_server() {
        let config: NtpConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.server, "time.afip.gov.ar:123");
        assert_eq!(config.timeout, Duration::from_secs(5));
        config.validate().unwrap();
    }
}
