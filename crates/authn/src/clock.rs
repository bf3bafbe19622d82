//! Trusted time for ticket requests and expiry checks.
//!
//! Every lifecycle decision is taken against a single [`TimeWindow`] read
//! from a [`TimeSource`]: the request's generation and expiration times are
//! derived from its `instant`, and stored tickets are judged expired against
//! that same `instant`, never against the caller's wall clock.
//!
//! Two sources are provided:
//!
//! - [`SystemTimeSource`] reads the host clock.
//! - [`NtpTimeSource`] queries an SNTP server (the authority's own time
//!   server by default), for hosts whose clock may drift.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::net::UdpSocket;

use crate::{
    config::{NtpConfig, WindowConfig},
    error::{AuthError, Result},
};

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET: i64 = 2_208_988_800;

/// Size of an SNTP packet without extensions.
const SNTP_PACKET_LEN: usize = 48;

/// A trusted instant and the request validity window derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    /// The trusted current time.
    pub instant: DateTime<Utc>,
    /// Start of the request window.
    pub generation_time: DateTime<Utc>,
    /// End of the request window.
    pub expiration_time: DateTime<Utc>,
}

impl TimeWindow {
    /// Returns `true` if `expiration` is at or before this window's instant.
    #[must_use]
    pub fn is_expired(&self, expiration: DateTime<Utc>) -> bool {
        self.instant >= expiration
    }

    /// Nonce for a request built from this window: the instant in Unix
    /// seconds.
    #[must_use]
    pub fn unique_id(&self) -> u64 {
        self.instant.timestamp().unsigned_abs()
    }
}

impl WindowConfig {
    /// Builds the window around `instant`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TimeSource`] if a bound does not fit in a
    /// timestamp.
    pub fn window_at(&self, instant: DateTime<Utc>) -> Result<TimeWindow> {
        let lead = to_delta(self.lead)?;
        let validity = to_delta(self.validity)?;
        let generation_time = instant
            .checked_sub_signed(lead)
            .ok_or_else(|| AuthError::time_source("window start out of range"))?;
        let expiration_time = instant
            .checked_add_signed(validity)
            .ok_or_else(|| AuthError::time_source("window end out of range"))?;
        Ok(TimeWindow { instant, generation_time, expiration_time })
    }
}

fn to_delta(d: Duration) -> Result<TimeDelta> {
    TimeDelta::from_std(d).map_err(|e| AuthError::time_source_with_source("window bound", e))
}

/// Supplies the trusted current time and request window.
#[async_trait]
pub trait TimeSource: Send + Sync {
    /// Reads the trusted time.
    async fn now(&self) -> Result<TimeWindow>;

    /// Returns `true` if `expiration` has passed at the trusted instant.
    async fn is_expired(&self, expiration: DateTime<Utc>) -> Result<bool> {
        Ok(self.now().await?.is_expired(expiration))
    }

    /// Verifies the source can currently be read.
    async fn check_ready(&self) -> Result<()> {
        self.now().await.map(|_| ())
    }
}

#[async_trait]
impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    async fn now(&self) -> Result<TimeWindow> {
        (**self).now().await
    }
}

/// Host clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource {
    window: WindowConfig,
}

impl SystemTimeSource {
    /// Creates a host clock source with the given request window.
    #[must_use]
    pub fn new(window: WindowConfig) -> Self {
        Self { window }
    }
}

#[async_trait]
impl TimeSource for SystemTimeSource {
    async fn now(&self) -> Result<TimeWindow> {
        self.window.window_at(Utc::now())
    }
}

/// SNTP client time source.
///
/// Each call to [`now`](TimeSource::now) performs one query; there is no
/// local offset caching.
#[derive(Debug, Clone)]
pub struct NtpTimeSource {
    config: NtpConfig,
}

impl NtpTimeSource {
    /// Creates a source after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the configuration is invalid.
    pub fn new(config: NtpConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &NtpConfig {
        &self.config
    }

    /// Queries the server once and returns its transmit time.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TimeSource`] on I/O failure, timeout or an
    /// unusable reply.
    #[tracing::instrument(skip(self), fields(server = %self.config.server))]
    pub async fn query(&self) -> Result<DateTime<Utc>> {
        let exchange = async {
            let socket = UdpSocket::bind("0.0.0.0:0").await?;
            socket.connect(self.config.server.as_str()).await?;
            let mut packet = [0u8; SNTP_PACKET_LEN];
            // LI = 0, VN = 3, Mode = 3 (client)
            packet[0] = 0x1B;
            socket.send(&packet).await?;
            let mut reply = [0u8; SNTP_PACKET_LEN];
            let len = socket.recv(&mut reply).await?;
            Ok::<_, std::io::Error>((reply, len))
        };

        let (reply, len) = tokio::time::timeout(self.config.timeout, exchange)
            .await
            .map_err(|_| {
                AuthError::time_source(format!(
                    "no reply from {} within {}ms",
                    self.config.server,
                    self.config.timeout.as_millis()
                ))
            })?
            .map_err(|e| AuthError::time_source_with_source("time server exchange failed", e))?;

        let time = parse_sntp_reply(&reply[..len])?;
        tracing::debug!(ntp_time = %time, "time server replied");
        Ok(time)
    }
}

#[async_trait]
impl TimeSource for NtpTimeSource {
    async fn now(&self) -> Result<TimeWindow> {
        let instant = self.query().await?;
        self.config.window.window_at(instant)
    }
}

/// Extracts the transmit timestamp from an SNTP server reply.
///
/// # Errors
///
/// Returns [`AuthError::TimeSource`] if the reply is short, not from a
/// server, a kiss-of-death packet, or carries a zero timestamp.
pub fn parse_sntp_reply(reply: &[u8]) -> Result<DateTime<Utc>> {
    if reply.len() < SNTP_PACKET_LEN {
        return Err(AuthError::time_source(format!(
            "short reply: {} of {SNTP_PACKET_LEN} bytes",
            reply.len()
        )));
    }
    let mode = reply[0] & 0x07;
    if mode != 4 && mode != 5 {
        return Err(AuthError::time_source(format!("unexpected mode {mode} in reply")));
    }
    if reply[1] == 0 {
        return Err(AuthError::time_source("kiss-of-death reply"));
    }

    let seconds = u32::from_be_bytes([reply[40], reply[41], reply[42], reply[43]]);
    let fraction = u32::from_be_bytes([reply[44], reply[45], reply[46], reply[47]]);
    if seconds == 0 {
        return Err(AuthError::time_source("zero transmit timestamp"));
    }

    let unix = i64::from(seconds) - NTP_UNIX_OFFSET;
    let nanos = ((u64::from(fraction) * 1_000_000_000) >> 32) as u32;
    DateTime::from_timestamp(unix, nanos)
        .ok_or_else(|| AuthError::time_source("transmit timestamp out of range"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;

    fn reply_for(unix: i64, fraction: u32) -> [u8; SNTP_PACKET_LEN] {
        let mut reply = [0u8; SNTP_PACKET_LEN];
        reply[0] = 0x1C; // VN 3, server
        reply[1] = 2; // stratum
        let seconds = u32::try_from(unix + NTP_UNIX_OFFSET).unwrap();
        reply[40..44].copy_from_slice(&seconds.to_be_bytes());
        reply[44..48].copy_from_slice(&fraction.to_be_bytes());
        reply
    }

    #[test]
    fn test_window_is_built_around_instant() {
        let instant = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let window = WindowConfig::default().window_at(instant).unwrap();
        assert_eq!(window.generation_time, Utc.with_ymd_and_hms(2024, 5, 1, 11, 50, 0).unwrap());
        assert_eq!(window.expiration_time, Utc.with_ymd_and_hms(2024, 5, 1, 12, 10, 0).unwrap());
        assert_eq!(window.unique_id(), instant.timestamp() as u64);
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let instant = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let window = WindowConfig::default().window_at(instant).unwrap();
        assert!(window.is_expired(instant));
        assert!(window.is_expired(instant - TimeDelta::seconds(1)));
        assert!(!window.is_expired(instant + TimeDelta::seconds(1)));
    }

    proptest! {
        #[test]
        fn prop_expired_iff_not_after_instant(offset in -86_400i64..86_400) {
            let instant = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
            let window = WindowConfig::default().window_at(instant).unwrap();
            let expiration = instant + TimeDelta::seconds(offset);
            prop_assert_eq!(window.is_expired(expiration), offset <= 0);
        }
    }

    #[tokio::test]
    async fn test_system_source_is_ready() {
        let source = SystemTimeSource::default();
        source.check_ready().await.unwrap();
        let window = source.now().await.unwrap();
        assert!(window.generation_time < window.instant);
        assert!(!source.is_expired(window.expiration_time).await.unwrap());
    }

    #[test]
    fn test_parse_reply_reads_transmit_timestamp() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        // 0x8000_0000 is half a second
        let parsed = parse_sntp_reply(&reply_for(expected.timestamp(), 0x8000_0000)).unwrap();
        assert_eq!(parsed, expected + TimeDelta::milliseconds(500));
    }

    #[test]
    fn test_parse_reply_rejects_bad_packets() {
        assert!(parse_sntp_reply(&[0u8; 12]).is_err());

        let mut client_mode = reply_for(1_700_000_000, 0);
        client_mode[0] = 0x1B;
        assert!(parse_sntp_reply(&client_mode).is_err());

        let mut kiss = reply_for(1_700_000_000, 0);
        kiss[1] = 0;
        assert!(parse_sntp_reply(&kiss).is_err());

        let mut zero = reply_for(1_700_000_000, 0);
        zero[40..44].copy_from_slice(&[0, 0, 0, 0]);
        assert!(parse_sntp_reply(&zero).is_err());
    }

    #[tokio::test]
    async fn test_ntp_source_queries_server() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; SNTP_PACKET_LEN];
            let (_, peer) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(buf[0], 0x1B);
            server.send_to(&reply_for(expected.timestamp(), 0), peer).await.unwrap();
        });

        let config = NtpConfig::builder().server(addr.to_string()).build();
        let source = NtpTimeSource::new(config).unwrap();
        let window = source.now().await.unwrap();
        assert_eq!(window.instant, expected);
        assert_eq!(window.expiration_time, expected + TimeDelta::minutes(10));
    }

    #[tokio::test]
    async fn test_ntp_source_times_out() {
        // Bound but silent
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = NtpConfig::builder()
            .server(silent.local_addr().unwrap().to_string())
            .timeout(Duration::from_millis(50))
            .build();
        let source = NtpTimeSource::new(config).unwrap();
        let err = source.check_ready().await.unwrap_err();
        assert!(matches!(err, AuthError::TimeSource { .. }), "got {err:?}");
    }
}
