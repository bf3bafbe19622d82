//! Shared test utilities for the ticket lifecycle.
//!
//! This module provides a controllable clock, a scripted remote client with
//! call counting and delays, a fake signer, an in-memory audit logger and a
//! generator for real RSA key material. It is feature-gated behind
//! `testutil` to prevent leaking into production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! ticketbroker-authn = { path = "../authn", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use ticketbroker_authn::testutil::{FakeSigner, ManualClock, ScriptedAuthClient};
//! ```

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    hash::MessageDigest,
    pkey::PKey,
    rsa::Rsa,
    x509::{X509Builder, X509NameBuilder},
};
use parking_lot::Mutex;
use ticketbroker_storage::{KeyMaterial, TicketResponse};

use crate::{
    audit::{AuditAction, AuditEvent, AuditLogger},
    clock::{TimeSource, TimeWindow},
    config::WindowConfig,
    error::{AuthError, Result},
    remote::{RemoteAuthClient, RemoteError},
    signer::Signer,
};

/// A [`TimeSource`] whose instant only moves when told to.
///
/// Clones share the same instant. Defaults to 2024-05-01T12:00:00Z.
#[derive(Clone)]
pub struct ManualClock {
    instant: Arc<Mutex<DateTime<Utc>>>,
    window: WindowConfig,
    failing: Arc<Mutex<bool>>,
}

impl Default for ManualClock {
    #[allow(clippy::expect_used)]
    fn default() -> Self {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("valid date");
        Self::new(start)
    }
}

impl ManualClock {
    /// Creates a clock fixed at `instant`.
    #[must_use]
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self {
            instant: Arc::new(Mutex::new(instant)),
            window: WindowConfig::default(),
            failing: Arc::new(Mutex::new(false)),
        }
    }

    /// The current instant.
    #[must_use]
    pub fn instant(&self) -> DateTime<Utc> {
        *self.instant.lock()
    }

    /// Moves the clock to `instant`.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.instant.lock() = instant;
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: TimeDelta) {
        *self.instant.lock() += by;
    }

    /// Makes subsequent reads fail with [`AuthError::TimeSource`].
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }
}

#[async_trait]
impl TimeSource for ManualClock {
    async fn now(&self) -> Result<TimeWindow> {
        if *self.failing.lock() {
            return Err(AuthError::time_source("manual clock set to fail"));
        }
        self.window.window_at(self.instant())
    }
}

#[derive(Default)]
struct ScriptState {
    results: VecDeque<std::result::Result<TicketResponse, RemoteError>>,
    requests: Vec<String>,
    delay: Option<Duration>,
}

/// A [`RemoteAuthClient`] that replays queued results in order.
///
/// Every call is counted and its signed request recorded. When the queue is
/// empty, calls fail with [`RemoteError::Unknown`] so an unexpected extra
/// call shows up as a test failure. Clones share the queue and counters.
#[derive(Clone, Default)]
pub struct ScriptedAuthClient {
    state: Arc<Mutex<ScriptState>>,
    calls: Arc<AtomicU32>,
}

impl ScriptedAuthClient {
    /// Creates a client with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful login.
    pub fn push_ok(&self, response: TicketResponse) {
        self.state.lock().results.push_back(Ok(response));
    }

    /// Queues a failed login.
    pub fn push_err(&self, err: RemoteError) {
        self.state.lock().results.push_back(Err(err));
    }

    /// Makes every call wait before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = Some(delay);
    }

    /// Number of `login` calls so far.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Signed requests received, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().requests.clone()
    }
}

#[async_trait]
impl RemoteAuthClient for ScriptedAuthClient {
    async fn login(&self, signed_request: &str) -> std::result::Result<TicketResponse, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = {
            let mut state = self.state.lock();
            state.requests.push(signed_request.to_owned());
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state
            .lock()
            .results
            .pop_front()
            .unwrap_or_else(|| Err(RemoteError::unknown("no scripted response left")))
    }
}

/// A [`Signer`] that base64-encodes the document with a fixed prefix.
///
/// Fails with [`AuthError::Signing`] when the private key is empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeSigner;

/// Prefix of every [`FakeSigner`] output.
pub const FAKE_SIGNATURE_PREFIX: &str = "fake-cms:";

impl Signer for FakeSigner {
    fn sign(&self, document: &[u8], material: &KeyMaterial) -> Result<String> {
        if material.private_key.is_empty() {
            return Err(AuthError::signing("empty private key"));
        }
        Ok(format!("{FAKE_SIGNATURE_PREFIX}{}", STANDARD.encode(document)))
    }
}

/// Decodes the document wrapped by [`FakeSigner`].
#[must_use]
pub fn fake_signed_document(signed: &str) -> Option<String> {
    let encoded = signed.strip_prefix(FAKE_SIGNATURE_PREFIX)?;
    String::from_utf8(STANDARD.decode(encoded).ok()?).ok()
}

/// An [`AuditLogger`] that keeps every event in memory.
#[derive(Clone, Default)]
pub struct RecordingAuditLogger {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl RecordingAuditLogger {
    /// Creates an empty logger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Actions of the recorded events, in order.
    #[must_use]
    pub fn actions(&self) -> Vec<AuditAction> {
        self.events.lock().iter().map(|e| e.action).collect()
    }
}

#[async_trait]
impl AuditLogger for RecordingAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Generates a 2048-bit RSA key and a matching self-signed certificate,
/// both PEM encoded.
///
/// # Panics
///
/// Panics if OpenSSL fails.
#[allow(clippy::expect_used)]
#[must_use]
pub fn generate_key_material(common_name: &str) -> KeyMaterial {
    let rsa = Rsa::generate(2048).expect("generate RSA key");
    let key = PKey::from_rsa(rsa).expect("wrap RSA key");

    let mut name = X509NameBuilder::new().expect("name builder");
    name.append_entry_by_text("CN", common_name).expect("set CN");
    name.append_entry_by_text("serialNumber", &format!("CUIT {common_name}")).expect("set serial");
    let name = name.build();

    let mut builder = X509Builder::new().expect("cert builder");
    builder.set_version(2).expect("set version");
    let serial = BigNum::from_u32(1).and_then(|n| n.to_asn1_integer()).expect("serial");
    builder.set_serial_number(&serial).expect("set serial");
    builder.set_subject_name(&name).expect("set subject");
    builder.set_issuer_name(&name).expect("set issuer");
    builder.set_pubkey(&key).expect("set pubkey");
    builder.set_not_before(&Asn1Time::days_from_now(0).expect("not before")).expect("set not before");
    builder.set_not_after(&Asn1Time::days_from_now(365).expect("not after")).expect("set not after");
    builder.sign(&key, MessageDigest::sha256()).expect("self-sign");
    let cert = builder.build();

    KeyMaterial::new(
        key.private_key_to_pem_pkcs8().expect("key PEM"),
        cert.to_pem().expect("cert PEM"),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use ticketbroker_storage::testutil::sample_response;

    use super::*;

    #[tokio::test]
    async fn test_manual_clock_moves_only_when_told() {
        let clock = ManualClock::default();
        let before = clock.now().await.unwrap();
        clock.advance(TimeDelta::hours(1));
        let after = clock.now().await.unwrap();
        assert_eq!(after.instant - before.instant, TimeDelta::hours(1));

        clock.set_failing(true);
        assert!(clock.check_ready().await.is_err());
    }

    #[tokio::test]
    async fn test_scripted_client_replays_in_order() {
        let client = ScriptedAuthClient::new();
        client.push_err(RemoteError::network("down"));
        client.push_ok(sample_response("T1", "S1", Utc::now()));

        assert!(client.login("a").await.is_err());
        assert_eq!(client.login("b").await.unwrap().token, "T1");
        assert!(matches!(client.login("c").await, Err(RemoteError::Unknown { .. })));
        assert_eq!(client.calls(), 3);
        assert_eq!(client.requests(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_fake_signer_round_trips_document() {
        let material = KeyMaterial::new(b"k".to_vec(), b"c".to_vec());
        let signed = FakeSigner.sign(b"<doc/>", &material).unwrap();
        assert_eq!(fake_signed_document(&signed).as_deref(), Some("<doc/>"));

        let empty = KeyMaterial::new(Vec::new(), b"c".to_vec());
        assert!(FakeSigner.sign(b"<doc/>", &empty).is_err());
    }
}
