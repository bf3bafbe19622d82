//! Shared test utilities for ticket storage.
//!
//! This module provides helpers for building tenants and sample documents,
//! an instrumented store wrapper, and assertion macros for
//! [`StorageResult`] values. It is feature-gated behind `testutil` to
//! prevent leaking into production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! ticketbroker-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use ticketbroker_storage::testutil::{sample_response, tenant_id};
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::{
    error::{StorageError, StorageResult},
    store::{MemoryTicketStore, TicketStore},
    ticket::{Document, TicketRequest, TicketResponse},
    types::{DocumentKind, TenantId},
};

/// Parses a tenant identifier, panicking on invalid input.
///
/// # Panics
///
/// Panics if `raw` is not eleven digits.
#[allow(clippy::expect_used)]
#[must_use]
pub fn tenant_id(raw: &str) -> TenantId {
    TenantId::new(raw).expect("test tenant id must be 11 digits")
}

/// Builds a response with the given credentials that expires at `expires_at`.
#[must_use]
pub fn sample_response(token: &str, sign: &str, expires_at: DateTime<Utc>) -> TicketResponse {
    TicketResponse::builder()
        .source("CN=wsaahomo, O=AFIP, C=AR, SERIALNUMBER=CUIT 33693450239")
        .destination("SERIALNUMBER=CUIT 20304050607, CN=ticketbroker")
        .unique_id(expires_at.timestamp().unsigned_abs())
        .generation_time(expires_at - Duration::hours(12))
        .expiration_time(expires_at)
        .token(token)
        .sign(sign)
        .build()
}

/// Builds a request whose window starts at `generated_at`.
#[must_use]
pub fn sample_request(generated_at: DateTime<Utc>) -> TicketRequest {
    TicketRequest::builder()
        .unique_id(generated_at.timestamp().unsigned_abs())
        .generation_time(generated_at)
        .expiration_time(generated_at + Duration::minutes(20))
        .service("wsfe")
        .build()
}

/// A [`MemoryTicketStore`] wrapper that counts writes and can be told to
/// fail them.
///
/// Every recorded write is kept as `(tenant, kind)` so tests can assert on
/// the order in which documents were persisted.
#[derive(Clone, Default)]
pub struct RecordingTicketStore {
    inner: MemoryTicketStore,
    writes: Arc<Mutex<Vec<(TenantId, DocumentKind)>>>,
    reads: Arc<AtomicU32>,
    fail_response_writes: Arc<AtomicBool>,
}

impl RecordingTicketStore {
    /// Creates an empty recording store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapped memory store.
    #[must_use]
    pub fn inner(&self) -> &MemoryTicketStore {
        &self.inner
    }

    /// Makes subsequent response writes fail with an I/O error.
    pub fn fail_response_writes(&self, fail: bool) {
        self.fail_response_writes.store(fail, Ordering::SeqCst);
    }

    /// Writes recorded so far, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<(TenantId, DocumentKind)> {
        self.writes.lock().clone()
    }

    /// Number of `read` calls so far.
    #[must_use]
    pub fn read_count(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TicketStore for RecordingTicketStore {
    async fn exists(&self, tenant: &TenantId, kind: DocumentKind) -> StorageResult<bool> {
        self.inner.exists(tenant, kind).await
    }

    async fn read(&self, tenant: &TenantId, kind: DocumentKind) -> StorageResult<Document> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read(tenant, kind).await
    }

    async fn write(&self, tenant: &TenantId, document: &Document) -> StorageResult<()> {
        if document.kind() == DocumentKind::Response
            && self.fail_response_writes.load(Ordering::SeqCst)
        {
            return Err(StorageError::io("injected response write failure"));
        }
        self.writes.lock().push((tenant.clone(), document.kind()));
        self.inner.write(tenant, document).await
    }

    async fn delete_all(&self, tenant: &TenantId) -> StorageResult<()> {
        self.inner.delete_all(tenant).await
    }
}

/// Assert that a [`StorageResult`] is a [`StorageError::NotFound`].
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use ticketbroker_storage::{assert_not_found, StorageError, StorageResult};
///
/// let result: StorageResult<()> = Err(StorageError::not_found("missing"));
/// assert_not_found!(result);
/// ```
#[macro_export]
macro_rules! assert_not_found {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::NotFound { .. })),
            "expected StorageError::NotFound, got: {:?}",
            $result,
        );
    };
    ($result:expr, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::NotFound { .. })),
            "{}: expected StorageError::NotFound, got: {:?}",
            $msg,
            $result,
        );
    };
}

/// Assert that a [`StorageResult`] is a [`StorageError::Corrupt`].
#[macro_export]
macro_rules! assert_corrupt {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::Corrupt { .. })),
            "expected StorageError::Corrupt, got: {:?}",
            $result,
        );
    };
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_response_is_consistent() {
        let expires = Utc::now() + Duration::hours(1);
        let response = sample_response("T1", "S1", expires);
        assert_eq!(response.expiration_time, expires);
        assert!(response.generation_time.unwrap() < expires);
    }

    #[tokio::test]
    async fn test_recording_store_records_and_fails() {
        let store = RecordingTicketStore::new();
        let tenant = tenant_id("20304050607");
        let now = Utc::now();

        store.write(&tenant, &sample_request(now).into()).await.unwrap();
        store.fail_response_writes(true);
        let result = store.write(&tenant, &sample_response("T", "S", now).into()).await;

        assert!(matches!(result, Err(StorageError::Io { .. })));
        assert_eq!(store.writes(), vec![(tenant.clone(), DocumentKind::Request)]);
        assert_not_found!(store.read(&tenant, DocumentKind::Response).await);
        assert_eq!(store.read_count(), 1);
    }
}
