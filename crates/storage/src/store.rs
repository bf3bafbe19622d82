//! Storage trait for per-tenant ticket documents.
//!
//! This module provides the [`TicketStore`] trait that abstracts persistence
//! of the last ticket request and ticket response for each tenant.
//! Implementations can use different backends (filesystem for production,
//! in-memory for testing).
//!
//! # Layout
//!
//! ```text
//! tenant 20304050607 ──► { Request  ─► loginTicketRequest
//!                          Response ─► loginTicketResponse }
//! tenant 27111111112 ──► { Request  ─► ...
//!                          Response ─► ... }
//! ```
//!
//! Every location is derived from the tenant identity alone. Distinct
//! tenants never share a location, and each tenant holds at most one
//! document of each kind.
//!
//! # Usage
//!
//! ```
//! use chrono::{Duration, Utc};
//! use ticketbroker_storage::{
//!     Document, DocumentKind, MemoryTicketStore, TenantId, TicketResponse, TicketStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryTicketStore::new();
//!     let tenant: TenantId = "20304050607".parse()?;
//!
//!     let response = TicketResponse::builder()
//!         .token("T1")
//!         .sign("S1")
//!         .expiration_time(Utc::now() + Duration::hours(12))
//!         .build();
//!     store.write(&tenant, &Document::from(response)).await?;
//!
//!     assert!(store.exists(&tenant, DocumentKind::Response).await?);
//!     assert!(!store.exists(&tenant, DocumentKind::Request).await?);
//!     Ok(())
//! }
//! ```

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{
    error::{StorageError, StorageResult},
    ticket::{Document, TicketRequest, TicketResponse},
    types::{DocumentKind, TenantId},
};

/// Persistence layer for per-tenant ticket documents.
///
/// # Atomicity
///
/// `write` must be atomic from the point of view of concurrent readers: a
/// reader observes either the previous document or the new one, never a
/// partially written one.
///
/// # Error Handling
///
/// `read` fails with [`StorageError::NotFound`] when `exists` would return
/// `false`, and with [`StorageError::Corrupt`] when the stored bytes cannot
/// be parsed back into a document of the requested kind.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Returns `true` if a document of `kind` is stored for `tenant`.
    async fn exists(&self, tenant: &TenantId, kind: DocumentKind) -> StorageResult<bool>;

    /// Reads the document of `kind` stored for `tenant`.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if no such document exists
    /// - [`StorageError::Corrupt`] if it exists but cannot be parsed
    async fn read(&self, tenant: &TenantId, kind: DocumentKind) -> StorageResult<Document>;

    /// Stores `document` for `tenant`, replacing any document of the same
    /// kind. Missing intermediate structure is created.
    async fn write(&self, tenant: &TenantId, document: &Document) -> StorageResult<()>;

    /// Removes every document stored for `tenant`.
    ///
    /// Succeeds if the tenant has no documents.
    async fn delete_all(&self, tenant: &TenantId) -> StorageResult<()>;

    /// Reads the stored response, mapping a missing document to `None`.
    ///
    /// Corrupt documents are still reported as errors.
    async fn read_response(&self, tenant: &TenantId) -> StorageResult<Option<TicketResponse>> {
        match self.read(tenant, DocumentKind::Response).await {
            Ok(document) => Ok(document.into_response()),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Reads the stored request, mapping a missing document to `None`.
    async fn read_request(&self, tenant: &TenantId) -> StorageResult<Option<TicketRequest>> {
        match self.read(tenant, DocumentKind::Request).await {
            Ok(document) => Ok(document.into_request()),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Name of a tenant's document in error messages and logs.
pub(crate) fn resource_name(tenant: &TenantId, kind: DocumentKind) -> String {
    format!("{tenant}/{kind}")
}

/// In-memory implementation of [`TicketStore`] for testing.
///
/// Documents are kept in their serialized XML form, so reads go through the
/// same parser as the file backend and corrupt documents can be injected
/// with [`insert_raw`](Self::insert_raw).
///
/// Cloning is cheap; clones share the same underlying map.
#[derive(Clone, Default)]
pub struct MemoryTicketStore {
    documents: Arc<RwLock<HashMap<(TenantId, DocumentKind), String>>>,
}

impl MemoryTicketStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores raw bytes for a document, bypassing serialization.
    pub fn insert_raw(&self, tenant: &TenantId, kind: DocumentKind, xml: impl Into<String>) {
        self.documents.write().insert((tenant.clone(), kind), xml.into());
    }

    /// Returns the raw stored XML for a document, if any.
    #[must_use]
    pub fn raw(&self, tenant: &TenantId, kind: DocumentKind) -> Option<String> {
        self.documents.read().get(&(tenant.clone(), kind)).cloned()
    }

    /// Number of stored documents across all tenants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    /// Returns `true` if no documents are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    async fn exists(&self, tenant: &TenantId, kind: DocumentKind) -> StorageResult<bool> {
        Ok(self.documents.read().contains_key(&(tenant.clone(), kind)))
    }

    async fn read(&self, tenant: &TenantId, kind: DocumentKind) -> StorageResult<Document> {
        let resource = resource_name(tenant, kind);
        let xml = self
            .documents
            .read()
            .get(&(tenant.clone(), kind))
            .cloned()
            .ok_or_else(|| StorageError::not_found(resource.clone()))?;
        Document::parse(kind, &xml, &resource)
    }

    async fn write(&self, tenant: &TenantId, document: &Document) -> StorageResult<()> {
        let xml = document.to_xml()?;
        self.documents.write().insert((tenant.clone(), document.kind()), xml);
        Ok(())
    }

    async fn delete_all(&self, tenant: &TenantId) -> StorageResult<()> {
        self.documents.write().retain(|(t, _), _| t != tenant);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;

    fn tenant(raw: &str) -> TenantId {
        TenantId::new(raw).unwrap()
    }

    fn response(token: &str) -> TicketResponse {
        TicketResponse::builder()
            .token(token)
            .sign("S1")
            .expiration_time(Utc.with_ymd_and_hms(2030, 1, 1, 12, 0, 0).unwrap())
            .build()
    }

    #[tokio::test]
    async fn test_write_then_read_round_trips() {
        let store = MemoryTicketStore::new();
        let a = tenant("20304050607");
        store.write(&a, &response("T1").into()).await.unwrap();

        let read = store.read_response(&a).await.unwrap().unwrap();
        assert_eq!(read.token, "T1");
        assert_eq!(read.sign, "S1");
        assert_eq!(read.expiration_time, response("T1").expiration_time);
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let store = MemoryTicketStore::new();
        let a = tenant("20304050607");
        let b = tenant("27111111112");
        store.write(&a, &response("T1").into()).await.unwrap();

        let err = store.read(&b, DocumentKind::Response).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!store.exists(&b, DocumentKind::Response).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_overwrites() {
        let store = MemoryTicketStore::new();
        let a = tenant("20304050607");
        store.write(&a, &response("T1").into()).await.unwrap();
        store.write(&a, &response("T2").into()).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.read_response(&a).await.unwrap().unwrap().token, "T2");
    }

    #[tokio::test]
    async fn test_corrupt_document_is_reported() {
        let store = MemoryTicketStore::new();
        let a = tenant("20304050607");
        store.insert_raw(&a, DocumentKind::Response, "<loginTicketResponse/>");

        assert!(store.exists(&a, DocumentKind::Response).await.unwrap());
        let err = store.read_response(&a).await.unwrap_err();
        assert!(err.is_corrupt());
        assert!(err.to_string().contains("20304050607/response"));
    }

    #[tokio::test]
    async fn test_delete_all_only_touches_one_tenant() {
        let store = MemoryTicketStore::new();
        let a = tenant("20304050607");
        let b = tenant("27111111112");
        let request = TicketRequest::builder()
            .unique_id(1)
            .generation_time(Utc::now())
            .expiration_time(Utc::now() + Duration::minutes(10))
            .service("wsfe")
            .build();
        store.write(&a, &request.into()).await.unwrap();
        store.write(&a, &response("T1").into()).await.unwrap();
        store.write(&b, &response("T2").into()).await.unwrap();

        store.delete_all(&a).await.unwrap();

        assert!(store.read_request(&a).await.unwrap().is_none());
        assert!(store.read_response(&a).await.unwrap().is_none());
        assert_eq!(store.read_response(&b).await.unwrap().unwrap().token, "T2");
    }
}
