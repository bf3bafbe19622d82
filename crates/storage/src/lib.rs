//! Per-tenant ticket documents and key material for the ticket broker.
//!
//! This crate provides the [`TicketStore`] and [`KeyMaterialProvider`]
//! traits and the document types they persist. The lifecycle manager in
//! `ticketbroker-authn` is written against these traits only, so tests run
//! against the in-memory backends and production uses the filesystem ones.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TicketManager (authn)                     │
//! │        ensure_valid_ticket, renew, provision, remove        │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │         TicketStore          │     KeyMaterialProvider      │
//! │  exists, read, write,        │  get, status, provision,     │
//! │  delete_all                  │  remove, list_tenants        │
//! ├──────────────┬───────────────┼──────────────┬───────────────┤
//! │ MemoryTicket │ FileTicket    │ MemoryKey    │ FileKey       │
//! │ Store        │ Store         │ Material     │ Material      │
//! │ (testing)    │ (production)  │ Provider     │ Provider      │
//! └──────────────┴───────────────┴──────────────┴───────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use chrono::{Duration, Utc};
//! use ticketbroker_storage::{MemoryTicketStore, TenantId, TicketResponse, TicketStore};
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
//!     store.write(&tenant, &response.into()).await?;
//!
//!     let stored = store.read_response(&tenant).await?.expect("just written");
//!     assert_eq!(stored.token, "T1");
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! All operations return [`StorageResult<T>`]. Backends map their internal
//! errors to [`StorageError`]; unparseable documents surface as
//! [`StorageError::Corrupt`] and are never silently replaced.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with shared test helpers (tenant and document
//!   builders, a recording store, assertion macros). Enable this in `[dev-dependencies]` for
//!   integration tests.
//! - **`failpoints`**: Activates the `ticket-store-write` fail point in [`FileTicketStore`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod file;
pub mod keys;
pub mod store;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod ticket;
pub mod types;

// Re-export primary types at crate root for convenience
pub use config::FileStoreConfig;
pub use error::{BoxError, ConfigError, StorageError, StorageResult};
pub use file::FileTicketStore;
pub use keys::{
    FileKeyMaterialProvider, KeyMaterial, KeyMaterialProvider, KeyMaterialStatus,
    MemoryKeyMaterialProvider,
};
pub use store::{MemoryTicketStore, TicketStore};
pub use ticket::{Credentials, Document, TicketRequest, TicketResponse};
pub use types::{DocumentKind, TENANT_ID_LEN, TenantId};
pub use zeroize::Zeroizing;
