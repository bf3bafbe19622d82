//! # Ticket Broker Authentication
//!
//! Per-tenant credential lifecycle for the tax authority's web services.
//!
//! This crate provides:
//! - **Lifecycle manager**: [`TicketManager`] keeps one valid token+sign ticket per tenant,
//!   renewing it on demand with at most one renewal in flight per tenant
//! - **Renewal scheduler**: [`RenewalScheduler`] sweeps every provisioned tenant on an interval
//! - **Trusted time**: [`SystemTimeSource`] and the SNTP-backed [`NtpTimeSource`]
//! - **CMS signing**: [`CmsSigner`] wraps the request in PKCS#7 SignedData
//! - **Remote retry**: [`RetryingAuthClient`] repeats network and transport failures
//!
//! The SOAP client for the authority lives in `ticketbroker-wsaa` and plugs in
//! through the [`RemoteAuthClient`] trait.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ticketbroker_authn::{
//!     CmsSigner, ManagerConfig, RemoteAuthClient, SystemTimeSource, TicketManager,
//! };
//! use ticketbroker_storage::{FileKeyMaterialProvider, FileStoreConfig, FileTicketStore, TenantId};
//!
//! # async fn example(remote: Arc<dyn RemoteAuthClient>) -> Result<(), Box<dyn std::error::Error>> {
//! let files = FileStoreConfig::builder().root("/var/lib/ticketbroker").build();
//! let manager = TicketManager::builder()
//!     .store(Arc::new(FileTicketStore::from_config(&files)))
//!     .keys(Arc::new(FileKeyMaterialProvider::from_config(&files)))
//!     .signer(Arc::new(CmsSigner::new()))
//!     .remote(remote)
//!     .time(Arc::new(SystemTimeSource::default()))
//!     .config(ManagerConfig::default())
//!     .build()?;
//!
//! let tenant: TenantId = "20304050607".parse()?;
//! let credentials = manager.credentials(&tenant).await?;
//! println!("sign is {} bytes", credentials.sign.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module (manual clock, scripted remote client, fake
//!   signer, recording audit logger, RSA key generation).
//! - **`failpoints`**: Activates the `remote-login` and `retry-before-sleep` fail points, and
//!   the storage crate's `ticket-store-write`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Audit trail for lifecycle events.
pub mod audit;
/// Trusted time sources.
pub mod clock;
/// Lifecycle configuration.
pub mod config;
/// Lifecycle error types.
pub mod error;
/// Ticket lifecycle manager.
pub mod manager;
/// Lifecycle counters.
pub mod metrics;
/// Remote authority client abstraction.
pub mod remote;
/// Retry decorator for remote calls.
pub mod retry;
/// Periodic renewal sweeps.
pub mod scheduler;
/// CMS signing.
pub mod signer;
/// Shared test utilities.
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;

// Re-export key types for convenience
pub use audit::{AuditLogger, NoopAuditLogger, TracingAuditLogger};
pub use clock::{NtpTimeSource, SystemTimeSource, TimeSource, TimeWindow};
pub use config::{ManagerConfig, NtpConfig, RetryConfig, SchedulerConfig, WindowConfig};
pub use error::{AuthError, ErrorKind, Result};
pub use manager::{ProvisionOutcome, TenantStatus, TicketManager, TicketSource};
pub use metrics::{TicketMetrics, TicketMetricsSnapshot};
pub use remote::{RemoteAuthClient, RemoteError};
pub use retry::{RetryingAuthClient, with_retry};
pub use scheduler::{RenewalScheduler, SweepReport};
pub use signer::{CmsSigner, Signer};
