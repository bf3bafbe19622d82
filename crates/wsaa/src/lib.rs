//! # Ticket Broker SOAP Clients
//!
//! HTTP clients for the tax authority's web services.
//!
//! - [`WsaaClient`] calls `loginCms` on the authentication service and plugs
//!   into [`TicketManager`](ticketbroker_authn::TicketManager) as its
//!   [`RemoteAuthClient`](ticketbroker_authn::RemoteAuthClient).
//! - [`WsfeClient`] forwards authenticated business calls to the electronic
//!   invoicing service and probes its health with `FEDummy`.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ TicketManager ── RetryingAuthClient          │  ticketbroker-authn
//! ├──────────────────────────────────────────────┤
//! │ WsaaClient (loginCms)  │  WsfeClient (wsfev1) │  ticketbroker-wsaa
//! ├──────────────────────────────────────────────┤
//! │ soap: envelope builders, fault/result parser │
//! ├──────────────────────────────────────────────┤
//! │ reqwest (rustls)                             │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ticketbroker_authn::{CmsSigner, SystemTimeSource, TicketManager};
//! use ticketbroker_storage::{FileKeyMaterialProvider, FileStoreConfig, FileTicketStore, TenantId};
//! use ticketbroker_wsaa::{Environment, WsaaClient, WsaaConfig, WsfeClient, WsfeConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let remote = WsaaClient::new(&WsaaConfig::builder().environment(Environment::Testing).build())?;
//! let files = FileStoreConfig::builder().root("/var/lib/ticketbroker").build();
//! let manager = TicketManager::builder()
//!     .store(Arc::new(FileTicketStore::from_config(&files)))
//!     .keys(Arc::new(FileKeyMaterialProvider::from_config(&files)))
//!     .signer(Arc::new(CmsSigner::new()))
//!     .remote(Arc::new(remote))
//!     .time(Arc::new(SystemTimeSource::default()))
//!     .build()?;
//!
//! let tenant: TenantId = "20304050607".parse()?;
//! let credentials = manager.credentials(&tenant).await?;
//!
//! let wsfe = WsfeClient::new(&WsfeConfig::default())?;
//! let body = "<ar:PtoVta>1</ar:PtoVta><ar:CbteTipo>6</ar:CbteTipo>";
//! let raw = wsfe.forward("FECompUltimoAutorizado", &credentials, body).await?;
//! println!("{raw}");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// `loginCms` client.
pub mod client;
/// Endpoint and transport configuration.
pub mod config;
/// Error types.
pub mod error;
/// SOAP envelope codec.
pub mod soap;
/// Invoicing service client.
pub mod wsfe;

pub use client::WsaaClient;
pub use config::{Environment, WsaaConfig, WsfeConfig};
pub use error::{Result, WsaaError};
pub use soap::DummyStatus;
pub use wsfe::WsfeClient;
