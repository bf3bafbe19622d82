//! Ticket lifecycle manager.
//!
//! [`TicketManager`] guarantees that a tenant has a ticket valid at the
//! trusted instant, renewing it through the remote authority when it is
//! missing or expired.
//!
//! # Architecture
//!
//! ```text
//!                 ensure_valid_ticket(tenant)
//!                            │
//!            ┌───────────────▼────────────────┐
//!            │ provisioned? ── no ──► NotProvisioned
//!            └───────────────┬────────────────┘
//!                            │ TimeSource::now()
//!            ┌───────────────▼────────────────┐
//!            │ cache / store hit, not expired │──► return ticket
//!            └───────────────┬────────────────┘
//!                            │ per-tenant lock
//!            ┌───────────────▼────────────────┐
//!            │ re-check (another caller may   │──► return ticket
//!            │ have renewed meanwhile)        │
//!            └───────────────┬────────────────┘
//!                            │ renew
//!   write Request ─► sign ─► login (retry) ─► write Response ─► cache
//! ```
//!
//! # Per-tenant state machine
//!
//! `NoTicket → Renewing → Valid → Expired → Renewing → ...`. A failed
//! renewal leaves the previous response untouched, so the tenant falls back
//! to `NoTicket` or `Expired` and the next call tries again.
//!
//! # Concurrency
//!
//! Renewals for one tenant are serialized by an async mutex taken from a
//! lazily populated map that is never pruned; it is bounded by the number of
//! tenants. There is no lock across tenants. Every caller that finds no
//! valid ticket takes the lock and looks again before renewing, so one
//! successful renewal satisfies every caller with a single remote call.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Instant,
};

use chrono::{DateTime, Utc};
use moka::future::Cache;
use parking_lot::Mutex;
use serde::Serialize;
use ticketbroker_storage::{
    Credentials, Document, DocumentKind, KeyMaterial, KeyMaterialProvider, TenantId, TicketRequest,
    TicketResponse, TicketStore,
};
use tracing::{debug, error, info, warn};

use crate::{
    audit::{AuditAction, AuditEvent, AuditLogger, AuditResult, TracingAuditLogger, tenant_resource},
    clock::{TimeSource, TimeWindow},
    config::ManagerConfig,
    error::{AuthError, Result},
    metrics::TicketMetrics,
    remote::RemoteAuthClient,
    retry::RetryingAuthClient,
    signer::Signer,
};

/// Actor recorded on audit events emitted by the manager.
pub const AUDIT_ACTOR: &str = "ticket_manager";

type TenantLock = Arc<tokio::sync::Mutex<()>>;

/// What a lookup found for a tenant at a given instant.
enum Lookup {
    Valid(TicketResponse),
    Expired(DateTime<Utc>),
    Missing,
}

/// How [`TicketManager`] satisfied a request for a valid ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketSource {
    /// A stored or cached ticket was still valid.
    Existing,
    /// A new ticket was obtained from the authority.
    Renewed,
}

/// Result of [`TicketManager::provision_tenant`].
#[derive(Debug, Clone)]
pub struct ProvisionOutcome {
    /// The provisioned tenant.
    pub tenant: TenantId,
    /// The attempt to obtain a first ticket. A failure here does not undo
    /// provisioning.
    pub initial_ticket: Result<TicketResponse>,
}

impl ProvisionOutcome {
    /// Returns `true` if the tenant has a usable ticket.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.initial_ticket.is_ok()
    }
}

/// Snapshot of a tenant's key material and ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantStatus {
    /// The tenant.
    pub tenant: TenantId,
    /// A private key is stored.
    pub has_private_key: bool,
    /// A certificate is stored.
    pub has_certificate: bool,
    /// A response document is stored, parseable or not.
    pub has_ticket: bool,
    /// The stored response could not be parsed.
    pub ticket_corrupt: bool,
    /// The stored ticket is valid at the trusted instant.
    pub ticket_valid: bool,
    /// Expiration of the stored ticket.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Orchestrates time, signing, storage and the remote authority to keep one
/// valid ticket per tenant.
///
/// Build with [`TicketManager::builder`]. The remote client is wrapped in a
/// [`RetryingAuthClient`] configured from [`ManagerConfig::retry`].
pub struct TicketManager {
    store: Arc<dyn TicketStore>,
    keys: Arc<dyn KeyMaterialProvider>,
    signer: Arc<dyn Signer>,
    remote: RetryingAuthClient<Arc<dyn RemoteAuthClient>>,
    time: Arc<dyn TimeSource>,
    audit: Arc<dyn AuditLogger>,
    metrics: TicketMetrics,
    config: ManagerConfig,
    cache: Cache<TenantId, TicketResponse>,
    locks: Mutex<HashMap<TenantId, TenantLock>>,
}

fn default_audit_logger() -> Arc<dyn AuditLogger> {
    Arc::new(TracingAuditLogger)
}

#[bon::bon]
impl TicketManager {
    /// Creates a manager.
    ///
    /// # Arguments
    ///
    /// * `store` - Persists request and response documents.
    /// * `keys` - Tenant key material and registry.
    /// * `signer` - Produces the signed request.
    /// * `remote` - Exchanges the signed request for a ticket. Must not retry internally.
    /// * `time` - Trusted time for request windows and expiry checks.
    ///
    /// # Optional Fields
    ///
    /// * `audit` - Audit destination (default: [`TracingAuditLogger`]).
    /// * `metrics` - Shared counters (default: a fresh collector).
    /// * `config` - Service name, retry policy, cache size.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if `config` is invalid.
    #[builder]
    pub fn new(
        store: Arc<dyn TicketStore>,
        keys: Arc<dyn KeyMaterialProvider>,
        signer: Arc<dyn Signer>,
        remote: Arc<dyn RemoteAuthClient>,
        time: Arc<dyn TimeSource>,
        #[builder(default = default_audit_logger())] audit: Arc<dyn AuditLogger>,
        #[builder(default)] metrics: TicketMetrics,
        #[builder(default)] config: ManagerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let remote = RetryingAuthClient::new(remote, config.retry.clone()).with_metrics(metrics.clone());
        let cache = Cache::builder().max_capacity(config.cache_capacity).build();
        Ok(Self {
            store,
            keys,
            signer,
            remote,
            time,
            audit,
            metrics,
            config,
            cache,
            locks: Mutex::new(HashMap::new()),
        })
    }
}

impl TicketManager {
    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Shared lifecycle counters.
    #[must_use]
    pub fn metrics(&self) -> &TicketMetrics {
        &self.metrics
    }

    /// The trusted time source.
    #[must_use]
    pub fn time_source(&self) -> &Arc<dyn TimeSource> {
        &self.time
    }

    /// Returns a ticket valid at the trusted instant, renewing it if needed.
    ///
    /// A stored ticket is used only if its request document also exists; a
    /// tenant with no request on record, or no response at all, is renewed.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NotProvisioned`] if the tenant has no key material.
    /// - [`AuthError::Storage`] wrapping [`StorageError::Corrupt`](ticketbroker_storage::StorageError::Corrupt)
    ///   if the stored response cannot be parsed. Use [`renew`](Self::renew) to replace it.
    /// - Any renewal failure; the previous ticket is kept.
    #[tracing::instrument(skip(self, tenant), fields(tenant = %tenant))]
    pub async fn ensure_valid_ticket(&self, tenant: &TenantId) -> Result<TicketResponse> {
        self.ensure(tenant).await.map(|(ticket, _)| ticket)
    }

    /// Like [`ensure_valid_ticket`](Self::ensure_valid_ticket) but also
    /// reports whether a renewal happened.
    ///
    /// # Errors
    ///
    /// See [`ensure_valid_ticket`](Self::ensure_valid_ticket).
    pub async fn ensure(&self, tenant: &TenantId) -> Result<(TicketResponse, TicketSource)> {
        self.require_provisioned(tenant).await?;
        let window = self.time.now().await?;

        if let Lookup::Valid(ticket) = self.lookup(tenant, &window).await? {
            self.metrics.record_cache_hit();
            debug!(expires_at = %ticket.expiration_time, "valid ticket found");
            return Ok((ticket, TicketSource::Existing));
        }

        let lock = self.tenant_lock(tenant);
        let _guard = lock.lock().await;

        // Whatever was read before locking may predate a renewal that has
        // since completed.
        let window = self.time.now().await?;
        match self.lookup(tenant, &window).await? {
            Lookup::Valid(ticket) => {
                self.metrics.record_cache_hit();
                debug!(expires_at = %ticket.expiration_time, "ticket renewed by another caller");
                return Ok((ticket, TicketSource::Existing));
            },
            Lookup::Expired(expired_at) => {
                warn!(expired_at = %expired_at, instant = %window.instant, "stored ticket expired");
                let mut metadata = BTreeMap::new();
                metadata.insert("expired_at".to_owned(), expired_at.to_rfc3339());
                self.emit(AuditAction::TicketExpired, tenant, AuditResult::Success, metadata).await;
            },
            Lookup::Missing => {},
        }

        self.metrics.record_cache_miss();
        let ticket = self.renew_locked(tenant, &window).await?;
        Ok((ticket, TicketSource::Renewed))
    }

    /// Obtains a new ticket even if the current one is still valid.
    ///
    /// Runs under the same per-tenant lock as
    /// [`ensure_valid_ticket`](Self::ensure_valid_ticket). This is also how
    /// a corrupt stored response is replaced.
    ///
    /// # Errors
    ///
    /// [`AuthError::NotProvisioned`] or any renewal failure.
    #[tracing::instrument(skip(self, tenant), fields(tenant = %tenant))]
    pub async fn renew(&self, tenant: &TenantId) -> Result<TicketResponse> {
        self.require_provisioned(tenant).await?;
        let lock = self.tenant_lock(tenant);
        let _guard = lock.lock().await;
        let window = self.time.now().await?;
        self.renew_locked(tenant, &window).await
    }

    /// Returns the `Auth` block for a business call, renewing if needed.
    ///
    /// # Errors
    ///
    /// See [`ensure_valid_ticket`](Self::ensure_valid_ticket).
    #[tracing::instrument(skip(self, tenant), fields(tenant = %tenant))]
    pub async fn credentials(&self, tenant: &TenantId) -> Result<Credentials> {
        let ticket = self.ensure(tenant).await?.0;
        Ok(ticket.credentials(tenant))
    }

    /// Stores key material for a tenant and tries to obtain a first ticket.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] only if the key material cannot be
    /// stored. Ticket failures are reported in the outcome.
    #[tracing::instrument(skip(self, tenant, material), fields(tenant = %tenant))]
    pub async fn provision_tenant(
        &self,
        tenant: &TenantId,
        material: KeyMaterial,
    ) -> Result<ProvisionOutcome> {
        self.keys.provision(tenant, material).await?;
        info!("tenant provisioned");
        self.emit(AuditAction::TenantProvisioned, tenant, AuditResult::Success, BTreeMap::new())
            .await;

        let initial_ticket = self.ensure(tenant).await.map(|(ticket, _)| ticket);
        if let Err(err) = &initial_ticket {
            warn!(error = %err, error_kind = %err.kind(), "initial ticket not obtained");
        }
        Ok(ProvisionOutcome { tenant: tenant.clone(), initial_ticket })
    }

    /// Reports what is stored for a tenant.
    ///
    /// A corrupt response is reported, not raised.
    ///
    /// # Errors
    ///
    /// Returns an error if storage or the time source cannot be read.
    #[tracing::instrument(skip(self, tenant), fields(tenant = %tenant))]
    pub async fn tenant_status(&self, tenant: &TenantId) -> Result<TenantStatus> {
        let keys = self.keys.status(tenant).await?;
        let (has_ticket, ticket_corrupt, expires_at) = match self.store.read_response(tenant).await {
            Ok(Some(ticket)) => (true, false, Some(ticket.expiration_time)),
            Ok(None) => (false, false, None),
            Err(err) if err.is_corrupt() => (true, true, None),
            Err(err) => return Err(err.into()),
        };
        let ticket_valid = match expires_at {
            Some(expires_at) => !self.time.now().await?.is_expired(expires_at),
            None => false,
        };
        Ok(TenantStatus {
            tenant: tenant.clone(),
            has_private_key: keys.has_private_key,
            has_certificate: keys.has_certificate,
            has_ticket,
            ticket_corrupt,
            ticket_valid,
            expires_at,
        })
    }

    /// Deletes a tenant's key material and documents and drops its cached
    /// ticket.
    ///
    /// Returns `true` if any key material existed.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if deletion fails.
    #[tracing::instrument(skip(self, tenant), fields(tenant = %tenant))]
    pub async fn remove_tenant(&self, tenant: &TenantId) -> Result<bool> {
        let lock = self.tenant_lock(tenant);
        let _guard = lock.lock().await;

        let existed = self.keys.remove(tenant).await?;
        self.store.delete_all(tenant).await?;
        self.cache.invalidate(tenant).await;

        info!(existed, "tenant removed");
        let mut metadata = BTreeMap::new();
        metadata.insert("had_key_material".to_owned(), existed.to_string());
        self.emit(AuditAction::TenantRemoved, tenant, AuditResult::Success, metadata).await;
        Ok(existed)
    }

    /// Provisioned tenants in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the registry cannot be read.
    pub async fn list_tenants(&self) -> Result<Vec<TenantId>> {
        Ok(self.keys.list_tenants().await?)
    }

    async fn require_provisioned(&self, tenant: &TenantId) -> Result<()> {
        if self.keys.is_provisioned(tenant).await? {
            Ok(())
        } else {
            Err(AuthError::not_provisioned(tenant))
        }
    }

    fn tenant_lock(&self, tenant: &TenantId) -> TenantLock {
        Arc::clone(self.locks.lock().entry(tenant.clone()).or_default())
    }

    /// Cached ticket first, then the store. The cache only ever holds
    /// tickets whose request was on record.
    async fn lookup(&self, tenant: &TenantId, window: &TimeWindow) -> Result<Lookup> {
        if let Some(cached) = self.cache.get(tenant).await
            && !window.is_expired(cached.expiration_time)
        {
            return Ok(Lookup::Valid(cached));
        }

        if !self.store.exists(tenant, DocumentKind::Request).await? {
            debug!("no ticket request on record");
            return Ok(Lookup::Missing);
        }

        let stored = match self.store.read_response(tenant).await {
            Ok(stored) => stored,
            Err(err) => {
                if err.is_corrupt() {
                    error!(error = %err, "stored ticket response is corrupt");
                }
                return Err(err.into());
            },
        };

        Ok(match stored {
            Some(ticket) if !window.is_expired(ticket.expiration_time) => {
                self.cache.insert(tenant.clone(), ticket.clone()).await;
                Lookup::Valid(ticket)
            },
            Some(ticket) => Lookup::Expired(ticket.expiration_time),
            None => Lookup::Missing,
        })
    }

    /// Renews with the caller holding the tenant lock.
    async fn renew_locked(&self, tenant: &TenantId, window: &TimeWindow) -> Result<TicketResponse> {
        let started = Instant::now();
        match self.issue(tenant, window).await {
            Ok(ticket) => {
                self.cache.insert(tenant.clone(), ticket.clone()).await;
                self.metrics.record_renewal();
                info!(
                    expires_at = %ticket.expiration_time,
                    elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "ticket issued"
                );
                let mut metadata = BTreeMap::new();
                metadata.insert("expires_at".to_owned(), ticket.expiration_time.to_rfc3339());
                self.emit(AuditAction::TicketIssued, tenant, AuditResult::Success, metadata).await;
                Ok(ticket)
            },
            Err(err) => {
                let kind = err.kind();
                self.metrics.record_renewal_failure(kind);
                if err.needs_operator() {
                    error!(error = %err, error_kind = %kind, "ticket renewal failed, operator action required");
                } else {
                    warn!(error = %err, error_kind = %kind, "ticket renewal failed");
                }
                let mut metadata = BTreeMap::new();
                metadata.insert("error_kind".to_owned(), kind.to_string());
                self.emit(
                    AuditAction::RenewalFailed,
                    tenant,
                    AuditResult::Failure(err.to_string()),
                    metadata,
                )
                .await;
                Err(err)
            },
        }
    }

    /// Request, sign, login, persist.
    async fn issue(&self, tenant: &TenantId, window: &TimeWindow) -> Result<TicketResponse> {
        let request = TicketRequest::builder()
            .unique_id(window.unique_id())
            .generation_time(window.generation_time)
            .expiration_time(window.expiration_time)
            .service(self.config.service.as_str())
            .build();
        let request = Document::from(request);
        let payload = request.to_xml()?;
        self.store.write(tenant, &request).await?;

        let signed = {
            let material = self.keys.get(tenant).await.map_err(|err| {
                if err.is_not_found() { AuthError::not_provisioned(tenant) } else { err.into() }
            })?;
            self.signer.sign(payload.as_bytes(), &material)?
        };

        let ticket = self.remote.login(&signed).await?;
        self.store.write(tenant, &Document::from(ticket.clone())).await?;
        Ok(ticket)
    }

    async fn emit(
        &self,
        action: AuditAction,
        tenant: &TenantId,
        result: AuditResult,
        metadata: BTreeMap<String, String>,
    ) {
        let event = AuditEvent::builder()
            .actor(AUDIT_ACTOR)
            .action(action)
            .resource(tenant_resource(tenant))
            .result(result)
            .metadata(metadata)
            .build();
        self.audit.log(&event).await;
    }
}

impl std::fmt::Debug for TicketManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketManager")
            .field("config", &self.config)
            .field("cached_tickets", &self.cache.entry_count())
            .field("tenant_locks", &self.locks.lock().len())
            .finish_non_exhaustive()
    }
}
