//! Periodic renewal sweeps.
//!
//! [`RenewalScheduler`] walks every provisioned tenant on a fixed interval
//! and asks the [`TicketManager`] for a valid ticket, so business calls
//! rarely pay for a renewal. One tenant's failure is logged and the sweep
//! moves on to the next.
//!
//! # Lifecycle
//!
//! ```text
//! new ──► start ──► [sweep] ─ interval ─► [sweep] ─ ... ─► shutdown
//!                     ▲
//!        sweep_now ───┘  (skipped while another sweep runs)
//! ```
//!
//! Sweeps never overlap: the background loop runs them inline, and a manual
//! [`sweep_now`](RenewalScheduler::sweep_now) or a tick that arrives while a
//! sweep is running is skipped. Ticks missed during a long sweep are not
//! replayed.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use parking_lot::Mutex;
use ticketbroker_storage::TenantId;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    config::SchedulerConfig,
    error::{AuthError, Result},
    manager::{TicketManager, TicketSource},
};

/// Outcome of one sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    /// Tenants that received a new ticket.
    pub renewed: Vec<TenantId>,
    /// Tenants whose ticket was still valid.
    pub valid: Vec<TenantId>,
    /// Tenants that failed, with the reason.
    pub failed: Vec<(TenantId, AuthError)>,
    /// Set when the tenant registry itself could not be read.
    pub listing_error: Option<AuthError>,
}

impl SweepReport {
    /// Number of tenants visited.
    #[must_use]
    pub fn total(&self) -> usize {
        self.renewed.len() + self.valid.len() + self.failed.len()
    }

    /// Returns `true` if nothing failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.listing_error.is_none()
    }
}

/// Clears the running flag when a sweep ends, including on panic.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Background sweeper over all provisioned tenants.
pub struct RenewalScheduler {
    manager: Arc<TicketManager>,
    config: SchedulerConfig,
    running: AtomicBool,
    cancel_token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RenewalScheduler {
    /// Creates a stopped scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if `config` is invalid.
    pub fn new(manager: Arc<TicketManager>, config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            manager,
            config,
            running: AtomicBool::new(false),
            cancel_token: CancellationToken::new(),
            handle: Mutex::new(None),
        })
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Returns `true` while a sweep is in progress.
    #[must_use]
    pub fn is_sweeping(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Returns `true` if the background loop is running.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.handle.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Spawns the background loop.
    ///
    /// With `run_on_start` the first sweep runs immediately, otherwise after
    /// one interval. Calling `start` on a running scheduler does nothing.
    pub fn start(self: Arc<Self>) -> Arc<Self> {
        let mut slot = self.handle.lock();
        if slot.is_some() {
            return Arc::clone(&self);
        }

        let scheduler = Arc::clone(&self);
        let token = self.cancel_token.clone();
        let interval = self.config.interval;
        let first = if self.config.run_on_start {
            tokio::time::Instant::now()
        } else {
            tokio::time::Instant::now() + interval
        };

        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(interval_secs = interval.as_secs(), "renewal scheduler started");

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!("renewal scheduler shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        scheduler.sweep_now().await;
                    }
                }
            }
        }));
        drop(slot);
        self
    }

    /// Runs one sweep now.
    ///
    /// Returns `None` without doing anything if a sweep is already running.
    #[tracing::instrument(name = "renewal_sweep", skip(self))]
    pub async fn sweep_now(&self) -> Option<SweepReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.manager.metrics().record_sweep_skipped();
            tracing::info!("sweep already running, skipping");
            return None;
        }
        let _running = RunningGuard(&self.running);
        Some(self.sweep().await)
    }

    async fn sweep(&self) -> SweepReport {
        let start = Instant::now();
        let mut report = SweepReport::default();

        let tenants = match self.manager.list_tenants().await {
            Ok(tenants) => tenants,
            Err(err) => {
                tracing::error!(error = %err, "could not enumerate tenants, sweep aborted");
                report.listing_error = Some(err);
                self.manager.metrics().record_sweep(0);
                return report;
            },
        };
        let total_tenants = tenants.len();

        for tenant in tenants {
            let span = tracing::info_span!("sweep_tenant", tenant = %tenant);
            match self.manager.ensure(&tenant).instrument(span).await {
                Ok((_, TicketSource::Existing)) => report.valid.push(tenant),
                Ok((_, TicketSource::Renewed)) => report.renewed.push(tenant),
                Err(err) => {
                    tracing::warn!(
                        tenant = %tenant,
                        error = %err,
                        error_kind = %err.kind(),
                        "tenant renewal failed, continuing sweep"
                    );
                    report.failed.push((tenant, err));
                },
            }
        }

        self.manager.metrics().record_sweep(report.failed.len() as u64);
        tracing::info!(
            renewed = report.renewed.len(),
            valid = report.valid.len(),
            failed = report.failed.len(),
            total_tenants,
            elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "renewal sweep complete"
        );
        report
    }

    /// Stops the background loop and waits for it to exit.
    ///
    /// A sweep already in progress runs to completion first.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            tracing::warn!(error = %err, "renewal scheduler task panicked");
        }
    }
}

impl std::fmt::Debug for RenewalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalScheduler")
            .field("config", &self.config)
            .field("sweeping", &self.is_sweeping())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::time::Duration;

    use chrono::TimeDelta;
    use ticketbroker_storage::{
        MemoryKeyMaterialProvider, MemoryTicketStore,
        testutil::{sample_response, tenant_id},
    };

    use super::*;
    use crate::{
        audit::NoopAuditLogger,
        testutil::{FakeSigner, ManualClock, ScriptedAuthClient},
    };

    fn manager(tenants: &[TenantId], remote: &ScriptedAuthClient) -> Arc<TicketManager> {
        Arc::new(
            TicketManager::builder()
                .store(Arc::new(MemoryTicketStore::new()))
                .keys(Arc::new(MemoryKeyMaterialProvider::with_tenants(tenants)))
                .signer(Arc::new(FakeSigner))
                .remote(Arc::new(remote.clone()))
                .time(Arc::new(ManualClock::default()))
                .audit(Arc::new(NoopAuditLogger))
                .build()
                .unwrap(),
        )
    }

    fn ticket(token: &str) -> ticketbroker_storage::TicketResponse {
        sample_response(token, "S", ManualClock::default().instant() + TimeDelta::hours(12))
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_sweep_is_skipped() {
        let tenant = tenant_id("20304050607");
        let remote = ScriptedAuthClient::new();
        remote.set_delay(Duration::from_millis(200));
        remote.push_ok(ticket("T1"));
        let manager = manager(std::slice::from_ref(&tenant), &remote);
        let scheduler = Arc::new(RenewalScheduler::new(manager, SchedulerConfig::default()).unwrap());

        let first = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.sweep_now().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(scheduler.is_sweeping());
        assert!(scheduler.sweep_now().await.is_none());

        let report = first.await.unwrap().unwrap();
        assert_eq!(report.renewed, vec![tenant]);
        assert!(!scheduler.is_sweeping());
        assert_eq!(scheduler.manager.metrics().snapshot().sweeps_skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_sweep_runs_on_start_then_on_interval() {
        let tenant = tenant_id("20304050607");
        let remote = ScriptedAuthClient::new();
        remote.push_ok(ticket("T1"));
        let manager = manager(std::slice::from_ref(&tenant), &remote);
        let config = SchedulerConfig::builder().interval(Duration::from_secs(3600)).build();
        let scheduler = Arc::new(RenewalScheduler::new(Arc::clone(&manager), config).unwrap()).start();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(remote.calls(), 1);
        assert_eq!(manager.metrics().snapshot().sweeps, 1);

        tokio::time::sleep(Duration::from_secs(3601)).await;
        assert_eq!(manager.metrics().snapshot().sweeps, 2);
        // Still valid at the manual clock's instant.
        assert_eq!(remote.calls(), 1);

        scheduler.shutdown().await;
        assert!(!scheduler.is_started());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_start_waits_one_interval() {
        let tenant = tenant_id("20304050607");
        let remote = ScriptedAuthClient::new();
        remote.push_ok(ticket("T1"));
        let manager = manager(std::slice::from_ref(&tenant), &remote);
        let config = SchedulerConfig::builder()
            .interval(Duration::from_secs(60))
            .run_on_start(false)
            .build();
        let scheduler = Arc::new(RenewalScheduler::new(manager, config).unwrap()).start();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(remote.calls(), 0);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(remote.calls(), 1);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_without_start_is_a_noop() {
        let remote = ScriptedAuthClient::new();
        let scheduler =
            RenewalScheduler::new(manager(&[], &remote), SchedulerConfig::default()).unwrap();
        scheduler.shutdown().await;
        let report = scheduler.sweep_now().await.unwrap();
        assert_eq!(report.total(), 0);
        assert!(report.is_clean());
    }

    #[test]
    fn test_invalid_interval_is_rejected() {
        let remote = ScriptedAuthClient::new();
        let config = SchedulerConfig::builder().interval(Duration::ZERO).build();
        assert!(matches!(
            RenewalScheduler::new(manager(&[], &remote), config),
            Err(AuthError::Config(_))
        ));
    }
}
