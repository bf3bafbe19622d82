//! Ticket lifecycle counters.
//!
//! [`TicketMetrics`] is a cheaply cloneable handle over a set of atomic
//! counters shared by the manager, the retry decorator and the scheduler.
//! All counters use `Ordering::Relaxed`; a [`TicketMetricsSnapshot`] is a
//! best-effort view, not a point-in-time transaction.
//!
//! ```
//! use ticketbroker_authn::TicketMetrics;
//!
//! let metrics = TicketMetrics::new();
//! metrics.record_cache_hit();
//! metrics.record_renewal();
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.cache_hits, 1);
//! assert_eq!(snapshot.renewals, 1);
//! ```

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;

use crate::error::ErrorKind;

/// Shared lifecycle counters.
#[derive(Clone)]
pub struct TicketMetrics {
    inner: Arc<TicketMetricsInner>,
}

#[derive(Default)]
struct TicketMetricsInner {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    renewals: AtomicU64,
    renewal_failures: AtomicU64,
    failures_by_kind: Mutex<HashMap<ErrorKind, u64>>,
    remote_attempts: AtomicU64,
    retries: AtomicU64,
    retry_exhausted: AtomicU64,
    sweeps: AtomicU64,
    sweeps_skipped: AtomicU64,
    sweep_tenant_failures: AtomicU64,
}

/// Point-in-time copy of [`TicketMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct TicketMetricsSnapshot {
    /// Calls answered from a valid stored or cached ticket.
    #[builder(default)]
    pub cache_hits: u64,
    /// Calls that found no valid ticket.
    #[builder(default)]
    pub cache_misses: u64,
    /// Successful renewals.
    #[builder(default)]
    pub renewals: u64,
    /// Failed renewals.
    #[builder(default)]
    pub renewal_failures: u64,
    /// Failed renewals broken down by error kind.
    #[builder(default)]
    pub failures_by_kind: HashMap<ErrorKind, u64>,
    /// Remote login calls, including retries.
    #[builder(default)]
    pub remote_attempts: u64,
    /// Remote calls repeated after a retryable failure.
    #[builder(default)]
    pub retries: u64,
    /// Retry budgets used up without success.
    #[builder(default)]
    pub retry_exhausted: u64,
    /// Completed sweeps.
    #[builder(default)]
    pub sweeps: u64,
    /// Sweeps skipped because one was already running.
    #[builder(default)]
    pub sweeps_skipped: u64,
    /// Tenants that failed inside a sweep.
    #[builder(default)]
    pub sweep_tenant_failures: u64,
}

impl TicketMetricsSnapshot {
    /// Fraction of ticket lookups served without renewal (0.0 - 1.0).
    #[must_use]
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 { 0.0 } else { self.cache_hits as f64 / total as f64 }
    }

    /// Fraction of renewals that failed (0.0 - 1.0).
    #[must_use]
    pub fn renewal_failure_rate(&self) -> f64 {
        let total = self.renewals + self.renewal_failures;
        if total == 0 { 0.0 } else { self.renewal_failures as f64 / total as f64 }
    }
}

impl TicketMetrics {
    /// Creates a zeroed collector.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Arc::new(TicketMetricsInner::default()) }
    }

    /// Records a lookup served by a valid ticket.
    pub fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a lookup that needed renewal.
    pub fn record_cache_miss(&self) {
        self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful renewal.
    pub fn record_renewal(&self) {
        self.inner.renewals.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed renewal of the given kind.
    pub fn record_renewal_failure(&self, kind: ErrorKind) {
        self.inner.renewal_failures.fetch_add(1, Ordering::Relaxed);
        *self.inner.failures_by_kind.lock().entry(kind).or_insert(0) += 1;
    }

    /// Records one remote login call.
    pub fn record_remote_attempt(&self) {
        self.inner.remote_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a retry after a retryable failure.
    pub fn record_retry(&self) {
        self.inner.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an exhausted retry budget.
    pub fn record_retry_exhausted(&self) {
        self.inner.retry_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a completed sweep and how many tenants failed in it.
    pub fn record_sweep(&self, failed_tenants: u64) {
        self.inner.sweeps.fetch_add(1, Ordering::Relaxed);
        self.inner.sweep_tenant_failures.fetch_add(failed_tenants, Ordering::Relaxed);
    }

    /// Records a sweep skipped due to overlap.
    pub fn record_sweep_skipped(&self) {
        self.inner.sweeps_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> TicketMetricsSnapshot {
        let i = &self.inner;
        TicketMetricsSnapshot {
            cache_hits: i.cache_hits.load(Ordering::Relaxed),
            cache_misses: i.cache_misses.load(Ordering::Relaxed),
            renewals: i.renewals.load(Ordering::Relaxed),
            renewal_failures: i.renewal_failures.load(Ordering::Relaxed),
            failures_by_kind: i.failures_by_kind.lock().clone(),
            remote_attempts: i.remote_attempts.load(Ordering::Relaxed),
            retries: i.retries.load(Ordering::Relaxed),
            retry_exhausted: i.retry_exhausted.load(Ordering::Relaxed),
            sweeps: i.sweeps.load(Ordering::Relaxed),
            sweeps_skipped: i.sweeps_skipped.load(Ordering::Relaxed),
            sweep_tenant_failures: i.sweep_tenant_failures.load(Ordering::Relaxed),
        }
    }

    /// Logs the current counters at INFO level, and a warning when more
    /// than a tenth of renewals fail.
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            cache_hits = snapshot.cache_hits,
            cache_misses = snapshot.cache_misses,
            cache_hit_rate = snapshot.cache_hit_rate(),
            renewals = snapshot.renewals,
            renewal_failures = snapshot.renewal_failures,
            remote_attempts = snapshot.remote_attempts,
            retries = snapshot.retries,
            retry_exhausted = snapshot.retry_exhausted,
            sweeps = snapshot.sweeps,
            sweeps_skipped = snapshot.sweeps_skipped,
            "Ticket metrics snapshot"
        );
        if snapshot.renewal_failure_rate() > 0.10 {
            tracing::warn!(
                renewal_failure_rate = snapshot.renewal_failure_rate(),
                renewal_failures = snapshot.renewal_failures,
                "High ticket renewal failure rate detected"
            );
        }
    }
}

impl Default for TicketMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TicketMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketMetrics").field("snapshot", &self.snapshot()).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_counters() {
        let metrics = TicketMetrics::new();
        let clone = metrics.clone();
        clone.record_remote_attempt();
        clone.record_retry();
        assert_eq!(metrics.snapshot().remote_attempts, 1);
        assert_eq!(metrics.snapshot().retries, 1);
    }

    #[test]
    fn test_failures_are_counted_by_kind() {
        let metrics = TicketMetrics::new();
        metrics.record_renewal_failure(ErrorKind::Network);
        metrics.record_renewal_failure(ErrorKind::Network);
        metrics.record_renewal_failure(ErrorKind::Signing);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.renewal_failures, 3);
        assert_eq!(snapshot.failures_by_kind[&ErrorKind::Network], 2);
        assert_eq!(snapshot.failures_by_kind[&ErrorKind::Signing], 1);
    }

    #[test]
    fn test_rates() {
        let snapshot = TicketMetricsSnapshot::builder()
            .cache_hits(3)
            .cache_misses(1)
            .renewals(1)
            .renewal_failures(1)
            .build();
        assert_eq!(snapshot.cache_hit_rate(), 0.75);
        assert_eq!(snapshot.renewal_failure_rate(), 0.5);
        assert_eq!(TicketMetricsSnapshot::default().cache_hit_rate(), 0.0);
    }

    #[test]
    fn test_sweep_counters() {
        let metrics = TicketMetrics::new();
        metrics.record_sweep(2);
        metrics.record_sweep(0);
        metrics.record_sweep_skipped();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sweeps, 2);
        assert_eq!(snapshot.sweep_tenant_failures, 2);
        assert_eq!(snapshot.sweeps_skipped, 1);
    }
}
