//! Retry decorator for remote login calls.
//!
//! [`RetryingAuthClient`] wraps any [`RemoteAuthClient`] and repeats calls
//! that fail with a retryable [`RemoteError`] (network or transport). Fault,
//! malformed-response and unknown failures are returned immediately.
//!
//! # Backoff Strategy
//!
//! Attempts are separated by a fixed `backoff`. Each attempt is bounded by
//! `attempt_timeout`; an elapsed timeout is a [`RemoteError::Network`] and is
//! retried like any other network failure.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use fail::fail_point;
use ticketbroker_storage::TicketResponse;

use crate::{
    config::RetryConfig,
    metrics::TicketMetrics,
    remote::{RemoteAuthClient, RemoteError},
};

/// Executes `operation` up to `config.max_attempts` times.
///
/// Returns the first success, or the last error once the budget is spent or
/// a non-retryable error is seen.
#[tracing::instrument(skip(config, metrics, operation), fields(max_attempts = config.max_attempts))]
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    metrics: Option<&TicketMetrics>,
    operation_name: &str,
    mut operation: F,
) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut last_error: Option<RemoteError> = None;

    for attempt in 0..max_attempts {
        if let Some(m) = metrics {
            m.record_remote_attempt();
        }
        let outcome = match tokio::time::timeout(config.attempt_timeout, operation()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RemoteError::network(format!(
                "{operation_name} timed out after {}ms",
                config.attempt_timeout.as_millis()
            ))),
        };

        match outcome {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "operation succeeded after retry",
                    );
                }
                return Ok(value);
            },
            Err(err) if err.is_retryable() && attempt + 1 < max_attempts => {
                if let Some(m) = metrics {
                    m.record_retry();
                }
                let delay = config.backoff;
                tracing::debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = duration_ms(delay),
                    error = %err,
                    "retryable error, retrying after backoff",
                );
                fail_point!("retry-before-sleep");
                tokio::time::sleep(delay).await;
                last_error = Some(err);
            },
            Err(err) => {
                if err.is_retryable() {
                    if let Some(m) = metrics {
                        m.record_retry_exhausted();
                    }
                    tracing::warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        error = %err,
                        "retry budget exhausted",
                    );
                }
                return Err(err);
            },
        }
    }

    if let Some(m) = metrics {
        m.record_retry_exhausted();
    }
    Err(last_error
        .unwrap_or_else(|| RemoteError::unknown("retry loop completed without result or error")))
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// A [`RemoteAuthClient`] that applies a [`RetryConfig`] to another client.
///
/// The `remote-login` fail point, when active, replaces the inner call with
/// a network error so retry exhaustion can be exercised without a server.
pub struct RetryingAuthClient<C> {
    inner: C,
    config: RetryConfig,
    metrics: Option<TicketMetrics>,
}

impl<C: RemoteAuthClient> RetryingAuthClient<C> {
    /// Wraps `inner` with the given policy.
    pub fn new(inner: C, config: RetryConfig) -> Self {
        Self { inner, config, metrics: None }
    }

    /// Records attempts and retries into `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: TicketMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The active policy.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// The wrapped client.
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: RemoteAuthClient> RemoteAuthClient for RetryingAuthClient<C> {
    async fn login(&self, signed_request: &str) -> Result<TicketResponse, RemoteError> {
        with_retry(&self.config, self.metrics.as_ref(), "login", || async {
            fail_point!("remote-login", |_| Err(RemoteError::network("injected login failure")));
            self.inner.login(signed_request).await
        })
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use rstest::rstest;

    use super::*;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig::builder()
            .max_attempts(max_attempts)
            .backoff(Duration::from_millis(1))
            .attempt_timeout(Duration::from_secs(5))
            .build()
    }

    /// Fails with `errors` in order, then succeeds with `42`.
    async fn run(errors: Vec<RemoteError>, max_attempts: u32) -> (Result<u32, RemoteError>, u32) {
        let calls = Arc::new(AtomicU32::new(0));
        let errors = Arc::new(parking_lot::Mutex::new(errors.into_iter()));
        let config = fast_config(max_attempts);
        let result = with_retry(&config, None, "test", || {
            let calls = Arc::clone(&calls);
            let errors = Arc::clone(&errors);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                match errors.lock().next() {
                    Some(err) => Err(err),
                    None => Ok(42),
                }
            }
        })
        .await;
        (result, calls.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_two_network_errors_then_success() {
        let (result, calls) =
            run(vec![RemoteError::network("a"), RemoteError::network("b")], 3).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_three_network_errors_exhaust_budget() {
        let (result, calls) = run(
            vec![RemoteError::network("a"), RemoteError::transport("b"), RemoteError::network("c")],
            3,
        )
        .await;
        assert!(matches!(result, Err(RemoteError::Network { ref message, .. }) if message == "c"));
        assert_eq!(calls, 3);
    }

    #[rstest]
    #[case::fault(RemoteError::fault("ns1:cms.bad", "rejected"))]
    #[case::malformed(RemoteError::malformed("no token"))]
    #[case::unknown(RemoteError::unknown("?"))]
    #[tokio::test]
    async fn test_non_retryable_errors_are_not_repeated(#[case] err: RemoteError) {
        let kind = err.kind();
        let (result, calls) = run(vec![err], 3).await;
        assert_eq!(result.unwrap_err().kind(), kind);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_single_attempt_budget() {
        let (result, calls) = run(vec![RemoteError::network("a")], 1).await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_a_network_error() {
        let config = RetryConfig::builder()
            .max_attempts(2)
            .backoff(Duration::from_millis(500))
            .attempt_timeout(Duration::from_secs(30))
            .build();
        let metrics = TicketMetrics::new();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(&config, Some(&metrics), "slow", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        })
        .await;

        assert!(matches!(result, Err(RemoteError::Network { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.remote_attempts, 2);
        assert_eq!(snapshot.retries, 1);
        assert_eq!(snapshot.retry_exhausted, 1);
    }
}
