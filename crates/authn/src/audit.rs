//! Audit trail for ticket and tenant lifecycle events.
//!
//! Every issuance, detected expiry, failed renewal, provisioning and removal
//! produces one [`AuditEvent`]. The [`AuditLogger`] trait decouples the
//! manager from where those events end up:
//!
//! - [`TracingAuditLogger`]: structured `tracing` events at INFO with
//!   `audit.*` fields.
//! - [`NoopAuditLogger`]: discards everything.
//!
//! ```no_run
//! use ticketbroker_authn::audit::{
//!     AuditAction, AuditEvent, AuditLogger, AuditResult, TracingAuditLogger, tenant_resource,
//! };
//! use ticketbroker_storage::TenantId;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let tenant: TenantId = "20304050607".parse().unwrap();
//! let event = AuditEvent::builder()
//!     .actor("ticket_manager")
//!     .action(AuditAction::TicketIssued)
//!     .resource(tenant_resource(&tenant))
//!     .result(AuditResult::Success)
//!     .build();
//! TracingAuditLogger.log(&event).await;
//! # });
//! ```

use std::{collections::BTreeMap, fmt};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ticketbroker_storage::TenantId;

/// Lifecycle action being audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditAction {
    /// A new ticket was obtained and persisted.
    TicketIssued,
    /// A stored ticket was found expired.
    TicketExpired,
    /// A renewal attempt failed; the previous ticket, if any, was kept.
    RenewalFailed,
    /// Key material was stored for a tenant.
    TenantProvisioned,
    /// A tenant's key material and documents were deleted.
    TenantRemoved,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TicketIssued => "ticket_issued",
            Self::TicketExpired => "ticket_expired",
            Self::RenewalFailed => "renewal_failed",
            Self::TenantProvisioned => "tenant_provisioned",
            Self::TenantRemoved => "tenant_removed",
        })
    }
}

/// Outcome of an audited action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditResult {
    /// The action completed.
    Success,
    /// The action failed for the given reason.
    Failure(String),
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure(reason) => write!(f, "failure: {reason}"),
        }
    }
}

/// One audit record.
#[derive(Debug, Clone, bon::Builder)]
pub struct AuditEvent {
    /// When the event occurred (defaults to now).
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
    /// Component or operator that acted.
    #[builder(into)]
    pub actor: String,
    /// What happened.
    pub action: AuditAction,
    /// Affected resource, see [`tenant_resource`].
    #[builder(into)]
    pub resource: String,
    /// Outcome.
    pub result: AuditResult,
    /// Extra context such as the ticket's expiration or the error kind.
    #[builder(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Destination for audit events.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    /// Records one event.
    async fn log(&self, event: &AuditEvent);
}

#[async_trait]
impl<L: AuditLogger + ?Sized> AuditLogger for std::sync::Arc<L> {
    async fn log(&self, event: &AuditEvent) {
        (**self).log(event).await;
    }
}

/// Emits each event as an INFO `tracing` event named `audit_event`.
///
/// Fields: `audit.timestamp` (RFC 3339), `audit.actor`, `audit.action`,
/// `audit.resource`, `audit.result` and `audit.metadata` (`k=v` pairs in key
/// order).
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        let metadata = event
            .metadata
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");

        tracing::info!(
            audit.timestamp = %event.timestamp.to_rfc3339(),
            audit.actor = %event.actor,
            audit.action = %event.action,
            audit.resource = %event.resource,
            audit.result = %event.result,
            audit.metadata = %metadata,
            "audit_event"
        );
    }
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditLogger;

#[async_trait]
impl AuditLogger for NoopAuditLogger {
    async fn log(&self, _event: &AuditEvent) {}
}

/// Resource identifier for a tenant.
#[must_use]
pub fn tenant_resource(tenant: &TenantId) -> String {
    format!("cuit:{tenant}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::{
        io,
        sync::{Arc, Mutex},
    };

    use tracing_subscriber::layer::SubscriberExt;

    use super::*;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_action_display() {
        assert_eq!(AuditAction::TicketIssued.to_string(), "ticket_issued");
        assert_eq!(AuditAction::TicketExpired.to_string(), "ticket_expired");
        assert_eq!(AuditAction::RenewalFailed.to_string(), "renewal_failed");
        assert_eq!(AuditAction::TenantProvisioned.to_string(), "tenant_provisioned");
        assert_eq!(AuditAction::TenantRemoved.to_string(), "tenant_removed");
    }

    #[test]
    fn test_result_display() {
        assert_eq!(AuditResult::Success.to_string(), "success");
        assert_eq!(AuditResult::Failure("network".to_owned()).to_string(), "failure: network");
    }

    #[test]
    fn test_builder_defaults() {
        let tenant: TenantId = "20304050607".parse().unwrap();
        let event = AuditEvent::builder()
            .actor("ticket_manager")
            .action(AuditAction::TenantRemoved)
            .resource(tenant_resource(&tenant))
            .result(AuditResult::Success)
            .build();
        assert_eq!(event.resource, "cuit:20304050607");
        assert!(event.metadata.is_empty());
        assert!((Utc::now() - event.timestamp).num_seconds() < 2);
    }

    #[tokio::test]
    async fn test_tracing_logger_writes_audit_fields() {
        let buffer = Buffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::registry().with(
            tracing_subscriber::fmt::layer().with_ansi(false).with_writer(move || writer.clone()),
        );
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut metadata = BTreeMap::new();
        metadata.insert("error_kind".to_owned(), "network".to_owned());
        metadata.insert("attempts".to_owned(), "3".to_owned());
        let event = AuditEvent::builder()
            .actor("ticket_manager")
            .action(AuditAction::RenewalFailed)
            .resource("cuit:20304050607")
            .result(AuditResult::Failure("network".to_owned()))
            .metadata(metadata)
            .build();
        TracingAuditLogger.log(&event).await;

        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("audit_event"), "{output}");
        assert!(output.contains("audit.action=renewal_failed"), "{output}");
        assert!(output.contains("audit.resource=cuit:20304050607"), "{output}");
        assert!(output.contains("attempts=3, error_kind=network"), "{output}");
    }

    #[tokio::test]
    async fn test_noop_logger_accepts_events() {
        let event = AuditEvent::builder()
            .actor("test")
            .action(AuditAction::TicketExpired)
            .resource("cuit:20304050607")
            .result(AuditResult::Success)
            .build();
        NoopAuditLogger.log(&event).await;
        Arc::new(NoopAuditLogger).log(&event).await;
    }
}
