//! Integration tests for fail-point injection in the file store.
//!
//! These tests require the `failpoints` feature:
//! ```bash
//! cargo test -p ticketbroker-storage --features failpoints --test failpoint_tests
//! ```

#![allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]

use chrono::{TimeZone, Utc};
use ticketbroker_storage::{FileTicketStore, StorageError, TenantId, TicketResponse, TicketStore};

fn response(token: &str) -> TicketResponse {
    TicketResponse::builder()
        .token(token)
        .sign("S")
        .expiration_time(Utc.with_ymd_and_hms(2030, 1, 1, 12, 0, 0).unwrap())
        .build()
}

#[tokio::test]
async fn write_failpoint_returns_io_error_and_keeps_previous_document() {
    let scenario = fail::FailScenario::setup();
    let dir = tempfile::tempdir().unwrap();
    let store = FileTicketStore::new(dir.path());
    let tenant: TenantId = "20304050607".parse().unwrap();
    store.write(&tenant, &response("T1").into()).await.expect("write before fail point");

    fail::cfg("ticket-store-write", "return").expect("failed to configure fail point");
    let result = store.write(&tenant, &response("T2").into()).await;

    assert!(matches!(result, Err(StorageError::Io { .. })), "got {result:?}");
    assert_eq!(store.read_response(&tenant).await.unwrap().unwrap().token, "T1");

    scenario.teardown();
}

#[tokio::test]
async fn write_without_failpoint_succeeds() {
    let scenario = fail::FailScenario::setup();
    let dir = tempfile::tempdir().unwrap();
    let store = FileTicketStore::new(dir.path());
    let tenant: TenantId = "20304050607".parse().unwrap();

    store.write(&tenant, &response("T1").into()).await.expect("write should succeed");

    scenario.teardown();
}
