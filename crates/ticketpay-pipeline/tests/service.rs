//! End-to-end settlement service tests.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{test_config, ticket_request, FlakyStore, MockNetwork, TestHarness};
use ticketpay_core::{AuditAction, CompanyAccount, CompanyId, TransferStatus};
use ticketpay_pipeline::{NetworkError, SettlementService, TransferNetwork};
use ticketpay_store::Store;

#[tokio::test]
async fn submitted_tickets_are_created_and_settled() {
    let harness = TestHarness::new().await;
    harness.service.start();

    for n in 0..20 {
        harness.service.submit(harness.request(&format!("pay_e2e{n}")));
    }
    harness.service.shutdown().await;

    let tickets = harness.store.tickets().await;
    assert_eq!(tickets.len(), 20);

    let transfers = harness.store.transfers().await;
    assert_eq!(transfers.len(), 20);
    assert!(transfers
        .iter()
        .all(|t| t.status == TransferStatus::Completed && t.transfer_id.is_some()));

    // 20000 at 5% leaves 19000 for the company.
    let requests = harness.network.requests();
    assert!(requests.iter().all(|r| r.amount_cents == 19_000));
    assert!(requests.iter().all(|r| r.from_account == "platform-settlement"));

    let successes = harness
        .store
        .audit_logs()
        .await
        .into_iter()
        .filter(|l| l.action == AuditAction::CommissionTransferSuccess)
        .count();
    assert_eq!(successes, 20);
}

#[tokio::test]
async fn transient_network_failures_are_retried_by_queue() {
    let network = MockNetwork::new();
    network.script([
        Err(NetworkError::Timeout("read timeout".into())),
        Err(NetworkError::RateLimited {
            retry_after: Some(1),
        }),
    ]);
    let harness = TestHarness::with_network(network).await;

    harness.service.submit(harness.request("pay_retry"));
    harness.service.shutdown().await;

    assert_eq!(harness.network.calls(), 3);
    let transfers = harness.store.transfers().await;
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].status, TransferStatus::Completed);
    assert_eq!(transfers[0].retry_count, 2);

    let stats = harness.service.transfer_queue().stats();
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.dropped, 0);

    let failures = harness
        .store
        .audit_logs()
        .await
        .into_iter()
        .filter(|l| l.action == AuditAction::CommissionTransferFailed)
        .count();
    assert_eq!(failures, 2);
}

#[tokio::test]
async fn permanent_rejection_stops_at_retry_ceiling() {
    let network = MockNetwork::failing(NetworkError::Rejected {
        status: 422,
        code: Some("account_closed".into()),
        message: "destination account closed".into(),
    });
    let mut config = test_config();
    // Keep the breaker closed so every attempt reaches the network.
    config.breaker.failure_threshold = 100;
    let harness = TestHarness::with_config(config, network).await;

    harness.service.submit(harness.request("pay_closed"));
    harness.service.shutdown().await;

    // Five attempts reach the network; the sixth is refused at the ceiling.
    assert_eq!(harness.network.calls(), 5);
    assert_eq!(harness.service.transfer_queue().stats().dropped, 0);
    let transfers = harness.store.transfers().await;
    assert_eq!(transfers[0].status, TransferStatus::Failed);
    assert_eq!(
        transfers[0].error_message.as_deref(),
        Some("transfer rejected (422): destination account closed")
    );
    assert!(harness.service.transfer_queue().is_empty());

    // Redelivering the ticket must not reopen the exhausted transfer.
    harness.service.submit(harness.request("pay_closed"));
    harness.service.shutdown().await;
    assert_eq!(harness.network.calls(), 5);
    assert_eq!(harness.store.transfers().await[0].retry_count, 5);
}

#[tokio::test]
async fn direct_transfer_submission_settles() {
    let harness = TestHarness::new().await;
    let ticket = harness
        .service
        .pipeline()
        .create_ticket(&harness.request("pay_direct"))
        .await;
    let stored = harness
        .store
        .find_ticket_by_payment("pay_direct")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ticket.ticket_id, Some(stored.id));

    harness.service.submit_transfer(ticketpay_core::TransferItem::for_ticket(
        &stored,
        "platform-settlement",
        "acct_company_payout",
    ));
    harness.service.shutdown().await;

    assert_eq!(harness.network.calls(), 1);
    assert_eq!(
        harness.store.transfers().await[0].status,
        TransferStatus::Completed
    );
}

#[tokio::test]
async fn audit_bulk_failure_falls_back_to_single_writes() {
    let store = FlakyStore::new();
    store.fail_bulk_audit.store(true, Ordering::SeqCst);
    let company = CompanyId::generate();
    store
        .put_company_account(&CompanyAccount::new(company, "acct_company_payout"))
        .await
        .unwrap();

    let network = MockNetwork::new();
    let service = SettlementService::new(
        test_config(),
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::clone(&network) as Arc<dyn TransferNetwork>,
    );

    for n in 0..5 {
        service.submit(ticket_request(&format!("pay_audit{n}"), company));
    }
    service.shutdown().await;

    assert_eq!(network.calls(), 5);
    assert_eq!(store.inner.audit_logs().await.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn timers_drive_the_pipeline_without_shutdown() {
    let harness = TestHarness::new().await;
    harness.service.start();
    harness.service.submit(harness.request("pay_timer"));

    // Ticket flush at 500ms, transfer flush at the next transfer tick.
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(harness.store.ticket_count().await, 1);
    assert_eq!(harness.network.calls(), 1);

    // Audit timer fires every 2s.
    tokio::time::sleep(Duration::from_millis(2_000)).await;
    assert_eq!(harness.store.audit_logs().await.len(), 1);

    harness.service.shutdown().await;
}
