//! Commission transfer processor integration tests.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use common::{MockNetwork, TestHarness};
use ticketpay_core::{
    AuditAction, CompanyId, TicketId, TransferItem, TransferRecord, TransferStatus,
    MAX_TRANSFER_RETRIES,
};
use ticketpay_pipeline::{
    AuditBatcher, AuditConfig, BreakerConfig, CircuitBreaker, CircuitState, NetworkError,
    TransferNetwork, TransferProcessor, TransferReceipt, TransferRequest,
};
use ticketpay_store::{MemoryStore, Store};

fn transfer_item(payment_transaction_id: &str) -> TransferItem {
    TransferItem {
        ticket_id: TicketId::generate(),
        payment_transaction_id: payment_transaction_id.into(),
        company_id: CompanyId::generate(),
        from_account: "platform-settlement".into(),
        to_account: "acct_company_payout".into(),
        amount_cents: 19_000,
        retries: 0,
    }
}

// ============================================================================
// Idempotency
// ============================================================================

#[tokio::test]
async fn completed_transfer_is_not_sent_again() {
    let harness = TestHarness::new().await;
    let item = transfer_item("pay_done");

    let mut record = TransferRecord::pending(&item);
    record.complete("tr_previous");
    harness.store.insert_transfer(&record).await.unwrap();

    let outcome = harness.service.transfer_processor().process_transfer(&item).await;

    assert!(outcome.success);
    assert_eq!(outcome.transfer_id.as_deref(), Some("tr_previous"));
    assert_eq!(harness.network.calls(), 0);
}

#[tokio::test]
async fn repeated_delivery_settles_once() {
    let harness = TestHarness::new().await;
    let item = transfer_item("pay_twice");
    let processor = harness.service.transfer_processor();

    let first = processor.process_transfer(&item).await;
    let second = processor.process_transfer(&item).await;

    assert!(first.success && second.success);
    assert_eq!(first.transfer_id, second.transfer_id);
    assert_eq!(harness.network.calls(), 1);
    assert_eq!(harness.store.transfers().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_attempts_share_one_record() {
    let harness = Arc::new(TestHarness::new().await);
    let item = transfer_item("pay_concurrent");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let harness = Arc::clone(&harness);
            let item = item.clone();
            tokio::spawn(async move {
                harness
                    .service
                    .transfer_processor()
                    .process_transfer(&item)
                    .await
            })
        })
        .collect();

    for handle in handles {
        let outcome = handle.await.unwrap();
        assert!(outcome.success, "error: {:?}", outcome.error);
    }

    let records = harness.store.transfers().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, TransferStatus::Completed);
}

#[tokio::test]
async fn reference_is_sent_as_idempotency_key() {
    let harness = TestHarness::new().await;
    let item = transfer_item("pay_ref");

    harness.service.transfer_processor().process_transfer(&item).await;

    let requests = harness.network.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].reference, item.reference());
    assert_eq!(requests[0].amount_cents, 19_000);
    assert_eq!(requests[0].to_account, "acct_company_payout");
}

// ============================================================================
// Retry ceiling
// ============================================================================

#[tokio::test]
async fn transfer_past_ceiling_fails_without_network_call() {
    let harness = TestHarness::new().await;
    let mut item = transfer_item("pay_ceiling");
    item.retries = MAX_TRANSFER_RETRIES;

    let mut record = TransferRecord::pending(&item);
    record.fail("insufficient platform balance");
    harness.store.insert_transfer(&record).await.unwrap();

    let outcome = harness.service.transfer_processor().process_transfer(&item).await;

    assert!(!outcome.success);
    assert!(!outcome.retryable);
    assert_eq!(harness.network.calls(), 0);
}

#[tokio::test]
async fn failed_record_at_ceiling_is_not_resent_on_redelivery() {
    let harness = TestHarness::new().await;
    let item = transfer_item("pay_exhausted");

    let mut record = TransferRecord::pending(&item);
    for _ in 0..MAX_TRANSFER_RETRIES {
        record.fail("destination account closed");
    }
    harness.store.insert_transfer(&record).await.unwrap();

    // A fresh delivery of the same ticket starts with no retries of its own.
    assert_eq!(item.retries, 0);
    let outcome = harness.service.transfer_processor().process_transfer(&item).await;

    assert!(!outcome.success);
    assert!(!outcome.retryable);
    assert_eq!(harness.network.calls(), 0);

    let stored = harness
        .store
        .find_transfer(&item.ticket_id, &item.payment_transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, TransferStatus::Failed);
    assert_eq!(stored.retry_count, MAX_TRANSFER_RETRIES);
}

#[tokio::test]
async fn failure_then_success_completes_record() {
    let network = MockNetwork::new();
    network.script([Err(NetworkError::Timeout("read timeout".into()))]);
    let harness = TestHarness::with_network(network).await;
    let mut item = transfer_item("pay_flaky");
    let processor = harness.service.transfer_processor();

    let first = processor.process_transfer(&item).await;
    assert!(!first.success);
    assert!(first.retryable);

    item.retries = 1;
    let second = processor.process_transfer(&item).await;
    assert!(second.success);

    let record = harness
        .store
        .find_transfer(&item.ticket_id, &item.payment_transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, TransferStatus::Completed);
    assert_eq!(record.retry_count, 1);
    assert!(record.error_message.is_none());
}

// ============================================================================
// Circuit breaker
// ============================================================================

#[tokio::test(start_paused = true)]
async fn breaker_opens_and_recovers() {
    let network = MockNetwork::failing(NetworkError::Network("connection refused".into()));
    let harness = TestHarness::with_network(Arc::clone(&network)).await;
    let processor = harness.service.transfer_processor();

    for n in 0..8 {
        let outcome = processor
            .process_transfer(&transfer_item(&format!("pay_cb{n}")))
            .await;
        assert!(!outcome.success);
        assert!(outcome.retryable);
        if n >= 5 {
            assert!(outcome.error.unwrap().contains("circuit breaker is open"));
        }
    }
    assert_eq!(network.calls(), 5);
    assert_eq!(harness.service.breaker().state().await, CircuitState::Open);

    network.recover();
    tokio::time::advance(Duration::from_secs(60)).await;

    let outcome = processor.process_transfer(&transfer_item("pay_cb_trial")).await;
    assert!(outcome.success);
    assert_eq!(harness.service.breaker().state().await, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn breaker_rejections_do_not_spend_retry_budget() {
    let network = MockNetwork::failing(NetworkError::Network("connection refused".into()));
    let harness = TestHarness::with_network(Arc::clone(&network)).await;
    let processor = harness.service.transfer_processor();

    for n in 0..5 {
        processor
            .process_transfer(&transfer_item(&format!("pay_open{n}")))
            .await;
    }
    assert_eq!(harness.service.breaker().state().await, CircuitState::Open);

    let item = transfer_item("pay_parked");
    for _ in 0..(MAX_TRANSFER_RETRIES + 2) {
        let outcome = processor.process_transfer(&item).await;
        assert!(!outcome.success);
        assert!(outcome.retryable);
        assert!(outcome.error.unwrap().contains("circuit breaker is open"));
    }
    assert_eq!(network.calls(), 5);

    let parked = harness
        .store
        .find_transfer(&item.ticket_id, &item.payment_transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(parked.status, TransferStatus::Failed);
    assert_eq!(parked.retry_count, 0);

    network.recover();
    tokio::time::advance(Duration::from_secs(60)).await;

    let outcome = processor.process_transfer(&item).await;
    assert!(outcome.success);
}

// ============================================================================
// Audit
// ============================================================================

#[tokio::test]
async fn outcomes_are_audited() {
    let network = MockNetwork::new();
    network.script([
        Ok(()),
        Err(NetworkError::Rejected {
            status: 422,
            code: Some("account_frozen".into()),
            message: "destination account frozen".into(),
        }),
    ]);
    let harness = TestHarness::with_network(network).await;
    let processor = harness.service.transfer_processor();

    processor.process_transfer(&transfer_item("pay_a1")).await;
    processor.process_transfer(&transfer_item("pay_a2")).await;
    harness.service.audit().force_flush().await;

    let logs = harness.store.audit_logs().await;
    assert_eq!(logs.len(), 2);
    assert!(logs
        .iter()
        .any(|l| l.action == AuditAction::CommissionTransferSuccess));

    let failure = logs
        .iter()
        .find(|l| l.action == AuditAction::CommissionTransferFailed)
        .unwrap();
    assert_eq!(failure.details["retryable"], true);
    assert_eq!(failure.details["retry_count"], 1);
    assert!(failure.company_id.is_some());
}

// ============================================================================
// Bounded parallelism
// ============================================================================

/// Tracks how many transfers are in flight at once.
#[derive(Default)]
struct GaugeNetwork {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl TransferNetwork for GaugeNetwork {
    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, NetworkError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(TransferReceipt {
            transfer_id: format!("tr_{}", request.reference),
            status: None,
        })
    }
}

#[tokio::test]
async fn batch_respects_concurrency_limit() {
    let store = Arc::new(MemoryStore::new());
    let network = Arc::new(GaugeNetwork::default());
    let processor = TransferProcessor::new(
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::clone(&network) as Arc<dyn TransferNetwork>,
        Arc::new(CircuitBreaker::new(BreakerConfig::default())),
        Arc::new(AuditBatcher::new(
            AuditConfig::default(),
            Arc::clone(&store) as Arc<dyn Store>,
        )),
        10,
    );

    let items: Vec<_> = (0..35)
        .map(|n| transfer_item(&format!("pay_w{n}")))
        .collect();
    let outcomes = processor.process_transfer_batch(&items).await;

    assert!(outcomes.iter().all(|o| o.success));
    let peak = network.peak.load(Ordering::SeqCst);
    assert!(peak <= 10, "peak concurrency {peak}");
    assert!(peak > 1, "transfers in a window should overlap");
    assert_eq!(store.transfers().await.len(), 35);
}
