//! Batch queue integration tests against the ticket pipeline.

mod common;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use common::{ticket_request, MockNetwork, TestHarness};
use ticketpay_core::{CompanyId, TicketCreationRequest};
use ticketpay_pipeline::{
    BatchProcessor, BatchQueue, BatchResult, ProcessError, QueueConfig, QueueItem,
    TicketPipeline,
};
use ticketpay_store::{MemoryStore, Store};

/// Runs batches through a [`TicketPipeline`] and records their sizes.
struct RecordingProcessor {
    pipeline: TicketPipeline,
    sizes: Mutex<Vec<usize>>,
}

#[async_trait]
impl BatchProcessor<TicketCreationRequest> for RecordingProcessor {
    async fn process(
        &self,
        batch: &[QueueItem<TicketCreationRequest>],
    ) -> Result<BatchResult, ProcessError> {
        self.sizes.lock().unwrap().push(batch.len());
        let requests: Vec<_> = batch.iter().map(|item| item.payload.clone()).collect();
        let result = self.pipeline.create_tickets_batch(&requests).await;
        assert!(result.failed.is_empty());
        Ok(BatchResult::Complete)
    }
}

fn queue_config() -> QueueConfig {
    QueueConfig {
        batch_size: 100,
        flush_interval: Duration::from_secs(1),
        max_retries: 3,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
    }
}

// ============================================================================
// Flush cycles
// ============================================================================

#[tokio::test]
async fn two_hundred_fifty_requests_flush_in_three_cycles() {
    let store = Arc::new(MemoryStore::new());
    let queue = BatchQueue::new(
        "tickets",
        queue_config(),
        RecordingProcessor {
            pipeline: TicketPipeline::new(Arc::clone(&store) as Arc<dyn Store>),
            sizes: Mutex::new(Vec::new()),
        },
    );
    let company = CompanyId::generate();

    let ids: HashSet<String> = (0..250)
        .map(|n| queue.enqueue(ticket_request(&format!("pay_{n:03}"), company)))
        .collect();
    assert_eq!(ids.len(), 250);

    queue.force_flush().await;

    assert_eq!(*queue.processor().sizes.lock().unwrap(), vec![100, 100, 50]);
    assert_eq!(queue.stats().flush_cycles, 3);
    assert_eq!(queue.stats().processed, 250);

    let tickets = store.tickets().await;
    let ticket_ids: HashSet<_> = tickets.iter().map(|t| t.id).collect();
    assert_eq!(tickets.len(), 250);
    assert_eq!(ticket_ids.len(), 250);
}

#[tokio::test(start_paused = true)]
async fn partial_batch_waits_for_timer() {
    let store = Arc::new(MemoryStore::new());
    let queue = BatchQueue::new(
        "tickets",
        queue_config(),
        RecordingProcessor {
            pipeline: TicketPipeline::new(Arc::clone(&store) as Arc<dyn Store>),
            sizes: Mutex::new(Vec::new()),
        },
    );
    queue.start();
    let company = CompanyId::generate();
    for n in 0..30 {
        queue.enqueue(ticket_request(&format!("pay_t{n}"), company));
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(store.ticket_count().await, 0);
    assert_eq!(queue.len(), 30);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(store.ticket_count().await, 30);
    assert!(queue.is_empty());

    queue.shutdown().await;
}

// ============================================================================
// Ticket queue
// ============================================================================

#[tokio::test]
async fn ticket_queue_schedules_transfers() {
    let harness = TestHarness::new().await;
    for n in 0..150 {
        harness.service.submit(harness.request(&format!("pay_q{n}")));
    }

    harness.service.ticket_queue().force_flush().await;
    assert_eq!(harness.store.ticket_count().await, 150);
    assert_eq!(harness.service.ticket_queue().stats().flush_cycles, 2);

    harness.service.transfer_queue().force_flush().await;
    assert_eq!(harness.network.calls(), 150);
    assert!(harness.service.transfer_queue().is_empty());
}

#[tokio::test]
async fn duplicate_submissions_create_one_ticket() {
    let harness = TestHarness::new().await;
    let req = harness.request("pay_redelivered");
    for _ in 0..5 {
        harness.service.submit(req.clone());
    }

    harness.service.shutdown().await;

    assert_eq!(harness.store.ticket_count().await, 1);
    assert_eq!(harness.store.transfers().await.len(), 1);
    assert_eq!(harness.network.calls(), 1);
}

#[tokio::test]
async fn company_without_payout_account_gets_no_transfer() {
    let harness = TestHarness::with_network(MockNetwork::new()).await;
    harness
        .service
        .submit(ticket_request("pay_orphan", CompanyId::generate()));

    harness.service.shutdown().await;

    assert_eq!(harness.store.ticket_count().await, 1);
    assert!(harness.store.transfers().await.is_empty());
    assert_eq!(harness.network.calls(), 0);
}

#[tokio::test]
async fn invalid_requests_are_dropped_without_retry() {
    let harness = TestHarness::new().await;
    let mut req = harness.request("pay_neg");
    req.amount_cents = -100;
    harness.service.submit(req);

    harness.service.shutdown().await;

    let stats = harness.service.ticket_queue().stats();
    assert_eq!(stats.retried, 0);
    assert_eq!(stats.processed, 1);
    assert_eq!(harness.store.ticket_count().await, 0);
}
