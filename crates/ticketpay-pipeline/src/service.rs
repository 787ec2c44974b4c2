//! Settlement service lifecycle.
//!
//! [`SettlementService`] owns one instance of each pipeline component and
//! wires them together:
//!
//! ```text
//! submit -> TicketQueue -> TicketPipeline -> TransferQueue
//!
//! TransferQueue -> TransferProcessor -> CircuitBreaker -> TransferNetwork
//!                                   `-> AuditBatcher -> Store
//! ```

use std::sync::Arc;

use ticketpay_core::{TicketCreationRequest, TransferItem};
use ticketpay_store::Store;

use crate::audit::AuditBatcher;
use crate::breaker::CircuitBreaker;
use crate::config::PipelineConfig;
use crate::network::TransferNetwork;
use crate::ticket_queue::{TicketBatchProcessor, TicketQueue};
use crate::tickets::TicketPipeline;
use crate::transfer_queue::{TransferBatchProcessor, TransferQueue};
use crate::transfers::TransferProcessor;

/// The ingestion and settlement pipeline.
pub struct SettlementService {
    config: PipelineConfig,
    pipeline: TicketPipeline,
    breaker: Arc<CircuitBreaker>,
    audit: Arc<AuditBatcher>,
    processor: Arc<TransferProcessor>,
    transfers: Arc<TransferQueue>,
    tickets: TicketQueue,
}

impl SettlementService {
    /// Build every component. Nothing runs until [`start`](Self::start).
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn Store>,
        network: Arc<dyn TransferNetwork>,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(config.breaker));
        let audit = Arc::new(AuditBatcher::new(config.audit, Arc::clone(&store)));

        let processor = Arc::new(TransferProcessor::new(
            Arc::clone(&store),
            network,
            Arc::clone(&breaker),
            Arc::clone(&audit),
            config.transfer_concurrency,
        ));
        let transfers = Arc::new(TransferQueue::new(
            "transfers",
            config.transfer_queue.clone(),
            TransferBatchProcessor::new(Arc::clone(&processor)),
        ));

        let pipeline = TicketPipeline::new(Arc::clone(&store)).with_backoff(
            config.ticket_queue.base_delay,
            config.ticket_queue.max_delay,
        );
        let tickets = TicketQueue::new(
            "tickets",
            config.ticket_queue.clone(),
            TicketBatchProcessor::new(
                pipeline.clone(),
                store,
                Arc::clone(&transfers),
                config.settlement_account.clone(),
            ),
        );

        Self {
            config,
            pipeline,
            breaker,
            audit,
            processor,
            transfers,
            tickets,
        }
    }

    /// Start the flush timers of both queues and the audit batcher.
    pub fn start(&self) {
        self.tickets.start();
        self.transfers.start();
        self.audit.start();
        tracing::info!(
            settlement_account = %self.config.settlement_account,
            transfer_concurrency = self.config.transfer_concurrency,
            "Settlement service started"
        );
    }

    /// Enqueue a ticket creation request. Returns the queue item id.
    pub fn submit(&self, req: TicketCreationRequest) -> String {
        self.tickets.enqueue(req)
    }

    /// Enqueue a transfer directly, bypassing ticket creation.
    pub fn submit_transfer(&self, item: TransferItem) -> String {
        self.transfers.enqueue(item)
    }

    /// Stop every timer, then drain tickets, transfers and audit entries in
    /// dependency order.
    pub async fn shutdown(&self) {
        tracing::info!("Settlement service shutting down");
        self.tickets.stop();
        self.transfers.stop();
        self.audit.stop();

        self.tickets.force_flush().await;
        self.transfers.force_flush().await;
        self.audit.force_flush().await;

        tracing::info!(
            tickets = ?self.tickets.stats(),
            transfers = ?self.transfers.stats(),
            breaker = ?self.breaker.metrics(),
            "Settlement service stopped"
        );
    }

    /// Synchronous ticket creation, bypassing the queue.
    #[must_use]
    pub fn pipeline(&self) -> &TicketPipeline {
        &self.pipeline
    }

    /// Synchronous transfer settlement, bypassing the queue.
    #[must_use]
    pub fn transfer_processor(&self) -> &TransferProcessor {
        &self.processor
    }

    /// The breaker guarding the payment network.
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// The audit batcher.
    #[must_use]
    pub fn audit(&self) -> &AuditBatcher {
        &self.audit
    }

    /// The ticket creation queue.
    #[must_use]
    pub fn ticket_queue(&self) -> &TicketQueue {
        &self.tickets
    }

    /// The transfer queue.
    #[must_use]
    pub fn transfer_queue(&self) -> &TransferQueue {
        &self.transfers
    }
}
