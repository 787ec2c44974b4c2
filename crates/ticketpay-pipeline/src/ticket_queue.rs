//! Ticket creation queue.
//!
//! Accumulates [`TicketCreationRequest`]s and creates them in bulk through the
//! [`TicketPipeline`]. Every ticket that resolves (new or pre-existing) has
//! its settlement handed to the [`TransferQueue`]; re-enqueueing the transfer
//! of an existing ticket is harmless because settlement is idempotent.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use ticketpay_core::{CompanyId, TicketCreationRequest, TicketRecord, TransferItem};
use ticketpay_store::{Store, StoreError};

use crate::error::ProcessError;
use crate::queue::{BatchProcessor, BatchQueue, BatchResult, QueueItem};
use crate::tickets::TicketPipeline;
use crate::transfer_queue::TransferQueue;

/// Batch queue of ticket creation requests.
pub type TicketQueue = BatchQueue<TicketCreationRequest, TicketBatchProcessor>;

/// Drives ticket batches into the pipeline and schedules their settlement.
pub struct TicketBatchProcessor {
    pipeline: TicketPipeline,
    store: Arc<dyn Store>,
    transfers: Arc<TransferQueue>,
    settlement_account: String,
}

impl TicketBatchProcessor {
    /// Create a processor. Transfers debit `settlement_account`.
    #[must_use]
    pub fn new(
        pipeline: TicketPipeline,
        store: Arc<dyn Store>,
        transfers: Arc<TransferQueue>,
        settlement_account: impl Into<String>,
    ) -> Self {
        Self {
            pipeline,
            store,
            transfers,
            settlement_account: settlement_account.into(),
        }
    }

    /// Look up the payout account of a company, caching per batch.
    async fn payout_account(
        &self,
        company_id: CompanyId,
        cache: &mut HashMap<CompanyId, Option<String>>,
    ) -> Result<Option<String>, StoreError> {
        if let Some(account) = cache.get(&company_id) {
            return Ok(account.clone());
        }
        let account = self
            .store
            .get_company_account(&company_id)
            .await?
            .map(|account| account.payout_account);
        cache.insert(company_id, account.clone());
        Ok(account)
    }

    /// Enqueue the settlement of `ticket`.
    ///
    /// Returns `Err` when the lookup failed and the ticket should be retried.
    async fn schedule_transfer(
        &self,
        ticket: &TicketRecord,
        cache: &mut HashMap<CompanyId, Option<String>>,
    ) -> Result<(), StoreError> {
        match self.payout_account(ticket.company_id, cache).await? {
            Some(payout) => {
                let item =
                    TransferItem::for_ticket(ticket, self.settlement_account.as_str(), payout);
                let queue_id = self.transfers.enqueue(item);
                tracing::debug!(
                    ticket_id = %ticket.id,
                    queue_id = %queue_id,
                    amount_cents = %ticket.net_cents,
                    "Transfer enqueued"
                );
            }
            None => {
                tracing::warn!(
                    ticket_id = %ticket.id,
                    company_id = %ticket.company_id,
                    "Company has no payout account, skipping transfer"
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BatchProcessor<TicketCreationRequest> for TicketBatchProcessor {
    async fn process(
        &self,
        batch: &[QueueItem<TicketCreationRequest>],
    ) -> Result<BatchResult, ProcessError> {
        let requests: Vec<TicketCreationRequest> =
            batch.iter().map(|item| item.payload.clone()).collect();
        let result = self.pipeline.create_tickets_batch(&requests).await;

        let mut retry_keys: HashSet<String> = HashSet::new();
        for failed in &result.failed {
            if failed.retryable {
                retry_keys.insert(failed.payment_transaction_id.clone());
            } else {
                tracing::error!(
                    payment_transaction_id = %failed.payment_transaction_id,
                    error = %failed.error,
                    "Ticket request rejected"
                );
            }
        }

        let mut accounts = HashMap::new();
        let mut scheduled = HashSet::with_capacity(result.successful.len());
        for created in &result.successful {
            if !scheduled.insert(created.ticket_id) {
                continue;
            }
            if let Err(err) = self.schedule_transfer(&created.ticket, &mut accounts).await {
                tracing::warn!(
                    ticket_id = %created.ticket_id,
                    error = %err,
                    "Payout account lookup failed, retrying ticket"
                );
                retry_keys.insert(created.payment_transaction_id.clone());
            }
        }

        if retry_keys.is_empty() {
            return Ok(BatchResult::Complete);
        }

        let retry = batch
            .iter()
            .enumerate()
            .filter(|(_, item)| retry_keys.contains(&item.payload.payment_transaction_id))
            .map(|(index, _)| index)
            .collect();
        Ok(BatchResult::Partial { retry })
    }
}
