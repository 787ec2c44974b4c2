//! Transfer queue.
//!
//! Batches [`TransferItem`]s into the [`TransferProcessor`], which settles
//! each batch in windows of bounded concurrency. Items whose outcome is
//! retryable go back to the queue with backoff.
//!
//! The retry ceiling is enforced on the stored transfer record, which only
//! counts attempts that reached the payment network. The queue's own retry
//! count bounds requeueing and nothing else.

use std::sync::Arc;

use async_trait::async_trait;

use ticketpay_core::TransferItem;

use crate::error::ProcessError;
use crate::queue::{BatchProcessor, BatchQueue, BatchResult, QueueItem};
use crate::transfers::TransferProcessor;

/// Batch queue of pending transfers.
pub type TransferQueue = BatchQueue<TransferItem, TransferBatchProcessor>;

/// Drives transfer batches into the [`TransferProcessor`].
pub struct TransferBatchProcessor {
    processor: Arc<TransferProcessor>,
}

impl TransferBatchProcessor {
    /// Create a processor.
    #[must_use]
    pub fn new(processor: Arc<TransferProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl BatchProcessor<TransferItem> for TransferBatchProcessor {
    async fn process(
        &self,
        batch: &[QueueItem<TransferItem>],
    ) -> Result<BatchResult, ProcessError> {
        let items: Vec<TransferItem> = batch
            .iter()
            .map(|queued| queued.payload.clone())
            .collect();

        let outcomes = self.processor.process_transfer_batch(&items).await;

        let retry: Vec<usize> = outcomes
            .iter()
            .enumerate()
            .filter(|(_, outcome)| !outcome.success && outcome.retryable)
            .map(|(index, _)| index)
            .collect();

        tracing::info!(
            size = items.len(),
            settled = outcomes.iter().filter(|o| o.success).count(),
            retrying = retry.len(),
            "Transfer batch processed"
        );

        if retry.is_empty() {
            Ok(BatchResult::Complete)
        } else {
            Ok(BatchResult::Partial { retry })
        }
    }
}
