//! Idempotent commission transfer settlement.
//!
//! Each `(ticket_id, payment_transaction_id)` has at most one transfer
//! record. Its lifecycle:
//!
//! ```text
//! absent -> pending -> completed
//!                   -> failed -> pending (retry) ... up to MAX_TRANSFER_RETRIES
//! ```
//!
//! A completed record is terminal and is never sent to the network again.
//! So is a failed record whose `retry_count` reached the ceiling. Calls the
//! circuit breaker rejects leave `retry_count` untouched.

use std::sync::Arc;

use serde_json::json;

use ticketpay_core::{
    AuditAction, AuditLogEntry, Classify, ErrorClass, TransferItem, TransferOutcome,
    TransferRecord, MAX_TRANSFER_RETRIES,
};
use ticketpay_store::{Store, StoreError};

use crate::audit::AuditBatcher;
use crate::breaker::{BreakerError, CircuitBreaker};
use crate::network::{NetworkError, TransferNetwork, TransferRequest};

/// Attempts at claiming a record before giving the item back to the queue.
const CLAIM_ATTEMPTS: u32 = 3;

impl Classify for BreakerError<NetworkError> {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Open => ErrorClass::Transient,
            Self::Inner(err) => err.class(),
        }
    }
}

/// Result of claiming the transfer record for an attempt.
enum Claim {
    /// The record is pending and owned by this attempt.
    Attempt(TransferRecord),
    /// Nothing to send; return this outcome.
    Done(TransferOutcome),
}

/// Settles commission transfers against the payment network.
pub struct TransferProcessor {
    store: Arc<dyn Store>,
    network: Arc<dyn TransferNetwork>,
    breaker: Arc<CircuitBreaker>,
    audit: Arc<AuditBatcher>,
    concurrency_limit: usize,
}

impl TransferProcessor {
    /// Create a processor.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        network: Arc<dyn TransferNetwork>,
        breaker: Arc<CircuitBreaker>,
        audit: Arc<AuditBatcher>,
        concurrency_limit: usize,
    ) -> Self {
        Self {
            store,
            network,
            breaker,
            audit,
            concurrency_limit: concurrency_limit.max(1),
        }
    }

    /// The breaker guarding network calls.
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Settle many transfers, at most `concurrency_limit` at a time.
    ///
    /// Outcomes are returned in the order of `items`.
    pub async fn process_transfer_batch(&self, items: &[TransferItem]) -> Vec<TransferOutcome> {
        let mut outcomes = Vec::with_capacity(items.len());
        for window in items.chunks(self.concurrency_limit) {
            let settled = futures::future::join_all(
                window.iter().map(|item| self.process_transfer(item)),
            )
            .await;
            outcomes.extend(settled);
        }
        outcomes
    }

    /// Settle one transfer. Never fails: errors are folded into the outcome.
    pub async fn process_transfer(&self, item: &TransferItem) -> TransferOutcome {
        match self.settle(item).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(
                    ticket_id = %item.ticket_id,
                    payment_transaction_id = %item.payment_transaction_id,
                    error = %err,
                    "Transfer processing failed"
                );
                let retryable = err.class().is_retryable() || item.retries < MAX_TRANSFER_RETRIES;
                self.record_unexpected(item, &err.to_string(), retryable).await;
                TransferOutcome::failed(err.to_string(), retryable)
            }
        }
    }

    async fn settle(&self, item: &TransferItem) -> Result<TransferOutcome, StoreError> {
        let mut record = match self.claim(item).await? {
            Claim::Attempt(record) => record,
            Claim::Done(outcome) => return Ok(outcome),
        };
        let retries = item.retries.max(record.retry_count);

        let request = TransferRequest::for_item(item);
        let result = self
            .breaker
            .execute(|| self.network.transfer(&request))
            .await;

        match result {
            Ok(receipt) => {
                record.complete(receipt.transfer_id.clone());
                if let Err(e) = self.store.update_transfer(&record).await {
                    // Funds moved; the record catches up on the next delivery.
                    tracing::error!(
                        ticket_id = %item.ticket_id,
                        transfer_id = %receipt.transfer_id,
                        error = %e,
                        "Failed to record completed transfer"
                    );
                }

                tracing::info!(
                    ticket_id = %item.ticket_id,
                    payment_transaction_id = %item.payment_transaction_id,
                    transfer_id = %receipt.transfer_id,
                    amount_cents = %item.amount_cents,
                    "Commission transfer completed"
                );
                self.audit.add(
                    AuditLogEntry::new(
                        AuditAction::CommissionTransferSuccess,
                        json!({
                            "ticket_id": item.ticket_id,
                            "payment_transaction_id": item.payment_transaction_id,
                            "transfer_id": receipt.transfer_id,
                            "amount_cents": item.amount_cents,
                            "to_account": item.to_account,
                        }),
                    )
                    .with_company(item.company_id),
                );

                Ok(TransferOutcome::settled(receipt.transfer_id))
            }
            Err(err) => {
                let retryable =
                    err.class() == ErrorClass::Transient || retries < MAX_TRANSFER_RETRIES;
                let message = err.to_string();

                // A rejected call never reached the network.
                if matches!(err, BreakerError::Open) {
                    record.defer(&message);
                } else {
                    record.fail(&message);
                }
                if let Err(e) = self.store.update_transfer(&record).await {
                    tracing::error!(
                        ticket_id = %item.ticket_id,
                        error = %e,
                        "Failed to record transfer failure"
                    );
                }

                tracing::warn!(
                    ticket_id = %item.ticket_id,
                    payment_transaction_id = %item.payment_transaction_id,
                    retry_count = record.retry_count,
                    retryable = retryable,
                    error = %message,
                    "Commission transfer failed"
                );
                self.audit_failure(item, &message, retryable, record.retry_count);

                Ok(TransferOutcome::failed(message, retryable))
            }
        }
    }

    /// Find or create the record and move it to pending for this attempt.
    async fn claim(&self, item: &TransferItem) -> Result<Claim, StoreError> {
        for _ in 0..CLAIM_ATTEMPTS {
            let existing = self
                .store
                .find_transfer(&item.ticket_id, &item.payment_transaction_id)
                .await?;

            match existing {
                Some(record) if record.is_completed() => {
                    tracing::debug!(
                        ticket_id = %item.ticket_id,
                        payment_transaction_id = %item.payment_transaction_id,
                        "Transfer already completed"
                    );
                    let transfer_id = record.transfer_id.unwrap_or_default();
                    return Ok(Claim::Done(TransferOutcome::settled(transfer_id)));
                }
                Some(record) if item.retries.max(record.retry_count) >= MAX_TRANSFER_RETRIES => {
                    tracing::error!(
                        ticket_id = %item.ticket_id,
                        payment_transaction_id = %item.payment_transaction_id,
                        retries = item.retries.max(record.retry_count),
                        last_error = ?record.error_message,
                        "Transfer exceeded max retries"
                    );
                    return Ok(Claim::Done(TransferOutcome::failed(
                        format!("max retries exceeded ({MAX_TRANSFER_RETRIES})"),
                        false,
                    )));
                }
                Some(mut record) => {
                    record.begin_attempt(item.retries);
                    match self.store.update_transfer(&record).await {
                        Ok(()) => return Ok(Claim::Attempt(record)),
                        Err(StoreError::TerminalState { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
                None => {
                    let record = TransferRecord::pending(item);
                    match self.store.insert_transfer(&record).await {
                        Ok(()) => return Ok(Claim::Attempt(record)),
                        Err(e) if e.is_unique_violation() => {
                            tracing::debug!(
                                ticket_id = %item.ticket_id,
                                "Concurrent transfer attempt created the record first"
                            );
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        Err(StoreError::Unavailable(format!(
            "transfer record for ticket {} kept changing",
            item.ticket_id
        )))
    }

    async fn record_unexpected(&self, item: &TransferItem, message: &str, retryable: bool) {
        let mut retry_count = item.retries;
        if let Ok(Some(mut record)) = self
            .store
            .find_transfer(&item.ticket_id, &item.payment_transaction_id)
            .await
        {
            if !record.is_completed() {
                record.fail(message);
                retry_count = record.retry_count;
                if let Err(e) = self.store.update_transfer(&record).await {
                    tracing::debug!(
                        ticket_id = %item.ticket_id,
                        error = %e,
                        "Could not mark transfer failed"
                    );
                }
            }
        }
        self.audit_failure(item, message, retryable, retry_count);
    }

    fn audit_failure(&self, item: &TransferItem, message: &str, retryable: bool, retry_count: u32) {
        self.audit.add(
            AuditLogEntry::new(
                AuditAction::CommissionTransferFailed,
                json!({
                    "ticket_id": item.ticket_id,
                    "payment_transaction_id": item.payment_transaction_id,
                    "amount_cents": item.amount_cents,
                    "error": message,
                    "retryable": retryable,
                    "retry_count": retry_count,
                }),
            )
            .with_company(item.company_id),
        );
    }
}
