//! Commission transfer types for ticketpay.
//!
//! Every ticket is settled by exactly one transfer of its net amount from the
//! platform settlement account to the company's payout account. Transfer
//! records are keyed by `(ticket_id, payment_transaction_id)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CompanyId, TicketId, TicketRecord, TransferRecordId};

/// Attempts after which a failed transfer becomes terminal.
pub const MAX_TRANSFER_RETRIES: u32 = 5;

/// A transfer waiting to be settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferItem {
    /// Ticket being settled.
    pub ticket_id: TicketId,
    /// Payment transaction id of the ticket.
    pub payment_transaction_id: String,
    /// Company receiving the funds.
    pub company_id: CompanyId,
    /// Debited account.
    pub from_account: String,
    /// Credited account.
    pub to_account: String,
    /// Amount to move, in cents.
    pub amount_cents: i64,
    /// Attempts already made for this transfer.
    pub retries: u32,
}

impl TransferItem {
    /// Build the settlement of a ticket's net amount.
    #[must_use]
    pub fn for_ticket(
        ticket: &TicketRecord,
        from_account: impl Into<String>,
        to_account: impl Into<String>,
    ) -> Self {
        Self {
            ticket_id: ticket.id,
            payment_transaction_id: ticket.payment_transaction_id.clone(),
            company_id: ticket.company_id,
            from_account: from_account.into(),
            to_account: to_account.into(),
            amount_cents: ticket.net_cents,
            retries: 0,
        }
    }

    /// Reference sent to the payment network. Stable across retries.
    #[must_use]
    pub fn reference(&self) -> String {
        format!("ticket-{}-{}", self.ticket_id, self.payment_transaction_id)
    }
}

/// Status of a transfer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Attempt in progress.
    Pending,
    /// Settled. Terminal; never mutated again.
    Completed,
    /// Last attempt failed. Retryable until the retry ceiling.
    Failed,
}

/// A persisted transfer attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Record id.
    pub id: TransferRecordId,
    /// Ticket being settled.
    pub ticket_id: TicketId,
    /// Payment transaction id of the ticket.
    pub payment_transaction_id: String,
    /// Company receiving the funds.
    pub company_id: CompanyId,
    /// Debited account.
    pub from_account: String,
    /// Credited account.
    pub to_account: String,
    /// Amount, in cents.
    pub amount_cents: i64,
    /// Current status.
    pub status: TransferStatus,
    /// Payment network transfer id, set once completed.
    pub transfer_id: Option<String>,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Last failure reason.
    pub error_message: Option<String>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
    /// When the transfer completed.
    pub completed_at: Option<DateTime<Utc>>,
}

impl TransferRecord {
    /// Create a pending record for an item.
    #[must_use]
    pub fn pending(item: &TransferItem) -> Self {
        let now = Utc::now();
        Self {
            id: TransferRecordId::generate(),
            ticket_id: item.ticket_id,
            payment_transaction_id: item.payment_transaction_id.clone(),
            company_id: item.company_id,
            from_account: item.from_account.clone(),
            to_account: item.to_account.clone(),
            amount_cents: item.amount_cents,
            status: TransferStatus::Pending,
            transfer_id: None,
            retry_count: item.retries,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Whether the record reached its terminal success state.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == TransferStatus::Completed
    }

    /// Move back to pending for a new attempt.
    pub fn begin_attempt(&mut self, retries: u32) {
        self.status = TransferStatus::Pending;
        self.retry_count = self.retry_count.max(retries);
        self.updated_at = Utc::now();
    }

    /// Mark the record settled.
    pub fn complete(&mut self, transfer_id: impl Into<String>) {
        let now = Utc::now();
        self.status = TransferStatus::Completed;
        self.transfer_id = Some(transfer_id.into());
        self.error_message = None;
        self.updated_at = now;
        self.completed_at = Some(now);
    }

    /// Mark the attempt failed.
    pub fn fail(&mut self, error_message: impl Into<String>) {
        self.status = TransferStatus::Failed;
        self.retry_count += 1;
        self.error_message = Some(error_message.into());
        self.updated_at = Utc::now();
    }

    /// Mark the attempt failed without spending retry budget. For attempts
    /// that never reached the payment network.
    pub fn defer(&mut self, error_message: impl Into<String>) {
        self.status = TransferStatus::Failed;
        self.error_message = Some(error_message.into());
        self.updated_at = Utc::now();
    }
}

/// Outcome of settling one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferOutcome {
    /// Whether the funds moved (now or on an earlier attempt).
    pub success: bool,
    /// Payment network transfer id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<String>,
    /// Failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether another attempt may succeed.
    pub retryable: bool,
}

impl TransferOutcome {
    /// A settled transfer.
    #[must_use]
    pub fn settled(transfer_id: impl Into<String>) -> Self {
        Self {
            success: true,
            transfer_id: Some(transfer_id.into()),
            error: None,
            retryable: false,
        }
    }

    /// A failed attempt.
    #[must_use]
    pub fn failed(error: impl Into<String>, retryable: bool) -> Self {
        Self {
            success: false,
            transfer_id: None,
            error: Some(error.into()),
            retryable,
        }
    }
}
