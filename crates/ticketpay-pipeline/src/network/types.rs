//! Transfer API types.

use serde::{Deserialize, Serialize};

use ticketpay_core::TransferItem;

/// A transfer submitted to the payment network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferRequest {
    /// Debited account.
    pub from_account: String,
    /// Credited account.
    pub to_account: String,
    /// Amount in cents.
    pub amount_cents: i64,
    /// Idempotency reference, stable across retries of the same transfer.
    pub reference: String,
    /// Human-readable description.
    pub description: String,
}

impl TransferRequest {
    /// Build the network request settling `item`.
    #[must_use]
    pub fn for_item(item: &TransferItem) -> Self {
        Self {
            from_account: item.from_account.clone(),
            to_account: item.to_account.clone(),
            amount_cents: item.amount_cents,
            reference: item.reference(),
            description: format!("Ticket settlement {}", item.ticket_id),
        }
    }
}

/// A completed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransferReceipt {
    /// Network transfer id.
    #[serde(alias = "id")]
    pub transfer_id: String,
    /// Network-reported status.
    #[serde(default)]
    pub status: Option<String>,
}

/// Error body returned by the transfer API.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferErrorResponse {
    /// Error details.
    pub error: TransferErrorBody,
}

/// Error details.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferErrorBody {
    /// Machine-readable code.
    #[serde(default)]
    pub code: Option<String>,
    /// Error message.
    pub message: String,
}
