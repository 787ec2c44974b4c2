//! Payment network integration for commission transfers.
//!
//! The pipeline talks to the network through the [`TransferNetwork`] trait.
//! [`HttpTransferClient`] is the production implementation; tests supply
//! their own.

pub mod client;
pub mod types;

use async_trait::async_trait;

pub use client::{HttpTransferClient, NetworkError};
pub use types::*;

/// Moves funds between accounts on the payment network.
#[async_trait]
pub trait TransferNetwork: Send + Sync {
    /// Execute one transfer.
    ///
    /// Implementations must treat `request.reference` as an idempotency key:
    /// repeating a request with the same reference must not move funds twice.
    ///
    /// # Errors
    ///
    /// Returns a [`NetworkError`] classifying the failure.
    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, NetworkError>;
}
