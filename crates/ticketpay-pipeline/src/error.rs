//! Pipeline error types.

use ticketpay_core::{Classify, ErrorClass, TicketError};
use ticketpay_store::StoreError;

/// Failure of a whole batch handed to a [`BatchProcessor`](crate::queue::BatchProcessor).
///
/// Every variant makes the queue retry the batch; the class is only used for
/// logging.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProcessError {
    /// A dependency is temporarily unavailable.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Ticket creation error.
    #[error("ticket error: {0}")]
    Ticket(#[from] TicketError),
}

impl Classify for ProcessError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Transient(_) => ErrorClass::Transient,
            Self::Store(err) => err.class(),
            Self::Ticket(err) => err.class(),
        }
    }
}
