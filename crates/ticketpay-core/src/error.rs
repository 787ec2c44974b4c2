//! Error types and failure classification for ticketpay.

use crate::ids::IdError;

/// Result type for ticketpay domain operations.
pub type Result<T> = std::result::Result<T, TicketError>;

/// How a failure should be treated by retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// A unique-key race. Resolved by re-reading the winning record, never by backoff.
    Conflict,
    /// Timeouts, rate limits, dropped connections. Retried with backoff up to a bound.
    Transient,
    /// Validation errors and unknown failures. Surfaced immediately.
    Fatal,
}

impl ErrorClass {
    /// Whether an operation failing with this class may be attempted again.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Conflict | Self::Transient)
    }
}

/// Errors that carry their own retry classification.
///
/// Implemented by the store and network error types so callers classify
/// failures by variant rather than by inspecting messages.
pub trait Classify {
    /// Classify this error.
    fn class(&self) -> ErrorClass;
}

/// Errors raised while creating tickets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TicketError {
    /// The request is malformed and will never succeed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A concurrent insert holds the same payment transaction id.
    #[error("duplicate payment transaction: {payment_transaction_id}")]
    Conflict {
        /// The contested idempotency key.
        payment_transaction_id: String,
    },

    /// The store is temporarily unavailable.
    #[error("transient storage failure: {0}")]
    Transient(String),

    /// The store failed in a way that is not expected to clear up.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}

impl Classify for TicketError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Conflict { .. } => ErrorClass::Conflict,
            Self::Transient(_) => ErrorClass::Transient,
            Self::Validation(_) | Self::Storage(_) | Self::InvalidId(_) => ErrorClass::Fatal,
        }
    }
}
