//! Error types for ticketpay storage.

use ticketpay_core::{Classify, ErrorClass};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// The database is temporarily unreachable or overloaded.
    #[error("database unavailable: {0}")]
    Unavailable(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Key that was looked up.
        id: String,
    },

    /// An insert collided with an existing row on a unique key.
    #[error("unique violation on {table}: {key}")]
    UniqueViolation {
        /// Table holding the constraint.
        table: &'static str,
        /// The conflicting key.
        key: String,
    },

    /// The record reached a terminal state and can no longer change.
    #[error("{entity} is in a terminal state: {id}")]
    TerminalState {
        /// Kind of record.
        entity: &'static str,
        /// Record key.
        id: String,
    },
}

impl StoreError {
    /// Whether this is a unique-key collision.
    #[must_use]
    pub const fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation { .. })
    }
}

impl Classify for StoreError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::UniqueViolation { .. } | Self::TerminalState { .. } => ErrorClass::Conflict,
            Self::Unavailable(_) => ErrorClass::Transient,
            Self::Database(_) | Self::Serialization(_) | Self::NotFound { .. } => {
                ErrorClass::Fatal
            }
        }
    }
}

impl From<StoreError> for ticketpay_core::TicketError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation { key, .. } => Self::Conflict {
                payment_transaction_id: key,
            },
            StoreError::Unavailable(msg) => Self::Transient(msg),
            other => Self::Storage(other.to_string()),
        }
    }
}
