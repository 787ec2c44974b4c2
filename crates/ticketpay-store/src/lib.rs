//! Storage layer for ticketpay.
//!
//! This crate defines the persistent-store boundary used by the ingestion and
//! settlement pipeline, and two implementations of it:
//!
//! - [`MemoryStore`]: process-local tables, used by tests and single-node setups
//! - `RocksStore`: `RocksDB` column families (feature `rocksdb-backend`)
//!
//! # Uniqueness
//!
//! Every backend enforces two unique keys and reports collisions as
//! [`StoreError::UniqueViolation`]:
//!
//! - tickets: `payment_transaction_id`
//! - transfers: `(ticket_id, payment_transaction_id)`
//!
//! These constraints are the only concurrency control the pipeline relies on.
//! Callers race to insert and resolve collisions by re-reading the winner.
//!
//! # Example
//!
//! ```no_run
//! use ticketpay_store::{MemoryStore, Store};
//!
//! # async fn example() -> ticketpay_store::Result<()> {
//! let store = MemoryStore::new();
//! let existing = store.find_ticket_by_payment("pay_123").await?;
//! assert!(existing.is_none());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod memory;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use async_trait::async_trait;
use ticketpay_core::{
    AuditLogEntry, CompanyAccount, CompanyId, TicketId, TicketRecord, TicketTransaction,
    TransferRecord,
};

/// The storage trait defining all database operations the pipeline needs.
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Ticket Operations
    // =========================================================================

    /// Look up a ticket by its payment transaction id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_ticket_by_payment(
        &self,
        payment_transaction_id: &str,
    ) -> Result<Option<TicketRecord>>;

    /// Look up every ticket whose payment transaction id is in `ids`.
    ///
    /// Missing ids are simply absent from the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_tickets_by_payments(&self, ids: &[String]) -> Result<Vec<TicketRecord>>;

    /// Insert a ticket.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UniqueViolation` if a ticket with the same payment
    /// transaction id exists.
    async fn insert_ticket(&self, ticket: &TicketRecord) -> Result<()>;

    /// Insert many tickets atomically. Either all rows are written or none.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UniqueViolation` if any payment transaction id is
    /// already taken or repeated within `tickets`.
    async fn insert_tickets(&self, tickets: &[TicketRecord]) -> Result<()>;

    /// Insert companion ticket transactions.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_ticket_transactions(&self, entries: &[TicketTransaction]) -> Result<()>;

    // =========================================================================
    // Transfer Operations
    // =========================================================================

    /// Look up a transfer record by its natural key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_transfer(
        &self,
        ticket_id: &TicketId,
        payment_transaction_id: &str,
    ) -> Result<Option<TransferRecord>>;

    /// Insert a transfer record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UniqueViolation` if a record with the same
    /// `(ticket_id, payment_transaction_id)` exists.
    async fn insert_transfer(&self, record: &TransferRecord) -> Result<()>;

    /// Replace a transfer record, matched by natural key.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if no record exists.
    /// - `StoreError::TerminalState` if the stored record is completed.
    async fn update_transfer(&self, record: &TransferRecord) -> Result<()>;

    // =========================================================================
    // Audit Operations
    // =========================================================================

    /// Append audit log entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_audit_logs(&self, entries: &[AuditLogEntry]) -> Result<()>;

    // =========================================================================
    // Company Operations
    // =========================================================================

    /// Get a company's payout account.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_company_account(&self, company_id: &CompanyId)
        -> Result<Option<CompanyAccount>>;

    /// Insert or replace a company's payout account.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn put_company_account(&self, account: &CompanyAccount) -> Result<()>;
}
