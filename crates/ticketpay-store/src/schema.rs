//! Table names and `RocksDB` column families.

/// Logical tables. Used as column family names by the `RocksDB` backend and
/// in `StoreError` messages by every backend.
pub mod cf {
    /// Ticket records, keyed by `ticket_id`.
    pub const TICKETS: &str = "tickets";

    /// Unique index: `payment_transaction_id` -> `ticket_id`.
    pub const TICKETS_BY_PAYMENT: &str = "tickets_by_payment";

    /// Companion ticket transactions, keyed by entry id (ULID).
    pub const TICKET_TRANSACTIONS: &str = "ticket_transactions";

    /// Transfer records, keyed by `ticket_id || payment_transaction_id`.
    pub const TRANSFERS: &str = "transfers";

    /// Audit log entries, keyed by entry id.
    pub const AUDIT_LOGS: &str = "audit_logs";

    /// Company payout accounts, keyed by `company_id`.
    pub const COMPANIES: &str = "companies";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::TICKETS,
        cf::TICKETS_BY_PAYMENT,
        cf::TICKET_TRANSACTIONS,
        cf::TRANSFERS,
        cf::AUDIT_LOGS,
        cf::COMPANIES,
    ]
}
