//! In-memory storage implementation.
//!
//! Tables live behind a single `tokio::sync::RwLock`, so every write
//! (including the check half of check-and-insert) is serialized and unique
//! keys hold under concurrent access.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use ticketpay_core::{
    AuditLogEntry, CompanyAccount, CompanyId, TicketId, TicketRecord, TicketTransaction,
    TransferRecord,
};

use crate::error::{Result, StoreError};
use crate::schema::cf;
use crate::Store;

#[derive(Debug, Default)]
struct Tables {
    tickets: HashMap<TicketId, TicketRecord>,
    tickets_by_payment: HashMap<String, TicketId>,
    ticket_transactions: Vec<TicketTransaction>,
    transfers: HashMap<(TicketId, String), TransferRecord>,
    audit_logs: Vec<AuditLogEntry>,
    companies: HashMap<CompanyId, CompanyAccount>,
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted tickets.
    pub async fn ticket_count(&self) -> usize {
        self.tables.read().await.tickets.len()
    }

    /// All persisted tickets.
    pub async fn tickets(&self) -> Vec<TicketRecord> {
        self.tables.read().await.tickets.values().cloned().collect()
    }

    /// All companion ticket transactions, in insertion order.
    pub async fn ticket_transactions(&self) -> Vec<TicketTransaction> {
        self.tables.read().await.ticket_transactions.clone()
    }

    /// All transfer records.
    pub async fn transfers(&self) -> Vec<TransferRecord> {
        self.tables.read().await.transfers.values().cloned().collect()
    }

    /// All audit entries, in insertion order.
    pub async fn audit_logs(&self) -> Vec<AuditLogEntry> {
        self.tables.read().await.audit_logs.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    // =========================================================================
    // Ticket Operations
    // =========================================================================

    async fn find_ticket_by_payment(
        &self,
        payment_transaction_id: &str,
    ) -> Result<Option<TicketRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .tickets_by_payment
            .get(payment_transaction_id)
            .and_then(|id| tables.tickets.get(id))
            .cloned())
    }

    async fn find_tickets_by_payments(&self, ids: &[String]) -> Result<Vec<TicketRecord>> {
        let tables = self.tables.read().await;
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();

        Ok(wanted
            .into_iter()
            .filter_map(|payment| tables.tickets_by_payment.get(payment))
            .filter_map(|id| tables.tickets.get(id))
            .cloned()
            .collect())
    }

    async fn insert_ticket(&self, ticket: &TicketRecord) -> Result<()> {
        self.insert_tickets(std::slice::from_ref(ticket)).await
    }

    async fn insert_tickets(&self, tickets: &[TicketRecord]) -> Result<()> {
        let mut tables = self.tables.write().await;

        // Check every row before writing any of them.
        let mut seen = HashSet::with_capacity(tickets.len());
        for ticket in tickets {
            let key = ticket.payment_transaction_id.as_str();
            if tables.tickets_by_payment.contains_key(key) || !seen.insert(key) {
                return Err(StoreError::UniqueViolation {
                    table: cf::TICKETS,
                    key: key.to_string(),
                });
            }
        }

        for ticket in tickets {
            tables
                .tickets_by_payment
                .insert(ticket.payment_transaction_id.clone(), ticket.id);
            tables.tickets.insert(ticket.id, ticket.clone());
        }

        Ok(())
    }

    async fn insert_ticket_transactions(&self, entries: &[TicketTransaction]) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.ticket_transactions.extend_from_slice(entries);
        Ok(())
    }

    // =========================================================================
    // Transfer Operations
    // =========================================================================

    async fn find_transfer(
        &self,
        ticket_id: &TicketId,
        payment_transaction_id: &str,
    ) -> Result<Option<TransferRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .transfers
            .get(&(*ticket_id, payment_transaction_id.to_string()))
            .cloned())
    }

    async fn insert_transfer(&self, record: &TransferRecord) -> Result<()> {
        let mut tables = self.tables.write().await;
        let key = (record.ticket_id, record.payment_transaction_id.clone());

        if tables.transfers.contains_key(&key) {
            return Err(StoreError::UniqueViolation {
                table: cf::TRANSFERS,
                key: format!("{}/{}", record.ticket_id, record.payment_transaction_id),
            });
        }

        tables.transfers.insert(key, record.clone());
        Ok(())
    }

    async fn update_transfer(&self, record: &TransferRecord) -> Result<()> {
        let mut tables = self.tables.write().await;
        let key = (record.ticket_id, record.payment_transaction_id.clone());
        let id = format!("{}/{}", record.ticket_id, record.payment_transaction_id);

        let stored = tables
            .transfers
            .get_mut(&key)
            .ok_or(StoreError::NotFound {
                entity: "transfer",
                id: id.clone(),
            })?;

        if stored.is_completed() {
            return Err(StoreError::TerminalState {
                entity: "transfer",
                id,
            });
        }

        *stored = record.clone();
        Ok(())
    }

    // =========================================================================
    // Audit Operations
    // =========================================================================

    async fn insert_audit_logs(&self, entries: &[AuditLogEntry]) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.audit_logs.extend_from_slice(entries);
        Ok(())
    }

    // =========================================================================
    // Company Operations
    // =========================================================================

    async fn get_company_account(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<CompanyAccount>> {
        Ok(self.tables.read().await.companies.get(company_id).cloned())
    }

    async fn put_company_account(&self, account: &CompanyAccount) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.companies.insert(account.company_id, account.clone());
        Ok(())
    }
}
