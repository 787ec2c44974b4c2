//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.
//! `RocksDB` has no unique constraints of its own, so every check-and-write
//! runs under `write_lock` and lands in a single `WriteBatch`.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded, Options,
    WriteBatch,
};

use ticketpay_core::{
    AuditLogEntry, CompanyAccount, CompanyId, TicketId, TicketRecord, TicketTransaction,
    TransferRecord,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::Store;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| StoreError::Unavailable("write lock poisoned".into()))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get<T: serde::de::DeserializeOwned>(&self, family: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(family)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn ticket_by_payment(&self, payment_transaction_id: &str) -> Result<Option<TicketRecord>> {
        let cf_index = self.cf(cf::TICKETS_BY_PAYMENT)?;
        let Some(raw_id) = self
            .db
            .get_cf(&cf_index, keys::payment_key(payment_transaction_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
        else {
            return Ok(None);
        };

        let ticket_id = keys::decode_ticket_id(&raw_id).ok_or_else(|| {
            StoreError::Serialization(format!(
                "corrupt ticket index entry for {payment_transaction_id}"
            ))
        })?;

        self.get(cf::TICKETS, &keys::ticket_key(&ticket_id))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

#[async_trait]
impl Store for RocksStore {
    // =========================================================================
    // Ticket Operations
    // =========================================================================

    async fn find_ticket_by_payment(
        &self,
        payment_transaction_id: &str,
    ) -> Result<Option<TicketRecord>> {
        self.ticket_by_payment(payment_transaction_id)
    }

    async fn find_tickets_by_payments(&self, ids: &[String]) -> Result<Vec<TicketRecord>> {
        let mut tickets = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(ticket) = self.ticket_by_payment(id)? {
                tickets.push(ticket);
            }
        }
        Ok(tickets)
    }

    async fn insert_ticket(&self, ticket: &TicketRecord) -> Result<()> {
        self.insert_tickets(std::slice::from_ref(ticket)).await
    }

    async fn insert_tickets(&self, tickets: &[TicketRecord]) -> Result<()> {
        let _guard = self.lock()?;
        let cf_tickets = self.cf(cf::TICKETS)?;
        let cf_index = self.cf(cf::TICKETS_BY_PAYMENT)?;

        let mut batch = WriteBatch::default();
        let mut seen = std::collections::HashSet::with_capacity(tickets.len());

        for ticket in tickets {
            let index_key = keys::payment_key(&ticket.payment_transaction_id);
            let taken = self
                .db
                .get_cf(&cf_index, &index_key)
                .map_err(|e| StoreError::Database(e.to_string()))?
                .is_some();

            if taken || !seen.insert(ticket.payment_transaction_id.as_str()) {
                return Err(StoreError::UniqueViolation {
                    table: cf::TICKETS,
                    key: ticket.payment_transaction_id.clone(),
                });
            }

            let ticket_key = keys::ticket_key(&ticket.id);
            batch.put_cf(&cf_tickets, &ticket_key, Self::serialize(ticket)?);
            batch.put_cf(&cf_index, &index_key, &ticket_key);
        }

        self.write(batch)
    }

    async fn insert_ticket_transactions(&self, entries: &[TicketTransaction]) -> Result<()> {
        let cf = self.cf(cf::TICKET_TRANSACTIONS)?;
        let mut batch = WriteBatch::default();
        for entry in entries {
            batch.put_cf(&cf, keys::ledger_entry_key(&entry.id), Self::serialize(entry)?);
        }
        self.write(batch)
    }

    // =========================================================================
    // Transfer Operations
    // =========================================================================

    async fn find_transfer(
        &self,
        ticket_id: &TicketId,
        payment_transaction_id: &str,
    ) -> Result<Option<TransferRecord>> {
        self.get(
            cf::TRANSFERS,
            &keys::transfer_key(ticket_id, payment_transaction_id),
        )
    }

    async fn insert_transfer(&self, record: &TransferRecord) -> Result<()> {
        let _guard = self.lock()?;
        let key = keys::transfer_key(&record.ticket_id, &record.payment_transaction_id);

        if self.get::<TransferRecord>(cf::TRANSFERS, &key)?.is_some() {
            return Err(StoreError::UniqueViolation {
                table: cf::TRANSFERS,
                key: format!("{}/{}", record.ticket_id, record.payment_transaction_id),
            });
        }

        let cf = self.cf(cf::TRANSFERS)?;
        self.db
            .put_cf(&cf, key, Self::serialize(record)?)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn update_transfer(&self, record: &TransferRecord) -> Result<()> {
        let _guard = self.lock()?;
        let key = keys::transfer_key(&record.ticket_id, &record.payment_transaction_id);
        let id = format!("{}/{}", record.ticket_id, record.payment_transaction_id);

        let stored: TransferRecord = self.get(cf::TRANSFERS, &key)?.ok_or(StoreError::NotFound {
            entity: "transfer",
            id: id.clone(),
        })?;

        if stored.is_completed() {
            return Err(StoreError::TerminalState {
                entity: "transfer",
                id,
            });
        }

        let cf = self.cf(cf::TRANSFERS)?;
        self.db
            .put_cf(&cf, key, Self::serialize(record)?)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    // =========================================================================
    // Audit Operations
    // =========================================================================

    async fn insert_audit_logs(&self, entries: &[AuditLogEntry]) -> Result<()> {
        let cf = self.cf(cf::AUDIT_LOGS)?;
        let mut batch = WriteBatch::default();
        for entry in entries {
            batch.put_cf(&cf, keys::audit_key(&entry.id), Self::serialize(entry)?);
        }
        self.write(batch)
    }

    // =========================================================================
    // Company Operations
    // =========================================================================

    async fn get_company_account(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<CompanyAccount>> {
        self.get(cf::COMPANIES, &keys::company_key(company_id))
    }

    async fn put_company_account(&self, account: &CompanyAccount) -> Result<()> {
        let cf = self.cf(cf::COMPANIES)?;
        self.db
            .put_cf(
                &cf,
                keys::company_key(&account.company_id),
                Self::serialize(account)?,
            )
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}
