//! Key encoding utilities for `RocksDB`.

use ticketpay_core::ids::Uuid;
use ticketpay_core::{AuditLogId, CompanyId, LedgerEntryId, TicketId};

/// Create a ticket key from a ticket ID.
#[must_use]
pub fn ticket_key(ticket_id: &TicketId) -> Vec<u8> {
    ticket_id.as_bytes().to_vec()
}

/// Create a unique-index key from a payment transaction id.
#[must_use]
pub fn payment_key(payment_transaction_id: &str) -> Vec<u8> {
    payment_transaction_id.as_bytes().to_vec()
}

/// Create a companion transaction key.
#[must_use]
pub fn ledger_entry_key(entry_id: &LedgerEntryId) -> Vec<u8> {
    entry_id.to_bytes().to_vec()
}

/// Create a transfer key.
///
/// Format: `ticket_id (16 bytes) || payment_transaction_id (utf-8)`
#[must_use]
pub fn transfer_key(ticket_id: &TicketId, payment_transaction_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + payment_transaction_id.len());
    key.extend_from_slice(ticket_id.as_bytes());
    key.extend_from_slice(payment_transaction_id.as_bytes());
    key
}

/// Create an audit log key.
#[must_use]
pub fn audit_key(entry_id: &AuditLogId) -> Vec<u8> {
    entry_id.as_bytes().to_vec()
}

/// Create a company key.
#[must_use]
pub fn company_key(company_id: &CompanyId) -> Vec<u8> {
    company_id.as_bytes().to_vec()
}

/// Decode a ticket id stored as a unique-index value.
#[must_use]
pub fn decode_ticket_id(bytes: &[u8]) -> Option<TicketId> {
    let bytes: [u8; 16] = bytes.try_into().ok()?;
    Some(TicketId::from_uuid(Uuid::from_bytes(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_key_format() {
        let ticket_id = TicketId::generate();
        let key = transfer_key(&ticket_id, "pay_9");

        assert_eq!(key.len(), 21);
        assert_eq!(&key[..16], ticket_id.as_bytes());
        assert_eq!(&key[16..], b"pay_9");
    }

    #[test]
    fn ticket_id_roundtrips_through_index_value() {
        let ticket_id = TicketId::generate();
        assert_eq!(decode_ticket_id(&ticket_key(&ticket_id)), Some(ticket_id));
        assert_eq!(decode_ticket_id(b"short"), None);
    }
}
