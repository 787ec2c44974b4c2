//! Core types for ticketpay.
//!
//! This crate provides the domain types shared by the store and the
//! ingestion/settlement pipeline:
//!
//! - **Identifiers**: `TicketId`, `CompanyId`, `RouteId`, `TransferRecordId`, `LedgerEntryId`
//! - **Tickets**: `TicketCreationRequest`, `TicketRecord`, `TicketTransaction`, `Commission`
//! - **Transfers**: `TransferItem`, `TransferRecord`, `TransferOutcome`
//! - **Audit**: `AuditLogEntry`, `AuditAction`
//! - **Errors**: `TicketError`, `ErrorClass`, `Classify`
//!
//! # Money
//!
//! All amounts are integer cents (`i64`). Commission rates are percentages and
//! are rounded to the nearest cent when applied.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod audit;
pub mod error;
pub mod ids;
pub mod ticket;
pub mod transfer;

pub use account::CompanyAccount;
pub use audit::{AuditAction, AuditLogEntry};
pub use error::{Classify, ErrorClass, Result, TicketError};
pub use ids::{
    AuditLogId, CompanyId, IdError, LedgerEntryId, RouteId, TicketId, TransferRecordId, UserId,
};
pub use ticket::{
    Commission, TicketCreationRequest, TicketRecord, TicketStatus, TicketTransaction,
    MAX_COMMISSION_RATE,
};
pub use transfer::{
    TransferItem, TransferOutcome, TransferRecord, TransferStatus, MAX_TRANSFER_RETRIES,
};
