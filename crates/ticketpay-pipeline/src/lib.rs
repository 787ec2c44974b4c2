//! Ticketpay ingestion and settlement pipeline.
//!
//! This crate turns payment confirmations into tickets and settles each
//! ticket's net amount to the operating company:
//!
//! - [`queue`]: generic batch queue with size/time flush, single-flight and retry backoff
//! - [`tickets`]: idempotent ticket creation keyed by payment transaction id
//! - [`transfers`]: idempotent commission transfers behind a [`CircuitBreaker`]
//! - [`audit`]: batched audit log sink
//! - [`network`]: payment network trait and HTTP client
//! - [`service`]: [`SettlementService`], which owns and wires the above
//!
//! # Idempotency
//!
//! No component keeps its own dedup state. Duplicate deliveries are absorbed
//! by the store's unique keys: a lost insert race is resolved by re-reading
//! the winning row, so concurrent duplicates converge on the same ticket and
//! the same transfer record.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod audit;
pub mod breaker;
pub mod config;
pub mod error;
pub mod network;
pub mod queue;
pub mod service;
pub mod ticket_queue;
pub mod tickets;
pub mod transfer_queue;
pub mod transfers;

pub use audit::AuditBatcher;
pub use breaker::{BreakerError, CircuitBreaker, CircuitBreakerState, CircuitState};
pub use config::{AuditConfig, BreakerConfig, NetworkConfig, PipelineConfig, QueueConfig};
pub use error::ProcessError;
pub use network::{
    HttpTransferClient, NetworkError, TransferNetwork, TransferReceipt, TransferRequest,
};
pub use queue::{BatchProcessor, BatchQueue, BatchResult, QueueItem, QueueStats};
pub use service::SettlementService;
pub use ticket_queue::{TicketBatchProcessor, TicketQueue};
pub use tickets::{BatchTicketCreationResult, TicketCreationResult, TicketPipeline};
pub use transfer_queue::{TransferBatchProcessor, TransferQueue};
pub use transfers::TransferProcessor;
