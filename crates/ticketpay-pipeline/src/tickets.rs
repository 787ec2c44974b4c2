//! Idempotent ticket creation.
//!
//! The payment transaction id is the idempotency key. Creation probes for an
//! existing ticket, inserts when there is none, and on a unique violation
//! re-reads the row that won the race. Every path that finds a ticket for
//! the key reports success with that ticket's id, so repeated or concurrent
//! deliveries of one confirmation converge on a single ticket.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use ticketpay_core::{
    Classify, TicketCreationRequest, TicketError, TicketId, TicketRecord, TicketTransaction,
};
use ticketpay_store::Store;

use crate::queue::backoff_delay;

/// Outcome of [`TicketPipeline::create_ticket`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketCreationResult {
    /// Whether a ticket exists for the payment.
    pub success: bool,
    /// The ticket, new or pre-existing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<TicketId>,
    /// Whether the ticket already existed.
    pub duplicate: bool,
    /// Failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether another attempt may succeed.
    pub retryable: bool,
}

impl TicketCreationResult {
    fn created(created: &CreatedTicket) -> Self {
        Self {
            success: true,
            ticket_id: Some(created.ticket_id),
            duplicate: created.duplicate,
            error: None,
            retryable: false,
        }
    }

    fn failed(err: &TicketError) -> Self {
        Self {
            success: false,
            ticket_id: None,
            duplicate: false,
            error: Some(err.to_string()),
            retryable: err.class().is_retryable(),
        }
    }
}

/// A request that resolved to a ticket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedTicket {
    /// Idempotency key of the request.
    pub payment_transaction_id: String,
    /// Resolved ticket.
    pub ticket_id: TicketId,
    /// Whether the ticket already existed.
    pub duplicate: bool,
    /// The stored ticket.
    #[serde(skip)]
    pub ticket: TicketRecord,
}

impl CreatedTicket {
    fn new(ticket: TicketRecord, duplicate: bool) -> Self {
        Self {
            payment_transaction_id: ticket.payment_transaction_id.clone(),
            ticket_id: ticket.id,
            duplicate,
            ticket,
        }
    }
}

/// A request that did not resolve to a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedTicket {
    /// Idempotency key of the request.
    pub payment_transaction_id: String,
    /// Failure reason.
    pub error: String,
    /// Whether another attempt may succeed.
    pub retryable: bool,
}

impl FailedTicket {
    fn new(payment_transaction_id: &str, err: &TicketError) -> Self {
        Self {
            payment_transaction_id: payment_transaction_id.to_string(),
            error: err.to_string(),
            retryable: err.class().is_retryable(),
        }
    }
}

/// Outcome of [`TicketPipeline::create_tickets_batch`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchTicketCreationResult {
    /// Requests that resolved to a ticket.
    pub successful: Vec<CreatedTicket>,
    /// Requests that did not.
    pub failed: Vec<FailedTicket>,
    /// Requests received.
    pub total: usize,
}

/// Creates tickets exactly once per payment transaction.
#[derive(Clone)]
pub struct TicketPipeline {
    store: Arc<dyn Store>,
    base_delay: Duration,
    max_delay: Duration,
}

impl TicketPipeline {
    /// Create a pipeline with the default retry backoff (1 s doubling, 30 s cap).
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }

    /// Override the backoff used by [`create_ticket_with_retry`](Self::create_ticket_with_retry).
    #[must_use]
    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Create the ticket for one payment, or return the one that exists.
    pub async fn create_ticket(&self, req: &TicketCreationRequest) -> TicketCreationResult {
        match self.resolve(req).await {
            Ok(created) => TicketCreationResult::created(&created),
            Err(err) => {
                tracing::warn!(
                    payment_transaction_id = %req.payment_transaction_id,
                    error = %err,
                    "Ticket creation failed"
                );
                TicketCreationResult::failed(&err)
            }
        }
    }

    /// [`create_ticket`](Self::create_ticket), retrying conflicts and
    /// transient failures up to `max_retries` times with exponential backoff.
    pub async fn create_ticket_with_retry(
        &self,
        req: &TicketCreationRequest,
        max_retries: u32,
    ) -> TicketCreationResult {
        let mut attempt = 0;
        loop {
            match self.resolve(req).await {
                Ok(created) => return TicketCreationResult::created(&created),
                Err(err) if err.class().is_retryable() && attempt < max_retries => {
                    attempt += 1;
                    let delay = backoff_delay(attempt, self.base_delay, self.max_delay);
                    tracing::warn!(
                        payment_transaction_id = %req.payment_transaction_id,
                        attempt = attempt,
                        max_retries = max_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Ticket creation failed, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    tracing::error!(
                        payment_transaction_id = %req.payment_transaction_id,
                        attempts = attempt + 1,
                        error = %err,
                        "Ticket creation failed permanently"
                    );
                    return TicketCreationResult::failed(&err);
                }
            }
        }
    }

    /// Create tickets for many payments with one probe and one bulk insert.
    ///
    /// If the bulk insert fails (for example because a concurrent writer took
    /// one of the keys) every new request falls back to
    /// [`create_ticket`](Self::create_ticket) semantics individually.
    pub async fn create_tickets_batch(
        &self,
        reqs: &[TicketCreationRequest],
    ) -> BatchTicketCreationResult {
        let total = reqs.len();
        let mut successful = Vec::with_capacity(total);
        let mut failed = Vec::new();

        // Validate and collapse repeated keys onto their first request.
        let mut unique: Vec<&TicketCreationRequest> = Vec::with_capacity(total);
        let mut repeats: Vec<&TicketCreationRequest> = Vec::new();
        let mut seen = HashSet::with_capacity(total);
        for req in reqs {
            if let Err(err) = req.validate() {
                failed.push(FailedTicket::new(&req.payment_transaction_id, &err));
            } else if seen.insert(req.payment_transaction_id.as_str()) {
                unique.push(req);
            } else {
                repeats.push(req);
            }
        }

        let ids: Vec<String> = unique
            .iter()
            .map(|req| req.payment_transaction_id.clone())
            .collect();

        let mut resolved: HashMap<String, Result<CreatedTicket, TicketError>> =
            HashMap::with_capacity(unique.len());

        match self.store.find_tickets_by_payments(&ids).await {
            Ok(existing) => {
                for ticket in existing {
                    resolved.insert(
                        ticket.payment_transaction_id.clone(),
                        Ok(CreatedTicket::new(ticket, true)),
                    );
                }

                let fresh: Vec<&TicketCreationRequest> = unique
                    .iter()
                    .copied()
                    .filter(|req| !resolved.contains_key(&req.payment_transaction_id))
                    .collect();
                self.insert_fresh(&fresh, &mut resolved).await;
            }
            Err(err) => {
                tracing::warn!(
                    count = unique.len(),
                    error = %err,
                    "Batch idempotency probe failed, creating tickets individually"
                );
                self.resolve_each(&unique, &mut resolved).await;
            }
        }

        for req in &unique {
            match resolved.get(&req.payment_transaction_id) {
                Some(Ok(created)) => successful.push(created.clone()),
                Some(Err(err)) => failed.push(FailedTicket::new(&req.payment_transaction_id, err)),
                None => {}
            }
        }

        for req in repeats {
            match resolved.get(&req.payment_transaction_id) {
                Some(Ok(created)) => {
                    successful.push(CreatedTicket::new(created.ticket.clone(), true));
                }
                Some(Err(err)) => failed.push(FailedTicket::new(&req.payment_transaction_id, err)),
                None => {}
            }
        }

        tracing::info!(
            total = total,
            successful = successful.len(),
            failed = failed.len(),
            "Ticket batch processed"
        );

        BatchTicketCreationResult {
            successful,
            failed,
            total,
        }
    }

    async fn insert_fresh(
        &self,
        fresh: &[&TicketCreationRequest],
        resolved: &mut HashMap<String, Result<CreatedTicket, TicketError>>,
    ) {
        if fresh.is_empty() {
            return;
        }

        let records: Vec<TicketRecord> = fresh
            .iter()
            .map(|req| TicketRecord::from_request(req))
            .collect();

        match self.store.insert_tickets(&records).await {
            Ok(()) => {
                self.record_companions(&records);
                for ticket in records {
                    resolved.insert(
                        ticket.payment_transaction_id.clone(),
                        Ok(CreatedTicket::new(ticket, false)),
                    );
                }
            }
            Err(err) => {
                tracing::warn!(
                    count = records.len(),
                    error = %err,
                    "Bulk ticket insert failed, falling back to individual inserts"
                );
                self.resolve_each(fresh, resolved).await;
            }
        }
    }

    async fn resolve_each(
        &self,
        reqs: &[&TicketCreationRequest],
        resolved: &mut HashMap<String, Result<CreatedTicket, TicketError>>,
    ) {
        let outcomes = futures::future::join_all(reqs.iter().map(|req| self.resolve(req))).await;
        for (req, outcome) in reqs.iter().zip(outcomes) {
            resolved.insert(req.payment_transaction_id.clone(), outcome);
        }
    }

    /// Probe, insert, and re-probe on a lost race.
    async fn resolve(&self, req: &TicketCreationRequest) -> Result<CreatedTicket, TicketError> {
        req.validate()?;

        if let Some(existing) = self
            .store
            .find_ticket_by_payment(&req.payment_transaction_id)
            .await?
        {
            tracing::debug!(
                payment_transaction_id = %req.payment_transaction_id,
                ticket_id = %existing.id,
                "Ticket already exists"
            );
            return Ok(CreatedTicket::new(existing, true));
        }

        let ticket = TicketRecord::from_request(req);
        match self.store.insert_ticket(&ticket).await {
            Ok(()) => {
                tracing::info!(
                    payment_transaction_id = %ticket.payment_transaction_id,
                    ticket_id = %ticket.id,
                    amount_cents = %ticket.amount_cents,
                    commission_cents = %ticket.commission_cents,
                    "Ticket created"
                );
                self.record_companions(std::slice::from_ref(&ticket));
                Ok(CreatedTicket::new(ticket, false))
            }
            Err(err) if err.is_unique_violation() => {
                let winner = self
                    .store
                    .find_ticket_by_payment(&req.payment_transaction_id)
                    .await?;
                match winner {
                    Some(winner) => {
                        tracing::debug!(
                            payment_transaction_id = %req.payment_transaction_id,
                            ticket_id = %winner.id,
                            "Lost insert race, using existing ticket"
                        );
                        Ok(CreatedTicket::new(winner, true))
                    }
                    None => Err(TicketError::Conflict {
                        payment_transaction_id: req.payment_transaction_id.clone(),
                    }),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Write companion ledger entries in the background.
    fn record_companions(&self, tickets: &[TicketRecord]) {
        let entries: Vec<TicketTransaction> =
            tickets.iter().map(TicketTransaction::for_ticket).collect();
        let store = Arc::clone(&self.store);

        tokio::spawn(async move {
            if let Err(e) = store.insert_ticket_transactions(&entries).await {
                tracing::error!(
                    count = entries.len(),
                    error = %e,
                    "Failed to record ticket transactions"
                );
            }
        });
    }
}
