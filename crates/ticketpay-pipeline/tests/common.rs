//! Common test utilities for ticketpay pipeline integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use ticketpay_core::{
    AuditLogEntry, CompanyAccount, CompanyId, RouteId, TicketCreationRequest, TicketId,
    TicketRecord, TicketTransaction, TransferRecord,
};
use ticketpay_pipeline::{
    NetworkError, PipelineConfig, QueueConfig, SettlementService, TransferNetwork,
    TransferReceipt, TransferRequest,
};
use ticketpay_store::{MemoryStore, Store, StoreError};

// ============================================================================
// Payment network double
// ============================================================================

/// Records every transfer request and answers from a script.
///
/// Scripted responses are consumed first; once the script is empty every call
/// succeeds (or fails with `fallback_error` when set).
#[derive(Default)]
pub struct MockNetwork {
    calls: AtomicUsize,
    requests: Mutex<Vec<TransferRequest>>,
    script: Mutex<VecDeque<Result<(), NetworkError>>>,
    fallback_error: Mutex<Option<NetworkError>>,
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail every call with `err`.
    pub fn failing(err: NetworkError) -> Arc<Self> {
        let network = Self::default();
        *network.fallback_error.lock().unwrap() = Some(err);
        Arc::new(network)
    }

    /// Queue responses for the next calls.
    pub fn script(&self, responses: impl IntoIterator<Item = Result<(), NetworkError>>) {
        self.script.lock().unwrap().extend(responses);
    }

    /// Stop failing calls that are not scripted.
    pub fn recover(&self) {
        *self.fallback_error.lock().unwrap() = None;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TransferRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransferNetwork for MockNetwork {
    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, NetworkError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let scripted = self.script.lock().unwrap().pop_front();
        let result = match scripted {
            Some(result) => result,
            None => match self.fallback_error.lock().unwrap().clone() {
                Some(err) => Err(err),
                None => Ok(()),
            },
        };

        result.map(|()| TransferReceipt {
            transfer_id: format!("tr_{n:05}"),
            status: Some("succeeded".into()),
        })
    }
}

// ============================================================================
// Fault-injecting store
// ============================================================================

/// A [`MemoryStore`] whose operations can be made to fail on demand.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    /// Fail `insert_tickets` calls with more than one row.
    pub fail_bulk_tickets: AtomicBool,
    /// Fail this many upcoming `find_ticket_by_payment` calls as unavailable.
    pub probe_outages: AtomicUsize,
    /// Fail `insert_audit_logs` calls with more than one entry.
    pub fail_bulk_audit: AtomicBool,
    /// Count of `find_ticket_by_payment` calls.
    pub probes: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn find_ticket_by_payment(
        &self,
        payment_transaction_id: &str,
    ) -> ticketpay_store::Result<Option<TicketRecord>> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let outage = self
            .probe_outages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if outage {
            return Err(StoreError::Unavailable("connection pool exhausted".into()));
        }
        self.inner.find_ticket_by_payment(payment_transaction_id).await
    }

    async fn find_tickets_by_payments(
        &self,
        ids: &[String],
    ) -> ticketpay_store::Result<Vec<TicketRecord>> {
        self.inner.find_tickets_by_payments(ids).await
    }

    async fn insert_ticket(&self, ticket: &TicketRecord) -> ticketpay_store::Result<()> {
        self.inner.insert_ticket(ticket).await
    }

    async fn insert_tickets(&self, tickets: &[TicketRecord]) -> ticketpay_store::Result<()> {
        if tickets.len() > 1 && self.fail_bulk_tickets.load(Ordering::SeqCst) {
            return Err(StoreError::Database("statement timeout".into()));
        }
        self.inner.insert_tickets(tickets).await
    }

    async fn insert_ticket_transactions(
        &self,
        entries: &[TicketTransaction],
    ) -> ticketpay_store::Result<()> {
        self.inner.insert_ticket_transactions(entries).await
    }

    async fn find_transfer(
        &self,
        ticket_id: &TicketId,
        payment_transaction_id: &str,
    ) -> ticketpay_store::Result<Option<TransferRecord>> {
        self.inner.find_transfer(ticket_id, payment_transaction_id).await
    }

    async fn insert_transfer(&self, record: &TransferRecord) -> ticketpay_store::Result<()> {
        self.inner.insert_transfer(record).await
    }

    async fn update_transfer(&self, record: &TransferRecord) -> ticketpay_store::Result<()> {
        self.inner.update_transfer(record).await
    }

    async fn insert_audit_logs(&self, entries: &[AuditLogEntry]) -> ticketpay_store::Result<()> {
        if entries.len() > 1 && self.fail_bulk_audit.load(Ordering::SeqCst) {
            return Err(StoreError::Database("audit table locked".into()));
        }
        self.inner.insert_audit_logs(entries).await
    }

    async fn get_company_account(
        &self,
        company_id: &CompanyId,
    ) -> ticketpay_store::Result<Option<CompanyAccount>> {
        self.inner.get_company_account(company_id).await
    }

    async fn put_company_account(&self, account: &CompanyAccount) -> ticketpay_store::Result<()> {
        self.inner.put_company_account(account).await
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// A valid request for `company`.
pub fn ticket_request(payment_transaction_id: &str, company: CompanyId) -> TicketCreationRequest {
    TicketCreationRequest {
        company_id: company,
        route_id: RouteId::generate(),
        passenger_phone: "+255754000111".into(),
        payment_transaction_id: payment_transaction_id.into(),
        payment_otp: "7312".into(),
        amount_cents: 20_000,
        commission_rate: 5.0,
    }
}

/// Pipeline configuration with short delays suitable for tests.
pub fn test_config() -> PipelineConfig {
    let queue = QueueConfig {
        batch_size: 100,
        flush_interval: Duration::from_millis(500),
        max_retries: 3,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
    };
    PipelineConfig {
        ticket_queue: queue.clone(),
        transfer_queue: QueueConfig {
            max_retries: 5,
            ..queue
        },
        ..PipelineConfig::default()
    }
}

// ============================================================================
// Harness
// ============================================================================

/// A service over an in-memory store and a mock network, with one company
/// that has a payout account.
pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub network: Arc<MockNetwork>,
    pub service: SettlementService,
    pub company: CompanyId,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_network(MockNetwork::new()).await
    }

    pub async fn with_network(network: Arc<MockNetwork>) -> Self {
        Self::with_config(test_config(), network).await
    }

    pub async fn with_config(config: PipelineConfig, network: Arc<MockNetwork>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let company = CompanyId::generate();
        store
            .put_company_account(&CompanyAccount::new(company, "acct_company_payout"))
            .await
            .expect("Failed to register payout account");

        let service = SettlementService::new(
            config,
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::clone(&network) as Arc<dyn TransferNetwork>,
        );

        Self {
            store,
            network,
            service,
            company,
        }
    }

    pub fn request(&self, payment_transaction_id: &str) -> TicketCreationRequest {
        ticket_request(payment_transaction_id, self.company)
    }
}
