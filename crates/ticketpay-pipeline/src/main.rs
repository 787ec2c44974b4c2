//! Ticketpay settlement pipeline entry point.
//!
//! Reads payment confirmations as JSON lines (one `TicketCreationRequest` per
//! line) from stdin and feeds them into the pipeline until EOF or Ctrl-C,
//! then drains every queue before exiting.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ticketpay_core::TicketCreationRequest;
use ticketpay_pipeline::{HttpTransferClient, PipelineConfig, SettlementService};
use ticketpay_store::{MemoryStore, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ticketpay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting ticketpay pipeline");

    let config = PipelineConfig::from_env();

    tracing::info!(
        data_dir = ?config.data_dir,
        network_configured = %config.network.base_url.is_some(),
        settlement_account = %config.settlement_account,
        ticket_batch_size = config.ticket_queue.batch_size,
        transfer_batch_size = config.transfer_queue.batch_size,
        "Pipeline configuration loaded"
    );

    let store = open_store(&config)?;
    let network = Arc::new(HttpTransferClient::from_config(&config.network)?);

    let service = SettlementService::new(config, store, network);
    service.start();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<TicketCreationRequest>(&line) {
                    Ok(req) => {
                        service.submit(req);
                    }
                    Err(e) => tracing::warn!(error = %e, "Skipping malformed request"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupt received");
                break;
            }
        }
    }

    service.shutdown().await;
    Ok(())
}

#[cfg(feature = "rocksdb-backend")]
fn open_store(config: &PipelineConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    if let Some(data_dir) = &config.data_dir {
        tracing::info!(path = %data_dir, "Opening RocksDB store");
        return Ok(Arc::new(ticketpay_store::RocksStore::open(data_dir)?));
    }
    tracing::warn!("DATA_DIR not set, using in-memory store");
    Ok(Arc::new(MemoryStore::new()))
}

#[cfg(not(feature = "rocksdb-backend"))]
#[allow(clippy::unnecessary_wraps)]
fn open_store(config: &PipelineConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    if config.data_dir.is_some() {
        tracing::warn!("DATA_DIR set but built without rocksdb-backend, using in-memory store");
    }
    Ok(Arc::new(MemoryStore::new()))
}
