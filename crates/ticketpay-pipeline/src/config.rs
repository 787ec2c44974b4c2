//! Pipeline configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Tuning for one batch queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Items per batch; reaching it triggers a flush.
    pub batch_size: usize,

    /// Period of the background flush timer.
    pub flush_interval: Duration,

    /// Retries per item before it is dropped.
    pub max_retries: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Upper bound on any retry delay.
    pub max_delay: Duration,
}

impl QueueConfig {
    /// Defaults for the ticket creation queue.
    #[must_use]
    pub fn tickets() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_secs(1),
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }

    /// Defaults for the transfer queue.
    #[must_use]
    pub fn transfers() -> Self {
        Self {
            max_retries: ticketpay_core::MAX_TRANSFER_RETRIES,
            ..Self::tickets()
        }
    }

    fn from_env(prefix: &str, defaults: Self) -> Self {
        Self {
            batch_size: env_parse(&format!("{prefix}_BATCH_SIZE")).unwrap_or(defaults.batch_size),
            flush_interval: env_millis(&format!("{prefix}_FLUSH_INTERVAL_MS"))
                .unwrap_or(defaults.flush_interval),
            max_retries: env_parse(&format!("{prefix}_MAX_RETRIES"))
                .unwrap_or(defaults.max_retries),
            base_delay: env_millis(&format!("{prefix}_BASE_DELAY_MS"))
                .unwrap_or(defaults.base_delay),
            max_delay: env_millis(&format!("{prefix}_MAX_DELAY_MS"))
                .unwrap_or(defaults.max_delay),
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Time after the last failure before a trial call is allowed.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Audit batcher thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditConfig {
    /// Entries per bulk insert.
    pub batch_size: usize,

    /// Period of the background flush timer.
    pub flush_interval: Duration,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_secs(2),
        }
    }
}

/// Payment network client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Base URL of the transfer API (optional; no client is built without it).
    pub base_url: Option<String>,

    /// Bearer token for the transfer API (optional).
    pub api_key: Option<String>,

    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Pipeline configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Ticket creation queue.
    pub ticket_queue: QueueConfig,

    /// Transfer queue.
    pub transfer_queue: QueueConfig,

    /// Circuit breaker around the payment network.
    pub breaker: BreakerConfig,

    /// Audit log batcher.
    pub audit: AuditConfig,

    /// Payment network client.
    pub network: NetworkConfig,

    /// Platform account debited by every settlement (default: "platform-settlement").
    pub settlement_account: String,

    /// Maximum concurrent transfers within one batch (default: 100).
    pub transfer_concurrency: usize,

    /// Path to `RocksDB` data directory (optional; in-memory store without it).
    pub data_dir: Option<String>,
}

/// Payment network secrets file structure.
#[derive(Debug, Deserialize)]
struct NetworkSecrets {
    api_url: String,
    api_key: String,
}

impl PipelineConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let (base_url, api_key) = load_network_secrets();

        Self {
            ticket_queue: QueueConfig::from_env("TICKET_QUEUE", defaults.ticket_queue),
            transfer_queue: QueueConfig::from_env("TRANSFER_QUEUE", defaults.transfer_queue),
            breaker: BreakerConfig {
                failure_threshold: env_parse("BREAKER_FAILURE_THRESHOLD")
                    .unwrap_or(defaults.breaker.failure_threshold),
                reset_timeout: env_millis("BREAKER_RESET_TIMEOUT_MS")
                    .unwrap_or(defaults.breaker.reset_timeout),
            },
            audit: AuditConfig {
                batch_size: env_parse("AUDIT_BATCH_SIZE").unwrap_or(defaults.audit.batch_size),
                flush_interval: env_millis("AUDIT_FLUSH_INTERVAL_MS")
                    .unwrap_or(defaults.audit.flush_interval),
            },
            network: NetworkConfig {
                base_url,
                api_key,
                request_timeout: env_parse("TRANSFER_REQUEST_TIMEOUT_SECONDS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.network.request_timeout),
            },
            settlement_account: std::env::var("SETTLEMENT_ACCOUNT")
                .unwrap_or(defaults.settlement_account),
            transfer_concurrency: env_parse("TRANSFER_CONCURRENCY")
                .unwrap_or(defaults.transfer_concurrency),
            data_dir: std::env::var("DATA_DIR").ok(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ticket_queue: QueueConfig::tickets(),
            transfer_queue: QueueConfig::transfers(),
            breaker: BreakerConfig::default(),
            audit: AuditConfig::default(),
            network: NetworkConfig::default(),
            settlement_account: "platform-settlement".into(),
            transfer_concurrency: 100,
            data_dir: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse(key).map(Duration::from_millis)
}

/// Load payment network secrets from file or environment.
fn load_network_secrets() -> (Option<String>, Option<String>) {
    let secret_paths = [
        ".secrets/transfers.json",
        "ticketpay/.secrets/transfers.json",
        "../.secrets/transfers.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<NetworkSecrets>(path) {
            tracing::info!(path = %path, "Loaded transfer network secrets from file");
            return (Some(secrets.api_url), Some(secrets.api_key));
        }
    }

    tracing::debug!("Transfer network secrets file not found, using environment variables");
    (
        std::env::var("TRANSFER_API_URL").ok(),
        std::env::var("TRANSFER_API_KEY").ok(),
    )
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
