//! HTTP transfer API client.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use ticketpay_core::{Classify, ErrorClass};

use super::types::{TransferErrorResponse, TransferReceipt, TransferRequest};
use super::TransferNetwork;
use crate::config::NetworkConfig;

/// Error type for payment network operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    /// The request timed out, on the client or at the gateway.
    #[error("transfer request timed out: {0}")]
    Timeout(String),

    /// The network asked us to slow down.
    #[error("rate limited by payment network")]
    RateLimited {
        /// Seconds to wait, when the server said so.
        retry_after: Option<u64>,
    },

    /// The connection failed.
    #[error("network error: {0}")]
    Network(String),

    /// The network refused the transfer.
    #[error("transfer rejected ({status}): {message}")]
    Rejected {
        /// HTTP status.
        status: u16,
        /// Machine-readable code, if provided.
        code: Option<String>,
        /// Error message.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Classify for NetworkError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout(_) | Self::RateLimited { .. } | Self::Network(_) => ErrorClass::Transient,
            Self::Rejected { .. } | Self::Decode(_) | Self::Configuration(_) => ErrorClass::Fatal,
        }
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Transfer API client.
#[derive(Debug, Clone)]
pub struct HttpTransferClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpTransferClient {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - API root, without the `/v1` suffix
    /// * `api_key` - Bearer token
    /// * `timeout` - Per-request timeout
    ///
    /// # Errors
    ///
    /// Returns `NetworkError::Configuration` if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NetworkError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NetworkError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Create a client from pipeline configuration.
    ///
    /// # Errors
    ///
    /// Returns `NetworkError::Configuration` if the URL or key is missing.
    pub fn from_config(config: &NetworkConfig) -> Result<Self, NetworkError> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| NetworkError::Configuration("TRANSFER_API_URL not set".into()))?;
        let api_key = config
            .api_key
            .as_deref()
            .ok_or_else(|| NetworkError::Configuration("TRANSFER_API_KEY not set".into()))?;
        Self::new(base_url, api_key, config.request_timeout)
    }

    /// Handle API response and convert errors.
    async fn handle_response(
        &self,
        response: reqwest::Response,
    ) -> Result<TransferReceipt, NetworkError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok());
                return Err(NetworkError::RateLimited { retry_after });
            }
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                return Err(NetworkError::Timeout(format!("HTTP {status}")));
            }
            _ => {}
        }

        let error_body: Result<TransferErrorResponse, _> = response.json().await;
        match error_body {
            Ok(body) => Err(NetworkError::Rejected {
                status: status.as_u16(),
                code: body.error.code,
                message: body.error.message,
            }),
            Err(_) => Err(NetworkError::Rejected {
                status: status.as_u16(),
                code: None,
                message: format!("HTTP {status}"),
            }),
        }
    }
}

#[async_trait]
impl TransferNetwork for HttpTransferClient {
    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, NetworkError> {
        tracing::debug!(
            reference = %request.reference,
            amount_cents = %request.amount_cents,
            to_account = %request.to_account,
            "Submitting transfer"
        );

        let response = self
            .client
            .post(format!("{}/v1/transfers", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", &request.reference)
            .json(request)
            .send()
            .await?;

        self.handle_response(response).await
    }
}
