//! Delivery of envelope batches to the collection endpoint
//!
//! The scheduler only sees the [`Transport`] trait: one call per batch that
//! either succeeds or fails. [`HttpTransport`] POSTs the batch as a JSON
//! array to `{endpoint}/report` with an explicit timeout; any non-2xx status,
//! connection error or timeout is a failure.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::types::Envelope;

/// Path appended to the configured endpoint
pub const REPORT_PATH: &str = "/report";

/// Sends one batch to the collection endpoint
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `batch` to `endpoint`; `Ok` only when the endpoint accepted it
    async fn deliver(&self, endpoint: &str, batch: &[Envelope]) -> Result<()>;
}

/// Request/response HTTP transport
pub struct HttpTransport {
    http_client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport from configuration
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            timeout: config.timeout(),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Full report URL for an endpoint base
pub fn report_url(endpoint: &str) -> String {
    format!("{}{}", endpoint.trim_end_matches('/'), REPORT_PATH)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, endpoint: &str, batch: &[Envelope]) -> Result<()> {
        let url = report_url(endpoint);

        let response = self
            .http_client
            .post(&url)
            .json(batch)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Transport(format!("request to {} timed out: {}", url, e))
                } else {
                    Error::Transport(format!("HTTP request failed: {}", e))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(url = %url, batch_len = batch.len(), "Batch delivered");
            Ok(())
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Transport(format!(
                "API error ({}): {}",
                status, error_text
            )))
        }
    }
}
