//! HTTP seam between the dispatcher and the provider.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::errors::LookupError;

/// Raw provider answer
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends JSON payloads to the provider
///
/// Implementations return `Ok` for any HTTP answer, including error statuses,
/// and `Err` only when no answer was received.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        bearer_token: &str,
        payload: &Value,
    ) -> Result<TransportResponse, LookupError>;
}

/// `reqwest` transport with a fixed per-call timeout
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LookupError::Configuration(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ModelTransport for HttpTransport {
    async fn post_json(
        &self,
        url: &str,
        bearer_token: &str,
        payload: &Value,
    ) -> Result<TransportResponse, LookupError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(bearer_token)
            .json(payload)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(url = url, status = status, bytes = body.len(), "Provider responded");

        Ok(TransportResponse { status, body })
    }
}
