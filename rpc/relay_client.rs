// ============================================================================
// HTTP Transaction Relay
// ============================================================================
//
// Relay Endpoints:
//   GET  /relay/ready    - signer loaded and node reachable
//   POST /relay/execute  - sign + broadcast {"sender", "msg"}
//
// A non-2xx answer that still carries a `RelayResponse` body is a rejection
// (the contract error text is in `rawLog`), not a transport error.
//
// ============================================================================

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::RelayError;
use crate::ports::{RelayRequest, RelayResponse, TxRelay};

/// Default timeout for relay calls
pub const RELAY_TIMEOUT_SECS: u64 = 15;

pub struct HttpRelayClient {
    base_url: String,
    client: Client,
}

impl HttpRelayClient {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(RELAY_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { base_url: base_url.trim_end_matches('/').to_string(), client }
    }
}

#[async_trait]
impl TxRelay for HttpRelayClient {
    async fn is_ready(&self) -> bool {
        let url = format!("{}/relay/ready", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(error = %e, "relay readiness check failed");
                false
            }
        }
    }

    async fn submit(&self, request: RelayRequest) -> Result<RelayResponse, RelayError> {
        let url = format!("{}/relay/execute", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RelayError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RelayError::RequestFailed(e.to_string()))?;

        match serde_json::from_str::<RelayResponse>(&body) {
            Ok(parsed) => {
                if !status.is_success() && parsed.success {
                    warn!(status = status.as_u16(), "relay reported success with error status");
                    return Ok(RelayResponse { success: false, ..parsed });
                }
                Ok(parsed)
            }
            Err(_) if status.as_u16() == 503 => Err(RelayError::NotReady),
            Err(e) if status.is_success() => Err(RelayError::InvalidResponse(e.to_string())),
            Err(_) => Ok(RelayResponse::rejected(format!("relay status {}: {}", status.as_u16(), body))),
        }
    }
}
