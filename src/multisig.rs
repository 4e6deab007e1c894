//! Signature-server coordination for outbound unlock rounds.
//!
//! Unlock submission goes through a collective signing service: the collector
//! proposes a round, the service collects signatures, and after a restart the
//! collector must ask the service whether a round is still in flight before
//! proposing another one.

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};

/// One unlock carried by an in-flight signing round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundEntry {
    pub burn_tx_hash: String,
    pub asset: String,
    pub recipient: String,
    pub amount: String,
}

/// An in-flight signing round as reported by the signature server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundPayload {
    pub chain: String,
    pub entries: Vec<RoundEntry>,
}

/// Queries the in-flight round state on the signing service.
#[async_trait]
pub trait MultisigCoordinator: Send + Sync + 'static {
    /// The round currently being signed for `chain`, if any. `None` means the
    /// service has no round in flight.
    async fn pending_round(&self, chain: &str) -> Result<Option<RoundPayload>>;
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<String>,
}

/// HTTP client for the signature server.
pub struct SigServerClient {
    client: reqwest::Client,
    base_url: String,
}

impl SigServerClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl MultisigCoordinator for SigServerClient {
    async fn pending_round(&self, chain: &str) -> Result<Option<RoundPayload>> {
        let request = RpcRequest {
            method: "pending_tx",
            params: serde_json::json!({ "chain": chain }),
        };
        let response: RpcResponse<RoundPayload> = self
            .client
            .post(&self.base_url)
            .json(&request)
            .send()
            .await
            .wrap_err("Failed to reach signature server")?
            .json()
            .await
            .wrap_err("Failed to parse signature server response")?;

        if let Some(error) = response.error {
            return Err(eyre::eyre!("Signature server error: {}", error));
        }
        Ok(response.result)
    }
}
