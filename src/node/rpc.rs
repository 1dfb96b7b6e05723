use super::{BlockchainRow, HealthEndpoint, NodeClient};
use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const RPC_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct HealthPayload {
    #[serde(default)]
    healthy: bool,
}

#[derive(Debug, Default, Deserialize)]
struct BlockchainsResult {
    #[serde(default)]
    blockchains: Vec<BlockchainRow>,
}

/// Blocking HTTP client over `ureq`.
#[derive(Debug, Default)]
pub struct HttpNodeClient;

impl HttpNodeClient {
    pub fn new() -> Self {
        Self
    }

    fn agent(timeout: Duration) -> ureq::Agent {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        ureq::Agent::new_with_config(config)
    }

    /// POST a JSON-RPC 2.0 request; the remote error message is surfaced verbatim.
    pub fn json_rpc<T: DeserializeOwned>(&self, url: &str, method: &str, params: Value) -> Result<T> {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
        let mut response = Self::agent(RPC_TIMEOUT)
            .post(url)
            .header("content-type", "application/json")
            .send_json(&body)
            .map_err(|err| anyhow!("{method}: {err}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("{method}: HTTP {}", status.as_u16()));
        }
        let envelope: RpcEnvelope<T> = response
            .body_mut()
            .read_json()
            .with_context(|| format!("{method}: decode response"))?;
        if let Some(error) = envelope.error {
            return Err(anyhow!("{method}: {}", error.message));
        }
        envelope
            .result
            .ok_or_else(|| anyhow!("{method}: response has no result"))
    }
}

impl NodeClient for HttpNodeClient {
    fn probe_health(
        &self,
        base_url: &str,
        endpoint: HealthEndpoint,
        timeout: Duration,
    ) -> Result<bool> {
        let url = format!("{base_url}{}", endpoint.path());
        let mut response = Self::agent(timeout)
            .get(&url)
            .call()
            .with_context(|| format!("GET {url}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("GET {url}: HTTP {}", status.as_u16()));
        }
        let payload: HealthPayload = response
            .body_mut()
            .read_json()
            .with_context(|| format!("decode {url}"))?;
        Ok(payload.healthy)
    }

    fn list_blockchains(&self, base_url: &str) -> Result<Vec<BlockchainRow>> {
        let result: BlockchainsResult = self.json_rpc(
            &format!("{base_url}/ext/bc/P"),
            "platform.getBlockchains",
            json!({}),
        )?;
        Ok(result.blockchains)
    }
}
