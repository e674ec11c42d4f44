use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ProviderError;

/// JSON-RPC client for an Alchemy-style chain-data provider.
///
/// Transparent retry with exponential backoff for rate limits (429) and
/// server errors (5xx); other client errors fail immediately. Every call is
/// preceded by a small rate-limit delay. No response caching — callers own
/// reuse.
pub struct ChainClient {
    rpc_url: String,
    api_key: String,
    client: reqwest::Client,
    rate_limit_delay: Duration,
    max_attempts: u32,
    backoff_base: Duration,
}

/// Asset transfer as returned by `alchemy_getAssetTransfers`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTransfer {
    pub hash: Option<String>,
    #[serde(rename = "blockNum")]
    pub block_num: Option<String>,
    pub category: Option<String>,
    pub value: Option<f64>,
    pub asset: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    #[serde(rename = "rawContract", default)]
    pub raw_contract: Option<RawContract>,
    #[serde(default)]
    pub metadata: Option<TransferMetadata>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawContract {
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferMetadata {
    #[serde(rename = "blockTimestamp")]
    pub block_timestamp: Option<String>,
    #[serde(rename = "gasUsedUSD")]
    pub gas_used_usd: Option<f64>,
}

/// Token balance as returned by `alchemy_getTokenBalances`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTokenBalance {
    #[serde(rename = "contractAddress")]
    pub contract_address: Option<String>,
    /// Hex-encoded raw token quantity, e.g. "0x2386f26fc10000".
    #[serde(rename = "tokenBalance")]
    pub token_balance: Option<String>,
}

/// One page of transfers plus the unmodified body for archival.
#[derive(Debug, Clone, Default)]
pub struct TransfersPage {
    pub transfers: Vec<RawTransfer>,
    pub page_key: Option<String>,
    pub raw_body: Vec<u8>,
}

/// Token balances plus the unmodified body for archival.
#[derive(Debug, Clone, Default)]
pub struct BalancesPage {
    pub balances: Vec<RawTokenBalance>,
    pub raw_body: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct TransfersResult {
    #[serde(default)]
    transfers: Vec<RawTransfer>,
    #[serde(rename = "pageKey")]
    page_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BalancesResult {
    #[serde(rename = "tokenBalances", default)]
    token_balances: Vec<RawTokenBalance>,
}

/// Run `call` until it succeeds or a non-retryable error surfaces, sleeping
/// `backoff_base * 2^(attempt-1)` between retryable failures. At most
/// `max_attempts` calls are made.
pub async fn with_retry<T, F, Fut>(
    max_attempts: u32,
    backoff_base: Duration,
    mut call: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match call().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let wait = backoff_base * 2u32.saturating_pow(attempt - 1);
                warn!(attempt, wait_for = ?wait, error = %e, "provider call failed; retrying");
                tokio::time::sleep(wait).await;
            }
            Err(e) => return Err(e),
        }
    }
}

impl ChainClient {
    pub fn new(
        rpc_url: &str,
        api_key: &str,
        request_timeout: Duration,
        rate_limit_delay: Duration,
        max_attempts: u32,
        backoff_base: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("failed to build HTTP client");

        Self {
            rpc_url: rpc_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
            rate_limit_delay,
            max_attempts,
            backoff_base,
        }
    }

    /// Fetch one page of asset transfers originating from `address`, from
    /// `since_block` (hex, default genesis) onward. Pass the previous page's
    /// `page_key` to resume pagination.
    pub async fn fetch_transfers_page(
        &self,
        address: &str,
        since_block: Option<&str>,
        page_key: Option<&str>,
    ) -> Result<TransfersPage, ProviderError> {
        let mut filter = serde_json::json!({
            "fromBlock": since_block.unwrap_or("0x0"),
            "toBlock": "latest",
            "fromAddress": address,
            "category": ["external", "internal", "erc20", "erc721", "erc1155"],
            "withMetadata": true,
            "excludeZeroValue": false,
            "maxCount": "0x3e8",
        });
        if let Some(key) = page_key {
            filter["pageKey"] = serde_json::Value::String(key.to_string());
        }
        let params = serde_json::json!([filter]);

        let body = with_retry(self.max_attempts, self.backoff_base, || {
            self.rpc_once("alchemy_getAssetTransfers", params.clone())
        })
        .await?;

        let result: TransfersResult = decode_rpc(&body)?;
        debug!(
            address,
            count = result.transfers.len(),
            has_next = result.page_key.is_some(),
            "fetched transfers page"
        );
        Ok(TransfersPage {
            transfers: result.transfers,
            page_key: result.page_key,
            raw_body: body,
        })
    }

    /// Fetch current ERC-20 balances for `address`.
    pub async fn fetch_token_balances(
        &self,
        address: &str,
    ) -> Result<BalancesPage, ProviderError> {
        let params = serde_json::json!([address, "erc20"]);

        let body = with_retry(self.max_attempts, self.backoff_base, || {
            self.rpc_once("alchemy_getTokenBalances", params.clone())
        })
        .await?;

        let result: BalancesResult = decode_rpc(&body)?;
        debug!(
            address,
            count = result.token_balances.len(),
            "fetched token balances"
        );
        Ok(BalancesPage {
            balances: result.token_balances,
            raw_body: body,
        })
    }

    async fn rpc_once(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Vec<u8>, ProviderError> {
        tokio::time::sleep(self.rate_limit_delay).await;

        let url = format!("{}/{}", self.rpc_url, self.api_key);
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let resp = self.client.post(&url).json(&payload).send().await?;
        let status = resp.status();

        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited);
        }
        if status.is_server_error() {
            return Err(ProviderError::Unavailable {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Request {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.bytes().await?.to_vec())
    }
}

fn decode_rpc<T: Default + for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T, ProviderError> {
    let parsed: RpcResponse<T> =
        serde_json::from_slice(body).map_err(|e| ProviderError::Decode(e.to_string()))?;
    if let Some(err) = parsed.error {
        return Err(ProviderError::Rpc(err.message));
    }
    Ok(parsed.result.unwrap_or_default())
}
