//! Chain RPC client
//!
//! The engine consumes chains through [`ChainRpc`]. [`HttpChainRpc`] speaks
//! JSON-RPC over HTTP to a node that also serves the indexed
//! `alchemy_getAssetTransfers` method.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use super::abi::{parse_hex_quantity, parse_hex_u64};
use super::error::{MonitorError, mentions_range_beyond_head};
use super::types::{TransferCandidate, TransferCategory};

/// Indexed transfer query over an inclusive block range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferQuery {
    pub from_block: u64,
    pub to_block: u64,
    pub to_address: String,
    pub category: TransferCategory,
    /// Only for `Erc20`
    pub contract_address: Option<String>,
}

/// Per-chain capability consumed by both transports
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Current head block number
    async fn block_number(&self) -> Result<u64, MonitorError>;

    /// Indexed transfers matching `query`
    async fn asset_transfers(
        &self,
        query: &TransferQuery,
    ) -> Result<Vec<TransferCandidate>, MonitorError>;
}

#[derive(Serialize)]
struct JsonRpcRequest<T> {
    jsonrpc: &'static str,
    method: &'static str,
    params: T,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetTransfersPage {
    #[serde(default)]
    transfers: Vec<Value>,
    #[serde(default)]
    page_key: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RawAssetTransfer {
    hash: String,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Option<String>,
    category: String,
    raw_contract: RawContract,
}

#[derive(Deserialize, Debug)]
struct RawContract {
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    address: Option<String>,
}

/// JSON-RPC over HTTP
pub struct HttpChainRpc {
    url: String,
    client: reqwest::Client,
    page_limit: usize,
    next_id: AtomicU64,
}

impl HttpChainRpc {
    pub fn new(url: &str, timeout: Duration, page_limit: usize) -> Result<Self, MonitorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            url: url.to_string(),
            client,
            page_limit: page_limit.max(1),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn rpc_call<T, R>(&self, method: &'static str, params: T) -> Result<R, MonitorError>
    where
        T: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let body: JsonRpcResponse<R> = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                MonitorError::RpcConnection(format!("{} did not reach the node: {}", method, e))
            })?
            .json()
            .await
            .map_err(|e| {
                MonitorError::RpcConnection(format!("{} returned an unreadable body: {}", method, e))
            })?;

        match (body.result, body.error) {
            (_, Some(error)) if mentions_range_beyond_head(&error.message) => {
                Err(MonitorError::RangeBeyondHead)
            }
            (_, Some(error)) => Err(MonitorError::Rpc {
                code: error.code,
                message: error.message,
            }),
            (Some(result), None) => Ok(result),
            (None, None) => Err(MonitorError::RpcConnection(format!(
                "{} returned neither result nor error",
                method
            ))),
        }
    }
}

#[async_trait]
impl ChainRpc for HttpChainRpc {
    async fn block_number(&self) -> Result<u64, MonitorError> {
        let result: String = self.rpc_call("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&result)
            .ok_or_else(|| MonitorError::Parse(format!("Invalid block number: {}", result)))
    }

    async fn asset_transfers(
        &self,
        query: &TransferQuery,
    ) -> Result<Vec<TransferCandidate>, MonitorError> {
        let mut candidates = Vec::new();
        let mut page_key: Option<String> = None;

        for page in 0..self.page_limit {
            let params = transfer_params(query, page_key.as_deref());
            let result: AssetTransfersPage = self
                .rpc_call("alchemy_getAssetTransfers", [params])
                .await?;

            candidates.extend(result.transfers.into_iter().filter_map(convert_transfer));

            match result.page_key {
                Some(key) if !key.is_empty() => page_key = Some(key),
                _ => return Ok(candidates),
            }
            debug!(
                page,
                from_block = query.from_block,
                to_block = query.to_block,
                "Following transfer page key"
            );
        }

        debug!(
            pages = self.page_limit,
            from_block = query.from_block,
            to_block = query.to_block,
            "Transfer page limit reached"
        );
        Ok(candidates)
    }
}

fn transfer_params(query: &TransferQuery, page_key: Option<&str>) -> Value {
    let mut params = json!({
        "fromBlock": format!("0x{:x}", query.from_block),
        "toBlock": format!("0x{:x}", query.to_block),
        "toAddress": query.to_address,
        "excludeZeroValue": true,
        "withMetadata": false,
    });

    match query.category {
        TransferCategory::Native => {
            params["category"] = json!(["external"]);
        }
        TransferCategory::Erc20 => {
            params["category"] = json!(["erc20"]);
            if let Some(contract) = &query.contract_address {
                params["contractAddresses"] = json!([contract]);
            }
        }
    }

    if let Some(key) = page_key {
        params["pageKey"] = json!(key);
    }

    params
}

/// Entries that do not decode are dropped.
fn convert_transfer(entry: Value) -> Option<TransferCandidate> {
    let raw: RawAssetTransfer = serde_json::from_value(entry).ok()?;
    let category = match raw.category.as_str() {
        "external" => TransferCategory::Native,
        "erc20" => TransferCategory::Erc20,
        _ => return None,
    };
    let value_raw = parse_hex_quantity(raw.raw_contract.value.as_deref()?)?;
    let contract_address = match category {
        TransferCategory::Native => None,
        TransferCategory::Erc20 => Some(raw.raw_contract.address?),
    };

    Some(TransferCandidate {
        hash: raw.hash,
        from: raw.from.unwrap_or_default(),
        to: raw.to?,
        value_raw,
        category,
        contract_address,
    })
}
