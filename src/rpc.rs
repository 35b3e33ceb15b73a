//! Minimal EVM JSON-RPC reads over plain HTTP.
//!
//! Only the three read methods the library observes with are implemented:
//! `eth_call`, `eth_getBalance` and `eth_getTransactionReceipt`. Writes go
//! through the caller-supplied signer, never through this client.

use alloy::primitives::{Address, TxHash, U256};
use backon::{ConstantBuilder, Retryable};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

use crate::config::Network;
use crate::error::BridgeError;
use crate::signer::TransactionSigner;

const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Receipt polling cadence when the signer exposes no wait primitive.
pub(crate) const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub(crate) const RECEIPT_POLL_ATTEMPTS: usize = 60;

/// Public RPC endpoints for the most common source chains. Anything else
/// must be supplied via `BridgeConfig::rpc_urls`.
const DEFAULT_RPC_URLS: &[(u64, &str)] = &[
    (1, "https://eth.llamarpc.com"),
    (10, "https://mainnet.optimism.io"),
    (56, "https://bsc-dataseed.bnbchain.org"),
    (137, "https://polygon-rpc.com"),
    (8453, "https://mainnet.base.org"),
    (42161, "https://arb1.arbitrum.io/rpc"),
    (43114, "https://api.avax.network/ext/bc/C/rpc"),
];

#[derive(Debug, Clone, thiserror::Error)]
pub(crate) enum RpcError {
    #[error("transport error: {message}")]
    Transport { message: String },
    #[error("RPC error {code}: {message}")]
    Node { code: i64, message: String },
    #[error("malformed RPC response: {message}")]
    Decode { message: String },
}

/// The subset of a transaction receipt the pipeline inspects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptSummary {
    /// True for status `0x1`, false for a reverted transaction.
    pub status: bool,
    pub block_number: Option<u64>,
    pub gas_used: U256,
}

#[derive(Debug, Deserialize)]
struct RpcResponseBody {
    result: Option<serde_json::Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    status: Option<String>,
    block_number: Option<String>,
    gas_used: Option<String>,
}

/// JSON-RPC client for a single chain endpoint.
#[derive(Debug)]
pub(crate) struct EvmRpc {
    http: reqwest::Client,
    url: String,
}

impl EvmRpc {
    pub(crate) fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }

    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .timeout(RPC_TIMEOUT)
            .send()
            .await
            .map_err(|err| RpcError::Transport {
                message: err.to_string(),
            })?;
        let body: RpcResponseBody =
            response.json().await.map_err(|err| RpcError::Decode {
                message: err.to_string(),
            })?;
        if let Some(error) = body.error {
            return Err(RpcError::Node {
                code: error.code,
                message: error.message,
            });
        }
        Ok(body.result.unwrap_or(serde_json::Value::Null))
    }

    /// `eth_call` against the latest block; returns the raw return data.
    pub(crate) async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        let result = self
            .request(
                "eth_call",
                json!([
                    { "to": format!("{to:#x}"), "data": format!("0x{}", alloy::hex::encode(data)) },
                    "latest",
                ]),
            )
            .await?;
        let hex = result.as_str().ok_or_else(|| RpcError::Decode {
            message: "eth_call result is not a string".to_string(),
        })?;
        alloy::hex::decode(hex.trim_start_matches("0x")).map_err(|err| RpcError::Decode {
            message: err.to_string(),
        })
    }

    pub(crate) async fn get_balance(&self, address: Address) -> Result<U256, RpcError> {
        let result = self
            .request(
                "eth_getBalance",
                json!([format!("{address:#x}"), "latest"]),
            )
            .await?;
        let hex = result.as_str().ok_or_else(|| RpcError::Decode {
            message: "eth_getBalance result is not a string".to_string(),
        })?;
        hex_to_u256(hex)
    }

    pub(crate) async fn get_transaction_receipt(
        &self,
        tx_hash: TxHash,
    ) -> Result<Option<ReceiptSummary>, RpcError> {
        let result = self
            .request("eth_getTransactionReceipt", json!([format!("{tx_hash:#x}")]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        let raw: RawReceipt =
            serde_json::from_value(result).map_err(|err| RpcError::Decode {
                message: err.to_string(),
            })?;
        let status = raw.status.as_deref().map(|s| s == "0x1").unwrap_or(false);
        let block_number = match raw.block_number.as_deref() {
            Some(hex) => Some(
                hex_to_u256(hex)?
                    .try_into()
                    .map_err(|_| RpcError::Decode {
                        message: "block number out of range".to_string(),
                    })?,
            ),
            None => None,
        };
        let gas_used = match raw.gas_used.as_deref() {
            Some(hex) => hex_to_u256(hex)?,
            None => U256::ZERO,
        };
        Ok(Some(ReceiptSummary {
            status,
            block_number,
            gas_used,
        }))
    }
}

fn hex_to_u256(hex: &str) -> Result<U256, RpcError> {
    let trimmed = hex.trim_start_matches("0x");
    if trimmed.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(trimmed, 16).map_err(|err| RpcError::Decode {
        message: err.to_string(),
    })
}

/// Interprets single-word `eth_call` return data as a uint256.
pub(crate) fn word_to_u256(data: &[u8]) -> U256 {
    if data.len() >= 32 {
        U256::from_be_slice(&data[..32])
    } else {
        U256::from_be_slice(data)
    }
}

/// Lazily constructed per-chain RPC clients, resolved from caller overrides,
/// then the builtin defaults.
#[derive(Debug)]
pub(crate) struct RpcRegistry {
    network: Network,
    overrides: HashMap<u64, String>,
    clients: Mutex<HashMap<u64, Arc<EvmRpc>>>,
}

impl RpcRegistry {
    pub(crate) fn new(network: Network, overrides: HashMap<u64, String>) -> Self {
        Self {
            network,
            overrides,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn url_for(&self, chain_id: u64) -> Option<String> {
        if let Some(url) = self.overrides.get(&chain_id) {
            return Some(url.clone());
        }
        if chain_id == self.network.hyperevm_chain_id() {
            return Some(self.network.hyperevm_rpc_url().to_string());
        }
        DEFAULT_RPC_URLS
            .iter()
            .find(|(id, _)| *id == chain_id)
            .map(|(_, url)| (*url).to_string())
    }

    pub(crate) fn endpoint(&self, chain_id: u64) -> Result<Arc<EvmRpc>, BridgeError> {
        let mut clients = self.clients.lock().expect("rpc registry lock poisoned");
        if let Some(client) = clients.get(&chain_id) {
            return Ok(client.clone());
        }
        let url = self.url_for(chain_id).ok_or_else(|| {
            BridgeError::network(format!("no RPC endpoint configured for chain {chain_id}"))
        })?;
        let client = Arc::new(EvmRpc::new(url));
        clients.insert(chain_id, client.clone());
        Ok(client)
    }

    /// The destination-chain endpoint (environment-selected).
    pub(crate) fn hyperevm(&self) -> Arc<EvmRpc> {
        self.endpoint(self.network.hyperevm_chain_id())
            .expect("destination endpoint always resolves")
    }
}

/// Waits for a transaction to mine: prefers the signer's own wait primitive,
/// falls back to polling `eth_getTransactionReceipt`.
pub(crate) async fn await_receipt(
    signer: &dyn TransactionSigner,
    rpc: &EvmRpc,
    tx_hash: TxHash,
    poll_interval: Duration,
    max_attempts: usize,
) -> Result<ReceiptSummary, BridgeError> {
    match signer.wait_for_receipt(tx_hash).await {
        Ok(Some(receipt)) => return Ok(receipt),
        Ok(None) => {}
        Err(err) => return Err(BridgeError::from_signer_failure(&err.to_string())),
    }

    #[derive(Debug, thiserror::Error)]
    enum PollError {
        #[error("receipt not ready")]
        NotReady,
        #[error(transparent)]
        Rpc(#[from] RpcError),
    }

    let fetch = || async {
        match rpc.get_transaction_receipt(tx_hash).await {
            Ok(Some(receipt)) => Ok(receipt),
            Ok(None) => Err(PollError::NotReady),
            Err(err) => {
                warn!(%tx_hash, %err, "receipt poll failed, retrying");
                Err(PollError::Rpc(err))
            }
        }
    };

    fetch
        .retry(
            ConstantBuilder::default()
                .with_delay(poll_interval)
                .with_max_times(max_attempts),
        )
        .await
        .map_err(|err| match err {
            PollError::NotReady => BridgeError::MaxRetriesExceeded {
                attempts: max_attempts as u32,
            },
            PollError::Rpc(rpc_err) => BridgeError::network(rpc_err.to_string()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use httpmock::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn get_balance_parses_hex_result() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).json_body_partial(r#"{"method":"eth_getBalance"}"#);
            then.status(200)
                .json_body(json!({ "jsonrpc": "2.0", "id": 1, "result": "0xde0b6b3a7640000" }));
        });

        let rpc = EvmRpc::new(server.base_url());
        let balance = rpc
            .get_balance(address!("0x1111111111111111111111111111111111111111"))
            .await
            .unwrap();
        assert_eq!(balance, U256::from(1_000_000_000_000_000_000u64));
    }

    #[tokio::test]
    async fn call_decodes_return_data() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).json_body_partial(r#"{"method":"eth_call"}"#);
            then.status(200).json_body(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": "0x00000000000000000000000000000000000000000000000000000000000f4240"
            }));
        });

        let rpc = EvmRpc::new(server.base_url());
        let data = rpc
            .call(
                address!("0xb88339cb7199b77e23db6e890353e22632ba630f"),
                vec![0x70, 0xa0, 0x82, 0x31],
            )
            .await
            .unwrap();
        assert_eq!(word_to_u256(&data), U256::from(1_000_000u64));
    }

    #[tokio::test]
    async fn node_errors_are_typed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(200).json_body(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32000, "message": "header not found" }
            }));
        });

        let rpc = EvmRpc::new(server.base_url());
        let err = rpc
            .get_balance(address!("0x1111111111111111111111111111111111111111"))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Node { code: -32000, .. }));
    }

    #[tokio::test]
    async fn receipt_null_means_pending() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .json_body_partial(r#"{"method":"eth_getTransactionReceipt"}"#);
            then.status(200)
                .json_body(json!({ "jsonrpc": "2.0", "id": 1, "result": null }));
        });

        let rpc = EvmRpc::new(server.base_url());
        let receipt = rpc
            .get_transaction_receipt(TxHash::ZERO)
            .await
            .unwrap();
        assert!(receipt.is_none());
    }

    #[tokio::test]
    async fn receipt_status_is_decoded() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .json_body_partial(r#"{"method":"eth_getTransactionReceipt"}"#);
            then.status(200).json_body(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": { "status": "0x1", "blockNumber": "0x10", "gasUsed": "0x5208" }
            }));
        });

        let rpc = EvmRpc::new(server.base_url());
        let receipt = rpc
            .get_transaction_receipt(TxHash::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert!(receipt.status);
        assert_eq!(receipt.block_number, Some(16));
        assert_eq!(receipt.gas_used, U256::from(21_000u64));
    }

    #[tokio::test]
    async fn await_receipt_falls_back_to_polling() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .json_body_partial(r#"{"method":"eth_getTransactionReceipt"}"#);
            then.status(200).json_body(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": { "status": "0x1", "blockNumber": "0x1", "gasUsed": "0x5208" }
            }));
        });

        let rpc = EvmRpc::new(server.base_url());
        let signer = crate::test_utils::MockSigner::new(
            address!("0x1111111111111111111111111111111111111111"),
            1,
        )
        .without_receipts();
        let receipt = await_receipt(
            &signer,
            &rpc,
            TxHash::with_last_byte(1),
            Duration::from_millis(10),
            5,
        )
        .await
        .unwrap();
        assert!(receipt.status);
    }

    #[tokio::test]
    async fn await_receipt_gives_up_after_max_attempts() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(200)
                .json_body(json!({ "jsonrpc": "2.0", "id": 1, "result": null }));
        });

        let rpc = EvmRpc::new(server.base_url());
        let signer = crate::test_utils::MockSigner::new(
            address!("0x1111111111111111111111111111111111111111"),
            1,
        )
        .without_receipts();
        let err = await_receipt(
            &signer,
            &rpc,
            TxHash::with_last_byte(1),
            Duration::from_millis(5),
            3,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BridgeError::MaxRetriesExceeded { attempts: 3 }));
    }

    #[test]
    fn registry_prefers_overrides_over_defaults() {
        let overrides = HashMap::from([(1u64, "http://localhost:8545".to_string())]);
        let registry = RpcRegistry::new(Network::Mainnet, overrides);
        assert_eq!(
            registry.url_for(1),
            Some("http://localhost:8545".to_string())
        );
        assert_eq!(
            registry.url_for(999),
            Some("https://rpc.hyperliquid.xyz/evm".to_string())
        );
        assert!(registry.url_for(424242).is_none());
        assert!(registry.endpoint(424242).is_err());
    }
}
