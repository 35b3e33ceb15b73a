//! Wire types for the route aggregator JSON.
//!
//! The aggregator response is treated as opaque beyond the fields mapped
//! here; everything is optional-tolerant so unknown or missing sections fail
//! at the semantic mapping layer with typed errors instead of at decode time.

use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LifiToken {
    pub address: String,
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    pub decimals: u8,
    pub chain_id: u64,
    #[serde(rename = "logoURI")]
    pub logo_uri: Option<String>,
    #[serde(rename = "priceUSD")]
    pub price_usd: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LifiChain {
    pub id: u64,
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub chain_type: Option<String>,
    #[serde(default)]
    pub mainnet: Option<bool>,
    #[serde(rename = "logoURI")]
    pub logo_uri: Option<String>,
    pub native_token: Option<LifiToken>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChainsEnvelope {
    pub chains: Vec<LifiChain>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokensEnvelope {
    pub tokens: HashMap<String, Vec<LifiToken>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LifiConnection {
    #[allow(dead_code)]
    pub from_chain_id: Option<u64>,
    #[allow(dead_code)]
    pub to_chain_id: Option<u64>,
    #[serde(default)]
    pub from_tokens: Vec<LifiToken>,
    #[serde(default)]
    pub to_tokens: Vec<LifiToken>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ConnectionsEnvelope {
    #[serde(default)]
    pub connections: Vec<LifiConnection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LifiFeeCost {
    pub name: String,
    #[serde(default)]
    pub included: bool,
    pub token: Option<LifiToken>,
    pub amount: Option<String>,
    #[serde(rename = "amountUSD")]
    pub amount_usd: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LifiGasCost {
    /// Gas price in wei, decimal string.
    pub price: Option<String>,
    /// Gas limit, decimal string.
    pub limit: Option<String>,
    /// Gas limit estimate, decimal string (older responses).
    pub estimate: Option<String>,
    /// Total gas cost in the native token's smallest unit.
    pub amount: Option<String>,
    #[serde(rename = "amountUSD")]
    pub amount_usd: Option<String>,
    pub token: Option<LifiToken>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LifiEstimate {
    pub from_amount: Option<String>,
    pub to_amount: Option<String>,
    #[serde(rename = "toAmountMin")]
    pub to_amount_min: Option<String>,
    pub approval_address: Option<String>,
    pub execution_duration: Option<f64>,
    #[serde(rename = "fromAmountUSD")]
    pub from_amount_usd: Option<String>,
    #[serde(rename = "toAmountUSD")]
    pub to_amount_usd: Option<String>,
    #[serde(default)]
    pub fee_costs: Vec<LifiFeeCost>,
    #[serde(default)]
    pub gas_costs: Vec<LifiGasCost>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LifiAction {
    pub from_chain_id: u64,
    pub to_chain_id: u64,
    pub from_token: LifiToken,
    pub to_token: LifiToken,
    pub from_amount: Option<String>,
    #[allow(dead_code)]
    pub slippage: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LifiTransactionRequest {
    pub to: Option<String>,
    pub data: Option<String>,
    /// Hex-encoded wei value ("0x0" when absent).
    pub value: Option<String>,
    pub gas_limit: Option<String>,
    pub gas_price: Option<String>,
    pub chain_id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LifiStep {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: Option<String>,
    #[serde(default)]
    pub tool: String,
    pub action: LifiAction,
    pub estimate: Option<LifiEstimate>,
    #[serde(default)]
    pub included_steps: Vec<LifiStep>,
    pub transaction_request: Option<LifiTransactionRequest>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LifiRoute {
    pub id: String,
    #[allow(dead_code)]
    pub from_chain_id: Option<u64>,
    #[allow(dead_code)]
    pub to_chain_id: Option<u64>,
    pub from_token: LifiToken,
    pub to_token: LifiToken,
    pub from_amount: String,
    pub to_amount: String,
    #[serde(default)]
    pub steps: Vec<LifiStep>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RoutesEnvelope {
    #[serde(default)]
    pub routes: Vec<LifiRoute>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LifiStatusTx {
    pub tx_hash: Option<String>,
    #[allow(dead_code)]
    pub chain_id: Option<u64>,
    pub amount: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LifiStatusResponse {
    pub status: Option<String>,
    pub substatus: Option<String>,
    pub substatus_message: Option<String>,
    #[allow(dead_code)]
    pub sending: Option<LifiStatusTx>,
    pub receiving: Option<LifiStatusTx>,
}
