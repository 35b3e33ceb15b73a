//! Client configuration and environment selection.

use serde::Deserialize;
use std::collections::HashMap;

pub(crate) const SLIPPAGE_MIN: f64 = 0.0001;
pub(crate) const SLIPPAGE_MAX: f64 = 0.05;

const DEFAULT_SLIPPAGE: f64 = 0.005;

/// Which HyperEVM deployment the client targets. Selects the destination
/// chain id, its RPC endpoint and the trading-ledger info endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
}

impl Network {
    pub fn hyperevm_chain_id(&self) -> u64 {
        match self {
            Self::Mainnet => crate::chains::HYPEREVM_CHAIN_ID,
            Self::Testnet => crate::chains::HYPEREVM_TESTNET_CHAIN_ID,
        }
    }

    pub(crate) fn hyperevm_rpc_url(&self) -> &'static str {
        match self {
            Self::Mainnet => "https://rpc.hyperliquid.xyz/evm",
            Self::Testnet => "https://rpc.hyperliquid-testnet.xyz/evm",
        }
    }

    pub(crate) fn info_url(&self) -> &'static str {
        match self {
            Self::Mainnet => "https://api.hyperliquid.xyz/info",
            Self::Testnet => "https://api.hyperliquid-testnet.xyz/info",
        }
    }
}

/// Configuration for [`crate::BridgeClient`].
///
/// Only `integrator` is required; everything else has production defaults.
/// The endpoint overrides exist for tests and self-hosted mirrors.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Integrator id sent with every aggregator request.
    pub integrator: String,
    /// Optional aggregator API key for elevated rate limits.
    #[serde(default)]
    pub api_key: Option<String>,
    /// When true, quotes targeting the destination chain include the
    /// trading-ledger deposit leg.
    #[serde(default = "default_auto_deposit")]
    pub auto_deposit: bool,
    /// Slippage tolerance applied when quote params leave it unset.
    #[serde(default = "default_slippage")]
    pub default_slippage: f64,
    /// Per-chain JSON-RPC endpoint overrides.
    #[serde(default)]
    pub rpc_urls: HashMap<u64, String>,
    #[serde(default)]
    pub network: Network,
    /// Aggregator base URL override.
    #[serde(default)]
    pub lifi_base_url: Option<String>,
    /// Trading-ledger info endpoint override.
    #[serde(default)]
    pub info_url: Option<String>,
    /// Destination-chain RPC override (takes precedence over `rpc_urls`).
    #[serde(default)]
    pub hyperevm_rpc_url: Option<String>,
    /// Event bus buffer size per subscriber.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_auto_deposit() -> bool {
    true
}

fn default_slippage() -> f64 {
    DEFAULT_SLIPPAGE
}

fn default_event_capacity() -> usize {
    256
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("integrator id must not be empty")]
    MissingIntegrator,
    #[error("default slippage {0} outside allowed range [{SLIPPAGE_MIN}, {SLIPPAGE_MAX}]")]
    InvalidDefaultSlippage(f64),
}

impl BridgeConfig {
    pub fn new(integrator: impl Into<String>) -> Self {
        Self {
            integrator: integrator.into(),
            api_key: None,
            auto_deposit: default_auto_deposit(),
            default_slippage: default_slippage(),
            rpc_urls: HashMap::new(),
            network: Network::default(),
            lifi_base_url: None,
            info_url: None,
            hyperevm_rpc_url: None,
            event_capacity: default_event_capacity(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    pub fn with_auto_deposit(mut self, auto_deposit: bool) -> Self {
        self.auto_deposit = auto_deposit;
        self
    }

    pub fn with_rpc_url(mut self, chain_id: u64, url: impl Into<String>) -> Self {
        self.rpc_urls.insert(chain_id, url.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.integrator.trim().is_empty() {
            return Err(ConfigError::MissingIntegrator);
        }
        if !(SLIPPAGE_MIN..=SLIPPAGE_MAX).contains(&self.default_slippage) {
            return Err(ConfigError::InvalidDefaultSlippage(self.default_slippage));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_production_ready() {
        let config = BridgeConfig::new("hyperflow");
        assert!(config.auto_deposit);
        assert_eq!(config.default_slippage, 0.005);
        assert_eq!(config.network, Network::Mainnet);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_integrator_is_rejected() {
        let config = BridgeConfig::new("  ");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingIntegrator)
        ));
    }

    #[test]
    fn out_of_range_default_slippage_is_rejected() {
        let mut config = BridgeConfig::new("hyperflow");
        config.default_slippage = 0.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDefaultSlippage(_))
        ));
    }

    #[test]
    fn network_endpoints_follow_the_environment() {
        assert_eq!(Network::Mainnet.hyperevm_chain_id(), 999);
        assert_eq!(Network::Testnet.hyperevm_chain_id(), 998);
        assert!(Network::Testnet.hyperevm_rpc_url().contains("testnet"));
        assert!(Network::Testnet.info_url().contains("testnet"));
    }

    #[test]
    fn config_deserializes_from_toml_like_json() {
        let config: BridgeConfig = serde_json::from_value(serde_json::json!({
            "integrator": "hyperflow",
            "network": "testnet",
            "rpc_urls": { "1": "http://localhost:8545" }
        }))
        .unwrap();
        assert_eq!(config.network, Network::Testnet);
        assert_eq!(config.rpc_urls.get(&1).unwrap(), "http://localhost:8545");
    }
}
