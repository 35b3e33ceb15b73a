//! Chain catalog: cached discovery of bridgeable source chains.
//!
//! The aggregator's chain list is filtered to mainnet EVM chains; the
//! destination chain is a hardcoded entry since the aggregator does not
//! list it.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::config::Network;
use crate::error::BridgeError;
use crate::lifi::LifiClient;
use crate::lifi::types::LifiChain;
use crate::tokens::{Token, hyperevm_native};

/// The destination EVM every bridge route in this system targets.
pub const HYPEREVM_CHAIN_ID: u64 = 999;
pub const HYPEREVM_TESTNET_CHAIN_ID: u64 = 998;

/// Named id of the HyperCore trading ledger. Never used in RPC calls; the
/// ledger is observed via the info endpoint only.
pub const HYPERCORE_CHAIN_ID: u64 = 1337;

const CHAINS_TTL: Duration = Duration::from_secs(30 * 60);

/// A chain the bridge can source funds from (or the destination itself).
#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    pub id: u64,
    pub key: String,
    pub name: String,
    pub logo_uri: Option<String>,
    pub native_token: Token,
    pub is_evm: bool,
}

/// Chain list with staleness marking for degraded reads.
#[derive(Debug, Clone)]
pub struct ChainsSnapshot {
    pub chains: Vec<Chain>,
    pub is_stale: bool,
    pub cached_at: Option<DateTime<Utc>>,
}

/// The hardcoded destination-chain entry.
pub(crate) fn hyperevm_chain(network: Network) -> Chain {
    let id = network.hyperevm_chain_id();
    Chain {
        id,
        key: "hyperevm".to_string(),
        name: match network {
            Network::Mainnet => "HyperEVM".to_string(),
            Network::Testnet => "HyperEVM Testnet".to_string(),
        },
        logo_uri: None,
        native_token: hyperevm_native(id),
        is_evm: true,
    }
}

#[derive(Debug)]
pub struct ChainCatalog {
    lifi: Arc<LifiClient>,
    network: Network,
    cache: TtlCache<(), Vec<Chain>>,
}

impl ChainCatalog {
    pub(crate) fn new(lifi: Arc<LifiClient>, network: Network) -> Self {
        Self {
            lifi,
            network,
            cache: TtlCache::new(CHAINS_TTL),
        }
    }

    /// Mainnet EVM chains plus the destination entry. Falls back to a stale
    /// cached list when the aggregator is unreachable.
    pub async fn get_chains(&self) -> Result<ChainsSnapshot, BridgeError> {
        if let Some(chains) = self.cache.get(&()) {
            return Ok(ChainsSnapshot {
                chains,
                is_stale: false,
                cached_at: None,
            });
        }
        match self.lifi.chains().await {
            Ok(wire) => {
                let chains = self.map_chains(&wire);
                self.cache.set((), chains.clone());
                Ok(ChainsSnapshot {
                    chains,
                    is_stale: false,
                    cached_at: None,
                })
            }
            Err(err) => match self.cache.get_stale(&()) {
                Some(stale) => {
                    warn!(%err, "chain fetch failed, serving stale catalog");
                    Ok(ChainsSnapshot {
                        chains: stale.value,
                        is_stale: true,
                        cached_at: Some(stale.cached_at),
                    })
                }
                None => Err(BridgeError::ChainFetchFailed {
                    message: err.to_string(),
                }),
            },
        }
    }

    /// Validates that a chain is usable as a route endpoint. The destination
    /// ids always resolve; other ids are checked against the catalog. When
    /// the catalog itself is unreachable, validation is waived and the
    /// aggregator remains the authority.
    pub(crate) async fn validate_chain(&self, chain_id: u64) -> Result<(), BridgeError> {
        if chain_id == HYPEREVM_CHAIN_ID || chain_id == HYPEREVM_TESTNET_CHAIN_ID {
            return Ok(());
        }
        match self.get_chains().await {
            Ok(snapshot) => {
                if snapshot.chains.iter().any(|chain| chain.id == chain_id) {
                    Ok(())
                } else {
                    Err(BridgeError::InvalidQuoteParams {
                        reason: format!("chain {chain_id} is not supported"),
                    })
                }
            }
            Err(err) => {
                warn!(chain_id, %err, "chain catalog unavailable, skipping validation");
                Ok(())
            }
        }
    }

    fn map_chains(&self, wire: &[LifiChain]) -> Vec<Chain> {
        let mut chains: Vec<Chain> = wire
            .iter()
            .filter(|entry| {
                entry
                    .chain_type
                    .as_deref()
                    .map(|t| t.eq_ignore_ascii_case("EVM"))
                    .unwrap_or(true)
                    && entry.mainnet.unwrap_or(true)
            })
            .filter_map(|entry| self.map_chain(entry))
            .collect();
        let destination = hyperevm_chain(self.network);
        if !chains.iter().any(|chain| chain.id == destination.id) {
            chains.push(destination);
        }
        chains
    }

    fn map_chain(&self, wire: &LifiChain) -> Option<Chain> {
        let native_wire = wire.native_token.as_ref()?;
        let native_token = match Token::from_wire(native_wire) {
            Ok(token) => token,
            Err(err) => {
                debug!(chain_id = wire.id, %err, "skipping chain with malformed native token");
                return None;
            }
        };
        Some(Chain {
            id: wire.id,
            key: wire.key.clone(),
            name: wire.name.clone(),
            logo_uri: wire.logo_uri.clone(),
            native_token,
            is_evm: true,
        })
    }

    pub(crate) fn clear(&self) {
        self.cache.clear();
    }
}
