//! Token entity and cached token discovery.
//!
//! Source-chain token lists come from the aggregator; the destination-chain
//! entries are hardcoded with verified addresses. Addresses are canonical by
//! construction: every wire string is parsed into [`Address`] at ingress.

use alloy::primitives::{Address, address};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::chains::{HYPEREVM_CHAIN_ID, HYPEREVM_TESTNET_CHAIN_ID};
use crate::error::{BridgeError, parse_address};
use crate::lifi::LifiClient;
use crate::lifi::types::LifiToken;

/// USDC on HyperEVM, the stablecoin every bridge route targets.
pub const HYPEREVM_USDC: Address = address!("0xb88339cb7199b77e23db6e890353e22632ba630f");

const TOKENS_TTL: Duration = Duration::from_secs(15 * 60);

/// A fungible token on a specific chain.
///
/// Two tokens are equal iff their `(chain_id, address)` pair matches;
/// metadata differences (symbol casing, price) do not affect identity.
#[derive(Debug, Clone)]
pub struct Token {
    pub address: Address,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub logo_uri: Option<String>,
    pub chain_id: u64,
    pub price_usd: Option<Decimal>,
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.chain_id == other.chain_id && self.address == other.address
    }
}

impl Eq for Token {}

impl Token {
    pub fn is_native(&self) -> bool {
        self.address == Address::ZERO
    }

    pub(crate) fn from_wire(wire: &LifiToken) -> Result<Self, BridgeError> {
        let address = parse_address(&wire.address)?;
        Ok(Self {
            address,
            symbol: wire.symbol.clone(),
            name: wire.name.clone(),
            decimals: wire.decimals,
            logo_uri: wire.logo_uri.clone(),
            chain_id: wire.chain_id,
            price_usd: wire
                .price_usd
                .as_deref()
                .and_then(|p| Decimal::from_str(p).ok()),
        })
    }
}

/// The hardcoded destination-chain USDC entry.
pub(crate) fn hyperevm_usdc(chain_id: u64) -> Token {
    Token {
        address: HYPEREVM_USDC,
        symbol: "USDC".to_string(),
        name: "USD Coin".to_string(),
        decimals: 6,
        logo_uri: None,
        chain_id,
        price_usd: Some(Decimal::ONE),
    }
}

/// The destination chain's native gas token.
pub(crate) fn hyperevm_native(chain_id: u64) -> Token {
    Token {
        address: Address::ZERO,
        symbol: "HYPE".to_string(),
        name: "Hyperliquid".to_string(),
        decimals: 18,
        logo_uri: None,
        chain_id,
        price_usd: None,
    }
}

fn is_hyperevm(chain_id: u64) -> bool {
    chain_id == HYPEREVM_CHAIN_ID || chain_id == HYPEREVM_TESTNET_CHAIN_ID
}

/// Token list for one chain, with staleness marking for degraded reads.
#[derive(Debug, Clone)]
pub struct TokensSnapshot {
    pub tokens: Vec<Token>,
    pub is_stale: bool,
    pub cached_at: Option<DateTime<Utc>>,
}

/// Cached discovery of per-chain token lists and bridgeable token sets.
#[derive(Debug)]
pub struct TokenCatalog {
    lifi: Arc<LifiClient>,
    destination_chain_id: u64,
    tokens_cache: TtlCache<u64, Vec<Token>>,
    bridgeable_cache: TtlCache<u64, Vec<Token>>,
}

impl TokenCatalog {
    pub(crate) fn new(lifi: Arc<LifiClient>, destination_chain_id: u64) -> Self {
        Self {
            lifi,
            destination_chain_id,
            tokens_cache: TtlCache::new(TOKENS_TTL),
            bridgeable_cache: TtlCache::new(TOKENS_TTL),
        }
    }

    /// All known tokens on a chain. Destination-chain entries are hardcoded.
    pub async fn get_tokens(&self, chain_id: u64) -> Result<TokensSnapshot, BridgeError> {
        if is_hyperevm(chain_id) {
            return Ok(TokensSnapshot {
                tokens: vec![hyperevm_usdc(chain_id), hyperevm_native(chain_id)],
                is_stale: false,
                cached_at: None,
            });
        }
        if let Some(tokens) = self.tokens_cache.get(&chain_id) {
            return Ok(TokensSnapshot {
                tokens,
                is_stale: false,
                cached_at: None,
            });
        }
        match self.lifi.tokens(chain_id).await {
            Ok(wire) => {
                let tokens = map_tokens(&wire);
                self.tokens_cache.set(chain_id, tokens.clone());
                Ok(TokensSnapshot {
                    tokens,
                    is_stale: false,
                    cached_at: None,
                })
            }
            Err(err) => match self.tokens_cache.get_stale(&chain_id) {
                Some(stale) => {
                    warn!(chain_id, %err, "token fetch failed, serving stale list");
                    Ok(TokensSnapshot {
                        tokens: stale.value,
                        is_stale: true,
                        cached_at: Some(stale.cached_at),
                    })
                }
                None => Err(BridgeError::TokenFetchFailed {
                    chain_id,
                    message: err.to_string(),
                }),
            },
        }
    }

    /// Tokens on `chain_id` that have at least one bridge route to the
    /// destination chain, deduplicated by address.
    pub async fn get_bridgeable_tokens(&self, chain_id: u64) -> Result<TokensSnapshot, BridgeError> {
        if is_hyperevm(chain_id) {
            return Ok(TokensSnapshot {
                tokens: vec![hyperevm_usdc(chain_id), hyperevm_native(chain_id)],
                is_stale: false,
                cached_at: None,
            });
        }
        if let Some(tokens) = self.bridgeable_cache.get(&chain_id) {
            return Ok(TokensSnapshot {
                tokens,
                is_stale: false,
                cached_at: None,
            });
        }
        match self
            .lifi
            .connections(chain_id, self.destination_chain_id)
            .await
        {
            Ok(connections) => {
                let mut seen: HashSet<Address> = HashSet::new();
                let mut tokens = Vec::new();
                for connection in &connections {
                    for wire in &connection.from_tokens {
                        match Token::from_wire(wire) {
                            Ok(token) => {
                                if seen.insert(token.address) {
                                    tokens.push(token);
                                }
                            }
                            Err(err) => {
                                debug!(%err, "skipping malformed connection token entry");
                            }
                        }
                    }
                }
                self.bridgeable_cache.set(chain_id, tokens.clone());
                Ok(TokensSnapshot {
                    tokens,
                    is_stale: false,
                    cached_at: None,
                })
            }
            Err(err) => match self.bridgeable_cache.get_stale(&chain_id) {
                Some(stale) => {
                    warn!(chain_id, %err, "connections fetch failed, serving stale list");
                    Ok(TokensSnapshot {
                        tokens: stale.value,
                        is_stale: true,
                        cached_at: Some(stale.cached_at),
                    })
                }
                None => Err(BridgeError::TokenFetchFailed {
                    chain_id,
                    message: err.to_string(),
                }),
            },
        }
    }

    pub(crate) fn clear(&self) {
        self.tokens_cache.clear();
        self.bridgeable_cache.clear();
    }
}

fn map_tokens(wire: &[LifiToken]) -> Vec<Token> {
    wire.iter()
        .filter_map(|entry| match Token::from_wire(entry) {
            Ok(token) => Some(token),
            Err(err) => {
                debug!(%err, "skipping malformed token entry");
                None
            }
        })
        .collect()
}
