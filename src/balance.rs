//! Wallet balance reads with caching, request coalescing and debouncing.
//!
//! Balances are read directly from chain RPC (`balanceOf` via `eth_call`,
//! native via `eth_getBalance`) with token metadata from the aggregator.
//! Concurrent requests for the same `(wallet, chain, token)` key share one
//! in-flight fetch; a short debounce window absorbs bursts from reactive
//! callers. Failed refreshes fall back to the stale cache entry when one
//! exists.

use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared, join_all};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::bindings::IERC20;
use crate::cache::TtlCache;
use crate::chains::{HYPEREVM_CHAIN_ID, HYPEREVM_TESTNET_CHAIN_ID};
use crate::error::BridgeError;
use crate::lifi::LifiClient;
use crate::quote::Quote;
use crate::rpc::{RpcRegistry, word_to_u256};
use crate::tokens::{HYPEREVM_USDC, Token, TokenCatalog, hyperevm_native, hyperevm_usdc};

const BALANCE_TTL: Duration = Duration::from_secs(10);

/// Window that absorbs rapid repeat requests before the fetch starts.
const DEBOUNCE: Duration = Duration::from_millis(300);

/// Identifies one balance read. Address fields are canonical by type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BalanceQuery {
    pub wallet: Address,
    pub chain_id: u64,
    /// `Address::ZERO` reads the native balance.
    pub token: Address,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenBalance {
    pub token: Token,
    pub balance: U256,
    /// Human-readable amount in whole-token units.
    pub formatted: String,
    pub balance_usd: Option<Decimal>,
    pub has_balance: bool,
}

/// Multi-chain balance fan-out result. `is_stale` is true iff any leaf was
/// served from the stale cache; `cached_at` is the earliest stale timestamp.
#[derive(Debug, Clone)]
pub struct BalancesReport {
    pub balances: HashMap<u64, Vec<TokenBalance>>,
    pub is_stale: bool,
    pub cached_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct BalanceCheck {
    pub sufficient: bool,
    pub balance: TokenBalance,
    pub shortfall: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortfallKind {
    Token,
    Gas,
}

#[derive(Debug, Clone)]
pub struct BalanceWarning {
    pub kind: ShortfallKind,
    pub message: String,
    pub shortfall: U256,
}

/// Outcome of checking a quote against current wallet funds.
#[derive(Debug, Clone)]
pub struct BalanceValidation {
    pub valid: bool,
    pub token_sufficient: bool,
    pub gas_sufficient: bool,
    pub warnings: Vec<BalanceWarning>,
}

#[derive(Clone)]
struct FetchOutcome {
    balance: TokenBalance,
    /// Set when the value came from the stale cache after a failed refresh.
    stale_since: Option<DateTime<Utc>>,
}

type SharedFetch = Shared<BoxFuture<'static, Result<FetchOutcome, BridgeError>>>;

#[derive(Debug)]
struct Inner {
    lifi: Arc<LifiClient>,
    rpc: Arc<RpcRegistry>,
    tokens: Arc<TokenCatalog>,
    cache: TtlCache<BalanceQuery, TokenBalance>,
    in_flight: Mutex<HashMap<BalanceQuery, SharedFetch>>,
}

#[derive(Clone)]
#[derive(Debug)]
pub struct BalanceService {
    inner: Arc<Inner>,
}

impl BalanceService {
    pub(crate) fn new(
        lifi: Arc<LifiClient>,
        rpc: Arc<RpcRegistry>,
        tokens: Arc<TokenCatalog>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                lifi,
                rpc,
                tokens,
                cache: TtlCache::new(BALANCE_TTL),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub async fn get_balance(&self, query: BalanceQuery) -> Result<TokenBalance, BridgeError> {
        self.entry(query).await.map(|outcome| outcome.balance)
    }

    async fn entry(&self, query: BalanceQuery) -> Result<FetchOutcome, BridgeError> {
        if let Some(balance) = self.inner.cache.get(&query) {
            return Ok(FetchOutcome {
                balance,
                stale_since: None,
            });
        }

        let fetch = {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .expect("balance in-flight lock poisoned");
            match in_flight.get(&query) {
                Some(existing) => existing.clone(),
                None => {
                    let inner = self.inner.clone();
                    let fetch: SharedFetch = async move {
                        tokio::time::sleep(DEBOUNCE).await;
                        match Inner::fetch(&inner, query).await {
                            Ok(balance) => {
                                inner.cache.set(query, balance.clone());
                                Ok(FetchOutcome {
                                    balance,
                                    stale_since: None,
                                })
                            }
                            Err(err) => match inner.cache.get_stale(&query) {
                                Some(stale) => {
                                    warn!(%err, "balance fetch failed, serving stale entry");
                                    Ok(FetchOutcome {
                                        balance: stale.value,
                                        stale_since: Some(stale.cached_at),
                                    })
                                }
                                None => Err(err),
                            },
                        }
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(query, fetch.clone());
                    fetch
                }
            }
        };

        let result = fetch.clone().await;

        // Clear the in-flight marker, but only our own entry: a later fetch
        // may already have replaced it.
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .expect("balance in-flight lock poisoned");
        if in_flight
            .get(&query)
            .map(|current| current.ptr_eq(&fetch))
            .unwrap_or(false)
        {
            in_flight.remove(&query);
        }

        result
    }

    /// Fans out per chain and per token. Leaf failures degrade the report
    /// instead of failing it.
    pub async fn get_balances(
        &self,
        wallet: Address,
        chains: &[u64],
        token_addresses: Option<&[Address]>,
    ) -> Result<BalancesReport, BridgeError> {
        let per_chain = chains.iter().map(|&chain_id| {
            let service = self.clone();
            let tokens = token_addresses.map(|addrs| addrs.to_vec());
            async move {
                let addresses = match tokens {
                    Some(addresses) => addresses,
                    None => match service.inner.tokens.get_bridgeable_tokens(chain_id).await {
                        Ok(snapshot) => snapshot
                            .tokens
                            .iter()
                            .map(|token| token.address)
                            .collect(),
                        Err(err) => {
                            warn!(chain_id, %err, "token discovery failed, skipping chain");
                            return (chain_id, Vec::new());
                        }
                    },
                };

                let per_token = addresses.into_iter().map(|token| {
                    let service = service.clone();
                    async move {
                        match service
                            .entry(BalanceQuery {
                                wallet,
                                chain_id,
                                token,
                            })
                            .await
                        {
                            Ok(outcome) => Some(outcome),
                            Err(err) => {
                                debug!(chain_id, %token, %err, "balance leaf failed");
                                None
                            }
                        }
                    }
                });
                let outcomes: Vec<FetchOutcome> =
                    join_all(per_token).await.into_iter().flatten().collect();
                (chain_id, outcomes)
            }
        });

        let mut balances = HashMap::new();
        let mut earliest_stale: Option<DateTime<Utc>> = None;
        for (chain_id, outcomes) in join_all(per_chain).await {
            let mut chain_balances = Vec::new();
            for outcome in outcomes {
                if let Some(stale_since) = outcome.stale_since {
                    earliest_stale = Some(match earliest_stale {
                        Some(current) => current.min(stale_since),
                        None => stale_since,
                    });
                }
                chain_balances.push(outcome.balance);
            }
            balances.insert(chain_id, chain_balances);
        }

        Ok(BalancesReport {
            balances,
            is_stale: earliest_stale.is_some(),
            cached_at: earliest_stale,
        })
    }

    /// Reads one balance and compares it against a required amount.
    pub async fn check_balance(
        &self,
        query: BalanceQuery,
        required: U256,
    ) -> Result<BalanceCheck, BridgeError> {
        let balance = self.get_balance(query).await?;
        let sufficient = balance.balance >= required;
        let shortfall = required.saturating_sub(balance.balance);
        Ok(BalanceCheck {
            sufficient,
            balance,
            shortfall,
        })
    }

    /// Checks a quote against the wallet's source-token and native balances.
    pub async fn validate_balance(
        &self,
        quote: &Quote,
        wallet: Address,
    ) -> Result<BalanceValidation, BridgeError> {
        let chain_id = quote.from_token.chain_id;
        let token_check = self
            .check_balance(
                BalanceQuery {
                    wallet,
                    chain_id,
                    token: quote.from_token.address,
                },
                quote.from_amount,
            )
            .await?;
        let gas_check = self
            .check_balance(
                BalanceQuery {
                    wallet,
                    chain_id,
                    token: Address::ZERO,
                },
                quote.fees.gas_estimate.gas_cost,
            )
            .await?;

        let mut warnings = Vec::new();
        if !token_check.sufficient {
            warnings.push(BalanceWarning {
                kind: ShortfallKind::Token,
                message: format!(
                    "need {} more {} to cover the transfer",
                    token_check.shortfall, quote.from_token.symbol
                ),
                shortfall: token_check.shortfall,
            });
        }
        if !gas_check.sufficient {
            warnings.push(BalanceWarning {
                kind: ShortfallKind::Gas,
                message: format!(
                    "need {} more of the native token to cover gas",
                    gas_check.shortfall
                ),
                shortfall: gas_check.shortfall,
            });
        }

        Ok(BalanceValidation {
            valid: token_check.sufficient && gas_check.sufficient,
            token_sufficient: token_check.sufficient,
            gas_sufficient: gas_check.sufficient,
            warnings,
        })
    }

    pub(crate) fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    #[cfg(test)]
    fn backdate(&self, query: &BalanceQuery, age: Duration) {
        self.inner.cache.backdate(query, age);
    }
}

impl Inner {
    async fn fetch(inner: &Arc<Inner>, query: BalanceQuery) -> Result<TokenBalance, BridgeError> {
        let token = Self::token_metadata(inner, &query).await?;
        let rpc = inner.rpc.endpoint(query.chain_id)?;

        let balance = if query.token == Address::ZERO {
            rpc.get_balance(query.wallet).await
        } else {
            let calldata = IERC20::balanceOfCall {
                account: query.wallet,
            }
            .abi_encode();
            rpc.call(query.token, calldata).await.map(|data| word_to_u256(&data))
        }
        .map_err(|err| BridgeError::BalanceFetchFailed {
            message: err.to_string(),
        })?;

        Ok(build_balance(token, balance))
    }

    async fn token_metadata(inner: &Arc<Inner>, query: &BalanceQuery) -> Result<Token, BridgeError> {
        if query.chain_id == HYPEREVM_CHAIN_ID || query.chain_id == HYPEREVM_TESTNET_CHAIN_ID {
            if query.token == HYPEREVM_USDC {
                return Ok(hyperevm_usdc(query.chain_id));
            }
            if query.token == Address::ZERO {
                return Ok(hyperevm_native(query.chain_id));
            }
        }
        let wire = inner
            .lifi
            .token(query.chain_id, query.token)
            .await
            .map_err(|err| BridgeError::BalanceFetchFailed {
                message: err.to_string(),
            })?;
        Token::from_wire(&wire).map_err(|err| BridgeError::BalanceFetchFailed {
            message: err.to_string(),
        })
    }
}

fn build_balance(token: Token, balance: U256) -> TokenBalance {
    let formatted = format_token_amount(balance, token.decimals);
    let balance_usd = token.price_usd.and_then(|price| {
        let raw = Decimal::from_str(&balance.to_string()).ok()?;
        let scale = 10u64.checked_pow(u32::from(token.decimals))?;
        raw.checked_div(Decimal::from(scale))?.checked_mul(price)
    });
    TokenBalance {
        has_balance: balance > U256::ZERO,
        token,
        balance,
        formatted,
        balance_usd,
    }
}

/// Human-formats a smallest-unit amount in whole-token units.
pub(crate) fn format_token_amount(amount: U256, decimals: u8) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let raw = amount.to_string();
    let scale = usize::from(decimals);
    if raw.len() <= scale {
        format!("0.{}{raw}", "0".repeat(scale - raw.len()))
    } else {
        let (integral, fractional) = raw.split_at(raw.len() - scale);
        format!("{integral}.{fractional}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Network;
    use alloy::primitives::address;
    use httpmock::prelude::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    const WALLET: Address = address!("0x1111111111111111111111111111111111111111");
    const USDC_MAINNET: Address = address!("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");

    fn service(server: &MockServer) -> BalanceService {
        let lifi = Arc::new(LifiClient::new(server.base_url(), "test", None));
        let rpc = Arc::new(RpcRegistry::new(
            Network::Mainnet,
            HashMap::from([(1u64, server.base_url())]),
        ));
        let tokens = Arc::new(TokenCatalog::new(lifi.clone(), HYPEREVM_CHAIN_ID));
        BalanceService::new(lifi, rpc, tokens)
    }

    fn mock_token_metadata<'a>(server: &'a MockServer) -> httpmock::Mock<'a> {
        server.mock(|when, then| {
            when.method(GET).path("/token");
            then.status(200).json_body(json!({
                "address": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
                "symbol": "USDC", "name": "USD Coin",
                "decimals": 6, "chainId": 1, "priceUSD": "1.0"
            }));
        })
    }

    fn mock_erc20_balance<'a>(server: &'a MockServer, word: &str) -> httpmock::Mock<'a> {
        let result = format!("0x{word:0>64}");
        server.mock(|when, then| {
            when.method(POST).json_body_partial(r#"{"method":"eth_call"}"#);
            then.status(200)
                .json_body(json!({ "jsonrpc": "2.0", "id": 1, "result": result }));
        })
    }

    fn query() -> BalanceQuery {
        BalanceQuery {
            wallet: WALLET,
            chain_id: 1,
            token: USDC_MAINNET,
        }
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_fetch() {
        let server = MockServer::start();
        let token_mock = mock_token_metadata(&server);
        let rpc_mock = mock_erc20_balance(&server, "f4240");

        let service = service(&server);
        let (a, b, c, d, e) = tokio::join!(
            service.get_balance(query()),
            service.get_balance(query()),
            service.get_balance(query()),
            service.get_balance(query()),
            service.get_balance(query()),
        );
        for result in [a, b, c, d, e] {
            let balance = result.unwrap();
            assert_eq!(balance.balance, U256::from(1_000_000u64));
            assert!(balance.has_balance);
        }
        assert_eq!(token_mock.hits(), 1);
        assert_eq!(rpc_mock.hits(), 1);

        // Within the TTL the cache answers without any network traffic.
        service.get_balance(query()).await.unwrap();
        assert_eq!(rpc_mock.hits(), 1);

        // Past the TTL a fresh fetch goes out.
        service.backdate(&query(), Duration::from_secs(11));
        service.get_balance(query()).await.unwrap();
        assert_eq!(rpc_mock.hits(), 2);
    }

    #[tokio::test]
    async fn native_balance_uses_eth_get_balance() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/token");
            then.status(200).json_body(json!({
                "address": "0x0000000000000000000000000000000000000000",
                "symbol": "ETH", "name": "Ether",
                "decimals": 18, "chainId": 1, "priceUSD": "2000"
            }));
        });
        let rpc_mock = server.mock(|when, then| {
            when.method(POST)
                .json_body_partial(r#"{"method":"eth_getBalance"}"#);
            then.status(200)
                .json_body(json!({ "jsonrpc": "2.0", "id": 1, "result": "0xde0b6b3a7640000" }));
        });

        let service = service(&server);
        let balance = service
            .get_balance(BalanceQuery {
                wallet: WALLET,
                chain_id: 1,
                token: Address::ZERO,
            })
            .await
            .unwrap();
        assert_eq!(balance.balance, U256::from(1_000_000_000_000_000_000u64));
        assert_eq!(balance.balance_usd, Some(dec!(2000)));
        rpc_mock.assert();
    }

    #[tokio::test]
    async fn stale_entry_served_after_failed_refresh() {
        let server = MockServer::start();
        let mut token_mock = mock_token_metadata(&server);
        let mut rpc_mock = mock_erc20_balance(&server, "f4240");

        let service = service(&server);
        service.get_balance(query()).await.unwrap();

        token_mock.delete();
        rpc_mock.delete();
        server.mock(|when, then| {
            when.method(POST);
            then.status(500).body("rpc down");
        });
        server.mock(|when, then| {
            when.method(GET).path("/token");
            then.status(500).body("aggregator down");
        });
        service.backdate(&query(), Duration::from_secs(60));

        let balance = service.get_balance(query()).await.unwrap();
        assert_eq!(balance.balance, U256::from(1_000_000u64));
    }

    #[tokio::test]
    async fn fetch_failure_without_cache_is_typed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/token");
            then.status(500).body("down");
        });

        let err = service(&server).get_balance(query()).await.unwrap_err();
        assert!(matches!(err, BridgeError::BalanceFetchFailed { .. }));
    }

    #[tokio::test]
    async fn differently_cased_inputs_share_a_cache_key() {
        // Addresses are canonicalized at ingress by parsing into `Address`,
        // so two spellings of the same token hit the same entry.
        let upper: Address = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"
            .parse()
            .unwrap();
        let lower: Address = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"
            .parse()
            .unwrap();
        assert_eq!(upper, lower);

        let server = MockServer::start();
        let token_mock = mock_token_metadata(&server);
        let rpc_mock = mock_erc20_balance(&server, "f4240");

        let service = service(&server);
        service
            .get_balance(BalanceQuery {
                wallet: WALLET,
                chain_id: 1,
                token: upper,
            })
            .await
            .unwrap();
        service
            .get_balance(BalanceQuery {
                wallet: WALLET,
                chain_id: 1,
                token: lower,
            })
            .await
            .unwrap();
        assert_eq!(token_mock.hits(), 1);
        assert_eq!(rpc_mock.hits(), 1);
    }

    #[tokio::test]
    async fn get_balances_degrades_on_leaf_failures() {
        let server = MockServer::start();
        mock_token_metadata(&server);
        server.mock(|when, then| {
            when.method(POST);
            then.status(500).body("rpc down");
        });

        let service = service(&server);
        let report = service
            .get_balances(WALLET, &[1], Some(&[USDC_MAINNET]))
            .await
            .unwrap();
        assert!(report.balances.get(&1).unwrap().is_empty());
        assert!(!report.is_stale);
    }

    #[test]
    fn formatted_amounts_are_human_scale() {
        assert_eq!(
            format_token_amount(U256::from(1_500_000u64), 6),
            "1.500000"
        );
    }

    #[test]
    fn usd_value_combines_price_and_scale() {
        let mut token = hyperevm_usdc(HYPEREVM_CHAIN_ID);
        token.price_usd = Some(dec!(1));
        let balance = build_balance(token, U256::from(2_500_000u64));
        assert_eq!(balance.balance_usd, Some(dec!(2.5)));
    }
}
