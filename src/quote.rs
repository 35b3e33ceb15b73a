//! Quote engine: route fetch, normalization, validation and caching.
//!
//! A quote is a validated, fee-decomposed snapshot of one aggregator route,
//! valid for sixty seconds. The engine caches quotes per request shape and
//! falls back to a non-expired stale entry when the aggregator errors.

pub(crate) mod fees;

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::chains::ChainCatalog;
use crate::config::{SLIPPAGE_MAX, SLIPPAGE_MIN};
use crate::error::BridgeError;
use crate::events::{BridgeEvent, EventBus};
use crate::lifi::types::{LifiStep, LifiTransactionRequest};
use crate::lifi::{LifiApiError, LifiClient, QUOTE_TIMEOUT, QuoteRequest};
use crate::signer::TransactionRequest;
use crate::tokens::Token;

pub use fees::{FeeAmount, Fees, GasEstimate, ImpactSeverity, StepGas};

/// How long a fetched quote remains executable.
const QUOTE_VALIDITY: chrono::Duration = chrono::Duration::seconds(60);

/// Fresh-cache window; shorter than the validity so a cached quote always
/// has execution time left.
const QUOTE_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutePreference {
    #[default]
    Recommended,
    Fastest,
    Cheapest,
}

impl RoutePreference {
    fn order_param(self) -> &'static str {
        match self {
            Self::Recommended => "RECOMMENDED",
            Self::Fastest => "FASTEST",
            Self::Cheapest => "CHEAPEST",
        }
    }
}

/// Caller-supplied request for a quote.
#[derive(Debug, Clone)]
pub struct QuoteParams {
    pub from_chain_id: u64,
    /// Defaults to the destination chain.
    pub to_chain_id: Option<u64>,
    pub from_token: Address,
    pub to_token: Address,
    /// Amount in the source token's smallest units.
    pub from_amount: U256,
    pub from_address: Address,
    pub to_address: Option<Address>,
    /// Fraction in [0.0001, 0.05]; defaults to the client-wide setting.
    pub slippage: Option<f64>,
    pub route_preference: RoutePreference,
}

/// One atomic leg of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Approve,
    Swap,
    Bridge,
    Deposit,
}

impl StepKind {
    fn from_wire(raw: Option<&str>) -> Self {
        match raw.map(|s| s.to_lowercase()).as_deref() {
            Some("approve") => Self::Approve,
            Some("swap") => Self::Swap,
            Some("deposit") => Self::Deposit,
            _ => Self::Bridge,
        }
    }
}

impl Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Approve => "approve",
            Self::Swap => "swap",
            Self::Bridge => "bridge",
            Self::Deposit => "deposit",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub id: String,
    pub kind: StepKind,
    pub tool: String,
    pub from_chain_id: u64,
    pub to_chain_id: u64,
    pub from_token: Token,
    pub to_token: Token,
    pub from_amount: U256,
    pub to_amount: U256,
    pub estimated_secs: u64,
}

/// A validated, executable route snapshot.
#[derive(Debug, Clone)]
pub struct Quote {
    pub id: String,
    pub steps: Vec<Step>,
    pub fees: Fees,
    /// Sum of the step estimates.
    pub estimated_secs: u64,
    pub from_amount: U256,
    pub to_amount: U256,
    pub price_impact: Decimal,
    pub impact_severity: ImpactSeverity,
    pub high_impact: bool,
    pub expires_at: DateTime<Utc>,
    pub from_token: Token,
    pub to_token: Token,
    /// True when the client will continue into the trading-ledger deposit
    /// after arrival on the destination chain.
    pub includes_auto_deposit: bool,
    /// True when the route ends on the destination chain but the caller
    /// must deposit manually.
    pub manual_deposit_required: bool,
    /// Slippage the quote was priced with; reused for per-step re-quotes.
    pub slippage: f64,
    pub(crate) transaction_request: Option<TransactionRequest>,
}

impl Quote {
    /// Ready-to-sign transaction for the first leg, when the aggregator
    /// returned one with the quote. Step execution re-fetches fresh
    /// calldata, so this is informational.
    pub fn transaction_request(&self) -> Option<&TransactionRequest> {
        self.transaction_request.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QuoteKey {
    from_chain: u64,
    to_chain: u64,
    from_token: Address,
    to_token: Address,
    from_amount: U256,
    from_address: Address,
    slippage_bps: u32,
}

/// Quote cache: fresh reads are TTL-gated, stale reads additionally refuse
/// entries past their expiry (and delete them).
#[derive(Debug)]
struct QuoteCache {
    inner: TtlCache<QuoteKey, Quote>,
}

impl QuoteCache {
    fn new() -> Self {
        Self {
            inner: TtlCache::new(QUOTE_CACHE_TTL),
        }
    }

    fn get_fresh(&self, key: &QuoteKey) -> Option<Quote> {
        let quote = self.inner.get(key)?;
        if quote.expires_at <= Utc::now() {
            self.inner.invalidate(key);
            return None;
        }
        Some(quote)
    }

    fn get_stale(&self, key: &QuoteKey) -> Option<Quote> {
        let entry = self.inner.get_stale(key)?;
        if entry.value.expires_at <= Utc::now() {
            self.inner.invalidate(key);
            return None;
        }
        Some(entry.value)
    }

    fn set(&self, key: QuoteKey, quote: Quote) {
        self.inner.set(key, quote);
    }

    fn clear(&self) {
        self.inner.clear();
    }
}

struct NormalizedParams {
    to_chain_id: u64,
    slippage: f64,
}

/// Formats a fractional slippage as the percent string the aggregator
/// expects (0.005 -> "0.50").
pub(crate) fn format_slippage(slippage: f64) -> String {
    format!("{:.2}", slippage * 100.0)
}

pub(crate) fn parse_amount(raw: &str) -> Option<U256> {
    U256::from_str_radix(raw, 10).ok()
}

/// Maps an aggregator transaction request into a signable one.
pub(crate) fn map_transaction_request(
    wire: &LifiTransactionRequest,
    fallback_chain_id: u64,
) -> Result<TransactionRequest, BridgeError> {
    let to_raw = wire.to.as_deref().ok_or_else(|| BridgeError::InvalidQuote {
        reason: "transaction request missing 'to'".to_string(),
    })?;
    let to = Address::from_str(to_raw).map_err(|_| BridgeError::InvalidQuote {
        reason: format!("transaction request has malformed 'to': {to_raw}"),
    })?;
    let data = match wire.data.as_deref() {
        Some(hex) => alloy::hex::decode(hex.trim_start_matches("0x")).map_err(|err| {
            BridgeError::InvalidQuote {
                reason: format!("transaction request has malformed calldata: {err}"),
            }
        })?,
        None => Vec::new(),
    };
    Ok(TransactionRequest {
        to,
        data,
        value: parse_hex_quantity(wire.value.as_deref()),
        gas: wire.gas_limit.as_deref().map(|hex| parse_hex_quantity(Some(hex))),
        gas_price: wire
            .gas_price
            .as_deref()
            .map(|hex| parse_hex_quantity(Some(hex))),
        chain_id: wire.chain_id.unwrap_or(fallback_chain_id),
    })
}

fn parse_hex_quantity(raw: Option<&str>) -> U256 {
    let Some(raw) = raw else {
        return U256::ZERO;
    };
    let trimmed = raw.trim_start_matches("0x");
    if trimmed.is_empty() {
        return U256::ZERO;
    }
    U256::from_str_radix(trimmed, 16).unwrap_or(U256::ZERO)
}

#[derive(Debug)]
pub struct QuoteEngine {
    lifi: Arc<LifiClient>,
    chains: Arc<ChainCatalog>,
    events: EventBus,
    cache: QuoteCache,
    auto_deposit: bool,
    default_slippage: f64,
    destination_chain_id: u64,
}

impl QuoteEngine {
    pub(crate) fn new(
        lifi: Arc<LifiClient>,
        chains: Arc<ChainCatalog>,
        events: EventBus,
        auto_deposit: bool,
        default_slippage: f64,
        destination_chain_id: u64,
    ) -> Self {
        Self {
            lifi,
            chains,
            events,
            cache: QuoteCache::new(),
            auto_deposit,
            default_slippage,
            destination_chain_id,
        }
    }

    fn normalize(&self, params: &QuoteParams) -> Result<NormalizedParams, BridgeError> {
        if params.from_amount == U256::ZERO {
            return Err(BridgeError::InvalidQuoteParams {
                reason: "fromAmount must be a positive integer".to_string(),
            });
        }
        let slippage = params.slippage.unwrap_or(self.default_slippage);
        if !(SLIPPAGE_MIN..=SLIPPAGE_MAX).contains(&slippage) {
            return Err(BridgeError::InvalidSlippage {
                value: slippage,
                min: SLIPPAGE_MIN,
                max: SLIPPAGE_MAX,
            });
        }
        Ok(NormalizedParams {
            to_chain_id: params.to_chain_id.unwrap_or(self.destination_chain_id),
            slippage,
        })
    }

    fn cache_key(&self, params: &QuoteParams, normalized: &NormalizedParams) -> QuoteKey {
        QuoteKey {
            from_chain: params.from_chain_id,
            to_chain: normalized.to_chain_id,
            from_token: params.from_token,
            to_token: params.to_token,
            from_amount: params.from_amount,
            from_address: params.from_address,
            slippage_bps: (normalized.slippage * 10_000.0).round() as u32,
        }
    }

    /// Fetches (or serves from cache) a single executable quote.
    pub async fn get_quote(&self, params: &QuoteParams) -> Result<Quote, BridgeError> {
        let normalized = self.normalize(params)?;
        self.chains.validate_chain(params.from_chain_id).await?;
        self.chains.validate_chain(normalized.to_chain_id).await?;

        let key = self.cache_key(params, &normalized);
        if let Some(hit) = self.cache.get_fresh(&key) {
            debug!(quote_id = %hit.id, "serving cached quote");
            return Ok(hit);
        }

        let request = QuoteRequest {
            from_chain: params.from_chain_id,
            to_chain: normalized.to_chain_id,
            from_token: format!("{:#x}", params.from_token),
            to_token: format!("{:#x}", params.to_token),
            from_amount: params.from_amount.to_string(),
            from_address: format!("{:#x}", params.from_address),
            to_address: params.to_address.map(|addr| format!("{addr:#x}")),
            slippage_pct: format_slippage(normalized.slippage),
            order: Some(params.route_preference.order_param()),
        };

        let mapped = match self.lifi.quote(&request, QUOTE_TIMEOUT).await {
            Ok(wire) => self.map_quote(&wire, normalized.to_chain_id, normalized.slippage),
            Err(err) => Err(classify_api_error(
                err,
                params.from_chain_id,
                normalized.to_chain_id,
            )),
        };

        match mapped {
            Ok(quote) => {
                self.cache.set(key, quote.clone());
                self.events.emit(BridgeEvent::QuoteUpdated {
                    quote_id: quote.id.clone(),
                    from_chain_id: params.from_chain_id,
                    to_chain_id: normalized.to_chain_id,
                    to_amount: quote.to_amount,
                });
                Ok(quote)
            }
            Err(err) => {
                if let Some(stale) = self.cache.get_stale(&key) {
                    warn!(%err, quote_id = %stale.id, "quote refresh failed, serving stale quote");
                    return Ok(stale);
                }
                Err(err)
            }
        }
    }

    /// Fetches multiple candidate routes; the first element is the
    /// recommended one.
    pub async fn get_quotes(&self, params: &QuoteParams) -> Result<Vec<Quote>, BridgeError> {
        let normalized = self.normalize(params)?;
        self.chains.validate_chain(params.from_chain_id).await?;
        self.chains.validate_chain(normalized.to_chain_id).await?;

        let body = json!({
            "fromChainId": params.from_chain_id,
            "toChainId": normalized.to_chain_id,
            "fromTokenAddress": format!("{:#x}", params.from_token),
            "toTokenAddress": format!("{:#x}", params.to_token),
            "fromAmount": params.from_amount.to_string(),
            "fromAddress": format!("{:#x}", params.from_address),
            "options": {
                "slippage": normalized.slippage,
                "order": params.route_preference.order_param(),
            },
        });

        let routes = self
            .lifi
            .routes(&body, QUOTE_TIMEOUT)
            .await
            .map_err(|err| {
                classify_api_error(err, params.from_chain_id, normalized.to_chain_id)
            })?;
        if routes.is_empty() {
            return Err(BridgeError::NoRouteFound {
                from_chain_id: params.from_chain_id,
                to_chain_id: normalized.to_chain_id,
            });
        }

        routes
            .iter()
            .map(|route| {
                let step_refs: Vec<&LifiStep> = route.steps.iter().collect();
                let steps = step_refs
                    .iter()
                    .map(|step| map_step(step))
                    .collect::<Result<Vec<_>, _>>()?;
                let from_usd = route
                    .steps
                    .first()
                    .and_then(|s| s.estimate.as_ref())
                    .and_then(|e| e.from_amount_usd.as_deref())
                    .and_then(|raw| Decimal::from_str(raw).ok());
                let to_usd = route
                    .steps
                    .last()
                    .and_then(|s| s.estimate.as_ref())
                    .and_then(|e| e.to_amount_usd.as_deref())
                    .and_then(|raw| Decimal::from_str(raw).ok());
                self.assemble_quote(
                    route.id.clone(),
                    steps,
                    &step_refs,
                    Token::from_wire(&route.from_token)?,
                    Token::from_wire(&route.to_token)?,
                    parse_amount(&route.from_amount).ok_or_else(|| malformed("fromAmount"))?,
                    parse_amount(&route.to_amount).ok_or_else(|| malformed("toAmount"))?,
                    from_usd,
                    to_usd,
                    normalized.to_chain_id,
                    normalized.slippage,
                    None,
                )
            })
            .collect()
    }

    /// Maps a `/quote` response (one step, possibly with included sub-steps)
    /// into a [`Quote`].
    fn map_quote(
        &self,
        wire: &LifiStep,
        to_chain_id: u64,
        slippage: f64,
    ) -> Result<Quote, BridgeError> {
        let step_sources: Vec<&LifiStep> = if wire.included_steps.is_empty() {
            vec![wire]
        } else {
            wire.included_steps.iter().collect()
        };
        let steps = step_sources
            .iter()
            .map(|step| map_step(step))
            .collect::<Result<Vec<_>, _>>()?;

        let estimate = wire.estimate.as_ref();
        let from_amount = estimate
            .and_then(|e| e.from_amount.as_deref())
            .or(wire.action.from_amount.as_deref())
            .and_then(parse_amount)
            .ok_or_else(|| malformed("fromAmount"))?;
        let to_amount = estimate
            .and_then(|e| e.to_amount.as_deref())
            .and_then(parse_amount)
            .ok_or_else(|| malformed("toAmount"))?;
        let from_usd = estimate
            .and_then(|e| e.from_amount_usd.as_deref())
            .and_then(|raw| Decimal::from_str(raw).ok());
        let to_usd = estimate
            .and_then(|e| e.to_amount_usd.as_deref())
            .and_then(|raw| Decimal::from_str(raw).ok());

        let transaction_request = wire
            .transaction_request
            .as_ref()
            .map(|tx| map_transaction_request(tx, wire.action.from_chain_id))
            .transpose()
            .unwrap_or_else(|err| {
                debug!(%err, "ignoring malformed transaction request on quote");
                None
            });

        self.assemble_quote(
            wire.id.clone(),
            steps,
            &step_sources,
            Token::from_wire(&wire.action.from_token)?,
            Token::from_wire(&wire.action.to_token)?,
            from_amount,
            to_amount,
            from_usd,
            to_usd,
            to_chain_id,
            slippage,
            transaction_request,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble_quote(
        &self,
        id: String,
        steps: Vec<Step>,
        step_sources: &[&LifiStep],
        from_token: Token,
        to_token: Token,
        from_amount: U256,
        to_amount: U256,
        from_usd: Option<Decimal>,
        to_usd: Option<Decimal>,
        to_chain_id: u64,
        slippage: f64,
        transaction_request: Option<TransactionRequest>,
    ) -> Result<Quote, BridgeError> {
        let fees = fees::decompose(step_sources);
        let (price_impact, impact_severity, high_impact) = fees::price_impact(from_usd, to_usd);
        let estimated_secs = steps.iter().map(|step| step.estimated_secs).sum();
        let targets_destination = to_chain_id == self.destination_chain_id;

        Ok(Quote {
            id,
            steps,
            fees,
            estimated_secs,
            from_amount,
            to_amount,
            price_impact,
            impact_severity,
            high_impact,
            expires_at: Utc::now() + QUOTE_VALIDITY,
            from_token,
            to_token,
            includes_auto_deposit: self.auto_deposit && targets_destination,
            manual_deposit_required: !self.auto_deposit && targets_destination,
            slippage,
            transaction_request,
        })
    }

    pub(crate) fn clear_cache(&self) {
        self.cache.clear();
    }

    #[cfg(test)]
    fn backdate_cache(&self, params: &QuoteParams, age: Duration) {
        let normalized = self.normalize(params).unwrap();
        let key = self.cache_key(params, &normalized);
        self.cache.inner.backdate(&key, age);
    }
}

fn malformed(field: &str) -> BridgeError {
    BridgeError::QuoteFetchFailed {
        message: format!("aggregator response missing or malformed field: {field}"),
    }
}

fn map_step(wire: &LifiStep) -> Result<Step, BridgeError> {
    let estimate = wire.estimate.as_ref();
    let from_amount = estimate
        .and_then(|e| e.from_amount.as_deref())
        .or(wire.action.from_amount.as_deref())
        .and_then(parse_amount)
        .ok_or_else(|| malformed("step fromAmount"))?;
    let to_amount = estimate
        .and_then(|e| e.to_amount.as_deref())
        .and_then(parse_amount)
        .unwrap_or(U256::ZERO);
    Ok(Step {
        id: wire.id.clone(),
        kind: StepKind::from_wire(wire.step_type.as_deref()),
        tool: wire.tool.clone(),
        from_chain_id: wire.action.from_chain_id,
        to_chain_id: wire.action.to_chain_id,
        from_token: Token::from_wire(&wire.action.from_token)?,
        to_token: Token::from_wire(&wire.action.to_token)?,
        from_amount,
        to_amount,
        estimated_secs: estimate
            .and_then(|e| e.execution_duration)
            .map(|secs| secs.round() as u64)
            .unwrap_or(0),
    })
}

pub(crate) fn classify_api_error(
    err: LifiApiError,
    from_chain_id: u64,
    to_chain_id: u64,
) -> BridgeError {
    match err {
        LifiApiError::Status { status: 404, .. } => BridgeError::NoRouteFound {
            from_chain_id,
            to_chain_id,
        },
        LifiApiError::Status { body, .. } if body.contains("No available quotes") => {
            BridgeError::NoRouteFound {
                from_chain_id,
                to_chain_id,
            }
        }
        LifiApiError::Status { status, body } => BridgeError::NetworkError {
            message: format!("aggregator returned {status}: {body}"),
        },
        LifiApiError::Timeout { limit } => BridgeError::timeout(limit),
        LifiApiError::Transport { message } => BridgeError::NetworkError { message },
        LifiApiError::Decode { message } => BridgeError::QuoteFetchFailed { message },
    }
}
