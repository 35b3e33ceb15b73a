//! Fee decomposition and price-impact classification.
//!
//! Gas aggregates are bigint sums over every step's gas costs; USD figures
//! are decimal sums. Fee items are classified by provider name, and items
//! the aggregator marks as already included in the quoted amount are kept
//! out of the totals.

use alloy::primitives::U256;
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::debug;

use crate::lifi::types::{LifiFeeCost, LifiGasCost, LifiStep};
use crate::tokens::Token;

/// An aggregated fee with its USD value and (when known) the token it is
/// denominated in.
#[derive(Debug, Clone, PartialEq)]
pub struct FeeAmount {
    pub amount: U256,
    pub amount_usd: Decimal,
    pub token: Option<Token>,
}

/// Gas contribution of a single step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepGas {
    pub step_id: String,
    pub gas_limit: U256,
    pub gas_cost: U256,
    pub gas_cost_usd: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GasEstimate {
    pub gas_limit: U256,
    pub gas_price: U256,
    pub gas_cost: U256,
    pub gas_cost_usd: Decimal,
    /// Inferred from the first gas-cost token across the steps.
    pub native_token: Option<Token>,
    pub step_breakdown: Vec<StepGas>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fees {
    /// Sum of gas, bridge and protocol USD components.
    pub total_usd: Decimal,
    pub gas_usd: Decimal,
    pub bridge_fee_usd: Decimal,
    pub protocol_fee_usd: Decimal,
    pub gas_estimate: GasEstimate,
    pub gas_fee: Option<FeeAmount>,
    pub bridge_fee: Option<FeeAmount>,
    pub protocol_fee: Option<FeeAmount>,
}

/// How hard the quoted conversion moves the price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpactSeverity {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl std::fmt::Display for ImpactSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very_high",
        };
        write!(f, "{s}")
    }
}

fn parse_u256(raw: &str) -> Option<U256> {
    U256::from_str_radix(raw, 10).ok()
}

fn parse_usd(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw).ok()
}

/// Decomposes fees across the given steps.
pub(crate) fn decompose(steps: &[&LifiStep]) -> Fees {
    let mut gas_limit = U256::ZERO;
    let mut gas_price = U256::ZERO;
    let mut gas_cost = U256::ZERO;
    let mut gas_usd = Decimal::ZERO;
    let mut native_token: Option<Token> = None;
    let mut step_breakdown = Vec::new();

    let mut bridge = AccumulatedFee::default();
    let mut protocol = AccumulatedFee::default();

    for step in steps {
        let Some(estimate) = step.estimate.as_ref() else {
            continue;
        };
        let mut step_gas_limit = U256::ZERO;
        let mut step_gas_cost = U256::ZERO;
        let mut step_gas_usd = Decimal::ZERO;

        for cost in &estimate.gas_costs {
            accumulate_gas_cost(
                cost,
                &mut step_gas_limit,
                &mut step_gas_cost,
                &mut step_gas_usd,
                &mut gas_price,
                &mut native_token,
            );
        }

        gas_limit += step_gas_limit;
        gas_cost += step_gas_cost;
        gas_usd += step_gas_usd;
        step_breakdown.push(StepGas {
            step_id: step.id.clone(),
            gas_limit: step_gas_limit,
            gas_cost: step_gas_cost,
            gas_cost_usd: step_gas_usd,
        });

        for fee in &estimate.fee_costs {
            let bucket = if is_protocol_fee(fee) {
                &mut protocol
            } else {
                &mut bridge
            };
            bucket.add(fee);
        }
    }

    let gas_fee = (gas_cost > U256::ZERO || gas_usd > Decimal::ZERO).then(|| FeeAmount {
        amount: gas_cost,
        amount_usd: gas_usd,
        token: native_token.clone(),
    });
    let bridge_fee = bridge.into_fee();
    let protocol_fee = protocol.into_fee();

    let bridge_fee_usd = bridge_fee
        .as_ref()
        .map(|fee| fee.amount_usd)
        .unwrap_or(Decimal::ZERO);
    let protocol_fee_usd = protocol_fee
        .as_ref()
        .map(|fee| fee.amount_usd)
        .unwrap_or(Decimal::ZERO);

    Fees {
        total_usd: gas_usd + bridge_fee_usd + protocol_fee_usd,
        gas_usd,
        bridge_fee_usd,
        protocol_fee_usd,
        gas_estimate: GasEstimate {
            gas_limit,
            gas_price,
            gas_cost,
            gas_cost_usd: gas_usd,
            native_token,
            step_breakdown,
        },
        gas_fee,
        bridge_fee,
        protocol_fee,
    }
}

fn accumulate_gas_cost(
    cost: &LifiGasCost,
    step_gas_limit: &mut U256,
    step_gas_cost: &mut U256,
    step_gas_usd: &mut Decimal,
    gas_price: &mut U256,
    native_token: &mut Option<Token>,
) {
    if let Some(limit) = cost
        .limit
        .as_deref()
        .or(cost.estimate.as_deref())
        .and_then(parse_u256)
    {
        *step_gas_limit += limit;
    }
    if let Some(amount) = cost.amount.as_deref().and_then(parse_u256) {
        *step_gas_cost += amount;
    }
    if let Some(usd) = cost.amount_usd.as_deref().and_then(parse_usd) {
        *step_gas_usd += usd;
    }
    if *gas_price == U256::ZERO
        && let Some(price) = cost.price.as_deref().and_then(parse_u256)
        && price > U256::ZERO
    {
        *gas_price = price;
    }
    if native_token.is_none()
        && let Some(wire) = cost.token.as_ref()
    {
        match Token::from_wire(wire) {
            Ok(token) => *native_token = Some(token),
            Err(err) => debug!(%err, "unparseable gas token entry"),
        }
    }
}

/// Fee items attributed to the routing layer rather than a bridge.
fn is_protocol_fee(fee: &LifiFeeCost) -> bool {
    let name = fee.name.to_lowercase();
    name.contains("protocol") || name.contains("lifi")
}

#[derive(Default)]
struct AccumulatedFee {
    amount: U256,
    amount_usd: Decimal,
    token: Option<Token>,
    seen: bool,
}

impl AccumulatedFee {
    fn add(&mut self, fee: &LifiFeeCost) {
        // Included fees are already part of the quoted amount and must not
        // inflate the totals.
        if fee.included {
            return;
        }
        self.seen = true;
        if let Some(amount) = fee.amount.as_deref().and_then(parse_u256) {
            self.amount += amount;
        }
        if let Some(usd) = fee.amount_usd.as_deref().and_then(parse_usd) {
            self.amount_usd += usd;
        }
        if self.token.is_none()
            && let Some(wire) = fee.token.as_ref()
        {
            self.token = Token::from_wire(wire).ok();
        }
    }

    fn into_fee(self) -> Option<FeeAmount> {
        self.seen.then_some(FeeAmount {
            amount: self.amount,
            amount_usd: self.amount_usd,
            token: self.token,
        })
    }
}

const VERY_HIGH_IMPACT: Decimal = Decimal::from_parts(3, 0, 0, false, 2); // 0.03
const HIGH_IMPACT: Decimal = Decimal::from_parts(1, 0, 0, false, 2); // 0.01
const MEDIUM_IMPACT: Decimal = Decimal::from_parts(5, 0, 0, false, 3); // 0.005

/// Price impact of the conversion: `(fromUsd - toUsd) / fromUsd`, rounded to
/// four decimals and clamped to [-1, 1]. A missing USD value defaults the
/// impact to zero.
pub(crate) fn price_impact(
    from_usd: Option<Decimal>,
    to_usd: Option<Decimal>,
) -> (Decimal, ImpactSeverity, bool) {
    let impact = match (from_usd, to_usd) {
        (Some(from), Some(to)) if from > Decimal::ZERO => ((from - to) / from)
            .round_dp(4)
            .clamp(Decimal::NEGATIVE_ONE, Decimal::ONE),
        _ => Decimal::ZERO,
    };
    let magnitude = impact.abs();
    let severity = if magnitude >= VERY_HIGH_IMPACT {
        ImpactSeverity::VeryHigh
    } else if magnitude >= HIGH_IMPACT {
        ImpactSeverity::High
    } else if magnitude >= MEDIUM_IMPACT {
        ImpactSeverity::Medium
    } else {
        ImpactSeverity::Low
    };
    (impact, severity, magnitude >= HIGH_IMPACT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn usd(raw: &str) -> Option<Decimal> {
        Some(Decimal::from_str(raw).unwrap())
    }

    #[test]
    fn impact_severity_bands() {
        let (impact, severity, high) = price_impact(usd("1000"), usd("999.50"));
        assert_eq!(impact, dec!(0.0005));
        assert_eq!(severity, ImpactSeverity::Low);
        assert!(!high);

        let (_, severity, high) = price_impact(usd("1000"), usd("993"));
        assert_eq!(severity, ImpactSeverity::Medium);
        assert!(!high);

        let (_, severity, high) = price_impact(usd("1000"), usd("985"));
        assert_eq!(severity, ImpactSeverity::High);
        assert!(high);

        let (_, severity, _) = price_impact(usd("1000"), usd("960"));
        assert_eq!(severity, ImpactSeverity::VeryHigh);
    }

    #[test]
    fn missing_to_usd_defaults_to_zero_impact() {
        let (impact, severity, high) = price_impact(usd("1000"), None);
        assert_eq!(impact, Decimal::ZERO);
        assert_eq!(severity, ImpactSeverity::Low);
        assert!(!high);
    }

    #[test]
    fn impact_is_clamped() {
        let (impact, _, _) = price_impact(usd("1"), usd("5"));
        assert_eq!(impact, Decimal::NEGATIVE_ONE);
    }

    #[test]
    fn decompose_sums_components() {
        let step: LifiStep = serde_json::from_value(serde_json::json!({
            "id": "step-1",
            "type": "lifi",
            "tool": "stargate",
            "action": {
                "fromChainId": 1,
                "toChainId": 999,
                "fromToken": {
                    "address": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
                    "symbol": "USDC", "name": "USD Coin", "decimals": 6, "chainId": 1
                },
                "toToken": {
                    "address": "0xb88339cb7199b77e23db6e890353e22632ba630f",
                    "symbol": "USDC", "name": "USD Coin", "decimals": 6, "chainId": 999
                },
                "fromAmount": "1000000000"
            },
            "estimate": {
                "fromAmount": "1000000000",
                "toAmount": "999500000",
                "gasCosts": [{
                    "price": "20000000000",
                    "limit": "210000",
                    "amount": "4200000000000000",
                    "amountUSD": "12.60",
                    "token": {
                        "address": "0x0000000000000000000000000000000000000000",
                        "symbol": "ETH", "name": "Ether", "decimals": 18, "chainId": 1
                    }
                }],
                "feeCosts": [
                    {
                        "name": "LIFI Fixed Fee",
                        "included": false,
                        "amount": "2500000",
                        "amountUSD": "2.50",
                        "token": {
                            "address": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
                            "symbol": "USDC", "name": "USD Coin", "decimals": 6, "chainId": 1
                        }
                    },
                    {
                        "name": "Relayer Fee",
                        "included": false,
                        "amount": "1000000",
                        "amountUSD": "1.00",
                        "token": {
                            "address": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
                            "symbol": "USDC", "name": "USD Coin", "decimals": 6, "chainId": 1
                        }
                    },
                    {
                        "name": "Included Bridge Fee",
                        "included": true,
                        "amount": "9000000",
                        "amountUSD": "9.00"
                    }
                ]
            }
        }))
        .unwrap();

        let fees = decompose(&[&step]);
        assert_eq!(fees.gas_usd, dec!(12.60));
        assert_eq!(fees.protocol_fee_usd, dec!(2.50));
        assert_eq!(fees.bridge_fee_usd, dec!(1.00));
        assert_eq!(
            fees.total_usd,
            fees.gas_usd + fees.bridge_fee_usd + fees.protocol_fee_usd
        );

        assert_eq!(fees.gas_estimate.gas_limit, U256::from(210_000u64));
        assert_eq!(fees.gas_estimate.gas_price, U256::from(20_000_000_000u64));
        assert_eq!(
            fees.gas_estimate.gas_cost,
            U256::from(4_200_000_000_000_000u64)
        );
        assert_eq!(
            fees.gas_estimate.native_token.as_ref().unwrap().symbol,
            "ETH"
        );
        assert_eq!(fees.gas_estimate.step_breakdown.len(), 1);

        // Included fees never reach the totals.
        assert_eq!(fees.bridge_fee.as_ref().unwrap().amount, U256::from(1_000_000u64));
    }
}
