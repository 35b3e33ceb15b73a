//! Snapshot-delta detection of bridged funds arriving on the destination
//! chain.
//!
//! The caller snapshots the destination USDC balance before executing a
//! route; the detector then polls until the balance grows by at least the
//! expected amount minus a 1% tolerance for bridge fees.

use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::balance::format_token_amount;
use crate::bindings::IERC20;
use crate::error::BridgeError;
use crate::rpc::{EvmRpc, word_to_u256};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Destination USDC has six decimals.
const USDC_DECIMALS: u8 = 6;

#[derive(Debug, Clone)]
pub struct ArrivalOptions {
    /// When set, arrival requires `delta >= expected * 99 / 100`; otherwise
    /// any positive delta counts.
    pub expected_amount: Option<U256>,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for ArrivalOptions {
    fn default() -> Self {
        Self {
            expected_amount: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arrival {
    /// The detected balance delta in smallest units.
    pub amount: U256,
    pub amount_formatted: String,
    pub previous_balance: U256,
    pub current_balance: U256,
    pub detected_at: DateTime<Utc>,
}

/// Minimum delta that satisfies an expected amount (1% fee tolerance).
pub(crate) fn tolerance_threshold(expected: U256) -> U256 {
    expected * U256::from(99u64) / U256::from(100u64)
}

#[derive(Debug)]
pub struct ArrivalDetector {
    rpc: Arc<EvmRpc>,
    usdc: Address,
}

impl ArrivalDetector {
    pub(crate) fn new(rpc: Arc<EvmRpc>, usdc: Address) -> Self {
        Self { rpc, usdc }
    }

    /// Current destination-chain USDC balance of `wallet`.
    pub async fn snapshot_balance(&self, wallet: Address) -> Result<U256, BridgeError> {
        let calldata = IERC20::balanceOfCall { account: wallet }.abi_encode();
        self.rpc
            .call(self.usdc, calldata)
            .await
            .map(|data| word_to_u256(&data))
            .map_err(|err| BridgeError::BalanceFetchFailed {
                message: err.to_string(),
            })
    }

    /// Polls until the balance delta against `previous_balance` satisfies
    /// the arrival condition or the timeout elapses. Individual poll
    /// failures are logged and skipped.
    pub async fn detect_arrival(
        &self,
        wallet: Address,
        previous_balance: U256,
        options: &ArrivalOptions,
    ) -> Result<Arrival, BridgeError> {
        let started = Instant::now();
        let mut last_observed = previous_balance;

        loop {
            match self.snapshot_balance(wallet).await {
                Ok(current) => {
                    last_observed = current;
                    let delta = current.saturating_sub(previous_balance);
                    let arrived = match options.expected_amount {
                        Some(expected) => delta >= tolerance_threshold(expected),
                        None => delta > U256::ZERO,
                    };
                    if arrived {
                        return Ok(Arrival {
                            amount: delta,
                            amount_formatted: format_token_amount(delta, USDC_DECIMALS),
                            previous_balance,
                            current_balance: current,
                            detected_at: Utc::now(),
                        });
                    }
                    debug!(%current, %delta, "no arrival yet");
                }
                Err(err) => warn!(%err, "arrival poll failed, retrying"),
            }

            if started.elapsed() >= options.timeout {
                return Err(BridgeError::ArrivalTimeout {
                    waited_secs: options.timeout.as_secs(),
                    last_balance: last_observed,
                });
            }
            tokio::time::sleep(options.poll_interval).await;
        }
    }
}
