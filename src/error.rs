//! Bridge error taxonomy with recoverability classification.
//!
//! Every failure the library can surface is a variant of [`BridgeError`], a
//! closed sum carrying the data of the failure. Each variant maps to a stable
//! code, a user-facing message, a recoverability flag, and a recommended
//! [`RecoveryAction`] so callers can decide between automatic retry and
//! user intervention without string matching.
//!
//! Variants are `Clone` so results can flow through deduplicated (shared)
//! in-flight futures in the balance service.

use alloy::primitives::{Address, TxHash, U256};
use std::fmt::Display;
use std::time::Duration;

/// Suggested next step for the caller after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Retry,
    AddFunds,
    IncreaseSlippage,
    TryDifferentAmount,
    TryAgain,
    FetchNewQuote,
    ContactSupport,
    SwitchNetwork,
    CheckAllowance,
    AdjustSlippage,
}

impl Display for RecoveryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Retry => "retry",
            Self::AddFunds => "add_funds",
            Self::IncreaseSlippage => "increase_slippage",
            Self::TryDifferentAmount => "try_different_amount",
            Self::TryAgain => "try_again",
            Self::FetchNewQuote => "fetch_new_quote",
            Self::ContactSupport => "contact_support",
            Self::SwitchNetwork => "switch_network",
            Self::CheckAllowance => "check_allowance",
            Self::AdjustSlippage => "adjust_slippage",
        };
        write!(f, "{s}")
    }
}

/// Why an L1 confirmation monitor stopped without confirming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller cancelled via the controller.
    Cancelled,
    /// The hard maximum timeout elapsed.
    MaxTimeout,
}

impl Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::MaxTimeout => write!(f, "max_timeout"),
        }
    }
}

/// Unified error type for all bridge, quote, balance and deposit operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    #[error("insufficient {symbol} balance: required {required}, available {available}")]
    InsufficientBalance {
        symbol: String,
        required: U256,
        available: U256,
    },
    #[error(
        "insufficient native balance for gas on chain {chain_id}: \
         required {required}, available {available}"
    )]
    InsufficientGas {
        chain_id: u64,
        required: U256,
        available: U256,
    },
    #[error("no route found from chain {from_chain_id} to chain {to_chain_id}")]
    NoRouteFound {
        from_chain_id: u64,
        to_chain_id: u64,
    },
    #[error("slippage exceeded: {details}")]
    SlippageExceeded { details: String },
    #[error("slippage {value} outside allowed range [{min}, {max}]")]
    InvalidSlippage { value: f64, min: f64, max: f64 },
    #[error("transaction failed: {reason}")]
    TransactionFailed {
        reason: String,
        tx_hash: Option<TxHash>,
    },
    #[error("transaction rejected by the wallet")]
    UserRejected,
    #[error("network error: {message}")]
    NetworkError { message: String },
    #[error("deposit transaction failed: {reason}")]
    DepositTransactionFailed {
        reason: String,
        tx_hash: Option<TxHash>,
    },
    #[error("deposit amount {provided} below minimum {required}")]
    MinimumDeposit { required: U256, provided: U256 },
    #[error("invalid address: {address}")]
    InvalidAddress { address: String },
    #[error("quote expired")]
    QuoteExpired,
    #[error("invalid quote: {reason}")]
    InvalidQuote { reason: String },
    #[error("invalid quote parameters: {reason}")]
    InvalidQuoteParams { reason: String },
    #[error("quote fetch failed: {message}")]
    QuoteFetchFailed { message: String },
    #[error("chain catalog fetch failed: {message}")]
    ChainFetchFailed { message: String },
    #[error("token catalog fetch failed for chain {chain_id}: {message}")]
    TokenFetchFailed { chain_id: u64, message: String },
    #[error("balance fetch failed: {message}")]
    BalanceFetchFailed { message: String },
    #[error("funds did not arrive within {waited_secs}s (last observed balance {last_balance})")]
    ArrivalTimeout {
        waited_secs: u64,
        last_balance: U256,
    },
    #[error("L1 confirmation monitor stopped: {reason}")]
    L1MonitorCancelled { reason: CancelReason },
    #[error("gave up after {attempts} attempts")]
    MaxRetriesExceeded { attempts: u32 },
}

/// Wallet error substrings that indicate the user declined to sign.
const REJECTION_PATTERNS: &[&str] = &[
    "user rejected",
    "user denied",
    "rejected the request",
    "request rejected",
    "denied transaction",
];

/// Substrings that indicate a transport-level failure rather than an
/// on-chain one.
const NETWORK_PATTERNS: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "connection",
    "fetch failed",
    "econnrefused",
];

const REVERT_PATTERNS: &[&str] = &["revert", "reverted", "execution failed", "out of gas"];

/// Error message substrings for which an automatic retry will not help.
/// Used when projecting registry errors recorded as plain strings.
const NON_RECOVERABLE_PATTERNS: &[&str] = &[
    "user rejected",
    "user denied",
    "insufficient balance",
    "insufficient funds",
    "nonce too low",
];

impl BridgeError {
    /// Stable machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::InsufficientGas { .. } => "INSUFFICIENT_GAS",
            Self::NoRouteFound { .. } => "NO_ROUTE_FOUND",
            Self::SlippageExceeded { .. } => "SLIPPAGE_EXCEEDED",
            Self::InvalidSlippage { .. } => "INVALID_SLIPPAGE",
            Self::TransactionFailed { .. } => "TRANSACTION_FAILED",
            Self::UserRejected => "USER_REJECTED",
            Self::NetworkError { .. } => "NETWORK_ERROR",
            Self::DepositTransactionFailed { .. } => "DEPOSIT_TRANSACTION_FAILED",
            Self::MinimumDeposit { .. } => "MINIMUM_DEPOSIT",
            Self::InvalidAddress { .. } => "INVALID_ADDRESS",
            Self::QuoteExpired => "QUOTE_EXPIRED",
            Self::InvalidQuote { .. } => "INVALID_QUOTE",
            Self::InvalidQuoteParams { .. } => "INVALID_QUOTE_PARAMS",
            Self::QuoteFetchFailed { .. } => "QUOTE_FETCH_FAILED",
            Self::ChainFetchFailed { .. } => "CHAIN_FETCH_FAILED",
            Self::TokenFetchFailed { .. } => "TOKEN_FETCH_FAILED",
            Self::BalanceFetchFailed { .. } => "BALANCE_FETCH_FAILED",
            Self::ArrivalTimeout { .. } => "ARRIVAL_TIMEOUT",
            Self::L1MonitorCancelled { .. } => "L1_MONITOR_CANCELLED",
            Self::MaxRetriesExceeded { .. } => "MAX_RETRIES_EXCEEDED",
        }
    }

    /// Whether an automatic retry of the failed operation is likely safe.
    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            Self::SlippageExceeded { .. }
                | Self::TransactionFailed { .. }
                | Self::NetworkError { .. }
                | Self::DepositTransactionFailed { .. }
                | Self::QuoteExpired
                | Self::QuoteFetchFailed { .. }
                | Self::ChainFetchFailed { .. }
                | Self::TokenFetchFailed { .. }
                | Self::BalanceFetchFailed { .. }
                | Self::ArrivalTimeout { .. }
        )
    }

    /// Recommended recovery step to surface alongside [`Self::user_message`].
    pub fn recovery_action(&self) -> RecoveryAction {
        match self {
            Self::InsufficientBalance { .. } | Self::InsufficientGas { .. } => {
                RecoveryAction::AddFunds
            }
            Self::NoRouteFound { .. } | Self::MinimumDeposit { .. } => {
                RecoveryAction::TryDifferentAmount
            }
            Self::SlippageExceeded { .. } => RecoveryAction::IncreaseSlippage,
            Self::InvalidSlippage { .. } => RecoveryAction::AdjustSlippage,
            Self::TransactionFailed { .. }
            | Self::UserRejected
            | Self::InvalidAddress { .. }
            | Self::ArrivalTimeout { .. } => RecoveryAction::TryAgain,
            Self::NetworkError { .. }
            | Self::QuoteFetchFailed { .. }
            | Self::ChainFetchFailed { .. }
            | Self::TokenFetchFailed { .. }
            | Self::BalanceFetchFailed { .. } => RecoveryAction::Retry,
            Self::DepositTransactionFailed { .. } => RecoveryAction::CheckAllowance,
            Self::QuoteExpired | Self::InvalidQuote { .. } => RecoveryAction::FetchNewQuote,
            Self::InvalidQuoteParams { .. } => RecoveryAction::SwitchNetwork,
            Self::L1MonitorCancelled { .. } | Self::MaxRetriesExceeded { .. } => {
                RecoveryAction::ContactSupport
            }
        }
    }

    /// Short human-readable explanation suitable for end users.
    pub fn user_message(&self) -> String {
        match self {
            Self::InsufficientBalance { symbol, .. } => {
                format!("You don't have enough {symbol} for this transfer.")
            }
            Self::InsufficientGas { .. } => {
                "You don't have enough native tokens to pay for gas.".into()
            }
            Self::NoRouteFound { .. } => {
                "No bridge route is available for this token pair. Try a different amount or token."
                    .into()
            }
            Self::SlippageExceeded { .. } => {
                "Price moved beyond your slippage tolerance. Try again with a higher tolerance."
                    .into()
            }
            Self::InvalidSlippage { min, max, .. } => {
                format!("Slippage must be between {min} and {max}.")
            }
            Self::TransactionFailed { .. } => {
                "The transaction failed on-chain. You can safely try again.".into()
            }
            Self::UserRejected => "The transaction was rejected in your wallet.".into(),
            Self::NetworkError { .. } => {
                "A network request failed. Check your connection and retry.".into()
            }
            Self::DepositTransactionFailed { .. } => {
                "The deposit transaction failed. Check your token allowance and try again.".into()
            }
            Self::MinimumDeposit { required, .. } => {
                format!("The deposit is below the minimum of {required} base units.")
            }
            Self::InvalidAddress { address } => format!("{address} is not a valid address."),
            Self::QuoteExpired => "The quote expired. Fetch a new one and retry.".into(),
            Self::InvalidQuote { .. } => "The quote is no longer usable. Fetch a new one.".into(),
            Self::InvalidQuoteParams { reason } => format!("Invalid request: {reason}."),
            Self::QuoteFetchFailed { .. } => "Could not fetch a quote. Please retry.".into(),
            Self::ChainFetchFailed { .. } => "Could not load supported chains.".into(),
            Self::TokenFetchFailed { .. } => "Could not load the token list.".into(),
            Self::BalanceFetchFailed { .. } => "Could not read your balance.".into(),
            Self::ArrivalTimeout { .. } => {
                "Funds have not arrived yet. They may still be in transit; check again shortly."
                    .into()
            }
            Self::L1MonitorCancelled { reason } => match reason {
                CancelReason::Cancelled => "Monitoring was cancelled.".into(),
                CancelReason::MaxTimeout => {
                    "The deposit was not credited within the maximum wait. Contact support.".into()
                }
            },
            Self::MaxRetriesExceeded { .. } => {
                "The operation did not complete after several attempts.".into()
            }
        }
    }

    /// Normalizes an arbitrary wallet/transport failure message into a typed
    /// error. Rejection substrings win over network substrings, which win
    /// over revert substrings; anything else is a generic transaction
    /// failure carrying the original message.
    pub(crate) fn from_signer_failure(message: &str) -> Self {
        let lower = message.to_lowercase();
        if REJECTION_PATTERNS.iter().any(|p| lower.contains(p)) {
            return Self::UserRejected;
        }
        if NETWORK_PATTERNS.iter().any(|p| lower.contains(p)) {
            return Self::NetworkError {
                message: message.to_string(),
            };
        }
        if REVERT_PATTERNS.iter().any(|p| lower.contains(p)) {
            return Self::TransactionFailed {
                reason: message.to_string(),
                tx_hash: None,
            };
        }
        Self::TransactionFailed {
            reason: message.to_string(),
            tx_hash: None,
        }
    }

    pub(crate) fn invalid_address(address: impl Display) -> Self {
        Self::InvalidAddress {
            address: address.to_string(),
        }
    }

    pub(crate) fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    pub(crate) fn timeout(limit: Duration) -> Self {
        Self::NetworkError {
            message: format!(
                "request aborted after the configured {}ms limit",
                limit.as_millis()
            ),
        }
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        Self::NetworkError {
            message: err.to_string(),
        }
    }
}

/// Heuristic over error messages recorded as plain strings in the execution
/// registry. Messages matching a known dead-end pattern are projected as
/// non-recoverable.
pub(crate) fn is_recoverable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    !NON_RECOVERABLE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Validates a wallet address string, returning the parsed address or a
/// typed error carrying the offending input.
pub(crate) fn parse_address(raw: &str) -> Result<Address, BridgeError> {
    raw.parse::<Address>()
        .map_err(|_| BridgeError::invalid_address(raw))
}
