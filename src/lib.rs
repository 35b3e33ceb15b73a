//! Cross-chain bridge orchestration into HyperEVM and the HyperCore
//! trading ledger.
//!
//! Routes tokens from any supported EVM chain to HyperEVM through an
//! external route aggregator, detects arrival on the destination chain,
//! and (when configured) continues the flow by depositing the arrived
//! USDC into the trading ledger and confirming the credit off-chain.
//!
//! The library operates no bridges itself: route discovery and step
//! calldata come from the aggregator, signing stays with the caller via
//! [`TransactionSigner`], and observation happens over public JSON-RPC and
//! the ledger's info endpoint.

pub mod arrival;
pub mod balance;
mod bindings;
pub mod cache;
pub mod chains;
pub mod client;
pub mod config;
pub mod deposit;
pub mod error;
pub mod events;
pub mod l1;
mod lifi;
pub mod orchestrator;
pub mod quote;
pub mod registry;
mod rpc;
pub mod signer;
pub mod tokens;

#[cfg(test)]
pub(crate) mod test_utils;

pub use arrival::{Arrival, ArrivalOptions};
pub use balance::{
    BalanceCheck, BalanceQuery, BalanceValidation, BalanceWarning, BalancesReport, ShortfallKind,
    TokenBalance,
};
pub use chains::{
    Chain, ChainsSnapshot, HYPERCORE_CHAIN_ID, HYPEREVM_CHAIN_ID, HYPEREVM_TESTNET_CHAIN_ID,
};
pub use client::{BridgeClient, BridgeTxStatus, TransferStatus};
pub use config::{BridgeConfig, ConfigError, Network};
pub use deposit::{
    DEPOSIT_BRIDGE, DepositOptions, DepositPreflight, DepositReceipt, DestinationDex, MIN_DEPOSIT,
};
pub use error::{BridgeError, CancelReason, RecoveryAction};
pub use events::{BridgeEvent, EventKind, TxPurpose};
pub use l1::{
    L1Confirmation, L1Monitor, L1MonitorController, L1MonitorOptions, L1MonitorProgress,
    L1MonitorState,
};
pub use orchestrator::{ExecuteOptions, ExecutionPhase, ExecutionResult, OrchestratorTimings};
pub use quote::{
    Fees, GasEstimate, ImpactSeverity, Quote, QuoteParams, RoutePreference, Step, StepKind,
};
pub use registry::{
    ExecutionId, ExecutionStatus, ExecutionStatusView, ProjectedError, StepState, StepStatus,
};
pub use rpc::ReceiptSummary;
pub use signer::{SignerError, TransactionRequest, TransactionSigner};
pub use tokens::{HYPEREVM_USDC, Token, TokensSnapshot};
