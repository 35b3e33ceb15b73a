//! Caller-supplied transaction signing capability.
//!
//! The library never holds keys. Anything that can report an address and
//! chain id and broadcast a prepared transaction can drive an execution:
//! a local keystore, a browser wallet relay, an MPC service. The optional
//! receipt primitive lets wallet backends that already track inclusion
//! short-circuit the library's own RPC polling.

use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;

use crate::rpc::ReceiptSummary;

/// A fully-prepared transaction handed to the signer for signing and
/// broadcast. Calldata comes from the aggregator or from this library's own
/// ABI encoding; the signer must not alter it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub to: Address,
    pub data: Vec<u8>,
    pub value: U256,
    pub gas: Option<U256>,
    pub gas_price: Option<U256>,
    pub chain_id: u64,
}

/// Opaque failure from the caller's wallet backend. The orchestrator
/// normalizes the message into the typed taxonomy (user rejection, network,
/// revert) before recording it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct SignerError {
    pub message: String,
}

impl SignerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for SignerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// The account that signs and pays for transactions.
    async fn address(&self) -> Result<Address, SignerError>;

    /// The chain the signer is currently connected to.
    async fn chain_id(&self) -> Result<u64, SignerError>;

    /// Signs and broadcasts, returning the transaction hash.
    async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash, SignerError>;

    /// Optional wait primitive. Backends without inclusion tracking keep the
    /// default `Ok(None)` and the library polls the chain itself.
    async fn wait_for_receipt(
        &self,
        _tx_hash: TxHash,
    ) -> Result<Option<ReceiptSummary>, SignerError> {
        Ok(None)
    }
}
