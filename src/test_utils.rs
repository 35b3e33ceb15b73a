//! Shared test doubles.

use alloy::primitives::{Address, B256, TxHash, U256};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::rpc::ReceiptSummary;
use crate::signer::{SignerError, TransactionRequest, TransactionSigner};

/// Signer that records every transaction and returns deterministic hashes.
///
/// By default it also answers `wait_for_receipt` with a successful receipt
/// so pipelines do not fall back to RPC polling; tests opt into reverted
/// receipts or missing receipt support explicitly.
pub(crate) struct MockSigner {
    address: Address,
    chain_id: u64,
    sent: Mutex<Vec<TransactionRequest>>,
    counter: AtomicU64,
    fail_message: Option<String>,
    receipt_status: bool,
    provide_receipts: bool,
}

impl MockSigner {
    pub(crate) fn new(address: Address, chain_id: u64) -> Self {
        Self {
            address,
            chain_id,
            sent: Mutex::new(Vec::new()),
            counter: AtomicU64::new(0),
            fail_message: None,
            receipt_status: true,
            provide_receipts: true,
        }
    }

    /// Every `send_transaction` fails with this wallet error message.
    pub(crate) fn failing(mut self, message: impl Into<String>) -> Self {
        self.fail_message = Some(message.into());
        self
    }

    /// Receipts report revert status.
    pub(crate) fn with_reverted_receipts(mut self) -> Self {
        self.receipt_status = false;
        self
    }

    /// No receipt support; callers must poll the chain.
    pub(crate) fn without_receipts(mut self) -> Self {
        self.provide_receipts = false;
        self
    }

    /// Every transaction sent so far, in order.
    pub(crate) fn sent(&self) -> Vec<TransactionRequest> {
        self.sent.lock().unwrap().clone()
    }

    fn next_hash(&self) -> TxHash {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        B256::with_last_byte(n as u8)
    }
}

#[async_trait]
impl TransactionSigner for MockSigner {
    async fn address(&self) -> Result<Address, SignerError> {
        Ok(self.address)
    }

    async fn chain_id(&self) -> Result<u64, SignerError> {
        Ok(self.chain_id)
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash, SignerError> {
        if let Some(message) = &self.fail_message {
            return Err(SignerError::new(message.clone()));
        }
        self.sent.lock().unwrap().push(tx);
        Ok(self.next_hash())
    }

    async fn wait_for_receipt(
        &self,
        _tx_hash: TxHash,
    ) -> Result<Option<ReceiptSummary>, SignerError> {
        if !self.provide_receipts {
            return Ok(None);
        }
        Ok(Some(ReceiptSummary {
            status: self.receipt_status,
            block_number: Some(1),
            gas_used: U256::from(21_000u64),
        }))
    }
}
