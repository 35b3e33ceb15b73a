//! On-chain deposit into the trading-ledger bridge contract.
//!
//! The flow mirrors any token-spending contract call: pre-flight balance,
//! gas and allowance checks in parallel, an approval when the allowance is
//! short, then the deposit call itself with receipt confirmation. The
//! deposit calldata is encoded manually against the bridge's known
//! selectors (4-byte selector plus 32-byte left-padded words).

use alloy::primitives::{Address, TxHash, U256, address};
use alloy::sol_types::SolCall;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::bindings::IERC20;
use crate::error::BridgeError;
use crate::rpc::{EvmRpc, RECEIPT_POLL_ATTEMPTS, RECEIPT_POLL_INTERVAL, await_receipt, word_to_u256};
use crate::signer::{TransactionRequest, TransactionSigner};

/// The trading-ledger deposit bridge on the destination chain.
pub const DEPOSIT_BRIDGE: Address = address!("0x6b9e773128f453f5c2c60935ee2de2cbc5390a24");

/// Deposits below 5 USDC are not credited by the ledger.
pub const MIN_DEPOSIT: U256 = U256::from_limbs([5_000_000, 0, 0, 0]);

/// `deposit(uint256,uint32)`
const DEPOSIT_SELECTOR: [u8; 4] = [0x2b, 0x2d, 0xfd, 0x2c];
/// `depositFor(address,uint256,uint32)`
const DEPOSIT_FOR_SELECTOR: [u8; 4] = [0x7a, 0x92, 0x53, 0x9e];

const APPROVAL_GAS_LIMIT: u64 = 60_000;
const DEPOSIT_GAS_LIMIT: u64 = 150_000;
/// 0.1 gwei, the destination chain's flat base fee.
const GAS_PRICE_WEI: u64 = 100_000_000;

/// Which ledger account the deposit lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DestinationDex {
    #[default]
    Perps,
    Spot,
}

impl DestinationDex {
    pub(crate) fn code(self) -> u32 {
        match self {
            Self::Perps => 0,
            Self::Spot => u32::MAX,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DepositOptions {
    pub amount: U256,
    pub destination: DestinationDex,
    /// Approve `U256::MAX` instead of the exact amount.
    pub infinite_approval: bool,
}

impl DepositOptions {
    pub fn new(amount: U256) -> Self {
        Self {
            amount,
            destination: DestinationDex::default(),
            infinite_approval: false,
        }
    }
}

/// Pre-flight snapshot of everything a deposit needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositPreflight {
    pub usdc_balance: U256,
    pub native_balance: U256,
    pub allowance: U256,
    pub estimated_gas_cost: U256,
    pub requires_approval: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositReceipt {
    pub tx_hash: TxHash,
    pub approval_tx_hash: Option<TxHash>,
    pub amount: U256,
    pub destination: DestinationDex,
}

fn pad_u256(value: U256) -> [u8; 32] {
    value.to_be_bytes::<32>()
}

fn pad_u32(value: u32) -> [u8; 32] {
    pad_u256(U256::from(value))
}

fn pad_address(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_slice());
    word
}

pub(crate) fn encode_deposit(amount: U256, destination: DestinationDex) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 64);
    data.extend_from_slice(&DEPOSIT_SELECTOR);
    data.extend_from_slice(&pad_u256(amount));
    data.extend_from_slice(&pad_u32(destination.code()));
    data
}

pub(crate) fn encode_deposit_for(
    recipient: Address,
    amount: U256,
    destination: DestinationDex,
) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 96);
    data.extend_from_slice(&DEPOSIT_FOR_SELECTOR);
    data.extend_from_slice(&pad_address(recipient));
    data.extend_from_slice(&pad_u256(amount));
    data.extend_from_slice(&pad_u32(destination.code()));
    data
}

/// Remaps generic transaction failures into the deposit-specific kind;
/// rejection and network classifications pass through.
fn as_deposit_error(err: BridgeError, tx_hash: Option<TxHash>) -> BridgeError {
    match err {
        BridgeError::TransactionFailed { reason, .. } => BridgeError::DepositTransactionFailed {
            reason,
            tx_hash,
        },
        other => other,
    }
}

#[derive(Debug)]
pub struct DepositExecutor {
    rpc: Arc<EvmRpc>,
    chain_id: u64,
    usdc: Address,
    bridge: Address,
}

impl DepositExecutor {
    pub(crate) fn new(rpc: Arc<EvmRpc>, chain_id: u64, usdc: Address, bridge: Address) -> Self {
        Self {
            rpc,
            chain_id,
            usdc,
            bridge,
        }
    }

    /// Checks the minimum, the USDC balance, the native gas balance and the
    /// current bridge allowance. The three reads run in parallel.
    pub async fn validate_deposit_requirements(
        &self,
        wallet: Address,
        amount: U256,
    ) -> Result<DepositPreflight, BridgeError> {
        if amount < MIN_DEPOSIT {
            return Err(BridgeError::MinimumDeposit {
                required: MIN_DEPOSIT,
                provided: amount,
            });
        }

        let balance_call = IERC20::balanceOfCall { account: wallet }.abi_encode();
        let allowance_call = IERC20::allowanceCall {
            owner: wallet,
            spender: self.bridge,
        }
        .abi_encode();

        let (usdc_balance, native_balance, allowance) = tokio::try_join!(
            async {
                self.rpc
                    .call(self.usdc, balance_call.clone())
                    .await
                    .map(|data| word_to_u256(&data))
            },
            self.rpc.get_balance(wallet),
            async {
                self.rpc
                    .call(self.usdc, allowance_call.clone())
                    .await
                    .map(|data| word_to_u256(&data))
            },
        )
        .map_err(|err| BridgeError::BalanceFetchFailed {
            message: err.to_string(),
        })?;

        let estimated_gas_cost =
            U256::from(APPROVAL_GAS_LIMIT + DEPOSIT_GAS_LIMIT) * U256::from(GAS_PRICE_WEI);

        if usdc_balance < amount {
            return Err(BridgeError::InsufficientBalance {
                symbol: "USDC".to_string(),
                required: amount,
                available: usdc_balance,
            });
        }
        if native_balance < estimated_gas_cost {
            return Err(BridgeError::InsufficientGas {
                chain_id: self.chain_id,
                required: estimated_gas_cost,
                available: native_balance,
            });
        }

        Ok(DepositPreflight {
            usdc_balance,
            native_balance,
            allowance,
            estimated_gas_cost,
            requires_approval: allowance < amount,
        })
    }

    /// Approves the bridge to spend `amount` USDC and waits for the receipt.
    pub async fn approve(
        &self,
        signer: &dyn TransactionSigner,
        amount: U256,
    ) -> Result<TxHash, BridgeError> {
        let data = IERC20::approveCall {
            spender: self.bridge,
            amount,
        }
        .abi_encode();
        let tx_hash = signer
            .send_transaction(TransactionRequest {
                to: self.usdc,
                data,
                value: U256::ZERO,
                gas: Some(U256::from(APPROVAL_GAS_LIMIT)),
                gas_price: None,
                chain_id: self.chain_id,
            })
            .await
            .map_err(|err| as_deposit_error(BridgeError::from_signer_failure(&err.message), None))?;

        let receipt = await_receipt(
            signer,
            &self.rpc,
            tx_hash,
            RECEIPT_POLL_INTERVAL,
            RECEIPT_POLL_ATTEMPTS,
        )
        .await
        .map_err(|err| as_deposit_error(err, Some(tx_hash)))?;
        if !receipt.status {
            return Err(BridgeError::DepositTransactionFailed {
                reason: "approval transaction reverted".to_string(),
                tx_hash: Some(tx_hash),
            });
        }
        Ok(tx_hash)
    }

    /// Deposits into the signer's own ledger account.
    #[instrument(skip(self, signer), fields(amount = %options.amount))]
    pub async fn execute_deposit(
        &self,
        signer: &dyn TransactionSigner,
        options: &DepositOptions,
    ) -> Result<DepositReceipt, BridgeError> {
        let data = encode_deposit(options.amount, options.destination);
        self.run_deposit(signer, options, data).await
    }

    /// Deposits into `recipient`'s ledger account.
    #[instrument(skip(self, signer), fields(amount = %options.amount, %recipient))]
    pub async fn execute_deposit_for(
        &self,
        signer: &dyn TransactionSigner,
        recipient: Address,
        options: &DepositOptions,
    ) -> Result<DepositReceipt, BridgeError> {
        let data = encode_deposit_for(recipient, options.amount, options.destination);
        self.run_deposit(signer, options, data).await
    }

    async fn run_deposit(
        &self,
        signer: &dyn TransactionSigner,
        options: &DepositOptions,
        data: Vec<u8>,
    ) -> Result<DepositReceipt, BridgeError> {
        let wallet = signer
            .address()
            .await
            .map_err(|err| BridgeError::from_signer_failure(&err.message))?;
        let preflight = self
            .validate_deposit_requirements(wallet, options.amount)
            .await?;

        let approval_tx_hash = if preflight.requires_approval {
            let approval_amount = if options.infinite_approval {
                U256::MAX
            } else {
                options.amount
            };
            Some(self.approve(signer, approval_amount).await?)
        } else {
            None
        };

        let tx_hash = signer
            .send_transaction(TransactionRequest {
                to: self.bridge,
                data,
                value: U256::ZERO,
                gas: Some(U256::from(DEPOSIT_GAS_LIMIT)),
                gas_price: None,
                chain_id: self.chain_id,
            })
            .await
            .map_err(|err| as_deposit_error(BridgeError::from_signer_failure(&err.message), None))?;

        let receipt = await_receipt(
            signer,
            &self.rpc,
            tx_hash,
            RECEIPT_POLL_INTERVAL,
            RECEIPT_POLL_ATTEMPTS,
        )
        .await
        .map_err(|err| as_deposit_error(err, Some(tx_hash)))?;
        if !receipt.status {
            return Err(BridgeError::DepositTransactionFailed {
                reason: "deposit transaction reverted".to_string(),
                tx_hash: Some(tx_hash),
            });
        }

        info!(%tx_hash, amount = %options.amount, "deposit confirmed");
        Ok(DepositReceipt {
            tx_hash,
            approval_tx_hash,
            amount: options.amount,
            destination: options.destination,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockSigner;
    use crate::tokens::HYPEREVM_USDC;
    use alloy::primitives::address;
    use httpmock::prelude::*;
    use serde_json::json;

    const WALLET: Address = address!("0x1111111111111111111111111111111111111111");

    fn executor(server: &MockServer) -> DepositExecutor {
        DepositExecutor::new(
            Arc::new(EvmRpc::new(server.base_url())),
            999,
            HYPEREVM_USDC,
            DEPOSIT_BRIDGE,
        )
    }

    fn word(value: u64) -> String {
        format!("0x{:064x}", value)
    }

    fn mock_call(server: &MockServer, selector_hex: &str, value: u64) {
        let result = word(value);
        server.mock(|when, then| {
            when.method(POST).body_contains(selector_hex);
            then.status(200)
                .json_body(json!({ "jsonrpc": "2.0", "id": 1, "result": result }));
        });
    }

    fn mock_native_balance(server: &MockServer, value: u128) {
        let result = format!("0x{value:x}");
        server.mock(|when, then| {
            when.method(POST)
                .json_body_partial(r#"{"method":"eth_getBalance"}"#);
            then.status(200)
                .json_body(json!({ "jsonrpc": "2.0", "id": 1, "result": result }));
        });
    }

    #[test]
    fn deposit_calldata_layout() {
        let data = encode_deposit(U256::from(5_000_000u64), DestinationDex::Perps);
        assert_eq!(&data[..4], &DEPOSIT_SELECTOR);
        assert_eq!(data.len(), 4 + 64);
        assert_eq!(word_to_u256(&data[4..36]), U256::from(5_000_000u64));
        assert_eq!(word_to_u256(&data[36..68]), U256::ZERO);

        let spot = encode_deposit(U256::from(5_000_000u64), DestinationDex::Spot);
        assert_eq!(word_to_u256(&spot[36..68]), U256::from(u32::MAX));
    }

    #[test]
    fn deposit_for_calldata_layout() {
        let data = encode_deposit_for(WALLET, U256::from(6_000_000u64), DestinationDex::Perps);
        assert_eq!(&data[..4], &DEPOSIT_FOR_SELECTOR);
        assert_eq!(data.len(), 4 + 96);
        // Address is left-padded into the first word.
        assert_eq!(&data[4..16], &[0u8; 12]);
        assert_eq!(&data[16..36], WALLET.as_slice());
        assert_eq!(word_to_u256(&data[36..68]), U256::from(6_000_000u64));
    }

    #[tokio::test]
    async fn amounts_below_minimum_are_rejected_without_io() {
        let server = MockServer::start();
        let err = executor(&server)
            .validate_deposit_requirements(WALLET, U256::from(1_000_000u64))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::MinimumDeposit { .. }));
    }

    #[tokio::test]
    async fn insufficient_usdc_is_reported_precisely() {
        let server = MockServer::start();
        mock_call(&server, "70a08231", 2_000_000); // balance
        mock_call(&server, "dd62ed3e", 0); // allowance
        mock_native_balance(&server, 10u128.pow(18));

        let err = executor(&server)
            .validate_deposit_requirements(WALLET, U256::from(5_000_000u64))
            .await
            .unwrap_err();
        match err {
            BridgeError::InsufficientBalance {
                required,
                available,
                ..
            } => {
                assert_eq!(required, U256::from(5_000_000u64));
                assert_eq!(available, U256::from(2_000_000u64));
            }
            other => panic!("expected insufficient balance, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn insufficient_gas_is_reported_precisely() {
        let server = MockServer::start();
        mock_call(&server, "70a08231", 10_000_000);
        mock_call(&server, "dd62ed3e", 0);
        mock_native_balance(&server, 1_000); // nowhere near 210000 * 0.1 gwei

        let err = executor(&server)
            .validate_deposit_requirements(WALLET, U256::from(5_000_000u64))
            .await
            .unwrap_err();
        match err {
            BridgeError::InsufficientGas { required, .. } => {
                assert_eq!(
                    required,
                    U256::from((APPROVAL_GAS_LIMIT + DEPOSIT_GAS_LIMIT) as u128 * GAS_PRICE_WEI as u128)
                );
            }
            other => panic!("expected insufficient gas, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deposit_approves_when_allowance_is_short() {
        let server = MockServer::start();
        mock_call(&server, "70a08231", 10_000_000);
        mock_call(&server, "dd62ed3e", 0);
        mock_native_balance(&server, 10u128.pow(18));

        let signer = MockSigner::new(WALLET, 999);
        let receipt = executor(&server)
            .execute_deposit(&signer, &DepositOptions::new(U256::from(5_000_000u64)))
            .await
            .unwrap();

        assert!(receipt.approval_tx_hash.is_some());
        let sent = signer.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].to, HYPEREVM_USDC);
        assert_eq!(&sent[0].data[..4], &[0x09, 0x5e, 0xa7, 0xb3]);
        assert_eq!(sent[1].to, DEPOSIT_BRIDGE);
        assert_eq!(&sent[1].data[..4], &DEPOSIT_SELECTOR);
    }

    #[tokio::test]
    async fn deposit_skips_approval_when_allowance_covers() {
        let server = MockServer::start();
        mock_call(&server, "70a08231", 10_000_000);
        mock_call(&server, "dd62ed3e", 100_000_000);
        mock_native_balance(&server, 10u128.pow(18));

        let signer = MockSigner::new(WALLET, 999);
        let receipt = executor(&server)
            .execute_deposit(&signer, &DepositOptions::new(U256::from(5_000_000u64)))
            .await
            .unwrap();

        assert!(receipt.approval_tx_hash.is_none());
        assert_eq!(signer.sent().len(), 1);
    }

    #[tokio::test]
    async fn infinite_approval_uses_max_uint() {
        let server = MockServer::start();
        mock_call(&server, "70a08231", 10_000_000);
        mock_call(&server, "dd62ed3e", 0);
        mock_native_balance(&server, 10u128.pow(18));

        let signer = MockSigner::new(WALLET, 999);
        let mut options = DepositOptions::new(U256::from(5_000_000u64));
        options.infinite_approval = true;
        executor(&server)
            .execute_deposit(&signer, &options)
            .await
            .unwrap();

        let approval = &signer.sent()[0];
        assert_eq!(word_to_u256(&approval.data[36..68]), U256::MAX);
    }

    #[tokio::test]
    async fn reverted_deposit_is_a_deposit_failure() {
        let server = MockServer::start();
        mock_call(&server, "70a08231", 10_000_000);
        mock_call(&server, "dd62ed3e", 100_000_000);
        mock_native_balance(&server, 10u128.pow(18));

        let signer = MockSigner::new(WALLET, 999).with_reverted_receipts();
        let err = executor(&server)
            .execute_deposit(&signer, &DepositOptions::new(U256::from(5_000_000u64)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::DepositTransactionFailed { tx_hash: Some(_), .. }
        ));
    }

    #[tokio::test]
    async fn wallet_rejection_surfaces_as_user_rejected() {
        let server = MockServer::start();
        mock_call(&server, "70a08231", 10_000_000);
        mock_call(&server, "dd62ed3e", 100_000_000);
        mock_native_balance(&server, 10u128.pow(18));

        let signer =
            MockSigner::new(WALLET, 999).failing("User denied transaction signature");
        let err = executor(&server)
            .execute_deposit(&signer, &DepositOptions::new(U256::from(5_000_000u64)))
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::UserRejected);
    }

    #[tokio::test]
    async fn deposit_for_targets_the_recipient() {
        let server = MockServer::start();
        mock_call(&server, "70a08231", 10_000_000);
        mock_call(&server, "dd62ed3e", 100_000_000);
        mock_native_balance(&server, 10u128.pow(18));

        let recipient = address!("0x2222222222222222222222222222222222222222");
        let signer = MockSigner::new(WALLET, 999);
        executor(&server)
            .execute_deposit_for(&signer, recipient, &DepositOptions::new(U256::from(5_000_000u64)))
            .await
            .unwrap();

        let sent = signer.sent();
        assert_eq!(&sent[0].data[..4], &DEPOSIT_FOR_SELECTOR);
        assert_eq!(&sent[0].data[16..36], recipient.as_slice());
    }
}
