//! Public client facade wiring the services together.
//!
//! A [`BridgeClient`] owns private instances of every cache and the
//! execution registry; two clients never share state. All progress is
//! observable through [`BridgeClient::subscribe`].

use alloy::primitives::{Address, TxHash, U256};
use tokio::sync::broadcast;

use crate::arrival::{Arrival, ArrivalDetector, ArrivalOptions};
use crate::balance::{BalanceQuery, BalanceService, BalanceValidation, BalancesReport, TokenBalance};
use crate::chains::{ChainCatalog, ChainsSnapshot};
use crate::config::{BridgeConfig, ConfigError};
use crate::deposit::{DEPOSIT_BRIDGE, DepositExecutor, DepositOptions, DepositReceipt};
use crate::error::BridgeError;
use crate::events::{BridgeEvent, EventBus};
use crate::l1::{InfoClient, L1Monitor, L1MonitorOptions, SoftTimeoutWarning, start_monitor};
use crate::lifi::{LIFI_API_BASE, LifiClient};
use crate::orchestrator::{ExecuteOptions, ExecutionResult, Orchestrator, OrchestratorTimings};
use crate::quote::{Quote, QuoteEngine, QuoteParams, classify_api_error};
use crate::registry::{ExecutionId, ExecutionRegistry, ExecutionStatusView};
use crate::rpc::RpcRegistry;
use crate::signer::TransactionSigner;
use crate::tokens::{HYPEREVM_USDC, TokenCatalog, TokensSnapshot};
use std::sync::Arc;

/// Relayed-transfer status as reported by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeTxStatus {
    NotFound,
    Pending,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct TransferStatus {
    pub status: BridgeTxStatus,
    pub substatus: Option<String>,
    /// User-facing progress message.
    pub message: Option<String>,
    pub receiving_tx_hash: Option<TxHash>,
    pub received_amount: Option<U256>,
}

#[derive(Debug)]
pub struct BridgeClient {
    config: BridgeConfig,
    chains: Arc<ChainCatalog>,
    tokens: Arc<TokenCatalog>,
    balances: BalanceService,
    quotes: QuoteEngine,
    arrival: Arc<ArrivalDetector>,
    deposit: Arc<DepositExecutor>,
    info: Arc<InfoClient>,
    registry: Arc<ExecutionRegistry>,
    events: EventBus,
    orchestrator: Orchestrator,
    lifi: Arc<LifiClient>,
}

impl BridgeClient {
    pub fn new(config: BridgeConfig) -> Result<Self, ConfigError> {
        Self::with_timings(config, OrchestratorTimings::default())
    }

    pub(crate) fn with_timings(
        config: BridgeConfig,
        timings: OrchestratorTimings,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let lifi = Arc::new(LifiClient::new(
            config
                .lifi_base_url
                .clone()
                .unwrap_or_else(|| LIFI_API_BASE.to_string()),
            config.integrator.clone(),
            config.api_key.clone(),
        ));
        let destination_chain_id = config.network.hyperevm_chain_id();

        let mut rpc_overrides = config.rpc_urls.clone();
        if let Some(url) = &config.hyperevm_rpc_url {
            rpc_overrides.insert(destination_chain_id, url.clone());
        }
        let rpc = Arc::new(RpcRegistry::new(config.network, rpc_overrides));
        let hyper_rpc = rpc.hyperevm();

        let chains = Arc::new(ChainCatalog::new(lifi.clone(), config.network));
        let tokens = Arc::new(TokenCatalog::new(lifi.clone(), destination_chain_id));
        let events = EventBus::new(config.event_capacity);
        let balances = BalanceService::new(lifi.clone(), rpc.clone(), tokens.clone());
        let quotes = QuoteEngine::new(
            lifi.clone(),
            chains.clone(),
            events.clone(),
            config.auto_deposit,
            config.default_slippage,
            destination_chain_id,
        );
        let arrival = Arc::new(ArrivalDetector::new(hyper_rpc.clone(), HYPEREVM_USDC));
        let deposit = Arc::new(DepositExecutor::new(
            hyper_rpc,
            destination_chain_id,
            HYPEREVM_USDC,
            DEPOSIT_BRIDGE,
        ));
        let info = Arc::new(InfoClient::new(
            config
                .info_url
                .clone()
                .unwrap_or_else(|| config.network.info_url().to_string()),
        ));
        let registry = Arc::new(ExecutionRegistry::new());
        let orchestrator = Orchestrator::new(
            lifi.clone(),
            rpc,
            registry.clone(),
            events.clone(),
            arrival.clone(),
            deposit.clone(),
            info.clone(),
            timings,
        );

        Ok(Self {
            config,
            chains,
            tokens,
            balances,
            quotes,
            arrival,
            deposit,
            info,
            registry,
            events,
            orchestrator,
            lifi,
        })
    }

    /// Subscribes to progress events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    pub async fn get_chains(&self) -> Result<ChainsSnapshot, BridgeError> {
        self.chains.get_chains().await
    }

    pub async fn get_tokens(&self, chain_id: u64) -> Result<TokensSnapshot, BridgeError> {
        self.tokens.get_tokens(chain_id).await
    }

    pub async fn get_bridgeable_tokens(
        &self,
        chain_id: u64,
    ) -> Result<TokensSnapshot, BridgeError> {
        self.tokens.get_bridgeable_tokens(chain_id).await
    }

    pub async fn get_balance(&self, query: BalanceQuery) -> Result<TokenBalance, BridgeError> {
        self.balances.get_balance(query).await
    }

    pub async fn get_balances(
        &self,
        wallet: Address,
        chains: &[u64],
        token_addresses: Option<&[Address]>,
    ) -> Result<BalancesReport, BridgeError> {
        self.balances
            .get_balances(wallet, chains, token_addresses)
            .await
    }

    pub async fn get_quote(&self, params: &QuoteParams) -> Result<Quote, BridgeError> {
        self.quotes.get_quote(params).await
    }

    pub async fn get_quotes(&self, params: &QuoteParams) -> Result<Vec<Quote>, BridgeError> {
        self.quotes.get_quotes(params).await
    }

    /// Reads one balance and compares it against a required amount.
    pub async fn check_balance(
        &self,
        query: BalanceQuery,
        required: U256,
    ) -> Result<crate::balance::BalanceCheck, BridgeError> {
        self.balances.check_balance(query, required).await
    }

    pub async fn validate_balance(
        &self,
        quote: &Quote,
        wallet: Address,
    ) -> Result<BalanceValidation, BridgeError> {
        self.balances.validate_balance(quote, wallet).await
    }

    /// Runs the execution pipeline for a quote. Never returns `Err`: the
    /// outcome (including failures) is in the [`ExecutionResult`].
    pub async fn execute(
        &self,
        quote: &Quote,
        signer: &dyn TransactionSigner,
        options: &ExecuteOptions,
    ) -> ExecutionResult {
        self.orchestrator.execute(quote, signer, options).await
    }

    /// Point-in-time projection of an execution, or `None` when unknown.
    pub fn execution_status(&self, execution_id: ExecutionId) -> Option<ExecutionStatusView> {
        self.registry.status(execution_id)
    }

    /// Queries the aggregator for the relay status of a sent transaction.
    pub async fn transfer_status(
        &self,
        tx_hash: TxHash,
        from_chain_id: u64,
        to_chain_id: u64,
    ) -> Result<TransferStatus, BridgeError> {
        let response = self
            .lifi
            .status(tx_hash, from_chain_id, to_chain_id)
            .await
            .map_err(|err| classify_api_error(err, from_chain_id, to_chain_id))?;
        let status = match response.status.as_deref() {
            Some("DONE") => BridgeTxStatus::Done,
            Some("FAILED") => BridgeTxStatus::Failed,
            Some("NOT_FOUND") | None => BridgeTxStatus::NotFound,
            Some(_) => BridgeTxStatus::Pending,
        };
        let message = response
            .substatus
            .as_deref()
            .map(|s| crate::orchestrator::substatus_message(s, response.substatus_message.as_deref()));
        Ok(TransferStatus {
            status,
            substatus: response.substatus,
            message,
            receiving_tx_hash: response
                .receiving
                .as_ref()
                .and_then(|r| r.tx_hash.as_deref())
                .and_then(|raw| raw.parse().ok()),
            received_amount: response
                .receiving
                .as_ref()
                .and_then(|r| r.amount.as_deref())
                .and_then(|raw| U256::from_str_radix(raw, 10).ok()),
        })
    }

    /// Current destination-chain USDC balance, for arrival snapshots.
    pub async fn snapshot_usdc_balance(&self, wallet: Address) -> Result<U256, BridgeError> {
        self.arrival.snapshot_balance(wallet).await
    }

    /// Waits for bridged funds to land on the destination chain.
    pub async fn detect_arrival(
        &self,
        wallet: Address,
        previous_balance: U256,
        options: &ArrivalOptions,
    ) -> Result<Arrival, BridgeError> {
        self.arrival
            .detect_arrival(wallet, previous_balance, options)
            .await
    }

    /// Deposits destination-chain USDC into the trading ledger.
    pub async fn execute_deposit(
        &self,
        signer: &dyn TransactionSigner,
        options: &DepositOptions,
    ) -> Result<DepositReceipt, BridgeError> {
        self.events.emit(BridgeEvent::DepositStarted {
            execution_id: None,
            amount: options.amount,
        });
        let receipt = self.deposit.execute_deposit(signer, options).await?;
        self.events.emit(BridgeEvent::DepositCompleted {
            execution_id: None,
            tx_hash: receipt.tx_hash,
            amount: receipt.amount,
        });
        Ok(receipt)
    }

    /// Deposits into another account's trading ledger balance.
    pub async fn execute_deposit_for(
        &self,
        signer: &dyn TransactionSigner,
        recipient: Address,
        options: &DepositOptions,
    ) -> Result<DepositReceipt, BridgeError> {
        self.events.emit(BridgeEvent::DepositStarted {
            execution_id: None,
            amount: options.amount,
        });
        let receipt = self
            .deposit
            .execute_deposit_for(signer, recipient, options)
            .await?;
        self.events.emit(BridgeEvent::DepositCompleted {
            execution_id: None,
            tx_hash: receipt.tx_hash,
            amount: receipt.amount,
        });
        Ok(receipt)
    }

    /// Starts a cancellable monitor that resolves when the trading ledger
    /// credits the deposit.
    pub fn wait_for_l1_confirmation(
        &self,
        wallet: Address,
        expected_amount: U256,
        hyper_evm_tx_hash: Option<TxHash>,
        options: L1MonitorOptions,
        on_soft_timeout: Option<SoftTimeoutWarning>,
    ) -> L1Monitor {
        start_monitor(
            self.info.clone(),
            wallet,
            expected_amount,
            hyper_evm_tx_hash,
            options,
            on_soft_timeout,
        )
    }

    /// Validates deposit preconditions without sending anything.
    pub async fn validate_deposit_requirements(
        &self,
        wallet: Address,
        amount: U256,
    ) -> Result<crate::deposit::DepositPreflight, BridgeError> {
        self.deposit
            .validate_deposit_requirements(wallet, amount)
            .await
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Clears every cache and the execution registry. Intended for tests
    /// and long-lived processes that switch accounts.
    pub fn reset(&self) {
        self.chains.clear();
        self.tokens.clear();
        self.balances.clear_cache();
        self.quotes.clear_cache();
        self.registry.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Network;
    use alloy::primitives::address;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> BridgeClient {
        let mut config = BridgeConfig::new("hyperflow-test");
        config.lifi_base_url = Some(server.base_url());
        config.info_url = Some(server.base_url());
        config.hyperevm_rpc_url = Some(server.base_url());
        config.rpc_urls.insert(1, server.base_url());
        BridgeClient::new(config).unwrap()
    }

    #[test]
    fn construction_requires_an_integrator() {
        let err = BridgeClient::new(BridgeConfig::new("")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingIntegrator));
    }

    #[test]
    fn network_selects_destination_endpoints() {
        let config = BridgeConfig::new("hyperflow-test").with_network(Network::Testnet);
        let client = BridgeClient::new(config).unwrap();
        assert_eq!(client.config().network.hyperevm_chain_id(), 998);
    }

    #[tokio::test]
    async fn transfer_status_maps_aggregator_fields() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/status");
            then.status(200).json_body(json!({
                "status": "DONE",
                "substatus": "COMPLETED",
                "receiving": {
                    "txHash": format!("0x{:064x}", 7u64),
                    "chainId": 999,
                    "amount": "999000000"
                }
            }));
        });

        let status = client(&server)
            .transfer_status(TxHash::with_last_byte(1), 1, 999)
            .await
            .unwrap();
        assert_eq!(status.status, BridgeTxStatus::Done);
        assert_eq!(status.received_amount, Some(U256::from(999_000_000u64)));
        assert_eq!(status.message.as_deref(), Some("Transfer completed"));
    }

    #[tokio::test]
    async fn pending_status_maps_to_pending() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/status");
            then.status(200).json_body(json!({
                "status": "PENDING",
                "substatus": "WAIT_SOURCE_CONFIRMATIONS"
            }));
        });

        let status = client(&server)
            .transfer_status(TxHash::with_last_byte(1), 1, 999)
            .await
            .unwrap();
        assert_eq!(status.status, BridgeTxStatus::Pending);
        assert_eq!(
            status.message.as_deref(),
            Some("Waiting for source chain confirmations")
        );
    }

    #[tokio::test]
    async fn standalone_deposit_emits_events() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).body_contains("70a08231");
            then.status(200).json_body(json!({
                "jsonrpc": "2.0", "id": 1,
                "result": format!("0x{:064x}", 10_000_000u64)
            }));
        });
        server.mock(|when, then| {
            when.method(POST).body_contains("dd62ed3e");
            then.status(200).json_body(json!({
                "jsonrpc": "2.0", "id": 1,
                "result": format!("0x{:064x}", u64::MAX)
            }));
        });
        server.mock(|when, then| {
            when.method(POST)
                .json_body_partial(r#"{"method":"eth_getBalance"}"#);
            then.status(200).json_body(json!({
                "jsonrpc": "2.0", "id": 1,
                "result": format!("0x{:x}", 10u128.pow(18))
            }));
        });

        let client = client(&server);
        let mut rx = client.subscribe();
        let signer = crate::test_utils::MockSigner::new(
            address!("0x1111111111111111111111111111111111111111"),
            999,
        );
        let receipt = client
            .execute_deposit(
                &signer,
                &DepositOptions::new(U256::from(5_000_000u64)),
            )
            .await
            .unwrap();
        assert!(receipt.approval_tx_hash.is_none());

        use crate::events::EventKind;
        assert_eq!(rx.try_recv().unwrap().kind(), EventKind::DepositStarted);
        assert_eq!(rx.try_recv().unwrap().kind(), EventKind::DepositCompleted);
    }

    #[test]
    fn reset_clears_registry_and_caches() {
        let server = MockServer::start();
        let client = client(&server);
        client.reset();
        assert!(client.registry.is_empty());
    }
}
