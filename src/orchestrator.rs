//! Execution orchestrator: drives a validated quote end to end.
//!
//! The pipeline is a straight-line async function per execution: validate,
//! open a registry entry, then for every route step fetch fresh transaction
//! details, clear the allowance gate, submit, and poll the aggregator until
//! the step lands. When the quote carries the auto-deposit leg the
//! orchestrator continues through arrival detection, the trading-ledger
//! deposit, and (optionally) L1 confirmation.
//!
//! Errors never escape as `Err`: the funnel marks the failing step, records
//! the error in the registry, emits `ExecutionFailed`, and returns a failed
//! [`ExecutionResult`] so callers always get an execution id to query.

use alloy::primitives::{Address, TxHash, U256};
use alloy::sol_types::SolCall;
use chrono::Utc;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::arrival::{ArrivalDetector, ArrivalOptions};
use crate::bindings::IERC20;
use crate::deposit::{DepositExecutor, DepositOptions};
use crate::error::BridgeError;
use crate::events::{BridgeEvent, EventBus, TxPurpose};
use crate::l1::{InfoClient, L1MonitorOptions, start_monitor};
use crate::lifi::types::LifiStatusResponse;
use crate::lifi::{LifiClient, QUOTE_TIMEOUT, QuoteRequest};
use crate::quote::{
    Quote, Step, StepKind, classify_api_error, format_slippage, map_transaction_request,
    parse_amount,
};
use crate::registry::{
    ExecutionId, ExecutionRegistry, ExecutionStatus, NewExecution, StepState, StepStatus,
};
use crate::rpc::{RpcRegistry, word_to_u256};
use crate::signer::{TransactionRequest, TransactionSigner};

/// User-facing phase of an execution; recorded as the registry substatus
/// and carried on `StatusChanged` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    Pending,
    Approving,
    Approved,
    Executing,
    Bridging,
    Depositing,
    Completed,
    Failed,
}

impl Display for ExecutionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approving => "approving",
            Self::Approved => "approved",
            Self::Executing => "executing",
            Self::Bridging => "bridging",
            Self::Depositing => "depositing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Approve `U256::MAX` instead of exact amounts.
    pub infinite_approval: bool,
    /// Skip the deposit continuation even when the quote includes it.
    pub disable_auto_deposit: bool,
    /// Block until the trading ledger credits the deposit.
    pub wait_for_l1: bool,
}

/// Polling cadences and caps. Defaults are the production values; tests
/// compress them.
#[derive(Debug, Clone)]
pub struct OrchestratorTimings {
    /// Wait after an approval submission when the signer cannot report
    /// inclusion itself.
    pub approval_wait: Duration,
    pub status_poll_interval: Duration,
    /// Wall-clock cap for one step to reach `DONE`.
    pub step_timeout: Duration,
    pub arrival_poll_interval: Duration,
    pub arrival_timeout: Duration,
    pub l1: L1MonitorOptions,
}

impl Default for OrchestratorTimings {
    fn default() -> Self {
        Self {
            approval_wait: Duration::from_secs(3),
            status_poll_interval: Duration::from_secs(5),
            step_timeout: Duration::from_secs(10 * 60),
            arrival_poll_interval: Duration::from_secs(5),
            arrival_timeout: Duration::from_secs(5 * 60),
            l1: L1MonitorOptions::default(),
        }
    }
}

/// Final outcome of one `execute` call.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    pub steps: Vec<StepStatus>,
    pub tx_hash: Option<TxHash>,
    pub from_amount: U256,
    pub to_amount: U256,
    pub received_amount: Option<U256>,
    pub deposit_tx_hash: Option<TxHash>,
    pub error: Option<BridgeError>,
}

struct StepOutcome {
    tx_hash: TxHash,
    received_amount: Option<U256>,
}

struct PipelineOutcome {
    tx_hash: Option<TxHash>,
    received_amount: Option<U256>,
    deposit_tx_hash: Option<TxHash>,
}

/// Maps an aggregator relay substatus to a user-facing message.
pub(crate) fn substatus_message(substatus: &str, fallback: Option<&str>) -> String {
    match substatus {
        "WAIT_SOURCE_CONFIRMATIONS" => "Waiting for source chain confirmations",
        "WAIT_DESTINATION_TRANSACTION" => "Waiting for the destination transaction",
        "BRIDGE_NOT_AVAILABLE" => "Bridge temporarily unavailable",
        "CHAIN_SWITCH_REQUIRED" => "Chain switch required in the wallet",
        "NOT_PROCESSABLE_REFUND_NEEDED" => "Transfer cannot complete, refund required",
        "REFUND_IN_PROGRESS" => "Refund in progress",
        "PARTIAL" => "Transfer partially completed",
        "REFUNDED" => "Transfer refunded",
        "COMPLETED" => "Transfer completed",
        other => return fallback.unwrap_or(other).to_string(),
    }
    .to_string()
}

/// `round((step_index + step_progress) / total * 100)` clamped to 100.
fn progress_value(step_index: usize, total_steps: usize, step_progress: f64) -> u8 {
    if total_steps == 0 {
        return 0;
    }
    let pct = (step_index as f64 + step_progress) / total_steps as f64 * 100.0;
    pct.round().clamp(0.0, 100.0) as u8
}

fn validate_quote(quote: &Quote) -> Result<(), BridgeError> {
    if quote.steps.is_empty() {
        return Err(BridgeError::InvalidQuote {
            reason: "quote has no steps".to_string(),
        });
    }
    if quote.from_amount == U256::ZERO {
        return Err(BridgeError::InvalidQuote {
            reason: "quote amount is zero".to_string(),
        });
    }
    for pair in quote.steps.windows(2) {
        if pair[0].to_chain_id != pair[1].from_chain_id {
            return Err(BridgeError::InvalidQuote {
                reason: format!(
                    "steps break bridge continuity: {} -> {}",
                    pair[0].to_chain_id, pair[1].from_chain_id
                ),
            });
        }
    }
    if quote.expires_at <= Utc::now() {
        return Err(BridgeError::QuoteExpired);
    }
    Ok(())
}

#[derive(Debug)]
pub(crate) struct Orchestrator {
    lifi: Arc<LifiClient>,
    rpc: Arc<RpcRegistry>,
    registry: Arc<ExecutionRegistry>,
    events: EventBus,
    arrival: Arc<ArrivalDetector>,
    deposit: Arc<DepositExecutor>,
    info: Arc<InfoClient>,
    timings: OrchestratorTimings,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        lifi: Arc<LifiClient>,
        rpc: Arc<RpcRegistry>,
        registry: Arc<ExecutionRegistry>,
        events: EventBus,
        arrival: Arc<ArrivalDetector>,
        deposit: Arc<DepositExecutor>,
        info: Arc<InfoClient>,
        timings: OrchestratorTimings,
    ) -> Self {
        Self {
            lifi,
            rpc,
            registry,
            events,
            arrival,
            deposit,
            info,
            timings,
        }
    }

    /// Runs the full pipeline for one quote. Always returns an
    /// [`ExecutionResult`]; inspect `status` and `error` for the outcome.
    #[instrument(skip_all, fields(quote_id = %quote.id))]
    pub(crate) async fn execute(
        &self,
        quote: &Quote,
        signer: &dyn TransactionSigner,
        options: &ExecuteOptions,
    ) -> ExecutionResult {
        let execution_id = ExecutionId::new();

        // Fail fast on a malformed or expired quote without opening a
        // registry entry.
        if let Err(err) = validate_quote(quote) {
            return ExecutionResult {
                execution_id,
                status: ExecutionStatus::Failed,
                steps: Vec::new(),
                tx_hash: None,
                from_amount: quote.from_amount,
                to_amount: quote.to_amount,
                received_amount: None,
                deposit_tx_hash: None,
                error: Some(err),
            };
        }

        self.registry.create(NewExecution {
            execution_id,
            quote_id: quote.id.clone(),
            steps: quote
                .steps
                .iter()
                .map(|step| (step.id.clone(), step.kind))
                .collect(),
            from_amount: quote.from_amount,
            to_amount: Some(quote.to_amount),
            from_chain_id: quote.from_token.chain_id,
            to_chain_id: quote.to_token.chain_id,
            estimated_secs: quote.estimated_secs,
        });
        self.events.emit(BridgeEvent::ExecutionStarted {
            execution_id,
            quote_id: quote.id.clone(),
            total_steps: quote.steps.len(),
        });

        match self.run_pipeline(execution_id, quote, signer, options).await {
            Ok(outcome) => {
                self.set_phase(execution_id, ExecutionPhase::Completed);
                self.registry.update(execution_id, |state| {
                    state.status = ExecutionStatus::Completed;
                    state.progress = 100;
                    if outcome.received_amount.is_some() {
                        state.received_amount = outcome.received_amount;
                    }
                });
                self.events.emit(BridgeEvent::ExecutionCompleted {
                    execution_id,
                    tx_hash: outcome.tx_hash,
                    received_amount: outcome.received_amount,
                });
                info!(%execution_id, "execution completed");
                self.build_result(
                    execution_id,
                    quote,
                    ExecutionStatus::Completed,
                    outcome.tx_hash,
                    outcome.received_amount,
                    outcome.deposit_tx_hash,
                    None,
                )
            }
            Err(err) => {
                warn!(%execution_id, %err, "execution failed");
                let message = err.to_string();
                self.registry.update(execution_id, |state| {
                    let failed_index = state.current_step_index.min(
                        state.total_steps.saturating_sub(1),
                    );
                    for step in &mut state.steps {
                        if !matches!(step.state, StepState::Completed) {
                            step.state = StepState::Failed;
                        }
                    }
                    if let Some(step) = state.steps.get_mut(failed_index) {
                        step.error = Some(message.clone());
                    }
                    state.status = ExecutionStatus::Failed;
                    state.substatus = ExecutionPhase::Failed.to_string();
                    state.failed_step_index = Some(failed_index);
                    state.error = Some(message);
                });
                self.events.emit(BridgeEvent::ExecutionFailed {
                    execution_id,
                    error: err.clone(),
                });
                let tx_hash = self
                    .registry
                    .status(execution_id)
                    .and_then(|view| view.tx_hash);
                self.build_result(
                    execution_id,
                    quote,
                    ExecutionStatus::Failed,
                    tx_hash,
                    None,
                    None,
                    Some(err),
                )
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_result(
        &self,
        execution_id: ExecutionId,
        quote: &Quote,
        status: ExecutionStatus,
        tx_hash: Option<TxHash>,
        received_amount: Option<U256>,
        deposit_tx_hash: Option<TxHash>,
        error: Option<BridgeError>,
    ) -> ExecutionResult {
        let steps = self
            .registry
            .status(execution_id)
            .map(|view| view.steps)
            .unwrap_or_default();
        ExecutionResult {
            execution_id,
            status,
            steps,
            tx_hash,
            from_amount: quote.from_amount,
            to_amount: quote.to_amount,
            received_amount,
            deposit_tx_hash,
            error,
        }
    }

    async fn run_pipeline(
        &self,
        execution_id: ExecutionId,
        quote: &Quote,
        signer: &dyn TransactionSigner,
        options: &ExecuteOptions,
    ) -> Result<PipelineOutcome, BridgeError> {
        let wallet = signer
            .address()
            .await
            .map_err(|err| BridgeError::from_signer_failure(&err.message))?;

        let auto_deposit = quote.includes_auto_deposit && !options.disable_auto_deposit;
        let snapshot = if auto_deposit {
            Some(self.arrival.snapshot_balance(wallet).await?)
        } else {
            None
        };

        let total_steps = quote.steps.len();
        let mut last_tx_hash = None;
        let mut received_amount = None;

        for (index, step) in quote.steps.iter().enumerate() {
            // Deposit-type steps belong to the deposit phase below.
            if step.kind == StepKind::Deposit {
                continue;
            }

            self.registry.update(execution_id, |state| {
                state.status = ExecutionStatus::InProgress;
                state.current_step_index = index;
            });
            self.set_step_state(execution_id, step, index, StepState::Active);
            self.set_progress(execution_id, index, total_steps, 0.5);

            let outcome = self
                .run_step(execution_id, step, quote.slippage, wallet, signer, options)
                .await?;

            last_tx_hash = Some(outcome.tx_hash);
            if outcome.received_amount.is_some() {
                received_amount = outcome.received_amount;
            }
            self.registry.update(execution_id, |state| {
                if outcome.received_amount.is_some() {
                    state.received_amount = outcome.received_amount;
                }
            });
            self.set_step_state(execution_id, step, index, StepState::Completed);
            self.set_progress(execution_id, index, total_steps, 1.0);
        }

        let mut deposit_tx_hash = None;
        if auto_deposit {
            self.set_phase(execution_id, ExecutionPhase::Depositing);
            let arrival = self
                .arrival
                .detect_arrival(
                    wallet,
                    snapshot.unwrap_or_default(),
                    &ArrivalOptions {
                        expected_amount: Some(quote.to_amount),
                        poll_interval: self.timings.arrival_poll_interval,
                        timeout: self.timings.arrival_timeout,
                    },
                )
                .await?;
            self.events.emit(BridgeEvent::DepositStarted {
                execution_id: Some(execution_id),
                amount: arrival.amount,
            });

            let mut deposit_options = DepositOptions::new(arrival.amount);
            deposit_options.infinite_approval = options.infinite_approval;
            let receipt = self
                .deposit
                .execute_deposit(signer, &deposit_options)
                .await?;
            deposit_tx_hash = Some(receipt.tx_hash);
            received_amount = Some(arrival.amount);
            self.registry.update(execution_id, |state| {
                state.received_amount = Some(arrival.amount);
            });
            self.events.emit(BridgeEvent::DepositCompleted {
                execution_id: Some(execution_id),
                tx_hash: receipt.tx_hash,
                amount: receipt.amount,
            });

            if options.wait_for_l1 {
                let monitor = start_monitor(
                    self.info.clone(),
                    wallet,
                    arrival.amount,
                    Some(receipt.tx_hash),
                    self.timings.l1.clone(),
                    None,
                );
                monitor.wait().await?;
            }
        }

        Ok(PipelineOutcome {
            tx_hash: last_tx_hash,
            received_amount,
            deposit_tx_hash,
        })
    }

    async fn run_step(
        &self,
        execution_id: ExecutionId,
        step: &Step,
        slippage: f64,
        wallet: Address,
        signer: &dyn TransactionSigner,
        options: &ExecuteOptions,
    ) -> Result<StepOutcome, BridgeError> {
        // Fresh transaction details for this leg, including the approval
        // address when the step spends an ERC-20.
        let leg = self
            .lifi
            .quote(
                &QuoteRequest {
                    from_chain: step.from_chain_id,
                    to_chain: step.to_chain_id,
                    from_token: format!("{:#x}", step.from_token.address),
                    to_token: format!("{:#x}", step.to_token.address),
                    from_amount: step.from_amount.to_string(),
                    from_address: format!("{wallet:#x}"),
                    to_address: None,
                    slippage_pct: format_slippage(slippage),
                    order: None,
                },
                QUOTE_TIMEOUT,
            )
            .await
            .map_err(|err| classify_api_error(err, step.from_chain_id, step.to_chain_id))?;

        let tx_wire = leg
            .transaction_request
            .as_ref()
            .ok_or_else(|| BridgeError::InvalidQuote {
                reason: "aggregator returned no transaction request for the step".to_string(),
            })?;
        let tx = map_transaction_request(tx_wire, step.from_chain_id)?;

        if !step.from_token.is_native() {
            let spender = leg
                .estimate
                .as_ref()
                .and_then(|estimate| estimate.approval_address.as_deref())
                .and_then(|raw| Address::from_str(raw).ok())
                .unwrap_or(tx.to);
            self.ensure_allowance(execution_id, step, wallet, spender, signer, options)
                .await?;
        }

        self.set_phase(execution_id, ExecutionPhase::Executing);
        let tx_hash = signer
            .send_transaction(tx)
            .await
            .map_err(|err| BridgeError::from_signer_failure(&err.message))?;
        self.events.emit(BridgeEvent::TransactionSent {
            execution_id,
            tx_hash,
            purpose: TxPurpose::Bridge,
        });
        self.registry.update(execution_id, |state| {
            state.tx_hash = Some(tx_hash);
        });
        self.registry
            .update_step(execution_id, &step.id, |entry| entry.tx_hash = Some(tx_hash));

        self.set_phase(execution_id, ExecutionPhase::Bridging);
        let received_amount = self
            .poll_step_completion(execution_id, step, tx_hash)
            .await?;
        self.events.emit(BridgeEvent::TransactionConfirmed {
            execution_id,
            tx_hash,
            purpose: TxPurpose::Bridge,
        });

        Ok(StepOutcome {
            tx_hash,
            received_amount,
        })
    }

    async fn ensure_allowance(
        &self,
        execution_id: ExecutionId,
        step: &Step,
        wallet: Address,
        spender: Address,
        signer: &dyn TransactionSigner,
        options: &ExecuteOptions,
    ) -> Result<(), BridgeError> {
        let rpc = self.rpc.endpoint(step.from_chain_id)?;
        let allowance_call = IERC20::allowanceCall {
            owner: wallet,
            spender,
        }
        .abi_encode();
        let allowance = rpc
            .call(step.from_token.address, allowance_call)
            .await
            .map(|data| word_to_u256(&data))
            .map_err(|err| BridgeError::network(err.to_string()))?;
        if allowance >= step.from_amount {
            return Ok(());
        }

        self.set_phase(execution_id, ExecutionPhase::Approving);
        self.events.emit(BridgeEvent::ApprovalRequired {
            execution_id,
            token: step.from_token.address,
            spender,
            amount: step.from_amount,
        });

        let amount = if options.infinite_approval {
            U256::MAX
        } else {
            step.from_amount
        };
        let approval_data = IERC20::approveCall { spender, amount }.abi_encode();
        let approval_hash = signer
            .send_transaction(TransactionRequest {
                to: step.from_token.address,
                data: approval_data,
                value: U256::ZERO,
                gas: None,
                gas_price: None,
                chain_id: step.from_chain_id,
            })
            .await
            .map_err(|err| BridgeError::from_signer_failure(&err.message))?;
        self.events.emit(BridgeEvent::TransactionSent {
            execution_id,
            tx_hash: approval_hash,
            purpose: TxPurpose::Approval,
        });

        match signer.wait_for_receipt(approval_hash).await {
            Ok(Some(receipt)) if !receipt.status => {
                return Err(BridgeError::TransactionFailed {
                    reason: "approval transaction reverted".to_string(),
                    tx_hash: Some(approval_hash),
                });
            }
            Ok(Some(_)) => {}
            // No wait primitive: give the approval a moment to mine.
            Ok(None) => tokio::time::sleep(self.timings.approval_wait).await,
            Err(err) => return Err(BridgeError::from_signer_failure(&err.message)),
        }

        self.events.emit(BridgeEvent::TransactionConfirmed {
            execution_id,
            tx_hash: approval_hash,
            purpose: TxPurpose::Approval,
        });
        self.registry.update(execution_id, |state| {
            state.substatus = ExecutionPhase::Approved.to_string();
        });
        Ok(())
    }

    /// Polls the aggregator status endpoint until the step completes.
    /// Transient errors are retried silently at the same cadence.
    async fn poll_step_completion(
        &self,
        execution_id: ExecutionId,
        step: &Step,
        tx_hash: TxHash,
    ) -> Result<Option<U256>, BridgeError> {
        let started = Instant::now();
        loop {
            if started.elapsed() > self.timings.step_timeout {
                return Err(BridgeError::TransactionFailed {
                    reason: "timeout waiting for bridge completion".to_string(),
                    tx_hash: Some(tx_hash),
                });
            }

            match self
                .lifi
                .status(tx_hash, step.from_chain_id, step.to_chain_id)
                .await
            {
                Ok(status) => {
                    self.record_status(execution_id, &status);
                    match status.status.as_deref() {
                        Some("DONE") => {
                            return Ok(status
                                .receiving
                                .as_ref()
                                .and_then(|receiving| receiving.amount.as_deref())
                                .and_then(parse_amount));
                        }
                        Some("FAILED") => {
                            return Err(BridgeError::TransactionFailed {
                                reason: status
                                    .substatus
                                    .unwrap_or_else(|| "bridge reported failure".to_string()),
                                tx_hash: Some(tx_hash),
                            });
                        }
                        _ => {}
                    }
                }
                Err(err) => debug!(%err, "transient status error, retrying"),
            }

            tokio::time::sleep(self.timings.status_poll_interval).await;
        }
    }

    fn record_status(&self, execution_id: ExecutionId, status: &LifiStatusResponse) {
        if let Some(receiving) = &status.receiving
            && let Some(hash) = receiving
                .tx_hash
                .as_deref()
                .and_then(|raw| raw.parse::<TxHash>().ok())
        {
            self.registry.update(execution_id, |state| {
                state.receiving_tx_hash = Some(hash);
            });
        }
        if let Some(substatus) = status.substatus.as_deref() {
            let message = substatus_message(substatus, status.substatus_message.as_deref());
            self.registry.update(execution_id, |state| {
                state.substatus = message;
            });
        }
    }

    fn set_phase(&self, execution_id: ExecutionId, phase: ExecutionPhase) {
        self.registry.update(execution_id, |state| {
            state.substatus = phase.to_string();
        });
        self.events.emit(BridgeEvent::StatusChanged {
            execution_id,
            phase,
        });
    }

    fn set_step_state(
        &self,
        execution_id: ExecutionId,
        step: &Step,
        step_index: usize,
        state: StepState,
    ) {
        self.registry
            .update_step(execution_id, &step.id, |entry| entry.state = state);
        self.events.emit(BridgeEvent::StepChanged {
            execution_id,
            step_id: step.id.clone(),
            step_index,
            state,
        });
    }

    fn set_progress(
        &self,
        execution_id: ExecutionId,
        step_index: usize,
        total_steps: usize,
        step_progress: f64,
    ) {
        let progress = progress_value(step_index, total_steps, step_progress);
        self.registry.update(execution_id, |state| {
            state.progress = progress;
        });
    }
}
