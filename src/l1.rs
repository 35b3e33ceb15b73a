//! Off-chain confirmation that a deposit was credited to the trading ledger.
//!
//! The ledger is observed through its public info endpoint: the monitor
//! polls the account value, converts the human-decimal string into
//! smallest-unit USDC, and confirms once the value has grown by the
//! expected amount minus the fee tolerance. A soft timeout raises a single
//! warning and keeps going; only the hard cap (or an explicit cancel)
//! stops the monitor. Balance decreases are expected while the account is
//! actively trading and are only logged.

use alloy::primitives::{Address, TxHash, U256};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::arrival::tolerance_threshold;
use crate::error::{BridgeError, CancelReason};

const INFO_TIMEOUT: Duration = Duration::from_secs(10);

/// The ledger reports USDC with six decimals.
const LEDGER_DECIMALS: usize = 6;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_SOFT_TIMEOUT: Duration = Duration::from_secs(2 * 60);
const DEFAULT_MAX_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Deserialize)]
struct ClearinghouseState {
    #[serde(rename = "marginSummary")]
    margin_summary: Option<MarginSummary>,
}

#[derive(Debug, Deserialize)]
struct MarginSummary {
    #[serde(rename = "accountValue")]
    account_value: String,
}

/// Client for the trading-ledger info endpoint.
#[derive(Debug)]
pub(crate) struct InfoClient {
    http: reqwest::Client,
    url: String,
}

impl InfoClient {
    pub(crate) fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }

    /// Reads the account value in smallest-unit USDC.
    pub(crate) async fn clearinghouse_value(&self, user: Address) -> Result<U256, BridgeError> {
        let body = json!({ "type": "clearinghouseState", "user": format!("{user:#x}") });
        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .timeout(INFO_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::network(format!(
                "info endpoint returned {status}"
            )));
        }
        let state: ClearinghouseState = response
            .json()
            .await
            .map_err(|err| BridgeError::network(format!("malformed info response: {err}")))?;
        let raw = state
            .margin_summary
            .map(|summary| summary.account_value)
            .unwrap_or_else(|| "0".to_string());
        parse_account_value(&raw)
    }
}

/// Converts a human-decimal account value ("1234.56") into smallest units:
/// the fractional part is padded or truncated to six digits and the result
/// parsed as one big integer.
pub(crate) fn parse_account_value(raw: &str) -> Result<U256, BridgeError> {
    let (integral, fractional) = match raw.split_once('.') {
        Some((i, f)) => (i, f),
        None => (raw, ""),
    };
    let integral = if integral.is_empty() { "0" } else { integral };
    if !integral.bytes().all(|b| b.is_ascii_digit())
        || !fractional.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(BridgeError::network(format!(
            "unparseable account value: {raw}"
        )));
    }
    let mut fractional = fractional.to_string();
    fractional.truncate(LEDGER_DECIMALS);
    while fractional.len() < LEDGER_DECIMALS {
        fractional.push('0');
    }
    let combined = format!("{integral}{fractional}");
    U256::from_str_radix(&combined, 10).map_err(|err| {
        BridgeError::network(format!("unparseable account value {raw}: {err}"))
    })
}

#[derive(Debug, Clone)]
pub struct L1MonitorOptions {
    pub poll_interval: Duration,
    /// Warns once when exceeded; monitoring continues.
    pub soft_timeout: Duration,
    /// Rejects with `L1MonitorCancelled(max_timeout)` when exceeded.
    pub max_timeout: Duration,
}

impl Default for L1MonitorOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            soft_timeout: DEFAULT_SOFT_TIMEOUT,
            max_timeout: DEFAULT_MAX_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L1MonitorState {
    Monitoring,
    Completed,
    Cancelled,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct L1MonitorProgress {
    pub state: L1MonitorState,
    /// True while the monitor task is alive.
    pub checking: bool,
    pub elapsed: Duration,
    pub last_balance: Option<U256>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L1Confirmation {
    /// Credited delta in smallest-unit USDC.
    pub amount: U256,
    pub final_balance: U256,
    pub hyper_evm_tx_hash: Option<TxHash>,
    pub confirmation_secs: u64,
    pub confirmed_at: DateTime<Utc>,
}

/// Callback fired when the soft timeout elapses.
pub type SoftTimeoutWarning = Box<dyn Fn(Duration) + Send + Sync>;

struct MonitorShared {
    started: Instant,
    cancel: Notify,
    cancelled: AtomicBool,
    soft_deadline: Mutex<Instant>,
    /// Armed at start and re-armed by `extend_timeout`; cleared when the
    /// warning fires so it fires at most once per activation.
    warn_armed: AtomicBool,
    state: Mutex<L1MonitorState>,
    last_balance: Mutex<Option<U256>>,
}

impl MonitorShared {
    fn set_state(&self, state: L1MonitorState) {
        *self.state.lock().expect("monitor state lock poisoned") = state;
    }
}

/// Handle for cancelling, extending and inspecting a running monitor.
#[derive(Clone)]
pub struct L1MonitorController {
    shared: Arc<MonitorShared>,
}

impl L1MonitorController {
    /// Stops the monitor; its result rejects with `reason=cancelled`.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        self.shared.cancel.notify_waiters();
    }

    /// Extends the soft budget from now and re-arms the warning.
    pub fn extend_timeout(&self, extra: Duration) {
        *self
            .shared
            .soft_deadline
            .lock()
            .expect("monitor deadline lock poisoned") = Instant::now() + extra;
        self.shared.warn_armed.store(true, Ordering::SeqCst);
    }

    pub fn status(&self) -> L1MonitorProgress {
        let state = *self
            .shared
            .state
            .lock()
            .expect("monitor state lock poisoned");
        L1MonitorProgress {
            state,
            checking: state == L1MonitorState::Monitoring,
            elapsed: self.shared.started.elapsed(),
            last_balance: *self
                .shared
                .last_balance
                .lock()
                .expect("monitor balance lock poisoned"),
        }
    }
}

/// A running confirmation monitor: await [`Self::wait`] for the outcome,
/// drive it through [`Self::controller`].
pub struct L1Monitor {
    controller: L1MonitorController,
    handle: JoinHandle<Result<L1Confirmation, BridgeError>>,
}

impl L1Monitor {
    pub fn controller(&self) -> L1MonitorController {
        self.controller.clone()
    }

    pub async fn wait(self) -> Result<L1Confirmation, BridgeError> {
        self.handle
            .await
            .map_err(|err| BridgeError::network(format!("monitor task failed: {err}")))?
    }
}

/// Spawns the monitor task. The baseline is the first successfully observed
/// account value; confirmation requires the value to grow by
/// `expected * 99 / 100`.
pub(crate) fn start_monitor(
    info: Arc<InfoClient>,
    wallet: Address,
    expected_amount: U256,
    hyper_evm_tx_hash: Option<TxHash>,
    options: L1MonitorOptions,
    on_soft_timeout: Option<SoftTimeoutWarning>,
) -> L1Monitor {
    let shared = Arc::new(MonitorShared {
        started: Instant::now(),
        cancel: Notify::new(),
        cancelled: AtomicBool::new(false),
        soft_deadline: Mutex::new(Instant::now() + options.soft_timeout),
        warn_armed: AtomicBool::new(true),
        state: Mutex::new(L1MonitorState::Monitoring),
        last_balance: Mutex::new(None),
    });
    let controller = L1MonitorController {
        shared: shared.clone(),
    };

    let handle = tokio::spawn(run_monitor(
        info,
        wallet,
        expected_amount,
        hyper_evm_tx_hash,
        options,
        shared,
        on_soft_timeout,
    ));

    L1Monitor { controller, handle }
}

async fn run_monitor(
    info: Arc<InfoClient>,
    wallet: Address,
    expected_amount: U256,
    hyper_evm_tx_hash: Option<TxHash>,
    options: L1MonitorOptions,
    shared: Arc<MonitorShared>,
    on_soft_timeout: Option<SoftTimeoutWarning>,
) -> Result<L1Confirmation, BridgeError> {
    let threshold = tolerance_threshold(expected_amount);
    let mut baseline: Option<U256> = None;

    loop {
        if shared.cancelled.load(Ordering::SeqCst) {
            shared.set_state(L1MonitorState::Cancelled);
            return Err(BridgeError::L1MonitorCancelled {
                reason: CancelReason::Cancelled,
            });
        }

        let elapsed = shared.started.elapsed();
        if elapsed >= options.max_timeout {
            shared.set_state(L1MonitorState::TimedOut);
            return Err(BridgeError::L1MonitorCancelled {
                reason: CancelReason::MaxTimeout,
            });
        }

        let soft_deadline = *shared
            .soft_deadline
            .lock()
            .expect("monitor deadline lock poisoned");
        if Instant::now() >= soft_deadline && shared.warn_armed.swap(false, Ordering::SeqCst) {
            warn!(
                %wallet,
                elapsed_secs = elapsed.as_secs(),
                "L1 confirmation still pending past the soft timeout"
            );
            if let Some(callback) = &on_soft_timeout {
                callback(elapsed);
            }
        }

        match info.clearinghouse_value(wallet).await {
            Ok(value) => {
                *shared
                    .last_balance
                    .lock()
                    .expect("monitor balance lock poisoned") = Some(value);
                let base = *baseline.get_or_insert(value);
                if value < base {
                    debug!(%value, %base, "account value decreased (trading activity)");
                }
                let delta = value.saturating_sub(base);
                if delta >= threshold {
                    shared.set_state(L1MonitorState::Completed);
                    return Ok(L1Confirmation {
                        amount: delta,
                        final_balance: value,
                        hyper_evm_tx_hash,
                        confirmation_secs: shared.started.elapsed().as_secs(),
                        confirmed_at: Utc::now(),
                    });
                }
            }
            Err(err) => warn!(%err, "info endpoint poll failed, retrying"),
        }

        tokio::select! {
            _ = tokio::time::sleep(options.poll_interval) => {}
            _ = shared.cancel.notified() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    const WALLET: Address = address!("0x1111111111111111111111111111111111111111");

    #[test]
    fn account_value_parsing() {
        assert_eq!(
            parse_account_value("1234.56").unwrap(),
            U256::from(1_234_560_000u64)
        );
        assert_eq!(parse_account_value("1234").unwrap(), U256::from(1_234_000_000u64));
        assert_eq!(
            parse_account_value("0.1234567").unwrap(),
            U256::from(123_456u64)
        );
        assert_eq!(parse_account_value(".5").unwrap(), U256::from(500_000u64));
        assert_eq!(parse_account_value("0").unwrap(), U256::ZERO);
        assert!(parse_account_value("12a.4").is_err());
        assert!(parse_account_value("-3").is_err());
    }

    fn account_value_mock<'a>(server: &'a MockServer, value: &str) -> httpmock::Mock<'a> {
        let body = json!({ "marginSummary": { "accountValue": value } });
        server.mock(|when, then| {
            when.method(POST)
                .json_body_partial(r#"{"type":"clearinghouseState"}"#);
            then.status(200).json_body(body);
        })
    }

    fn options(poll_ms: u64, soft_ms: u64, max_ms: u64) -> L1MonitorOptions {
        L1MonitorOptions {
            poll_interval: Duration::from_millis(poll_ms),
            soft_timeout: Duration::from_millis(soft_ms),
            max_timeout: Duration::from_millis(max_ms),
        }
    }

    #[tokio::test]
    async fn confirms_when_account_value_grows() {
        let server = MockServer::start();
        let mut initial = account_value_mock(&server, "100.0");

        let info = Arc::new(InfoClient::new(server.base_url()));
        let monitor = start_monitor(
            info,
            WALLET,
            U256::from(100_000_000u64),
            Some(TxHash::with_last_byte(9)),
            options(25, 60_000, 60_000),
            None,
        );
        let controller = monitor.controller();

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert_eq!(controller.status().state, L1MonitorState::Monitoring);
        assert!(controller.status().checking);

        initial.delete();
        account_value_mock(&server, "200.0");

        let confirmation = monitor.wait().await.unwrap();
        assert_eq!(confirmation.amount, U256::from(100_000_000u64));
        assert_eq!(confirmation.final_balance, U256::from(200_000_000u64));
        assert_eq!(
            confirmation.hyper_evm_tx_hash,
            Some(TxHash::with_last_byte(9))
        );
        assert_eq!(controller.status().state, L1MonitorState::Completed);
        assert!(!controller.status().checking);
    }

    #[tokio::test]
    async fn cancel_rejects_with_cancelled_reason() {
        let server = MockServer::start();
        account_value_mock(&server, "100.0");

        let info = Arc::new(InfoClient::new(server.base_url()));
        let monitor = start_monitor(
            info,
            WALLET,
            U256::from(100_000_000u64),
            None,
            options(25, 60_000, 60_000),
            None,
        );
        let controller = monitor.controller();

        tokio::time::sleep(Duration::from_millis(60)).await;
        controller.cancel();

        let err = monitor.wait().await.unwrap_err();
        assert_eq!(
            err,
            BridgeError::L1MonitorCancelled {
                reason: CancelReason::Cancelled
            }
        );
        assert_eq!(controller.status().state, L1MonitorState::Cancelled);
    }

    #[tokio::test]
    async fn hard_timeout_rejects_with_max_timeout() {
        let server = MockServer::start();
        account_value_mock(&server, "100.0");

        let info = Arc::new(InfoClient::new(server.base_url()));
        let monitor = start_monitor(
            info,
            WALLET,
            U256::from(100_000_000u64),
            None,
            options(20, 40, 90),
            None,
        );

        let err = monitor.wait().await.unwrap_err();
        assert_eq!(
            err,
            BridgeError::L1MonitorCancelled {
                reason: CancelReason::MaxTimeout
            }
        );
    }

    #[tokio::test]
    async fn soft_timeout_warns_once_and_extend_rearms() {
        let server = MockServer::start();
        account_value_mock(&server, "100.0");

        let warnings = Arc::new(AtomicUsize::new(0));
        let counter = warnings.clone();
        let info = Arc::new(InfoClient::new(server.base_url()));
        let monitor = start_monitor(
            info,
            WALLET,
            U256::from(100_000_000u64),
            None,
            options(20, 50, 60_000),
            Some(Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );
        let controller = monitor.controller();

        // Well past the soft deadline: exactly one warning.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(warnings.load(Ordering::SeqCst), 1);

        // Extending re-arms the warning for one more firing.
        controller.extend_timeout(Duration::from_millis(40));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(warnings.load(Ordering::SeqCst), 2);

        controller.cancel();
        let _ = monitor.wait().await;
    }

    #[tokio::test]
    async fn balance_decrease_does_not_abort() {
        let server = MockServer::start();
        let mut initial = account_value_mock(&server, "100.0");

        let info = Arc::new(InfoClient::new(server.base_url()));
        let monitor = start_monitor(
            info,
            WALLET,
            U256::from(50_000_000u64),
            None,
            options(20, 60_000, 60_000),
            None,
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        initial.delete();
        let mut dipped = account_value_mock(&server, "80.0");

        tokio::time::sleep(Duration::from_millis(50)).await;
        dipped.delete();
        account_value_mock(&server, "160.0");

        let confirmation = monitor.wait().await.unwrap();
        // Delta measured against the original baseline of 100.
        assert_eq!(confirmation.amount, U256::from(60_000_000u64));
    }
}
