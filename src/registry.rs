//! Bounded in-memory store of execution states.
//!
//! The orchestrator is the sole writer; everything else receives read-only
//! projections. Entries live for the process only: the library deliberately
//! keeps no cross-restart persistence, so the registry evicts terminal
//! entries first and oldest entries second once it reaches capacity.

use alloy::primitives::{TxHash, U256};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::is_recoverable_message;
use crate::quote::StepKind;

/// Maximum number of executions retained in memory.
const REGISTRY_CAPACITY: usize = 100;

/// Terminal entries older than this are evicted first under pressure.
const TERMINAL_EVICTION_AGE_SECS: i64 = 3600;

/// Identifier of a single orchestrator invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutionId(Uuid);

impl ExecutionId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExecutionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Pending,
    Active,
    Completed,
    Failed,
}

impl Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Per-step progress record.
#[derive(Debug, Clone, PartialEq)]
pub struct StepStatus {
    pub step_id: String,
    pub kind: StepKind,
    pub state: StepState,
    pub tx_hash: Option<TxHash>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Full mutable state of one execution. Owned by the registry; the
/// orchestrator mutates it through [`ExecutionRegistry::update`].
#[derive(Debug, Clone)]
pub struct ExecutionState {
    pub execution_id: ExecutionId,
    pub quote_id: String,
    pub status: ExecutionStatus,
    pub current_step_index: usize,
    pub total_steps: usize,
    pub steps: Vec<StepStatus>,
    pub tx_hash: Option<TxHash>,
    pub receiving_tx_hash: Option<TxHash>,
    pub from_amount: U256,
    pub to_amount: Option<U256>,
    pub received_amount: Option<U256>,
    pub from_chain_id: u64,
    pub to_chain_id: u64,
    /// Percentage 0..=100, monotonic non-decreasing until terminal.
    pub progress: u8,
    pub estimated_secs: u64,
    pub substatus: String,
    pub error: Option<String>,
    pub retry_count: u32,
    pub previous_errors: Vec<String>,
    pub failed_step_index: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Seed for a fresh registry entry.
pub(crate) struct NewExecution {
    pub execution_id: ExecutionId,
    pub quote_id: String,
    pub steps: Vec<(String, StepKind)>,
    pub from_amount: U256,
    pub to_amount: Option<U256>,
    pub from_chain_id: u64,
    pub to_chain_id: u64,
    pub estimated_secs: u64,
}

/// Error surface of a status projection: the recorded message plus the
/// retryability heuristic applied to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedError {
    pub message: String,
    pub recoverable: bool,
}

/// Read-only projection of one execution for status queries.
#[derive(Debug, Clone)]
pub struct ExecutionStatusView {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    pub current_step: Option<StepStatus>,
    pub steps: Vec<StepStatus>,
    pub progress: u8,
    pub tx_hash: Option<TxHash>,
    pub receiving_tx_hash: Option<TxHash>,
    pub received_amount: Option<U256>,
    pub substatus: String,
    pub error: Option<ProjectedError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ExecutionRegistry {
    capacity: usize,
    entries: Mutex<HashMap<ExecutionId, ExecutionState>>,
}

impl ExecutionRegistry {
    pub(crate) fn new() -> Self {
        Self::with_capacity(REGISTRY_CAPACITY)
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn create(&self, seed: NewExecution) {
        let now = Utc::now();
        let steps = seed
            .steps
            .into_iter()
            .map(|(step_id, kind)| StepStatus {
                step_id,
                kind,
                state: StepState::Pending,
                tx_hash: None,
                error: None,
                updated_at: now,
            })
            .collect::<Vec<_>>();
        let state = ExecutionState {
            execution_id: seed.execution_id,
            quote_id: seed.quote_id,
            status: ExecutionStatus::Pending,
            current_step_index: 0,
            total_steps: steps.len(),
            steps,
            tx_hash: None,
            receiving_tx_hash: None,
            from_amount: seed.from_amount,
            to_amount: seed.to_amount,
            received_amount: None,
            from_chain_id: seed.from_chain_id,
            to_chain_id: seed.to_chain_id,
            progress: 0,
            estimated_secs: seed.estimated_secs,
            substatus: "pending".to_string(),
            error: None,
            retry_count: 0,
            previous_errors: Vec::new(),
            failed_step_index: None,
            created_at: now,
            updated_at: now,
        };

        let mut entries = self.entries.lock().expect("registry lock poisoned");
        if entries.len() >= self.capacity {
            Self::evict(&mut entries, self.capacity);
        }
        entries.insert(state.execution_id, state);
    }

    /// Applies a mutation to an entry. Terminal entries are immutable;
    /// progress can never decrease and is clamped to 100.
    pub(crate) fn update(&self, id: ExecutionId, mutate: impl FnOnce(&mut ExecutionState)) {
        let mut entries = self.entries.lock().expect("registry lock poisoned");
        let Some(state) = entries.get_mut(&id) else {
            debug!(%id, "update for unknown execution ignored");
            return;
        };
        if state.status.is_terminal() {
            warn!(%id, status = %state.status, "update on terminal execution ignored");
            return;
        }
        let progress_before = state.progress;
        mutate(state);
        state.progress = state.progress.max(progress_before).min(100);
        state.updated_at = Utc::now();
    }

    /// Rewrites the step entry matching `step_id`.
    pub(crate) fn update_step(
        &self,
        id: ExecutionId,
        step_id: &str,
        mutate: impl FnOnce(&mut StepStatus),
    ) {
        self.update(id, |state| {
            match state.steps.iter_mut().find(|step| step.step_id == step_id) {
                Some(step) => {
                    mutate(step);
                    step.updated_at = Utc::now();
                }
                None => debug!(%id, step_id, "step update for unknown step ignored"),
            }
        });
    }

    pub fn status(&self, id: ExecutionId) -> Option<ExecutionStatusView> {
        let entries = self.entries.lock().expect("registry lock poisoned");
        let state = entries.get(&id)?;
        Some(ExecutionStatusView {
            execution_id: state.execution_id,
            status: state.status,
            current_step: state.steps.get(state.current_step_index).cloned(),
            steps: state.steps.clone(),
            progress: state.progress,
            tx_hash: state.tx_hash,
            receiving_tx_hash: state.receiving_tx_hash,
            received_amount: state.received_amount,
            substatus: state.substatus.clone(),
            error: state.error.as_ref().map(|message| ProjectedError {
                message: message.clone(),
                recoverable: is_recoverable_message(message),
            }),
            created_at: state.created_at,
            updated_at: state.updated_at,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn reset(&self) {
        self.entries.lock().expect("registry lock poisoned").clear();
    }

    /// Two-phase eviction: terminal entries older than an hour first, then
    /// the oldest quartile by creation time if still at capacity.
    fn evict(entries: &mut HashMap<ExecutionId, ExecutionState>, capacity: usize) {
        let cutoff = Utc::now() - chrono::Duration::seconds(TERMINAL_EVICTION_AGE_SECS);
        entries.retain(|_, state| !(state.status.is_terminal() && state.created_at < cutoff));

        if entries.len() >= capacity {
            let mut by_age: Vec<(ExecutionId, DateTime<Utc>)> = entries
                .iter()
                .map(|(id, state)| (*id, state.created_at))
                .collect();
            by_age.sort_by_key(|(_, created_at)| *created_at);
            let quartile = (capacity / 4).max(1);
            for (id, _) in by_age.into_iter().take(quartile) {
                entries.remove(&id);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate_created(&self, id: ExecutionId, age: chrono::Duration) {
        let mut entries = self.entries.lock().expect("registry lock poisoned");
        if let Some(state) = entries.get_mut(&id) {
            state.created_at = state.created_at - age;
        }
    }
}
