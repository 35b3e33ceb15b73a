//! Typed publish/subscribe for bridge progress events.
//!
//! Built on [`tokio::sync::broadcast`]: every subscriber gets its own
//! receiver, a lagging subscriber only affects itself, and emitting with no
//! subscribers is a no-op. Events for a given execution are emitted in
//! pipeline order.

use alloy::primitives::{Address, TxHash, U256};
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::BridgeError;
use crate::orchestrator::ExecutionPhase;
use crate::registry::{ExecutionId, StepState};

/// Discriminant of [`BridgeEvent`], for filtering and order assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    QuoteUpdated,
    ExecutionStarted,
    StepChanged,
    ApprovalRequired,
    TransactionSent,
    TransactionConfirmed,
    DepositStarted,
    DepositCompleted,
    ExecutionCompleted,
    ExecutionFailed,
    StatusChanged,
}

/// What a sent/confirmed transaction was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPurpose {
    Approval,
    Bridge,
    Deposit,
}

#[derive(Debug, Clone)]
pub enum BridgeEvent {
    QuoteUpdated {
        quote_id: String,
        from_chain_id: u64,
        to_chain_id: u64,
        to_amount: U256,
    },
    ExecutionStarted {
        execution_id: ExecutionId,
        quote_id: String,
        total_steps: usize,
    },
    StepChanged {
        execution_id: ExecutionId,
        step_id: String,
        step_index: usize,
        state: StepState,
    },
    ApprovalRequired {
        execution_id: ExecutionId,
        token: Address,
        spender: Address,
        amount: U256,
    },
    TransactionSent {
        execution_id: ExecutionId,
        tx_hash: TxHash,
        purpose: TxPurpose,
    },
    TransactionConfirmed {
        execution_id: ExecutionId,
        tx_hash: TxHash,
        purpose: TxPurpose,
    },
    DepositStarted {
        execution_id: Option<ExecutionId>,
        amount: U256,
    },
    DepositCompleted {
        execution_id: Option<ExecutionId>,
        tx_hash: TxHash,
        amount: U256,
    },
    ExecutionCompleted {
        execution_id: ExecutionId,
        tx_hash: Option<TxHash>,
        received_amount: Option<U256>,
    },
    ExecutionFailed {
        execution_id: ExecutionId,
        error: BridgeError,
    },
    StatusChanged {
        execution_id: ExecutionId,
        phase: ExecutionPhase,
    },
}

impl BridgeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::QuoteUpdated { .. } => EventKind::QuoteUpdated,
            Self::ExecutionStarted { .. } => EventKind::ExecutionStarted,
            Self::StepChanged { .. } => EventKind::StepChanged,
            Self::ApprovalRequired { .. } => EventKind::ApprovalRequired,
            Self::TransactionSent { .. } => EventKind::TransactionSent,
            Self::TransactionConfirmed { .. } => EventKind::TransactionConfirmed,
            Self::DepositStarted { .. } => EventKind::DepositStarted,
            Self::DepositCompleted { .. } => EventKind::DepositCompleted,
            Self::ExecutionCompleted { .. } => EventKind::ExecutionCompleted,
            Self::ExecutionFailed { .. } => EventKind::ExecutionFailed,
            Self::StatusChanged { .. } => EventKind::StatusChanged,
        }
    }
}

/// Cloneable handle publishing [`BridgeEvent`]s to all live subscribers.
#[derive(Clone)]
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<BridgeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event. Emission is best-effort: having no subscribers is
    /// not an error.
    pub(crate) fn emit(&self, event: BridgeEvent) {
        if self.sender.send(event).is_err() {
            trace!("bridge event emitted with no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_emission_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let execution_id = ExecutionId::new();

        bus.emit(BridgeEvent::ExecutionStarted {
            execution_id,
            quote_id: "q1".into(),
            total_steps: 1,
        });
        bus.emit(BridgeEvent::StatusChanged {
            execution_id,
            phase: ExecutionPhase::Executing,
        });

        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::ExecutionStarted);
        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::StatusChanged);
    }

    #[test]
    fn emit_without_subscribers_is_a_noop() {
        let bus = EventBus::new(4);
        bus.emit(BridgeEvent::QuoteUpdated {
            quote_id: "q".into(),
            from_chain_id: 1,
            to_chain_id: 999,
            to_amount: U256::from(1u64),
        });
    }

    #[test]
    fn each_subscriber_sees_every_event() {
        let bus = EventBus::new(4);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.emit(BridgeEvent::DepositStarted {
            execution_id: None,
            amount: U256::from(5_000_000u64),
        });
        assert_eq!(a.try_recv().unwrap().kind(), EventKind::DepositStarted);
        assert_eq!(b.try_recv().unwrap().kind(), EventKind::DepositStarted);
    }
}
