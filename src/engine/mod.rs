//! The settlement engine proper: deposit and withdrawal lifecycles over the
//! storage and coordination seams.

pub mod deposit;
pub mod ledger;
pub mod memory;
pub mod state;
pub mod store;
pub mod withdrawal;

use crate::error::EngineError;
use crate::providers::ProviderError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

pub use deposit::{CreateDeposit, CreatedDeposit, DepositEngine};
pub use memory::{MemoryDepositStore, MemoryLedger, MemoryRouteStore, MemoryWithdrawalStore};
pub use ledger::{Account, Balance, CashType, LedgerEntry, PlannedEntry};
pub use state::{DepositState, WithdrawalState};
pub use store::{
    BankCard, DepositOrder, DepositSettlement, DepositStore, NewDepositOrder, NewWithdrawalOrder,
    SettlementReceipt, WithdrawalOrder, WithdrawalPatch, WithdrawalStore,
};
pub use withdrawal::WithdrawalEngine;

/// Signature failures keep their own error so callbacks can be rejected
/// with 401 rather than treated as gateway faults.
pub(crate) fn map_provider_error(e: ProviderError) -> EngineError {
    match e {
        ProviderError::InvalidSignature { provider } => EngineError::InvalidSignature { provider },
        other => EngineError::Provider(other),
    }
}

/// Per-call context threaded through every engine entry point. The request
/// id ties log lines across layers; the deadline caps outbound provider
/// calls.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub request_id: String,
    pub deadline: Option<DateTime<Utc>>,
}

impl CallContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Seconds left until the deadline, if one is set and not yet passed.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> Option<u64> {
        self.deadline
            .map(|d| (d - now).num_seconds().max(0) as u64)
    }
}

/// Downstream notification hook fired after terminal settlements. The
/// production wiring can fan these out to user messaging; the default just
/// logs.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deposit_settled(&self, order: &DepositOrder);
    async fn withdrawal_settled(&self, order: &WithdrawalOrder);
}

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deposit_settled(&self, order: &DepositOrder) {
        info!(
            order_id = %order.order_id,
            user_id = %order.user_id,
            state = %order.state,
            amount = order.amount,
            "Deposit settled"
        );
    }

    async fn withdrawal_settled(&self, order: &WithdrawalOrder) {
        info!(
            order_id = order.id,
            user_id = %order.user_id,
            state = %order.state,
            amount = order.amount,
            "Withdrawal settled"
        );
    }
}
