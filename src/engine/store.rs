//! Storage seams for the order engines.
//!
//! The engines never speak SQL; they call these traits. Production wires
//! the Postgres implementations from `crate::database`, the integration
//! tests an in-memory pair. Settlement methods are atomic: either the order
//! row, the balance, and the ledger entries all change together or nothing
//! does.

use crate::engine::ledger::{Balance, LedgerEntry};
use crate::engine::state::{DepositState, WithdrawalState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::EngineResult;

#[derive(Debug, Clone)]
pub struct NewDepositOrder {
    pub order_id: String,
    pub external_order_id: Option<String>,
    /// Original order id this submission chains to; equals `order_id` for
    /// first submissions.
    pub chain_id: String,
    pub user_id: String,
    pub method_id: i64,
    pub channel_id: i64,
    pub provider: String,
    pub amount: i64,
    pub automatic: bool,
    pub remark: Option<String>,
    pub crypto_address: Option<String>,
    pub crypto_rate: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DepositOrder {
    pub order_id: String,
    pub external_order_id: Option<String>,
    pub chain_id: String,
    pub user_id: String,
    pub method_id: i64,
    pub channel_id: i64,
    pub provider: String,
    pub amount: i64,
    pub settled_amount: Option<i64>,
    pub state: DepositState,
    pub automatic: bool,
    pub remark: Option<String>,
    pub crypto_address: Option<String>,
    pub crypto_hash: Option<String>,
    pub crypto_rate: Option<String>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub confirmed_by: Option<String>,
}

/// Everything a successful deposit settlement writes in one transaction.
#[derive(Debug, Clone)]
pub struct DepositSettlement {
    pub order_id: String,
    pub settled_amount: i64,
    pub bonus: i64,
    pub confirmed_by: String,
    pub crypto_hash: Option<String>,
}

/// What a settlement transaction reports back after commit.
#[derive(Debug, Clone)]
pub struct SettlementReceipt {
    pub order_id: String,
    pub balance: Balance,
}

#[async_trait]
pub trait DepositStore: Send + Sync {
    /// Insert a new order in `Confirming`. The chain-uniqueness rule (no
    /// existing Success on the chain) is re-checked inside the insert
    /// transaction.
    async fn create(&self, order: NewDepositOrder) -> EngineResult<DepositOrder>;

    async fn get(&self, order_id: &str) -> EngineResult<Option<DepositOrder>>;

    async fn has_chain_success(&self, chain_id: &str) -> EngineResult<bool>;

    /// State-only transition to Cancelled.
    async fn mark_cancelled(
        &self,
        order_id: &str,
        from: DepositState,
        confirmed_by: &str,
    ) -> EngineResult<DepositOrder>;

    /// Park a settled order in Reviewing with the amount the provider
    /// reported.
    async fn mark_reviewing(
        &self,
        order_id: &str,
        settled_amount: i64,
        crypto_hash: Option<String>,
    ) -> EngineResult<DepositOrder>;

    /// The ledger transaction: order to Success, balance credited, entries
    /// appended, chain uniqueness re-checked, all or nothing.
    async fn settle_success(
        &self,
        settlement: DepositSettlement,
        from: DepositState,
    ) -> EngineResult<SettlementReceipt>;

    /// Successful deposits for the user, for first/second-deposit marking.
    async fn success_count_for_user(&self, user_id: &str) -> EngineResult<i64>;

    async fn balance(&self, user_id: &str) -> EngineResult<Balance>;

    async fn entries_for(&self, bill_ref: &str) -> EngineResult<Vec<LedgerEntry>>;
}

#[derive(Debug, Clone)]
pub struct NewWithdrawalOrder {
    pub user_id: String,
    pub card_id: i64,
    pub amount: i64,
    pub automatic: bool,
}

#[derive(Debug, Clone)]
pub struct WithdrawalOrder {
    pub id: i64,
    pub user_id: String,
    pub card_id: i64,
    pub amount: i64,
    pub state: WithdrawalState,
    pub automatic: bool,
    pub reviewer_id: Option<String>,
    pub reviewer_name: Option<String>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub hangup_reason: Option<String>,
    pub provider: Option<String>,
    pub external_order_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payout destination on file for a user.
#[derive(Debug, Clone)]
pub struct BankCard {
    pub id: i64,
    pub user_id: String,
    pub account_name: String,
    pub account_number: String,
    pub bank_name: String,
}

/// Field updates accompanying a state-only withdrawal transition.
#[derive(Debug, Clone, Default)]
pub struct WithdrawalPatch {
    pub reviewer_id: Option<String>,
    pub reviewer_name: Option<String>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub hangup_reason: Option<String>,
    pub provider: Option<String>,
    pub external_order_id: Option<String>,
}

#[async_trait]
pub trait WithdrawalStore: Send + Sync {
    /// One transaction: reject when the user already has a non-terminal
    /// order, row-lock the balance, move the amount into the locked hold,
    /// insert the order in Reviewing with its hold entries.
    async fn create(&self, order: NewWithdrawalOrder) -> EngineResult<WithdrawalOrder>;

    async fn get(&self, id: i64) -> EngineResult<Option<WithdrawalOrder>>;

    async fn has_open_order(&self, user_id: &str) -> EngineResult<bool>;

    async fn card(&self, card_id: i64) -> EngineResult<Option<BankCard>>;

    /// Compare-and-set state transition with metadata, no balance effect.
    async fn transition(
        &self,
        id: i64,
        from: WithdrawalState,
        to: WithdrawalState,
        patch: WithdrawalPatch,
    ) -> EngineResult<WithdrawalOrder>;

    /// Terminal Success: release the locked hold in the same transaction as
    /// the state change.
    async fn settle_success(
        &self,
        id: i64,
        from: WithdrawalState,
        received_at: DateTime<Utc>,
    ) -> EngineResult<SettlementReceipt>;

    /// Terminal Rejected or Failed: refund the hold back to available in
    /// the same transaction as the state change.
    async fn settle_refund(
        &self,
        id: i64,
        from: WithdrawalState,
        to: WithdrawalState,
        patch: WithdrawalPatch,
    ) -> EngineResult<SettlementReceipt>;

    async fn balance(&self, user_id: &str) -> EngineResult<Balance>;

    async fn entries_for(&self, bill_ref: &str) -> EngineResult<Vec<LedgerEntry>>;
}
