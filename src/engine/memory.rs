//! In-memory order stores mirroring the Postgres semantics, for the test
//! suites and `SKIP_EXTERNALS` local runs. Both stores share one
//! `MemoryLedger` so deposits and withdrawals move the same balances.

use crate::engine::ledger::{self, Balance, LedgerEntry, PlannedEntry};
use crate::engine::state::{DepositState, WithdrawalState};
use crate::engine::store::{
    BankCard, DepositOrder, DepositSettlement, DepositStore, NewDepositOrder,
    NewWithdrawalOrder, SettlementReceipt, WithdrawalOrder, WithdrawalPatch, WithdrawalStore,
};
use crate::error::{EngineError, EngineResult};
use crate::routing::{ChannelRoute, RouteStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

fn poisoned() -> EngineError {
    EngineError::TransactionFailed {
        message: "memory store poisoned".to_string(),
    }
}

#[derive(Default)]
struct LedgerInner {
    balances: HashMap<String, Balance>,
    entries: Vec<LedgerEntry>,
    next_id: i64,
}

/// Shared balance and ledger state.
#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<LedgerInner>,
}

impl MemoryLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> EngineResult<MutexGuard<'_, LedgerInner>> {
        self.inner.lock().map_err(|_| poisoned())
    }

    /// Credit a user directly, for test setup.
    pub fn credit(&self, user_id: &str, amount: i64) -> EngineResult<()> {
        let mut inner = self.lock()?;
        inner.balances.entry(user_id.to_string()).or_default().available += amount;
        Ok(())
    }

    fn apply(
        &self,
        user_id: &str,
        bill_ref: &str,
        plan: &[PlannedEntry],
    ) -> EngineResult<Balance> {
        let mut inner = self.lock()?;
        let balance = inner.balances.get(user_id).copied().unwrap_or_default();
        let (next, snapshots) = ledger::apply_plan(balance, plan)?;
        for (entry, (before, after)) in plan.iter().zip(snapshots.iter()) {
            inner.next_id += 1;
            let id = inner.next_id;
            inner.entries.push(LedgerEntry {
                id,
                user_id: user_id.to_string(),
                account: entry.account,
                before: *before,
                after: *after,
                delta: entry.delta,
                bill_ref: bill_ref.to_string(),
                cash_type: entry.cash_type,
                remark: entry.remark.clone(),
                created_at: Utc::now(),
            });
        }
        inner.balances.insert(user_id.to_string(), next);
        Ok(next)
    }

    pub fn balance(&self, user_id: &str) -> EngineResult<Balance> {
        Ok(self
            .lock()?
            .balances
            .get(user_id)
            .copied()
            .unwrap_or_default())
    }

    pub fn entries_for(&self, bill_ref: &str) -> EngineResult<Vec<LedgerEntry>> {
        Ok(self
            .lock()?
            .entries
            .iter()
            .filter(|e| e.bill_ref == bill_ref)
            .cloned()
            .collect())
    }
}

pub struct MemoryDepositStore {
    ledger: Arc<MemoryLedger>,
    orders: Mutex<HashMap<String, DepositOrder>>,
}

impl MemoryDepositStore {
    pub fn new(ledger: Arc<MemoryLedger>) -> Self {
        Self {
            ledger,
            orders: Mutex::new(HashMap::new()),
        }
    }

    fn orders(&self) -> EngineResult<MutexGuard<'_, HashMap<String, DepositOrder>>> {
        self.orders.lock().map_err(|_| poisoned())
    }
}

#[async_trait]
impl DepositStore for MemoryDepositStore {
    async fn create(&self, order: NewDepositOrder) -> EngineResult<DepositOrder> {
        let mut orders = self.orders()?;
        if orders
            .values()
            .any(|o| o.chain_id == order.chain_id && o.state == DepositState::Success)
        {
            return Err(EngineError::validation(format!(
                "chain {} already settled",
                order.chain_id
            )));
        }
        let created = DepositOrder {
            order_id: order.order_id.clone(),
            external_order_id: order.external_order_id,
            chain_id: order.chain_id,
            user_id: order.user_id,
            method_id: order.method_id,
            channel_id: order.channel_id,
            provider: order.provider,
            amount: order.amount,
            settled_amount: None,
            state: DepositState::Confirming,
            automatic: order.automatic,
            remark: order.remark,
            crypto_address: order.crypto_address,
            crypto_hash: None,
            crypto_rate: order.crypto_rate,
            created_at: Utc::now(),
            confirmed_at: None,
            confirmed_by: None,
        };
        orders.insert(order.order_id, created.clone());
        Ok(created)
    }

    async fn get(&self, order_id: &str) -> EngineResult<Option<DepositOrder>> {
        Ok(self.orders()?.get(order_id).cloned())
    }

    async fn has_chain_success(&self, chain_id: &str) -> EngineResult<bool> {
        Ok(self
            .orders()?
            .values()
            .any(|o| o.chain_id == chain_id && o.state == DepositState::Success))
    }

    async fn mark_cancelled(
        &self,
        order_id: &str,
        from: DepositState,
        confirmed_by: &str,
    ) -> EngineResult<DepositOrder> {
        let mut orders = self.orders()?;
        let order = orders.get_mut(order_id).ok_or_else(|| EngineError::NotFound {
            order_id: order_id.to_string(),
        })?;
        if order.state != from {
            return Err(EngineError::InvalidOrderState {
                from: order.state.to_string(),
                to: DepositState::Cancelled.to_string(),
            });
        }
        order.state.ensure_transition(DepositState::Cancelled)?;
        order.state = DepositState::Cancelled;
        order.confirmed_at = Some(Utc::now());
        order.confirmed_by = Some(confirmed_by.to_string());
        Ok(order.clone())
    }

    async fn mark_reviewing(
        &self,
        order_id: &str,
        settled_amount: i64,
        crypto_hash: Option<String>,
    ) -> EngineResult<DepositOrder> {
        let mut orders = self.orders()?;
        let order = orders.get_mut(order_id).ok_or_else(|| EngineError::NotFound {
            order_id: order_id.to_string(),
        })?;
        order.state.ensure_transition(DepositState::Reviewing)?;
        order.state = DepositState::Reviewing;
        order.settled_amount = Some(settled_amount);
        if crypto_hash.is_some() {
            order.crypto_hash = crypto_hash;
        }
        Ok(order.clone())
    }

    async fn settle_success(
        &self,
        settlement: DepositSettlement,
        from: DepositState,
    ) -> EngineResult<SettlementReceipt> {
        let mut orders = self.orders()?;
        let order = orders
            .get(&settlement.order_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound {
                order_id: settlement.order_id.clone(),
            })?;
        if order.state != from {
            return Err(EngineError::InvalidOrderState {
                from: order.state.to_string(),
                to: DepositState::Success.to_string(),
            });
        }
        order.state.ensure_transition(DepositState::Success)?;

        if let Some(existing) = orders
            .values()
            .find(|o| o.chain_id == order.chain_id && o.state == DepositState::Success)
        {
            return Err(EngineError::DuplicateNotification {
                order_id: existing.order_id.clone(),
            });
        }

        let plan = ledger::plan_deposit_success(
            settlement.settled_amount,
            settlement.bonus,
            &order.order_id,
        );
        let balance = self.ledger.apply(&order.user_id, &order.order_id, &plan)?;

        let stored = orders
            .get_mut(&settlement.order_id)
            .ok_or_else(|| EngineError::NotFound {
                order_id: settlement.order_id.clone(),
            })?;
        stored.state = DepositState::Success;
        stored.settled_amount = Some(settlement.settled_amount);
        stored.confirmed_at = Some(Utc::now());
        stored.confirmed_by = Some(settlement.confirmed_by);
        if settlement.crypto_hash.is_some() {
            stored.crypto_hash = settlement.crypto_hash;
        }

        Ok(SettlementReceipt {
            order_id: settlement.order_id,
            balance,
        })
    }

    async fn success_count_for_user(&self, user_id: &str) -> EngineResult<i64> {
        Ok(self
            .orders()?
            .values()
            .filter(|o| o.user_id == user_id && o.state == DepositState::Success)
            .count() as i64)
    }

    async fn balance(&self, user_id: &str) -> EngineResult<Balance> {
        self.ledger.balance(user_id)
    }

    async fn entries_for(&self, bill_ref: &str) -> EngineResult<Vec<LedgerEntry>> {
        self.ledger.entries_for(bill_ref)
    }
}

struct WithdrawalInner {
    orders: HashMap<i64, WithdrawalOrder>,
    cards: HashMap<i64, BankCard>,
    next_id: i64,
}

pub struct MemoryWithdrawalStore {
    ledger: Arc<MemoryLedger>,
    inner: Mutex<WithdrawalInner>,
}

impl MemoryWithdrawalStore {
    pub fn new(ledger: Arc<MemoryLedger>) -> Self {
        Self {
            ledger,
            inner: Mutex::new(WithdrawalInner {
                orders: HashMap::new(),
                cards: HashMap::new(),
                next_id: 0,
            }),
        }
    }

    fn lock(&self) -> EngineResult<MutexGuard<'_, WithdrawalInner>> {
        self.inner.lock().map_err(|_| poisoned())
    }

    pub fn add_card(&self, card: BankCard) -> EngineResult<()> {
        self.lock()?.cards.insert(card.id, card);
        Ok(())
    }

    fn apply_patch(order: &mut WithdrawalOrder, patch: WithdrawalPatch) {
        if patch.reviewer_id.is_some() {
            order.reviewer_id = patch.reviewer_id;
        }
        if patch.reviewer_name.is_some() {
            order.reviewer_name = patch.reviewer_name;
        }
        if patch.dispatched_at.is_some() {
            order.dispatched_at = patch.dispatched_at;
        }
        if patch.hangup_reason.is_some() {
            order.hangup_reason = patch.hangup_reason;
        }
        if patch.provider.is_some() {
            order.provider = patch.provider;
        }
        if patch.external_order_id.is_some() {
            order.external_order_id = patch.external_order_id;
        }
        order.updated_at = Utc::now();
    }
}

#[async_trait]
impl WithdrawalStore for MemoryWithdrawalStore {
    async fn create(&self, order: NewWithdrawalOrder) -> EngineResult<WithdrawalOrder> {
        let mut inner = self.lock()?;
        if inner
            .orders
            .values()
            .any(|o| o.user_id == order.user_id && !o.state.is_terminal())
        {
            return Err(EngineError::OrderInProgress);
        }

        let balance = self.ledger.balance(&order.user_id)?;
        if balance.available < order.amount {
            return Err(EngineError::InsufficientBalance {
                available: balance.available,
                required: order.amount,
            });
        }

        inner.next_id += 1;
        let id = inner.next_id;
        let plan = ledger::plan_withdrawal_hold(order.amount, &id.to_string());
        self.ledger.apply(&order.user_id, &id.to_string(), &plan)?;

        let now = Utc::now();
        let created = WithdrawalOrder {
            id,
            user_id: order.user_id,
            card_id: order.card_id,
            amount: order.amount,
            state: WithdrawalState::Reviewing,
            automatic: order.automatic,
            reviewer_id: None,
            reviewer_name: None,
            dispatched_at: None,
            received_at: None,
            hangup_reason: None,
            provider: None,
            external_order_id: None,
            created_at: now,
            updated_at: now,
        };
        inner.orders.insert(id, created.clone());
        Ok(created)
    }

    async fn get(&self, id: i64) -> EngineResult<Option<WithdrawalOrder>> {
        Ok(self.lock()?.orders.get(&id).cloned())
    }

    async fn has_open_order(&self, user_id: &str) -> EngineResult<bool> {
        Ok(self
            .lock()?
            .orders
            .values()
            .any(|o| o.user_id == user_id && !o.state.is_terminal()))
    }

    async fn card(&self, card_id: i64) -> EngineResult<Option<BankCard>> {
        Ok(self.lock()?.cards.get(&card_id).cloned())
    }

    async fn transition(
        &self,
        id: i64,
        from: WithdrawalState,
        to: WithdrawalState,
        patch: WithdrawalPatch,
    ) -> EngineResult<WithdrawalOrder> {
        from.ensure_transition(to)?;
        let mut inner = self.lock()?;
        let order = inner.orders.get_mut(&id).ok_or_else(|| EngineError::NotFound {
            order_id: id.to_string(),
        })?;
        if order.state != from {
            return Err(EngineError::InvalidOrderState {
                from: order.state.to_string(),
                to: to.to_string(),
            });
        }
        order.state = to;
        Self::apply_patch(order, patch);
        Ok(order.clone())
    }

    async fn settle_success(
        &self,
        id: i64,
        from: WithdrawalState,
        received_at: DateTime<Utc>,
    ) -> EngineResult<SettlementReceipt> {
        let mut inner = self.lock()?;
        let order = inner.orders.get_mut(&id).ok_or_else(|| EngineError::NotFound {
            order_id: id.to_string(),
        })?;
        if order.state != from {
            return Err(EngineError::InvalidOrderState {
                from: order.state.to_string(),
                to: WithdrawalState::Success.to_string(),
            });
        }
        order.state.ensure_transition(WithdrawalState::Success)?;

        let plan = ledger::plan_withdrawal_success(order.amount, &id.to_string());
        let balance = self.ledger.apply(&order.user_id, &id.to_string(), &plan)?;

        order.state = WithdrawalState::Success;
        order.received_at = Some(received_at);
        order.updated_at = Utc::now();

        Ok(SettlementReceipt {
            order_id: id.to_string(),
            balance,
        })
    }

    async fn settle_refund(
        &self,
        id: i64,
        from: WithdrawalState,
        to: WithdrawalState,
        patch: WithdrawalPatch,
    ) -> EngineResult<SettlementReceipt> {
        from.ensure_transition(to)?;
        if !to.is_terminal() {
            return Err(EngineError::InvalidOrderState {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let mut inner = self.lock()?;
        let order = inner.orders.get_mut(&id).ok_or_else(|| EngineError::NotFound {
            order_id: id.to_string(),
        })?;
        if order.state != from {
            return Err(EngineError::InvalidOrderState {
                from: order.state.to_string(),
                to: to.to_string(),
            });
        }

        let plan = ledger::plan_withdrawal_refund(order.amount, &id.to_string());
        let balance = self.ledger.apply(&order.user_id, &id.to_string(), &plan)?;

        order.state = to;
        Self::apply_patch(order, patch);

        Ok(SettlementReceipt {
            order_id: id.to_string(),
            balance,
        })
    }

    async fn balance(&self, user_id: &str) -> EngineResult<Balance> {
        self.ledger.balance(user_id)
    }

    async fn entries_for(&self, bill_ref: &str) -> EngineResult<Vec<LedgerEntry>> {
        self.ledger.entries_for(bill_ref)
    }
}

/// Static route table for tests and local runs.
#[derive(Default)]
pub struct MemoryRouteStore {
    routes: Mutex<HashMap<i64, ChannelRoute>>,
    tiers: Mutex<HashMap<i32, Vec<i64>>>,
}

impl MemoryRouteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_route(&self, route: ChannelRoute) -> EngineResult<()> {
        self.routes
            .lock()
            .map_err(|_| poisoned())?
            .insert(route.method_id, route);
        Ok(())
    }

    pub fn put_tier(&self, tier: i32, methods: Vec<i64>) -> EngineResult<()> {
        self.tiers
            .lock()
            .map_err(|_| poisoned())?
            .insert(tier, methods);
        Ok(())
    }
}

#[async_trait]
impl RouteStore for MemoryRouteStore {
    async fn load_route(&self, method_id: i64) -> EngineResult<Option<ChannelRoute>> {
        Ok(self
            .routes
            .lock()
            .map_err(|_| poisoned())?
            .get(&method_id)
            .cloned())
    }

    async fn load_methods_for_tier(&self, tier: i32) -> EngineResult<Vec<i64>> {
        Ok(self
            .tiers
            .lock()
            .map_err(|_| poisoned())?
            .get(&tier)
            .cloned()
            .unwrap_or_default())
    }
}
