//! Postgres withdrawal store. Creation and every terminal settlement are
//! single transactions over the order row, the balance row, and the ledger.

use crate::database::{apply_entries, commit, db_err, lock_balance};
use crate::engine::ledger::{self, Balance, LedgerEntry};
use crate::engine::state::WithdrawalState;
use crate::engine::store::{
    BankCard, NewWithdrawalOrder, SettlementReceipt, WithdrawalOrder, WithdrawalPatch,
    WithdrawalStore,
};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

const ORDER_COLUMNS: &str = "id, user_id, card_id, amount, state, automatic, reviewer_id, \
     reviewer_name, dispatched_at, received_at, hangup_reason, provider, \
     external_order_id, created_at, updated_at";

const OPEN_STATES: &str = "('reviewing', 'dispatched', 'dealing', 'autopay_failed', 'hangup')";

#[derive(Debug, FromRow)]
struct WithdrawalOrderRow {
    id: i64,
    user_id: String,
    card_id: i64,
    amount: i64,
    state: String,
    automatic: bool,
    reviewer_id: Option<String>,
    reviewer_name: Option<String>,
    dispatched_at: Option<DateTime<Utc>>,
    received_at: Option<DateTime<Utc>>,
    hangup_reason: Option<String>,
    provider: Option<String>,
    external_order_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WithdrawalOrderRow {
    fn into_domain(self) -> EngineResult<WithdrawalOrder> {
        Ok(WithdrawalOrder {
            state: WithdrawalState::from_str(&self.state)?,
            id: self.id,
            user_id: self.user_id,
            card_id: self.card_id,
            amount: self.amount,
            automatic: self.automatic,
            reviewer_id: self.reviewer_id,
            reviewer_name: self.reviewer_name,
            dispatched_at: self.dispatched_at,
            received_at: self.received_at,
            hangup_reason: self.hangup_reason,
            provider: self.provider,
            external_order_id: self.external_order_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct BankCardRow {
    id: i64,
    user_id: String,
    account_name: String,
    account_number: String,
    bank_name: String,
}

pub struct PgWithdrawalStore {
    pool: PgPool,
}

impl PgWithdrawalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_locked(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: i64,
    ) -> EngineResult<WithdrawalOrder> {
        let row: Option<WithdrawalOrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM withdrawal_orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err)?;
        row.ok_or_else(|| EngineError::NotFound {
            order_id: id.to_string(),
        })?
        .into_domain()
    }
}

#[async_trait]
impl WithdrawalStore for PgWithdrawalStore {
    async fn create(&self, order: NewWithdrawalOrder) -> EngineResult<WithdrawalOrder> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Single-open-order rule, re-checked under the insert transaction.
        let (open,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM withdrawal_orders WHERE user_id = $1 AND state IN {OPEN_STATES}"
        ))
        .bind(&order.user_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        if open > 0 {
            return Err(EngineError::OrderInProgress);
        }

        let balance = lock_balance(&mut tx, &order.user_id).await?;
        if balance.available < order.amount {
            return Err(EngineError::InsufficientBalance {
                available: balance.available,
                required: order.amount,
            });
        }

        let row: WithdrawalOrderRow = sqlx::query_as(&format!(
            "INSERT INTO withdrawal_orders (user_id, card_id, amount, state, automatic)
             VALUES ($1, $2, $3, 'reviewing', $4)
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(&order.user_id)
        .bind(order.card_id)
        .bind(order.amount)
        .bind(order.automatic)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        let plan = ledger::plan_withdrawal_hold(order.amount, &row.id.to_string());
        apply_entries(
            &mut tx,
            &order.user_id,
            &row.id.to_string(),
            balance,
            &plan,
        )
        .await?;

        commit(tx).await?;
        row.into_domain()
    }

    async fn get(&self, id: i64) -> EngineResult<Option<WithdrawalOrder>> {
        let row: Option<WithdrawalOrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM withdrawal_orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(WithdrawalOrderRow::into_domain).transpose()
    }

    async fn has_open_order(&self, user_id: &str) -> EngineResult<bool> {
        let (open,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM withdrawal_orders WHERE user_id = $1 AND state IN {OPEN_STATES}"
        ))
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(open > 0)
    }

    async fn card(&self, card_id: i64) -> EngineResult<Option<BankCard>> {
        let row: Option<BankCardRow> = sqlx::query_as(
            "SELECT id, user_id, account_name, account_number, bank_name
             FROM bank_cards WHERE id = $1",
        )
        .bind(card_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(|r| BankCard {
            id: r.id,
            user_id: r.user_id,
            account_name: r.account_name,
            account_number: r.account_number,
            bank_name: r.bank_name,
        }))
    }

    async fn transition(
        &self,
        id: i64,
        from: WithdrawalState,
        to: WithdrawalState,
        patch: WithdrawalPatch,
    ) -> EngineResult<WithdrawalOrder> {
        from.ensure_transition(to)?;

        let row: Option<WithdrawalOrderRow> = sqlx::query_as(&format!(
            "UPDATE withdrawal_orders
             SET state = $3,
                 reviewer_id = COALESCE($4, reviewer_id),
                 reviewer_name = COALESCE($5, reviewer_name),
                 dispatched_at = COALESCE($6, dispatched_at),
                 hangup_reason = COALESCE($7, hangup_reason),
                 provider = COALESCE($8, provider),
                 external_order_id = COALESCE($9, external_order_id),
                 updated_at = NOW()
             WHERE id = $1 AND state = $2
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(&patch.reviewer_id)
        .bind(&patch.reviewer_name)
        .bind(patch.dispatched_at)
        .bind(&patch.hangup_reason)
        .bind(&patch.provider)
        .bind(&patch.external_order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => row.into_domain(),
            None => Err(self.stale_state(id, to).await),
        }
    }

    async fn settle_success(
        &self,
        id: i64,
        from: WithdrawalState,
        received_at: DateTime<Utc>,
    ) -> EngineResult<SettlementReceipt> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let order = Self::fetch_locked(&mut tx, id).await?;
        if order.state != from {
            return Err(EngineError::InvalidOrderState {
                from: order.state.to_string(),
                to: WithdrawalState::Success.to_string(),
            });
        }
        order.state.ensure_transition(WithdrawalState::Success)?;

        let balance = lock_balance(&mut tx, &order.user_id).await?;
        let plan = ledger::plan_withdrawal_success(order.amount, &id.to_string());
        let next = apply_entries(&mut tx, &order.user_id, &id.to_string(), balance, &plan).await?;

        sqlx::query(
            "UPDATE withdrawal_orders
             SET state = 'success', received_at = $2, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(received_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        commit(tx).await?;
        Ok(SettlementReceipt {
            order_id: id.to_string(),
            balance: next,
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

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let order = Self::fetch_locked(&mut tx, id).await?;
        if order.state != from {
            return Err(EngineError::InvalidOrderState {
                from: order.state.to_string(),
                to: to.to_string(),
            });
        }

        let balance = lock_balance(&mut tx, &order.user_id).await?;
        let plan = ledger::plan_withdrawal_refund(order.amount, &id.to_string());
        let next = apply_entries(&mut tx, &order.user_id, &id.to_string(), balance, &plan).await?;

        sqlx::query(
            "UPDATE withdrawal_orders
             SET state = $2,
                 reviewer_id = COALESCE($3, reviewer_id),
                 hangup_reason = COALESCE($4, hangup_reason),
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(to.as_str())
        .bind(&patch.reviewer_id)
        .bind(&patch.hangup_reason)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        commit(tx).await?;
        Ok(SettlementReceipt {
            order_id: id.to_string(),
            balance: next,
        })
    }

    async fn balance(&self, user_id: &str) -> EngineResult<Balance> {
        let row: Option<(i64, i64)> =
            sqlx::query_as("SELECT available, locked FROM balances WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(row
            .map(|(available, locked)| Balance { available, locked })
            .unwrap_or_default())
    }

    async fn entries_for(&self, bill_ref: &str) -> EngineResult<Vec<LedgerEntry>> {
        crate::database::fetch_entries(&self.pool, bill_ref).await
    }
}

impl PgWithdrawalStore {
    async fn stale_state(&self, id: i64, to: WithdrawalState) -> EngineError {
        match self.get(id).await {
            Ok(Some(order)) => EngineError::InvalidOrderState {
                from: order.state.to_string(),
                to: to.to_string(),
            },
            Ok(None) => EngineError::NotFound {
                order_id: id.to_string(),
            },
            Err(e) => e,
        }
    }
}
