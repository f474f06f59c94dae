//! Postgres deposit store. Settlement is one transaction: the order row,
//! the balance row, and the ledger entries commit together or not at all.

use crate::database::{apply_entries, commit, db_err, lock_balance};
use crate::engine::ledger::{self, Account, Balance, CashType, LedgerEntry};
use crate::engine::state::DepositState;
use crate::engine::store::{
    DepositOrder, DepositSettlement, DepositStore, NewDepositOrder, SettlementReceipt,
};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

const ORDER_COLUMNS: &str = "order_id, external_order_id, chain_id, user_id, method_id, \
     channel_id, provider, amount, settled_amount, state, automatic, remark, \
     crypto_address, crypto_hash, crypto_rate, created_at, confirmed_at, confirmed_by";

#[derive(Debug, FromRow)]
struct DepositOrderRow {
    order_id: String,
    external_order_id: Option<String>,
    chain_id: String,
    user_id: String,
    method_id: i64,
    channel_id: i64,
    provider: String,
    amount: i64,
    settled_amount: Option<i64>,
    state: String,
    automatic: bool,
    remark: Option<String>,
    crypto_address: Option<String>,
    crypto_hash: Option<String>,
    crypto_rate: Option<String>,
    created_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
    confirmed_by: Option<String>,
}

impl DepositOrderRow {
    fn into_domain(self) -> EngineResult<DepositOrder> {
        Ok(DepositOrder {
            state: DepositState::from_str(&self.state)?,
            order_id: self.order_id,
            external_order_id: self.external_order_id,
            chain_id: self.chain_id,
            user_id: self.user_id,
            method_id: self.method_id,
            channel_id: self.channel_id,
            provider: self.provider,
            amount: self.amount,
            settled_amount: self.settled_amount,
            automatic: self.automatic,
            remark: self.remark,
            crypto_address: self.crypto_address,
            crypto_hash: self.crypto_hash,
            crypto_rate: self.crypto_rate,
            created_at: self.created_at,
            confirmed_at: self.confirmed_at,
            confirmed_by: self.confirmed_by,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct LedgerEntryRow {
    id: i64,
    user_id: String,
    account: String,
    before_amount: i64,
    after_amount: i64,
    delta: i64,
    bill_ref: String,
    cash_type: String,
    remark: String,
    created_at: DateTime<Utc>,
}

impl LedgerEntryRow {
    pub(crate) fn into_domain(self) -> EngineResult<LedgerEntry> {
        let account = match self.account.as_str() {
            "available" => Account::Available,
            "locked" => Account::Locked,
            other => {
                return Err(EngineError::validation(format!(
                    "unknown ledger account '{}'",
                    other
                )))
            }
        };
        let cash_type = match self.cash_type.as_str() {
            "deposit" => CashType::Deposit,
            "deposit_bonus" => CashType::DepositBonus,
            "withdraw" => CashType::Withdraw,
            "withdraw_hold" => CashType::WithdrawHold,
            "withdraw_refund" => CashType::WithdrawRefund,
            "fee" => CashType::Fee,
            "manual_adjust" => CashType::ManualAdjust,
            other => {
                return Err(EngineError::validation(format!(
                    "unknown cash type '{}'",
                    other
                )))
            }
        };
        Ok(LedgerEntry {
            id: self.id,
            user_id: self.user_id,
            account,
            before: self.before_amount,
            after: self.after_amount,
            delta: self.delta,
            bill_ref: self.bill_ref,
            cash_type,
            remark: self.remark,
            created_at: self.created_at,
        })
    }
}

pub struct PgDepositStore {
    pool: PgPool,
}

impl PgDepositStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DepositStore for PgDepositStore {
    async fn create(&self, order: NewDepositOrder) -> EngineResult<DepositOrder> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let settled: Option<(String,)> = sqlx::query_as(
            "SELECT order_id FROM deposit_orders WHERE chain_id = $1 AND state = 'success' LIMIT 1",
        )
        .bind(&order.chain_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        if let Some((existing,)) = settled {
            return Err(EngineError::validation(format!(
                "chain {} already settled by order {}",
                order.chain_id, existing
            )));
        }

        let row: DepositOrderRow = sqlx::query_as(&format!(
            "INSERT INTO deposit_orders
             (order_id, external_order_id, chain_id, user_id, method_id, channel_id,
              provider, amount, state, automatic, remark, crypto_address, crypto_rate)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'confirming', $9, $10, $11, $12)
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(&order.order_id)
        .bind(&order.external_order_id)
        .bind(&order.chain_id)
        .bind(&order.user_id)
        .bind(order.method_id)
        .bind(order.channel_id)
        .bind(&order.provider)
        .bind(order.amount)
        .bind(order.automatic)
        .bind(&order.remark)
        .bind(&order.crypto_address)
        .bind(&order.crypto_rate)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        commit(tx).await?;
        row.into_domain()
    }

    async fn get(&self, order_id: &str) -> EngineResult<Option<DepositOrder>> {
        let row: Option<DepositOrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM deposit_orders WHERE order_id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(DepositOrderRow::into_domain).transpose()
    }

    async fn has_chain_success(&self, chain_id: &str) -> EngineResult<bool> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM deposit_orders WHERE chain_id = $1 AND state = 'success'",
        )
        .bind(chain_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(count > 0)
    }

    async fn mark_cancelled(
        &self,
        order_id: &str,
        from: DepositState,
        confirmed_by: &str,
    ) -> EngineResult<DepositOrder> {
        let row: Option<DepositOrderRow> = sqlx::query_as(&format!(
            "UPDATE deposit_orders
             SET state = 'cancelled', confirmed_at = NOW(), confirmed_by = $3
             WHERE order_id = $1 AND state = $2
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order_id)
        .bind(from.as_str())
        .bind(confirmed_by)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => row.into_domain(),
            None => Err(stale_state(self, order_id, DepositState::Cancelled).await),
        }
    }

    async fn mark_reviewing(
        &self,
        order_id: &str,
        settled_amount: i64,
        crypto_hash: Option<String>,
    ) -> EngineResult<DepositOrder> {
        let row: Option<DepositOrderRow> = sqlx::query_as(&format!(
            "UPDATE deposit_orders
             SET state = 'reviewing', settled_amount = $2,
                 crypto_hash = COALESCE($3, crypto_hash)
             WHERE order_id = $1 AND state = 'confirming'
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order_id)
        .bind(settled_amount)
        .bind(&crypto_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => row.into_domain(),
            None => Err(stale_state(self, order_id, DepositState::Reviewing).await),
        }
    }

    async fn settle_success(
        &self,
        settlement: DepositSettlement,
        from: DepositState,
    ) -> EngineResult<SettlementReceipt> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row: Option<DepositOrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM deposit_orders WHERE order_id = $1 FOR UPDATE"
        ))
        .bind(&settlement.order_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        let order = row
            .ok_or_else(|| EngineError::NotFound {
                order_id: settlement.order_id.clone(),
            })?
            .into_domain()?;

        if order.state != from {
            return Err(EngineError::InvalidOrderState {
                from: order.state.to_string(),
                to: DepositState::Success.to_string(),
            });
        }
        order.state.ensure_transition(DepositState::Success)?;

        // Re-check under the row lock: at most one Success per chain.
        let settled: Option<(String,)> = sqlx::query_as(
            "SELECT order_id FROM deposit_orders WHERE chain_id = $1 AND state = 'success' LIMIT 1",
        )
        .bind(&order.chain_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        if let Some((existing,)) = settled {
            return Err(EngineError::DuplicateNotification {
                order_id: existing,
            });
        }

        let balance = lock_balance(&mut tx, &order.user_id).await?;
        let plan = ledger::plan_deposit_success(
            settlement.settled_amount,
            settlement.bonus,
            &order.order_id,
        );
        let next = apply_entries(&mut tx, &order.user_id, &order.order_id, balance, &plan).await?;

        sqlx::query(
            "UPDATE deposit_orders
             SET state = 'success', settled_amount = $2, confirmed_at = NOW(),
                 confirmed_by = $3, crypto_hash = COALESCE($4, crypto_hash)
             WHERE order_id = $1",
        )
        .bind(&order.order_id)
        .bind(settlement.settled_amount)
        .bind(&settlement.confirmed_by)
        .bind(&settlement.crypto_hash)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        commit(tx).await?;
        Ok(SettlementReceipt {
            order_id: order.order_id,
            balance: next,
        })
    }

    async fn success_count_for_user(&self, user_id: &str) -> EngineResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM deposit_orders WHERE user_id = $1 AND state = 'success'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(count)
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

/// A compare-and-set update matched no row; report the current state or a
/// missing order.
async fn stale_state(
    store: &PgDepositStore,
    order_id: &str,
    to: DepositState,
) -> EngineError {
    match store.get(order_id).await {
        Ok(Some(order)) => EngineError::InvalidOrderState {
            from: order.state.to_string(),
            to: to.to_string(),
        },
        Ok(None) => EngineError::NotFound {
            order_id: order_id.to_string(),
        },
        Err(e) => e,
    }
}
