//! Pure ledger arithmetic.
//!
//! Entry plans describe the balance movements of one settlement without
//! touching storage; the Postgres and in-memory stores both apply them
//! inside their own transaction, filling in the before/after snapshots from
//! the row they hold locked. Keeping the arithmetic here means the two
//! stores cannot drift apart on settlement semantics.

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which sub-balance an entry moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Account {
    Available,
    Locked,
}

impl Account {
    pub fn as_str(&self) -> &'static str {
        match self {
            Account::Available => "available",
            Account::Locked => "locked",
        }
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CashType {
    Deposit,
    DepositBonus,
    Withdraw,
    WithdrawHold,
    WithdrawRefund,
    Fee,
    ManualAdjust,
}

impl CashType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CashType::Deposit => "deposit",
            CashType::DepositBonus => "deposit_bonus",
            CashType::Withdraw => "withdraw",
            CashType::WithdrawHold => "withdraw_hold",
            CashType::WithdrawRefund => "withdraw_refund",
            CashType::Fee => "fee",
            CashType::ManualAdjust => "manual_adjust",
        }
    }
}

impl fmt::Display for CashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One movement a settlement wants to make, before snapshots are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEntry {
    pub account: Account,
    pub delta: i64,
    pub cash_type: CashType,
    pub remark: String,
}

/// A persisted ledger row. Append-only; `after = before + delta` always.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub id: i64,
    pub user_id: String,
    pub account: Account,
    pub before: i64,
    pub after: i64,
    pub delta: i64,
    pub bill_ref: String,
    pub cash_type: CashType,
    pub remark: String,
    pub created_at: DateTime<Utc>,
}

/// Per-user balance snapshot the stores row-lock before applying a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Balance {
    pub available: i64,
    pub locked: i64,
}

impl Balance {
    pub fn of(&self, account: Account) -> i64 {
        match account {
            Account::Available => self.available,
            Account::Locked => self.locked,
        }
    }

    fn set(&mut self, account: Account, value: i64) {
        match account {
            Account::Available => self.available = value,
            Account::Locked => self.locked = value,
        }
    }
}

/// Apply a plan to a balance, yielding the new balance and the snapshot
/// (before, after) pairs in plan order. Fails without partial effect when
/// any step would drive a sub-balance negative.
pub fn apply_plan(
    balance: Balance,
    plan: &[PlannedEntry],
) -> EngineResult<(Balance, Vec<(i64, i64)>)> {
    let mut next = balance;
    let mut snapshots = Vec::with_capacity(plan.len());
    for entry in plan {
        let before = next.of(entry.account);
        let after = before + entry.delta;
        if after < 0 {
            return Err(EngineError::InsufficientBalance {
                available: before,
                required: -entry.delta,
            });
        }
        next.set(entry.account, after);
        snapshots.push((before, after));
    }
    Ok((next, snapshots))
}

/// Deposit settlement: credit the settled amount, plus an optional bonus.
pub fn plan_deposit_success(amount: i64, bonus: i64, order_id: &str) -> Vec<PlannedEntry> {
    let mut plan = vec![PlannedEntry {
        account: Account::Available,
        delta: amount,
        cash_type: CashType::Deposit,
        remark: format!("deposit {}", order_id),
    }];
    if bonus > 0 {
        plan.push(PlannedEntry {
            account: Account::Available,
            delta: bonus,
            cash_type: CashType::DepositBonus,
            remark: format!("deposit bonus {}", order_id),
        });
    }
    plan
}

/// Withdrawal creation: move the amount from available into the locked hold.
pub fn plan_withdrawal_hold(amount: i64, order_id: &str) -> Vec<PlannedEntry> {
    vec![
        PlannedEntry {
            account: Account::Available,
            delta: -amount,
            cash_type: CashType::WithdrawHold,
            remark: format!("withdraw hold {}", order_id),
        },
        PlannedEntry {
            account: Account::Locked,
            delta: amount,
            cash_type: CashType::WithdrawHold,
            remark: format!("withdraw hold {}", order_id),
        },
    ]
}

/// Withdrawal success: release the hold; the money has left the platform.
pub fn plan_withdrawal_success(amount: i64, order_id: &str) -> Vec<PlannedEntry> {
    vec![PlannedEntry {
        account: Account::Locked,
        delta: -amount,
        cash_type: CashType::Withdraw,
        remark: format!("withdraw {}", order_id),
    }]
}

/// Withdrawal rejection or failure: return the held amount to available.
pub fn plan_withdrawal_refund(amount: i64, order_id: &str) -> Vec<PlannedEntry> {
    vec![
        PlannedEntry {
            account: Account::Locked,
            delta: -amount,
            cash_type: CashType::WithdrawRefund,
            remark: format!("withdraw refund {}", order_id),
        },
        PlannedEntry {
            account: Account::Available,
            delta: amount,
            cash_type: CashType::WithdrawRefund,
            remark: format!("withdraw refund {}", order_id),
        },
    ]
}
