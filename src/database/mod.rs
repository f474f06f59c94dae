//! Postgres persistence: pool management plus the store implementations the
//! engines run against in production. Every balance-affecting mutation is a
//! single transaction holding `FOR UPDATE` on the balance row.

pub mod deposit_orders;
pub mod error;
pub mod routes;
pub mod withdrawal_orders;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use tracing::{error as log_error, info, warn};

pub use self::deposit_orders::PgDepositStore;
pub use self::error::DatabaseError;
pub use self::routes::PgRouteStore;
pub use self::withdrawal_orders::PgWithdrawalStore;

use crate::config::DatabaseConfig;
use crate::engine::ledger::{Balance, PlannedEntry};
use crate::error::{EngineError, EngineResult};

/// Database pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            min_connections: 5,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// Initialize the database connection pool
pub async fn init_pool(
    database_url: &str,
    config: Option<PoolConfig>,
) -> Result<PgPool, DatabaseError> {
    let config = config.unwrap_or_default();

    info!(
        "Initializing database pool: max_connections={}, min_connections={}, connection_timeout={:?}",
        config.max_connections, config.min_connections, config.connection_timeout
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connection_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect(database_url)
        .await
        .map_err(|e| {
            log_error!("Failed to initialize database pool: {}", e);
            DatabaseError::from_sqlx(e)
        })?;

    // Test the connection
    pool.acquire().await.map_err(|e| {
        log_error!("Failed to acquire test connection: {}", e);
        DatabaseError::from_sqlx(e)
    })?;

    info!("Database pool initialized successfully");
    Ok(pool)
}

/// Connection pool health check
pub async fn health_check(pool: &PgPool) -> Result<(), DatabaseError> {
    let _result = sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| {
        warn!("Health check failed: {}", e);
        DatabaseError::from_sqlx(e)
    })?;

    Ok(())
}

/// Initialize the database pool from application configuration
pub async fn init_pool_from_config(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
    let pool_config = PoolConfig {
        max_connections: config.max_connections,
        min_connections: config.min_connections,
        connection_timeout: Duration::from_secs(config.connection_timeout),
        idle_timeout: Duration::from_secs(config.idle_timeout.unwrap_or(600)),
        max_lifetime: Duration::from_secs(1800),
    };

    init_pool(&config.url, Some(pool_config)).await
}

pub(crate) fn db_err(e: sqlx::Error) -> EngineError {
    EngineError::Database(DatabaseError::from_sqlx(e))
}

/// Lock the user's balance row, creating it on first use. Serializes all
/// balance mutations for the user for the rest of the transaction.
pub(crate) async fn lock_balance(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &str,
) -> EngineResult<Balance> {
    sqlx::query("INSERT INTO balances (user_id, available, locked) VALUES ($1, 0, 0) ON CONFLICT (user_id) DO NOTHING")
        .bind(user_id)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;

    let (available, locked): (i64, i64) =
        sqlx::query_as("SELECT available, locked FROM balances WHERE user_id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_one(&mut **tx)
            .await
            .map_err(db_err)?;

    Ok(Balance { available, locked })
}

/// Write the post-plan balance and append the planned ledger entries with
/// their before/after snapshots, all inside the caller's transaction.
pub(crate) async fn apply_entries(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &str,
    bill_ref: &str,
    balance: Balance,
    plan: &[PlannedEntry],
) -> EngineResult<Balance> {
    let (next, snapshots) = crate::engine::ledger::apply_plan(balance, plan)?;

    for (entry, (before, after)) in plan.iter().zip(snapshots.iter()) {
        sqlx::query(
            "INSERT INTO ledger_entries
             (user_id, account, before_amount, after_amount, delta, bill_ref, cash_type, remark)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(user_id)
        .bind(entry.account.as_str())
        .bind(before)
        .bind(after)
        .bind(entry.delta)
        .bind(bill_ref)
        .bind(entry.cash_type.as_str())
        .bind(&entry.remark)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    }

    sqlx::query("UPDATE balances SET available = $2, locked = $3 WHERE user_id = $1")
        .bind(user_id)
        .bind(next.available)
        .bind(next.locked)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;

    Ok(next)
}

/// Ledger rows for one order, oldest first.
pub(crate) async fn fetch_entries(
    pool: &PgPool,
    bill_ref: &str,
) -> EngineResult<Vec<crate::engine::ledger::LedgerEntry>> {
    let rows: Vec<deposit_orders::LedgerEntryRow> = sqlx::query_as(
        "SELECT id, user_id, account, before_amount, after_amount, delta,
                bill_ref, cash_type, remark, created_at
         FROM ledger_entries WHERE bill_ref = $1 ORDER BY id",
    )
    .bind(bill_ref)
    .fetch_all(pool)
    .await
    .map_err(db_err)?;
    rows.into_iter()
        .map(deposit_orders::LedgerEntryRow::into_domain)
        .collect()
}

pub(crate) async fn commit(tx: Transaction<'_, Postgres>) -> EngineResult<()> {
    tx.commit().await.map_err(|e| EngineError::TransactionFailed {
        message: e.to_string(),
    })
}
