//! Postgres route store behind the channel router's cache.

use crate::database::db_err;
use crate::error::{EngineError, EngineResult};
use crate::routing::{ChannelRoute, RouteStore};
use async_trait::async_trait;
use chrono::NaiveTime;
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};

#[derive(Debug, FromRow)]
struct ChannelRouteRow {
    method_id: i64,
    channel_id: i64,
    category_id: i64,
    provider: String,
    code: String,
    min_amount: Decimal,
    max_amount: Decimal,
    fixed_amounts: Option<String>,
    open_from: Option<NaiveTime>,
    open_until: Option<NaiveTime>,
    fee_rate: Decimal,
    bonus_rate: Decimal,
    enabled: bool,
}

impl ChannelRouteRow {
    fn into_domain(self) -> EngineResult<ChannelRoute> {
        let fixed_amounts = match self.fixed_amounts.as_deref() {
            None | Some("") => Vec::new(),
            Some(raw) => raw
                .split(',')
                .map(|part| {
                    part.trim().parse::<i64>().map_err(|_| {
                        EngineError::validation(format!(
                            "bad fixed amount '{}' on method {}",
                            part, self.method_id
                        ))
                    })
                })
                .collect::<EngineResult<Vec<i64>>>()?,
        };
        Ok(ChannelRoute {
            method_id: self.method_id,
            channel_id: self.channel_id,
            category_id: self.category_id,
            provider: self.provider,
            code: self.code,
            min_amount: self.min_amount,
            max_amount: self.max_amount,
            fixed_amounts,
            open_from: self.open_from,
            open_until: self.open_until,
            fee_rate: self.fee_rate,
            bonus_rate: self.bonus_rate,
            enabled: self.enabled,
        })
    }
}

pub struct PgRouteStore {
    pool: PgPool,
}

impl PgRouteStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RouteStore for PgRouteStore {
    async fn load_route(&self, method_id: i64) -> EngineResult<Option<ChannelRoute>> {
        let row: Option<ChannelRouteRow> = sqlx::query_as(
            "SELECT method_id, channel_id, category_id, provider, code, min_amount,
                    max_amount, fixed_amounts, open_from, open_until, fee_rate,
                    bonus_rate, enabled
             FROM channel_routes WHERE method_id = $1",
        )
        .bind(method_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(ChannelRouteRow::into_domain).transpose()
    }

    async fn load_methods_for_tier(&self, tier: i32) -> EngineResult<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT mt.method_id
             FROM method_tiers mt
             JOIN channel_routes cr ON cr.method_id = mt.method_id
             WHERE mt.tier = $1 AND cr.enabled
             ORDER BY mt.position",
        )
        .bind(tier)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
