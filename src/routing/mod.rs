//! Channel routing: which provider and channel a payment method maps to,
//! what amounts it accepts, and when it is open.
//!
//! Routes change rarely and are read on every order creation, so the router
//! keeps a write-through in-process cache in front of the backing store.
//! The admin layer calls `invalidate`/`invalidate_all` after editing routes.

use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Timelike, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// One payment-method route as configured by operations.
#[derive(Debug, Clone)]
pub struct ChannelRoute {
    pub method_id: i64,
    pub channel_id: i64,
    pub category_id: i64,
    pub provider: String,
    /// Channel code passed through to the gateway.
    pub code: String,
    /// Inclusive bounds in major units.
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    /// When non-empty, only these exact minor-unit amounts are accepted.
    pub fixed_amounts: Vec<i64>,
    /// Daily open window; `None` means always open.
    pub open_from: Option<NaiveTime>,
    pub open_until: Option<NaiveTime>,
    pub fee_rate: Decimal,
    pub bonus_rate: Decimal,
    pub enabled: bool,
}

impl ChannelRoute {
    /// Whether the channel accepts orders at the given instant.
    pub fn is_open_at(&self, at: DateTime<Utc>) -> bool {
        let (Some(from), Some(until)) = (self.open_from, self.open_until) else {
            return true;
        };
        let now = NaiveTime::from_hms_opt(at.hour(), at.minute(), at.second())
            .unwrap_or(from);
        if from <= until {
            now >= from && now <= until
        } else {
            // Window wraps midnight.
            now >= from || now <= until
        }
    }

    /// Validate a minor-unit amount against the fixed list or the range.
    pub fn validate_amount(&self, amount: i64) -> EngineResult<()> {
        if !self.fixed_amounts.is_empty() {
            if self.fixed_amounts.contains(&amount) {
                return Ok(());
            }
            return Err(EngineError::AmountOutOfRange {
                amount,
                min: self.min_amount.to_string(),
                max: self.max_amount.to_string(),
            });
        }
        let value = Decimal::new(amount, 2);
        if value < self.min_amount || value > self.max_amount {
            return Err(EngineError::AmountOutOfRange {
                amount,
                min: self.min_amount.to_string(),
                max: self.max_amount.to_string(),
            });
        }
        Ok(())
    }
}

/// Backing store the router reads through. Postgres in production, an
/// in-memory map in tests.
#[async_trait]
pub trait RouteStore: Send + Sync {
    async fn load_route(&self, method_id: i64) -> EngineResult<Option<ChannelRoute>>;
    /// Method ids visible to a user tier, in display order.
    async fn load_methods_for_tier(&self, tier: i32) -> EngineResult<Vec<i64>>;
}

pub struct ChannelRouter {
    store: Arc<dyn RouteStore>,
    routes: RwLock<HashMap<i64, Arc<ChannelRoute>>>,
    tiers: RwLock<HashMap<i32, Arc<Vec<i64>>>>,
}

impl ChannelRouter {
    pub fn new(store: Arc<dyn RouteStore>) -> Self {
        Self {
            store,
            routes: RwLock::new(HashMap::new()),
            tiers: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a route, serving from cache when warm.
    pub async fn route(&self, method_id: i64) -> EngineResult<Arc<ChannelRoute>> {
        if let Some(route) = self.routes.read().await.get(&method_id) {
            return Ok(route.clone());
        }

        let loaded = self.store.load_route(method_id).await?.ok_or_else(|| {
            EngineError::validation(format!("unknown payment method {}", method_id))
        })?;
        if !loaded.enabled {
            return Err(EngineError::validation(format!(
                "payment method {} is disabled",
                method_id
            )));
        }
        debug!(method_id, provider = %loaded.provider, "Route cached");
        let route = Arc::new(loaded);
        self.routes
            .write()
            .await
            .insert(method_id, route.clone());
        Ok(route)
    }

    pub async fn methods_for_tier(&self, tier: i32) -> EngineResult<Arc<Vec<i64>>> {
        if let Some(methods) = self.tiers.read().await.get(&tier) {
            return Ok(methods.clone());
        }
        let methods = Arc::new(self.store.load_methods_for_tier(tier).await?);
        self.tiers.write().await.insert(tier, methods.clone());
        Ok(methods)
    }

    /// Drop one method from the cache after an admin edit.
    pub async fn invalidate(&self, method_id: i64) {
        self.routes.write().await.remove(&method_id);
        self.tiers.write().await.clear();
    }

    pub async fn invalidate_all(&self) {
        self.routes.write().await.clear();
        self.tiers.write().await.clear();
    }
}
