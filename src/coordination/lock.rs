//! Per-order mutual exclusion.
//!
//! Every state-mutating operation on an order runs under `lock:order:{id}`
//! with a short TTL, so a crashed holder can never wedge the order forever.
//! A busy lock is surfaced as `LockBusy` and the caller retries later.

use crate::coordination::CoordinationStore;
use crate::error::{EngineError, EngineResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct OrderLockService {
    store: Arc<dyn CoordinationStore>,
    ttl: Duration,
}

impl OrderLockService {
    pub fn new(store: Arc<dyn CoordinationStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Acquire the lock for an order or fail fast with `LockBusy`.
    pub async fn acquire(&self, order_id: &str) -> EngineResult<OrderLockGuard> {
        let key = format!("lock:order:{}", order_id);
        let acquired = self.store.try_lock(&key, self.ttl).await?;
        if !acquired {
            return Err(EngineError::LockBusy { key });
        }
        Ok(OrderLockGuard {
            store: self.store.clone(),
            key: Some(key),
        })
    }
}

/// Held lock on one order. Prefer calling `release` explicitly; if the guard
/// is dropped without it, a best-effort async unlock is spawned and the TTL
/// covers the case where that task never runs.
pub struct OrderLockGuard {
    store: Arc<dyn CoordinationStore>,
    key: Option<String>,
}

impl OrderLockGuard {
    pub async fn release(mut self) -> EngineResult<()> {
        if let Some(key) = self.key.take() {
            self.store.unlock(&key).await?;
        }
        Ok(())
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}

impl Drop for OrderLockGuard {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let store = self.store.clone();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = store.unlock(&key).await {
                        warn!("Best-effort unlock of {} failed: {}", key, e);
                    }
                });
            }
        }
    }
}
