//! Coordination substrate for the engine's ephemeral state: the per-order
//! mutual-exclusion lock, the abuse rate-limiter windows, and the
//! risk-reviewer ring. The engine only sees the `CoordinationStore` trait;
//! production runs against Redis, tests and local development against the
//! in-process implementation.

pub mod lock;
pub mod memory;
pub mod rate_limit;
pub mod redis;
pub mod risk_queue;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use lock::{OrderLockGuard, OrderLockService};
pub use memory::MemoryCoordinationStore;
pub use rate_limit::DepositAttemptLimiter;
pub use redis::RedisCoordinationStore;
pub use risk_queue::ReviewerRing;

#[derive(Debug, Clone, Error)]
pub enum CoordinationError {
    #[error("coordination store connection error: {0}")]
    Connection(String),

    #[error("coordination store command failed: {0}")]
    Command(String),
}

/// One member of a sorted window, ordered by ascending timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowEntry {
    pub member: String,
    pub at_millis: i64,
}

/// The coordination operations the engine needs: short-TTL locks, boolean
/// markers, sorted time windows, a rotating ring, plain lists, and single
/// values. Deliberately narrow so the engine's logic stays independent of
/// which store implements them.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Set-if-not-exists with a TTL. Returns false when the key is held.
    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, CoordinationError>;

    /// Best-effort delete of a held lock.
    async fn unlock(&self, key: &str) -> Result<(), CoordinationError>;

    async fn set_marker(&self, key: &str, ttl: Option<Duration>)
        -> Result<(), CoordinationError>;
    async fn marker_exists(&self, key: &str) -> Result<bool, CoordinationError>;
    async fn clear_marker(&self, key: &str) -> Result<(), CoordinationError>;

    async fn window_add(
        &self,
        key: &str,
        member: &str,
        at_millis: i64,
    ) -> Result<(), CoordinationError>;
    /// All window entries in ascending timestamp order.
    async fn window_entries(&self, key: &str) -> Result<Vec<WindowEntry>, CoordinationError>;
    async fn window_clear(&self, key: &str) -> Result<(), CoordinationError>;

    async fn ring_push(&self, key: &str, member: &str) -> Result<(), CoordinationError>;
    async fn ring_remove(&self, key: &str, member: &str) -> Result<(), CoordinationError>;
    async fn ring_len(&self, key: &str) -> Result<usize, CoordinationError>;
    /// Move the head of the ring to its tail and return it.
    async fn ring_rotate(&self, key: &str) -> Result<Option<String>, CoordinationError>;

    async fn list_push(&self, key: &str, member: &str) -> Result<(), CoordinationError>;
    async fn list_remove(&self, key: &str, member: &str) -> Result<(), CoordinationError>;
    async fn list_len(&self, key: &str) -> Result<usize, CoordinationError>;

    async fn get_value(&self, key: &str) -> Result<Option<String>, CoordinationError>;
    async fn set_value(&self, key: &str, value: &str) -> Result<(), CoordinationError>;
}
