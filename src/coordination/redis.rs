//! Redis-backed coordination store.
//!
//! Mapping of trait operations onto Redis primitives:
//! - locks: `SET key value NX EX ttl` / `DEL`
//! - markers: `SET` (optionally `EX`) / `EXISTS` / `DEL`
//! - windows: sorted sets scored by epoch millis (`ZADD` / `ZRANGE WITHSCORES`)
//! - rings: lists rotated with `LMOVE key key LEFT RIGHT`
//! - lists and values: plain `RPUSH`/`LREM`/`LLEN` and `GET`/`SET`

use crate::coordination::{CoordinationError, CoordinationStore, WindowEntry};
use async_trait::async_trait;
use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use redis::Client;
use std::time::Duration;
use tracing::{error, info, warn};

pub type CoordinationPool = Pool<RedisConnectionManager>;

#[derive(Debug, Clone)]
pub struct CoordinationPoolConfig {
    pub redis_url: String,
    pub max_connections: u32,
    pub min_idle: u32,
    pub connection_timeout: Duration,
}

impl Default for CoordinationPoolConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            max_connections: 20,
            min_idle: 5,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

/// Initialize the Redis pool the coordination store runs on.
pub async fn init_coordination_pool(
    config: CoordinationPoolConfig,
) -> Result<CoordinationPool, CoordinationError> {
    info!(
        "Initializing coordination pool: max_connections={}, redis_url={}",
        config.max_connections, config.redis_url
    );

    let _client = Client::open(config.redis_url.clone()).map_err(|e| {
        error!("Failed to create Redis client: {}", e);
        CoordinationError::Connection(e.to_string())
    })?;

    let manager = RedisConnectionManager::new(config.redis_url.as_str()).map_err(|e| {
        error!("Failed to create Redis connection manager: {}", e);
        CoordinationError::Connection(e.to_string())
    })?;

    let pool = Pool::builder()
        .max_size(config.max_connections)
        .min_idle(config.min_idle)
        .connection_timeout(config.connection_timeout)
        .build(manager)
        .await
        .map_err(|e| {
            error!("Failed to build Redis connection pool: {}", e);
            CoordinationError::Connection(e.to_string())
        })?;

    if let Err(e) = ping(&pool).await {
        warn!("Initial Redis connection test failed, but continuing: {}", e);
    }

    info!("Coordination pool initialized successfully");
    Ok(pool)
}

async fn ping(pool: &CoordinationPool) -> Result<(), CoordinationError> {
    let mut conn = pool
        .get()
        .await
        .map_err(|e| CoordinationError::Connection(e.to_string()))?;
    let _: String = redis::cmd("PING")
        .query_async(&mut *conn)
        .await
        .map_err(|e| CoordinationError::Connection(e.to_string()))?;
    Ok(())
}

pub struct RedisCoordinationStore {
    pool: CoordinationPool,
}

impl RedisCoordinationStore {
    pub fn new(pool: CoordinationPool) -> Self {
        Self { pool }
    }

    pub async fn health_check(&self) -> Result<(), CoordinationError> {
        ping(&self.pool).await
    }

    async fn conn(
        &self,
    ) -> Result<bb8::PooledConnection<'_, RedisConnectionManager>, CoordinationError> {
        self.pool
            .get()
            .await
            .map_err(|e| CoordinationError::Connection(e.to_string()))
    }
}

fn command_err(e: redis::RedisError) -> CoordinationError {
    CoordinationError::Command(e.to_string())
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, CoordinationError> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut *conn)
            .await
            .map_err(command_err)?;
        Ok(reply.is_some())
    }

    async fn unlock(&self, key: &str) -> Result<(), CoordinationError> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut *conn)
            .await
            .map_err(command_err)?;
        Ok(())
    }

    async fn set_marker(
        &self,
        key: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CoordinationError> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg("1");
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        let _: String = cmd.query_async(&mut *conn).await.map_err(command_err)?;
        Ok(())
    }

    async fn marker_exists(&self, key: &str) -> Result<bool, CoordinationError> {
        let mut conn = self.conn().await?;
        let exists: i64 = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut *conn)
            .await
            .map_err(command_err)?;
        Ok(exists > 0)
    }

    async fn clear_marker(&self, key: &str) -> Result<(), CoordinationError> {
        self.unlock(key).await
    }

    async fn window_add(
        &self,
        key: &str,
        member: &str,
        at_millis: i64,
    ) -> Result<(), CoordinationError> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("ZADD")
            .arg(key)
            .arg(at_millis)
            .arg(member)
            .query_async(&mut *conn)
            .await
            .map_err(command_err)?;
        Ok(())
    }

    async fn window_entries(&self, key: &str) -> Result<Vec<WindowEntry>, CoordinationError> {
        let mut conn = self.conn().await?;
        let raw: Vec<(String, i64)> = redis::cmd("ZRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .arg("WITHSCORES")
            .query_async(&mut *conn)
            .await
            .map_err(command_err)?;
        Ok(raw
            .into_iter()
            .map(|(member, at_millis)| WindowEntry { member, at_millis })
            .collect())
    }

    async fn window_clear(&self, key: &str) -> Result<(), CoordinationError> {
        self.unlock(key).await
    }

    async fn ring_push(&self, key: &str, member: &str) -> Result<(), CoordinationError> {
        let mut conn = self.conn().await?;
        // Remove first so a re-added reviewer is not listed twice.
        let _: i64 = redis::cmd("LREM")
            .arg(key)
            .arg(0)
            .arg(member)
            .query_async(&mut *conn)
            .await
            .map_err(command_err)?;
        let _: i64 = redis::cmd("RPUSH")
            .arg(key)
            .arg(member)
            .query_async(&mut *conn)
            .await
            .map_err(command_err)?;
        Ok(())
    }

    async fn ring_remove(&self, key: &str, member: &str) -> Result<(), CoordinationError> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("LREM")
            .arg(key)
            .arg(0)
            .arg(member)
            .query_async(&mut *conn)
            .await
            .map_err(command_err)?;
        Ok(())
    }

    async fn ring_len(&self, key: &str) -> Result<usize, CoordinationError> {
        self.list_len(key).await
    }

    async fn ring_rotate(&self, key: &str) -> Result<Option<String>, CoordinationError> {
        let mut conn = self.conn().await?;
        let member: Option<String> = redis::cmd("LMOVE")
            .arg(key)
            .arg(key)
            .arg("LEFT")
            .arg("RIGHT")
            .query_async(&mut *conn)
            .await
            .map_err(command_err)?;
        Ok(member)
    }

    async fn list_push(&self, key: &str, member: &str) -> Result<(), CoordinationError> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("RPUSH")
            .arg(key)
            .arg(member)
            .query_async(&mut *conn)
            .await
            .map_err(command_err)?;
        Ok(())
    }

    async fn list_remove(&self, key: &str, member: &str) -> Result<(), CoordinationError> {
        self.ring_remove(key, member).await
    }

    async fn list_len(&self, key: &str) -> Result<usize, CoordinationError> {
        let mut conn = self.conn().await?;
        let len: i64 = redis::cmd("LLEN")
            .arg(key)
            .query_async(&mut *conn)
            .await
            .map_err(command_err)?;
        Ok(len.max(0) as usize)
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>, CoordinationError> {
        let mut conn = self.conn().await?;
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut *conn)
            .await
            .map_err(command_err)?;
        Ok(value)
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<(), CoordinationError> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut *conn)
            .await
            .map_err(command_err)?;
        Ok(())
    }
}
