//! In-process coordination store used by the test suites and
//! `SKIP_EXTERNALS`-style local runs. Semantics mirror the Redis
//! implementation, including lock TTL expiry.

use crate::coordination::{CoordinationError, CoordinationStore, WindowEntry};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Inner {
    locks: HashMap<String, Instant>,
    markers: HashMap<String, Option<Instant>>,
    windows: HashMap<String, Vec<WindowEntry>>,
    rings: HashMap<String, VecDeque<String>>,
    lists: HashMap<String, Vec<String>>,
    values: HashMap<String, String>,
}

#[derive(Default)]
pub struct MemoryCoordinationStore {
    inner: Mutex<Inner>,
}

impl MemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_inner(&self) -> Result<std::sync::MutexGuard<'_, Inner>, CoordinationError> {
        self.inner
            .lock()
            .map_err(|_| CoordinationError::Command("memory store poisoned".to_string()))
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, CoordinationError> {
        let mut inner = self.lock_inner()?;
        let now = Instant::now();
        match inner.locks.get(key) {
            Some(expiry) if *expiry > now => Ok(false),
            _ => {
                inner.locks.insert(key.to_string(), now + ttl);
                Ok(true)
            }
        }
    }

    async fn unlock(&self, key: &str) -> Result<(), CoordinationError> {
        self.lock_inner()?.locks.remove(key);
        Ok(())
    }

    async fn set_marker(
        &self,
        key: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CoordinationError> {
        let expiry = ttl.map(|t| Instant::now() + t);
        self.lock_inner()?.markers.insert(key.to_string(), expiry);
        Ok(())
    }

    async fn marker_exists(&self, key: &str) -> Result<bool, CoordinationError> {
        let mut inner = self.lock_inner()?;
        match inner.markers.get(key) {
            Some(Some(expiry)) if *expiry <= Instant::now() => {
                inner.markers.remove(key);
                Ok(false)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    async fn clear_marker(&self, key: &str) -> Result<(), CoordinationError> {
        self.lock_inner()?.markers.remove(key);
        Ok(())
    }

    async fn window_add(
        &self,
        key: &str,
        member: &str,
        at_millis: i64,
    ) -> Result<(), CoordinationError> {
        let mut inner = self.lock_inner()?;
        let window = inner.windows.entry(key.to_string()).or_default();
        window.push(WindowEntry {
            member: member.to_string(),
            at_millis,
        });
        window.sort_by_key(|e| e.at_millis);
        Ok(())
    }

    async fn window_entries(&self, key: &str) -> Result<Vec<WindowEntry>, CoordinationError> {
        Ok(self
            .lock_inner()?
            .windows
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn window_clear(&self, key: &str) -> Result<(), CoordinationError> {
        self.lock_inner()?.windows.remove(key);
        Ok(())
    }

    async fn ring_push(&self, key: &str, member: &str) -> Result<(), CoordinationError> {
        let mut inner = self.lock_inner()?;
        let ring = inner.rings.entry(key.to_string()).or_default();
        if !ring.iter().any(|m| m == member) {
            ring.push_back(member.to_string());
        }
        Ok(())
    }

    async fn ring_remove(&self, key: &str, member: &str) -> Result<(), CoordinationError> {
        let mut inner = self.lock_inner()?;
        if let Some(ring) = inner.rings.get_mut(key) {
            ring.retain(|m| m != member);
        }
        Ok(())
    }

    async fn ring_len(&self, key: &str) -> Result<usize, CoordinationError> {
        Ok(self
            .lock_inner()?
            .rings
            .get(key)
            .map(|r| r.len())
            .unwrap_or(0))
    }

    async fn ring_rotate(&self, key: &str) -> Result<Option<String>, CoordinationError> {
        let mut inner = self.lock_inner()?;
        let Some(ring) = inner.rings.get_mut(key) else {
            return Ok(None);
        };
        let Some(member) = ring.pop_front() else {
            return Ok(None);
        };
        ring.push_back(member.clone());
        Ok(Some(member))
    }

    async fn list_push(&self, key: &str, member: &str) -> Result<(), CoordinationError> {
        self.lock_inner()?
            .lists
            .entry(key.to_string())
            .or_default()
            .push(member.to_string());
        Ok(())
    }

    async fn list_remove(&self, key: &str, member: &str) -> Result<(), CoordinationError> {
        let mut inner = self.lock_inner()?;
        if let Some(list) = inner.lists.get_mut(key) {
            list.retain(|m| m != member);
        }
        Ok(())
    }

    async fn list_len(&self, key: &str) -> Result<usize, CoordinationError> {
        Ok(self
            .lock_inner()?
            .lists
            .get(key)
            .map(|l| l.len())
            .unwrap_or(0))
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>, CoordinationError> {
        Ok(self.lock_inner()?.values.get(key).cloned())
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<(), CoordinationError> {
        self.lock_inner()?
            .values
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
