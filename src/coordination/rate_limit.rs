//! Deposit-attempt abuse limiter.
//!
//! Every deposit creation is recorded into a per-user window keyed
//! `deposit:attempts:{user}`. Two escalation tiers apply on the way in:
//! 10 attempts inside five minutes earns a five-minute block, and every
//! fifth attempt past ten inside twenty-four hours earns a day-long block.
//! The window and any block are cleared only when a deposit settles
//! successfully, so a paying user starts fresh. Operators can also block
//! and unblock a user by hand.

use crate::coordination::CoordinationStore;
use crate::error::{EngineError, EngineResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const TIER1_COUNT: usize = 10;
const TIER1_WINDOW_SECS: i64 = 300;
const TIER1_BLOCK_SECS: u64 = 300;

const TIER2_STEP: usize = 5;
const TIER2_WINDOW_SECS: i64 = 86_400;
const TIER2_BLOCK_SECS: u64 = 86_400;

pub struct DepositAttemptLimiter {
    store: Arc<dyn CoordinationStore>,
}

impl DepositAttemptLimiter {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    fn block_key(user_id: &str) -> String {
        format!("deposit:blocked:{}", user_id)
    }

    fn window_key(user_id: &str) -> String {
        format!("deposit:attempts:{}", user_id)
    }

    /// Reject the call when the user is currently blocked.
    pub async fn check(&self, user_id: &str, now_millis: i64) -> EngineResult<()> {
        let key = Self::block_key(user_id);
        let Some(raw) = self.store.get_value(&key).await? else {
            return Ok(());
        };
        let until_millis: i64 = raw.parse().unwrap_or(0);
        let remaining_millis = until_millis - now_millis;
        if remaining_millis <= 0 {
            return Ok(());
        }
        Err(EngineError::TemporarilyBlocked {
            retry_after_secs: (remaining_millis as u64).div_ceil(1000),
        })
    }

    /// Record one deposit attempt and apply whichever escalation tier it
    /// trips. Returns the block length applied, if any.
    pub async fn record_attempt(
        &self,
        user_id: &str,
        order_id: &str,
        now_millis: i64,
    ) -> EngineResult<Option<u64>> {
        let window_key = Self::window_key(user_id);
        self.store
            .window_add(&window_key, order_id, now_millis)
            .await?;
        let entries = self.store.window_entries(&window_key).await?;
        let n = entries.len();

        let block_secs = if n > TIER1_COUNT
            && n % TIER2_STEP == 0
            && now_millis - entries[n - TIER2_STEP].at_millis <= TIER2_WINDOW_SECS * 1000
        {
            Some(TIER2_BLOCK_SECS)
        } else if n >= TIER1_COUNT
            && now_millis - entries[n - TIER1_COUNT].at_millis <= TIER1_WINDOW_SECS * 1000
        {
            Some(TIER1_BLOCK_SECS)
        } else {
            None
        };

        if let Some(secs) = block_secs {
            info!(
                user_id = %user_id,
                attempts = n,
                block_secs = secs,
                "Deposit attempt limiter tripped"
            );
            self.block(user_id, Duration::from_secs(secs), now_millis)
                .await?;
        }

        Ok(block_secs)
    }

    /// Clear the attempt window and any active block. Called only when a
    /// deposit for the user settles successfully.
    pub async fn clear(&self, user_id: &str) -> EngineResult<()> {
        self.store
            .window_clear(&Self::window_key(user_id))
            .await?;
        self.store.set_value(&Self::block_key(user_id), "0").await?;
        Ok(())
    }

    /// Block the user until now + duration. Also the manual operator path.
    pub async fn block(
        &self,
        user_id: &str,
        duration: Duration,
        now_millis: i64,
    ) -> EngineResult<()> {
        let until_millis = now_millis + duration.as_millis() as i64;
        self.store
            .set_value(&Self::block_key(user_id), &until_millis.to_string())
            .await?;
        Ok(())
    }

    pub async fn unblock(&self, user_id: &str) -> EngineResult<()> {
        self.store.set_value(&Self::block_key(user_id), "0").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::MemoryCoordinationStore;

    fn limiter() -> DepositAttemptLimiter {
        DepositAttemptLimiter::new(Arc::new(MemoryCoordinationStore::new()))
    }

    #[tokio::test]
    async fn nine_rapid_attempts_stay_unblocked() {
        let limiter = limiter();
        for i in 0..9 {
            let applied = limiter
                .record_attempt("u1", &format!("D{}", i), i * 1000)
                .await
                .unwrap();
            assert_eq!(applied, None);
        }
        limiter.check("u1", 10_000).await.unwrap();
    }

    #[tokio::test]
    async fn tenth_attempt_in_five_minutes_blocks_for_five_minutes() {
        let limiter = limiter();
        for i in 0..9 {
            limiter
                .record_attempt("u1", &format!("D{}", i), i * 1000)
                .await
                .unwrap();
        }
        let applied = limiter.record_attempt("u1", "D9", 9_000).await.unwrap();
        assert_eq!(applied, Some(300));

        let err = limiter.check("u1", 10_000).await.unwrap_err();
        match err {
            EngineError::TemporarilyBlocked { retry_after_secs } => {
                assert!(retry_after_secs <= 300);
                assert!(retry_after_secs > 290);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // Block has lapsed.
        limiter.check("u1", 9_000 + 301_000).await.unwrap();
    }

    #[tokio::test]
    async fn slow_attempts_never_trip_the_first_tier() {
        let limiter = limiter();
        // One attempt per six minutes, so no ten fall inside five minutes.
        for i in 0..10 {
            let applied = limiter
                .record_attempt("u1", &format!("D{}", i), i * 360_000)
                .await
                .unwrap();
            assert_eq!(applied, None);
        }
    }

    #[tokio::test]
    async fn fifteenth_attempt_escalates_to_a_day() {
        let limiter = limiter();
        for i in 0..14 {
            limiter
                .record_attempt("u1", &format!("D{}", i), i * 1000)
                .await
                .unwrap();
        }
        let applied = limiter.record_attempt("u1", "D14", 14_000).await.unwrap();
        assert_eq!(applied, Some(86_400));
    }

    #[tokio::test]
    async fn clear_resets_window_and_block() {
        let limiter = limiter();
        for i in 0..10 {
            limiter
                .record_attempt("u1", &format!("D{}", i), i * 1000)
                .await
                .unwrap();
        }
        assert!(limiter.check("u1", 10_000).await.is_err());

        limiter.clear("u1").await.unwrap();
        limiter.check("u1", 10_000).await.unwrap();

        // Window restarts from zero after the clear.
        let applied = limiter.record_attempt("u1", "D10", 11_000).await.unwrap();
        assert_eq!(applied, None);
    }

    #[tokio::test]
    async fn manual_block_and_unblock() {
        let limiter = limiter();
        limiter
            .block("u2", Duration::from_secs(3600), 0)
            .await
            .unwrap();
        assert!(limiter.check("u2", 1_000).await.is_err());
        limiter.unblock("u2").await.unwrap();
        limiter.check("u2", 1_000).await.unwrap();
    }
}
