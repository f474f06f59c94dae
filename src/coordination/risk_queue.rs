//! Round-robin dispatch of withdrawal orders to risk reviewers.
//!
//! Reviewers sit on a rotating ring under `risk:reviewers`; each reviewer's
//! open assignments live in `risk:open:{reviewer}`. Assignment rotates the
//! ring at most once per reviewer and hands the order to the first reviewer
//! below the open-assignment cap. The cap itself is an operator-tunable
//! value under `risk:max_open`.

use crate::coordination::CoordinationStore;
use crate::error::{EngineError, EngineResult};
use std::sync::Arc;
use tracing::{info, warn};

const REVIEWERS_KEY: &str = "risk:reviewers";
const MAX_OPEN_KEY: &str = "risk:max_open";

pub struct ReviewerRing {
    store: Arc<dyn CoordinationStore>,
    default_max_open: usize,
}

impl ReviewerRing {
    pub fn new(store: Arc<dyn CoordinationStore>, default_max_open: usize) -> Self {
        Self {
            store,
            default_max_open,
        }
    }

    fn open_key(reviewer: &str) -> String {
        format!("risk:open:{}", reviewer)
    }

    pub async fn add_reviewer(&self, reviewer: &str) -> EngineResult<()> {
        self.store.ring_push(REVIEWERS_KEY, reviewer).await?;
        info!(reviewer = %reviewer, "Risk reviewer joined the ring");
        Ok(())
    }

    /// Take the reviewer off the ring. Their already-open assignments stay
    /// put until resolved.
    pub async fn remove_reviewer(&self, reviewer: &str) -> EngineResult<()> {
        self.store.ring_remove(REVIEWERS_KEY, reviewer).await?;
        info!(reviewer = %reviewer, "Risk reviewer left the ring");
        Ok(())
    }

    pub async fn max_open(&self) -> EngineResult<usize> {
        match self.store.get_value(MAX_OPEN_KEY).await? {
            Some(raw) => Ok(raw.parse().unwrap_or(self.default_max_open)),
            None => Ok(self.default_max_open),
        }
    }

    pub async fn set_max_open(&self, max_open: usize) -> EngineResult<()> {
        self.store
            .set_value(MAX_OPEN_KEY, &max_open.to_string())
            .await?;
        Ok(())
    }

    /// Assign an order to the next reviewer with capacity, rotating the ring
    /// at most once per member so a single assignment never loops forever.
    pub async fn assign(&self, order_id: &str) -> EngineResult<String> {
        let ring_len = self.store.ring_len(REVIEWERS_KEY).await?;
        if ring_len == 0 {
            warn!(order_id = %order_id, "No risk reviewers on the ring");
            return Err(EngineError::NoReviewerAvailable);
        }
        let max_open = self.max_open().await?;

        for _ in 0..ring_len {
            let Some(reviewer) = self.store.ring_rotate(REVIEWERS_KEY).await? else {
                break;
            };
            let open = self.store.list_len(&Self::open_key(&reviewer)).await?;
            if open < max_open {
                self.store
                    .list_push(&Self::open_key(&reviewer), order_id)
                    .await?;
                info!(
                    order_id = %order_id,
                    reviewer = %reviewer,
                    open = open + 1,
                    "Withdrawal assigned for risk review"
                );
                return Ok(reviewer);
            }
        }

        warn!(order_id = %order_id, "All risk reviewers at capacity");
        Err(EngineError::NoReviewerAvailable)
    }

    /// Drop a resolved order from the reviewer's open list.
    pub async fn resolve(&self, reviewer: &str, order_id: &str) -> EngineResult<()> {
        self.store
            .list_remove(&Self::open_key(reviewer), order_id)
            .await?;
        Ok(())
    }

    pub async fn open_count(&self, reviewer: &str) -> EngineResult<usize> {
        Ok(self.store.list_len(&Self::open_key(reviewer)).await?)
    }
}
