//! Withdrawal order lifecycle.
//!
//! A withdrawal holds the user's funds the moment it is created, then walks
//! the review chain: risk dispatch, reviewer verdict, auto-pay push,
//! provider callback or manual resolution. Success releases the hold;
//! rejection or failure refunds it with a reversing ledger entry. One
//! non-terminal order per user at a time.

use crate::coordination::{CoordinationStore, OrderLockService, ReviewerRing};
use crate::engine::store::{
    NewWithdrawalOrder, WithdrawalOrder, WithdrawalPatch, WithdrawalStore,
};
use crate::engine::{map_provider_error, CallContext, Notifier, WithdrawalState};
use crate::error::{EngineError, EngineResult};
use crate::providers::{
    CallbackRequest, PayoutRequest, PayoutState, ProviderId, ProviderRegistry,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

pub struct WithdrawalEngine {
    store: Arc<dyn WithdrawalStore>,
    registry: Arc<ProviderRegistry>,
    locks: Arc<OrderLockService>,
    ring: Arc<ReviewerRing>,
    coordination: Arc<dyn CoordinationStore>,
    notifier: Arc<dyn Notifier>,
    notify_base_url: String,
}

impl WithdrawalEngine {
    pub fn new(
        store: Arc<dyn WithdrawalStore>,
        registry: Arc<ProviderRegistry>,
        locks: Arc<OrderLockService>,
        ring: Arc<ReviewerRing>,
        coordination: Arc<dyn CoordinationStore>,
        notifier: Arc<dyn Notifier>,
        notify_base_url: String,
    ) -> Self {
        Self {
            store,
            registry,
            locks,
            ring,
            coordination,
            notifier,
            notify_base_url,
        }
    }

    fn daily_key(user_id: &str) -> String {
        format!("withdraw:daily:{}", user_id)
    }

    /// Create a withdrawal: hold the funds, then hand it to risk review.
    /// Creation is serialized per user so two concurrent requests cannot
    /// both pass the single-open-order check.
    pub async fn create(
        &self,
        ctx: &CallContext,
        request: NewWithdrawalOrder,
    ) -> EngineResult<WithdrawalOrder> {
        let guard = self
            .locks
            .acquire(&format!("user:{}", request.user_id))
            .await?;
        let outcome = async {
            if self.store.has_open_order(&request.user_id).await? {
                return Err(EngineError::OrderInProgress);
            }
            // The store re-checks inside its insert transaction; the hold
            // entries and the insert commit together.
            let order = self.store.create(request.clone()).await?;

            let daily = self
                .coordination
                .get_value(&Self::daily_key(&order.user_id))
                .await?
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0);
            self.coordination
                .set_value(&Self::daily_key(&order.user_id), &(daily + 1).to_string())
                .await?;

            info!(
                request_id = %ctx.request_id,
                order_id = order.id,
                user_id = %order.user_id,
                amount = order.amount,
                "Withdrawal order created, funds held"
            );
            Ok(order)
        }
        .await;
        guard.release().await?;

        let order = outcome?;
        Ok(self.dispatch(ctx, order.id).await?.unwrap_or(order))
    }

    /// Assign a Reviewing order to the next reviewer with capacity. When no
    /// reviewer is available the order simply stays in Reviewing.
    pub async fn dispatch(
        &self,
        ctx: &CallContext,
        id: i64,
    ) -> EngineResult<Option<WithdrawalOrder>> {
        let guard = self.locks.acquire(&id.to_string()).await?;
        let outcome = async {
            let order = self.fetch(id).await?;
            if order.state != WithdrawalState::Reviewing {
                return Err(EngineError::InvalidOrderState {
                    from: order.state.to_string(),
                    to: WithdrawalState::Dispatched.to_string(),
                });
            }
            match self.ring.assign(&id.to_string()).await {
                Ok(reviewer) => {
                    let updated = self
                        .store
                        .transition(
                            id,
                            WithdrawalState::Reviewing,
                            WithdrawalState::Dispatched,
                            WithdrawalPatch {
                                reviewer_id: Some(reviewer.clone()),
                                dispatched_at: Some(Utc::now()),
                                ..Default::default()
                            },
                        )
                        .await?;
                    info!(
                        request_id = %ctx.request_id,
                        order_id = id,
                        reviewer = %reviewer,
                        "Withdrawal dispatched to reviewer"
                    );
                    Ok(Some(updated))
                }
                Err(EngineError::NoReviewerAvailable) => {
                    warn!(
                        request_id = %ctx.request_id,
                        order_id = id,
                        "No reviewer available, withdrawal stays in reviewing"
                    );
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        }
        .await;
        guard.release().await?;
        outcome
    }

    /// Reviewer approves. With a provider the payout is pushed immediately;
    /// without one the order enters Dealing for a manual payout.
    pub async fn approve(
        &self,
        ctx: &CallContext,
        id: i64,
        reviewer: &str,
        provider: Option<ProviderId>,
    ) -> EngineResult<WithdrawalOrder> {
        let guard = self.locks.acquire(&id.to_string()).await?;
        let outcome = async {
            let order = self.fetch(id).await?;
            order.state.ensure_transition(WithdrawalState::Dealing)?;
            self.push_payout(ctx, &order, reviewer, provider).await
        }
        .await;
        guard.release().await?;
        outcome
    }

    /// Reviewer rejects: refund the hold, terminal Rejected.
    pub async fn reject(
        &self,
        ctx: &CallContext,
        id: i64,
        reviewer: &str,
        reason: Option<String>,
    ) -> EngineResult<()> {
        let guard = self.locks.acquire(&id.to_string()).await?;
        let outcome = async {
            let order = self.fetch(id).await?;
            order.state.ensure_transition(WithdrawalState::Rejected)?;
            self.store
                .settle_refund(
                    id,
                    order.state,
                    WithdrawalState::Rejected,
                    WithdrawalPatch {
                        reviewer_id: Some(reviewer.to_string()),
                        hangup_reason: reason,
                        ..Default::default()
                    },
                )
                .await?;
            self.resolve_ring(&order).await?;
            info!(
                request_id = %ctx.request_id,
                order_id = id,
                reviewer = %reviewer,
                "Withdrawal rejected, funds refunded"
            );
            self.notify(id).await
        }
        .await;
        guard.release().await?;
        outcome
    }

    /// Reviewer parks the order pending user contact. Funds stay held.
    pub async fn hangup(
        &self,
        ctx: &CallContext,
        id: i64,
        reviewer: &str,
        reason: String,
    ) -> EngineResult<WithdrawalOrder> {
        let guard = self.locks.acquire(&id.to_string()).await?;
        let outcome = async {
            let order = self.fetch(id).await?;
            order.state.ensure_transition(WithdrawalState::Hangup)?;
            let updated = self
                .store
                .transition(
                    id,
                    order.state,
                    WithdrawalState::Hangup,
                    WithdrawalPatch {
                        reviewer_id: Some(reviewer.to_string()),
                        hangup_reason: Some(reason.clone()),
                        ..Default::default()
                    },
                )
                .await?;
            self.resolve_ring(&order).await?;
            info!(
                request_id = %ctx.request_id,
                order_id = id,
                reviewer = %reviewer,
                reason = %reason,
                "Withdrawal hung up"
            );
            Ok(updated)
        }
        .await;
        guard.release().await?;
        outcome
    }

    /// Return a hung-up order to the review queue and re-dispatch it.
    pub async fn requeue(&self, ctx: &CallContext, id: i64) -> EngineResult<WithdrawalOrder> {
        let guard = self.locks.acquire(&id.to_string()).await?;
        let outcome = async {
            let order = self.fetch(id).await?;
            order.state.ensure_transition(WithdrawalState::Reviewing)?;
            self.store
                .transition(
                    id,
                    order.state,
                    WithdrawalState::Reviewing,
                    WithdrawalPatch::default(),
                )
                .await
        }
        .await;
        guard.release().await?;

        let requeued = outcome?;
        Ok(self.dispatch(ctx, id).await?.unwrap_or(requeued))
    }

    /// Apply a verified payout callback. Returns the provider's ack body.
    pub async fn apply_callback(
        &self,
        ctx: &CallContext,
        provider: ProviderId,
        request: &CallbackRequest,
    ) -> EngineResult<String> {
        let adapter = self.registry.get(provider)?;
        let note = adapter
            .withdraw_callback(request)
            .map_err(map_provider_error)?;
        let id: i64 = note.order_id.parse().map_err(|_| {
            EngineError::validation(format!("malformed payout order id '{}'", note.order_id))
        })?;

        let guard = self.locks.acquire(&id.to_string()).await?;
        let outcome = async {
            let order = self.fetch(id).await?;
            if order.state.is_terminal() {
                return Err(EngineError::DuplicateNotification {
                    order_id: note.order_id.clone(),
                });
            }
            match note.state {
                PayoutState::Dealing => {
                    info!(
                        request_id = %ctx.request_id,
                        order_id = id,
                        "Payout still dealing at provider"
                    );
                    Ok(())
                }
                PayoutState::Success => self.finalize_success(ctx, &order).await,
                PayoutState::AutoPayFailed => {
                    order
                        .state
                        .ensure_transition(WithdrawalState::AutoPayFailed)?;
                    self.store
                        .transition(
                            id,
                            order.state,
                            WithdrawalState::AutoPayFailed,
                            WithdrawalPatch::default(),
                        )
                        .await?;
                    warn!(
                        request_id = %ctx.request_id,
                        order_id = id,
                        provider = %provider,
                        "Auto payout failed, awaiting retry"
                    );
                    Ok(())
                }
            }
        }
        .await;
        guard.release().await?;

        match outcome {
            Ok(()) => Ok(note.ack),
            Err(EngineError::DuplicateNotification { order_id }) => {
                info!(
                    request_id = %ctx.request_id,
                    order_id = %order_id,
                    provider = %provider,
                    "Duplicate payout notification acknowledged"
                );
                Ok(note.ack)
            }
            Err(e) => Err(e),
        }
    }

    /// Retry a failed auto payout through the same or a different provider.
    pub async fn retry_autopay(
        &self,
        ctx: &CallContext,
        id: i64,
        operator: &str,
        provider: ProviderId,
    ) -> EngineResult<WithdrawalOrder> {
        let guard = self.locks.acquire(&id.to_string()).await?;
        let outcome = async {
            let order = self.fetch(id).await?;
            if order.state != WithdrawalState::AutoPayFailed {
                return Err(EngineError::InvalidOrderState {
                    from: order.state.to_string(),
                    to: WithdrawalState::Dealing.to_string(),
                });
            }
            self.push_payout(ctx, &order, operator, Some(provider)).await
        }
        .await;
        guard.release().await?;
        outcome
    }

    /// Operator settles a Dealing or AutoPayFailed order by hand after
    /// verifying the transfer out of band. An automatic payout still in
    /// flight at a provider cannot be failed this way; it fails through
    /// the provider callback.
    pub async fn resolve_manual(
        &self,
        ctx: &CallContext,
        id: i64,
        operator: &str,
        success: bool,
    ) -> EngineResult<()> {
        let guard = self.locks.acquire(&id.to_string()).await?;
        let outcome = async {
            let order = self.fetch(id).await?;
            if success {
                order.state.ensure_transition(WithdrawalState::Success)?;
                self.finalize_success(ctx, &order).await
            } else {
                // Refunding while a pushed payout may still settle would
                // double-spend the hold.
                if order.state == WithdrawalState::Dealing
                    && (order.automatic || order.provider.is_some())
                {
                    return Err(EngineError::InvalidOrderState {
                        from: order.state.to_string(),
                        to: WithdrawalState::Failed.to_string(),
                    });
                }
                order.state.ensure_transition(WithdrawalState::Failed)?;
                self.store
                    .settle_refund(
                        id,
                        order.state,
                        WithdrawalState::Failed,
                        WithdrawalPatch {
                            reviewer_id: Some(operator.to_string()),
                            ..Default::default()
                        },
                    )
                    .await?;
                self.resolve_ring(&order).await?;
                info!(
                    request_id = %ctx.request_id,
                    order_id = id,
                    operator = %operator,
                    "Withdrawal failed, funds refunded"
                );
                self.notify(id).await
            }
        }
        .await;
        guard.release().await?;
        outcome
    }

    async fn push_payout(
        &self,
        ctx: &CallContext,
        order: &WithdrawalOrder,
        actor: &str,
        provider: Option<ProviderId>,
    ) -> EngineResult<WithdrawalOrder> {
        let Some(provider) = provider else {
            // Manual payout: the operator moves the money themselves and
            // resolves the order afterwards.
            let updated = self
                .store
                .transition(
                    order.id,
                    order.state,
                    WithdrawalState::Dealing,
                    WithdrawalPatch {
                        reviewer_id: Some(actor.to_string()),
                        ..Default::default()
                    },
                )
                .await?;
            info!(
                request_id = %ctx.request_id,
                order_id = order.id,
                "Withdrawal approved for manual payout"
            );
            return Ok(updated);
        };

        let card = self
            .store
            .card(order.card_id)
            .await?
            .ok_or_else(|| {
                EngineError::validation(format!("bank card {} not found", order.card_id))
            })?;
        let adapter = self.registry.get(provider)?;

        // A provider failure here leaves the order where it was; the
        // operator retries explicitly, never this code.
        let initiation = adapter
            .withdraw(&PayoutRequest {
                order_id: order.id.to_string(),
                amount: order.amount,
                account_name: card.account_name,
                account_number: card.account_number,
                bank_name: card.bank_name,
                notify_url: format!("{}/callbacks/{}/withdraw", self.notify_base_url, provider),
            })
            .await?;

        let updated = self
            .store
            .transition(
                order.id,
                order.state,
                WithdrawalState::Dealing,
                WithdrawalPatch {
                    reviewer_id: Some(actor.to_string()),
                    provider: Some(provider.to_string()),
                    external_order_id: initiation.external_order_id,
                    ..Default::default()
                },
            )
            .await?;
        info!(
            request_id = %ctx.request_id,
            order_id = order.id,
            provider = %provider,
            "Payout pushed to provider"
        );
        Ok(updated)
    }

    async fn finalize_success(
        &self,
        ctx: &CallContext,
        order: &WithdrawalOrder,
    ) -> EngineResult<()> {
        order.state.ensure_transition(WithdrawalState::Success)?;
        let receipt = self
            .store
            .settle_success(order.id, order.state, Utc::now())
            .await?;
        self.resolve_ring(order).await?;
        self.coordination
            .set_value(&Self::daily_key(&order.user_id), "0")
            .await?;
        info!(
            request_id = %ctx.request_id,
            order_id = order.id,
            user_id = %order.user_id,
            amount = order.amount,
            locked = receipt.balance.locked,
            "Withdrawal settled successfully"
        );
        self.notify(order.id).await
    }

    async fn resolve_ring(&self, order: &WithdrawalOrder) -> EngineResult<()> {
        if let Some(reviewer) = &order.reviewer_id {
            self.ring.resolve(reviewer, &order.id.to_string()).await?;
        }
        Ok(())
    }

    async fn notify(&self, id: i64) -> EngineResult<()> {
        if let Some(order) = self.store.get(id).await? {
            self.notifier.withdrawal_settled(&order).await;
        }
        Ok(())
    }

    async fn fetch(&self, id: i64) -> EngineResult<WithdrawalOrder> {
        self.store.get(id).await?.ok_or_else(|| EngineError::NotFound {
            order_id: id.to_string(),
        })
    }
}
