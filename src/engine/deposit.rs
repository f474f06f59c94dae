//! Deposit order lifecycle.
//!
//! Creation validates the channel, passes the abuse gate, initiates payment
//! with the provider and only then persists the order, so a failed provider
//! call leaves no state behind. Settlement happens under the per-order lock
//! and is idempotent: a terminal order acknowledges and drops repeats.

use crate::coordination::{CoordinationStore, DepositAttemptLimiter, OrderLockService};
use crate::engine::store::{
    DepositOrder, DepositSettlement, DepositStore, NewDepositOrder,
};
use crate::engine::{map_provider_error, CallContext, DepositState, Notifier};
use crate::error::{EngineError, EngineResult};
use crate::providers::{
    CallbackRequest, PayNotification, PayRequest, PayTarget, ProviderId, ProviderRegistry,
    SettleState,
};
use crate::routing::ChannelRouter;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Settlements applied by provider callbacks are attributed to this actor.
const PROVIDER_ACTOR: &str = "provider";

#[derive(Debug, Clone)]
pub struct CreateDeposit {
    pub user_id: String,
    pub method_id: i64,
    pub amount: i64,
    pub bank_hint: Option<String>,
    pub return_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatedDeposit {
    pub order: DepositOrder,
    pub target: PayTarget,
}

pub struct DepositEngine {
    store: Arc<dyn DepositStore>,
    registry: Arc<ProviderRegistry>,
    router: Arc<ChannelRouter>,
    locks: Arc<OrderLockService>,
    limiter: Arc<DepositAttemptLimiter>,
    coordination: Arc<dyn CoordinationStore>,
    notifier: Arc<dyn Notifier>,
    /// Public base URL providers call back on.
    notify_base_url: String,
}

impl DepositEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn DepositStore>,
        registry: Arc<ProviderRegistry>,
        router: Arc<ChannelRouter>,
        locks: Arc<OrderLockService>,
        limiter: Arc<DepositAttemptLimiter>,
        coordination: Arc<dyn CoordinationStore>,
        notifier: Arc<dyn Notifier>,
        notify_base_url: String,
    ) -> Self {
        Self {
            store,
            registry,
            router,
            locks,
            limiter,
            coordination,
            notifier,
            notify_base_url,
        }
    }

    /// Create a fresh deposit order. The new order starts its own chain.
    pub async fn create(
        &self,
        ctx: &CallContext,
        request: CreateDeposit,
    ) -> EngineResult<CreatedDeposit> {
        let order_id = format!("D{}", Uuid::new_v4().simple());
        self.submit(ctx, request, order_id.clone(), order_id).await
    }

    /// Re-submit a deposit that never settled, chained to the original so
    /// at most one order in the chain can ever reach Success.
    pub async fn resubmit(
        &self,
        ctx: &CallContext,
        original_order_id: &str,
    ) -> EngineResult<CreatedDeposit> {
        let original = self
            .store
            .get(original_order_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                order_id: original_order_id.to_string(),
            })?;
        if self.store.has_chain_success(&original.chain_id).await? {
            return Err(EngineError::validation(format!(
                "chain {} already has a settled order",
                original.chain_id
            )));
        }

        let request = CreateDeposit {
            user_id: original.user_id.clone(),
            method_id: original.method_id,
            amount: original.amount,
            bank_hint: None,
            return_url: None,
        };
        let order_id = format!("D{}", Uuid::new_v4().simple());
        self.submit(ctx, request, order_id, original.chain_id).await
    }

    async fn submit(
        &self,
        ctx: &CallContext,
        request: CreateDeposit,
        order_id: String,
        chain_id: String,
    ) -> EngineResult<CreatedDeposit> {
        let now = Utc::now();

        let route = self.router.route(request.method_id).await?;
        if !route.is_open_at(now) {
            return Err(EngineError::validation(format!(
                "payment method {} is outside its open hours",
                request.method_id
            )));
        }
        route.validate_amount(request.amount)?;
        self.limiter
            .check(&request.user_id, now.timestamp_millis())
            .await?;

        let provider: ProviderId = route.provider.parse()?;
        let adapter = self.registry.get(provider)?;

        let pay_request = PayRequest {
            order_id: order_id.clone(),
            channel_code: route.code.clone(),
            amount: request.amount,
            user_id: request.user_id.clone(),
            bank_hint: request.bank_hint.clone(),
            notify_url: format!("{}/callbacks/{}/pay", self.notify_base_url, provider),
            return_url: request.return_url.clone(),
        };

        // Nothing is persisted until the provider accepts the initiation.
        let initiation = adapter.pay(&pay_request).await?;

        let (remark, crypto_address, crypto_rate, automatic) = match &initiation.target {
            PayTarget::BankTransfer { memo, .. } => (Some(memo.clone()), None, None, false),
            PayTarget::CryptoAddress { address, rate } => {
                (None, Some(address.clone()), Some(rate.clone()), true)
            }
            _ => (None, None, None, true),
        };

        let order = self
            .store
            .create(NewDepositOrder {
                order_id: order_id.clone(),
                external_order_id: initiation.external_order_id.clone(),
                chain_id,
                user_id: request.user_id.clone(),
                method_id: request.method_id,
                channel_id: route.channel_id,
                provider: provider.to_string(),
                amount: request.amount,
                automatic,
                remark,
                crypto_address,
                crypto_rate,
            })
            .await?;

        if let Some(block_secs) = self
            .limiter
            .record_attempt(&request.user_id, &order_id, now.timestamp_millis())
            .await?
        {
            warn!(
                request_id = %ctx.request_id,
                user_id = %request.user_id,
                block_secs,
                "Deposit attempt limiter engaged after creation"
            );
        }

        info!(
            request_id = %ctx.request_id,
            order_id = %order.order_id,
            user_id = %order.user_id,
            provider = %order.provider,
            amount = order.amount,
            "Deposit order created"
        );

        Ok(CreatedDeposit {
            order,
            target: initiation.target,
        })
    }

    /// Apply a verified provider callback. Returns the ack body the
    /// provider expects; duplicates are acknowledged without mutation.
    pub async fn apply_callback(
        &self,
        ctx: &CallContext,
        provider: ProviderId,
        request: &CallbackRequest,
    ) -> EngineResult<String> {
        let adapter = self.registry.get(provider)?;
        let note = adapter
            .pay_callback(request)
            .map_err(map_provider_error)?;
        let manual_review = adapter.requires_manual_review();

        let guard = self.locks.acquire(&note.order_id).await?;
        let outcome = self.apply_notification(ctx, &note, manual_review).await;
        guard.release().await?;

        match outcome {
            Ok(()) => Ok(note.ack),
            Err(EngineError::DuplicateNotification { order_id }) => {
                info!(
                    request_id = %ctx.request_id,
                    order_id = %order_id,
                    provider = %provider,
                    "Duplicate deposit notification acknowledged"
                );
                Ok(note.ack)
            }
            Err(e) => Err(e),
        }
    }

    async fn apply_notification(
        &self,
        ctx: &CallContext,
        note: &PayNotification,
        manual_review: bool,
    ) -> EngineResult<()> {
        let order = self
            .store
            .get(&note.order_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                order_id: note.order_id.clone(),
            })?;
        if order.state.is_terminal() {
            return Err(EngineError::DuplicateNotification {
                order_id: order.order_id,
            });
        }

        match note.state {
            SettleState::Confirming => {
                info!(
                    request_id = %ctx.request_id,
                    order_id = %order.order_id,
                    "Deposit still confirming at provider"
                );
                Ok(())
            }
            SettleState::Cancelled => {
                order.state.ensure_transition(DepositState::Cancelled)?;
                self.store
                    .mark_cancelled(&order.order_id, order.state, PROVIDER_ACTOR)
                    .await?;
                info!(
                    request_id = %ctx.request_id,
                    order_id = %order.order_id,
                    "Deposit cancelled by provider"
                );
                Ok(())
            }
            SettleState::Success => {
                if note.settled_amount != order.amount {
                    warn!(
                        request_id = %ctx.request_id,
                        order_id = %order.order_id,
                        expected = order.amount,
                        settled = note.settled_amount,
                        "Deposit settled amount mismatch, rejecting"
                    );
                    return Err(EngineError::AmountMismatch {
                        order_id: order.order_id,
                        expected: order.amount,
                        settled: note.settled_amount,
                    });
                }

                if manual_review && order.state == DepositState::Confirming {
                    order.state.ensure_transition(DepositState::Reviewing)?;
                    self.store
                        .mark_reviewing(
                            &order.order_id,
                            note.settled_amount,
                            note.crypto_hash.clone(),
                        )
                        .await?;
                    info!(
                        request_id = %ctx.request_id,
                        order_id = %order.order_id,
                        "Deposit parked for manual review"
                    );
                    return Ok(());
                }

                self.settle(
                    ctx,
                    &order,
                    note.settled_amount,
                    PROVIDER_ACTOR,
                    note.crypto_hash.clone(),
                )
                .await
            }
        }
    }

    /// Operator confirms a deposit parked in Reviewing.
    pub async fn confirm_review(
        &self,
        ctx: &CallContext,
        order_id: &str,
        operator: &str,
    ) -> EngineResult<()> {
        let guard = self.locks.acquire(order_id).await?;
        let outcome = async {
            let order = self
                .store
                .get(order_id)
                .await?
                .ok_or_else(|| EngineError::NotFound {
                    order_id: order_id.to_string(),
                })?;
            if order.state != DepositState::Reviewing {
                return Err(EngineError::InvalidOrderState {
                    from: order.state.to_string(),
                    to: DepositState::Success.to_string(),
                });
            }
            let settled_amount = order.settled_amount.unwrap_or(order.amount);
            self.settle(ctx, &order, settled_amount, operator, None).await
        }
        .await;
        guard.release().await?;
        outcome
    }

    /// Operator rejects a deposit parked in Reviewing. State change only;
    /// returning funds already received is an out-of-band operation.
    pub async fn reject_review(
        &self,
        ctx: &CallContext,
        order_id: &str,
        operator: &str,
    ) -> EngineResult<()> {
        let guard = self.locks.acquire(order_id).await?;
        let outcome = async {
            let order = self
                .store
                .get(order_id)
                .await?
                .ok_or_else(|| EngineError::NotFound {
                    order_id: order_id.to_string(),
                })?;
            if order.state != DepositState::Reviewing {
                return Err(EngineError::InvalidOrderState {
                    from: order.state.to_string(),
                    to: DepositState::Cancelled.to_string(),
                });
            }
            self.store
                .mark_cancelled(order_id, order.state, operator)
                .await?;
            info!(
                request_id = %ctx.request_id,
                order_id = %order_id,
                operator = %operator,
                "Deposit rejected in review"
            );
            Ok(())
        }
        .await;
        guard.release().await?;
        outcome
    }

    async fn settle(
        &self,
        ctx: &CallContext,
        order: &DepositOrder,
        settled_amount: i64,
        confirmed_by: &str,
        crypto_hash: Option<String>,
    ) -> EngineResult<()> {
        let bonus = match self.router.route(order.method_id).await {
            Ok(route) => (Decimal::from(settled_amount) * route.bonus_rate)
                .trunc()
                .to_i64()
                .unwrap_or(0),
            Err(e) => {
                warn!(
                    order_id = %order.order_id,
                    method_id = order.method_id,
                    error = %e,
                    "Route unavailable at settlement, settling without bonus"
                );
                0
            }
        };

        let receipt = self
            .store
            .settle_success(
                DepositSettlement {
                    order_id: order.order_id.clone(),
                    settled_amount,
                    bonus,
                    confirmed_by: confirmed_by.to_string(),
                    crypto_hash,
                },
                order.state,
            )
            .await?;

        self.limiter.clear(&order.user_id).await?;

        // First and second successful deposits are marked for the promotion
        // layer to pick up.
        let successes = self.store.success_count_for_user(&order.user_id).await?;
        if successes == 1 {
            self.coordination
                .set_marker(&format!("deposit:first:{}", order.user_id), None)
                .await?;
        } else if successes == 2 {
            self.coordination
                .set_marker(&format!("deposit:second:{}", order.user_id), None)
                .await?;
        }

        info!(
            request_id = %ctx.request_id,
            order_id = %order.order_id,
            user_id = %order.user_id,
            settled_amount,
            bonus,
            available = receipt.balance.available,
            "Deposit settled successfully"
        );

        if let Some(settled) = self.store.get(&order.order_id).await? {
            self.notifier.deposit_settled(&settled).await;
        }
        Ok(())
    }
}
