//! Shared harness for the lifecycle integration tests: a scriptable mock
//! gateway plus fully wired engines over the in-memory stores.
#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use Paydesk_backend::coordination::{
    DepositAttemptLimiter, MemoryCoordinationStore, OrderLockService, ReviewerRing,
};
use Paydesk_backend::engine::{
    CallContext, DepositEngine, DepositStore, LogNotifier, MemoryDepositStore, MemoryLedger,
    MemoryRouteStore, MemoryWithdrawalStore, Notifier, WithdrawalEngine, WithdrawalStore,
};
use Paydesk_backend::providers::{
    CallbackRequest, PayInitiation, PayNotification, PayRequest, PayTarget, PayoutInitiation,
    PayoutNotification, PayoutRequest, PayoutState, ProviderAdapter, ProviderError,
    ProviderRegistry, ProviderResult, ProviderId, SettleState,
};
use Paydesk_backend::routing::{ChannelRoute, ChannelRouter, RouteStore};

/// Scriptable adapter standing in for a real gateway. Callbacks carry
/// their fields in plain form parameters; signature verification is the
/// real adapters' concern, not the lifecycle tests'.
pub struct MockGateway {
    manual_review: AtomicBool,
    fail_pay: AtomicBool,
    fail_withdraw: AtomicBool,
    pay_calls: AtomicUsize,
    withdraw_calls: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            manual_review: AtomicBool::new(false),
            fail_pay: AtomicBool::new(false),
            fail_withdraw: AtomicBool::new(false),
            pay_calls: AtomicUsize::new(0),
            withdraw_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_manual_review(&self, value: bool) {
        self.manual_review.store(value, Ordering::SeqCst);
    }

    pub fn set_fail_pay(&self, value: bool) {
        self.fail_pay.store(value, Ordering::SeqCst);
    }

    pub fn set_fail_withdraw(&self, value: bool) {
        self.fail_withdraw.store(value, Ordering::SeqCst);
    }

    pub fn pay_calls(&self) -> usize {
        self.pay_calls.load(Ordering::SeqCst)
    }

    pub fn withdraw_calls(&self) -> usize {
        self.withdraw_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for MockGateway {
    fn name(&self) -> ProviderId {
        ProviderId::OrientPay
    }

    async fn pay(&self, request: &PayRequest) -> ProviderResult<PayInitiation> {
        self.pay_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_pay.load(Ordering::SeqCst) {
            return Err(ProviderError::Envelope {
                provider: "orientpay".to_string(),
                code: Some("9001".to_string()),
                message: "channel declined".to_string(),
            });
        }
        Ok(PayInitiation {
            target: PayTarget::RedirectUrl(format!("https://pay.mock/{}", request.order_id)),
            external_order_id: Some(format!("ext-{}", request.order_id)),
        })
    }

    async fn withdraw(&self, request: &PayoutRequest) -> ProviderResult<PayoutInitiation> {
        self.withdraw_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_withdraw.load(Ordering::SeqCst) {
            return Err(ProviderError::Envelope {
                provider: "orientpay".to_string(),
                code: Some("9002".to_string()),
                message: "payout declined".to_string(),
            });
        }
        Ok(PayoutInitiation {
            external_order_id: Some(format!("payout-{}", request.order_id)),
        })
    }

    fn pay_callback(&self, request: &CallbackRequest) -> ProviderResult<PayNotification> {
        let params = request.form_params("orientpay")?;
        let state = match params.get("status").map(String::as_str) {
            Some("confirming") => SettleState::Confirming,
            Some("success") => SettleState::Success,
            Some("cancelled") => SettleState::Cancelled,
            other => {
                return Err(ProviderError::Malformed {
                    provider: "orientpay".to_string(),
                    message: format!("unknown status {:?}", other),
                })
            }
        };
        Ok(PayNotification {
            order_id: params.get("orderid").cloned().unwrap_or_default(),
            settled_amount: params
                .get("amount")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            state,
            signature: "mock".to_string(),
            crypto_hash: params.get("txhash").cloned().filter(|v| !v.is_empty()),
            ack: "SUCCESS".to_string(),
        })
    }

    fn withdraw_callback(&self, request: &CallbackRequest) -> ProviderResult<PayoutNotification> {
        let params = request.form_params("orientpay")?;
        let state = match params.get("status").map(String::as_str) {
            Some("dealing") => PayoutState::Dealing,
            Some("success") => PayoutState::Success,
            Some("failed") => PayoutState::AutoPayFailed,
            other => {
                return Err(ProviderError::Malformed {
                    provider: "orientpay".to_string(),
                    message: format!("unknown status {:?}", other),
                })
            }
        };
        Ok(PayoutNotification {
            order_id: params.get("orderid").cloned().unwrap_or_default(),
            state,
            signature: "mock".to_string(),
            ack: "OK".to_string(),
        })
    }

    fn requires_manual_review(&self) -> bool {
        self.manual_review.load(Ordering::SeqCst)
    }
}

pub const METHOD_ID: i64 = 1;

pub fn test_route() -> ChannelRoute {
    ChannelRoute {
        method_id: METHOD_ID,
        channel_id: 10,
        category_id: 1,
        provider: "orientpay".to_string(),
        code: "901".to_string(),
        min_amount: Decimal::new(10_00, 2),
        max_amount: Decimal::new(5_000_00, 2),
        fixed_amounts: Vec::new(),
        open_from: None,
        open_until: None,
        fee_rate: Decimal::ZERO,
        bonus_rate: Decimal::ZERO,
        enabled: true,
    }
}

pub struct Harness {
    pub deposits: Arc<DepositEngine>,
    pub withdrawals: Arc<WithdrawalEngine>,
    pub ledger: Arc<MemoryLedger>,
    pub deposit_store: Arc<MemoryDepositStore>,
    pub withdrawal_store: Arc<MemoryWithdrawalStore>,
    pub routes: Arc<MemoryRouteStore>,
    pub router: Arc<ChannelRouter>,
    pub ring: Arc<ReviewerRing>,
    pub limiter: Arc<DepositAttemptLimiter>,
    pub coordination: Arc<MemoryCoordinationStore>,
    pub gateway: Arc<MockGateway>,
}

impl Harness {
    pub fn new() -> Self {
        let coordination = Arc::new(MemoryCoordinationStore::new());
        let ledger = MemoryLedger::new();
        let deposit_store = Arc::new(MemoryDepositStore::new(ledger.clone()));
        let withdrawal_store = Arc::new(MemoryWithdrawalStore::new(ledger.clone()));
        let routes = Arc::new(MemoryRouteStore::new());
        routes.put_route(test_route()).unwrap();
        routes.put_tier(1, vec![METHOD_ID]).unwrap();

        let gateway = Arc::new(MockGateway::new());
        let mut registry = ProviderRegistry::new();
        registry.register(gateway.clone());
        let registry = Arc::new(registry);

        let locks = Arc::new(OrderLockService::new(
            coordination.clone(),
            Duration::from_secs(20),
        ));
        let limiter = Arc::new(DepositAttemptLimiter::new(coordination.clone()));
        let ring = Arc::new(ReviewerRing::new(coordination.clone(), 5));
        let router = Arc::new(ChannelRouter::new(
            routes.clone() as Arc<dyn RouteStore>
        ));
        let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

        let deposits = Arc::new(DepositEngine::new(
            deposit_store.clone() as Arc<dyn DepositStore>,
            registry.clone(),
            router.clone(),
            locks.clone(),
            limiter.clone(),
            coordination.clone(),
            notifier.clone(),
            "http://localhost:8080".to_string(),
        ));
        let withdrawals = Arc::new(WithdrawalEngine::new(
            withdrawal_store.clone() as Arc<dyn WithdrawalStore>,
            registry,
            locks,
            ring.clone(),
            coordination.clone(),
            notifier,
            "http://localhost:8080".to_string(),
        ));

        Self {
            deposits,
            withdrawals,
            ledger,
            deposit_store,
            withdrawal_store,
            routes,
            router,
            ring,
            limiter,
            coordination,
            gateway,
        }
    }

    /// Replace the test route and drop the router cache so the next lookup
    /// sees the edit.
    pub async fn update_route(&self, route: ChannelRoute) {
        self.routes.put_route(route).unwrap();
        self.router.invalidate(METHOD_ID).await;
    }
}

pub fn ctx() -> CallContext {
    CallContext::new("test-request")
}

pub fn pay_callback(order_id: &str, amount: i64, status: &str) -> CallbackRequest {
    CallbackRequest::form(&[
        ("orderid", order_id),
        ("amount", &amount.to_string()),
        ("status", status),
    ])
}

pub fn payout_callback(order_id: &str, status: &str) -> CallbackRequest {
    CallbackRequest::form(&[("orderid", order_id), ("status", status)])
}
