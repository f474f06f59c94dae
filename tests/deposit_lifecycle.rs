//! Deposit lifecycle: creation through provider callback settlement,
//! idempotent repeats, chained resubmission, manual review, and the
//! abuse limiter along the way.

mod support;

use rust_decimal::Decimal;
use support::{ctx, pay_callback, Harness, METHOD_ID};
use Paydesk_backend::engine::{Account, CashType, CreateDeposit, DepositState, DepositStore};
use Paydesk_backend::error::EngineError;
use Paydesk_backend::providers::{PayTarget, ProviderId};

fn deposit_request(user_id: &str, amount: i64) -> CreateDeposit {
    CreateDeposit {
        user_id: user_id.to_string(),
        method_id: METHOD_ID,
        amount,
        bank_hint: None,
        return_url: None,
    }
}

#[tokio::test]
async fn create_persists_a_confirming_order_with_a_pay_target() {
    let h = Harness::new();
    let created = h
        .deposits
        .create(&ctx(), deposit_request("u1", 100_00))
        .await
        .unwrap();

    assert!(matches!(created.target, PayTarget::RedirectUrl(_)));
    let stored = h
        .deposit_store
        .get(&created.order.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.state, DepositState::Confirming);
    assert_eq!(stored.amount, 100_00);
    assert_eq!(stored.chain_id, stored.order_id);
    assert!(stored.external_order_id.is_some());
    // Nothing credited until the provider confirms.
    assert_eq!(h.ledger.balance("u1").unwrap().available, 0);
}

#[tokio::test]
async fn amount_outside_the_channel_range_is_rejected_before_the_provider() {
    let h = Harness::new();
    let err = h
        .deposits
        .create(&ctx(), deposit_request("u1", 5_00))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AmountOutOfRange { .. }));
    assert_eq!(h.gateway.pay_calls(), 0);
}

#[tokio::test]
async fn provider_refusal_persists_no_order() {
    let h = Harness::new();
    h.gateway.set_fail_pay(true);
    let err = h
        .deposits
        .create(&ctx(), deposit_request("u1", 100_00))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Provider(_)));
    assert_eq!(h.ledger.balance("u1").unwrap().available, 0);

    // A failed initiation does not count as a deposit attempt either.
    h.gateway.set_fail_pay(false);
    h.deposits
        .create(&ctx(), deposit_request("u1", 100_00))
        .await
        .unwrap();
}

#[tokio::test]
async fn success_callback_settles_and_credits_the_ledger() {
    let h = Harness::new();
    let created = h
        .deposits
        .create(&ctx(), deposit_request("u1", 100_00))
        .await
        .unwrap();
    let order_id = created.order.order_id;

    let ack = h
        .deposits
        .apply_callback(
            &ctx(),
            ProviderId::OrientPay,
            &pay_callback(&order_id, 100_00, "success"),
        )
        .await
        .unwrap();
    assert_eq!(ack, "SUCCESS");

    let settled = h.deposit_store.get(&order_id).await.unwrap().unwrap();
    assert_eq!(settled.state, DepositState::Success);
    assert_eq!(settled.settled_amount, Some(100_00));
    assert_eq!(settled.confirmed_by.as_deref(), Some("provider"));

    let balance = h.ledger.balance("u1").unwrap();
    assert_eq!(balance.available, 100_00);
    assert_eq!(balance.locked, 0);

    let entries = h.ledger.entries_for(&order_id).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].account, Account::Available);
    assert_eq!(entries[0].cash_type, CashType::Deposit);
    assert_eq!(entries[0].after, entries[0].before + entries[0].delta);
}

#[tokio::test]
async fn duplicate_success_callback_is_acknowledged_without_a_second_credit() {
    let h = Harness::new();
    let created = h
        .deposits
        .create(&ctx(), deposit_request("u1", 100_00))
        .await
        .unwrap();
    let order_id = created.order.order_id;
    let callback = pay_callback(&order_id, 100_00, "success");

    h.deposits
        .apply_callback(&ctx(), ProviderId::OrientPay, &callback)
        .await
        .unwrap();
    let ack = h
        .deposits
        .apply_callback(&ctx(), ProviderId::OrientPay, &callback)
        .await
        .unwrap();

    assert_eq!(ack, "SUCCESS");
    assert_eq!(h.ledger.balance("u1").unwrap().available, 100_00);
    assert_eq!(h.ledger.entries_for(&order_id).unwrap().len(), 1);
}

#[tokio::test]
async fn mismatched_settled_amount_is_rejected_without_mutation() {
    let h = Harness::new();
    let created = h
        .deposits
        .create(&ctx(), deposit_request("u1", 100_00))
        .await
        .unwrap();
    let order_id = created.order.order_id;

    let err = h
        .deposits
        .apply_callback(
            &ctx(),
            ProviderId::OrientPay,
            &pay_callback(&order_id, 99_00, "success"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AmountMismatch { .. }));

    let order = h.deposit_store.get(&order_id).await.unwrap().unwrap();
    assert_eq!(order.state, DepositState::Confirming);
    assert_eq!(h.ledger.balance("u1").unwrap().available, 0);

    // The provider retries with the right amount and the order settles.
    h.deposits
        .apply_callback(
            &ctx(),
            ProviderId::OrientPay,
            &pay_callback(&order_id, 100_00, "success"),
        )
        .await
        .unwrap();
    assert_eq!(h.ledger.balance("u1").unwrap().available, 100_00);
}

#[tokio::test]
async fn cancelled_callback_terminates_the_order_without_credit() {
    let h = Harness::new();
    let created = h
        .deposits
        .create(&ctx(), deposit_request("u1", 100_00))
        .await
        .unwrap();
    let order_id = created.order.order_id;

    h.deposits
        .apply_callback(
            &ctx(),
            ProviderId::OrientPay,
            &pay_callback(&order_id, 0, "cancelled"),
        )
        .await
        .unwrap();

    let order = h.deposit_store.get(&order_id).await.unwrap().unwrap();
    assert_eq!(order.state, DepositState::Cancelled);
    assert_eq!(h.ledger.balance("u1").unwrap().available, 0);
}

#[tokio::test]
async fn confirming_callback_leaves_the_order_untouched() {
    let h = Harness::new();
    let created = h
        .deposits
        .create(&ctx(), deposit_request("u1", 100_00))
        .await
        .unwrap();
    let order_id = created.order.order_id;

    h.deposits
        .apply_callback(
            &ctx(),
            ProviderId::OrientPay,
            &pay_callback(&order_id, 100_00, "confirming"),
        )
        .await
        .unwrap();

    let order = h.deposit_store.get(&order_id).await.unwrap().unwrap();
    assert_eq!(order.state, DepositState::Confirming);
}

#[tokio::test]
async fn only_one_order_in_a_resubmission_chain_can_settle() {
    let h = Harness::new();
    let original = h
        .deposits
        .create(&ctx(), deposit_request("u1", 100_00))
        .await
        .unwrap();
    let resubmitted = h
        .deposits
        .resubmit(&ctx(), &original.order.order_id)
        .await
        .unwrap();
    assert_eq!(resubmitted.order.chain_id, original.order.chain_id);
    assert_ne!(resubmitted.order.order_id, original.order.order_id);

    h.deposits
        .apply_callback(
            &ctx(),
            ProviderId::OrientPay,
            &pay_callback(&resubmitted.order.order_id, 100_00, "success"),
        )
        .await
        .unwrap();

    // The late callback for the original is acknowledged but never credits.
    let ack = h
        .deposits
        .apply_callback(
            &ctx(),
            ProviderId::OrientPay,
            &pay_callback(&original.order.order_id, 100_00, "success"),
        )
        .await
        .unwrap();
    assert_eq!(ack, "SUCCESS");
    assert_eq!(h.ledger.balance("u1").unwrap().available, 100_00);

    // And no further resubmission of a settled chain.
    let err = h
        .deposits
        .resubmit(&ctx(), &original.order.order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { .. }));
}

#[tokio::test]
async fn manual_review_provider_parks_the_order_until_confirmed() {
    let h = Harness::new();
    h.gateway.set_manual_review(true);
    let created = h
        .deposits
        .create(&ctx(), deposit_request("u1", 100_00))
        .await
        .unwrap();
    let order_id = created.order.order_id;

    h.deposits
        .apply_callback(
            &ctx(),
            ProviderId::OrientPay,
            &pay_callback(&order_id, 100_00, "success"),
        )
        .await
        .unwrap();

    let parked = h.deposit_store.get(&order_id).await.unwrap().unwrap();
    assert_eq!(parked.state, DepositState::Reviewing);
    assert_eq!(parked.settled_amount, Some(100_00));
    assert_eq!(h.ledger.balance("u1").unwrap().available, 0);

    h.deposits.confirm_review(&ctx(), &order_id, "ops").await.unwrap();
    let settled = h.deposit_store.get(&order_id).await.unwrap().unwrap();
    assert_eq!(settled.state, DepositState::Success);
    assert_eq!(settled.confirmed_by.as_deref(), Some("ops"));
    assert_eq!(h.ledger.balance("u1").unwrap().available, 100_00);
}

#[tokio::test]
async fn rejected_review_cancels_without_credit() {
    let h = Harness::new();
    h.gateway.set_manual_review(true);
    let created = h
        .deposits
        .create(&ctx(), deposit_request("u1", 100_00))
        .await
        .unwrap();
    let order_id = created.order.order_id;

    h.deposits
        .apply_callback(
            &ctx(),
            ProviderId::OrientPay,
            &pay_callback(&order_id, 100_00, "success"),
        )
        .await
        .unwrap();
    h.deposits.reject_review(&ctx(), &order_id, "ops").await.unwrap();

    let order = h.deposit_store.get(&order_id).await.unwrap().unwrap();
    assert_eq!(order.state, DepositState::Cancelled);
    assert_eq!(h.ledger.balance("u1").unwrap().available, 0);

    // Confirming a cancelled order is refused.
    let err = h
        .deposits
        .confirm_review(&ctx(), &order_id, "ops")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidOrderState { .. }));
}

#[tokio::test]
async fn bonus_rate_credits_a_second_ledger_entry() {
    let h = Harness::new();
    let mut route = support::test_route();
    route.bonus_rate = Decimal::new(1, 2); // 1%
    h.update_route(route).await;

    let created = h
        .deposits
        .create(&ctx(), deposit_request("u1", 100_00))
        .await
        .unwrap();
    h.deposits
        .apply_callback(
            &ctx(),
            ProviderId::OrientPay,
            &pay_callback(&created.order.order_id, 100_00, "success"),
        )
        .await
        .unwrap();

    assert_eq!(h.ledger.balance("u1").unwrap().available, 101_00);
    let entries = h.ledger.entries_for(&created.order.order_id).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].cash_type, CashType::DepositBonus);
    assert_eq!(entries[1].delta, 1_00);
}

#[tokio::test]
async fn tenth_rapid_attempt_blocks_the_next_creation() {
    let h = Harness::new();
    for _ in 0..10 {
        h.deposits
            .create(&ctx(), deposit_request("u1", 100_00))
            .await
            .unwrap();
    }

    let err = h
        .deposits
        .create(&ctx(), deposit_request("u1", 100_00))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::TemporarilyBlocked { .. }));

    // Other users are unaffected.
    h.deposits
        .create(&ctx(), deposit_request("u2", 100_00))
        .await
        .unwrap();
}

#[tokio::test]
async fn successful_settlement_clears_the_attempt_limiter() {
    let h = Harness::new();
    let mut last_order = String::new();
    for _ in 0..10 {
        let created = h
            .deposits
            .create(&ctx(), deposit_request("u1", 100_00))
            .await
            .unwrap();
        last_order = created.order.order_id;
    }
    assert!(h
        .deposits
        .create(&ctx(), deposit_request("u1", 100_00))
        .await
        .is_err());

    h.deposits
        .apply_callback(
            &ctx(),
            ProviderId::OrientPay,
            &pay_callback(&last_order, 100_00, "success"),
        )
        .await
        .unwrap();

    h.deposits
        .create(&ctx(), deposit_request("u1", 100_00))
        .await
        .unwrap();
}

#[tokio::test]
async fn first_and_second_settlements_leave_promotion_markers() {
    use Paydesk_backend::coordination::CoordinationStore;

    let h = Harness::new();
    let first = h
        .deposits
        .create(&ctx(), deposit_request("u1", 100_00))
        .await
        .unwrap();
    h.deposits
        .apply_callback(
            &ctx(),
            ProviderId::OrientPay,
            &pay_callback(&first.order.order_id, 100_00, "success"),
        )
        .await
        .unwrap();
    assert!(h
        .coordination
        .marker_exists("deposit:first:u1")
        .await
        .unwrap());
    assert!(!h
        .coordination
        .marker_exists("deposit:second:u1")
        .await
        .unwrap());

    let second = h
        .deposits
        .create(&ctx(), deposit_request("u1", 200_00))
        .await
        .unwrap();
    h.deposits
        .apply_callback(
            &ctx(),
            ProviderId::OrientPay,
            &pay_callback(&second.order.order_id, 200_00, "success"),
        )
        .await
        .unwrap();
    assert!(h
        .coordination
        .marker_exists("deposit:second:u1")
        .await
        .unwrap());
}

#[tokio::test]
async fn callback_for_an_unknown_order_is_an_error() {
    let h = Harness::new();
    let err = h
        .deposits
        .apply_callback(
            &ctx(),
            ProviderId::OrientPay,
            &pay_callback("Dmissing", 100_00, "success"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}
