//! Withdrawal lifecycle: the hold at creation, risk dispatch, reviewer
//! verdicts, auto-pay callbacks, manual resolution, and the refunds on
//! every failure path.

mod support;

use support::{ctx, payout_callback, Harness};
use Paydesk_backend::coordination::CoordinationStore;
use Paydesk_backend::engine::{
    Account, BankCard, CashType, NewWithdrawalOrder, WithdrawalState, WithdrawalStore,
};
use Paydesk_backend::error::EngineError;
use Paydesk_backend::providers::ProviderId;

const USER: &str = "u1";
const CARD_ID: i64 = 7;

async fn funded_harness(available: i64) -> Harness {
    let h = Harness::new();
    h.ledger.credit(USER, available).unwrap();
    h.withdrawal_store
        .add_card(BankCard {
            id: CARD_ID,
            user_id: USER.to_string(),
            account_name: "Jordan Doe".to_string(),
            account_number: "6214830001".to_string(),
            bank_name: "First Bank".to_string(),
        })
        .unwrap();
    h
}

fn withdrawal_request(amount: i64) -> NewWithdrawalOrder {
    NewWithdrawalOrder {
        user_id: USER.to_string(),
        card_id: CARD_ID,
        amount,
        automatic: true,
    }
}

fn manual_withdrawal_request(amount: i64) -> NewWithdrawalOrder {
    NewWithdrawalOrder {
        automatic: false,
        ..withdrawal_request(amount)
    }
}

#[tokio::test]
async fn creation_moves_funds_from_available_to_locked() {
    let h = funded_harness(100_000).await;
    let order = h
        .withdrawals
        .create(&ctx(), withdrawal_request(40_000))
        .await
        .unwrap();

    // No reviewer on the ring yet, so the order waits in Reviewing.
    assert_eq!(order.state, WithdrawalState::Reviewing);
    let balance = h.ledger.balance(USER).unwrap();
    assert_eq!(balance.available, 60_000);
    assert_eq!(balance.locked, 40_000);

    let entries = h.ledger.entries_for(&order.id.to_string()).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].account, Account::Available);
    assert_eq!(entries[0].delta, -40_000);
    assert_eq!(entries[1].account, Account::Locked);
    assert_eq!(entries[1].delta, 40_000);
    assert!(entries
        .iter()
        .all(|e| e.cash_type == CashType::WithdrawHold));

    assert_eq!(
        h.coordination
            .get_value("withdraw:daily:u1")
            .await
            .unwrap()
            .as_deref(),
        Some("1")
    );
}

#[tokio::test]
async fn insufficient_balance_rejects_creation_without_a_hold() {
    let h = funded_harness(10_000).await;
    let err = h
        .withdrawals
        .create(&ctx(), withdrawal_request(40_000))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientBalance { .. }));
    assert_eq!(h.ledger.balance(USER).unwrap().available, 10_000);
    assert_eq!(h.ledger.balance(USER).unwrap().locked, 0);
}

#[tokio::test]
async fn one_open_order_per_user() {
    let h = funded_harness(100_000).await;
    h.withdrawals
        .create(&ctx(), withdrawal_request(40_000))
        .await
        .unwrap();
    let err = h
        .withdrawals
        .create(&ctx(), withdrawal_request(10_000))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::OrderInProgress));
}

#[tokio::test]
async fn auto_payout_flow_settles_and_releases_the_hold() {
    let h = funded_harness(100_000).await;
    h.ring.add_reviewer("alice").await.unwrap();

    let order = h
        .withdrawals
        .create(&ctx(), withdrawal_request(40_000))
        .await
        .unwrap();
    assert_eq!(order.state, WithdrawalState::Dispatched);
    assert_eq!(order.reviewer_id.as_deref(), Some("alice"));
    assert!(order.dispatched_at.is_some());
    assert_eq!(h.ring.open_count("alice").await.unwrap(), 1);

    let dealing = h
        .withdrawals
        .approve(&ctx(), order.id, "alice", Some(ProviderId::OrientPay))
        .await
        .unwrap();
    assert_eq!(dealing.state, WithdrawalState::Dealing);
    assert_eq!(dealing.provider.as_deref(), Some("orientpay"));
    assert!(dealing.external_order_id.is_some());
    assert_eq!(h.gateway.withdraw_calls(), 1);

    let ack = h
        .withdrawals
        .apply_callback(
            &ctx(),
            ProviderId::OrientPay,
            &payout_callback(&order.id.to_string(), "success"),
        )
        .await
        .unwrap();
    assert_eq!(ack, "OK");

    let settled = h.withdrawal_store.get(order.id).await.unwrap().unwrap();
    assert_eq!(settled.state, WithdrawalState::Success);
    assert!(settled.received_at.is_some());

    let balance = h.ledger.balance(USER).unwrap();
    assert_eq!(balance.available, 60_000);
    assert_eq!(balance.locked, 0);
    assert_eq!(h.ring.open_count("alice").await.unwrap(), 0);
    assert_eq!(
        h.coordination
            .get_value("withdraw:daily:u1")
            .await
            .unwrap()
            .as_deref(),
        Some("0")
    );
}

#[tokio::test]
async fn rejection_refunds_the_hold() {
    let h = funded_harness(100_000).await;
    h.ring.add_reviewer("alice").await.unwrap();
    let order = h
        .withdrawals
        .create(&ctx(), withdrawal_request(40_000))
        .await
        .unwrap();

    h.withdrawals
        .reject(&ctx(), order.id, "alice", Some("name mismatch".to_string()))
        .await
        .unwrap();

    let rejected = h.withdrawal_store.get(order.id).await.unwrap().unwrap();
    assert_eq!(rejected.state, WithdrawalState::Rejected);
    assert_eq!(rejected.hangup_reason.as_deref(), Some("name mismatch"));

    let balance = h.ledger.balance(USER).unwrap();
    assert_eq!(balance.available, 100_000);
    assert_eq!(balance.locked, 0);
    assert_eq!(h.ring.open_count("alice").await.unwrap(), 0);

    let refund_entries: Vec<_> = h
        .ledger
        .entries_for(&order.id.to_string())
        .unwrap()
        .into_iter()
        .filter(|e| e.cash_type == CashType::WithdrawRefund)
        .collect();
    assert_eq!(refund_entries.len(), 2);

    // The terminal order no longer blocks a fresh withdrawal.
    h.withdrawals
        .create(&ctx(), withdrawal_request(10_000))
        .await
        .unwrap();
}

#[tokio::test]
async fn hangup_parks_the_order_and_requeue_returns_it_to_review() {
    let h = funded_harness(100_000).await;
    h.ring.add_reviewer("alice").await.unwrap();
    let order = h
        .withdrawals
        .create(&ctx(), withdrawal_request(40_000))
        .await
        .unwrap();

    let parked = h
        .withdrawals
        .hangup(&ctx(), order.id, "alice", "cannot reach user".to_string())
        .await
        .unwrap();
    assert_eq!(parked.state, WithdrawalState::Hangup);
    assert_eq!(parked.hangup_reason.as_deref(), Some("cannot reach user"));
    // Funds stay held while hung up.
    assert_eq!(h.ledger.balance(USER).unwrap().locked, 40_000);
    assert_eq!(h.ring.open_count("alice").await.unwrap(), 0);

    let requeued = h.withdrawals.requeue(&ctx(), order.id).await.unwrap();
    assert_eq!(requeued.state, WithdrawalState::Dispatched);
    assert_eq!(h.ring.open_count("alice").await.unwrap(), 1);
}

#[tokio::test]
async fn failed_autopay_parks_for_retry_then_settles() {
    let h = funded_harness(100_000).await;
    h.ring.add_reviewer("alice").await.unwrap();
    let order = h
        .withdrawals
        .create(&ctx(), withdrawal_request(40_000))
        .await
        .unwrap();
    h.withdrawals
        .approve(&ctx(), order.id, "alice", Some(ProviderId::OrientPay))
        .await
        .unwrap();

    h.withdrawals
        .apply_callback(
            &ctx(),
            ProviderId::OrientPay,
            &payout_callback(&order.id.to_string(), "failed"),
        )
        .await
        .unwrap();
    let parked = h.withdrawal_store.get(order.id).await.unwrap().unwrap();
    assert_eq!(parked.state, WithdrawalState::AutoPayFailed);
    assert_eq!(h.ledger.balance(USER).unwrap().locked, 40_000);

    let retried = h
        .withdrawals
        .retry_autopay(&ctx(), order.id, "ops", ProviderId::OrientPay)
        .await
        .unwrap();
    assert_eq!(retried.state, WithdrawalState::Dealing);
    assert_eq!(h.gateway.withdraw_calls(), 2);

    h.withdrawals
        .apply_callback(
            &ctx(),
            ProviderId::OrientPay,
            &payout_callback(&order.id.to_string(), "success"),
        )
        .await
        .unwrap();
    assert_eq!(h.ledger.balance(USER).unwrap().locked, 0);
}

#[tokio::test]
async fn provider_refusal_leaves_the_order_dispatched() {
    let h = funded_harness(100_000).await;
    h.ring.add_reviewer("alice").await.unwrap();
    let order = h
        .withdrawals
        .create(&ctx(), withdrawal_request(40_000))
        .await
        .unwrap();

    h.gateway.set_fail_withdraw(true);
    let err = h
        .withdrawals
        .approve(&ctx(), order.id, "alice", Some(ProviderId::OrientPay))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Provider(_)));

    let unchanged = h.withdrawal_store.get(order.id).await.unwrap().unwrap();
    assert_eq!(unchanged.state, WithdrawalState::Dispatched);

    // Operator retries through the same path once the channel recovers.
    h.gateway.set_fail_withdraw(false);
    let dealing = h
        .withdrawals
        .approve(&ctx(), order.id, "alice", Some(ProviderId::OrientPay))
        .await
        .unwrap();
    assert_eq!(dealing.state, WithdrawalState::Dealing);
}

#[tokio::test]
async fn manual_payout_resolves_by_operator_verdict() {
    let h = funded_harness(100_000).await;
    h.ring.add_reviewer("alice").await.unwrap();
    let order = h
        .withdrawals
        .create(&ctx(), manual_withdrawal_request(40_000))
        .await
        .unwrap();

    // Approval without a provider means the operator pays by hand.
    let dealing = h
        .withdrawals
        .approve(&ctx(), order.id, "alice", None)
        .await
        .unwrap();
    assert_eq!(dealing.state, WithdrawalState::Dealing);
    assert!(dealing.provider.is_none());
    assert_eq!(h.gateway.withdraw_calls(), 0);

    h.withdrawals
        .resolve_manual(&ctx(), order.id, "ops", true)
        .await
        .unwrap();
    let settled = h.withdrawal_store.get(order.id).await.unwrap().unwrap();
    assert_eq!(settled.state, WithdrawalState::Success);
    assert_eq!(h.ledger.balance(USER).unwrap().locked, 0);
    assert_eq!(h.ledger.balance(USER).unwrap().available, 60_000);
}

#[tokio::test]
async fn manual_failure_refunds_the_hold() {
    let h = funded_harness(100_000).await;
    h.ring.add_reviewer("alice").await.unwrap();
    let order = h
        .withdrawals
        .create(&ctx(), manual_withdrawal_request(40_000))
        .await
        .unwrap();
    h.withdrawals
        .approve(&ctx(), order.id, "alice", None)
        .await
        .unwrap();

    h.withdrawals
        .resolve_manual(&ctx(), order.id, "ops", false)
        .await
        .unwrap();
    let failed = h.withdrawal_store.get(order.id).await.unwrap().unwrap();
    assert_eq!(failed.state, WithdrawalState::Failed);
    assert_eq!(h.ledger.balance(USER).unwrap().available, 100_000);
    assert_eq!(h.ledger.balance(USER).unwrap().locked, 0);
}

#[tokio::test]
async fn automatic_payout_in_flight_cannot_be_failed_by_hand() {
    let h = funded_harness(100_000).await;
    h.ring.add_reviewer("alice").await.unwrap();
    let order = h
        .withdrawals
        .create(&ctx(), withdrawal_request(40_000))
        .await
        .unwrap();
    h.withdrawals
        .approve(&ctx(), order.id, "alice", Some(ProviderId::OrientPay))
        .await
        .unwrap();

    // The provider may still settle this payout; refusing the manual
    // failure keeps the hold from being refunded twice.
    let err = h
        .withdrawals
        .resolve_manual(&ctx(), order.id, "ops", false)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidOrderState { .. }));
    let unchanged = h.withdrawal_store.get(order.id).await.unwrap().unwrap();
    assert_eq!(unchanged.state, WithdrawalState::Dealing);
    assert_eq!(h.ledger.balance(USER).unwrap().locked, 40_000);

    // Once the provider reports the failure, the operator verdict applies.
    h.withdrawals
        .apply_callback(
            &ctx(),
            ProviderId::OrientPay,
            &payout_callback(&order.id.to_string(), "failed"),
        )
        .await
        .unwrap();
    h.withdrawals
        .resolve_manual(&ctx(), order.id, "ops", false)
        .await
        .unwrap();
    let failed = h.withdrawal_store.get(order.id).await.unwrap().unwrap();
    assert_eq!(failed.state, WithdrawalState::Failed);
    assert_eq!(h.ledger.balance(USER).unwrap().available, 100_000);
    assert_eq!(h.ledger.balance(USER).unwrap().locked, 0);
}

#[tokio::test]
async fn duplicate_payout_callback_is_acknowledged_without_mutation() {
    let h = funded_harness(100_000).await;
    h.ring.add_reviewer("alice").await.unwrap();
    let order = h
        .withdrawals
        .create(&ctx(), withdrawal_request(40_000))
        .await
        .unwrap();
    h.withdrawals
        .approve(&ctx(), order.id, "alice", Some(ProviderId::OrientPay))
        .await
        .unwrap();

    let callback = payout_callback(&order.id.to_string(), "success");
    h.withdrawals
        .apply_callback(&ctx(), ProviderId::OrientPay, &callback)
        .await
        .unwrap();
    let ack = h
        .withdrawals
        .apply_callback(&ctx(), ProviderId::OrientPay, &callback)
        .await
        .unwrap();

    assert_eq!(ack, "OK");
    assert_eq!(h.ledger.balance(USER).unwrap().available, 60_000);
    let release_entries: Vec<_> = h
        .ledger
        .entries_for(&order.id.to_string())
        .unwrap()
        .into_iter()
        .filter(|e| e.cash_type == CashType::Withdraw)
        .collect();
    assert_eq!(release_entries.len(), 1);
}

#[tokio::test]
async fn rejecting_a_dealing_order_is_an_invalid_transition() {
    let h = funded_harness(100_000).await;
    h.ring.add_reviewer("alice").await.unwrap();
    let order = h
        .withdrawals
        .create(&ctx(), withdrawal_request(40_000))
        .await
        .unwrap();
    h.withdrawals
        .approve(&ctx(), order.id, "alice", Some(ProviderId::OrientPay))
        .await
        .unwrap();

    let err = h
        .withdrawals
        .reject(&ctx(), order.id, "alice", None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidOrderState { .. }));
    assert_eq!(h.ledger.balance(USER).unwrap().locked, 40_000);
}

#[tokio::test]
async fn callback_with_a_malformed_order_id_is_rejected() {
    let h = funded_harness(100_000).await;
    let err = h
        .withdrawals
        .apply_callback(
            &ctx(),
            ProviderId::OrientPay,
            &payout_callback("not-a-number", "success"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { .. }));
}

#[tokio::test]
async fn dispatch_round_robins_across_users() {
    let h = Harness::new();
    h.ring.add_reviewer("alice").await.unwrap();
    h.ring.add_reviewer("bob").await.unwrap();

    let mut assigned = Vec::new();
    for (i, user) in ["u1", "u2", "u3", "u4"].iter().enumerate() {
        h.ledger.credit(user, 100_000).unwrap();
        h.withdrawal_store
            .add_card(BankCard {
                id: 100 + i as i64,
                user_id: user.to_string(),
                account_name: "n".to_string(),
                account_number: "a".to_string(),
                bank_name: "b".to_string(),
            })
            .unwrap();
        let order = h
            .withdrawals
            .create(
                &ctx(),
                NewWithdrawalOrder {
                    user_id: user.to_string(),
                    card_id: 100 + i as i64,
                    amount: 10_000,
                    automatic: true,
                },
            )
            .await
            .unwrap();
        assigned.push(order.reviewer_id.unwrap());
    }
    assert_eq!(assigned, vec!["alice", "bob", "alice", "bob"]);
}
