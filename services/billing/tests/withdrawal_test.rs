mod support;

use rust_decimal::Decimal;
use uuid::Uuid;

use learnvault_billing::models::{
    PaymentProvider, PayoutChannel, WithdrawalRequestBody, WithdrawalStatus,
};
use learnvault_billing::store::Store;

use support::{
    assert_status, bank_details, build_app, seed_approved_withdrawal, seed_pending_withdrawal,
    seed_profile, ADMIN_EMAIL,
};

#[tokio::test]
async fn request_freezes_funds_and_converts_currency() {
    let app = build_app();
    let affiliate = Uuid::new_v4();
    seed_profile(&app.store, affiliate, "FUNDS1", Decimal::from(100)).await;

    let withdrawal = app
        .withdrawals
        .request(
            WithdrawalRequestBody {
                affiliate_id: affiliate,
                amount_usd: Decimal::from(40),
                currency: "NGN".to_string(),
                payout_channel: PayoutChannel::Bank,
                provider: PaymentProvider::Paystack,
                account_details: bank_details("0123456789"),
            },
            ADMIN_EMAIL,
        )
        .await
        .unwrap();

    assert_eq!(withdrawal.status, WithdrawalStatus::Pending);
    assert_eq!(withdrawal.amount_usd, Decimal::from(40));
    // 40 USD at the configured 0.001 NGN->USD rate.
    assert_eq!(withdrawal.amount_local, Decimal::from(40000));
    assert!(withdrawal.reference.starts_with("WD-"));

    let profile = app.store.profile_by_id(affiliate).await.unwrap().unwrap();
    assert_eq!(profile.available_balance, Decimal::from(60));
}

#[tokio::test]
async fn overdrawing_requests_are_rejected() {
    let app = build_app();
    let affiliate = Uuid::new_v4();
    seed_profile(&app.store, affiliate, "POOR01", Decimal::from(10)).await;

    let result = app
        .withdrawals
        .request(
            WithdrawalRequestBody {
                affiliate_id: affiliate,
                amount_usd: Decimal::from(25),
                currency: "NGN".to_string(),
                payout_channel: PayoutChannel::Bank,
                provider: PaymentProvider::Paystack,
                account_details: bank_details("0123456789"),
            },
            ADMIN_EMAIL,
        )
        .await;

    assert!(result.is_err());
    let profile = app.store.profile_by_id(affiliate).await.unwrap().unwrap();
    assert_eq!(profile.available_balance, Decimal::from(10));
}

#[tokio::test]
async fn lifecycle_happy_path_pending_approved_paid() {
    let app = build_app();
    let withdrawal =
        seed_pending_withdrawal(&app, Decimal::from(20), bank_details("0123456789")).await;

    let approved = app
        .withdrawals
        .approve(withdrawal.id, ADMIN_EMAIL)
        .await
        .unwrap();
    assert_eq!(approved.status, WithdrawalStatus::Approved);
    assert!(approved.approved_at.is_some());

    let paid = app
        .withdrawals
        .mark_paid(withdrawal.id, Some("TRF-abc".to_string()), ADMIN_EMAIL)
        .await
        .unwrap();
    assert_eq!(paid.status, WithdrawalStatus::Paid);
    assert_eq!(paid.provider_reference.as_deref(), Some("TRF-abc"));
    assert!(paid.paid_at.is_some());
}

#[tokio::test]
async fn illegal_transitions_are_rejected() {
    let app = build_app();
    let withdrawal =
        seed_pending_withdrawal(&app, Decimal::from(20), bank_details("0123456789")).await;

    // PENDING -> PAID and PENDING -> FAILED are not reachable.
    assert!(app
        .withdrawals
        .mark_paid(withdrawal.id, None, ADMIN_EMAIL)
        .await
        .is_err());
    assert!(app
        .withdrawals
        .mark_failed(withdrawal.id, "nope", ADMIN_EMAIL)
        .await
        .is_err());
    assert_status(&app, withdrawal.id, WithdrawalStatus::Pending).await;

    // Terminal states accept nothing further.
    app.withdrawals
        .reject(withdrawal.id, "fraud review", ADMIN_EMAIL)
        .await
        .unwrap();
    assert!(app
        .withdrawals
        .approve(withdrawal.id, ADMIN_EMAIL)
        .await
        .is_err());
    assert_status(&app, withdrawal.id, WithdrawalStatus::Rejected).await;
}

#[tokio::test]
async fn approved_can_fail_and_processing_can_pay() {
    let app = build_app();

    let first = seed_approved_withdrawal(&app, Decimal::from(15), bank_details("1111111111")).await;
    let failed = app
        .withdrawals
        .mark_failed(first.id, "provider declined transfer", ADMIN_EMAIL)
        .await
        .unwrap();
    assert_eq!(failed.status, WithdrawalStatus::Failed);
    assert_eq!(
        failed.failure_reason.as_deref(),
        Some("provider declined transfer")
    );

    let second = seed_approved_withdrawal(&app, Decimal::from(15), bank_details("2222222222")).await;
    app.withdrawals
        .mark_processing(second.id, ADMIN_EMAIL)
        .await
        .unwrap();
    let paid = app
        .withdrawals
        .mark_paid(second.id, None, ADMIN_EMAIL)
        .await
        .unwrap();
    assert_eq!(paid.status, WithdrawalStatus::Paid);
}

#[tokio::test]
async fn reject_and_fail_require_a_reason() {
    let app = build_app();
    let withdrawal =
        seed_pending_withdrawal(&app, Decimal::from(20), bank_details("0123456789")).await;

    assert!(app
        .withdrawals
        .reject(withdrawal.id, "   ", ADMIN_EMAIL)
        .await
        .is_err());
    assert_status(&app, withdrawal.id, WithdrawalStatus::Pending).await;

    let approved = seed_approved_withdrawal(&app, Decimal::from(20), bank_details("3333333333")).await;
    assert!(app
        .withdrawals
        .mark_failed(approved.id, "", ADMIN_EMAIL)
        .await
        .is_err());
    assert_status(&app, approved.id, WithdrawalStatus::Approved).await;
}

#[tokio::test]
async fn rejection_does_not_refund_frozen_funds() {
    let app = build_app();
    let affiliate = Uuid::new_v4();
    seed_profile(&app.store, affiliate, "FROZEN", Decimal::from(50)).await;

    let withdrawal = app
        .withdrawals
        .request(
            WithdrawalRequestBody {
                affiliate_id: affiliate,
                amount_usd: Decimal::from(30),
                currency: "NGN".to_string(),
                payout_channel: PayoutChannel::Bank,
                provider: PaymentProvider::Paystack,
                account_details: bank_details("0123456789"),
            },
            ADMIN_EMAIL,
        )
        .await
        .unwrap();

    app.withdrawals
        .reject(withdrawal.id, "destination mismatch", ADMIN_EMAIL)
        .await
        .unwrap();

    // Manual reconciliation owns the refund; the balance stays debited.
    let profile = app.store.profile_by_id(affiliate).await.unwrap().unwrap();
    assert_eq!(profile.available_balance, Decimal::from(20));
}

#[tokio::test]
async fn every_transition_appends_one_audit_row() {
    let app = build_app();
    let withdrawal =
        seed_pending_withdrawal(&app, Decimal::from(20), bank_details("0123456789")).await;

    app.withdrawals
        .approve(withdrawal.id, ADMIN_EMAIL)
        .await
        .unwrap();
    app.withdrawals
        .mark_paid(withdrawal.id, None, "finance@learnvault.io")
        .await
        .unwrap();

    let trail = app.withdrawals.audit_trail(withdrawal.id).await.unwrap();
    let actions: Vec<&str> = trail.iter().map(|a| a.action.as_str()).collect();
    assert_eq!(actions, vec!["requested", "approved", "marked_paid"]);

    assert_eq!(trail[0].previous_status, None);
    assert_eq!(trail[0].new_status, WithdrawalStatus::Pending);
    assert_eq!(trail[1].previous_status, Some(WithdrawalStatus::Pending));
    assert_eq!(trail[1].new_status, WithdrawalStatus::Approved);
    assert_eq!(trail[1].admin_email, ADMIN_EMAIL);
    assert_eq!(trail[2].previous_status, Some(WithdrawalStatus::Approved));
    assert_eq!(trail[2].new_status, WithdrawalStatus::Paid);
    assert_eq!(trail[2].admin_email, "finance@learnvault.io");
}

#[tokio::test]
async fn bulk_operations_report_partial_failure_without_rollback() {
    let app = build_app();
    let pending =
        seed_pending_withdrawal(&app, Decimal::from(10), bank_details("4444444444")).await;
    let already_approved =
        seed_approved_withdrawal(&app, Decimal::from(10), bank_details("5555555555")).await;
    let missing = Uuid::new_v4();

    let outcome = app
        .withdrawals
        .bulk_approve(&[pending.id, already_approved.id, missing], ADMIN_EMAIL)
        .await;

    assert_eq!(outcome.succeeded, vec![pending.id]);
    assert_eq!(outcome.failed.len(), 2);
    // The successful transition stays applied despite later failures.
    assert_status(&app, pending.id, WithdrawalStatus::Approved).await;
}

#[tokio::test]
async fn bulk_reject_requires_reason_per_item() {
    let app = build_app();
    let a = seed_pending_withdrawal(&app, Decimal::from(10), bank_details("6666666666")).await;
    let b = seed_pending_withdrawal(&app, Decimal::from(10), bank_details("7777777777")).await;

    let outcome = app
        .withdrawals
        .bulk_reject(&[a.id, b.id], "batch closed", ADMIN_EMAIL)
        .await;
    assert_eq!(outcome.succeeded.len(), 2);

    let trail = app.withdrawals.audit_trail(a.id).await.unwrap();
    assert_eq!(trail.last().unwrap().reason.as_deref(), Some("batch closed"));
}
