mod support;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use learnvault_billing::models::{
    AffiliateLink, CommissionType, LinkType, PaymentStatus, PurchaseType,
};
use learnvault_billing::store::Store;

use support::{build_app, paid_txn, seed_affiliate, seed_profile, TestApp};

async fn reconcile_referred_purchase(app: &TestApp, reference: &str, email: &str, code: &str) {
    app.paystack.stage(paid_txn(
        reference,
        1000,
        "USD",
        email,
        json!({"referral_code": code, "referral_type": "dcs", "has_digital_cashflow_addon": false}),
    ));
    app.reconciliation.reconcile(reference, None).await.unwrap();
    app.outbox.run_once().await.unwrap();
}

#[tokio::test]
async fn balances_are_conserved_across_many_referrals() {
    let app = build_app();
    let referrer = seed_affiliate(&app.store, "CONSRV").await;

    for i in 0..5 {
        reconcile_referred_purchase(
            &app,
            &format!("TXN-C{}", i),
            &format!("buyer{}@example.com", i),
            "CONSRV",
        )
        .await;
    }

    let profile = app.store.profile_by_id(referrer).await.unwrap().unwrap();
    let commissions = app.store.commissions_by_affiliate(referrer).await.unwrap();
    let ledger_total: Decimal = commissions.iter().map(|c| c.commission_amount).sum();

    assert_eq!(profile.lifetime_referrals, 5);
    assert_eq!(profile.active_referrals, 5);
    assert_eq!(ledger_total, Decimal::from(50));
    assert_eq!(profile.total_earnings, ledger_total);
    assert_eq!(profile.available_balance, ledger_total);
}

#[tokio::test]
async fn commission_split_follows_link_type_not_purchase() {
    let app = build_app();
    let referrer = seed_affiliate(&app.store, "SPLIT1").await;

    // DCS link, but the buyer did NOT purchase the add-on: the bonus is for
    // the link flavor, so the total is still $10.
    app.paystack.stage(paid_txn(
        "TXN-S1",
        1000,
        "USD",
        "s1@example.com",
        json!({"referral_code": "SPLIT1", "referral_type": "dcs", "has_digital_cashflow_addon": false}),
    ));
    app.reconciliation.reconcile("TXN-S1", None).await.unwrap();
    app.outbox.run_once().await.unwrap();

    let commissions = app.store.commissions_by_affiliate(referrer).await.unwrap();
    assert_eq!(commissions.len(), 2);
    assert_eq!(commissions[0].commission_type, CommissionType::LearnerInitial);
    assert_eq!(commissions[0].commission_rate, Decimal::new(80, 2));
    assert_eq!(commissions[1].commission_type, CommissionType::DcsAddon);

    let referrals = app.store.referrals_by_referrer(referrer).await.unwrap();
    assert_eq!(referrals[0].link_type, LinkType::Dcs);
    assert_eq!(referrals[0].initial_purchase_type, PurchaseType::Learner);
}

#[tokio::test]
async fn self_referral_is_ignored() {
    let app = build_app();
    let referrer = seed_affiliate(&app.store, "SELF01").await;

    // The referrer buys through their own link.
    app.paystack.stage(paid_txn(
        "TXN-SELF",
        1000,
        "USD",
        "self01@affiliates.test",
        json!({"referral_code": "SELF01", "referral_type": "learner"}),
    ));
    app.reconciliation.reconcile("TXN-SELF", None).await.unwrap();
    app.outbox.run_once().await.unwrap();

    assert!(app
        .store
        .referrals_by_referrer(referrer)
        .await
        .unwrap()
        .is_empty());
    assert!(app
        .store
        .commissions_by_affiliate(referrer)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn unresolvable_code_aborts_silently_and_payment_stands() {
    let app = build_app();

    app.paystack.stage(paid_txn(
        "TXN-STALE",
        1000,
        "USD",
        "stale@example.com",
        json!({"referral_code": "NOSUCH"}),
    ));

    let outcome = app
        .reconciliation
        .reconcile("TXN-STALE", None)
        .await
        .unwrap();
    app.outbox.run_once().await.unwrap();

    assert_eq!(outcome.payment.status, PaymentStatus::Completed);
    // Job drained without crediting anyone.
    let due = app
        .store
        .due_attribution_jobs(Utc::now(), 10)
        .await
        .unwrap();
    assert!(due.is_empty());
}

#[tokio::test]
async fn profile_code_is_the_fallback_resolution_path() {
    let app = build_app();

    // No referral-code record; only a profile carries the code.
    let legacy_affiliate = Uuid::new_v4();
    seed_profile(&app.store, legacy_affiliate, "LEGACY", Decimal::ZERO).await;

    app.paystack.stage(paid_txn(
        "TXN-LEG",
        1000,
        "USD",
        "legacy-buyer@example.com",
        json!({"referral_code": "legacy", "referral_type": "learner"}),
    ));
    app.reconciliation.reconcile("TXN-LEG", None).await.unwrap();
    app.outbox.run_once().await.unwrap();

    let profile = app
        .store
        .profile_by_id(legacy_affiliate)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(profile.total_earnings, Decimal::from(8));
    assert_eq!(profile.lifetime_referrals, 1);
}

#[tokio::test]
async fn lazily_created_profile_carries_promotional_links() {
    let app = build_app();
    let referrer = seed_affiliate(&app.store, "FRESH9").await;

    reconcile_referred_purchase(&app, "TXN-L1", "l1@example.com", "FRESH9").await;

    let profile = app.store.profile_by_id(referrer).await.unwrap().unwrap();
    assert_eq!(
        profile.learner_link,
        "https://learnvault.io/join?ref=FRESH9"
    );
    assert_eq!(
        profile.dcs_link,
        "https://learnvault.io/join?ref=FRESH9&track=dcs"
    );
    assert_eq!(profile.referral_code, "FRESH9");
}

#[tokio::test]
async fn most_recent_unconverted_click_is_marked() {
    let app = build_app();
    let referrer = seed_affiliate(&app.store, "CLICKS").await;

    let older = AffiliateLink {
        id: Uuid::new_v4(),
        affiliate_id: referrer,
        link_type: LinkType::Learner,
        clicked_at: Utc::now() - Duration::hours(2),
        converted: false,
        converted_user_id: None,
    };
    let newer = AffiliateLink {
        id: Uuid::new_v4(),
        affiliate_id: referrer,
        link_type: LinkType::Dcs,
        clicked_at: Utc::now() - Duration::minutes(5),
        converted: false,
        converted_user_id: None,
    };
    app.store.insert_affiliate_link(&older).await.unwrap();
    app.store.insert_affiliate_link(&newer).await.unwrap();

    reconcile_referred_purchase(&app, "TXN-CLK", "clicker@example.com", "CLICKS").await;

    // "Most recent unconverted click" wins; there is no session correlation.
    let remaining = app
        .store
        .latest_unconverted_link(referrer)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(remaining.id, older.id);
}

#[tokio::test]
async fn redelivered_attribution_does_not_double_credit() {
    let app = build_app();
    let referrer = seed_affiliate(&app.store, "REDELV").await;

    reconcile_referred_purchase(&app, "TXN-RD", "rd@example.com", "REDELV").await;

    let payment = app
        .store
        .payment_by_provider_reference("TXN-RD")
        .await
        .unwrap()
        .unwrap();

    // Simulate the outbox redelivering after a crash between the ledger
    // write and the job acknowledgement.
    app.attribution
        .attribute(payment.user_id.unwrap(), "REDELV", Some("dcs"), &payment)
        .await
        .unwrap();

    let profile = app.store.profile_by_id(referrer).await.unwrap().unwrap();
    assert_eq!(profile.total_earnings, Decimal::from(10));
    assert_eq!(profile.lifetime_referrals, 1);
}
