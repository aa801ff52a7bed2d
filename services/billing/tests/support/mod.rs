#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

use learnvault_billing::batches::BatchService;
use learnvault_billing::config::BillingServiceConfig;
use learnvault_billing::gateways::{
    GatewayError, GatewayRegistry, PayoutReceipt, PayoutRequest, ProviderGateway,
    VerifiedTransaction,
};
use learnvault_billing::models::{
    Account, AccountDetails, AffiliateProfile, NormalizedStatus, PaymentProvider, PayoutChannel,
    ReferralCode, Withdrawal, WithdrawalRequestBody, WithdrawalStatus,
};
use learnvault_billing::outbox::OutboxWorker;
use learnvault_billing::rates::ExchangeRates;
use learnvault_billing::reconciliation::ReconciliationService;
use learnvault_billing::referrals::AttributionService;
use learnvault_billing::store::{MemoryStore, Store};
use learnvault_billing::withdrawals::WithdrawalService;

pub const ADMIN_EMAIL: &str = "ops@learnvault.io";

/// Scriptable in-process gateway: stage transactions per reference, or flip
/// the whole adapter into a failure mode.
pub struct MockGateway {
    provider: PaymentProvider,
    transactions: Mutex<HashMap<String, VerifiedTransaction>>,
    failing: AtomicBool,
}

impl MockGateway {
    pub fn new(provider: PaymentProvider) -> Arc<Self> {
        Arc::new(Self {
            provider,
            transactions: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
        })
    }

    pub fn stage(&self, txn: VerifiedTransaction) {
        self.transactions
            .lock()
            .unwrap()
            .insert(txn.reference.clone(), txn);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProviderGateway for MockGateway {
    fn provider(&self) -> PaymentProvider {
        self.provider
    }

    async fn verify_transaction(
        &self,
        reference: &str,
    ) -> Result<VerifiedTransaction, GatewayError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Network("connection refused".to_string()));
        }
        self.transactions
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or(GatewayError::Api {
                status: 404,
                body: "transaction not found".to_string(),
            })
    }

    async fn initiate_payout(
        &self,
        request: &PayoutRequest,
    ) -> Result<PayoutReceipt, GatewayError> {
        Ok(PayoutReceipt {
            provider: self.provider,
            provider_reference: format!("TRF-{}", request.reference),
            status: NormalizedStatus::Success,
        })
    }

    fn validate_webhook_signature(&self, _payload: &[u8], signature: &str) -> bool {
        signature == "valid"
    }
}

pub fn paid_txn(
    reference: &str,
    amount_minor: i64,
    currency: &str,
    email: &str,
    metadata: Value,
) -> VerifiedTransaction {
    VerifiedTransaction {
        reference: reference.to_string(),
        status: NormalizedStatus::Success,
        amount_minor,
        currency: currency.to_string(),
        paid_at: Some(Utc::now()),
        customer_email: Some(email.to_string()),
        metadata,
    }
}

pub fn settings() -> BillingServiceConfig {
    BillingServiceConfig {
        usd_rates: "NGN=0.001".to_string(),
        referral_link_base: "https://learnvault.io/join".to_string(),
        temp_credential_ttl_hours: 24,
        pending_lookup_window_minutes: 60,
        outbox_poll_seconds: 1,
        outbox_max_attempts: 3,
        // Immediate redelivery keeps the retry tests deterministic.
        outbox_backoff_seconds: 0,
    }
}

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub paystack: Arc<MockGateway>,
    pub korapay: Arc<MockGateway>,
    pub registry: Arc<GatewayRegistry>,
    pub reconciliation: ReconciliationService,
    pub attribution: AttributionService,
    pub outbox: OutboxWorker,
    pub withdrawals: WithdrawalService,
    pub batches: BatchService,
}

pub fn build_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let store_dyn: Arc<dyn Store> = store.clone();

    let paystack = MockGateway::new(PaymentProvider::Paystack);
    let korapay = MockGateway::new(PaymentProvider::Korapay);
    let gateways: Vec<Arc<dyn ProviderGateway>> = vec![paystack.clone(), korapay.clone()];
    let registry = Arc::new(GatewayRegistry::new(gateways));

    let rates = ExchangeRates::from_table("NGN=0.001");
    let settings = settings();

    let reconciliation = ReconciliationService::new(
        store_dyn.clone(),
        registry.clone(),
        rates.clone(),
        &settings,
    );
    let attribution =
        AttributionService::new(store_dyn.clone(), settings.referral_link_base.clone());
    let outbox = OutboxWorker::new(store_dyn.clone(), attribution.clone(), &settings);
    let withdrawals = WithdrawalService::new(store_dyn.clone(), rates);
    let batches = BatchService::new(store_dyn.clone(), withdrawals.clone());

    TestApp {
        store,
        paystack,
        korapay,
        registry,
        reconciliation,
        attribution,
        outbox,
        withdrawals,
        batches,
    }
}

/// Creates an account that owns an active referral code; returns the owner id.
pub async fn seed_affiliate(store: &Arc<MemoryStore>, code: &str) -> Uuid {
    let account = Account {
        id: Uuid::new_v4(),
        email: format!("{}@affiliates.test", code.to_lowercase()),
        password_hash: "$2b$12$seeded".to_string(),
        requires_password_reset: false,
        temp_credential_expires_at: None,
        created_at: Utc::now(),
    };
    store.insert_account(&account).await.unwrap();
    store
        .insert_referral_code(&ReferralCode {
            code: code.to_string(),
            owner_id: account.id,
            active: true,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    account.id
}

pub async fn seed_profile(
    store: &Arc<MemoryStore>,
    user_id: Uuid,
    code: &str,
    balance: Decimal,
) {
    store
        .insert_profile(&AffiliateProfile {
            user_id,
            referral_code: code.to_uppercase(),
            total_earnings: balance,
            available_balance: balance,
            lifetime_referrals: 0,
            active_referrals: 0,
            learner_link: format!("https://learnvault.io/join?ref={}", code),
            dcs_link: format!("https://learnvault.io/join?ref={}&track=dcs", code),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
}

pub fn bank_details(account_number: &str) -> AccountDetails {
    AccountDetails {
        account_name: "Ada Obi".to_string(),
        account_number: Some(account_number.to_string()),
        bank_code: Some("058".to_string()),
        bank_name: Some("GTBank".to_string()),
        mobile_number: None,
        mobile_network: None,
    }
}

pub fn momo_details(mobile_number: &str) -> AccountDetails {
    AccountDetails {
        account_name: "Kofi Mensah".to_string(),
        account_number: None,
        bank_code: None,
        bank_name: None,
        mobile_number: Some(mobile_number.to_string()),
        mobile_network: Some("MTN".to_string()),
    }
}

/// Seeds a funded affiliate and drives a withdrawal to PENDING through the
/// service path.
pub async fn seed_pending_withdrawal(
    app: &TestApp,
    amount_usd: Decimal,
    details: AccountDetails,
) -> Withdrawal {
    let affiliate_id = Uuid::new_v4();
    seed_profile(
        &app.store,
        affiliate_id,
        &format!("AF{}", &affiliate_id.simple().to_string()[..6].to_uppercase()),
        amount_usd * Decimal::from(10),
    )
    .await;

    app.withdrawals
        .request(
            WithdrawalRequestBody {
                affiliate_id,
                amount_usd,
                currency: "NGN".to_string(),
                payout_channel: if details.account_number.is_some() {
                    PayoutChannel::Bank
                } else {
                    PayoutChannel::MobileMoney
                },
                provider: PaymentProvider::Paystack,
                account_details: details,
            },
            ADMIN_EMAIL,
        )
        .await
        .unwrap()
}

pub async fn seed_approved_withdrawal(
    app: &TestApp,
    amount_usd: Decimal,
    details: AccountDetails,
) -> Withdrawal {
    let withdrawal = seed_pending_withdrawal(app, amount_usd, details).await;
    app.withdrawals
        .approve(withdrawal.id, ADMIN_EMAIL)
        .await
        .unwrap()
}

pub async fn assert_status(app: &TestApp, id: Uuid, status: WithdrawalStatus) {
    let withdrawal = app.store.withdrawal_by_id(id).await.unwrap().unwrap();
    assert_eq!(withdrawal.status, status);
}
