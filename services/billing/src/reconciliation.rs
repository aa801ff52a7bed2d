use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use uuid::Uuid;

use learnvault_auth::PasswordService;
use learnvault_common::AppError;

use crate::config::BillingServiceConfig;
use crate::gateways::{GatewayRegistry, VerifiedTransaction};
use crate::models::{
    Account, AttributionJob, CheckoutRequest, JobStatus, NormalizedStatus, Payment,
    PaymentCompletion, PaymentProvider, PaymentStatus, PurchaseType,
};
use crate::rates::ExchangeRates;
use crate::store::{Store, StoreError};

const TEMP_CREDENTIAL_LEN: usize = 12;

#[derive(Debug, Clone)]
pub struct ReferralHint {
    pub code: String,
    pub link_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub payment: Payment,
    pub email: Option<String>,
    pub user_id: Option<Uuid>,
    pub is_new_account: bool,
    /// Present only in the response of the call that created the account;
    /// never stored or logged in the clear.
    pub temp_credential: Option<String>,
    pub credential_expires_in: Option<i64>,
    /// True for the single caller whose compare-and-swap completed the
    /// payment; only that caller dispatches attribution.
    pub performed_completion: bool,
}

#[derive(Clone)]
pub struct ReconciliationService {
    store: Arc<dyn Store>,
    registry: Arc<GatewayRegistry>,
    rates: ExchangeRates,
    pending_lookup_window_minutes: i64,
    temp_credential_ttl_hours: i64,
}

impl ReconciliationService {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<GatewayRegistry>,
        rates: ExchangeRates,
        settings: &BillingServiceConfig,
    ) -> Self {
        Self {
            store,
            registry,
            rates,
            pending_lookup_window_minutes: settings.pending_lookup_window_minutes,
            temp_credential_ttl_hours: settings.temp_credential_ttl_hours,
        }
    }

    /// Creates the pending payment row a checkout redirect will later verify.
    pub async fn initialize_checkout(&self, request: CheckoutRequest) -> Result<Payment, AppError> {
        if request.amount_minor <= 0 {
            return Err(AppError::Validation("Invalid payment amount".to_string()));
        }
        let rate = self
            .rates
            .rate_to_usd(&request.currency)
            .ok_or_else(|| {
                AppError::Validation(format!("Unsupported currency {}", request.currency))
            })?;

        let mut metadata = request.metadata.unwrap_or_else(|| json!({}));
        if let (Some(email), Some(map)) = (&request.email, metadata.as_object_mut()) {
            map.entry("email".to_string())
                .or_insert_with(|| Value::String(email.clone()));
        }

        let user_id = match &request.email {
            Some(email) => self.store.account_by_email(email).await?.map(|a| a.id),
            None => None,
        };

        let amount_major = Decimal::from(request.amount_minor) / Decimal::from(100);
        let payment = Payment {
            id: Uuid::new_v4(),
            user_id,
            reference: format!("LV-{}", Uuid::new_v4().simple()),
            provider_reference: None,
            provider: Some(request.provider),
            amount_minor: request.amount_minor,
            currency: request.currency.to_uppercase(),
            base_currency_amount: amount_major * rate,
            status: PaymentStatus::Pending,
            payment_type: request.payment_type,
            metadata,
            paid_at: None,
            created_at: Utc::now(),
        };

        self.store.insert_payment(&payment).await?;
        tracing::info!(
            event = "reconcile.checkout",
            reference = %payment.reference,
            provider = %request.provider,
            "pending payment initialized"
        );
        Ok(payment)
    }

    /// The idempotent verification entrypoint. Safe to call concurrently and
    /// repeatedly for the same reference: at most one call completes the
    /// payment, provisions an account, and dispatches attribution.
    pub async fn reconcile(
        &self,
        reference: &str,
        referral_hint: Option<ReferralHint>,
    ) -> Result<ReconcileOutcome, AppError> {
        if reference.trim().is_empty() {
            return Err(AppError::Validation("Missing payment reference".to_string()));
        }

        // Step 1: three-tier idempotent lookup.
        let existing = self.lookup_payment(reference).await?;

        // Step 2: provider verification, preferring the provider recorded on
        // the payment row. No row is created or mutated unless a provider
        // confirms success.
        let (provider, txn) = match self
            .verify_with_providers(reference, existing.as_ref().and_then(|p| p.provider))
            .await
        {
            Some(verified) => verified,
            None => {
                return Err(AppError::Payment(format!(
                    "Transaction {} could not be verified",
                    reference
                )))
            }
        };

        // Step 3: account resolution. The buyer may not have an account yet
        // when the purchase came through a marketing checkout.
        let email = extract_email(&txn, existing.as_ref());
        let (account, is_new_account, temp_credential) = self
            .resolve_account(existing.as_ref(), email.as_deref())
            .await?;
        let user_id = account.as_ref().map(|a| a.id);

        // Step 4: completing upsert, guarded by the unique provider
        // reference and the pending-only conditional update.
        let rate = self.rates.rate_to_usd(&txn.currency).ok_or_else(|| {
            AppError::Validation(format!("No configured exchange rate for {}", txn.currency))
        })?;
        let base_currency_amount = Decimal::from(txn.amount_minor) / Decimal::from(100) * rate;
        let paid_at = txn.paid_at.unwrap_or_else(Utc::now);

        let (payment, performed_completion) = match &existing {
            Some(payment) => {
                let won = self
                    .store
                    .complete_payment(&PaymentCompletion {
                        payment_id: payment.id,
                        user_id,
                        provider,
                        provider_reference: txn.reference.clone(),
                        amount_minor: txn.amount_minor,
                        currency: txn.currency.clone(),
                        base_currency_amount,
                        paid_at,
                    })
                    .await?;
                let current = self
                    .store
                    .payment_by_id(payment.id)
                    .await?
                    .ok_or_else(|| AppError::Internal("payment row vanished".to_string()))?;
                (current, won)
            }
            None => self.insert_completed(&txn, provider, user_id, base_currency_amount, paid_at).await?,
        };

        tracing::info!(
            event = "reconcile.complete",
            reference,
            provider = %provider,
            performed_completion,
            "payment reconciled"
        );

        // Step 5: attribution is dispatched durably and never blocks or
        // fails the confirmation.
        if performed_completion {
            self.dispatch_attribution(&payment, &txn, referral_hint, user_id)
                .await;
        }

        Ok(ReconcileOutcome {
            email: email.or_else(|| Some(payment.metadata["email"].as_str()?.to_string())),
            user_id,
            is_new_account,
            credential_expires_in: temp_credential
                .as_ref()
                .map(|_| self.temp_credential_ttl_hours * 3600),
            temp_credential,
            performed_completion,
            payment,
        })
    }

    /// Moves a pending payment to failed, e.g. on a provider failure webhook.
    pub async fn mark_failed(&self, reference: &str) -> Result<bool, AppError> {
        match self.lookup_payment(reference).await? {
            Some(payment) => Ok(self.store.fail_payment(payment.id).await?),
            None => Ok(false),
        }
    }

    async fn lookup_payment(&self, reference: &str) -> Result<Option<Payment>, AppError> {
        if let Some(payment) = self.store.payment_by_provider_reference(reference).await? {
            return Ok(Some(payment));
        }
        if let Some(payment) = self.store.payment_by_reference(reference).await? {
            return Ok(Some(payment));
        }
        // Different providers surface the reference under different keys;
        // the window bounds the cost of the metadata scan.
        let since = Utc::now() - Duration::minutes(self.pending_lookup_window_minutes);
        Ok(self
            .store
            .recent_pending_payment_mentioning(reference, since)
            .await?)
    }

    async fn verify_with_providers(
        &self,
        reference: &str,
        preferred: Option<PaymentProvider>,
    ) -> Option<(PaymentProvider, VerifiedTransaction)> {
        for gateway in self.registry.verification_order(preferred) {
            match gateway.verify_transaction(reference).await {
                Ok(txn) if txn.status == NormalizedStatus::Success => {
                    return Some((gateway.provider(), txn));
                }
                Ok(txn) => {
                    tracing::info!(
                        event = "reconcile.verify",
                        provider = %gateway.provider(),
                        reference,
                        status = ?txn.status,
                        "provider did not confirm success"
                    );
                }
                Err(e) => {
                    // One provider failing is not proof the transaction does
                    // not exist elsewhere; keep probing.
                    tracing::warn!(
                        event = "reconcile.verify",
                        provider = %gateway.provider(),
                        reference,
                        error = %e,
                        "provider verification errored"
                    );
                }
            }
        }
        None
    }

    async fn resolve_account(
        &self,
        existing: Option<&Payment>,
        email: Option<&str>,
    ) -> Result<(Option<Account>, bool, Option<String>), AppError> {
        if let Some(user_id) = existing.and_then(|p| p.user_id) {
            if let Some(account) = self.store.account_by_id(user_id).await? {
                return Ok((Some(account), false, None));
            }
        }

        let email = match email {
            Some(email) => email,
            None => {
                return Err(AppError::Validation(
                    "No buyer email available for this payment".to_string(),
                ))
            }
        };

        if let Some(account) = self.store.account_by_email(email).await? {
            return Ok((Some(account), false, None));
        }

        let credential = PasswordService::generate_temp_credential(TEMP_CREDENTIAL_LEN);
        let account = Account {
            id: Uuid::new_v4(),
            email: email.to_lowercase(),
            password_hash: PasswordService::hash_password(&credential)?,
            requires_password_reset: true,
            temp_credential_expires_at: Some(
                Utc::now() + Duration::hours(self.temp_credential_ttl_hours),
            ),
            created_at: Utc::now(),
        };

        match self.store.insert_account(&account).await {
            Ok(()) => {
                tracing::info!(event = "reconcile.account", email, "guest account provisioned");
                Ok((Some(account), true, Some(credential)))
            }
            // Lost the provisioning race; reuse whoever won.
            Err(StoreError::Duplicate(_)) => {
                let account = self.store.account_by_email(email).await?;
                Ok((account, false, None))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn insert_completed(
        &self,
        txn: &VerifiedTransaction,
        provider: PaymentProvider,
        user_id: Option<Uuid>,
        base_currency_amount: Decimal,
        paid_at: chrono::DateTime<Utc>,
    ) -> Result<(Payment, bool), AppError> {
        let payment = Payment {
            id: Uuid::new_v4(),
            user_id,
            reference: txn.reference.clone(),
            provider_reference: Some(txn.reference.clone()),
            provider: Some(provider),
            amount_minor: txn.amount_minor,
            currency: txn.currency.clone(),
            base_currency_amount,
            status: PaymentStatus::Completed,
            payment_type: purchase_type_from_metadata(&txn.metadata),
            metadata: if txn.metadata.is_object() {
                txn.metadata.clone()
            } else {
                json!({})
            },
            paid_at: Some(paid_at),
            created_at: Utc::now(),
        };

        match self.store.insert_payment(&payment).await {
            Ok(()) => Ok((payment, true)),
            // A concurrent caller inserted first; the unique provider
            // reference makes this race loss-free.
            Err(StoreError::Duplicate(_)) => {
                let current = self
                    .store
                    .payment_by_provider_reference(&txn.reference)
                    .await?
                    .ok_or_else(|| AppError::Internal("payment row vanished".to_string()))?;
                Ok((current, false))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn dispatch_attribution(
        &self,
        payment: &Payment,
        txn: &VerifiedTransaction,
        request_hint: Option<ReferralHint>,
        user_id: Option<Uuid>,
    ) {
        let hint = request_hint
            .or_else(|| extract_referral_hint(&txn.metadata))
            .or_else(|| extract_referral_hint(&payment.metadata));

        let (hint, referred_user_id) = match (hint, user_id) {
            (Some(hint), Some(user_id)) => (hint, user_id),
            _ => return,
        };

        let job = AttributionJob {
            id: Uuid::new_v4(),
            payment_id: payment.id,
            referred_user_id,
            referral_code: hint.code,
            link_type_hint: hint.link_type,
            attempts: 0,
            status: JobStatus::Pending,
            last_error: None,
            next_attempt_at: Utc::now(),
            created_at: Utc::now(),
        };

        // Enqueue failures are logged, never surfaced: the payment is the
        // source of truth and commission is reconciled out-of-band if lost.
        match self.store.enqueue_attribution(&job).await {
            Ok(()) => tracing::info!(
                event = "reconcile.attribution",
                payment_id = %payment.id,
                "attribution job enqueued"
            ),
            Err(StoreError::Duplicate(_)) => {}
            Err(e) => tracing::error!(
                event = "reconcile.attribution",
                payment_id = %payment.id,
                error = %e,
                "failed to enqueue attribution job"
            ),
        }
    }
}

fn extract_email(txn: &VerifiedTransaction, existing: Option<&Payment>) -> Option<String> {
    if let Some(email) = &txn.customer_email {
        return Some(email.clone());
    }
    for source in [Some(&txn.metadata), existing.map(|p| &p.metadata)]
        .into_iter()
        .flatten()
    {
        for key in ["email", "customer_email", "buyer_email"] {
            if let Some(email) = source.get(key).and_then(|v| v.as_str()) {
                return Some(email.to_string());
            }
        }
    }
    None
}

fn extract_referral_hint(metadata: &Value) -> Option<ReferralHint> {
    let code = metadata.get("referral_code")?.as_str()?.trim();
    if code.is_empty() {
        return None;
    }
    Some(ReferralHint {
        code: code.to_string(),
        link_type: metadata
            .get("referral_type")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
    })
}

pub(crate) fn purchase_type_from_metadata(metadata: &Value) -> PurchaseType {
    if metadata
        .get("has_digital_cashflow_addon")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        PurchaseType::LearnerDcs
    } else {
        PurchaseType::Learner
    }
}
