use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use learnvault_common::AppError;

use crate::models::{
    BulkOutcome, TransitionStamp, Withdrawal, WithdrawalAuditLog, WithdrawalRequestBody,
    WithdrawalStatus,
};
use crate::rates::ExchangeRates;
use crate::store::Store;

/// Withdrawal lifecycle operations. Every transition is a store-level
/// conditional write followed by one appended audit row; funds frozen at
/// request time stay frozen on rejection and failure (manual reconciliation,
/// never an automatic refund).
#[derive(Clone)]
pub struct WithdrawalService {
    store: Arc<dyn Store>,
    rates: ExchangeRates,
}

impl WithdrawalService {
    pub fn new(store: Arc<dyn Store>, rates: ExchangeRates) -> Self {
        Self { store, rates }
    }

    pub async fn request(
        &self,
        body: WithdrawalRequestBody,
        admin_email: &str,
    ) -> Result<Withdrawal, AppError> {
        if body.amount_usd <= rust_decimal::Decimal::ZERO {
            return Err(AppError::Validation("Invalid withdrawal amount".to_string()));
        }
        if !body.account_details.is_complete_for(body.payout_channel) {
            return Err(AppError::Validation(format!(
                "Incomplete {} payout details",
                body.payout_channel.as_str()
            )));
        }

        let (amount_local, exchange_rate) = self
            .rates
            .from_usd(body.amount_usd, &body.currency)
            .ok_or_else(|| {
                AppError::Validation(format!("No configured exchange rate for {}", body.currency))
            })?;

        self.store
            .profile_by_id(body.affiliate_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("affiliate profile {}", body.affiliate_id))
            })?;

        // Freeze the funds now; the conditional debit rejects overdraws.
        let debited = self
            .store
            .debit_available_balance(body.affiliate_id, body.amount_usd)
            .await?;
        if !debited {
            return Err(AppError::Validation(
                "Insufficient available balance".to_string(),
            ));
        }

        let withdrawal = Withdrawal {
            id: Uuid::new_v4(),
            reference: format!("WD-{}", Uuid::new_v4().simple()),
            affiliate_id: body.affiliate_id,
            amount_usd: body.amount_usd,
            amount_local: amount_local.round_dp(2),
            currency: body.currency.to_uppercase(),
            exchange_rate,
            payout_channel: body.payout_channel,
            account_details: body.account_details,
            status: WithdrawalStatus::Pending,
            batch_id: None,
            provider: body.provider,
            provider_reference: None,
            rejection_reason: None,
            failure_reason: None,
            requested_at: Utc::now(),
            approved_at: None,
            rejected_at: None,
            processing_at: None,
            paid_at: None,
            failed_at: None,
        };

        self.store.insert_withdrawal(&withdrawal).await?;
        self.audit(&withdrawal.id, "requested", None, WithdrawalStatus::Pending, None, admin_email)
            .await?;

        tracing::info!(
            event = "withdrawal.requested",
            reference = %withdrawal.reference,
            affiliate = %withdrawal.affiliate_id,
            amount_usd = %withdrawal.amount_usd,
            destination = %withdrawal.account_details.masked(),
            "withdrawal requested"
        );
        Ok(withdrawal)
    }

    pub async fn get(&self, id: Uuid) -> Result<Withdrawal, AppError> {
        self.store
            .withdrawal_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("withdrawal {}", id)))
    }

    /// PENDING -> APPROVED. No funds move.
    pub async fn approve(&self, id: Uuid, admin_email: &str) -> Result<Withdrawal, AppError> {
        self.transition(
            id,
            &[WithdrawalStatus::Pending],
            WithdrawalStatus::Approved,
            "approved",
            TransitionStamp::default(),
            admin_email,
        )
        .await
    }

    /// PENDING -> REJECTED; a reason is mandatory. Frozen funds are not
    /// auto-refunded.
    pub async fn reject(
        &self,
        id: Uuid,
        reason: &str,
        admin_email: &str,
    ) -> Result<Withdrawal, AppError> {
        let reason = require_reason(reason, "rejection")?;
        self.transition(
            id,
            &[WithdrawalStatus::Pending],
            WithdrawalStatus::Rejected,
            "rejected",
            TransitionStamp {
                reason: Some(reason),
                provider_reference: None,
            },
            admin_email,
        )
        .await
    }

    /// APPROVED -> PROCESSING, entered when a payout run starts.
    pub async fn mark_processing(
        &self,
        id: Uuid,
        admin_email: &str,
    ) -> Result<Withdrawal, AppError> {
        self.transition(
            id,
            &[WithdrawalStatus::Approved],
            WithdrawalStatus::Processing,
            "processing",
            TransitionStamp::default(),
            admin_email,
        )
        .await
    }

    /// APPROVED or PROCESSING -> PAID.
    pub async fn mark_paid(
        &self,
        id: Uuid,
        provider_reference: Option<String>,
        admin_email: &str,
    ) -> Result<Withdrawal, AppError> {
        self.transition(
            id,
            &[WithdrawalStatus::Approved, WithdrawalStatus::Processing],
            WithdrawalStatus::Paid,
            "marked_paid",
            TransitionStamp {
                reason: None,
                provider_reference,
            },
            admin_email,
        )
        .await
    }

    /// APPROVED or PROCESSING -> FAILED; a reason is mandatory. Funds stay
    /// frozen pending manual review.
    pub async fn mark_failed(
        &self,
        id: Uuid,
        reason: &str,
        admin_email: &str,
    ) -> Result<Withdrawal, AppError> {
        let reason = require_reason(reason, "failure")?;
        self.transition(
            id,
            &[WithdrawalStatus::Approved, WithdrawalStatus::Processing],
            WithdrawalStatus::Failed,
            "marked_failed",
            TransitionStamp {
                reason: Some(reason),
                provider_reference: None,
            },
            admin_email,
        )
        .await
    }

    /// Item-by-item, deliberately non-transactional: a failure partway
    /// through leaves earlier transitions applied and reported.
    pub async fn bulk_approve(&self, ids: &[Uuid], admin_email: &str) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for &id in ids {
            match self.approve(id, admin_email).await {
                Ok(_) => outcome.success(id),
                Err(e) => outcome.failure(id, e.to_string()),
            }
        }
        outcome
    }

    pub async fn bulk_reject(&self, ids: &[Uuid], reason: &str, admin_email: &str) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for &id in ids {
            match self.reject(id, reason, admin_email).await {
                Ok(_) => outcome.success(id),
                Err(e) => outcome.failure(id, e.to_string()),
            }
        }
        outcome
    }

    pub async fn audit_trail(&self, id: Uuid) -> Result<Vec<WithdrawalAuditLog>, AppError> {
        Ok(self.store.audit_for_withdrawal(id).await?)
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[WithdrawalStatus],
        to: WithdrawalStatus,
        action: &str,
        stamp: TransitionStamp,
        admin_email: &str,
    ) -> Result<Withdrawal, AppError> {
        let current = self.get(id).await?;

        let updated = self
            .store
            .transition_withdrawal(id, from, to, &stamp)
            .await?
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "Withdrawal {} cannot move from {} to {}",
                    id, current.status, to
                ))
            })?;

        self.audit(&id, action, Some(current.status), to, stamp.reason, admin_email)
            .await?;

        tracing::info!(
            event = "withdrawal.transition",
            withdrawal = %id,
            action,
            from = %current.status,
            to = %to,
            admin = admin_email,
            "withdrawal transitioned"
        );
        Ok(updated)
    }

    async fn audit(
        &self,
        withdrawal_id: &Uuid,
        action: &str,
        previous_status: Option<WithdrawalStatus>,
        new_status: WithdrawalStatus,
        reason: Option<String>,
        admin_email: &str,
    ) -> Result<(), AppError> {
        let entry = WithdrawalAuditLog {
            id: Uuid::new_v4(),
            withdrawal_id: *withdrawal_id,
            action: action.to_string(),
            previous_status,
            new_status,
            reason,
            admin_email: admin_email.to_string(),
            created_at: Utc::now(),
        };
        Ok(self.store.append_audit(&entry).await?)
    }
}

fn require_reason(reason: &str, kind: &str) -> Result<String, AppError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(AppError::Validation(format!(
            "A {} reason is required",
            kind
        )));
    }
    Ok(reason.to_string())
}
