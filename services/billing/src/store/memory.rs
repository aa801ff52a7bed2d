use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{
    Account, AffiliateLink, AffiliateProfile, AttributionJob, BatchStatus, Commission, JobStatus,
    Payment, PaymentCompletion, PaymentStatus, Referral, ReferralCode, TransitionStamp,
    Withdrawal, WithdrawalAuditLog, WithdrawalBatch, WithdrawalStatus,
};

use super::{Store, StoreError, StoreResult};

/// In-memory store used by the test suites. A single mutex over all tables
/// makes the multi-entity writes (`record_attribution`) atomic, mirroring
/// the transaction the Postgres implementation uses.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    payments: HashMap<Uuid, Payment>,
    accounts: HashMap<Uuid, Account>,
    referral_codes: HashMap<String, ReferralCode>,
    profiles: HashMap<Uuid, AffiliateProfile>,
    referrals: Vec<Referral>,
    commissions: Vec<Commission>,
    links: HashMap<Uuid, AffiliateLink>,
    withdrawals: HashMap<Uuid, Withdrawal>,
    batches: HashMap<Uuid, WithdrawalBatch>,
    audits: Vec<WithdrawalAuditLog>,
    jobs: HashMap<Uuid, AttributionJob>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_stamp(withdrawal: &mut Withdrawal, to: WithdrawalStatus, stamp: &TransitionStamp) {
    let now = Utc::now();
    withdrawal.status = to;
    match to {
        WithdrawalStatus::Approved => withdrawal.approved_at = Some(now),
        WithdrawalStatus::Rejected => {
            withdrawal.rejected_at = Some(now);
            withdrawal.rejection_reason = stamp.reason.clone();
        }
        WithdrawalStatus::Processing => withdrawal.processing_at = Some(now),
        WithdrawalStatus::Paid => {
            withdrawal.paid_at = Some(now);
            if stamp.provider_reference.is_some() {
                withdrawal.provider_reference = stamp.provider_reference.clone();
            }
        }
        WithdrawalStatus::Failed => {
            withdrawal.failed_at = Some(now);
            withdrawal.failure_reason = stamp.reason.clone();
        }
        WithdrawalStatus::Pending => {}
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let clash = inner.payments.values().any(|p| {
            p.reference == payment.reference
                || (payment.provider_reference.is_some()
                    && p.provider_reference == payment.provider_reference)
        });
        if clash {
            return Err(StoreError::Duplicate(format!(
                "payment reference {}",
                payment.reference
            )));
        }
        inner.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn payment_by_id(&self, id: Uuid) -> StoreResult<Option<Payment>> {
        Ok(self.inner.lock().await.payments.get(&id).cloned())
    }

    async fn payment_by_reference(&self, reference: &str) -> StoreResult<Option<Payment>> {
        Ok(self
            .inner
            .lock()
            .await
            .payments
            .values()
            .find(|p| p.reference == reference)
            .cloned())
    }

    async fn payment_by_provider_reference(
        &self,
        reference: &str,
    ) -> StoreResult<Option<Payment>> {
        Ok(self
            .inner
            .lock()
            .await
            .payments
            .values()
            .find(|p| p.provider_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn recent_pending_payment_mentioning(
        &self,
        needle: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Option<Payment>> {
        let inner = self.inner.lock().await;
        let mut candidates: Vec<&Payment> = inner
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Pending && p.created_at >= since)
            .filter(|p| {
                serde_json::to_string(&p.metadata)
                    .map(|s| s.contains(needle))
                    .unwrap_or(false)
            })
            .collect();
        candidates.sort_by_key(|p| p.created_at);
        Ok(candidates.last().map(|p| (*p).clone()))
    }

    async fn complete_payment(&self, completion: &PaymentCompletion) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;

        let reference_taken = inner.payments.values().any(|p| {
            p.id != completion.payment_id
                && p.provider_reference.as_deref() == Some(completion.provider_reference.as_str())
        });
        if reference_taken {
            return Err(StoreError::Duplicate(format!(
                "provider reference {}",
                completion.provider_reference
            )));
        }

        let payment = inner
            .payments
            .get_mut(&completion.payment_id)
            .ok_or_else(|| StoreError::NotFound(format!("payment {}", completion.payment_id)))?;

        if payment.status != PaymentStatus::Pending {
            return Ok(false);
        }

        payment.status = PaymentStatus::Completed;
        payment.provider = Some(completion.provider);
        payment.provider_reference = Some(completion.provider_reference.clone());
        payment.amount_minor = completion.amount_minor;
        payment.currency = completion.currency.clone();
        payment.base_currency_amount = completion.base_currency_amount;
        payment.paid_at = Some(completion.paid_at);
        if completion.user_id.is_some() {
            payment.user_id = completion.user_id;
        }
        Ok(true)
    }

    async fn fail_payment(&self, id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let payment = inner
            .payments
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("payment {}", id)))?;
        if payment.status != PaymentStatus::Pending {
            return Ok(false);
        }
        payment.status = PaymentStatus::Failed;
        Ok(true)
    }

    async fn insert_account(&self, account: &Account) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if inner
            .accounts
            .values()
            .any(|a| a.email.eq_ignore_ascii_case(&account.email))
        {
            return Err(StoreError::Duplicate(format!("account {}", account.email)));
        }
        inner.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn account_by_id(&self, id: Uuid) -> StoreResult<Option<Account>> {
        Ok(self.inner.lock().await.accounts.get(&id).cloned())
    }

    async fn account_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        Ok(self
            .inner
            .lock()
            .await
            .accounts
            .values()
            .find(|a| a.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn insert_referral_code(&self, code: &ReferralCode) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let key = code.code.to_uppercase();
        if inner.referral_codes.contains_key(&key) {
            return Err(StoreError::Duplicate(format!("referral code {}", code.code)));
        }
        inner.referral_codes.insert(key, code.clone());
        Ok(())
    }

    async fn referrer_by_code(&self, code: &str) -> StoreResult<Option<Uuid>> {
        Ok(self
            .inner
            .lock()
            .await
            .referral_codes
            .get(&code.to_uppercase())
            .filter(|c| c.active)
            .map(|c| c.owner_id))
    }

    async fn insert_profile(&self, profile: &AffiliateProfile) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.profiles.contains_key(&profile.user_id) {
            return Err(StoreError::Duplicate(format!(
                "affiliate profile {}",
                profile.user_id
            )));
        }
        inner.profiles.insert(profile.user_id, profile.clone());
        Ok(())
    }

    async fn profile_by_id(&self, user_id: Uuid) -> StoreResult<Option<AffiliateProfile>> {
        Ok(self.inner.lock().await.profiles.get(&user_id).cloned())
    }

    async fn profile_by_code(&self, code: &str) -> StoreResult<Option<AffiliateProfile>> {
        Ok(self
            .inner
            .lock()
            .await
            .profiles
            .values()
            .find(|p| p.referral_code.eq_ignore_ascii_case(code))
            .cloned())
    }

    async fn debit_available_balance(&self, user_id: Uuid, amount: Decimal) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let profile = inner
            .profiles
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("affiliate profile {}", user_id)))?;
        if profile.available_balance < amount {
            return Ok(false);
        }
        profile.available_balance -= amount;
        Ok(true)
    }

    async fn record_attribution(
        &self,
        referral: &Referral,
        commissions: &[Commission],
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;

        if inner
            .referrals
            .iter()
            .any(|r| r.payment_id == referral.payment_id)
        {
            return Err(StoreError::Duplicate(format!(
                "referral for payment {}",
                referral.payment_id
            )));
        }

        let total: Decimal = commissions.iter().map(|c| c.commission_amount).sum();

        let profile = inner
            .profiles
            .get_mut(&referral.referrer_id)
            .ok_or_else(|| {
                StoreError::NotFound(format!("affiliate profile {}", referral.referrer_id))
            })?;
        profile.total_earnings += total;
        profile.available_balance += total;
        profile.lifetime_referrals += 1;
        profile.active_referrals += 1;

        inner.referrals.push(referral.clone());
        inner.commissions.extend(commissions.iter().cloned());
        Ok(())
    }

    async fn referral_exists_for_payment(&self, payment_id: Uuid) -> StoreResult<bool> {
        Ok(self
            .inner
            .lock()
            .await
            .referrals
            .iter()
            .any(|r| r.payment_id == payment_id))
    }

    async fn referrals_by_referrer(&self, referrer_id: Uuid) -> StoreResult<Vec<Referral>> {
        Ok(self
            .inner
            .lock()
            .await
            .referrals
            .iter()
            .filter(|r| r.referrer_id == referrer_id)
            .cloned()
            .collect())
    }

    async fn commissions_by_affiliate(&self, affiliate_id: Uuid) -> StoreResult<Vec<Commission>> {
        Ok(self
            .inner
            .lock()
            .await
            .commissions
            .iter()
            .filter(|c| c.affiliate_id == affiliate_id)
            .cloned()
            .collect())
    }

    async fn insert_affiliate_link(&self, link: &AffiliateLink) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.links.insert(link.id, link.clone());
        Ok(())
    }

    async fn latest_unconverted_link(
        &self,
        affiliate_id: Uuid,
    ) -> StoreResult<Option<AffiliateLink>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .links
            .values()
            .filter(|l| l.affiliate_id == affiliate_id && !l.converted)
            .max_by_key(|l| l.clicked_at)
            .cloned())
    }

    async fn convert_link(&self, link_id: Uuid, referred_user_id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let link = inner
            .links
            .get_mut(&link_id)
            .ok_or_else(|| StoreError::NotFound(format!("affiliate link {}", link_id)))?;
        if link.converted {
            return Ok(false);
        }
        link.converted = true;
        link.converted_user_id = Some(referred_user_id);
        Ok(true)
    }

    async fn insert_withdrawal(&self, withdrawal: &Withdrawal) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if inner
            .withdrawals
            .values()
            .any(|w| w.reference == withdrawal.reference)
        {
            return Err(StoreError::Duplicate(format!(
                "withdrawal reference {}",
                withdrawal.reference
            )));
        }
        inner.withdrawals.insert(withdrawal.id, withdrawal.clone());
        Ok(())
    }

    async fn withdrawal_by_id(&self, id: Uuid) -> StoreResult<Option<Withdrawal>> {
        Ok(self.inner.lock().await.withdrawals.get(&id).cloned())
    }

    async fn transition_withdrawal(
        &self,
        id: Uuid,
        from: &[WithdrawalStatus],
        to: WithdrawalStatus,
        stamp: &TransitionStamp,
    ) -> StoreResult<Option<Withdrawal>> {
        let mut inner = self.inner.lock().await;
        let withdrawal = inner
            .withdrawals
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("withdrawal {}", id)))?;

        if !from.contains(&withdrawal.status) {
            return Ok(None);
        }

        apply_stamp(withdrawal, to, stamp);
        Ok(Some(withdrawal.clone()))
    }

    async fn assign_to_batch(&self, id: Uuid, batch_id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let withdrawal = inner
            .withdrawals
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("withdrawal {}", id)))?;
        if withdrawal.status != WithdrawalStatus::Approved || withdrawal.batch_id.is_some() {
            return Ok(false);
        }
        withdrawal.batch_id = Some(batch_id);
        Ok(true)
    }

    async fn remove_from_batch(&self, id: Uuid, batch_id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let withdrawal = inner
            .withdrawals
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("withdrawal {}", id)))?;
        if withdrawal.batch_id != Some(batch_id) {
            return Ok(false);
        }
        withdrawal.batch_id = None;
        Ok(true)
    }

    async fn withdrawals_in_batch(&self, batch_id: Uuid) -> StoreResult<Vec<Withdrawal>> {
        let mut members: Vec<Withdrawal> = self
            .inner
            .lock()
            .await
            .withdrawals
            .values()
            .filter(|w| w.batch_id == Some(batch_id))
            .cloned()
            .collect();
        members.sort_by_key(|w| w.requested_at);
        Ok(members)
    }

    async fn insert_batch(&self, batch: &WithdrawalBatch) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.batches.insert(batch.id, batch.clone());
        Ok(())
    }

    async fn batch_by_id(&self, id: Uuid) -> StoreResult<Option<WithdrawalBatch>> {
        Ok(self.inner.lock().await.batches.get(&id).cloned())
    }

    async fn transition_batch(
        &self,
        id: Uuid,
        from: &[BatchStatus],
        to: BatchStatus,
    ) -> StoreResult<Option<WithdrawalBatch>> {
        let mut inner = self.inner.lock().await;
        let batch = inner
            .batches
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("batch {}", id)))?;
        if !from.contains(&batch.status) {
            return Ok(None);
        }
        batch.status = to;
        let now = Utc::now();
        match to {
            BatchStatus::Ready => batch.finalized_at = Some(now),
            BatchStatus::Completed | BatchStatus::PartiallyCompleted | BatchStatus::Failed => {
                batch.completed_at = Some(now)
            }
            _ => {}
        }
        Ok(Some(batch.clone()))
    }

    async fn refresh_batch_totals(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let (count, total) = inner
            .withdrawals
            .values()
            .filter(|w| w.batch_id == Some(id))
            .fold((0i64, Decimal::ZERO), |(count, total), w| {
                (count + 1, total + w.amount_usd)
            });
        let batch = inner
            .batches
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("batch {}", id)))?;
        batch.total_withdrawals = count;
        batch.total_amount_usd = total;
        Ok(())
    }

    async fn append_audit(&self, entry: &WithdrawalAuditLog) -> StoreResult<()> {
        self.inner.lock().await.audits.push(entry.clone());
        Ok(())
    }

    async fn audit_for_withdrawal(
        &self,
        withdrawal_id: Uuid,
    ) -> StoreResult<Vec<WithdrawalAuditLog>> {
        Ok(self
            .inner
            .lock()
            .await
            .audits
            .iter()
            .filter(|a| a.withdrawal_id == withdrawal_id)
            .cloned()
            .collect())
    }

    async fn enqueue_attribution(&self, job: &AttributionJob) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if inner
            .jobs
            .values()
            .any(|j| j.payment_id == job.payment_id)
        {
            return Err(StoreError::Duplicate(format!(
                "attribution job for payment {}",
                job.payment_id
            )));
        }
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn due_attribution_jobs(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<AttributionJob>> {
        let inner = self.inner.lock().await;
        let mut due: Vec<AttributionJob> = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && j.next_attempt_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|j| j.next_attempt_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn attribution_job_by_id(&self, id: Uuid) -> StoreResult<Option<AttributionJob>> {
        Ok(self.inner.lock().await.jobs.get(&id).cloned())
    }

    async fn complete_attribution_job(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("attribution job {}", id)))?;
        job.status = JobStatus::Completed;
        Ok(())
    }

    async fn retry_attribution_job(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("attribution job {}", id)))?;
        job.attempts += 1;
        job.last_error = Some(error.to_string());
        job.next_attempt_at = next_attempt_at;
        Ok(())
    }

    async fn fail_attribution_job(&self, id: Uuid, error: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("attribution job {}", id)))?;
        job.attempts += 1;
        job.status = JobStatus::Failed;
        job.last_error = Some(error.to_string());
        Ok(())
    }
}
