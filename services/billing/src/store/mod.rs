pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use learnvault_common::AppError;

use crate::models::{
    Account, AffiliateLink, AffiliateProfile, AttributionJob, BatchStatus, Commission, Payment,
    PaymentCompletion, Referral, ReferralCode, TransitionStamp, Withdrawal, WithdrawalAuditLog,
    WithdrawalBatch, WithdrawalStatus,
};

pub use self::memory::MemoryStore;
pub use self::postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("database error: {0}")]
    Database(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate(msg) => AppError::Conflict(msg),
            StoreError::NotFound(msg) => AppError::NotFound(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

/// The datastore contract of the billing core: keyed reads, inserts guarded
/// by unique constraints, and row-level conditional writes. No caller ever
/// takes a lock; every mutation that races carries its precondition.
#[async_trait]
pub trait Store: Send + Sync {
    // Payments

    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()>;

    async fn payment_by_id(&self, id: Uuid) -> StoreResult<Option<Payment>>;

    async fn payment_by_reference(&self, reference: &str) -> StoreResult<Option<Payment>>;

    async fn payment_by_provider_reference(&self, reference: &str)
        -> StoreResult<Option<Payment>>;

    /// Fallback lookup: the most recent pending payment created after
    /// `since` whose stored metadata mentions `needle`.
    async fn recent_pending_payment_mentioning(
        &self,
        needle: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Option<Payment>>;

    /// The completing compare-and-swap. Returns true only for the single
    /// caller that moved the row out of `pending`.
    async fn complete_payment(&self, completion: &PaymentCompletion) -> StoreResult<bool>;

    async fn fail_payment(&self, id: Uuid) -> StoreResult<bool>;

    // Accounts

    async fn insert_account(&self, account: &Account) -> StoreResult<()>;

    async fn account_by_id(&self, id: Uuid) -> StoreResult<Option<Account>>;

    async fn account_by_email(&self, email: &str) -> StoreResult<Option<Account>>;

    // Referral codes and affiliate profiles

    async fn insert_referral_code(&self, code: &ReferralCode) -> StoreResult<()>;

    /// Resolves an active referral-code record to its owner.
    async fn referrer_by_code(&self, code: &str) -> StoreResult<Option<Uuid>>;

    async fn insert_profile(&self, profile: &AffiliateProfile) -> StoreResult<()>;

    async fn profile_by_id(&self, user_id: Uuid) -> StoreResult<Option<AffiliateProfile>>;

    async fn profile_by_code(&self, code: &str) -> StoreResult<Option<AffiliateProfile>>;

    /// Conditionally debits `available_balance`; false when the balance is
    /// insufficient.
    async fn debit_available_balance(&self, user_id: Uuid, amount: Decimal) -> StoreResult<bool>;

    // Attribution ledger

    /// Inserts the referral and its commissions and credits the affiliate's
    /// balance and counters as one atomic unit. Fails with `Duplicate` if a
    /// referral already exists for the payment.
    async fn record_attribution(
        &self,
        referral: &Referral,
        commissions: &[Commission],
    ) -> StoreResult<()>;

    async fn referral_exists_for_payment(&self, payment_id: Uuid) -> StoreResult<bool>;

    async fn referrals_by_referrer(&self, referrer_id: Uuid) -> StoreResult<Vec<Referral>>;

    async fn commissions_by_affiliate(&self, affiliate_id: Uuid) -> StoreResult<Vec<Commission>>;

    // Affiliate link clicks

    async fn insert_affiliate_link(&self, link: &AffiliateLink) -> StoreResult<()>;

    async fn latest_unconverted_link(
        &self,
        affiliate_id: Uuid,
    ) -> StoreResult<Option<AffiliateLink>>;

    /// Marks a link click converted; false if it was already converted.
    async fn convert_link(&self, link_id: Uuid, referred_user_id: Uuid) -> StoreResult<bool>;

    // Withdrawals

    async fn insert_withdrawal(&self, withdrawal: &Withdrawal) -> StoreResult<()>;

    async fn withdrawal_by_id(&self, id: Uuid) -> StoreResult<Option<Withdrawal>>;

    /// Conditional status transition: applies only while the current status
    /// is one of `from`, stamping the timestamp and reason/reference fields
    /// matching `to`. Returns the updated row, or None if the precondition
    /// failed.
    async fn transition_withdrawal(
        &self,
        id: Uuid,
        from: &[WithdrawalStatus],
        to: WithdrawalStatus,
        stamp: &TransitionStamp,
    ) -> StoreResult<Option<Withdrawal>>;

    /// Stamps `batch_id` iff the withdrawal is APPROVED and unbatched.
    async fn assign_to_batch(&self, id: Uuid, batch_id: Uuid) -> StoreResult<bool>;

    /// Clears `batch_id` iff the withdrawal currently belongs to `batch_id`.
    async fn remove_from_batch(&self, id: Uuid, batch_id: Uuid) -> StoreResult<bool>;

    async fn withdrawals_in_batch(&self, batch_id: Uuid) -> StoreResult<Vec<Withdrawal>>;

    // Batches

    async fn insert_batch(&self, batch: &WithdrawalBatch) -> StoreResult<()>;

    async fn batch_by_id(&self, id: Uuid) -> StoreResult<Option<WithdrawalBatch>>;

    async fn transition_batch(
        &self,
        id: Uuid,
        from: &[BatchStatus],
        to: BatchStatus,
    ) -> StoreResult<Option<WithdrawalBatch>>;

    /// Recomputes `total_withdrawals` / `total_amount_usd` from members.
    async fn refresh_batch_totals(&self, id: Uuid) -> StoreResult<()>;

    // Audit log (append-only)

    async fn append_audit(&self, entry: &WithdrawalAuditLog) -> StoreResult<()>;

    async fn audit_for_withdrawal(
        &self,
        withdrawal_id: Uuid,
    ) -> StoreResult<Vec<WithdrawalAuditLog>>;

    // Attribution outbox

    async fn enqueue_attribution(&self, job: &AttributionJob) -> StoreResult<()>;

    async fn due_attribution_jobs(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<AttributionJob>>;

    async fn attribution_job_by_id(&self, id: Uuid) -> StoreResult<Option<AttributionJob>>;

    async fn complete_attribution_job(&self, id: Uuid) -> StoreResult<()>;

    /// Records a failed attempt and schedules redelivery.
    async fn retry_attribution_job(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Parks the job as terminally failed for out-of-band reconciliation.
    async fn fail_attribution_job(&self, id: Uuid, error: &str) -> StoreResult<()>;
}
