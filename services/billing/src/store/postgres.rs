use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    Account, AffiliateLink, AffiliateProfile, AttributionJob, BatchStatus, Commission,
    CommissionStatus, CommissionType, JobStatus, LinkType, Payment, PaymentCompletion,
    PaymentProvider, PaymentStatus, PurchaseType, PayoutChannel, Referral, ReferralCode,
    TransitionStamp, Withdrawal, WithdrawalAuditLog, WithdrawalBatch, WithdrawalStatus,
};

use super::{Store, StoreError, StoreResult};

/// Postgres-backed store. Conditional writes are expressed as
/// `UPDATE … WHERE <precondition>` so concurrency control stays row-level;
/// uniqueness rides on the unique indexes in the schema.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_err(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            StoreError::Duplicate(db.message().to_string())
        }
        _ => StoreError::Database(e.to_string()),
    }
}

fn parse_field<T>(value: Option<T>, field: &str) -> StoreResult<T> {
    value.ok_or_else(|| StoreError::Serialization(format!("unrecognized value in {}", field)))
}

fn payment_from_row(row: &PgRow) -> StoreResult<Payment> {
    let status: String = row.try_get("status").map_err(map_err)?;
    let payment_type: String = row.try_get("payment_type").map_err(map_err)?;
    let provider: Option<String> = row.try_get("provider").map_err(map_err)?;

    Ok(Payment {
        id: row.try_get("id").map_err(map_err)?,
        user_id: row.try_get("user_id").map_err(map_err)?,
        reference: row.try_get("reference").map_err(map_err)?,
        provider_reference: row.try_get("provider_reference").map_err(map_err)?,
        provider: match provider {
            Some(p) => Some(parse_field(PaymentProvider::parse(&p), "payments.provider")?),
            None => None,
        },
        amount_minor: row.try_get("amount_minor").map_err(map_err)?,
        currency: row.try_get("currency").map_err(map_err)?,
        base_currency_amount: row.try_get("base_currency_amount").map_err(map_err)?,
        status: parse_field(PaymentStatus::parse(&status), "payments.status")?,
        payment_type: parse_field(PurchaseType::parse(&payment_type), "payments.payment_type")?,
        metadata: row.try_get("metadata").map_err(map_err)?,
        paid_at: row.try_get("paid_at").map_err(map_err)?,
        created_at: row.try_get("created_at").map_err(map_err)?,
    })
}

fn account_from_row(row: &PgRow) -> StoreResult<Account> {
    Ok(Account {
        id: row.try_get("id").map_err(map_err)?,
        email: row.try_get("email").map_err(map_err)?,
        password_hash: row.try_get("password_hash").map_err(map_err)?,
        requires_password_reset: row.try_get("requires_password_reset").map_err(map_err)?,
        temp_credential_expires_at: row
            .try_get("temp_credential_expires_at")
            .map_err(map_err)?,
        created_at: row.try_get("created_at").map_err(map_err)?,
    })
}

fn profile_from_row(row: &PgRow) -> StoreResult<AffiliateProfile> {
    Ok(AffiliateProfile {
        user_id: row.try_get("user_id").map_err(map_err)?,
        referral_code: row.try_get("referral_code").map_err(map_err)?,
        total_earnings: row.try_get("total_earnings").map_err(map_err)?,
        available_balance: row.try_get("available_balance").map_err(map_err)?,
        lifetime_referrals: row.try_get("lifetime_referrals").map_err(map_err)?,
        active_referrals: row.try_get("active_referrals").map_err(map_err)?,
        learner_link: row.try_get("learner_link").map_err(map_err)?,
        dcs_link: row.try_get("dcs_link").map_err(map_err)?,
        created_at: row.try_get("created_at").map_err(map_err)?,
    })
}

fn referral_from_row(row: &PgRow) -> StoreResult<Referral> {
    let link_type: String = row.try_get("link_type").map_err(map_err)?;
    let purchase: String = row.try_get("initial_purchase_type").map_err(map_err)?;
    Ok(Referral {
        id: row.try_get("id").map_err(map_err)?,
        referrer_id: row.try_get("referrer_id").map_err(map_err)?,
        referred_id: row.try_get("referred_id").map_err(map_err)?,
        referral_code: row.try_get("referral_code").map_err(map_err)?,
        link_type: parse_field(LinkType::parse(&link_type), "referrals.link_type")?,
        initial_purchase_type: parse_field(
            PurchaseType::parse(&purchase),
            "referrals.initial_purchase_type",
        )?,
        payment_id: row.try_get("payment_id").map_err(map_err)?,
        status: row.try_get("status").map_err(map_err)?,
        completed_at: row.try_get("completed_at").map_err(map_err)?,
    })
}

fn commission_from_row(row: &PgRow) -> StoreResult<Commission> {
    let kind: String = row.try_get("commission_type").map_err(map_err)?;
    let status: String = row.try_get("status").map_err(map_err)?;
    Ok(Commission {
        id: row.try_get("id").map_err(map_err)?,
        affiliate_id: row.try_get("affiliate_id").map_err(map_err)?,
        referral_id: row.try_get("referral_id").map_err(map_err)?,
        payment_id: row.try_get("payment_id").map_err(map_err)?,
        commission_type: parse_field(CommissionType::parse(&kind), "commissions.commission_type")?,
        base_amount: row.try_get("base_amount").map_err(map_err)?,
        commission_rate: row.try_get("commission_rate").map_err(map_err)?,
        commission_amount: row.try_get("commission_amount").map_err(map_err)?,
        commission_currency: row.try_get("commission_currency").map_err(map_err)?,
        status: parse_field(CommissionStatus::parse(&status), "commissions.status")?,
        created_at: row.try_get("created_at").map_err(map_err)?,
    })
}

fn link_from_row(row: &PgRow) -> StoreResult<AffiliateLink> {
    let link_type: String = row.try_get("link_type").map_err(map_err)?;
    Ok(AffiliateLink {
        id: row.try_get("id").map_err(map_err)?,
        affiliate_id: row.try_get("affiliate_id").map_err(map_err)?,
        link_type: parse_field(LinkType::parse(&link_type), "affiliate_links.link_type")?,
        clicked_at: row.try_get("clicked_at").map_err(map_err)?,
        converted: row.try_get("converted").map_err(map_err)?,
        converted_user_id: row.try_get("converted_user_id").map_err(map_err)?,
    })
}

fn withdrawal_from_row(row: &PgRow) -> StoreResult<Withdrawal> {
    let status: String = row.try_get("status").map_err(map_err)?;
    let channel: String = row.try_get("payout_channel").map_err(map_err)?;
    let provider: String = row.try_get("provider").map_err(map_err)?;
    let details: serde_json::Value = row.try_get("account_details").map_err(map_err)?;

    Ok(Withdrawal {
        id: row.try_get("id").map_err(map_err)?,
        reference: row.try_get("reference").map_err(map_err)?,
        affiliate_id: row.try_get("affiliate_id").map_err(map_err)?,
        amount_usd: row.try_get("amount_usd").map_err(map_err)?,
        amount_local: row.try_get("amount_local").map_err(map_err)?,
        currency: row.try_get("currency").map_err(map_err)?,
        exchange_rate: row.try_get("exchange_rate").map_err(map_err)?,
        payout_channel: parse_field(
            PayoutChannel::parse(&channel),
            "withdrawals.payout_channel",
        )?,
        account_details: serde_json::from_value(details)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        status: parse_field(WithdrawalStatus::parse(&status), "withdrawals.status")?,
        batch_id: row.try_get("batch_id").map_err(map_err)?,
        provider: parse_field(PaymentProvider::parse(&provider), "withdrawals.provider")?,
        provider_reference: row.try_get("provider_reference").map_err(map_err)?,
        rejection_reason: row.try_get("rejection_reason").map_err(map_err)?,
        failure_reason: row.try_get("failure_reason").map_err(map_err)?,
        requested_at: row.try_get("requested_at").map_err(map_err)?,
        approved_at: row.try_get("approved_at").map_err(map_err)?,
        rejected_at: row.try_get("rejected_at").map_err(map_err)?,
        processing_at: row.try_get("processing_at").map_err(map_err)?,
        paid_at: row.try_get("paid_at").map_err(map_err)?,
        failed_at: row.try_get("failed_at").map_err(map_err)?,
    })
}

fn batch_from_row(row: &PgRow) -> StoreResult<WithdrawalBatch> {
    let status: String = row.try_get("status").map_err(map_err)?;
    let provider: String = row.try_get("provider").map_err(map_err)?;
    Ok(WithdrawalBatch {
        id: row.try_get("id").map_err(map_err)?,
        batch_reference: row.try_get("batch_reference").map_err(map_err)?,
        provider: parse_field(
            PaymentProvider::parse(&provider),
            "withdrawal_batches.provider",
        )?,
        status: parse_field(BatchStatus::parse(&status), "withdrawal_batches.status")?,
        total_withdrawals: row.try_get("total_withdrawals").map_err(map_err)?,
        total_amount_usd: row.try_get("total_amount_usd").map_err(map_err)?,
        currency: row.try_get("currency").map_err(map_err)?,
        created_at: row.try_get("created_at").map_err(map_err)?,
        finalized_at: row.try_get("finalized_at").map_err(map_err)?,
        completed_at: row.try_get("completed_at").map_err(map_err)?,
    })
}

fn audit_from_row(row: &PgRow) -> StoreResult<WithdrawalAuditLog> {
    let previous: Option<String> = row.try_get("previous_status").map_err(map_err)?;
    let new_status: String = row.try_get("new_status").map_err(map_err)?;
    Ok(WithdrawalAuditLog {
        id: row.try_get("id").map_err(map_err)?,
        withdrawal_id: row.try_get("withdrawal_id").map_err(map_err)?,
        action: row.try_get("action").map_err(map_err)?,
        previous_status: match previous {
            Some(s) => Some(parse_field(
                WithdrawalStatus::parse(&s),
                "withdrawal_audit_logs.previous_status",
            )?),
            None => None,
        },
        new_status: parse_field(
            WithdrawalStatus::parse(&new_status),
            "withdrawal_audit_logs.new_status",
        )?,
        reason: row.try_get("reason").map_err(map_err)?,
        admin_email: row.try_get("admin_email").map_err(map_err)?,
        created_at: row.try_get("created_at").map_err(map_err)?,
    })
}

fn job_from_row(row: &PgRow) -> StoreResult<AttributionJob> {
    let status: String = row.try_get("status").map_err(map_err)?;
    Ok(AttributionJob {
        id: row.try_get("id").map_err(map_err)?,
        payment_id: row.try_get("payment_id").map_err(map_err)?,
        referred_user_id: row.try_get("referred_user_id").map_err(map_err)?,
        referral_code: row.try_get("referral_code").map_err(map_err)?,
        link_type_hint: row.try_get("link_type_hint").map_err(map_err)?,
        attempts: row.try_get("attempts").map_err(map_err)?,
        status: parse_field(JobStatus::parse(&status), "attribution_jobs.status")?,
        last_error: row.try_get("last_error").map_err(map_err)?,
        next_attempt_at: row.try_get("next_attempt_at").map_err(map_err)?,
        created_at: row.try_get("created_at").map_err(map_err)?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payments
                (id, user_id, reference, provider_reference, provider, amount_minor,
                 currency, base_currency_amount, status, payment_type, metadata,
                 paid_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(payment.id)
        .bind(payment.user_id)
        .bind(&payment.reference)
        .bind(&payment.provider_reference)
        .bind(payment.provider.map(|p| p.as_str()))
        .bind(payment.amount_minor)
        .bind(&payment.currency)
        .bind(payment.base_currency_amount)
        .bind(payment.status.as_str())
        .bind(payment.payment_type.as_str())
        .bind(&payment.metadata)
        .bind(payment.paid_at)
        .bind(payment.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn payment_by_id(&self, id: Uuid) -> StoreResult<Option<Payment>> {
        let row = sqlx::query("SELECT * FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn payment_by_reference(&self, reference: &str) -> StoreResult<Option<Payment>> {
        let row = sqlx::query("SELECT * FROM payments WHERE reference = $1")
            .bind(reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn payment_by_provider_reference(
        &self,
        reference: &str,
    ) -> StoreResult<Option<Payment>> {
        let row = sqlx::query("SELECT * FROM payments WHERE provider_reference = $1")
            .bind(reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn recent_pending_payment_mentioning(
        &self,
        needle: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Option<Payment>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM payments
            WHERE status = 'pending' AND created_at >= $2 AND metadata::text LIKE $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(format!("%{}%", needle))
        .bind(since)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn complete_payment(&self, completion: &PaymentCompletion) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payments SET
                status = 'completed',
                user_id = COALESCE($2, user_id),
                provider = $3,
                provider_reference = $4,
                amount_minor = $5,
                currency = $6,
                base_currency_amount = $7,
                paid_at = $8
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(completion.payment_id)
        .bind(completion.user_id)
        .bind(completion.provider.as_str())
        .bind(&completion.provider_reference)
        .bind(completion.amount_minor)
        .bind(&completion.currency)
        .bind(completion.base_currency_amount)
        .bind(completion.paid_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn fail_payment(&self, id: Uuid) -> StoreResult<bool> {
        let result =
            sqlx::query("UPDATE payments SET status = 'failed' WHERE id = $1 AND status = 'pending'")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_account(&self, account: &Account) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts
                (id, email, password_hash, requires_password_reset,
                 temp_credential_expires_at, created_at)
            VALUES ($1, LOWER($2), $3, $4, $5, $6)
            "#,
        )
        .bind(account.id)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(account.requires_password_reset)
        .bind(account.temp_credential_expires_at)
        .bind(account.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn account_by_id(&self, id: Uuid) -> StoreResult<Option<Account>> {
        let row = sqlx::query("SELECT * FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn account_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        let row = sqlx::query("SELECT * FROM accounts WHERE email = LOWER($1)")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn insert_referral_code(&self, code: &ReferralCode) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO referral_codes (code, owner_id, active, created_at)
            VALUES (UPPER($1), $2, $3, $4)
            "#,
        )
        .bind(&code.code)
        .bind(code.owner_id)
        .bind(code.active)
        .bind(code.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn referrer_by_code(&self, code: &str) -> StoreResult<Option<Uuid>> {
        let owner: Option<Uuid> = sqlx::query_scalar(
            "SELECT owner_id FROM referral_codes WHERE code = UPPER($1) AND active",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(owner)
    }

    async fn insert_profile(&self, profile: &AffiliateProfile) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO affiliate_profiles
                (user_id, referral_code, total_earnings, available_balance,
                 lifetime_referrals, active_referrals, learner_link, dcs_link, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(profile.user_id)
        .bind(&profile.referral_code)
        .bind(profile.total_earnings)
        .bind(profile.available_balance)
        .bind(profile.lifetime_referrals)
        .bind(profile.active_referrals)
        .bind(&profile.learner_link)
        .bind(&profile.dcs_link)
        .bind(profile.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn profile_by_id(&self, user_id: Uuid) -> StoreResult<Option<AffiliateProfile>> {
        let row = sqlx::query("SELECT * FROM affiliate_profiles WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        row.as_ref().map(profile_from_row).transpose()
    }

    async fn profile_by_code(&self, code: &str) -> StoreResult<Option<AffiliateProfile>> {
        let row =
            sqlx::query("SELECT * FROM affiliate_profiles WHERE UPPER(referral_code) = UPPER($1)")
                .bind(code)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_err)?;
        row.as_ref().map(profile_from_row).transpose()
    }

    async fn debit_available_balance(&self, user_id: Uuid, amount: Decimal) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE affiliate_profiles
            SET available_balance = available_balance - $2
            WHERE user_id = $1 AND available_balance >= $2
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_attribution(
        &self,
        referral: &Referral,
        commissions: &[Commission],
    ) -> StoreResult<()> {
        let total: Decimal = commissions.iter().map(|c| c.commission_amount).sum();
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        sqlx::query(
            r#"
            INSERT INTO referrals
                (id, referrer_id, referred_id, referral_code, link_type,
                 initial_purchase_type, payment_id, status, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(referral.id)
        .bind(referral.referrer_id)
        .bind(referral.referred_id)
        .bind(&referral.referral_code)
        .bind(referral.link_type.as_str())
        .bind(referral.initial_purchase_type.as_str())
        .bind(referral.payment_id)
        .bind(&referral.status)
        .bind(referral.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;

        for commission in commissions {
            sqlx::query(
                r#"
                INSERT INTO commissions
                    (id, affiliate_id, referral_id, payment_id, commission_type,
                     base_amount, commission_rate, commission_amount,
                     commission_currency, status, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(commission.id)
            .bind(commission.affiliate_id)
            .bind(commission.referral_id)
            .bind(commission.payment_id)
            .bind(commission.commission_type.as_str())
            .bind(commission.base_amount)
            .bind(commission.commission_rate)
            .bind(commission.commission_amount)
            .bind(&commission.commission_currency)
            .bind(commission.status.as_str())
            .bind(commission.created_at)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
        }

        let updated = sqlx::query(
            r#"
            UPDATE affiliate_profiles SET
                total_earnings = total_earnings + $2,
                available_balance = available_balance + $2,
                lifetime_referrals = lifetime_referrals + 1,
                active_referrals = active_referrals + 1
            WHERE user_id = $1
            "#,
        )
        .bind(referral.referrer_id)
        .bind(total)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;

        if updated.rows_affected() != 1 {
            return Err(StoreError::NotFound(format!(
                "affiliate profile {}",
                referral.referrer_id
            )));
        }

        tx.commit().await.map_err(map_err)?;
        Ok(())
    }

    async fn referral_exists_for_payment(&self, payment_id: Uuid) -> StoreResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM referrals WHERE payment_id = $1)")
                .bind(payment_id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)?;
        Ok(exists)
    }

    async fn referrals_by_referrer(&self, referrer_id: Uuid) -> StoreResult<Vec<Referral>> {
        let rows = sqlx::query(
            "SELECT * FROM referrals WHERE referrer_id = $1 ORDER BY completed_at",
        )
        .bind(referrer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        rows.iter().map(referral_from_row).collect()
    }

    async fn commissions_by_affiliate(&self, affiliate_id: Uuid) -> StoreResult<Vec<Commission>> {
        let rows = sqlx::query(
            "SELECT * FROM commissions WHERE affiliate_id = $1 ORDER BY created_at",
        )
        .bind(affiliate_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        rows.iter().map(commission_from_row).collect()
    }

    async fn insert_affiliate_link(&self, link: &AffiliateLink) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO affiliate_links
                (id, affiliate_id, link_type, clicked_at, converted, converted_user_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(link.id)
        .bind(link.affiliate_id)
        .bind(link.link_type.as_str())
        .bind(link.clicked_at)
        .bind(link.converted)
        .bind(link.converted_user_id)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn latest_unconverted_link(
        &self,
        affiliate_id: Uuid,
    ) -> StoreResult<Option<AffiliateLink>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM affiliate_links
            WHERE affiliate_id = $1 AND NOT converted
            ORDER BY clicked_at DESC
            LIMIT 1
            "#,
        )
        .bind(affiliate_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;
        row.as_ref().map(link_from_row).transpose()
    }

    async fn convert_link(&self, link_id: Uuid, referred_user_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE affiliate_links
            SET converted = TRUE, converted_user_id = $2
            WHERE id = $1 AND NOT converted
            "#,
        )
        .bind(link_id)
        .bind(referred_user_id)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_withdrawal(&self, withdrawal: &Withdrawal) -> StoreResult<()> {
        let details = serde_json::to_value(&withdrawal.account_details)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO withdrawals
                (id, reference, affiliate_id, amount_usd, amount_local, currency,
                 exchange_rate, payout_channel, account_details, status, batch_id,
                 provider, provider_reference, rejection_reason, failure_reason,
                 requested_at, approved_at, rejected_at, processing_at, paid_at, failed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                    $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
            "#,
        )
        .bind(withdrawal.id)
        .bind(&withdrawal.reference)
        .bind(withdrawal.affiliate_id)
        .bind(withdrawal.amount_usd)
        .bind(withdrawal.amount_local)
        .bind(&withdrawal.currency)
        .bind(withdrawal.exchange_rate)
        .bind(withdrawal.payout_channel.as_str())
        .bind(details)
        .bind(withdrawal.status.as_str())
        .bind(withdrawal.batch_id)
        .bind(withdrawal.provider.as_str())
        .bind(&withdrawal.provider_reference)
        .bind(&withdrawal.rejection_reason)
        .bind(&withdrawal.failure_reason)
        .bind(withdrawal.requested_at)
        .bind(withdrawal.approved_at)
        .bind(withdrawal.rejected_at)
        .bind(withdrawal.processing_at)
        .bind(withdrawal.paid_at)
        .bind(withdrawal.failed_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn withdrawal_by_id(&self, id: Uuid) -> StoreResult<Option<Withdrawal>> {
        let row = sqlx::query("SELECT * FROM withdrawals WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        row.as_ref().map(withdrawal_from_row).transpose()
    }

    async fn transition_withdrawal(
        &self,
        id: Uuid,
        from: &[WithdrawalStatus],
        to: WithdrawalStatus,
        stamp: &TransitionStamp,
    ) -> StoreResult<Option<Withdrawal>> {
        let from_statuses: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();

        let result = match to {
            WithdrawalStatus::Approved => sqlx::query(
                r#"
                UPDATE withdrawals SET status = 'APPROVED', approved_at = NOW()
                WHERE id = $1 AND status = ANY($2)
                "#,
            )
            .bind(id)
            .bind(&from_statuses)
            .execute(&self.pool)
            .await
            .map_err(map_err)?,
            WithdrawalStatus::Rejected => sqlx::query(
                r#"
                UPDATE withdrawals
                SET status = 'REJECTED', rejected_at = NOW(), rejection_reason = $3
                WHERE id = $1 AND status = ANY($2)
                "#,
            )
            .bind(id)
            .bind(&from_statuses)
            .bind(&stamp.reason)
            .execute(&self.pool)
            .await
            .map_err(map_err)?,
            WithdrawalStatus::Processing => sqlx::query(
                r#"
                UPDATE withdrawals SET status = 'PROCESSING', processing_at = NOW()
                WHERE id = $1 AND status = ANY($2)
                "#,
            )
            .bind(id)
            .bind(&from_statuses)
            .execute(&self.pool)
            .await
            .map_err(map_err)?,
            WithdrawalStatus::Paid => sqlx::query(
                r#"
                UPDATE withdrawals
                SET status = 'PAID', paid_at = NOW(),
                    provider_reference = COALESCE($3, provider_reference)
                WHERE id = $1 AND status = ANY($2)
                "#,
            )
            .bind(id)
            .bind(&from_statuses)
            .bind(&stamp.provider_reference)
            .execute(&self.pool)
            .await
            .map_err(map_err)?,
            WithdrawalStatus::Failed => sqlx::query(
                r#"
                UPDATE withdrawals
                SET status = 'FAILED', failed_at = NOW(), failure_reason = $3
                WHERE id = $1 AND status = ANY($2)
                "#,
            )
            .bind(id)
            .bind(&from_statuses)
            .bind(&stamp.reason)
            .execute(&self.pool)
            .await
            .map_err(map_err)?,
            WithdrawalStatus::Pending => return Ok(None),
        };

        if result.rows_affected() != 1 {
            return Ok(None);
        }
        self.withdrawal_by_id(id).await
    }

    async fn assign_to_batch(&self, id: Uuid, batch_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawals SET batch_id = $2
            WHERE id = $1 AND status = 'APPROVED' AND batch_id IS NULL
            "#,
        )
        .bind(id)
        .bind(batch_id)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn remove_from_batch(&self, id: Uuid, batch_id: Uuid) -> StoreResult<bool> {
        let result =
            sqlx::query("UPDATE withdrawals SET batch_id = NULL WHERE id = $1 AND batch_id = $2")
                .bind(id)
                .bind(batch_id)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn withdrawals_in_batch(&self, batch_id: Uuid) -> StoreResult<Vec<Withdrawal>> {
        let rows = sqlx::query(
            "SELECT * FROM withdrawals WHERE batch_id = $1 ORDER BY requested_at",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        rows.iter().map(withdrawal_from_row).collect()
    }

    async fn insert_batch(&self, batch: &WithdrawalBatch) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO withdrawal_batches
                (id, batch_reference, provider, status, total_withdrawals,
                 total_amount_usd, currency, created_at, finalized_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(batch.id)
        .bind(&batch.batch_reference)
        .bind(batch.provider.as_str())
        .bind(batch.status.as_str())
        .bind(batch.total_withdrawals)
        .bind(batch.total_amount_usd)
        .bind(&batch.currency)
        .bind(batch.created_at)
        .bind(batch.finalized_at)
        .bind(batch.completed_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn batch_by_id(&self, id: Uuid) -> StoreResult<Option<WithdrawalBatch>> {
        let row = sqlx::query("SELECT * FROM withdrawal_batches WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        row.as_ref().map(batch_from_row).transpose()
    }

    async fn transition_batch(
        &self,
        id: Uuid,
        from: &[BatchStatus],
        to: BatchStatus,
    ) -> StoreResult<Option<WithdrawalBatch>> {
        let from_statuses: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();

        let result = match to {
            BatchStatus::Ready => sqlx::query(
                r#"
                UPDATE withdrawal_batches SET status = 'READY', finalized_at = NOW()
                WHERE id = $1 AND status = ANY($2)
                "#,
            ),
            BatchStatus::Completed | BatchStatus::PartiallyCompleted | BatchStatus::Failed => {
                sqlx::query(
                    r#"
                    UPDATE withdrawal_batches SET status = $3, completed_at = NOW()
                    WHERE id = $1 AND status = ANY($2)
                    "#,
                )
            }
            _ => sqlx::query(
                r#"
                UPDATE withdrawal_batches SET status = $3
                WHERE id = $1 AND status = ANY($2)
                "#,
            ),
        };

        let result = match to {
            BatchStatus::Ready => result
                .bind(id)
                .bind(&from_statuses)
                .execute(&self.pool)
                .await
                .map_err(map_err)?,
            _ => result
                .bind(id)
                .bind(&from_statuses)
                .bind(to.as_str())
                .execute(&self.pool)
                .await
                .map_err(map_err)?,
        };

        if result.rows_affected() != 1 {
            return Ok(None);
        }
        self.batch_by_id(id).await
    }

    async fn refresh_batch_totals(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE withdrawal_batches SET
                total_withdrawals = sub.cnt,
                total_amount_usd = sub.total
            FROM (
                SELECT COUNT(*) AS cnt, COALESCE(SUM(amount_usd), 0) AS total
                FROM withdrawals WHERE batch_id = $1
            ) AS sub
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn append_audit(&self, entry: &WithdrawalAuditLog) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO withdrawal_audit_logs
                (id, withdrawal_id, action, previous_status, new_status,
                 reason, admin_email, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(entry.withdrawal_id)
        .bind(&entry.action)
        .bind(entry.previous_status.map(|s| s.as_str()))
        .bind(entry.new_status.as_str())
        .bind(&entry.reason)
        .bind(&entry.admin_email)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn audit_for_withdrawal(
        &self,
        withdrawal_id: Uuid,
    ) -> StoreResult<Vec<WithdrawalAuditLog>> {
        let rows = sqlx::query(
            "SELECT * FROM withdrawal_audit_logs WHERE withdrawal_id = $1 ORDER BY created_at",
        )
        .bind(withdrawal_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        rows.iter().map(audit_from_row).collect()
    }

    async fn enqueue_attribution(&self, job: &AttributionJob) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO attribution_jobs
                (id, payment_id, referred_user_id, referral_code, link_type_hint,
                 attempts, status, last_error, next_attempt_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(job.id)
        .bind(job.payment_id)
        .bind(job.referred_user_id)
        .bind(&job.referral_code)
        .bind(&job.link_type_hint)
        .bind(job.attempts)
        .bind(job.status.as_str())
        .bind(&job.last_error)
        .bind(job.next_attempt_at)
        .bind(job.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn due_attribution_jobs(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<AttributionJob>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM attribution_jobs
            WHERE status = 'pending' AND next_attempt_at <= $1
            ORDER BY next_attempt_at
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        rows.iter().map(job_from_row).collect()
    }

    async fn attribution_job_by_id(&self, id: Uuid) -> StoreResult<Option<AttributionJob>> {
        let row = sqlx::query("SELECT * FROM attribution_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn complete_attribution_job(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE attribution_jobs SET status = 'completed' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn retry_attribution_job(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE attribution_jobs
            SET attempts = attempts + 1, last_error = $2, next_attempt_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn fail_attribution_job(&self, id: Uuid, error: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE attribution_jobs
            SET attempts = attempts + 1, status = 'failed', last_error = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }
}
