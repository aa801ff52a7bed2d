use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use learnvault_common::AppError;

use crate::models::{
    AffiliateProfile, Commission, CommissionStatus, CommissionType, LinkType, Payment, Referral,
};
use crate::rates::BASE_CURRENCY;
use crate::store::{Store, StoreError};

// Commission economics are fixed at attribution time; there is deliberately
// no configuration lookup here.
fn learner_base() -> Decimal {
    Decimal::from(10)
}

fn learner_rate() -> Decimal {
    // 0.80
    Decimal::new(80, 2)
}

fn dcs_rate() -> Decimal {
    // 0.20
    Decimal::new(20, 2)
}

/// Resolves referral codes, writes the referral + commission ledger entries
/// and the balance credit as one atomic unit, and marks link conversions.
/// Every failure path is logged and swallowed by the caller (the outbox
/// worker); nothing here ever reaches the buyer's confirmation.
#[derive(Clone)]
pub struct AttributionService {
    store: Arc<dyn Store>,
    link_base: String,
}

impl AttributionService {
    pub fn new(store: Arc<dyn Store>, link_base: impl Into<String>) -> Self {
        Self {
            store,
            link_base: link_base.into(),
        }
    }

    pub async fn attribute(
        &self,
        referred_user_id: Uuid,
        referral_code: &str,
        link_type_hint: Option<&str>,
        payment: &Payment,
    ) -> Result<(), AppError> {
        // Redelivery backstop: reconcile is idempotent, but the outbox may
        // redeliver after a partial failure.
        if self.store.referral_exists_for_payment(payment.id).await? {
            return Ok(());
        }

        let referrer_id = match self.resolve_referrer(referral_code).await? {
            Some(id) => id,
            None => {
                // Stale or malformed code; not an error.
                tracing::info!(
                    event = "attribution.skip",
                    referral_code,
                    "referral code did not resolve"
                );
                return Ok(());
            }
        };

        if referrer_id == referred_user_id {
            tracing::info!(
                event = "attribution.skip",
                referral_code,
                "self-referral ignored"
            );
            return Ok(());
        }

        self.ensure_profile(referrer_id, referral_code).await?;

        let link_type = LinkType::from_hint(link_type_hint);
        let referral = Referral {
            id: Uuid::new_v4(),
            referrer_id,
            referred_id: referred_user_id,
            referral_code: referral_code.to_uppercase(),
            link_type,
            initial_purchase_type: payment.payment_type,
            payment_id: payment.id,
            status: "completed".to_string(),
            completed_at: Utc::now(),
        };

        let commissions = build_commissions(&referral, payment.id);
        let total: Decimal = commissions.iter().map(|c| c.commission_amount).sum();

        match self.store.record_attribution(&referral, &commissions).await {
            Ok(()) => {}
            // Another delivery got there first; nothing to credit twice.
            Err(StoreError::Duplicate(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            event = "attribution.credit",
            referrer = %referrer_id,
            referred = %referred_user_id,
            link_type = link_type.as_str(),
            total = %total,
            "commissions recorded"
        );

        self.convert_latest_click(referrer_id, referred_user_id).await;
        Ok(())
    }

    async fn resolve_referrer(&self, code: &str) -> Result<Option<Uuid>, AppError> {
        if let Some(owner) = self.store.referrer_by_code(code).await? {
            return Ok(Some(owner));
        }
        // Fallback: older affiliates carry the code only on their profile.
        Ok(self
            .store
            .profile_by_code(code)
            .await?
            .map(|profile| profile.user_id))
    }

    async fn ensure_profile(&self, referrer_id: Uuid, code: &str) -> Result<(), AppError> {
        if self.store.profile_by_id(referrer_id).await?.is_some() {
            return Ok(());
        }

        let code = code.to_uppercase();
        let profile = AffiliateProfile {
            user_id: referrer_id,
            referral_code: code.clone(),
            total_earnings: Decimal::ZERO,
            available_balance: Decimal::ZERO,
            lifetime_referrals: 0,
            active_referrals: 0,
            learner_link: format!("{}?ref={}", self.link_base, code),
            dcs_link: format!("{}?ref={}&track=dcs", self.link_base, code),
            created_at: Utc::now(),
        };

        match self.store.insert_profile(&profile).await {
            Ok(()) | Err(StoreError::Duplicate(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Selection is "most recent unconverted click", an intentional
    /// approximation: there is no session correlation between the click and
    /// the conversion.
    async fn convert_latest_click(&self, referrer_id: Uuid, referred_user_id: Uuid) {
        let result = async {
            if let Some(link) = self.store.latest_unconverted_link(referrer_id).await? {
                self.store.convert_link(link.id, referred_user_id).await?;
            }
            Ok::<(), StoreError>(())
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(
                event = "attribution.link",
                referrer = %referrer_id,
                error = %e,
                "failed to mark link conversion"
            );
        }
    }
}

/// Deterministic commission split: the learner commission is always earned;
/// the DCS bonus rides on the link flavor, not on what the buyer purchased.
fn build_commissions(referral: &Referral, payment_id: Uuid) -> Vec<Commission> {
    let now = Utc::now();
    let mut commissions = vec![Commission {
        id: Uuid::new_v4(),
        affiliate_id: referral.referrer_id,
        referral_id: referral.id,
        payment_id,
        commission_type: CommissionType::LearnerInitial,
        base_amount: learner_base(),
        commission_rate: learner_rate(),
        commission_amount: learner_base() * learner_rate(),
        commission_currency: BASE_CURRENCY.to_string(),
        status: CommissionStatus::Available,
        created_at: now,
    }];

    if referral.link_type == LinkType::Dcs {
        commissions.push(Commission {
            id: Uuid::new_v4(),
            affiliate_id: referral.referrer_id,
            referral_id: referral.id,
            payment_id,
            commission_type: CommissionType::DcsAddon,
            base_amount: learner_base(),
            commission_rate: dcs_rate(),
            commission_amount: learner_base() * dcs_rate(),
            commission_currency: BASE_CURRENCY.to_string(),
            status: CommissionStatus::Available,
            created_at: now,
        });
    }

    commissions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PurchaseType;

    fn referral(link_type: LinkType) -> Referral {
        Referral {
            id: Uuid::new_v4(),
            referrer_id: Uuid::new_v4(),
            referred_id: Uuid::new_v4(),
            referral_code: "ABC123".to_string(),
            link_type,
            initial_purchase_type: PurchaseType::Learner,
            payment_id: Uuid::new_v4(),
            status: "completed".to_string(),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn learner_link_earns_eight_dollars() {
        let referral = referral(LinkType::Learner);
        let commissions = build_commissions(&referral, referral.payment_id);
        assert_eq!(commissions.len(), 1);
        assert_eq!(commissions[0].commission_type, CommissionType::LearnerInitial);
        assert_eq!(commissions[0].commission_amount, Decimal::from(8));
    }

    #[test]
    fn dcs_link_earns_ten_dollars_regardless_of_purchase() {
        let referral = referral(LinkType::Dcs);
        let commissions = build_commissions(&referral, referral.payment_id);
        let total: Decimal = commissions.iter().map(|c| c.commission_amount).sum();
        assert_eq!(commissions.len(), 2);
        assert_eq!(total, Decimal::from(10));
        assert_eq!(commissions[1].commission_type, CommissionType::DcsAddon);
        assert_eq!(commissions[1].commission_amount, Decimal::from(2));
    }
}
