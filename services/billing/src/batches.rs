use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use learnvault_common::AppError;

use crate::models::{
    BatchStatus, BulkOutcome, CsvExport, PaymentProvider, PayoutChannel, Withdrawal,
    WithdrawalBatch, WithdrawalStatus,
};
use crate::withdrawals::WithdrawalService;
use crate::store::Store;

/// Batch lifecycle: DRAFT batches collect approved withdrawals, finalize
/// freezes membership, export produces the provider upload file, and
/// mark-all-paid drives the member-level transitions that the batch status
/// is then derived from.
#[derive(Clone)]
pub struct BatchService {
    store: Arc<dyn Store>,
    withdrawals: WithdrawalService,
}

impl BatchService {
    pub fn new(store: Arc<dyn Store>, withdrawals: WithdrawalService) -> Self {
        Self { store, withdrawals }
    }

    pub async fn create(
        &self,
        provider: PaymentProvider,
        currency: &str,
    ) -> Result<WithdrawalBatch, AppError> {
        let now = Utc::now();
        let batch = WithdrawalBatch {
            id: Uuid::new_v4(),
            batch_reference: format!(
                "BATCH-{}-{}",
                now.format("%Y%m%d"),
                &Uuid::new_v4().simple().to_string()[..8]
            ),
            provider,
            status: BatchStatus::Draft,
            total_withdrawals: 0,
            total_amount_usd: Decimal::ZERO,
            currency: currency.to_uppercase(),
            created_at: now,
            finalized_at: None,
            completed_at: None,
        };
        self.store.insert_batch(&batch).await?;
        tracing::info!(
            event = "batch.created",
            batch = %batch.batch_reference,
            provider = %provider,
            "draft batch created"
        );
        Ok(batch)
    }

    pub async fn get(&self, id: Uuid) -> Result<WithdrawalBatch, AppError> {
        self.store
            .batch_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("batch {}", id)))
    }

    /// Adds APPROVED, unbatched withdrawals to a DRAFT batch. Partial
    /// success is reported per id.
    pub async fn add_withdrawals(
        &self,
        batch_id: Uuid,
        ids: &[Uuid],
    ) -> Result<BulkOutcome, AppError> {
        let batch = self.get(batch_id).await?;
        if batch.status != BatchStatus::Draft {
            return Err(AppError::Validation(format!(
                "Batch {} is {}, only DRAFT batches accept members",
                batch.batch_reference,
                batch.status.as_str()
            )));
        }

        let mut outcome = BulkOutcome::default();
        for &id in ids {
            match self.try_add(&batch, id).await {
                Ok(()) => outcome.success(id),
                Err(e) => outcome.failure(id, e.to_string()),
            }
        }

        self.store.refresh_batch_totals(batch_id).await?;
        Ok(outcome)
    }

    async fn try_add(&self, batch: &WithdrawalBatch, id: Uuid) -> Result<(), AppError> {
        let withdrawal = self.withdrawals.get(id).await?;
        if withdrawal.provider != batch.provider {
            return Err(AppError::Validation(format!(
                "withdrawal {} targets {}, batch pays out via {}",
                id, withdrawal.provider, batch.provider
            )));
        }
        if withdrawal.currency != batch.currency {
            return Err(AppError::Validation(format!(
                "withdrawal {} is denominated in {}, batch is {}",
                id, withdrawal.currency, batch.currency
            )));
        }

        // Conditional stamp: only APPROVED and unbatched rows pass, which is
        // what makes membership exclusive across batches.
        let assigned = self.store.assign_to_batch(id, batch.id).await?;
        if !assigned {
            return Err(AppError::Conflict(format!(
                "withdrawal {} is not approved or already belongs to a batch",
                id
            )));
        }
        Ok(())
    }

    /// Removes members while the batch is still DRAFT.
    pub async fn remove_withdrawals(
        &self,
        batch_id: Uuid,
        ids: &[Uuid],
    ) -> Result<BulkOutcome, AppError> {
        let batch = self.get(batch_id).await?;
        if batch.status != BatchStatus::Draft {
            return Err(AppError::Validation(format!(
                "Batch {} is {}, membership is frozen",
                batch.batch_reference,
                batch.status.as_str()
            )));
        }

        let mut outcome = BulkOutcome::default();
        for &id in ids {
            match self.store.remove_from_batch(id, batch_id).await {
                Ok(true) => outcome.success(id),
                Ok(false) => outcome.failure(id, "not a member of this batch"),
                Err(e) => outcome.failure(id, e.to_string()),
            }
        }

        self.store.refresh_batch_totals(batch_id).await?;
        Ok(outcome)
    }

    /// DRAFT -> READY. Empty batches cannot be finalized.
    pub async fn finalize(&self, batch_id: Uuid) -> Result<WithdrawalBatch, AppError> {
        let batch = self.get(batch_id).await?;
        let members = self.store.withdrawals_in_batch(batch_id).await?;
        if members.is_empty() {
            return Err(AppError::Validation(
                "Cannot finalize an empty batch".to_string(),
            ));
        }

        self.store.refresh_batch_totals(batch_id).await?;
        self.store
            .transition_batch(batch_id, &[BatchStatus::Draft], BatchStatus::Ready)
            .await?
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "Batch {} is {}, only DRAFT batches can be finalized",
                    batch.batch_reference,
                    batch.status.as_str()
                ))
            })
    }

    /// Produces the provider-ready payout file for a READY or PROCESSING
    /// batch. Validates destination completeness, surfaces duplicate payout
    /// destinations as warnings, and moves a READY batch (and its members)
    /// into PROCESSING: the exported file is the start of the payout run.
    pub async fn export_csv(
        &self,
        batch_id: Uuid,
        admin_email: &str,
    ) -> Result<CsvExport, AppError> {
        let batch = self.get(batch_id).await?;
        if !matches!(batch.status, BatchStatus::Ready | BatchStatus::Processing) {
            return Err(AppError::Validation(format!(
                "Batch {} is {}, export requires READY or PROCESSING",
                batch.batch_reference,
                batch.status.as_str()
            )));
        }

        let members = self.store.withdrawals_in_batch(batch_id).await?;

        let incomplete: Vec<&Withdrawal> = members
            .iter()
            .filter(|w| !w.account_details.is_complete_for(w.payout_channel))
            .collect();
        if !incomplete.is_empty() {
            let references: Vec<&str> =
                incomplete.iter().map(|w| w.reference.as_str()).collect();
            return Err(AppError::Validation(format!(
                "Withdrawals with incomplete payout details: {}",
                references.join(", ")
            )));
        }

        let warnings = duplicate_destination_warnings(&members);

        if batch.status == BatchStatus::Ready {
            self.store
                .transition_batch(batch_id, &[BatchStatus::Ready], BatchStatus::Processing)
                .await?;
            for member in &members {
                if member.status == WithdrawalStatus::Approved {
                    // Already-processing members (re-export) are left alone.
                    if let Err(e) = self
                        .withdrawals
                        .mark_processing(member.id, admin_email)
                        .await
                    {
                        tracing::warn!(
                            withdrawal = %member.id,
                            error = %e,
                            "could not move member to PROCESSING"
                        );
                    }
                }
            }
        }

        let content = render_csv(batch.provider, &members);

        tracing::info!(
            event = "batch.export",
            batch = %batch.batch_reference,
            members = members.len(),
            warnings = warnings.len(),
            "payout file exported"
        );

        Ok(CsvExport {
            filename: format!("{}-payouts.csv", batch.batch_reference),
            content,
            warnings,
        })
    }

    /// Calls the withdrawal-level mark-paid for every APPROVED/PROCESSING
    /// member, then derives the batch terminal status from member terminals.
    pub async fn mark_all_paid(
        &self,
        batch_id: Uuid,
        admin_email: &str,
    ) -> Result<(BulkOutcome, WithdrawalBatch), AppError> {
        let batch = self.get(batch_id).await?;
        if !matches!(batch.status, BatchStatus::Ready | BatchStatus::Processing) {
            return Err(AppError::Validation(format!(
                "Batch {} is {}, mark-all-paid requires READY or PROCESSING",
                batch.batch_reference,
                batch.status.as_str()
            )));
        }

        if batch.status == BatchStatus::Ready {
            self.store
                .transition_batch(batch_id, &[BatchStatus::Ready], BatchStatus::Processing)
                .await?;
        }

        let members = self.store.withdrawals_in_batch(batch_id).await?;
        let mut outcome = BulkOutcome::default();
        for member in &members {
            if matches!(
                member.status,
                WithdrawalStatus::Approved | WithdrawalStatus::Processing
            ) {
                match self.withdrawals.mark_paid(member.id, None, admin_email).await {
                    Ok(_) => outcome.success(member.id),
                    Err(e) => outcome.failure(member.id, e.to_string()),
                }
            }
        }

        let members = self.store.withdrawals_in_batch(batch_id).await?;
        let paid = members
            .iter()
            .filter(|w| w.status == WithdrawalStatus::Paid)
            .count();
        let derived = if paid == members.len() {
            BatchStatus::Completed
        } else if paid > 0 {
            BatchStatus::PartiallyCompleted
        } else {
            BatchStatus::Failed
        };

        let batch = self
            .store
            .transition_batch(batch_id, &[BatchStatus::Processing], derived)
            .await?
            .unwrap_or(batch);

        Ok((outcome, batch))
    }
}

fn duplicate_destination_warnings(members: &[Withdrawal]) -> Vec<String> {
    let mut by_destination: HashMap<String, Vec<&str>> = HashMap::new();
    for member in members {
        if let Some(key) = member.account_details.destination_key(member.payout_channel) {
            by_destination
                .entry(key)
                .or_default()
                .push(member.reference.as_str());
        }
    }

    let mut warnings: Vec<String> = by_destination
        .into_iter()
        .filter(|(_, refs)| refs.len() > 1)
        .map(|(destination, refs)| {
            format!(
                "Duplicate payout destination {} shared by {}; manual review required",
                crate::models::mask_number(destination.split(':').last().unwrap_or(&destination)),
                refs.join(", ")
            )
        })
        .collect();
    warnings.sort();
    warnings
}

/// Field order and headers differ by provider; both are flat files with one
/// row per withdrawal, keyed for the provider's bulk-payout upload tool.
fn render_csv(provider: PaymentProvider, members: &[Withdrawal]) -> String {
    match provider {
        PaymentProvider::Paystack => {
            let mut out = String::from(
                "Transfer Reference,Recipient Name,Account Number,Bank Code,Amount,Currency,Narration\n",
            );
            for w in members {
                let row = [
                    w.reference.clone(),
                    w.account_details.account_name.clone(),
                    w.account_details.account_number.clone().unwrap_or_default(),
                    w.account_details.bank_code.clone().unwrap_or_default(),
                    w.amount_local.to_string(),
                    w.currency.clone(),
                    format!("LearnVault affiliate payout {}", w.reference),
                ];
                push_row(&mut out, &row);
            }
            out
        }
        PaymentProvider::Korapay => {
            let mut out = String::from(
                "reference,payout_type,customer_name,bank_code,account_number,mobile_operator,mobile_number,amount,currency,narration\n",
            );
            for w in members {
                let (payout_type, bank_code, account_number, operator, mobile) =
                    match w.payout_channel {
                        PayoutChannel::Bank => (
                            "bank_account",
                            w.account_details.bank_code.clone().unwrap_or_default(),
                            w.account_details.account_number.clone().unwrap_or_default(),
                            String::new(),
                            String::new(),
                        ),
                        PayoutChannel::MobileMoney => (
                            "mobile_money",
                            String::new(),
                            String::new(),
                            w.account_details.mobile_network.clone().unwrap_or_default(),
                            w.account_details.mobile_number.clone().unwrap_or_default(),
                        ),
                    };
                let row = [
                    w.reference.clone(),
                    payout_type.to_string(),
                    w.account_details.account_name.clone(),
                    bank_code,
                    account_number,
                    operator,
                    mobile,
                    w.amount_local.to_string(),
                    w.currency.clone(),
                    format!("LearnVault affiliate payout {}", w.reference),
                ];
                push_row(&mut out, &row);
            }
            out
        }
    }
}

fn push_row(out: &mut String, fields: &[String]) {
    let escaped: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
    out.push_str(&escaped.join(","));
    out.push('\n');
}

fn csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
