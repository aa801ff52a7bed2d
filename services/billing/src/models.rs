use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Enums

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentProvider {
    Paystack,
    Korapay,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Paystack => "paystack",
            PaymentProvider::Korapay => "korapay",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "paystack" => Some(PaymentProvider::Paystack),
            "korapay" => Some(PaymentProvider::Korapay),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-reported transaction status after adapter normalization.
/// Calling code never sees raw provider status strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizedStatus {
    Success,
    Pending,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }

    /// Status only ever moves forward: pending -> completed or pending -> failed.
    pub fn can_transition_to(&self, next: &PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Completed)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseType {
    Learner,
    LearnerDcs,
}

impl PurchaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseType::Learner => "learner",
            PurchaseType::LearnerDcs => "learner_dcs",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "learner" => Some(PurchaseType::Learner),
            "learner_dcs" => Some(PurchaseType::LearnerDcs),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Learner,
    Dcs,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Learner => "learner",
            LinkType::Dcs => "dcs",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "learner" => Some(LinkType::Learner),
            "dcs" => Some(LinkType::Dcs),
            _ => None,
        }
    }

    /// The hint comes from checkout metadata or the verification request and
    /// is free text; anything that is not recognizably DCS-flavored is a
    /// learner link.
    pub fn from_hint(hint: Option<&str>) -> Self {
        match hint {
            Some("dcs") | Some("affiliate") => LinkType::Dcs,
            _ => LinkType::Learner,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionType {
    LearnerInitial,
    DcsAddon,
}

impl CommissionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionType::LearnerInitial => "learner_initial",
            CommissionType::DcsAddon => "dcs_addon",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "learner_initial" => Some(CommissionType::LearnerInitial),
            "dcs_addon" => Some(CommissionType::DcsAddon),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionStatus {
    Available,
    Withdrawn,
}

impl CommissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionStatus::Available => "available",
            CommissionStatus::Withdrawn => "withdrawn",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(CommissionStatus::Available),
            "withdrawn" => Some(CommissionStatus::Withdrawn),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutChannel {
    Bank,
    MobileMoney,
}

impl PayoutChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutChannel::Bank => "bank",
            PayoutChannel::MobileMoney => "mobile_money",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bank" => Some(PayoutChannel::Bank),
            "mobile_money" => Some(PayoutChannel::MobileMoney),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
    Processing,
    Paid,
    Failed,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "PENDING",
            WithdrawalStatus::Approved => "APPROVED",
            WithdrawalStatus::Rejected => "REJECTED",
            WithdrawalStatus::Processing => "PROCESSING",
            WithdrawalStatus::Paid => "PAID",
            WithdrawalStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(WithdrawalStatus::Pending),
            "APPROVED" => Some(WithdrawalStatus::Approved),
            "REJECTED" => Some(WithdrawalStatus::Rejected),
            "PROCESSING" => Some(WithdrawalStatus::Processing),
            "PAID" => Some(WithdrawalStatus::Paid),
            "FAILED" => Some(WithdrawalStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WithdrawalStatus::Rejected | WithdrawalStatus::Paid | WithdrawalStatus::Failed
        )
    }

    /// Validates if a state transition is allowed
    pub fn can_transition_to(&self, next: &WithdrawalStatus) -> bool {
        match (self, next) {
            (WithdrawalStatus::Pending, WithdrawalStatus::Approved) => true,
            (WithdrawalStatus::Pending, WithdrawalStatus::Rejected) => true,
            (WithdrawalStatus::Approved, WithdrawalStatus::Processing) => true,
            (WithdrawalStatus::Approved, WithdrawalStatus::Paid) => true,
            (WithdrawalStatus::Approved, WithdrawalStatus::Failed) => true,
            (WithdrawalStatus::Processing, WithdrawalStatus::Paid) => true,
            (WithdrawalStatus::Processing, WithdrawalStatus::Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Draft,
    Ready,
    Processing,
    Completed,
    PartiallyCompleted,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Draft => "DRAFT",
            BatchStatus::Ready => "READY",
            BatchStatus::Processing => "PROCESSING",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::PartiallyCompleted => "PARTIALLY_COMPLETED",
            BatchStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(BatchStatus::Draft),
            "READY" => Some(BatchStatus::Ready),
            "PROCESSING" => Some(BatchStatus::Processing),
            "COMPLETED" => Some(BatchStatus::Completed),
            "PARTIALLY_COMPLETED" => Some(BatchStatus::PartiallyCompleted),
            "FAILED" => Some(BatchStatus::Failed),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: &BatchStatus) -> bool {
        match (self, next) {
            (BatchStatus::Draft, BatchStatus::Ready) => true,
            (BatchStatus::Ready, BatchStatus::Processing) => true,
            (BatchStatus::Processing, BatchStatus::Completed) => true,
            (BatchStatus::Processing, BatchStatus::PartiallyCompleted) => true,
            (BatchStatus::Processing, BatchStatus::Failed) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

// Domain records

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    /// Our checkout reference, assigned at initialization.
    pub reference: String,
    /// The provider's transaction reference; the idempotency key once set.
    pub provider_reference: Option<String>,
    pub provider: Option<PaymentProvider>,
    pub amount_minor: i64,
    pub currency: String,
    /// USD-normalized amount: minor units / 100, converted when the charge
    /// currency is not USD.
    pub base_currency_amount: Decimal,
    pub status: PaymentStatus,
    pub payment_type: PurchaseType,
    pub metadata: serde_json::Value,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fields applied by the completing compare-and-swap on a pending payment.
#[derive(Debug, Clone)]
pub struct PaymentCompletion {
    pub payment_id: Uuid,
    pub user_id: Option<Uuid>,
    pub provider: PaymentProvider,
    pub provider_reference: String,
    pub amount_minor: i64,
    pub currency: String,
    pub base_currency_amount: Decimal,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub requires_password_reset: bool,
    pub temp_credential_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A platform-issued referral code record. Affiliate profiles carry the same
/// code; this table is the primary resolution path and the profile the
/// fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralCode {
    pub code: String,
    pub owner_id: Uuid,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffiliateProfile {
    /// Same identifier as the owning user account.
    pub user_id: Uuid,
    pub referral_code: String,
    pub total_earnings: Decimal,
    pub available_balance: Decimal,
    pub lifetime_referrals: i64,
    pub active_referrals: i64,
    pub learner_link: String,
    pub dcs_link: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Referral {
    pub id: Uuid,
    pub referrer_id: Uuid,
    pub referred_id: Uuid,
    pub referral_code: String,
    pub link_type: LinkType,
    pub initial_purchase_type: PurchaseType,
    pub payment_id: Uuid,
    pub status: String,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commission {
    pub id: Uuid,
    pub affiliate_id: Uuid,
    pub referral_id: Uuid,
    pub payment_id: Uuid,
    pub commission_type: CommissionType,
    pub base_amount: Decimal,
    pub commission_rate: Decimal,
    pub commission_amount: Decimal,
    pub commission_currency: String,
    pub status: CommissionStatus,
    pub created_at: DateTime<Utc>,
}

/// A tracked click on one of an affiliate's promotional links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffiliateLink {
    pub id: Uuid,
    pub affiliate_id: Uuid,
    pub link_type: LinkType,
    pub clicked_at: DateTime<Utc>,
    pub converted: bool,
    pub converted_user_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountDetails {
    pub account_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mobile_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mobile_network: Option<String>,
}

impl AccountDetails {
    /// Whether the details are sufficient to pay out over `channel`.
    pub fn is_complete_for(&self, channel: PayoutChannel) -> bool {
        if self.account_name.trim().is_empty() {
            return false;
        }
        match channel {
            PayoutChannel::Bank => {
                matches!(&self.account_number, Some(n) if !n.trim().is_empty())
                    && matches!(&self.bank_code, Some(c) if !c.trim().is_empty())
            }
            PayoutChannel::MobileMoney => {
                matches!(&self.mobile_number, Some(n) if !n.trim().is_empty())
                    && matches!(&self.mobile_network, Some(o) if !o.trim().is_empty())
            }
        }
    }

    /// The value two withdrawals share when they target the same destination.
    pub fn destination_key(&self, channel: PayoutChannel) -> Option<String> {
        match channel {
            PayoutChannel::Bank => self
                .account_number
                .as_ref()
                .zip(self.bank_code.as_ref())
                .map(|(n, b)| format!("{}:{}", b, n)),
            PayoutChannel::MobileMoney => self.mobile_number.clone(),
        }
    }

    /// Masked rendering for logs: all but the last four characters of the
    /// destination number are hidden.
    pub fn masked(&self) -> String {
        let number = self
            .account_number
            .as_deref()
            .or(self.mobile_number.as_deref())
            .unwrap_or("");
        format!("{} ({})", self.account_name, mask_number(number))
    }
}

pub fn mask_number(number: &str) -> String {
    if number.len() <= 4 {
        return "****".to_string();
    }
    let visible = &number[number.len() - 4..];
    format!("{}{}", "*".repeat(number.len() - 4), visible)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: Uuid,
    pub reference: String,
    pub affiliate_id: Uuid,
    pub amount_usd: Decimal,
    pub amount_local: Decimal,
    pub currency: String,
    pub exchange_rate: Decimal,
    pub payout_channel: PayoutChannel,
    pub account_details: AccountDetails,
    pub status: WithdrawalStatus,
    pub batch_id: Option<Uuid>,
    pub provider: PaymentProvider,
    pub provider_reference: Option<String>,
    pub rejection_reason: Option<String>,
    pub failure_reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub processing_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

/// Optional fields applied alongside a withdrawal status transition. The
/// store stamps the timestamp matching the target status.
#[derive(Debug, Clone, Default)]
pub struct TransitionStamp {
    pub reason: Option<String>,
    pub provider_reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalBatch {
    pub id: Uuid,
    pub batch_reference: String,
    pub provider: PaymentProvider,
    pub status: BatchStatus,
    pub total_withdrawals: i64,
    pub total_amount_usd: Decimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Append-only; one row per withdrawal state transition, never edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalAuditLog {
    pub id: Uuid,
    pub withdrawal_id: Uuid,
    pub action: String,
    pub previous_status: Option<WithdrawalStatus>,
    pub new_status: WithdrawalStatus,
    pub reason: Option<String>,
    pub admin_email: String,
    pub created_at: DateTime<Utc>,
}

/// Durable attribution work item. Enqueued by the winning payment
/// completion, drained by the outbox worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionJob {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub referred_user_id: Uuid,
    pub referral_code: String,
    pub link_type_hint: Option<String>,
    pub attempts: i32,
    pub status: JobStatus,
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// API request/response bodies

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub email: Option<String>,
    pub amount_minor: i64,
    pub currency: String,
    pub provider: PaymentProvider,
    pub payment_type: PurchaseType,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyRequest {
    pub reference: String,
    pub referral_code: Option<String>,
    pub referral_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyResponse {
    pub message: String,
    pub email: Option<String>,
    pub user_id: Option<Uuid>,
    pub is_new_user: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_credential: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_expires_in: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawalRequestBody {
    pub affiliate_id: Uuid,
    pub amount_usd: Decimal,
    pub currency: String,
    pub payout_channel: PayoutChannel,
    pub provider: PaymentProvider,
    pub account_details: AccountDetails,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReasonRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkPaidRequest {
    pub provider_reference: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkIdsRequest {
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkRejectRequest {
    pub ids: Vec<Uuid>,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBatchRequest {
    pub provider: PaymentProvider,
    pub currency: String,
}

/// Aggregate result of a bulk, item-by-item operation. Failures never roll
/// back transitions already applied.
#[derive(Debug, Clone, Serialize, Default)]
pub struct BulkOutcome {
    pub succeeded: Vec<Uuid>,
    pub failed: Vec<BulkFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkFailure {
    pub id: Uuid,
    pub error: String,
}

impl BulkOutcome {
    pub fn success(&mut self, id: Uuid) {
        self.succeeded.push(id);
    }

    pub fn failure(&mut self, id: Uuid, error: impl Into<String>) {
        self.failed.push(BulkFailure {
            id,
            error: error.into(),
        });
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CsvExport {
    pub filename: String,
    pub content: String,
    /// Duplicate-destination findings; surfaced, never silently merged.
    pub warnings: Vec<String>,
}
