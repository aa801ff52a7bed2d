use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
    Extension,
};
use serde::Serialize;
use uuid::Uuid;

use learnvault_auth::Claims;
use learnvault_common::{ApiResponse, AppError};

use crate::models::{
    BulkIdsRequest, BulkOutcome, BulkRejectRequest, CheckoutRequest, CreateBatchRequest,
    CsvExport, MarkPaidRequest, Payment, PaymentProvider, ReasonRequest, VerifyRequest,
    VerifyResponse, Withdrawal, WithdrawalAuditLog, WithdrawalBatch, WithdrawalRequestBody,
};
use crate::reconciliation::ReferralHint;
use crate::AppState;

// Public endpoints

pub async fn health_check() -> Json<ApiResponse<String>> {
    Json(ApiResponse::success("Billing service is healthy".to_string()))
}

pub async fn initialize_checkout(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<ApiResponse<Payment>>, AppError> {
    let payment = state.reconciliation.initialize_checkout(request).await?;
    Ok(Json(ApiResponse::success(payment)))
}

pub async fn verify_payment(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<ApiResponse<VerifyResponse>>, AppError> {
    let hint = request.referral_code.clone().map(|code| ReferralHint {
        code,
        link_type: request.referral_type.clone(),
    });

    let outcome = state.reconciliation.reconcile(&request.reference, hint).await?;

    Ok(Json(ApiResponse::success(VerifyResponse {
        message: "Payment verified successfully".to_string(),
        email: outcome.email,
        user_id: outcome.user_id,
        is_new_user: outcome.is_new_account,
        temp_credential: outcome.temp_credential,
        credential_expires_in: outcome.credential_expires_in,
    })))
}

/// Signed provider callbacks re-enter the same idempotent reconcile path a
/// client poll uses; a webhook racing a poll is the normal case, not an
/// error.
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<()>>, AppError> {
    let provider = PaymentProvider::parse(&provider)
        .ok_or_else(|| AppError::Validation(format!("Unknown provider {}", provider)))?;
    let gateway = state
        .registry
        .get(provider)
        .ok_or_else(|| AppError::Validation(format!("Provider {} not configured", provider)))?;

    let header_name = match provider {
        PaymentProvider::Paystack => "x-paystack-signature",
        PaymentProvider::Korapay => "x-korapay-signature",
    };
    let signature = headers
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Authentication("Missing webhook signature".to_string()))?;

    if !gateway.validate_webhook_signature(&body, signature) {
        return Err(AppError::Authentication(
            "Invalid webhook signature".to_string(),
        ));
    }

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|_| AppError::Validation("Malformed webhook payload".to_string()))?;
    let event = payload["event"].as_str().unwrap_or("");
    let reference = payload["data"]["reference"].as_str();

    match (event, reference) {
        ("charge.success", Some(reference)) => {
            if let Err(e) = state.reconciliation.reconcile(reference, None).await {
                // Acknowledge regardless; the provider retries and the
                // client poll re-enters the same idempotent path.
                tracing::warn!(
                    provider = %provider,
                    reference,
                    error = %e,
                    "webhook reconciliation failed"
                );
            }
        }
        ("charge.failed", Some(reference)) => {
            state.reconciliation.mark_failed(reference).await?;
        }
        _ => {
            tracing::debug!(provider = %provider, event, "ignoring webhook event");
        }
    }

    Ok(Json(ApiResponse::success(())))
}

// Admin: withdrawals

pub async fn request_withdrawal(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<WithdrawalRequestBody>,
) -> Result<Json<ApiResponse<Withdrawal>>, AppError> {
    let withdrawal = state.withdrawals.request(request, &claims.email).await?;
    Ok(Json(ApiResponse::success(withdrawal)))
}

pub async fn approve_withdrawal(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Withdrawal>>, AppError> {
    let withdrawal = state.withdrawals.approve(id, &claims.email).await?;
    Ok(Json(ApiResponse::success(withdrawal)))
}

pub async fn reject_withdrawal(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(request): Json<ReasonRequest>,
) -> Result<Json<ApiResponse<Withdrawal>>, AppError> {
    let withdrawal = state
        .withdrawals
        .reject(id, &request.reason, &claims.email)
        .await?;
    Ok(Json(ApiResponse::success(withdrawal)))
}

pub async fn mark_withdrawal_paid(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    request: Option<Json<MarkPaidRequest>>,
) -> Result<Json<ApiResponse<Withdrawal>>, AppError> {
    let provider_reference = request.and_then(|Json(r)| r.provider_reference);
    let withdrawal = state
        .withdrawals
        .mark_paid(id, provider_reference, &claims.email)
        .await?;
    Ok(Json(ApiResponse::success(withdrawal)))
}

pub async fn mark_withdrawal_failed(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(request): Json<ReasonRequest>,
) -> Result<Json<ApiResponse<Withdrawal>>, AppError> {
    let withdrawal = state
        .withdrawals
        .mark_failed(id, &request.reason, &claims.email)
        .await?;
    Ok(Json(ApiResponse::success(withdrawal)))
}

pub async fn bulk_approve_withdrawals(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<BulkIdsRequest>,
) -> Result<Json<ApiResponse<BulkOutcome>>, AppError> {
    let outcome = state
        .withdrawals
        .bulk_approve(&request.ids, &claims.email)
        .await;
    Ok(Json(ApiResponse::success(outcome)))
}

pub async fn bulk_reject_withdrawals(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<BulkRejectRequest>,
) -> Result<Json<ApiResponse<BulkOutcome>>, AppError> {
    let outcome = state
        .withdrawals
        .bulk_reject(&request.ids, &request.reason, &claims.email)
        .await;
    Ok(Json(ApiResponse::success(outcome)))
}

pub async fn withdrawal_audit_trail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<WithdrawalAuditLog>>>, AppError> {
    let trail = state.withdrawals.audit_trail(id).await?;
    Ok(Json(ApiResponse::success(trail)))
}

// Admin: batches

pub async fn create_batch(
    State(state): State<AppState>,
    Json(request): Json<CreateBatchRequest>,
) -> Result<Json<ApiResponse<WithdrawalBatch>>, AppError> {
    let batch = state
        .batches
        .create(request.provider, &request.currency)
        .await?;
    Ok(Json(ApiResponse::success(batch)))
}

pub async fn add_batch_withdrawals(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<BulkIdsRequest>,
) -> Result<Json<ApiResponse<BulkOutcome>>, AppError> {
    let outcome = state.batches.add_withdrawals(id, &request.ids).await?;
    Ok(Json(ApiResponse::success(outcome)))
}

pub async fn remove_batch_withdrawals(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<BulkIdsRequest>,
) -> Result<Json<ApiResponse<BulkOutcome>>, AppError> {
    let outcome = state.batches.remove_withdrawals(id, &request.ids).await?;
    Ok(Json(ApiResponse::success(outcome)))
}

pub async fn finalize_batch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<WithdrawalBatch>>, AppError> {
    let batch = state.batches.finalize(id).await?;
    Ok(Json(ApiResponse::success(batch)))
}

pub async fn export_batch_csv(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<CsvExport>>, AppError> {
    let export = state.batches.export_csv(id, &claims.email).await?;
    Ok(Json(ApiResponse::success(export)))
}

#[derive(Debug, Serialize)]
pub struct MarkAllPaidResponse {
    pub outcome: BulkOutcome,
    pub batch: WithdrawalBatch,
}

pub async fn mark_batch_all_paid(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<MarkAllPaidResponse>>, AppError> {
    let (outcome, batch) = state.batches.mark_all_paid(id, &claims.email).await?;
    Ok(Json(ApiResponse::success(MarkAllPaidResponse {
        outcome,
        batch,
    })))
}
