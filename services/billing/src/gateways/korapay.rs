use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::Sha256;

use learnvault_common::AppError;

use crate::config::KorapayConfig;
use crate::models::{NormalizedStatus, PaymentProvider, PayoutChannel};

use super::{
    truncate_body, GatewayError, PayoutReceipt, PayoutRequest, ProviderGateway,
    VerifiedTransaction,
};

type HmacSha256 = Hmac<Sha256>;

pub struct KorapayGateway {
    client: Client,
    secret_key: String,
    base_url: String,
}

impl KorapayGateway {
    pub fn new(config: &KorapayConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            secret_key: config.secret_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn normalize_status(raw: &str) -> NormalizedStatus {
        match raw {
            "success" | "successful" => NormalizedStatus::Success,
            "pending" | "processing" => NormalizedStatus::Pending,
            _ => NormalizedStatus::Failed,
        }
    }

    /// Korapay reports charge amounts in major units; everything downstream
    /// works in minor units.
    fn amount_to_minor(amount: &Value) -> i64 {
        let major = amount
            .as_str()
            .and_then(|s| s.parse::<Decimal>().ok())
            .or_else(|| {
                amount
                    .as_f64()
                    .and_then(|f| Decimal::try_from(f).ok())
            })
            .unwrap_or_default();
        (major * Decimal::from(100)).round().to_i64().unwrap_or(0)
    }

    async fn read_body(response: reqwest::Response) -> Result<Value, GatewayError> {
        let status = response.status().as_u16();
        let body = response.text().await.map_err(GatewayError::from_reqwest)?;

        if !(200..300).contains(&status) {
            return Err(GatewayError::Api {
                status,
                body: truncate_body(&body),
            });
        }

        let value = serde_json::from_str::<Value>(&body)
            .map_err(|e| GatewayError::InvalidResponse(format!("{}; body={}", e, truncate_body(&body))))?;

        if value["status"].as_bool() != Some(true) {
            return Err(GatewayError::Api {
                status,
                body: value["message"].as_str().unwrap_or("unknown error").to_string(),
            });
        }

        Ok(value)
    }
}

#[async_trait]
impl ProviderGateway for KorapayGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Korapay
    }

    async fn verify_transaction(
        &self,
        reference: &str,
    ) -> Result<VerifiedTransaction, GatewayError> {
        let result = async {
            let response = self
                .client
                .get(format!(
                    "{}/merchant/api/v1/charges/{}",
                    self.base_url, reference
                ))
                .bearer_auth(&self.secret_key)
                .send()
                .await
                .map_err(GatewayError::from_reqwest)?;

            let value = Self::read_body(response).await?;
            let data = &value["data"];

            let raw_status = data["status"].as_str().unwrap_or("unknown");
            let paid_at = data["transaction_date"]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc));

            Ok(VerifiedTransaction {
                reference: data["reference"]
                    .as_str()
                    .unwrap_or(reference)
                    .to_string(),
                status: Self::normalize_status(raw_status),
                amount_minor: Self::amount_to_minor(&data["amount"]),
                currency: data["currency"].as_str().unwrap_or("NGN").to_string(),
                paid_at,
                customer_email: data["customer"]["email"].as_str().map(|s| s.to_string()),
                metadata: data["metadata"].clone(),
            })
        }
        .await;

        match &result {
            Ok(txn) => tracing::info!(
                event = "gateway.verify",
                provider = "korapay",
                reference,
                status = ?txn.status,
                "transaction verified"
            ),
            Err(e) => tracing::warn!(
                event = "gateway.verify",
                provider = "korapay",
                reference,
                error = %e,
                "verification call failed"
            ),
        }

        result
    }

    async fn initiate_payout(
        &self,
        request: &PayoutRequest,
    ) -> Result<PayoutReceipt, GatewayError> {
        let result = async {
            let amount_major = Decimal::from(request.amount_minor) / Decimal::from(100);

            let destination = match request.channel {
                PayoutChannel::Bank => json!({
                    "type": "bank_account",
                    "amount": amount_major,
                    "currency": request.currency,
                    "narration": request.reason,
                    "bank_account": {
                        "bank": request.account.bank_code,
                        "account": request.account.account_number,
                    },
                    "customer": { "name": request.account.account_name },
                }),
                PayoutChannel::MobileMoney => json!({
                    "type": "mobile_money",
                    "amount": amount_major,
                    "currency": request.currency,
                    "narration": request.reason,
                    "mobile_money": {
                        "operator": request.account.mobile_network,
                        "mobile_number": request.account.mobile_number,
                    },
                    "customer": { "name": request.account.account_name },
                }),
            };

            let payload = json!({
                "reference": request.reference,
                "destination": destination,
            });

            let response = self
                .client
                .post(format!(
                    "{}/merchant/api/v1/transactions/disburse",
                    self.base_url
                ))
                .bearer_auth(&self.secret_key)
                .json(&payload)
                .send()
                .await
                .map_err(GatewayError::from_reqwest)?;

            let value = Self::read_body(response).await?;
            let data = &value["data"];

            Ok(PayoutReceipt {
                provider: PaymentProvider::Korapay,
                provider_reference: data["reference"]
                    .as_str()
                    .unwrap_or(&request.reference)
                    .to_string(),
                status: Self::normalize_status(data["status"].as_str().unwrap_or("processing")),
            })
        }
        .await;

        match &result {
            Ok(receipt) => tracing::info!(
                event = "gateway.payout",
                provider = "korapay",
                reference = %request.reference,
                destination = %request.account.masked(),
                status = ?receipt.status,
                "payout initiated"
            ),
            Err(e) => tracing::warn!(
                event = "gateway.payout",
                provider = "korapay",
                reference = %request.reference,
                destination = %request.account.masked(),
                error = %e,
                "payout initiation failed"
            ),
        }

        result
    }

    fn validate_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        let mut mac = match HmacSha256::new_from_slice(self.secret_key.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());
        expected.eq_ignore_ascii_case(signature)
    }
}
