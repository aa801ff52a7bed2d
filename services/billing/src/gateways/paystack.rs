use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::{json, Value};
use sha2::Sha512;

use learnvault_common::AppError;

use crate::config::PaystackConfig;
use crate::models::{NormalizedStatus, PaymentProvider, PayoutChannel};

use super::{
    truncate_body, GatewayError, PayoutReceipt, PayoutRequest, ProviderGateway,
    VerifiedTransaction,
};

type HmacSha512 = Hmac<Sha512>;

pub struct PaystackGateway {
    client: Client,
    secret_key: String,
    base_url: String,
}

impl PaystackGateway {
    pub fn new(config: &PaystackConfig) -> Result<Self, AppError> {
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
            "success" => NormalizedStatus::Success,
            "pending" | "ongoing" | "processing" | "queued" | "abandoned" => {
                NormalizedStatus::Pending
            }
            _ => NormalizedStatus::Failed,
        }
    }

    async fn read_body(response: reqwest::Response) -> Result<(u16, Value), GatewayError> {
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

        Ok((status, value))
    }

    /// Transfers need a recipient code first; Paystack has no single-call
    /// payout endpoint.
    async fn create_transfer_recipient(
        &self,
        request: &PayoutRequest,
    ) -> Result<String, GatewayError> {
        let payload = match request.channel {
            PayoutChannel::Bank => json!({
                "type": "nuban",
                "name": request.account.account_name,
                "account_number": request.account.account_number,
                "bank_code": request.account.bank_code,
                "currency": request.currency,
            }),
            PayoutChannel::MobileMoney => json!({
                "type": "mobile_money",
                "name": request.account.account_name,
                "account_number": request.account.mobile_number,
                "bank_code": request.account.mobile_network,
                "currency": request.currency,
            }),
        };

        let response = self
            .client
            .post(format!("{}/transferrecipient", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(&payload)
            .send()
            .await
            .map_err(GatewayError::from_reqwest)?;

        let (_, value) = Self::read_body(response).await?;

        value["data"]["recipient_code"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| GatewayError::InvalidResponse("missing recipient_code".to_string()))
    }
}

#[async_trait]
impl ProviderGateway for PaystackGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Paystack
    }

    async fn verify_transaction(
        &self,
        reference: &str,
    ) -> Result<VerifiedTransaction, GatewayError> {
        let result = async {
            let response = self
                .client
                .get(format!("{}/transaction/verify/{}", self.base_url, reference))
                .bearer_auth(&self.secret_key)
                .send()
                .await
                .map_err(GatewayError::from_reqwest)?;

            let (_, value) = Self::read_body(response).await?;
            let data = &value["data"];

            let raw_status = data["status"].as_str().unwrap_or("unknown");
            let paid_at = data["paid_at"]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc));

            Ok(VerifiedTransaction {
                reference: data["reference"]
                    .as_str()
                    .unwrap_or(reference)
                    .to_string(),
                status: Self::normalize_status(raw_status),
                // Paystack reports amounts in minor units (kobo) already.
                amount_minor: data["amount"].as_i64().unwrap_or(0),
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
                provider = "paystack",
                reference,
                status = ?txn.status,
                "transaction verified"
            ),
            Err(e) => tracing::warn!(
                event = "gateway.verify",
                provider = "paystack",
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
            let recipient_code = self.create_transfer_recipient(request).await?;

            let payload = json!({
                "source": "balance",
                "amount": request.amount_minor,
                "currency": request.currency,
                "recipient": recipient_code,
                "reference": request.reference,
                "reason": request.reason,
            });

            let response = self
                .client
                .post(format!("{}/transfer", self.base_url))
                .bearer_auth(&self.secret_key)
                .json(&payload)
                .send()
                .await
                .map_err(GatewayError::from_reqwest)?;

            let (_, value) = Self::read_body(response).await?;
            let data = &value["data"];

            Ok(PayoutReceipt {
                provider: PaymentProvider::Paystack,
                provider_reference: data["transfer_code"]
                    .as_str()
                    .or_else(|| data["reference"].as_str())
                    .unwrap_or(&request.reference)
                    .to_string(),
                status: Self::normalize_status(data["status"].as_str().unwrap_or("pending")),
            })
        }
        .await;

        match &result {
            Ok(receipt) => tracing::info!(
                event = "gateway.payout",
                provider = "paystack",
                reference = %request.reference,
                destination = %request.account.masked(),
                status = ?receipt.status,
                "payout initiated"
            ),
            Err(e) => tracing::warn!(
                event = "gateway.payout",
                provider = "paystack",
                reference = %request.reference,
                destination = %request.account.masked(),
                error = %e,
                "payout initiation failed"
            ),
        }

        result
    }

    fn validate_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        let mut mac = match HmacSha512::new_from_slice(self.secret_key.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());
        expected.eq_ignore_ascii_case(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> PaystackGateway {
        PaystackGateway::new(&PaystackConfig {
            enabled: true,
            secret_key: "sk_test_secret".to_string(),
            base_url: "https://api.paystack.co".to_string(),
            timeout_seconds: 5,
        })
        .unwrap()
    }

    #[test]
    fn status_normalization() {
        assert_eq!(
            PaystackGateway::normalize_status("success"),
            NormalizedStatus::Success
        );
        assert_eq!(
            PaystackGateway::normalize_status("abandoned"),
            NormalizedStatus::Pending
        );
        assert_eq!(
            PaystackGateway::normalize_status("failed"),
            NormalizedStatus::Failed
        );
        assert_eq!(
            PaystackGateway::normalize_status("reversed"),
            NormalizedStatus::Failed
        );
    }

    #[test]
    fn webhook_signature_round_trip() {
        let gateway = gateway();
        let payload = br#"{"event":"charge.success","data":{"reference":"TXN-1"}}"#;

        let mut mac = HmacSha512::new_from_slice(b"sk_test_secret").unwrap();
        mac.update(payload);
        let signature = hex::encode(mac.finalize().into_bytes());

        assert!(gateway.validate_webhook_signature(payload, &signature));
        assert!(gateway.validate_webhook_signature(payload, &signature.to_uppercase()));
    }

    #[test]
    fn webhook_rejects_tampered_payload() {
        let gateway = gateway();
        let payload = br#"{"event":"charge.success","data":{"reference":"TXN-1"}}"#;

        let mut mac = HmacSha512::new_from_slice(b"sk_test_secret").unwrap();
        mac.update(payload);
        let signature = hex::encode(mac.finalize().into_bytes());

        let tampered = br#"{"event":"charge.success","data":{"reference":"TXN-2"}}"#;
        assert!(!gateway.validate_webhook_signature(tampered, &signature));
        assert!(!gateway.validate_webhook_signature(payload, "deadbeef"));
    }
}
