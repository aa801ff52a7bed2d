pub mod korapay;
pub mod paystack;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use learnvault_common::AppError;

use crate::config::ProviderConfigs;
use crate::models::{AccountDetails, NormalizedStatus, PaymentProvider, PayoutChannel};

pub use self::korapay::KorapayGateway;
pub use self::paystack::PaystackGateway;

/// Typed adapter failure. Provider HTTP and parse problems never escape an
/// adapter in any other form.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("provider api error: status={status} body={body}")]
    Api { status: u16, body: String },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Network(e.to_string())
        }
    }
}

/// Keeps forensic log lines bounded when a provider returns a large error page.
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 512;
    if body.len() <= MAX {
        body.to_string()
    } else {
        format!("{}…", &body[..MAX])
    }
}

/// A provider transaction after status normalization. `amount_minor` is
/// always in minor currency units regardless of how the provider reports it.
#[derive(Debug, Clone)]
pub struct VerifiedTransaction {
    pub reference: String,
    pub status: NormalizedStatus,
    pub amount_minor: i64,
    pub currency: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub customer_email: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct PayoutRequest {
    pub reference: String,
    pub amount_minor: i64,
    pub currency: String,
    pub channel: PayoutChannel,
    pub account: AccountDetails,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct PayoutReceipt {
    pub provider: PaymentProvider,
    pub provider_reference: String,
    pub status: NormalizedStatus,
}

/// Uniform contract over payment providers. Status normalization happens
/// inside implementations, never in calling code.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    async fn verify_transaction(&self, reference: &str)
        -> Result<VerifiedTransaction, GatewayError>;

    async fn initiate_payout(&self, request: &PayoutRequest)
        -> Result<PayoutReceipt, GatewayError>;

    fn validate_webhook_signature(&self, payload: &[u8], signature: &str) -> bool;
}

/// Constructed, dependency-injected adapter instances in configured priority
/// order. Dispatch is by the closed `PaymentProvider` enum, not by name.
pub struct GatewayRegistry {
    gateways: Vec<Arc<dyn ProviderGateway>>,
}

impl GatewayRegistry {
    pub fn new(gateways: Vec<Arc<dyn ProviderGateway>>) -> Self {
        Self { gateways }
    }

    pub fn get(&self, provider: PaymentProvider) -> Option<Arc<dyn ProviderGateway>> {
        self.gateways
            .iter()
            .find(|g| g.provider() == provider)
            .cloned()
    }

    pub fn providers(&self) -> Vec<PaymentProvider> {
        self.gateways.iter().map(|g| g.provider()).collect()
    }

    /// Probe order for verification: the provider recorded on an existing
    /// payment first, then the remaining adapters in configured priority
    /// order.
    pub fn verification_order(
        &self,
        preferred: Option<PaymentProvider>,
    ) -> Vec<Arc<dyn ProviderGateway>> {
        let mut ordered: Vec<Arc<dyn ProviderGateway>> = Vec::with_capacity(self.gateways.len());
        if let Some(preferred) = preferred {
            if let Some(gateway) = self.get(preferred) {
                ordered.push(gateway);
            }
        }
        for gateway in &self.gateways {
            if Some(gateway.provider()) != preferred {
                ordered.push(gateway.clone());
            }
        }
        ordered
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }
}

/// Builds the registry from configuration. Priority order is fixed here:
/// Paystack first, then Korapay.
pub fn registry_from_config(config: &ProviderConfigs) -> Result<GatewayRegistry, AppError> {
    let mut gateways: Vec<Arc<dyn ProviderGateway>> = Vec::new();

    if config.paystack.enabled {
        gateways.push(Arc::new(PaystackGateway::new(&config.paystack)?));
    }
    if config.korapay.enabled {
        gateways.push(Arc::new(KorapayGateway::new(&config.korapay)?));
    }

    if gateways.is_empty() {
        return Err(AppError::Internal("No payment providers enabled".to_string()));
    }
    Ok(GatewayRegistry::new(gateways))
}
