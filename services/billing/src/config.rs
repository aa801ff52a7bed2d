use serde::{Deserialize, Serialize};

use learnvault_common::{DatabaseConfig, JwtConfig, ServerConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub billing: BillingServiceConfig,
    pub providers: ProviderConfigs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingServiceConfig {
    /// CUR=rate table converting charge currencies to USD.
    pub usd_rates: String,
    pub referral_link_base: String,
    pub temp_credential_ttl_hours: i64,
    /// How far back the metadata fallback scan looks for pending payments.
    pub pending_lookup_window_minutes: i64,
    pub outbox_poll_seconds: u64,
    pub outbox_max_attempts: i32,
    pub outbox_backoff_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfigs {
    pub paystack: PaystackConfig,
    pub korapay: KorapayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaystackConfig {
    pub enabled: bool,
    pub secret_key: String,
    pub base_url: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KorapayConfig {
    pub enabled: bool,
    pub secret_key: String,
    pub base_url: String,
    pub timeout_seconds: u64,
}

impl BillingConfig {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            server: ServerConfig {
                host: std::env::var("BILLING_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("BILLING_PORT")
                    .unwrap_or_else(|_| "8006".to_string())
                    .parse()
                    .unwrap_or(8006),
                cors_origins: std::env::var("CORS_ORIGINS")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect(),
            },
            database: DatabaseConfig {
                host: std::env::var("DATABASE_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: std::env::var("DATABASE_PORT")
                    .unwrap_or_else(|_| "5432".to_string())
                    .parse()
                    .unwrap_or(5432),
                username: std::env::var("DATABASE_USERNAME")
                    .unwrap_or_else(|_| "learnvault_user".to_string()),
                password: std::env::var("DATABASE_PASSWORD")
                    .unwrap_or_else(|_| "learnvault_password".to_string()),
                database: std::env::var("DATABASE_NAME")
                    .unwrap_or_else(|_| "learnvault".to_string()),
                max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
            },
            jwt: JwtConfig {
                secret: std::env::var("JWT_SECRET")
                    .unwrap_or_else(|_| "dev-secret-key-change-in-production".to_string()),
                expiration_hours: std::env::var("JWT_EXPIRATION_HOURS")
                    .unwrap_or_else(|_| "24".to_string())
                    .parse()
                    .unwrap_or(24),
                issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "learnvault".to_string()),
            },
            billing: BillingServiceConfig {
                usd_rates: std::env::var("USD_RATES")
                    .unwrap_or_else(|_| "NGN=0.00065,GHS=0.085,KES=0.0077".to_string()),
                referral_link_base: std::env::var("REFERRAL_LINK_BASE")
                    .unwrap_or_else(|_| "https://learnvault.io/join".to_string()),
                temp_credential_ttl_hours: std::env::var("TEMP_CREDENTIAL_TTL_HOURS")
                    .unwrap_or_else(|_| "24".to_string())
                    .parse()
                    .unwrap_or(24),
                pending_lookup_window_minutes: std::env::var("PENDING_LOOKUP_WINDOW_MINUTES")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .unwrap_or(60),
                outbox_poll_seconds: std::env::var("OUTBOX_POLL_SECONDS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
                outbox_max_attempts: std::env::var("OUTBOX_MAX_ATTEMPTS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
                outbox_backoff_seconds: std::env::var("OUTBOX_BACKOFF_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
            },
            providers: ProviderConfigs {
                paystack: PaystackConfig {
                    enabled: std::env::var("PAYSTACK_ENABLED")
                        .unwrap_or_else(|_| "true".to_string())
                        .parse()
                        .unwrap_or(true),
                    secret_key: std::env::var("PAYSTACK_SECRET_KEY")
                        .unwrap_or_else(|_| "sk_test_paystack_key".to_string()),
                    base_url: std::env::var("PAYSTACK_BASE_URL")
                        .unwrap_or_else(|_| "https://api.paystack.co".to_string()),
                    timeout_seconds: std::env::var("PAYSTACK_TIMEOUT_SECONDS")
                        .unwrap_or_else(|_| "15".to_string())
                        .parse()
                        .unwrap_or(15),
                },
                korapay: KorapayConfig {
                    enabled: std::env::var("KORAPAY_ENABLED")
                        .unwrap_or_else(|_| "true".to_string())
                        .parse()
                        .unwrap_or(true),
                    secret_key: std::env::var("KORAPAY_SECRET_KEY")
                        .unwrap_or_else(|_| "sk_test_korapay_key".to_string()),
                    base_url: std::env::var("KORAPAY_BASE_URL")
                        .unwrap_or_else(|_| "https://api.korapay.com".to_string()),
                    timeout_seconds: std::env::var("KORAPAY_TIMEOUT_SECONDS")
                        .unwrap_or_else(|_| "15".to_string())
                        .parse()
                        .unwrap_or(15),
                },
            },
        })
    }
}
