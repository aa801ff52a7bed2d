use serde_json::json;

use learnvault_billing::config::{KorapayConfig, PaystackConfig};
use learnvault_billing::gateways::{GatewayError, ProviderGateway};
use learnvault_billing::gateways::{KorapayGateway, PaystackGateway};
use learnvault_billing::models::NormalizedStatus;

fn paystack(base_url: String) -> PaystackGateway {
    PaystackGateway::new(&PaystackConfig {
        enabled: true,
        secret_key: "sk_test_secret".to_string(),
        base_url,
        timeout_seconds: 5,
    })
    .unwrap()
}

fn korapay(base_url: String) -> KorapayGateway {
    KorapayGateway::new(&KorapayConfig {
        enabled: true,
        secret_key: "kp_test_secret".to_string(),
        base_url,
        timeout_seconds: 5,
    })
    .unwrap()
}

#[tokio::test]
async fn paystack_verification_normalizes_a_successful_charge() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/transaction/verify/TXN-1")
        .match_header("authorization", "Bearer sk_test_secret")
        .with_status(200)
        .with_body(
            json!({
                "status": true,
                "message": "Verification successful",
                "data": {
                    "reference": "TXN-1",
                    "status": "success",
                    "amount": 1500000,
                    "currency": "NGN",
                    "paid_at": "2026-03-01T10:15:00Z",
                    "customer": { "email": "buyer@example.com" },
                    "metadata": { "referral_code": "ABC123" }
                }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let gateway = paystack(server.url());
    let txn = gateway.verify_transaction("TXN-1").await.unwrap();

    mock.assert_async().await;
    assert_eq!(txn.status, NormalizedStatus::Success);
    assert_eq!(txn.amount_minor, 1_500_000);
    assert_eq!(txn.currency, "NGN");
    assert_eq!(txn.customer_email.as_deref(), Some("buyer@example.com"));
    assert_eq!(txn.metadata["referral_code"], "ABC123");
    assert!(txn.paid_at.is_some());
}

#[tokio::test]
async fn paystack_abandoned_charge_normalizes_to_pending() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/transaction/verify/TXN-2")
        .with_status(200)
        .with_body(
            json!({
                "status": true,
                "data": { "reference": "TXN-2", "status": "abandoned", "amount": 1000, "currency": "NGN" }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let gateway = paystack(server.url());
    let txn = gateway.verify_transaction("TXN-2").await.unwrap();
    assert_eq!(txn.status, NormalizedStatus::Pending);
}

#[tokio::test]
async fn paystack_api_errors_become_typed_failures() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/transaction/verify/TXN-404")
        .with_status(404)
        .with_body(json!({"status": false, "message": "Transaction reference not found"}).to_string())
        .create_async()
        .await;

    let gateway = paystack(server.url());
    let err = gateway.verify_transaction("TXN-404").await.unwrap_err();

    match err {
        GatewayError::Api { status, .. } => assert_eq!(status, 404),
        other => panic!("expected Api error, got {:?}", other),
    }
}

#[tokio::test]
async fn paystack_malformed_json_is_an_invalid_response_not_a_panic() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/transaction/verify/TXN-BAD")
        .with_status(200)
        .with_body("<html>bad gateway</html>")
        .create_async()
        .await;

    let gateway = paystack(server.url());
    let err = gateway.verify_transaction("TXN-BAD").await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidResponse(_)));
}

#[tokio::test]
async fn korapay_verification_converts_major_units() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/merchant/api/v1/charges/KPY-1")
        .match_header("authorization", "Bearer kp_test_secret")
        .with_status(200)
        .with_body(
            json!({
                "status": true,
                "message": "success",
                "data": {
                    "reference": "KPY-1",
                    "status": "success",
                    "amount": 2500.50,
                    "currency": "NGN",
                    "customer": { "email": "kora@example.com" },
                    "metadata": {}
                }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let gateway = korapay(server.url());
    let txn = gateway.verify_transaction("KPY-1").await.unwrap();

    assert_eq!(txn.status, NormalizedStatus::Success);
    assert_eq!(txn.amount_minor, 250_050);
    assert_eq!(txn.customer_email.as_deref(), Some("kora@example.com"));
}

#[tokio::test]
async fn korapay_rejected_body_with_status_false_is_an_api_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/merchant/api/v1/charges/KPY-2")
        .with_status(200)
        .with_body(json!({"status": false, "message": "Invalid key"}).to_string())
        .create_async()
        .await;

    let gateway = korapay(server.url());
    let err = gateway.verify_transaction("KPY-2").await.unwrap_err();
    match err {
        GatewayError::Api { body, .. } => assert_eq!(body, "Invalid key"),
        other => panic!("expected Api error, got {:?}", other),
    }
}

#[tokio::test]
async fn paystack_payout_creates_recipient_then_transfers() {
    let mut server = mockito::Server::new_async().await;
    let recipient_mock = server
        .mock("POST", "/transferrecipient")
        .with_status(201)
        .with_body(
            json!({
                "status": true,
                "data": { "recipient_code": "RCP_123" }
            })
            .to_string(),
        )
        .create_async()
        .await;
    let transfer_mock = server
        .mock("POST", "/transfer")
        .with_status(200)
        .with_body(
            json!({
                "status": true,
                "data": { "transfer_code": "TRF_456", "status": "pending" }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let gateway = paystack(server.url());
    let receipt = gateway
        .initiate_payout(&learnvault_billing::gateways::PayoutRequest {
            reference: "WD-1".to_string(),
            amount_minor: 500_000,
            currency: "NGN".to_string(),
            channel: learnvault_billing::models::PayoutChannel::Bank,
            account: learnvault_billing::models::AccountDetails {
                account_name: "Ada Obi".to_string(),
                account_number: Some("0123456789".to_string()),
                bank_code: Some("058".to_string()),
                bank_name: None,
                mobile_number: None,
                mobile_network: None,
            },
            reason: "Affiliate payout".to_string(),
        })
        .await
        .unwrap();

    recipient_mock.assert_async().await;
    transfer_mock.assert_async().await;
    assert_eq!(receipt.provider_reference, "TRF_456");
    assert_eq!(receipt.status, NormalizedStatus::Pending);
}
