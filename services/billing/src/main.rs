use std::sync::Arc;

use axum::http::Method;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use learnvault_auth::JwtService;
use learnvault_billing::batches::BatchService;
use learnvault_billing::config::BillingConfig;
use learnvault_billing::gateways::registry_from_config;
use learnvault_billing::outbox::OutboxWorker;
use learnvault_billing::rates::ExchangeRates;
use learnvault_billing::reconciliation::ReconciliationService;
use learnvault_billing::referrals::AttributionService;
use learnvault_billing::routes;
use learnvault_billing::store::{PgStore, Store};
use learnvault_billing::withdrawals::WithdrawalService;
use learnvault_billing::AppState;
use learnvault_database::{apply_schema, create_pool};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "learnvault_billing=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = BillingConfig::from_env()?;

    // Database pool + schema
    let db_pool = create_pool(&config.database).await?;
    apply_schema(&db_pool, include_str!("../migrations/0001_init.sql")).await?;

    let store: Arc<dyn Store> = Arc::new(PgStore::new(db_pool));

    // Provider adapters, constructed once and injected everywhere
    let registry = Arc::new(registry_from_config(&config.providers)?);

    let rates = ExchangeRates::from_table(&config.billing.usd_rates);
    let jwt_service = JwtService::new(&config.jwt.secret);

    let reconciliation = ReconciliationService::new(
        store.clone(),
        registry.clone(),
        rates.clone(),
        &config.billing,
    );
    let attribution =
        AttributionService::new(store.clone(), config.billing.referral_link_base.clone());
    let withdrawals = WithdrawalService::new(store.clone(), rates.clone());
    let batches = BatchService::new(store.clone(), withdrawals.clone());

    // Attribution outbox worker
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker = OutboxWorker::new(store.clone(), attribution.clone(), &config.billing);
    let worker_handle = tokio::spawn(worker.run(shutdown_rx));

    let app_state = AppState {
        store,
        jwt_service,
        registry,
        reconciliation,
        attribution,
        withdrawals,
        batches,
    };

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(Any);

    let app = routes::create_routes(app_state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors),
    );

    let listener = tokio::net::TcpListener::bind(format!(
        "{}:{}",
        config.server.host, config.server.port
    ))
    .await?;

    tracing::info!(
        "Billing service listening on {}:{}",
        config.server.host,
        config.server.port
    );

    axum::serve(listener, app).await?;

    shutdown_tx.send(true).ok();
    worker_handle.await.ok();

    Ok(())
}
