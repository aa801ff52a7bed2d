use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use learnvault_auth::middleware::{admin_only_middleware, auth_middleware};

use crate::{handlers, AppState};

pub fn create_routes(state: AppState) -> Router {
    // Admin surface: JWT-authenticated, admin role required.
    let admin_routes = Router::new()
        .route("/withdrawals", post(handlers::request_withdrawal))
        .route(
            "/withdrawals/bulk-approve",
            post(handlers::bulk_approve_withdrawals),
        )
        .route(
            "/withdrawals/bulk-reject",
            post(handlers::bulk_reject_withdrawals),
        )
        .route("/withdrawals/:id/approve", post(handlers::approve_withdrawal))
        .route("/withdrawals/:id/reject", post(handlers::reject_withdrawal))
        .route("/withdrawals/:id/pay", post(handlers::mark_withdrawal_paid))
        .route("/withdrawals/:id/fail", post(handlers::mark_withdrawal_failed))
        .route("/withdrawals/:id/audit", get(handlers::withdrawal_audit_trail))
        .route("/batches", post(handlers::create_batch))
        .route(
            "/batches/:id/withdrawals",
            post(handlers::add_batch_withdrawals).delete(handlers::remove_batch_withdrawals),
        )
        .route("/batches/:id/finalize", post(handlers::finalize_batch))
        .route("/batches/:id/export", get(handlers::export_batch_csv))
        .route(
            "/batches/:id/mark-all-paid",
            post(handlers::mark_batch_all_paid),
        )
        .layer(middleware::from_fn(admin_only_middleware))
        .layer(middleware::from_fn_with_state(
            state.jwt_service.clone(),
            auth_middleware,
        ));

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Checkout + verification (public; verification is idempotent)
        .route("/billing/checkout", post(handlers::initialize_checkout))
        .route("/billing/verify", post(handlers::verify_payment))
        // Provider callbacks (signature-authenticated, no JWT)
        .route("/billing/webhooks/:provider", post(handlers::handle_webhook))
        .nest("/admin", admin_routes)
        .with_state(state)
}
