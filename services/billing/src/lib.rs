pub mod batches;
pub mod config;
pub mod gateways;
pub mod handlers;
pub mod models;
pub mod outbox;
pub mod rates;
pub mod reconciliation;
pub mod referrals;
pub mod routes;
pub mod store;
pub mod withdrawals;

use std::sync::Arc;

use learnvault_auth::JwtService;

use crate::batches::BatchService;
use crate::gateways::GatewayRegistry;
use crate::reconciliation::ReconciliationService;
use crate::referrals::AttributionService;
use crate::store::Store;
use crate::withdrawals::WithdrawalService;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub jwt_service: JwtService,
    pub registry: Arc<GatewayRegistry>,
    pub reconciliation: ReconciliationService,
    pub attribution: AttributionService,
    pub withdrawals: WithdrawalService,
    pub batches: BatchService,
}
