use std::sync::Arc;

use axum::{routing::get, Router};

use shared_config::AppConfig;

use crate::handlers;
use crate::services::Reconciler;

#[derive(Clone)]
pub struct ReconciliationState {
    pub config: Arc<AppConfig>,
    pub reconciler: Arc<Reconciler>,
}

pub fn reconciliation_routes(state: ReconciliationState) -> Router {
    // Called by the customer's browser on return from the gateway, so no
    // bearer token; the gateway signature authenticates the request
    Router::new()
        .route("/vnpay/callback", get(handlers::wallet_callback))
        .route("/vnpay/appointment-callback", get(handlers::appointment_callback))
        .with_state(state)
}
