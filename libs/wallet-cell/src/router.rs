use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use payment_gateway_cell::VnPayGateway;
use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::Ledger;

#[derive(Clone)]
pub struct WalletState {
    pub config: Arc<AppConfig>,
    pub ledger: Arc<Ledger>,
    pub gateway: Arc<VnPayGateway>,
}

pub fn wallet_routes(state: WalletState) -> Router {
    // Wallet operations act on the caller's own account
    let protected_routes = Router::new()
        .route("/", get(handlers::get_wallet))
        .route("/transactions", get(handlers::get_transactions))
        .route("/top-up", post(handlers::top_up))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
