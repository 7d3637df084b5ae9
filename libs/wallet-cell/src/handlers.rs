use axum::{
    extract::{Extension, Query, State},
    Json,
};
use serde_json::{json, Value};
use tracing::{error, info};

use payment_gateway_cell::{CorrelationRef, GatewayError};
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::actor_from;

use crate::models::{LedgerError, TopUpRequest, TopUpResponse, TransactionPageQuery, WalletSummary};
use crate::router::WalletState;

const DEFAULT_PAGE_SIZE: usize = 10;
const DEFAULT_TOP_UP_METHOD: &str = "vnpay";

pub fn map_ledger_error(e: LedgerError) -> AppError {
    match e {
        LedgerError::InvalidAmount(msg) => AppError::ValidationError(msg),
        LedgerError::InsufficientFunds { .. } => AppError::Conflict(e.to_string()),
        LedgerError::TransactionNotFound(_) => AppError::NotFound(e.to_string()),
        LedgerError::NotADeposit(_) => AppError::BadRequest(e.to_string()),
        LedgerError::DuplicateReference(_)
        | LedgerError::StaleTransaction(_)
        | LedgerError::Contention(_) => AppError::Conflict(e.to_string()),
        LedgerError::Storage(msg) => AppError::Database(msg),
    }
}

#[axum::debug_handler]
pub async fn get_wallet(
    State(state): State<WalletState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from(&user)?;

    let account = state.ledger.account(actor.id).await.map_err(map_ledger_error)?;

    Ok(Json(json!({
        "success": true,
        "wallet": WalletSummary::from(account)
    })))
}

#[axum::debug_handler]
pub async fn get_transactions(
    State(state): State<WalletState>,
    Extension(user): Extension<User>,
    Query(query): Query<TransactionPageQuery>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from(&user)?;
    let page = query.page.unwrap_or(0);
    let size = query.size.unwrap_or(DEFAULT_PAGE_SIZE);

    let transactions = state
        .ledger
        .transactions(actor.id, page, size)
        .await
        .map_err(map_ledger_error)?;

    Ok(Json(json!({
        "success": true,
        "transactions": transactions,
        "page": page,
        "size": size
    })))
}

/// Opens a Pending deposit and hands back the signed gateway URL. The
/// balance changes only when the gateway callback settles it.
#[axum::debug_handler]
pub async fn top_up(
    State(state): State<WalletState>,
    Extension(user): Extension<User>,
    Json(request): Json<TopUpRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from(&user)?;

    if !state.gateway.is_configured() {
        return Err(AppError::ExternalService("Payment gateway is not configured".to_string()));
    }

    let method = request.payment_method.as_deref().unwrap_or(DEFAULT_TOP_UP_METHOD);
    let deposit = state
        .ledger
        .deposit(actor.id, request.amount, method)
        .await
        .map_err(map_ledger_error)?;

    let correlation = CorrelationRef::deposit(deposit.id);
    let description = format!("Wallet top-up {}", deposit.reference);

    let payment_url = match state.gateway.build_redirect_url(
        deposit.amount,
        &description,
        &correlation,
        &state.config.vnpay_return_url,
    ) {
        Ok(url) => url,
        Err(e) => {
            error!("Could not build redirect for deposit {}: {}", deposit.reference, e);
            if let Err(fail_err) = state.ledger.fail_deposit(&deposit.reference, &e.to_string()).await {
                error!("Could not mark deposit {} failed: {}", deposit.reference, fail_err);
            }
            return Err(match e {
                GatewayError::InvalidAmount(msg) => AppError::ValidationError(msg),
                other => AppError::ExternalService(other.to_string()),
            });
        }
    };

    info!("Top-up {} started for {}", deposit.reference, actor.id);

    Ok(Json(json!({
        "success": true,
        "top_up": TopUpResponse {
            reference: deposit.reference,
            amount: deposit.amount,
            payment_url,
        }
    })))
}
