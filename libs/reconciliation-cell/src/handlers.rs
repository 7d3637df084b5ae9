use axum::{
    extract::{Query, State},
    response::Redirect,
};
use tracing::{error, info};
use url::form_urlencoded;

use payment_gateway_cell::{GatewayParams, TRANSACTION_NO_PARAM, TXN_REF_PARAM};

use crate::models::ReconciliationError;
use crate::router::ReconciliationState;

const WALLET_RESULT_PAGE: &str = "/patient/wallet/payment/result";
const APPOINTMENT_RESULT_PAGE: &str = "/patient/appointment/payment/result";
const AMOUNT_PARAM: &str = "vnp_Amount";

/// Browser return from a wallet top-up.
#[axum::debug_handler]
pub async fn wallet_callback(
    State(state): State<ReconciliationState>,
    Query(params): Query<GatewayParams>,
) -> Redirect {
    reconcile(&state, params, WALLET_RESULT_PAGE).await
}

/// Browser return from a booking payment.
#[axum::debug_handler]
pub async fn appointment_callback(
    State(state): State<ReconciliationState>,
    Query(params): Query<GatewayParams>,
) -> Redirect {
    reconcile(&state, params, APPOINTMENT_RESULT_PAGE).await
}

/// Runs the reconciler and sends the browser to the frontend result page.
/// The gateway never sees an error status from here.
async fn reconcile(state: &ReconciliationState, params: GatewayParams, page: &str) -> Redirect {
    let txn_ref = params.get(TXN_REF_PARAM).cloned().unwrap_or_default();
    let mut pairs: Vec<(&str, String)> = Vec::new();

    match state.reconciler.on_callback(params.clone()).await {
        Ok(report) => {
            let message = if report.is_success() { "Payment successful" } else { "Payment failed" };
            info!("Gateway callback {} applied: {}", txn_ref, message);
            pairs.push(("code", report.response_code.clone()));
            if let Some(booking_id) = report.booking_id() {
                pairs.push(("appointmentId", booking_id.to_string()));
            }
            pairs.push(("message", message.to_string()));
        }
        Err(e) => {
            if !matches!(e, ReconciliationError::Gateway(_)) {
                error!("Gateway callback {} could not be applied: {}", txn_ref, e);
            }
            pairs.push(("code", e.result_code().to_string()));
            pairs.push(("message", e.to_string()));
        }
    }

    pairs.push((TXN_REF_PARAM, txn_ref));
    for name in [TRANSACTION_NO_PARAM, AMOUNT_PARAM] {
        if let Some(value) = params.get(name) {
            pairs.push((name, value.clone()));
        }
    }

    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter())
        .finish();
    let url = format!("{}{}?{}", state.config.frontend_url.trim_end_matches('/'), page, query);
    Redirect::to(&url)
}
