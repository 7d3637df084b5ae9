use std::sync::Arc;

use tracing::{info, warn};

use appointment_cell::BookingCoordinator;
use payment_gateway_cell::{CorrelationRef, GatewayParams, VnPayGateway};
use wallet_cell::Ledger;

use crate::models::{CallbackReport, ReconciliationError, Settlement};

/// Applies gateway callbacks to the wallet ledger or to bookings. Nothing
/// is touched unless the callback signature verifies.
pub struct Reconciler {
    gateway: Arc<VnPayGateway>,
    ledger: Arc<Ledger>,
    coordinator: Arc<BookingCoordinator>,
}

impl Reconciler {
    pub fn new(gateway: Arc<VnPayGateway>, ledger: Arc<Ledger>, coordinator: Arc<BookingCoordinator>) -> Self {
        Self { gateway, ledger, coordinator }
    }

    pub async fn on_callback(&self, params: GatewayParams) -> Result<CallbackReport, ReconciliationError> {
        let callback = self.gateway.verified(params).map_err(|e| {
            warn!("Discarding gateway callback: {}", e);
            e
        })?;
        let correlation = callback.correlation()?;

        let response_code = callback.response_code.clone().unwrap_or_default();
        let success = callback.is_success();
        let transaction_no = callback.transaction_no.clone();
        info!(
            "Gateway callback for {}: response code {:?}, transaction {:?}",
            correlation, response_code, transaction_no
        );

        let settlement = match correlation {
            CorrelationRef::Deposit { .. } => {
                let reference = correlation.encode();
                let transaction = if success {
                    self.ledger.settle_deposit(&reference, transaction_no.as_deref()).await?
                } else {
                    let reason = format!("Payment failed: ResponseCode={}", response_code);
                    self.ledger.fail_deposit(&reference, &reason).await?
                };
                Settlement::Deposit(transaction)
            }
            CorrelationRef::Booking { .. } => {
                let booking = self
                    .coordinator
                    .on_gateway_outcome(&correlation, success, transaction_no.as_deref())
                    .await?;
                Settlement::Booking(booking)
            }
        };

        Ok(CallbackReport {
            correlation,
            response_code,
            transaction_no,
            settlement,
        })
    }
}
