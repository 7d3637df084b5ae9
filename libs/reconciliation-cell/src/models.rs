use serde::Serialize;
use uuid::Uuid;

use appointment_cell::{Booking, BookingError};
use payment_gateway_cell::{CorrelationRef, GatewayError, SUCCESS_RESPONSE_CODE};
use wallet_cell::{LedgerError, LedgerTransaction};

/// Result code sent to the frontend when the callback signature is wrong.
pub const INVALID_SIGNATURE_CODE: &str = "97";
/// Result code for a missing reference or a callback that could not be applied.
pub const SYSTEM_ERROR_CODE: &str = "99";

/// The record a verified callback was applied to, as it stands afterwards.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum Settlement {
    Deposit(LedgerTransaction),
    Booking(Booking),
}

#[derive(Debug, Clone, Serialize)]
pub struct CallbackReport {
    pub correlation: CorrelationRef,
    pub response_code: String,
    pub transaction_no: Option<String>,
    pub settlement: Settlement,
}

impl CallbackReport {
    pub fn is_success(&self) -> bool {
        self.response_code == SUCCESS_RESPONSE_CODE
    }

    pub fn booking_id(&self) -> Option<Uuid> {
        match self.settlement {
            Settlement::Booking(ref booking) => Some(booking.id),
            Settlement::Deposit(_) => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconciliationError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Deposit could not be settled: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Booking payment could not be applied: {0}")]
    Booking(#[from] BookingError),
}

impl ReconciliationError {
    /// The code the browser is redirected with.
    pub fn result_code(&self) -> &'static str {
        match self {
            ReconciliationError::Gateway(GatewayError::SignatureInvalid) => INVALID_SIGNATURE_CODE,
            _ => SYSTEM_ERROR_CODE,
        }
    }
}
