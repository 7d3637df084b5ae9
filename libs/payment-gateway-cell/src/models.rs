use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const SECURE_HASH_PARAM: &str = "vnp_SecureHash";
pub const SECURE_HASH_TYPE_PARAM: &str = "vnp_SecureHashType";
pub const TXN_REF_PARAM: &str = "vnp_TxnRef";
pub const RESPONSE_CODE_PARAM: &str = "vnp_ResponseCode";
pub const TRANSACTION_NO_PARAM: &str = "vnp_TransactionNo";

/// Gateway response code for a successful payment.
pub const SUCCESS_RESPONSE_CODE: &str = "00";

const BOOKING_PREFIX: &str = "APT";
const DEPOSIT_PREFIX: &str = "TOPUP";

/// Query parameters as received from (or sent to) the gateway. Ordered by
/// name, which is the order the signing string needs.
pub type GatewayParams = BTreeMap<String, String>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Gateway callback signature is invalid")]
    SignatureInvalid,

    #[error("Correlation reference could not be parsed: {0}")]
    CorrelationUnparseable(String),

    #[error("Invalid gateway amount: {0}")]
    InvalidAmount(String),

    #[error("Payment gateway is not configured")]
    NotConfigured,
}

/// Links a gateway round-trip back to the local record it pays for.
///
/// Encoded into the gateway's transaction reference; the prefix tells the
/// reconciler which flow a callback belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CorrelationRef {
    /// `APT{booking id}_{issued millis}`. The suffix keeps retried payment
    /// attempts for one booking distinct at the gateway.
    Booking { booking_id: Uuid, issued_at_millis: i64 },
    /// `TOPUP{transaction id}`, identical to the ledger transaction reference.
    Deposit { transaction_id: Uuid },
}

impl CorrelationRef {
    pub fn booking(booking_id: Uuid, issued_at: DateTime<Utc>) -> Self {
        CorrelationRef::Booking {
            booking_id,
            issued_at_millis: issued_at.timestamp_millis(),
        }
    }

    pub fn deposit(transaction_id: Uuid) -> Self {
        CorrelationRef::Deposit { transaction_id }
    }

    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        let unparseable = || GatewayError::CorrelationUnparseable(raw.to_string());

        if let Some(rest) = raw.strip_prefix(DEPOSIT_PREFIX) {
            let transaction_id = Uuid::try_parse(rest).map_err(|_| unparseable())?;
            return Ok(CorrelationRef::Deposit { transaction_id });
        }

        if let Some(rest) = raw.strip_prefix(BOOKING_PREFIX) {
            let (id, millis) = rest.split_once('_').ok_or_else(unparseable)?;
            let booking_id = Uuid::try_parse(id).map_err(|_| unparseable())?;
            let issued_at_millis = millis.parse::<i64>().map_err(|_| unparseable())?;
            return Ok(CorrelationRef::Booking { booking_id, issued_at_millis });
        }

        Err(unparseable())
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CorrelationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationRef::Booking { booking_id, issued_at_millis } => {
                write!(f, "{}{}_{}", BOOKING_PREFIX, booking_id.simple(), issued_at_millis)
            }
            CorrelationRef::Deposit { transaction_id } => {
                write!(f, "{}{}", DEPOSIT_PREFIX, transaction_id.simple())
            }
        }
    }
}

/// A callback whose signature has been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCallback {
    pub txn_ref: Option<String>,
    pub response_code: Option<String>,
    pub transaction_no: Option<String>,
    pub params: GatewayParams,
}

impl VerifiedCallback {
    pub fn is_success(&self) -> bool {
        self.response_code.as_deref() == Some(SUCCESS_RESPONSE_CODE)
    }

    pub fn correlation(&self) -> Result<CorrelationRef, GatewayError> {
        match self.txn_ref.as_deref() {
            Some(raw) if !raw.is_empty() => CorrelationRef::parse(raw),
            _ => Err(GatewayError::CorrelationUnparseable(String::new())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    #[test]
    fn test_booking_ref_encoding() {
        let id = Uuid::parse_str("6f1c2a9e-4b1d-4c55-9a8e-2d1f0c3b7a10").unwrap();
        let issued = Utc.timestamp_millis_opt(1_730_000_000_123).unwrap();
        let encoded = CorrelationRef::booking(id, issued).encode();

        assert_eq!(encoded, "APT6f1c2a9e4b1d4c559a8e2d1f0c3b7a10_1730000000123");
        assert_eq!(
            CorrelationRef::parse(&encoded).unwrap(),
            CorrelationRef::Booking { booking_id: id, issued_at_millis: 1_730_000_000_123 }
        );
    }

    #[test]
    fn test_deposit_ref_encoding() {
        let id = Uuid::new_v4();
        let encoded = CorrelationRef::deposit(id).encode();

        assert!(encoded.starts_with("TOPUP"));
        assert_eq!(CorrelationRef::parse(&encoded).unwrap(), CorrelationRef::deposit(id));
    }

    #[test]
    fn test_unparseable_refs() {
        for raw in ["", "APT", "APTnot-a-uuid_1", "APT6f1c2a9e4b1d4c559a8e2d1f0c3b7a10", "REFUND_APT1_2", "TOPUPxyz"] {
            assert_matches!(CorrelationRef::parse(raw), Err(GatewayError::CorrelationUnparseable(_)), "{raw}");
        }
    }

    #[test]
    fn test_missing_txn_ref_is_unparseable() {
        let callback = VerifiedCallback {
            txn_ref: None,
            response_code: Some("00".to_string()),
            transaction_no: None,
            params: GatewayParams::new(),
        };

        assert!(callback.is_success());
        assert_matches!(callback.correlation(), Err(GatewayError::CorrelationUnparseable(_)));
    }
}
