use std::fmt::Write as _;
use std::sync::Arc;

use chrono::Duration;
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sha2::Sha512;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use url::form_urlencoded::byte_serialize;

use shared_config::AppConfig;
use shared_utils::clock::{clinic_offset, Clock, SystemClock};

use crate::models::{
    CorrelationRef, GatewayError, GatewayParams, VerifiedCallback, RESPONSE_CODE_PARAM,
    SECURE_HASH_PARAM, SECURE_HASH_TYPE_PARAM, TRANSACTION_NO_PARAM, TXN_REF_PARAM,
};

type HmacSha512 = Hmac<Sha512>;

const VERSION: &str = "2.1.0";
const COMMAND: &str = "pay";
const CURRENCY: &str = "VND";
const DEFAULT_LOCALE: &str = "vn";
const DEFAULT_ORDER_TYPE: &str = "other";
const DEFAULT_CLIENT_IP: &str = "127.0.0.1";
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const EXPIRY_MINUTES: i64 = 15;

/// Redirect-based payment gateway integration: signs outbound payment
/// requests and verifies the signed callbacks that come back.
#[derive(Clone)]
pub struct VnPayGateway {
    tmn_code: String,
    hash_secret: String,
    pay_url: String,
    locale: String,
    order_type: String,
    client_ip: String,
    clock: Arc<dyn Clock>,
}

impl VnPayGateway {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            tmn_code: config.vnpay_tmn_code.clone(),
            hash_secret: config.vnpay_hash_secret.clone(),
            pay_url: config.vnpay_url.clone(),
            locale: DEFAULT_LOCALE.to_string(),
            order_type: DEFAULT_ORDER_TYPE.to_string(),
            client_ip: DEFAULT_CLIENT_IP.to_string(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    pub fn with_client_ip(mut self, client_ip: impl Into<String>) -> Self {
        self.client_ip = client_ip.into();
        self
    }

    pub fn is_configured(&self) -> bool {
        !self.tmn_code.is_empty() && !self.hash_secret.is_empty() && !self.pay_url.is_empty()
    }

    /// The unsigned request parameters for one payment attempt.
    pub fn redirect_params(
        &self,
        amount: Decimal,
        description: &str,
        correlation: &CorrelationRef,
        return_target: &str,
    ) -> Result<GatewayParams, GatewayError> {
        let minor_units = to_minor_units(amount)?;

        let created = self.clock.now().with_timezone(&clinic_offset());
        let expires = created + Duration::minutes(EXPIRY_MINUTES);

        let mut params = GatewayParams::new();
        params.insert("vnp_Version".into(), VERSION.into());
        params.insert("vnp_Command".into(), COMMAND.into());
        params.insert("vnp_TmnCode".into(), self.tmn_code.clone());
        params.insert("vnp_Amount".into(), minor_units.to_string());
        params.insert("vnp_CurrCode".into(), CURRENCY.into());
        params.insert(TXN_REF_PARAM.into(), correlation.encode());
        params.insert("vnp_OrderInfo".into(), description.to_string());
        params.insert("vnp_OrderType".into(), self.order_type.clone());
        params.insert("vnp_Locale".into(), self.locale.clone());
        params.insert("vnp_ReturnUrl".into(), return_target.to_string());
        params.insert("vnp_IpAddr".into(), self.client_ip.clone());
        params.insert("vnp_CreateDate".into(), created.format(TIMESTAMP_FORMAT).to_string());
        params.insert("vnp_ExpireDate".into(), expires.format(TIMESTAMP_FORMAT).to_string());

        Ok(params)
    }

    pub fn build_redirect_url(
        &self,
        amount: Decimal,
        description: &str,
        correlation: &CorrelationRef,
        return_target: &str,
    ) -> Result<String, GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured);
        }

        let params = self.redirect_params(amount, description, correlation, return_target)?;
        let secure_hash = self.sign(&params)?;

        let mut query = params
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(name, value)| format!("{}={}", encode(name), encode(value)))
            .collect::<Vec<_>>()
            .join("&");
        query.push_str("&vnp_SecureHash=");
        query.push_str(&secure_hash);

        info!("Built gateway redirect for {} ({} minor units)", correlation, minor_units_of(&params));
        Ok(format!("{}?{}", self.pay_url, query))
    }

    /// Keyed hash over the signing string, lowercase hex.
    pub fn sign(&self, params: &GatewayParams) -> Result<String, GatewayError> {
        if self.hash_secret.is_empty() {
            return Err(GatewayError::NotConfigured);
        }
        keyed_hash(&self.hash_secret, &signing_string(params)).ok_or(GatewayError::NotConfigured)
    }

    /// True only when the received hash matches the one recomputed over the
    /// remaining non-empty parameters. Never panics on a malformed hash.
    pub fn verify_callback(&self, params: &GatewayParams) -> bool {
        let Some(received) = params.get(SECURE_HASH_PARAM) else {
            warn!("Gateway callback carries no secure hash");
            return false;
        };

        let mut unsigned = params.clone();
        unsigned.remove(SECURE_HASH_PARAM);
        unsigned.remove(SECURE_HASH_TYPE_PARAM);

        let Ok(expected) = self.sign(&unsigned) else {
            warn!("Cannot verify gateway callback, hash secret not configured");
            return false;
        };

        let received = received.trim().to_ascii_lowercase();
        let valid: bool = received.as_bytes().ct_eq(expected.as_bytes()).into();
        if !valid {
            warn!(
                "Invalid gateway checksum for {}",
                params.get(TXN_REF_PARAM).map(String::as_str).unwrap_or("<none>")
            );
        }
        valid
    }

    pub fn verified(&self, params: GatewayParams) -> Result<VerifiedCallback, GatewayError> {
        if !self.verify_callback(&params) {
            return Err(GatewayError::SignatureInvalid);
        }
        debug!("Gateway checksum verified");

        Ok(VerifiedCallback {
            txn_ref: params.get(TXN_REF_PARAM).cloned(),
            response_code: params.get(RESPONSE_CODE_PARAM).cloned(),
            transaction_no: params.get(TRANSACTION_NO_PARAM).cloned(),
            params,
        })
    }
}

/// `name=encode(value)` over non-empty values, in name order, joined by `&`.
/// Names are not encoded here, only in the query string.
pub fn signing_string(params: &GatewayParams) -> String {
    params
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(name, value)| format!("{}={}", name, encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

// application/x-www-form-urlencoded over UTF-8: space becomes '+', only
// ASCII alphanumerics and `*-._` pass through.
fn encode(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect()
}

fn keyed_hash(secret: &str, data: &str) -> Option<String> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(data.as_bytes());
    let digest = mac.finalize().into_bytes();

    Some(digest.iter().fold(String::with_capacity(digest.len() * 2), |mut out, byte| {
        let _ = write!(out, "{:02x}", byte);
        out
    }))
}

fn to_minor_units(amount: Decimal) -> Result<i64, GatewayError> {
    if amount <= Decimal::ZERO {
        return Err(GatewayError::InvalidAmount(format!("{} must be positive", amount)));
    }
    let scaled = amount * Decimal::ONE_HUNDRED;
    if scaled.fract() != Decimal::ZERO {
        return Err(GatewayError::InvalidAmount(format!("{} has sub-minor-unit precision", amount)));
    }
    scaled
        .to_i64()
        .ok_or_else(|| GatewayError::InvalidAmount(format!("{} is out of range", amount)))
}

fn minor_units_of(params: &GatewayParams) -> &str {
    params.get("vnp_Amount").map(String::as_str).unwrap_or("?")
}
