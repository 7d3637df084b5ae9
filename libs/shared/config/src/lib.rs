use std::env;
use std::str::FromStr;

use rust_decimal::Decimal;
use tracing::warn;

pub const DEFAULT_VNPAY_URL: &str = "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_role_key: String,
    pub supabase_jwt_secret: String,
    pub vnpay_tmn_code: String,
    pub vnpay_hash_secret: String,
    pub vnpay_url: String,
    pub vnpay_return_url: String,
    pub vnpay_appointment_return_url: String,
    pub frontend_url: String,
    pub wallet_min_deposit: Decimal,
    pub wallet_max_deposit: Decimal,
    pub notification_webhook_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_SERVICE_ROLE_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            // Gateway credentials are trimmed: stray whitespace from .env files breaks every signature.
            vnpay_tmn_code: env::var("VNPAY_TMN_CODE")
                .map(|v| v.trim().to_string())
                .unwrap_or_else(|_| {
                    warn!("VNPAY_TMN_CODE not set, using empty value");
                    String::new()
                }),
            vnpay_hash_secret: env::var("VNPAY_HASH_SECRET")
                .map(|v| v.trim().to_string())
                .unwrap_or_else(|_| {
                    warn!("VNPAY_HASH_SECRET not set, using empty value");
                    String::new()
                }),
            vnpay_url: env::var("VNPAY_URL")
                .unwrap_or_else(|_| {
                    warn!("VNPAY_URL not set, using sandbox default");
                    DEFAULT_VNPAY_URL.to_string()
                }),
            vnpay_return_url: env::var("VNPAY_RETURN_URL")
                .unwrap_or_else(|_| {
                    warn!("VNPAY_RETURN_URL not set, using local default");
                    "http://localhost:3000/payments/vnpay/callback".to_string()
                }),
            vnpay_appointment_return_url: env::var("VNPAY_APPOINTMENT_RETURN_URL")
                .unwrap_or_else(|_| {
                    warn!("VNPAY_APPOINTMENT_RETURN_URL not set, using local default");
                    "http://localhost:3000/payments/vnpay/appointment-callback".to_string()
                }),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| {
                    warn!("FRONTEND_URL not set, using local default");
                    "http://localhost:5173".to_string()
                }),
            wallet_min_deposit: decimal_var("WALLET_MIN_DEPOSIT", Decimal::from(10_000)),
            wallet_max_deposit: decimal_var("WALLET_MAX_DEPOSIT", Decimal::from(50_000_000)),
            notification_webhook_url: env::var("NOTIFICATION_WEBHOOK_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }
        if !config.is_gateway_configured() {
            warn!("Payment gateway not configured - redirect payments will be rejected");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    pub fn is_gateway_configured(&self) -> bool {
        !self.vnpay_tmn_code.is_empty()
            && !self.vnpay_hash_secret.is_empty()
            && !self.vnpay_url.is_empty()
    }
}

fn decimal_var(name: &str, default: Decimal) -> Decimal {
    match env::var(name) {
        Ok(raw) => Decimal::from_str(raw.trim()).unwrap_or_else(|_| {
            warn!("{} is not a valid decimal ({}), using default {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}
