use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_database::SupabaseClient;

use crate::models::{BookingError, ProviderProfile};

/// Doctor availability and pricing, owned by the doctor directory.
#[async_trait]
pub trait ProviderDirectory: Send + Sync {
    async fn is_active(&self, provider_id: Uuid) -> Result<bool, BookingError>;

    async fn price(&self, provider_id: Uuid) -> Result<Decimal, BookingError>;
}

#[derive(Default)]
pub struct InMemoryProviderDirectory {
    providers: RwLock<HashMap<Uuid, ProviderProfile>>,
}

impl InMemoryProviderDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, id: Uuid, is_active: bool, consultation_fee: Decimal) {
        self.providers
            .write()
            .await
            .insert(id, ProviderProfile { id, is_active, consultation_fee });
    }

    async fn profile(&self, provider_id: Uuid) -> Result<ProviderProfile, BookingError> {
        self.providers
            .read()
            .await
            .get(&provider_id)
            .cloned()
            .ok_or(BookingError::ProviderNotFound(provider_id))
    }
}

#[async_trait]
impl ProviderDirectory for InMemoryProviderDirectory {
    async fn is_active(&self, provider_id: Uuid) -> Result<bool, BookingError> {
        Ok(self.profile(provider_id).await?.is_active)
    }

    async fn price(&self, provider_id: Uuid) -> Result<Decimal, BookingError> {
        Ok(self.profile(provider_id).await?.consultation_fee)
    }
}

#[derive(Debug, Deserialize)]
struct DoctorRow {
    status: Option<String>,
    consultation_fee: Option<Decimal>,
}

/// Reads the `doctors` table.
pub struct SupabaseProviderDirectory {
    client: Arc<SupabaseClient>,
}

impl SupabaseProviderDirectory {
    pub fn new(client: Arc<SupabaseClient>) -> Self {
        Self { client }
    }

    async fn doctor(&self, provider_id: Uuid) -> Result<DoctorRow, BookingError> {
        let path = format!(
            "/rest/v1/doctors?id=eq.{}&select=status,consultation_fee",
            provider_id
        );
        let rows: Vec<DoctorRow> = self
            .client
            .request(Method::GET, &path, None, None)
            .await
            .map_err(|e| BookingError::Storage(e.to_string()))?;

        debug!("Doctor lookup for {} returned {} rows", provider_id, rows.len());
        rows.into_iter()
            .next()
            .ok_or(BookingError::ProviderNotFound(provider_id))
    }
}

#[async_trait]
impl ProviderDirectory for SupabaseProviderDirectory {
    async fn is_active(&self, provider_id: Uuid) -> Result<bool, BookingError> {
        let doctor = self.doctor(provider_id).await?;
        Ok(doctor
            .status
            .map(|s| s.eq_ignore_ascii_case("active"))
            .unwrap_or(false))
    }

    async fn price(&self, provider_id: Uuid) -> Result<Decimal, BookingError> {
        let doctor = self.doctor(provider_id).await?;
        Ok(doctor.consultation_fee.unwrap_or(Decimal::ZERO))
    }
}
