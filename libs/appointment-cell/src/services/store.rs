use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Method;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use shared_database::SupabaseClient;

use crate::models::{Booking, BookingError, BookingUpdate, LifecycleStatus, PaymentStatus, Slot, TransitionGuard};

/// Booking persistence.
///
/// `insert_at_slot` carries the slot-exclusivity guarantee: it must fail
/// with `SlotTaken` when another live booking holds the slot or when the
/// booking's slot generation is already used, atomically with the write.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn insert_at_slot(&self, booking: &Booking) -> Result<Booking, BookingError>;

    /// Every booking ever recorded at the slot, oldest generation first.
    async fn bookings_at_slot(&self, slot: &Slot) -> Result<Vec<Booking>, BookingError>;

    /// Every booking with the doctor on `date`, any status.
    async fn bookings_on_day(&self, doctor_id: Uuid, date: NaiveDate) -> Result<Vec<Booking>, BookingError>;

    async fn get(&self, id: Uuid) -> Result<Option<Booking>, BookingError>;

    /// Applies `update` only if the row still satisfies `guard`. `None`
    /// means the guard did not match (or the booking does not exist).
    async fn transition(
        &self,
        id: Uuid,
        guard: TransitionGuard,
        update: &BookingUpdate,
    ) -> Result<Option<Booking>, BookingError>;

    async fn list_for_patient(&self, patient_id: Uuid, limit: usize, offset: usize) -> Result<Vec<Booking>, BookingError>;

    async fn list_for_doctor(&self, doctor_id: Uuid, limit: usize, offset: usize) -> Result<Vec<Booking>, BookingError>;
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

#[derive(Default)]
pub struct InMemoryBookingStore {
    bookings: Mutex<HashMap<Uuid, Booking>>,
}

impl InMemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn page(mut bookings: Vec<Booking>, limit: usize, offset: usize) -> Vec<Booking> {
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        bookings.into_iter().skip(offset).take(limit).collect()
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn insert_at_slot(&self, booking: &Booking) -> Result<Booking, BookingError> {
        let mut bookings = self.bookings.lock().await;
        let slot = booking.slot();

        // Same two constraints as the unique indexes on the appointments table
        let conflict = bookings.values().filter(|b| b.slot() == slot).any(|b| {
            b.slot_generation == booking.slot_generation || (b.holds_slot() && booking.holds_slot())
        });
        if conflict || bookings.contains_key(&booking.id) {
            return Err(BookingError::SlotTaken);
        }

        bookings.insert(booking.id, booking.clone());
        Ok(booking.clone())
    }

    async fn bookings_at_slot(&self, slot: &Slot) -> Result<Vec<Booking>, BookingError> {
        let bookings = self.bookings.lock().await;
        let mut at_slot: Vec<Booking> = bookings.values().filter(|b| b.slot() == *slot).cloned().collect();
        at_slot.sort_by_key(|b| b.slot_generation);
        Ok(at_slot)
    }

    async fn bookings_on_day(&self, doctor_id: Uuid, date: NaiveDate) -> Result<Vec<Booking>, BookingError> {
        let bookings = self.bookings.lock().await;
        Ok(bookings
            .values()
            .filter(|b| b.doctor_id == doctor_id && b.appointment_date == date)
            .cloned()
            .collect())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Booking>, BookingError> {
        Ok(self.bookings.lock().await.get(&id).cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        guard: TransitionGuard,
        update: &BookingUpdate,
    ) -> Result<Option<Booking>, BookingError> {
        let mut bookings = self.bookings.lock().await;
        let Some(booking) = bookings.get_mut(&id) else {
            return Ok(None);
        };
        if !guard.admits(booking) {
            return Ok(None);
        }

        if let Some(status) = update.status {
            booking.status = status;
        }
        if let Some(payment_status) = update.payment_status {
            booking.payment_status = payment_status;
        }
        booking.updated_at = update.updated_at;
        Ok(Some(booking.clone()))
    }

    async fn list_for_patient(&self, patient_id: Uuid, limit: usize, offset: usize) -> Result<Vec<Booking>, BookingError> {
        let bookings = self.bookings.lock().await;
        let mine = bookings.values().filter(|b| b.patient_id == patient_id).cloned().collect();
        Ok(Self::page(mine, limit, offset))
    }

    async fn list_for_doctor(&self, doctor_id: Uuid, limit: usize, offset: usize) -> Result<Vec<Booking>, BookingError> {
        let bookings = self.bookings.lock().await;
        let mine = bookings.values().filter(|b| b.doctor_id == doctor_id).cloned().collect();
        Ok(Self::page(mine, limit, offset))
    }
}

// ==============================================================================
// SUPABASE STORE
// ==============================================================================

/// `appointments` table via PostgREST. Slot exclusivity comes from the
/// table's unique indexes (a 409 on insert), transitions from status
/// filters on the PATCH.
pub struct SupabaseBookingStore {
    client: Arc<SupabaseClient>,
}

const RETURN_REPRESENTATION: (&str, &str) = ("Prefer", "return=representation");

impl SupabaseBookingStore {
    pub fn new(client: Arc<SupabaseClient>) -> Self {
        Self { client }
    }

    fn in_filter<T>(values: &[T], as_str: fn(&T) -> &'static str) -> String {
        let joined = values.iter().map(as_str).collect::<Vec<_>>().join(",");
        format!("in.({})", joined)
    }

    async fn select(&self, path: &str) -> Result<Vec<Booking>, BookingError> {
        self.client
            .request(Method::GET, path, None, None)
            .await
            .map_err(|e| BookingError::Storage(e.to_string()))
    }
}

#[async_trait]
impl BookingStore for SupabaseBookingStore {
    async fn insert_at_slot(&self, booking: &Booking) -> Result<Booking, BookingError> {
        let body = serde_json::to_value(booking).map_err(|e| BookingError::Storage(e.to_string()))?;

        let rows: Vec<Booking> = self
            .client
            .request_with_headers(Method::POST, "/rest/v1/appointments", None, Some(body), &[RETURN_REPRESENTATION])
            .await
            .map_err(|e| {
                if e.is_conflict() {
                    debug!("Slot insert for booking {} rejected by unique index", booking.id);
                    BookingError::SlotTaken
                } else {
                    BookingError::Storage(e.to_string())
                }
            })?;

        rows.into_iter()
            .next()
            .ok_or_else(|| BookingError::Storage("Insert returned no row".to_string()))
    }

    async fn bookings_at_slot(&self, slot: &Slot) -> Result<Vec<Booking>, BookingError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&appointment_date=eq.{}&appointment_time=eq.{}&order=slot_generation.asc",
            slot.doctor_id,
            slot.date.format("%Y-%m-%d"),
            urlencoding::encode(&slot.time.format("%H:%M:%S").to_string())
        );
        self.select(&path).await
    }

    async fn bookings_on_day(&self, doctor_id: Uuid, date: NaiveDate) -> Result<Vec<Booking>, BookingError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&appointment_date=eq.{}&order=appointment_time.asc",
            doctor_id,
            date.format("%Y-%m-%d")
        );
        self.select(&path).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Booking>, BookingError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", id);
        Ok(self.select(&path).await?.into_iter().next())
    }

    async fn transition(
        &self,
        id: Uuid,
        guard: TransitionGuard,
        update: &BookingUpdate,
    ) -> Result<Option<Booking>, BookingError> {
        let mut path = format!("/rest/v1/appointments?id=eq.{}", id);
        if !guard.lifecycle.is_empty() {
            path.push_str("&status=");
            path.push_str(&Self::in_filter(guard.lifecycle, LifecycleStatus::as_str));
        }
        if !guard.payment.is_empty() {
            path.push_str("&payment_status=");
            path.push_str(&Self::in_filter(guard.payment, PaymentStatus::as_str));
        }

        let mut body = Map::new();
        if let Some(status) = update.status {
            body.insert("status".to_string(), json!(status));
        }
        if let Some(payment_status) = update.payment_status {
            body.insert("payment_status".to_string(), json!(payment_status));
        }
        body.insert("updated_at".to_string(), json!(update.updated_at));

        let rows: Vec<Booking> = self
            .client
            .request_with_headers(Method::PATCH, &path, None, Some(Value::Object(body)), &[RETURN_REPRESENTATION])
            .await
            .map_err(|e| {
                if e.is_conflict() {
                    // Reviving a booking into a slot someone else now holds
                    BookingError::SlotTaken
                } else {
                    BookingError::Storage(e.to_string())
                }
            })?;

        Ok(rows.into_iter().next())
    }

    async fn list_for_patient(&self, patient_id: Uuid, limit: usize, offset: usize) -> Result<Vec<Booking>, BookingError> {
        let path = format!(
            "/rest/v1/appointments?patient_id=eq.{}&order=created_at.desc&limit={}&offset={}",
            patient_id, limit, offset
        );
        self.select(&path).await
    }

    async fn list_for_doctor(&self, doctor_id: Uuid, limit: usize, offset: usize) -> Result<Vec<Booking>, BookingError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&order=created_at.desc&limit={}&offset={}",
            doctor_id, limit, offset
        );
        self.select(&path).await
    }
}
