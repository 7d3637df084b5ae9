use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_utils::clock::Clock;

use crate::models::{Booking, BookingDraft, BookingError, LifecycleStatus, Slot};
use crate::services::providers::ProviderDirectory;
use crate::services::store::BookingStore;

/// Clinic sessions as (first start, last start), hours and minutes.
const SESSIONS: [((u32, u32), (u32, u32)); 2] = [((8, 0), (11, 30)), ((13, 0), (17, 0))];

const SLOT_LENGTH_MINUTES: i64 = 30;

/// Start times of every bookable slot in a clinic day, in order.
pub fn daily_grid() -> Vec<NaiveTime> {
    let mut grid = Vec::new();
    for ((start_h, start_m), (last_h, last_m)) in SESSIONS {
        let (Some(mut time), Some(last)) = (
            NaiveTime::from_hms_opt(start_h, start_m, 0),
            NaiveTime::from_hms_opt(last_h, last_m, 0),
        ) else {
            continue;
        };
        while time <= last {
            grid.push(time);
            time += Duration::minutes(SLOT_LENGTH_MINUTES);
        }
    }
    grid
}

/// Hands out slots. At most one live booking per slot, enforced by the
/// store at insert time; the checks here only give the caller a better
/// error before the write.
pub struct SlotAllocator {
    store: Arc<dyn BookingStore>,
    providers: Arc<dyn ProviderDirectory>,
    clock: Arc<dyn Clock>,
}

impl SlotAllocator {
    pub fn new(store: Arc<dyn BookingStore>, providers: Arc<dyn ProviderDirectory>, clock: Arc<dyn Clock>) -> Self {
        Self { store, providers, clock }
    }

    pub async fn is_slot_free(&self, slot: &Slot) -> Result<bool, BookingError> {
        let bookings = self.store.bookings_at_slot(slot).await?;
        Ok(!bookings.iter().any(Booking::holds_slot))
    }

    /// Grid times on `date` not held by a live booking. Past dates have none.
    pub async fn available_slots(&self, doctor_id: Uuid, date: NaiveDate) -> Result<Vec<NaiveTime>, BookingError> {
        if date < self.clock.today() {
            return Ok(Vec::new());
        }

        let held: Vec<NaiveTime> = self
            .store
            .bookings_on_day(doctor_id, date)
            .await?
            .into_iter()
            .filter(Booking::holds_slot)
            .map(|b| b.appointment_time)
            .collect();

        Ok(daily_grid().into_iter().filter(|t| !held.contains(t)).collect())
    }

    /// Records a Requested booking at `slot`. Concurrent reservations of
    /// the same slot race on the next slot generation; exactly one insert
    /// wins and the rest see `SlotTaken`.
    pub async fn reserve(&self, slot: Slot, draft: BookingDraft) -> Result<Booking, BookingError> {
        let today = self.clock.today();
        if slot.date < today {
            warn!("Rejected booking for past date {} (today is {})", slot.date, today);
            return Err(BookingError::PastDate(slot.date));
        }

        if !self.providers.is_active(slot.doctor_id).await? {
            return Err(BookingError::ProviderInactive(slot.doctor_id));
        }

        let existing = self.store.bookings_at_slot(&slot).await?;
        if existing.iter().any(Booking::holds_slot) {
            debug!("Slot {} {} {} already held", slot.doctor_id, slot.date, slot.time);
            return Err(BookingError::SlotTaken);
        }

        let now = self.clock.now();
        let booking = Booking {
            id: draft.id,
            patient_id: draft.patient_id,
            dependent_id: draft.dependent_id,
            doctor_id: slot.doctor_id,
            appointment_date: slot.date,
            appointment_time: slot.time,
            slot_generation: existing.len() as i32,
            status: LifecycleStatus::Requested,
            payment_status: draft.payment_status,
            payment_method: draft.payment_method,
            price: draft.price,
            gateway_ref: draft.gateway_ref,
            notes: draft.notes,
            created_at: now,
            updated_at: now,
        };

        let reserved = self.store.insert_at_slot(&booking).await?;
        info!(
            "Reserved slot {} {} {} for booking {} (generation {})",
            slot.doctor_id, slot.date, slot.time, reserved.id, reserved.slot_generation
        );
        Ok(reserved)
    }
}
