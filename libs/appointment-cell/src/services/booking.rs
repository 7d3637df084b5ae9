// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use payment_gateway_cell::{CorrelationRef, VnPayGateway};
use shared_config::AppConfig;
use shared_models::auth::{Actor, Role};
use shared_utils::clock::{Clock, SystemClock};
use shared_utils::notification::{dispatch, LogNotifier, NotificationEvent, Notifier};
use wallet_cell::{Ledger, LedgerError};

use crate::models::{
    Booking, BookingDraft, BookingError, BookingOutcome, BookingUpdate, CreateBookingRequest,
    LifecycleStatus, PaymentMethod, PaymentStatus, Slot, TransitionGuard,
};
use crate::services::lifecycle::BookingLifecycle;
use crate::services::providers::ProviderDirectory;
use crate::services::slot::SlotAllocator;
use crate::services::store::BookingStore;

const LIVE: &[LifecycleStatus] = &[LifecycleStatus::Requested, LifecycleStatus::Confirmed];
const UNPAID: &[PaymentStatus] = &[PaymentStatus::AwaitingGateway, PaymentStatus::Unsettled];

/// Orchestrates slot reservation, the three payment paths and the
/// booking lifecycle. Every call takes the acting identity explicitly.
pub struct BookingCoordinator {
    allocator: SlotAllocator,
    store: Arc<dyn BookingStore>,
    providers: Arc<dyn ProviderDirectory>,
    ledger: Arc<Ledger>,
    gateway: Arc<VnPayGateway>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    appointment_return_url: String,
}

impl BookingCoordinator {
    pub fn new(
        store: Arc<dyn BookingStore>,
        providers: Arc<dyn ProviderDirectory>,
        ledger: Arc<Ledger>,
        gateway: Arc<VnPayGateway>,
        config: &AppConfig,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            allocator: SlotAllocator::new(store.clone(), providers.clone(), clock.clone()),
            store,
            providers,
            ledger,
            gateway,
            notifier: Arc::new(LogNotifier),
            clock,
            appointment_return_url: config.vnpay_appointment_return_url.clone(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.allocator = SlotAllocator::new(self.store.clone(), self.providers.clone(), clock.clone());
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    // ==============================================================================
    // BOOKING CREATION
    // ==============================================================================

    pub async fn create_booking(
        &self,
        actor: &Actor,
        request: CreateBookingRequest,
    ) -> Result<BookingOutcome, BookingError> {
        let patient_id = request.patient_id.unwrap_or(actor.id);
        if patient_id != actor.id && !actor.is_privileged() {
            warn!("{} tried to book on behalf of {}", actor.id, patient_id);
            return Err(BookingError::OwnershipMismatch);
        }

        let slot = Slot {
            doctor_id: request.doctor_id,
            date: request.appointment_date,
            time: request.appointment_time,
        };
        let today = self.clock.today();
        if slot.date < today {
            warn!("Rejected booking for past date {} (today is {})", slot.date, today);
            return Err(BookingError::PastDate(slot.date));
        }

        let price = self.providers.price(slot.doctor_id).await?;
        let is_free = price.is_zero();
        let via_gateway = request.payment_method == PaymentMethod::ExternalGateway && !is_free;

        if via_gateway && !self.gateway.is_configured() {
            return Err(BookingError::Gateway("Payment gateway is not configured".to_string()));
        }

        let id = Uuid::new_v4();
        let payment_status = if is_free {
            PaymentStatus::Paid
        } else if via_gateway {
            PaymentStatus::AwaitingGateway
        } else {
            PaymentStatus::Unsettled
        };
        let gateway_ref = via_gateway.then(|| CorrelationRef::booking(id, self.clock.now()));

        let draft = BookingDraft {
            id,
            patient_id,
            dependent_id: request.dependent_id,
            payment_method: request.payment_method,
            payment_status,
            price,
            gateway_ref: gateway_ref.as_ref().map(CorrelationRef::encode),
            notes: request.notes,
        };

        let booking = self.allocator.reserve(slot, draft).await?;
        info!(
            "Booking {} created for patient {} with doctor {} ({}, price {})",
            booking.id, patient_id, slot.doctor_id, booking.payment_method.as_str(), price
        );

        let outcome = match (request.payment_method, gateway_ref) {
            _ if is_free => BookingOutcome { booking, payment_url: None },
            (PaymentMethod::WalletBalance, _) => {
                let paid = self.pay_from_wallet(booking).await?;
                self.notify(&paid, NotificationEvent::BookingPaid);
                BookingOutcome { booking: paid, payment_url: None }
            }
            (PaymentMethod::ExternalGateway, Some(correlation)) => {
                let payment_url = self.gateway_redirect(&booking, &correlation).await?;
                BookingOutcome { booking, payment_url: Some(payment_url) }
            }
            _ => BookingOutcome { booking, payment_url: None },
        };

        self.notify(&outcome.booking, NotificationEvent::BookingCreated);
        Ok(outcome)
    }

    /// Debits the wallet for a freshly reserved booking. Any failure
    /// releases the slot before the error is returned.
    async fn pay_from_wallet(&self, booking: Booking) -> Result<Booking, BookingError> {
        let description = format!(
            "Appointment on {} at {}",
            booking.appointment_date,
            booking.appointment_time.format("%H:%M")
        );

        if let Err(e) = self
            .ledger
            .pay_immediate(booking.patient_id, booking.id, booking.price, &description)
            .await
        {
            warn!("Wallet payment for booking {} failed: {}", booking.id, e);
            self.release(&booking, None).await?;
            return Err(match e {
                LedgerError::InsufficientFunds { required, available } => {
                    BookingError::InsufficientFunds { required, available }
                }
                other => BookingError::PaymentFailed(other.to_string()),
            });
        }

        // The doctor may already have confirmed it
        let guard = TransitionGuard::lifecycle(LIVE).with_payment(&[PaymentStatus::Unsettled]);
        let update = BookingUpdate {
            status: None,
            payment_status: Some(PaymentStatus::Paid),
            updated_at: self.clock.now(),
        };
        match self.store.transition(booking.id, guard, &update).await {
            Ok(Some(paid)) => Ok(paid),
            outcome => {
                error!(
                    "Booking {} was debited but could not be marked paid ({:?}), refunding",
                    booking.id,
                    outcome.err()
                );
                self.ledger
                    .refund(booking.patient_id, booking.id, booking.price, "Refund for failed booking")
                    .await
                    .map_err(|e| BookingError::RefundFailed(e.to_string()))?;
                self.release(&booking, None).await?;
                Err(BookingError::PaymentFailed("Booking could not be marked paid".to_string()))
            }
        }
    }

    async fn gateway_redirect(&self, booking: &Booking, correlation: &CorrelationRef) -> Result<String, BookingError> {
        let description = format!("Thanh toan lich hen {}", booking.id);
        match self
            .gateway
            .build_redirect_url(booking.price, &description, correlation, &self.appointment_return_url)
        {
            Ok(url) => Ok(url),
            Err(e) => {
                warn!("Could not build gateway redirect for booking {}: {}", booking.id, e);
                self.release(booking, Some(PaymentStatus::Unsettled)).await?;
                Err(BookingError::Gateway(e.to_string()))
            }
        }
    }

    /// Cancels a booking that never got past creation so the slot frees up.
    /// A booking that has already left the slot counts as released.
    async fn release(&self, booking: &Booking, payment_status: Option<PaymentStatus>) -> Result<(), BookingError> {
        let update = BookingUpdate {
            status: Some(LifecycleStatus::Cancelled),
            payment_status,
            updated_at: self.clock.now(),
        };
        match self.store.transition(booking.id, TransitionGuard::lifecycle(LIVE), &update).await {
            Ok(Some(_)) => {
                info!("Released slot held by booking {}", booking.id);
                Ok(())
            }
            Ok(None) => match self.store.get(booking.id).await? {
                Some(current) if current.holds_slot() => {
                    error!("Could not release booking {}: still {}", booking.id, current.status.as_str());
                    Err(BookingError::Storage(format!("Failed to release booking {}", booking.id)))
                }
                _ => {
                    debug!("Booking {} no longer holds its slot", booking.id);
                    Ok(())
                }
            },
            Err(e) => {
                error!("Could not release booking {}: {}", booking.id, e);
                Err(e)
            }
        }
    }

    // ==============================================================================
    // LIFECYCLE TRANSITIONS
    // ==============================================================================

    /// Requested -> Confirmed, by the booked doctor.
    pub async fn confirm(&self, actor: &Actor, booking_id: Uuid) -> Result<Booking, BookingError> {
        let booking = self.require(booking_id).await?;
        if !is_provider_of(actor, &booking) && !actor.is_privileged() {
            return Err(BookingError::OwnershipMismatch);
        }
        BookingLifecycle::check_confirm(booking.status)?;

        let update = BookingUpdate {
            status: Some(LifecycleStatus::Confirmed),
            payment_status: None,
            updated_at: self.clock.now(),
        };
        match self
            .store
            .transition(booking_id, TransitionGuard::lifecycle(&[LifecycleStatus::Requested]), &update)
            .await?
        {
            Some(confirmed) => {
                info!("Booking {} confirmed by {}", booking_id, actor.id);
                self.notify(&confirmed, NotificationEvent::BookingConfirmed);
                Ok(confirmed)
            }
            None => Err(self.lost_race(booking_id, "confirm").await),
        }
    }

    /// Cancels a live booking. Wallet-paid bookings are refunded first and
    /// stay uncancelled if the refund fails.
    pub async fn cancel(&self, actor: &Actor, booking_id: Uuid, reason: Option<&str>) -> Result<Booking, BookingError> {
        let booking = self.require(booking_id).await?;
        if booking.patient_id != actor.id && !actor.is_privileged() {
            return Err(BookingError::OwnershipMismatch);
        }
        BookingLifecycle::check_cancel(booking.status)?;

        let refundable = booking.payment_method == PaymentMethod::WalletBalance
            && booking.payment_status == PaymentStatus::Paid
            && booking.price > Decimal::ZERO;

        let (guard, update) = if refundable {
            self.ledger
                .refund(
                    booking.patient_id,
                    booking.id,
                    booking.price,
                    &format!("Refund for cancelled appointment {}", booking.id),
                )
                .await
                .map_err(|e| {
                    error!("Refund for booking {} failed, not cancelling: {}", booking_id, e);
                    BookingError::RefundFailed(e.to_string())
                })?;
            (
                TransitionGuard::lifecycle(LIVE).with_payment(&[PaymentStatus::Paid]),
                BookingUpdate {
                    status: Some(LifecycleStatus::Cancelled),
                    payment_status: Some(PaymentStatus::Refunded),
                    updated_at: self.clock.now(),
                },
            )
        } else {
            (
                TransitionGuard::lifecycle(LIVE),
                BookingUpdate {
                    status: Some(LifecycleStatus::Cancelled),
                    payment_status: None,
                    updated_at: self.clock.now(),
                },
            )
        };

        match self.store.transition(booking_id, guard, &update).await? {
            Some(cancelled) => {
                info!(
                    "Booking {} cancelled by {} (reason: {})",
                    booking_id,
                    actor.id,
                    reason.unwrap_or("none given")
                );
                self.notify(&cancelled, NotificationEvent::BookingCancelled);
                Ok(cancelled)
            }
            None => {
                if refundable {
                    error!("Booking {} was refunded but changed before it could be cancelled", booking_id);
                }
                Err(self.lost_race(booking_id, "cancel").await)
            }
        }
    }

    /// Confirmed -> Completed, recorded when treatment is entered.
    pub async fn complete_via_treatment(&self, actor: &Actor, booking_id: Uuid) -> Result<Booking, BookingError> {
        let booking = self.require(booking_id).await?;
        if !is_provider_of(actor, &booking) && !actor.is_privileged() {
            return Err(BookingError::OwnershipMismatch);
        }
        BookingLifecycle::check_complete(booking.status)?;

        let update = BookingUpdate {
            status: Some(LifecycleStatus::Completed),
            payment_status: None,
            updated_at: self.clock.now(),
        };
        match self
            .store
            .transition(booking_id, TransitionGuard::lifecycle(&[LifecycleStatus::Confirmed]), &update)
            .await?
        {
            Some(completed) => {
                info!("Booking {} completed", booking_id);
                Ok(completed)
            }
            None => Err(self.lost_race(booking_id, "complete").await),
        }
    }

    // ==============================================================================
    // GATEWAY OUTCOMES
    // ==============================================================================

    /// Applies a verified gateway result to the booking it pays for.
    /// Success marks it Paid; failure cancels it and frees the slot.
    pub async fn on_gateway_outcome(
        &self,
        correlation: &CorrelationRef,
        success: bool,
        external_txn_id: Option<&str>,
    ) -> Result<Booking, BookingError> {
        let CorrelationRef::Booking { booking_id, .. } = correlation else {
            return Err(BookingError::Gateway(format!("{} is not a booking payment reference", correlation)));
        };
        let booking = self.require(*booking_id).await?;

        let encoded = correlation.encode();
        if booking.gateway_ref.as_deref() != Some(encoded.as_str()) {
            warn!("Gateway reference {} does not match booking {}", encoded, booking.id);
            return Err(BookingError::Gateway(format!("Unknown payment reference {}", encoded)));
        }

        if success {
            self.record_gateway_payment(booking, external_txn_id).await
        } else {
            self.record_gateway_failure(booking).await
        }
    }

    async fn record_gateway_payment(&self, booking: Booking, external_txn_id: Option<&str>) -> Result<Booking, BookingError> {
        if booking.payment_status == PaymentStatus::Paid {
            info!("Booking {} already paid, ignoring repeated callback", booking.id);
            return Ok(booking);
        }
        if booking.status == LifecycleStatus::Cancelled {
            warn!("Gateway payment arrived for cancelled booking {}, recording it as paid", booking.id);
        }

        let update = BookingUpdate {
            status: None,
            payment_status: Some(PaymentStatus::Paid),
            updated_at: self.clock.now(),
        };
        match self.store.transition(booking.id, TransitionGuard::payment(UNPAID), &update).await? {
            Some(paid) => {
                info!(
                    "Booking {} paid via gateway (transaction {})",
                    paid.id,
                    external_txn_id.unwrap_or("unknown")
                );
                self.notify(&paid, NotificationEvent::BookingPaid);
                Ok(paid)
            }
            None => {
                debug!("Booking {} payment status changed concurrently", booking.id);
                self.require(booking.id).await
            }
        }
    }

    async fn record_gateway_failure(&self, booking: Booking) -> Result<Booking, BookingError> {
        if booking.payment_status == PaymentStatus::Paid {
            warn!("Ignoring gateway failure for paid booking {}", booking.id);
            return Ok(booking);
        }

        let update = BookingUpdate {
            status: Some(LifecycleStatus::Cancelled),
            payment_status: Some(PaymentStatus::Unsettled),
            updated_at: self.clock.now(),
        };
        match self
            .store
            .transition(booking.id, TransitionGuard::lifecycle(LIVE).with_payment(UNPAID), &update)
            .await?
        {
            Some(cancelled) => {
                info!("Booking {} cancelled after failed gateway payment", cancelled.id);
                self.notify(&cancelled, NotificationEvent::GatewayPaymentFailed);
                Ok(cancelled)
            }
            None => {
                debug!("Booking {} already settled or closed", booking.id);
                self.require(booking.id).await
            }
        }
    }

    // ==============================================================================
    // READS
    // ==============================================================================

    pub async fn get_booking(&self, actor: &Actor, booking_id: Uuid) -> Result<Booking, BookingError> {
        let booking = self.require(booking_id).await?;
        if booking.patient_id == actor.id || is_provider_of(actor, &booking) || actor.is_privileged() {
            Ok(booking)
        } else {
            Err(BookingError::OwnershipMismatch)
        }
    }

    pub async fn list_bookings(&self, actor: &Actor, limit: usize, offset: usize) -> Result<Vec<Booking>, BookingError> {
        match actor.role {
            Role::Doctor => self.store.list_for_doctor(actor.id, limit, offset).await,
            _ => self.store.list_for_patient(actor.id, limit, offset).await,
        }
    }

    pub async fn check_slot(&self, slot: &Slot) -> Result<bool, BookingError> {
        self.allocator.is_slot_free(slot).await
    }

    pub async fn available_slots(&self, doctor_id: Uuid, date: NaiveDate) -> Result<Vec<NaiveTime>, BookingError> {
        self.allocator.available_slots(doctor_id, date).await
    }

    async fn require(&self, booking_id: Uuid) -> Result<Booking, BookingError> {
        self.store
            .get(booking_id)
            .await?
            .ok_or(BookingError::NotFound(booking_id))
    }

    /// Explains why a guarded transition matched nothing.
    async fn lost_race(&self, booking_id: Uuid, action: &'static str) -> BookingError {
        let current = match self.require(booking_id).await {
            Ok(current) => current,
            Err(e) => return e,
        };
        if action == "cancel" {
            if let Err(e) = BookingLifecycle::check_cancel(current.status) {
                return e;
            }
        }
        BookingError::InvalidStateTransition { from: current.status, action }
    }

    fn notify(&self, booking: &Booking, event: NotificationEvent) {
        dispatch(
            self.notifier.clone(),
            booking.patient_id,
            event,
            json!({
                "booking_id": booking.id,
                "doctor_id": booking.doctor_id,
                "appointment_date": booking.appointment_date,
                "appointment_time": booking.appointment_time,
                "status": booking.status,
                "payment_status": booking.payment_status,
            }),
        );
    }
}

fn is_provider_of(actor: &Actor, booking: &Booking) -> bool {
    actor.role == Role::Doctor && actor.id == booking.doctor_id
}
