// libs/appointment-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==============================================================================
// CORE BOOKING MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    /// Owner of the booking and the account that pays for it.
    pub patient_id: Uuid,
    /// Set when the patient books on behalf of a family member.
    pub dependent_id: Option<Uuid>,
    pub doctor_id: Uuid,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    /// Number of bookings recorded at this slot before this one.
    pub slot_generation: i32,
    pub status: LifecycleStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub price: Decimal,
    pub gateway_ref: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn slot(&self) -> Slot {
        Slot {
            doctor_id: self.doctor_id,
            date: self.appointment_date,
            time: self.appointment_time,
        }
    }

    pub fn holds_slot(&self) -> bool {
        self.status.holds_slot()
    }
}

/// One bookable (provider, date, time) opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Requested,
    Confirmed,
    Completed,
    Cancelled,
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStatus::Requested => "requested",
            LifecycleStatus::Confirmed => "confirmed",
            LifecycleStatus::Completed => "completed",
            LifecycleStatus::Cancelled => "cancelled",
        }
    }

    /// Requested and Confirmed bookings occupy their slot.
    pub fn holds_slot(&self) -> bool {
        match self {
            LifecycleStatus::Requested | LifecycleStatus::Confirmed => true,
            LifecycleStatus::Completed | LifecycleStatus::Cancelled => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !self.holds_slot()
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unsettled,
    AwaitingGateway,
    Paid,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unsettled => "unsettled",
            PaymentStatus::AwaitingGateway => "awaiting_gateway",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    #[serde(alias = "wallet")]
    WalletBalance,
    #[serde(alias = "vnpay", alias = "gateway")]
    ExternalGateway,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::WalletBalance => "wallet_balance",
            PaymentMethod::ExternalGateway => "external_gateway",
        }
    }
}

/// What a reservation needs besides the slot itself.
#[derive(Debug, Clone)]
pub struct BookingDraft {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub dependent_id: Option<Uuid>,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub price: Decimal,
    pub gateway_ref: Option<String>,
    pub notes: Option<String>,
}

/// Fields a guarded transition may change. `None` leaves a field as is.
#[derive(Debug, Clone)]
pub struct BookingUpdate {
    pub status: Option<LifecycleStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub updated_at: DateTime<Utc>,
}

/// Preconditions for a compare-and-set on a booking row. An empty list
/// accepts any value.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionGuard {
    pub lifecycle: &'static [LifecycleStatus],
    pub payment: &'static [PaymentStatus],
}

impl TransitionGuard {
    pub fn lifecycle(statuses: &'static [LifecycleStatus]) -> Self {
        Self { lifecycle: statuses, payment: &[] }
    }

    pub fn payment(statuses: &'static [PaymentStatus]) -> Self {
        Self { lifecycle: &[], payment: statuses }
    }

    pub fn with_payment(mut self, statuses: &'static [PaymentStatus]) -> Self {
        self.payment = statuses;
        self
    }

    pub fn admits(&self, booking: &Booking) -> bool {
        (self.lifecycle.is_empty() || self.lifecycle.contains(&booking.status))
            && (self.payment.is_empty() || self.payment.contains(&booking.payment_status))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub id: Uuid,
    pub is_active: bool,
    pub consultation_fee: Decimal,
}

// ==============================================================================
// REQUEST / RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBookingRequest {
    pub doctor_id: Uuid,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub payment_method: PaymentMethod,
    /// Defaults to the caller; only admins may book for someone else.
    pub patient_id: Option<Uuid>,
    pub dependent_id: Option<Uuid>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingOutcome {
    pub booking: Booking,
    /// Present on the gateway path; the caller sends the user there to pay.
    pub payment_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelBookingRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SlotCheckQuery {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

#[derive(Debug, Deserialize)]
pub struct AvailableSlotsQuery {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct BookingListQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BookingError {
    #[error("Appointment slot is already taken")]
    SlotTaken,

    #[error("Doctor {0} is not accepting appointments")]
    ProviderInactive(Uuid),

    #[error("Doctor {0} not found")]
    ProviderNotFound(Uuid),

    #[error("Cannot book an appointment in the past ({0})")]
    PastDate(NaiveDate),

    #[error("Insufficient wallet balance. Required: {required}, available: {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("Not authorized to act on this appointment")]
    OwnershipMismatch,

    #[error("Cannot {action} an appointment that is {from}")]
    InvalidStateTransition { from: LifecycleStatus, action: &'static str },

    #[error("Cannot cancel a completed appointment")]
    CannotCancelCompleted,

    #[error("Appointment is already cancelled")]
    AlreadyCancelled,

    #[error("Appointment {0} not found")]
    NotFound(Uuid),

    #[error("Refund failed, appointment was not cancelled: {0}")]
    RefundFailed(String),

    #[error("Wallet payment failed: {0}")]
    PaymentFailed(String),

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Database error: {0}")]
    Storage(String),
}
