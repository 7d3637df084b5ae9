// libs/appointment-cell/src/handlers.rs
use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::actor_from;

use crate::models::{
    AvailableSlotsQuery, BookingError, BookingListQuery, CancelBookingRequest, CreateBookingRequest, Slot,
    SlotCheckQuery,
};
use crate::router::AppointmentState;

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 100;

pub fn map_booking_error(e: BookingError) -> AppError {
    match e {
        BookingError::SlotTaken
        | BookingError::InsufficientFunds { .. }
        | BookingError::InvalidStateTransition { .. }
        | BookingError::CannotCancelCompleted
        | BookingError::AlreadyCancelled => AppError::Conflict(e.to_string()),
        BookingError::ProviderInactive(_) | BookingError::PastDate(_) => AppError::ValidationError(e.to_string()),
        BookingError::ProviderNotFound(_) | BookingError::NotFound(_) => AppError::NotFound(e.to_string()),
        BookingError::OwnershipMismatch => AppError::Forbidden(e.to_string()),
        BookingError::RefundFailed(_) | BookingError::PaymentFailed(_) => AppError::Internal(e.to_string()),
        BookingError::Gateway(_) => AppError::ExternalService(e.to_string()),
        BookingError::Storage(msg) => AppError::Database(msg),
    }
}

#[axum::debug_handler]
pub async fn create_booking(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateBookingRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from(&user)?;

    let outcome = state
        .coordinator
        .create_booking(&actor, request)
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": outcome.booking,
        "payment_url": outcome.payment_url
    })))
}

#[axum::debug_handler]
pub async fn list_bookings(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Query(query): Query<BookingListQuery>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from(&user)?;
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let offset = query.offset.unwrap_or(0);

    let appointments = state
        .coordinator
        .list_bookings(&actor, limit, offset)
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "appointments": appointments,
        "limit": limit,
        "offset": offset
    })))
}

#[axum::debug_handler]
pub async fn check_slot(
    State(state): State<AppointmentState>,
    Query(query): Query<SlotCheckQuery>,
) -> Result<Json<Value>, AppError> {
    let slot = Slot {
        doctor_id: query.doctor_id,
        date: query.date,
        time: query.time,
    };
    let available = state.coordinator.check_slot(&slot).await.map_err(map_booking_error)?;
    debug!("Slot {} {} {} available: {}", slot.doctor_id, slot.date, slot.time, available);

    Ok(Json(json!({
        "success": true,
        "available": available
    })))
}

#[axum::debug_handler]
pub async fn available_slots(
    State(state): State<AppointmentState>,
    Query(query): Query<AvailableSlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let slots = state
        .coordinator
        .available_slots(query.doctor_id, query.date)
        .await
        .map_err(map_booking_error)?;

    let slots: Vec<String> = slots.iter().map(|t| t.format("%H:%M").to_string()).collect();
    Ok(Json(json!({
        "success": true,
        "doctor_id": query.doctor_id,
        "date": query.date,
        "available_slots": slots
    })))
}

#[axum::debug_handler]
pub async fn get_booking(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from(&user)?;

    let booking = state
        .coordinator
        .get_booking(&actor, booking_id)
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": booking
    })))
}

#[axum::debug_handler]
pub async fn confirm_booking(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from(&user)?;

    let booking = state
        .coordinator
        .confirm(&actor, booking_id)
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": booking
    })))
}

#[axum::debug_handler]
pub async fn cancel_booking(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(booking_id): Path<Uuid>,
    request: Option<Json<CancelBookingRequest>>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from(&user)?;
    let reason = request.and_then(|Json(body)| body.reason);

    let booking = state
        .coordinator
        .cancel(&actor, booking_id, reason.as_deref())
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": booking
    })))
}

#[axum::debug_handler]
pub async fn complete_booking(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from(&user)?;

    let booking = state
        .coordinator
        .complete_via_treatment(&actor, booking_id)
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": booking
    })))
}
