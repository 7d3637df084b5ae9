// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::BookingCoordinator;

#[derive(Clone)]
pub struct AppointmentState {
    pub config: Arc<AppConfig>,
    pub coordinator: Arc<BookingCoordinator>,
}

pub fn appointment_routes(state: AppointmentState) -> Router {
    // All appointment operations require authentication
    let protected_routes = Router::new()
        .route("/", post(handlers::create_booking))
        .route("/", get(handlers::list_bookings))
        .route("/slots", get(handlers::available_slots))
        .route("/slots/check", get(handlers::check_slot))
        .route("/{appointment_id}", get(handlers::get_booking))
        .route("/{appointment_id}/confirm", post(handlers::confirm_booking))
        .route("/{appointment_id}/cancel", post(handlers::cancel_booking))
        .route("/{appointment_id}/complete", post(handlers::complete_booking))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
