// --- File: crates/appointments_engine/src/routes.rs ---

use crate::handlers::{
    booking_form_handler, cancel_booking_handler, confirm_handler, delete_appointment_handler,
    get_reminders_handler, get_slots_handler, health_handler, settings_action_handler,
    BookingState,
};
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

/// Prefix the backend nests these routes under; confirmation links include it.
pub const API_PREFIX: &str = "/api";

/// Creates a router containing all booking routes, relative to [`API_PREFIX`].
pub fn routes(state: Arc<BookingState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/state", post(settings_action_handler))
        .route("/booking/{page_id}/slots", get(get_slots_handler))
        .route("/booking/{page_id}/form", post(booking_form_handler))
        .route("/booking/{page_id}/confirm/{token}", get(confirm_handler))
        .route("/booking/{page_id}/cancel/{token}", post(cancel_booking_handler))
        .route(
            "/admin/appointments/{appointment_id}",
            delete(delete_appointment_handler),
        )
        .route(
            "/admin/appointments/{appointment_id}/reminders",
            get(get_reminders_handler),
        )
        .with_state(state)
}
