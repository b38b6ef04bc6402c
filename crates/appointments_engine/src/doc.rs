// File: crates/appointments_engine/src/doc.rs

#![allow(dead_code)]
#![cfg(feature = "openapi")]
use utoipa::OpenApi;

use crate::handlers::{
    BookingForm, CancellationResponse, ConfirmationResponse, PendingConfirmationResponse,
    SettingsForm, SlotView, SlotsResponse,
};
use crate::reminders::{DispatchStatus, ReminderDispatch};

#[utoipa::path(
    post,
    path = "/state",
    request_body(content = SettingsForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Stored value for get_* actions, {\"status\":\"ok\"} for set_*"),
        (status = 400, description = "Unknown action or invalid data"),
        (status = 404, description = "Unknown booking page")
    ),
    tag = "Settings"
)]
fn doc_settings_action_handler() {}

#[utoipa::path(
    get,
    path = "/booking/{page_id}/slots",
    params(
        ("page_id" = String, Path, description = "Booking page"),
        ("start_date" = String, Query, description = "First local day", example = "2025-05-05", format = "date"),
        ("end_date" = String, Query, description = "Last local day, inclusive", example = "2025-05-11", format = "date"),
        ("format" = Option<String>, Query, description = "\"text\" for the RS/US delimited listing")
    ),
    responses(
        (status = 200, description = "Available slots", body = SlotsResponse),
        (status = 404, description = "Unknown booking page"),
        (status = 503, description = "Calendar temporarily unavailable")
    ),
    tag = "Booking"
)]
fn doc_get_slots_handler() {}

#[utoipa::path(
    post,
    path = "/booking/{page_id}/form",
    params(("page_id" = String, Path, description = "Booking page")),
    request_body(content = BookingForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Redirect to the confirmation link"),
        (status = 200, description = "Confirmation link sent by email", body = PendingConfirmationResponse),
        (status = 400, description = "Invalid form data"),
        (status = 409, description = "Slot no longer available")
    ),
    tag = "Booking"
)]
fn doc_booking_form_handler() {}

#[utoipa::path(
    get,
    path = "/booking/{page_id}/confirm/{token}",
    params(
        ("page_id" = String, Path, description = "Booking page"),
        ("token" = String, Path, description = "Confirmation token"),
        ("d" = String, Query, description = "Link signature")
    ),
    responses(
        (status = 200, description = "Appointment confirmed", body = ConfirmationResponse),
        (status = 409, description = "Slot taken meanwhile, please pick another slot"),
        (status = 410, description = "This link is no longer valid"),
        (status = 503, description = "Calendar temporarily unavailable, link can be retried")
    ),
    tag = "Booking"
)]
fn doc_confirm_handler() {}

#[utoipa::path(
    post,
    path = "/booking/{page_id}/cancel/{token}",
    params(
        ("page_id" = String, Path, description = "Booking page"),
        ("token" = String, Path, description = "Booking token")
    ),
    responses(
        (status = 200, description = "Booking cancelled", body = CancellationResponse),
        (status = 410, description = "This link is no longer valid")
    ),
    tag = "Booking"
)]
fn doc_cancel_booking_handler() {}

#[utoipa::path(
    delete,
    path = "/admin/appointments/{appointment_id}",
    params(("appointment_id" = String, Path, description = "Calendar appointment id")),
    responses(
        (status = 200, description = "Appointment cancelled", body = CancellationResponse),
        (status = 404, description = "Unknown appointment"),
        (status = 410, description = "Already cancelled")
    ),
    tag = "Admin"
)]
fn doc_delete_appointment_handler() {}

#[utoipa::path(
    get,
    path = "/admin/appointments/{appointment_id}/reminders",
    params(("appointment_id" = String, Path, description = "Calendar appointment id")),
    responses(
        (status = 200, description = "Reminder dispatches", body = Vec<ReminderDispatch>),
        (status = 404, description = "Unknown appointment")
    ),
    tag = "Admin"
)]
fn doc_get_reminders_handler() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        doc_settings_action_handler,
        doc_get_slots_handler,
        doc_booking_form_handler,
        doc_confirm_handler,
        doc_cancel_booking_handler,
        doc_delete_appointment_handler,
        doc_get_reminders_handler,
    ),
    components(schemas(
        SettingsForm,
        SlotsResponse,
        SlotView,
        BookingForm,
        PendingConfirmationResponse,
        ConfirmationResponse,
        CancellationResponse,
        ReminderDispatch,
        DispatchStatus,
    )),
    tags(
        (name = "Booking", description = "Visitor booking flow"),
        (name = "Settings", description = "Organizer settings"),
        (name = "Admin", description = "Appointment administration")
    )
)]
pub struct BookingApiDoc;
