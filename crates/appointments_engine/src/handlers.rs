// File: crates/appointments_engine/src/handlers.rs
use appointments_common::{log_error, not_found, validation_error, AppointmentsError};
use appointments_config::AppConfig;
use axum::{
    extract::{Form, Path, Query, State},
    http::header,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::booking::{BookingEngine, VisitorFields};
use crate::encoding::encode_slot_listing;
use crate::error::BookingError;
use crate::reminders::ReminderDispatch;
use crate::routes::API_PREFIX;
use crate::settings::{apply_settings_action, SettingsAction};

// Shared state needed by the booking handlers
#[derive(Clone)]
pub struct BookingState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<BookingEngine>,
}

// --- Request / Response types ---

/// Settings endpoint form: action, page, data.
#[derive(Deserialize, Debug)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SettingsForm {
    pub a: String,
    #[serde(default)]
    pub p: Option<String>,
    #[serde(default)]
    pub d: Option<String>,
}

#[derive(Deserialize, Debug)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams, utoipa::ToSchema))]
#[cfg_attr(feature = "openapi", into_params(parameter_in = Query))]
pub struct SlotsQuery {
    /// First local day, YYYY-MM-DD
    pub start_date: String,
    /// Last local day (inclusive), YYYY-MM-DD
    pub end_date: String,
    /// "text" for the delimited listing, anything else for JSON
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Serialize, Debug)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SlotView {
    /// Local start with offset, RFC 3339
    pub start: String,
    pub duration_minutes: u32,
    pub max_duration_minutes: u32,
    pub title: String,
}

#[derive(Serialize, Debug)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SlotsResponse {
    pub time_zone: String,
    pub slots: Vec<SlotView>,
}

/// Step one of the booking form.
#[derive(Deserialize, Debug)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct BookingForm {
    /// Slot start: RFC 3339, or a local date-time such as "2025-05-05 09:00"
    pub adatetime: String,
    /// Requested length in minutes; 0 or missing picks the shortest
    #[serde(default)]
    pub appt_dur: Option<u32>,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    /// Visitor time zone
    #[serde(default)]
    pub tzi: Option<String>,
}

#[derive(Serialize, Debug)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PendingConfirmationResponse {
    pub status: String,
    pub message: String,
    pub expires_at: String,
}

#[derive(Deserialize, Debug)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
#[cfg_attr(feature = "openapi", into_params(parameter_in = Query))]
pub struct ConfirmQuery {
    /// Link signature issued with the token
    pub d: String,
}

#[derive(Serialize, Debug)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ConfirmationResponse {
    pub success: bool,
    pub appointment_id: String,
    pub title: String,
    pub start: String,
    pub duration_minutes: u32,
    pub message: String,
}

#[derive(Serialize, Debug)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CancellationResponse {
    pub success: bool,
    pub appointment_id: Option<String>,
    pub message: String,
}

// --- Helpers ---

fn parse_date(raw: &str, field: &str) -> Result<NaiveDate, BookingError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| BookingError::Validation(format!("invalid {} format (YYYY-MM-DD)", field)))
}

fn local_midnight(tz: Tz, date: NaiveDate) -> Result<DateTime<Utc>, BookingError> {
    tz.from_local_datetime(&date.and_time(NaiveTime::MIN))
        .earliest()
        // A DST jump at midnight: the day starts one hour later
        .or_else(|| {
            tz.from_local_datetime(&(date.and_time(NaiveTime::MIN) + Duration::hours(1)))
                .earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| BookingError::Validation(format!("no local midnight on {}", date)))
}

const LOCAL_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Reads the slot start from the form. Without an explicit offset the value
/// is local time in `tz`.
pub fn parse_slot_start(raw: &str, tz: Tz) -> Result<DateTime<Utc>, BookingError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = LOCAL_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| BookingError::Validation(format!("invalid appointment time '{}'", raw)))?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| BookingError::Validation(format!("'{}' does not exist in {}", raw, tz)))
}

/// Reads the visitor's zone from the form. Clients may send it with a
/// leading `T` kind marker (`TAmerica/New_York`).
pub fn parse_visitor_zone(raw: &str) -> Option<Tz> {
    let raw = raw.trim();
    raw.parse::<Tz>()
        .ok()
        .or_else(|| raw.strip_prefix('T').and_then(|name| name.parse::<Tz>().ok()))
}

pub fn confirm_path(page_id: &str, token: &str, blob: &str) -> String {
    format!(
        "{}/booking/{}/confirm/{}?d={}",
        API_PREFIX, page_id, token, blob
    )
}

// --- Handlers ---

/// Organizer settings actions (`a` = get_uci, get_cls, set_t_data, ...).
#[axum::debug_handler]
pub async fn settings_action_handler(
    State(state): State<Arc<BookingState>>,
    Form(form): Form<SettingsForm>,
) -> Result<Json<Value>, AppointmentsError> {
    let action: SettingsAction = form.a.parse()?;
    let engine = &state.engine;
    let value = apply_settings_action(
        engine.settings(),
        engine.templates(),
        action,
        form.p.as_deref(),
        form.d.as_deref(),
    )?;
    Ok(Json(value))
}

/// Bookable slots of a page between two local dates.
#[axum::debug_handler]
pub async fn get_slots_handler(
    State(state): State<Arc<BookingState>>,
    Path(page_id): Path<String>,
    Query(query): Query<SlotsQuery>,
) -> Result<Response, AppointmentsError> {
    let start_date = parse_date(&query.start_date, "start_date")?;
    let end_date = parse_date(&query.end_date, "end_date")?;
    if end_date < start_date {
        return Err(validation_error("end_date must not be before start_date"));
    }

    let cls = state.engine.settings().calendar_link(&page_id)?;
    let tz = cls.tz()?;
    let window_start = local_midnight(tz, start_date)?;
    let window_end = local_midnight(tz, end_date + Duration::days(1))?;

    let slots = state
        .engine
        .available_slots(&page_id, window_start, window_end, Utc::now())
        .await?;
    info!(
        "{} slot(s) for page {} between {} and {}",
        slots.len(),
        page_id,
        start_date,
        end_date
    );

    if query.format.as_deref() == Some("text") {
        let body = encode_slot_listing(&slots, tz);
        return Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response());
    }

    let slots = slots
        .into_iter()
        .map(|slot| SlotView {
            start: slot.datetime_start.with_timezone(&tz).to_rfc3339(),
            duration_minutes: slot.duration_minutes,
            max_duration_minutes: slot.max_duration_minutes,
            title: slot.title,
        })
        .collect();
    Ok(Json(SlotsResponse {
        time_zone: tz.name().to_string(),
        slots,
    })
    .into_response())
}

/// Step one: reserve the slot and hand out the confirmation link.
#[axum::debug_handler]
pub async fn booking_form_handler(
    State(state): State<Arc<BookingState>>,
    Path(page_id): Path<String>,
    Form(form): Form<BookingForm>,
) -> Result<Response, AppointmentsError> {
    let engine = &state.engine;
    let cls = engine.settings().calendar_link(&page_id)?;
    let visitor_tz = form.tzi.as_deref().and_then(parse_visitor_zone);
    let slot_start = parse_slot_start(&form.adatetime, visitor_tz.unwrap_or(cls.tz()?))?;

    let visitor = VisitorFields {
        name: form.name,
        email: form.email,
        phone: form.phone,
        time_zone: visitor_tz.map(|tz| tz.name().to_string()),
    };
    let reservation = engine
        .reserve(&page_id, slot_start, form.appt_dur, visitor.clone(), Utc::now())
        .await?;
    let path = confirm_path(&page_id, &reservation.token, &reservation.link_blob);

    if engine.settings().email_validation(&page_id).skip_validation_step {
        return Ok(Redirect::to(&path).into_response());
    }

    let base = state
        .config
        .server
        .public_base_url
        .clone()
        .unwrap_or_default();
    let url = format!("{}{}", base.trim_end_matches('/'), path);
    if let Err(e) = engine.send_confirmation_link(&reservation, &visitor, &url).await {
        log_error(&e, &format!("Confirmation link for page {} not delivered", page_id));
        // Without the mail the visitor cannot confirm; free the slot again
        if let Err(cancel_err) = engine.cancel(&reservation.token, Utc::now()).await {
            warn!("Releasing undeliverable reservation failed: {}", cancel_err);
        }
        return Err(e.into());
    }

    Ok(Json(PendingConfirmationResponse {
        status: "pending".to_string(),
        message: "Please check your email to confirm the appointment.".to_string(),
        expires_at: reservation.expires_at.to_rfc3339(),
    })
    .into_response())
}

/// Step two: the visitor opens the confirmation link.
#[axum::debug_handler]
pub async fn confirm_handler(
    State(state): State<Arc<BookingState>>,
    Path((page_id, token)): Path<(String, String)>,
    Query(query): Query<ConfirmQuery>,
) -> Result<Json<ConfirmationResponse>, AppointmentsError> {
    let appointment = state
        .engine
        .confirm_link(&page_id, &token, &query.d, Utc::now())
        .await?;
    let tz = state.engine.settings().calendar_link(&page_id)?.tz()?;

    Ok(Json(ConfirmationResponse {
        success: true,
        start: appointment.datetime_start.with_timezone(&tz).to_rfc3339(),
        appointment_id: appointment.id,
        title: appointment.title,
        duration_minutes: appointment.duration_minutes,
        message: "Appointment confirmed.".to_string(),
    }))
}

/// Visitor-side cancellation with the booking token.
#[axum::debug_handler]
pub async fn cancel_booking_handler(
    State(state): State<Arc<BookingState>>,
    Path((page_id, token)): Path<(String, String)>,
) -> Result<Json<CancellationResponse>, AppointmentsError> {
    let belongs_to_page = state
        .engine
        .attempt(&token)
        .is_some_and(|attempt| attempt.page_id == page_id);
    if !belongs_to_page {
        return Err(BookingError::TokenNotFound.into());
    }
    let outcome = state.engine.cancel(&token, Utc::now()).await?;
    Ok(Json(CancellationResponse {
        success: true,
        appointment_id: outcome.appointment_id,
        message: "Booking cancelled.".to_string(),
    }))
}

/// Organizer-side cancellation by appointment id.
#[axum::debug_handler]
pub async fn delete_appointment_handler(
    State(state): State<Arc<BookingState>>,
    Path(appointment_id): Path<String>,
) -> Result<Json<CancellationResponse>, AppointmentsError> {
    if state.engine.appointment(&appointment_id).is_none() {
        return Err(not_found(format!("appointment {}", appointment_id)));
    }
    let outcome = state.engine.cancel(&appointment_id, Utc::now()).await?;
    let message = if outcome.calendar_cleared {
        "Appointment deleted successfully."
    } else {
        "Appointment cancelled; calendar entry will be removed shortly."
    };
    Ok(Json(CancellationResponse {
        success: true,
        appointment_id: outcome.appointment_id,
        message: message.to_string(),
    }))
}

/// Reminder bookkeeping for one appointment.
#[axum::debug_handler]
pub async fn get_reminders_handler(
    State(state): State<Arc<BookingState>>,
    Path(appointment_id): Path<String>,
) -> Result<Json<Vec<ReminderDispatch>>, AppointmentsError> {
    if state.engine.appointment(&appointment_id).is_none() {
        return Err(not_found(format!("appointment {}", appointment_id)));
    }
    Ok(Json(state.engine.reminders().dispatches(&appointment_id)))
}

pub async fn health_handler() -> &'static str {
    "ok"
}
