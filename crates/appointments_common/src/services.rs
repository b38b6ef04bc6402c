// --- File: crates/appointments_common/src/services.rs ---
//! Service abstractions for external collaborators.
//!
//! The booking engine never talks to a calendar store or a mail system directly.
//! It consumes the traits defined here, so the engine can be wired to Google
//! Calendar, an in-memory calendar, a webhook, or a test double.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Type alias for a boxed future that returns a Result
pub type BoxFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// A committed interval on the destination calendar, half-open `[start, end)`.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BusyRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Check for overlap with `[start, end)`: (StartA < EndB) and (EndA > StartB)
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start < self.end && end > self.start
    }
}

/// Errors reported by a calendar backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    /// The requested range is already taken on the calendar.
    #[error("Booking conflict")]
    Conflict,
    #[error("Appointment not found: {0}")]
    NotFound(String),
    /// Timeouts, rate limits, unreachable backend. Worth retrying.
    #[error("Calendar temporarily unavailable: {0}")]
    Transient(String),
    #[error("Calendar request rejected: {0}")]
    Permanent(String),
}

/// What the engine asks the calendar to store for a confirmed booking.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentRequest {
    pub title: String,
    pub datetime_start: DateTime<Utc>,
    pub duration_minutes: u32,
    pub attendee_name: String,
    pub attendee_email: String,
    pub attendee_phone: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl AppointmentRequest {
    pub fn end(&self) -> DateTime<Utc> {
        self.datetime_start + Duration::minutes(i64::from(self.duration_minutes))
    }
}

/// A calendar-committed appointment.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub calendar_id: String,
    pub title: String,
    pub datetime_start: DateTime<Utc>,
    pub duration_minutes: u32,
    pub attendee_name: String,
    pub attendee_email: String,
    pub attendee_phone: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Appointment {
    pub fn from_request(id: String, calendar_id: &str, request: AppointmentRequest) -> Self {
        Self {
            id,
            calendar_id: calendar_id.to_string(),
            title: request.title,
            datetime_start: request.datetime_start,
            duration_minutes: request.duration_minutes,
            attendee_name: request.attendee_name,
            attendee_email: request.attendee_email,
            attendee_phone: request.attendee_phone,
            metadata: request.metadata,
        }
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.datetime_start + Duration::minutes(i64::from(self.duration_minutes))
    }

    pub fn contact(&self) -> AttendeeContact {
        AttendeeContact {
            name: self.attendee_name.clone(),
            email: self.attendee_email.clone(),
            phone: self.attendee_phone.clone(),
        }
    }
}

/// A trait for calendar backend operations.
///
/// Implementations must treat `write_appointment` as the authoritative commit:
/// if the range overlaps an existing entry they return [`CalendarError::Conflict`]
/// instead of writing.
pub trait CalendarBackend: Send + Sync {
    /// Busy intervals on `calendar_id` intersecting `[start_time, end_time)`, sorted by start.
    fn query_busy_ranges(
        &self,
        calendar_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> BoxFuture<'_, Vec<BusyRange>, CalendarError>;

    /// Store an appointment and return its id.
    fn write_appointment(
        &self,
        calendar_id: &str,
        request: &AppointmentRequest,
    ) -> BoxFuture<'_, String, CalendarError>;

    /// Remove an appointment. Removing an unknown id is not an error.
    fn delete_appointment(
        &self,
        calendar_id: &str,
        appointment_id: &str,
    ) -> BoxFuture<'_, (), CalendarError>;
}

/// Who a notification goes to.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendeeContact {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

/// Which message template the sender should render.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    /// Link the visitor must open to confirm a reservation.
    ConfirmationLink,
    Confirmation,
    Cancellation,
    Reminder,
}

/// Errors reported by a notification sender.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    #[error("Notification delivery failed temporarily: {0}")]
    Transient(String),
    /// e.g. a malformed attendee address. Never retried.
    #[error("Notification rejected: {0}")]
    Permanent(String),
}

/// A trait for notification delivery (mail, SMS, webhook).
pub trait NotificationSender: Send + Sync {
    fn send(
        &self,
        contact: &AttendeeContact,
        kind: TemplateKind,
        payload: serde_json::Value,
    ) -> BoxFuture<'_, (), NotificationError>;
}
