// --- File: crates/appointments_gcal/src/service.rs ---
//! Google Calendar implementation of [`CalendarBackend`].
//!
//! Busy time comes from the free/busy endpoint. A write re-checks free/busy for
//! its range and refuses to insert on overlap, so the event list stays free of
//! double bookings even when another client wrote meanwhile.

use appointments_common::{
    AppointmentRequest, BoxFuture, BusyRange, CalendarBackend, CalendarError,
};
use chrono::{DateTime, Utc};
use google_calendar3::api::{
    Event, EventDateTime, EventExtendedProperties, FreeBusyRequest, FreeBusyRequestItem,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::auth::HubType;

/// Maps an HTTP status from the Calendar API to a backend error.
pub fn classify_status(status: u16, detail: &str) -> CalendarError {
    match status {
        404 | 410 => CalendarError::NotFound(detail.to_string()),
        409 => CalendarError::Conflict,
        408 | 429 | 500..=599 => CalendarError::Transient(format!("HTTP {}: {}", status, detail)),
        // Google reports rate limiting as 403 with a rate-limit reason
        403 if detail.contains("rateLimitExceeded") || detail.contains("userRateLimitExceeded") => {
            CalendarError::Transient(format!("HTTP 403: {}", detail))
        }
        _ => CalendarError::Permanent(format!("HTTP {}: {}", status, detail)),
    }
}

/// Falls back to the rendered message when no structured status is available.
pub fn classify_message(message: &str) -> CalendarError {
    for status in [404u16, 410, 409, 429, 500, 502, 503, 504] {
        if message.contains(&status.to_string()) {
            return classify_status(status, message);
        }
    }
    CalendarError::Permanent(message.to_string())
}

pub fn classify_error(error: google_calendar3::Error) -> CalendarError {
    use google_calendar3::Error;
    match error {
        Error::HttpError(e) => CalendarError::Transient(e.to_string()),
        Error::Io(e) => CalendarError::Transient(e.to_string()),
        Error::MissingToken(e) => CalendarError::Transient(format!("no access token: {}", e)),
        Error::BadRequest(body) => {
            let status = body["error"]["code"].as_u64().and_then(|c| u16::try_from(c).ok());
            match status {
                Some(status) => classify_status(status, &body["error"].to_string()),
                None => classify_message(&body.to_string()),
            }
        }
        Error::Failure(response) => classify_status(response.status().as_u16(), "request failed"),
        other => classify_message(&other.to_string()),
    }
}

fn describe(request: &AppointmentRequest) -> String {
    let mut lines = vec![
        format!("Name: {}", request.attendee_name),
        format!("Email: {}", request.attendee_email),
    ];
    if let Some(phone) = &request.attendee_phone {
        lines.push(format!("Phone: {}", phone));
    }
    for (key, value) in &request.metadata {
        lines.push(format!("{}: {}", key, value));
    }
    lines.join("\n")
}

/// Builds the event inserted for an appointment.
pub fn event_for(request: &AppointmentRequest) -> Event {
    let private: HashMap<String, String> = request
        .metadata
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Event {
        summary: Some(request.title.clone()),
        description: Some(describe(request)),
        start: Some(EventDateTime {
            date_time: Some(request.datetime_start),
            time_zone: Some("UTC".to_string()),
            ..Default::default()
        }),
        end: Some(EventDateTime {
            date_time: Some(request.end()),
            time_zone: Some("UTC".to_string()),
            ..Default::default()
        }),
        extended_properties: Some(EventExtendedProperties {
            private: Some(private),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub struct GoogleCalendarBackend {
    calendar_hub: Arc<HubType>,
}

impl GoogleCalendarBackend {
    pub fn new(calendar_hub: Arc<HubType>) -> Self {
        Self { calendar_hub }
    }

    async fn busy(
        &self,
        calendar_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<Vec<BusyRange>, CalendarError> {
        let req = FreeBusyRequest {
            time_min: Some(start_time),
            time_max: Some(end_time),
            time_zone: Some("UTC".to_string()),
            items: Some(vec![FreeBusyRequestItem {
                id: Some(calendar_id.to_string()),
            }]),
            ..Default::default()
        };

        let (_response, freebusy) = self
            .calendar_hub
            .freebusy()
            .query(req)
            .doit()
            .await
            .map_err(classify_error)?;

        let Some(info) = freebusy.calendars.as_ref().and_then(|c| c.get(calendar_id)) else {
            return Ok(Vec::new());
        };
        if let Some(errors) = info.errors.as_ref().filter(|e| !e.is_empty()) {
            let reasons: Vec<String> = errors.iter().filter_map(|e| e.reason.clone()).collect();
            let detail = reasons.join(", ");
            return Err(if reasons.iter().any(|r| r == "notFound") {
                CalendarError::Permanent(format!("calendar {} not found", calendar_id))
            } else if reasons.iter().any(|r| r == "backendError") {
                CalendarError::Transient(detail)
            } else {
                CalendarError::Permanent(detail)
            });
        }

        let mut busy: Vec<BusyRange> = Vec::new();
        for period in info.busy.iter().flatten() {
            match (period.start, period.end) {
                (Some(start), Some(end)) => busy.push(BusyRange::new(start, end)),
                _ => warn!("Skipping busy period with missing start/end: {:?}", period),
            }
        }
        busy.sort_by_key(|b| b.start);
        Ok(busy)
    }

    async fn insert(
        &self,
        calendar_id: &str,
        request: AppointmentRequest,
    ) -> Result<String, CalendarError> {
        let start = request.datetime_start;
        let end = request.end();
        if end <= start {
            return Err(CalendarError::Permanent(
                "End time must be after start time".to_string(),
            ));
        }

        let busy = self.busy(calendar_id, start, end).await?;
        if busy.iter().any(|b| b.overlaps(start, end)) {
            debug!("Refusing to insert {} - {}: calendar busy", start, end);
            return Err(CalendarError::Conflict);
        }

        let (_response, created) = self
            .calendar_hub
            .events()
            .insert(event_for(&request), calendar_id)
            .doit()
            .await
            .map_err(classify_error)?;

        let id = created
            .id
            .ok_or_else(|| CalendarError::Permanent("created event has no id".to_string()))?;
        info!("Inserted event {} on {} at {}", id, calendar_id, start);
        Ok(id)
    }

    async fn remove(&self, calendar_id: &str, event_id: &str) -> Result<(), CalendarError> {
        let result = self
            .calendar_hub
            .events()
            .delete(calendar_id, event_id)
            .send_updates("none")
            .doit()
            .await;
        match result.map_err(classify_error) {
            Ok(_) => {
                info!("Deleted event {} from {}", event_id, calendar_id);
                Ok(())
            }
            Err(CalendarError::NotFound(_)) => {
                debug!("Event {} already gone from {}", event_id, calendar_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl CalendarBackend for GoogleCalendarBackend {
    fn query_busy_ranges(
        &self,
        calendar_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> BoxFuture<'_, Vec<BusyRange>, CalendarError> {
        let calendar_id = calendar_id.to_string();
        Box::pin(async move { self.busy(&calendar_id, start_time, end_time).await })
    }

    fn write_appointment(
        &self,
        calendar_id: &str,
        request: &AppointmentRequest,
    ) -> BoxFuture<'_, String, CalendarError> {
        let calendar_id = calendar_id.to_string();
        let request = request.clone();
        Box::pin(async move { self.insert(&calendar_id, request).await })
    }

    fn delete_appointment(
        &self,
        calendar_id: &str,
        appointment_id: &str,
    ) -> BoxFuture<'_, (), CalendarError> {
        let calendar_id = calendar_id.to_string();
        let appointment_id = appointment_id.to_string();
        Box::pin(async move { self.remove(&calendar_id, &appointment_id).await })
    }
}
