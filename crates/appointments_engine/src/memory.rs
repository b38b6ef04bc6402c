// --- File: crates/appointments_engine/src/memory.rs ---
//! In-process calendar backend.
//!
//! The conflict check and the insert happen under one lock, so two writers for
//! the same range can never both succeed.

use appointments_common::{
    AppointmentRequest, BoxFuture, BusyRange, CalendarBackend, CalendarError,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct CalendarEntry {
    id: String,
    range: BusyRange,
    /// None for blocks added directly, e.g. the organizer's own events.
    request: Option<AppointmentRequest>,
}

#[derive(Debug, Default)]
struct CalendarData {
    entries: HashMap<String, Vec<CalendarEntry>>,
    failure: Option<CalendarError>,
}

#[derive(Debug, Default)]
pub struct InMemoryCalendar {
    data: Mutex<CalendarData>,
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CalendarData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a busy block that is not a booking. Returns its id.
    pub fn add_busy(&self, calendar_id: &str, range: BusyRange) -> String {
        let id = Uuid::new_v4().to_string();
        self.lock()
            .entries
            .entry(calendar_id.to_string())
            .or_default()
            .push(CalendarEntry {
                id: id.clone(),
                range,
                request: None,
            });
        id
    }

    /// Makes every following call fail with `failure` until cleared with `None`.
    pub fn set_failure(&self, failure: Option<CalendarError>) {
        self.lock().failure = failure;
    }

    /// Stored bookings on a calendar as `(id, request)`, sorted by start.
    pub fn appointments(&self, calendar_id: &str) -> Vec<(String, AppointmentRequest)> {
        let data = self.lock();
        let mut booked: Vec<(String, AppointmentRequest)> = data
            .entries
            .get(calendar_id)
            .into_iter()
            .flatten()
            .filter_map(|e| e.request.clone().map(|r| (e.id.clone(), r)))
            .collect();
        booked.sort_by_key(|(_, r)| r.datetime_start);
        booked
    }

    pub fn contains(&self, calendar_id: &str, appointment_id: &str) -> bool {
        self.lock()
            .entries
            .get(calendar_id)
            .is_some_and(|entries| entries.iter().any(|e| e.id == appointment_id))
    }

    fn busy_between(
        &self,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BusyRange>, CalendarError> {
        let data = self.lock();
        if let Some(failure) = &data.failure {
            return Err(failure.clone());
        }
        let mut busy: Vec<BusyRange> = data
            .entries
            .get(calendar_id)
            .into_iter()
            .flatten()
            .filter(|e| e.range.overlaps(start, end))
            .map(|e| e.range)
            .collect();
        busy.sort_by_key(|b| b.start);
        Ok(busy)
    }

    fn commit(
        &self,
        calendar_id: &str,
        request: AppointmentRequest,
    ) -> Result<String, CalendarError> {
        let mut data = self.lock();
        if let Some(failure) = &data.failure {
            return Err(failure.clone());
        }
        let start = request.datetime_start;
        let end = request.end();
        if end <= start {
            return Err(CalendarError::Permanent(
                "appointment must have a positive duration".to_string(),
            ));
        }
        let entries = data.entries.entry(calendar_id.to_string()).or_default();
        if entries.iter().any(|e| e.range.overlaps(start, end)) {
            debug!("Rejecting {} - {} on {}: conflict", start, end, calendar_id);
            return Err(CalendarError::Conflict);
        }
        let id = Uuid::new_v4().to_string();
        entries.push(CalendarEntry {
            id: id.clone(),
            range: BusyRange::new(start, end),
            request: Some(request),
        });
        info!("Stored appointment {} on {} at {}", id, calendar_id, start);
        Ok(id)
    }

    fn remove(&self, calendar_id: &str, appointment_id: &str) -> Result<(), CalendarError> {
        let mut data = self.lock();
        if let Some(failure) = &data.failure {
            return Err(failure.clone());
        }
        if let Some(entries) = data.entries.get_mut(calendar_id) {
            entries.retain(|e| e.id != appointment_id);
        }
        Ok(())
    }
}

impl CalendarBackend for InMemoryCalendar {
    fn query_busy_ranges(
        &self,
        calendar_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> BoxFuture<'_, Vec<BusyRange>, CalendarError> {
        let calendar_id = calendar_id.to_string();
        Box::pin(async move { self.busy_between(&calendar_id, start_time, end_time) })
    }

    fn write_appointment(
        &self,
        calendar_id: &str,
        request: &AppointmentRequest,
    ) -> BoxFuture<'_, String, CalendarError> {
        let calendar_id = calendar_id.to_string();
        let request = request.clone();
        Box::pin(async move { self.commit(&calendar_id, request) })
    }

    fn delete_appointment(
        &self,
        calendar_id: &str,
        appointment_id: &str,
    ) -> BoxFuture<'_, (), CalendarError> {
        let calendar_id = calendar_id.to_string();
        let appointment_id = appointment_id.to_string();
        Box::pin(async move { self.remove(&calendar_id, &appointment_id) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeMap;

    fn request(start: DateTime<Utc>, minutes: u32) -> AppointmentRequest {
        AppointmentRequest {
            title: "Consultation".to_string(),
            datetime_start: start,
            duration_minutes: minutes,
            attendee_name: "Ada".to_string(),
            attendee_email: "ada@example.org".to_string(),
            attendee_phone: None,
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_write_rejects_overlap_and_accepts_adjacent() {
        let calendar = InMemoryCalendar::new();
        let start = Utc.with_ymd_and_hms(2025, 5, 5, 7, 0, 0).unwrap();

        let first = calendar.write_appointment("cal", &request(start, 30)).await.unwrap();
        assert_eq!(
            calendar
                .write_appointment("cal", &request(start + Duration::minutes(15), 30))
                .await,
            Err(CalendarError::Conflict)
        );
        calendar
            .write_appointment("cal", &request(start + Duration::minutes(30), 30))
            .await
            .unwrap();
        // Other calendars are independent
        calendar.write_appointment("other", &request(start, 30)).await.unwrap();

        assert_eq!(calendar.appointments("cal").len(), 2);
        assert!(calendar.contains("cal", &first));
    }

    #[tokio::test]
    async fn test_busy_query_includes_manual_blocks_and_delete_is_idempotent() {
        let calendar = InMemoryCalendar::new();
        let start = Utc.with_ymd_and_hms(2025, 5, 5, 7, 0, 0).unwrap();
        calendar.add_busy("cal", BusyRange::new(start, start + Duration::hours(1)));
        let id = calendar
            .write_appointment("cal", &request(start + Duration::hours(2), 45))
            .await
            .unwrap();

        let busy = calendar
            .query_busy_ranges("cal", start, start + Duration::hours(4))
            .await
            .unwrap();
        assert_eq!(busy.len(), 2);
        assert!(busy[0].start < busy[1].start);

        calendar.delete_appointment("cal", &id).await.unwrap();
        calendar.delete_appointment("cal", &id).await.unwrap();
        assert!(!calendar.contains("cal", &id));
    }

    #[tokio::test]
    async fn test_injected_failure_applies_until_cleared() {
        let calendar = InMemoryCalendar::new();
        let start = Utc.with_ymd_and_hms(2025, 5, 5, 7, 0, 0).unwrap();
        calendar.set_failure(Some(CalendarError::Transient("down".into())));

        assert!(matches!(
            calendar.write_appointment("cal", &request(start, 30)).await,
            Err(CalendarError::Transient(_))
        ));
        calendar.set_failure(None);
        assert!(calendar.write_appointment("cal", &request(start, 30)).await.is_ok());
    }
}
