// --- File: crates/appointments_engine/src/logic.rs ---
use appointments_common::BusyRange;
use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::BookingError;
use crate::settings::{CalendarLinkSettings, TimeSourceMode};
use crate::template::WeeklyTemplate;

// --- Data Structures ---

/// A bookable start time produced from a template definition.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateSlot {
    pub datetime_start: DateTime<Utc>,
    /// Minimum length of the definition; the span checked for availability.
    pub duration_minutes: u32,
    pub max_duration_minutes: u32,
    pub title: String,
    /// Position of the definition in its day bucket.
    pub definition_index: usize,
}

impl CandidateSlot {
    pub fn end(&self) -> DateTime<Utc> {
        self.end_for(self.duration_minutes)
    }

    pub fn end_for(&self, duration_minutes: u32) -> DateTime<Utc> {
        self.datetime_start + Duration::minutes(i64::from(duration_minutes))
    }

    pub fn allows_duration(&self, minutes: u32) -> bool {
        (self.duration_minutes..=self.max_duration_minutes).contains(&minutes)
    }

    /// `"15"` for fixed-length slots, `"15-45"` for ranges.
    pub fn duration_token(&self) -> String {
        if self.duration_minutes == self.max_duration_minutes {
            self.duration_minutes.to_string()
        } else {
            format!("{}-{}", self.duration_minutes, self.max_duration_minutes)
        }
    }
}

// --- Availability Logic ---

/// Sorts busy ranges and coalesces overlapping or touching ones.
pub fn merge_busy_ranges(busy: &[BusyRange]) -> Vec<BusyRange> {
    let mut sorted: Vec<BusyRange> = busy.iter().filter(|b| b.end > b.start).copied().collect();
    sorted.sort_by_key(|b| b.start);

    let mut merged: Vec<BusyRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// True when `[start, end)` intersects any range of a merged, sorted list.
pub fn overlaps_any(merged: &[BusyRange], start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    // First range that ends after `start`; earlier ones cannot overlap
    let idx = merged.partition_point(|b| b.end <= start);
    merged.get(idx).is_some_and(|b| b.overlaps(start, end))
}

/// Earliest start a visitor may book: never before now + prep time.
pub fn effective_window_start(
    cls: &CalendarLinkSettings,
    now: DateTime<Utc>,
    requested_start: DateTime<Utc>,
) -> DateTime<Utc> {
    requested_start.max(now + cls.prep_time())
}

/// Expands a weekly template into candidate slots inside `[window_start, window_end)`.
///
/// Days are walked in the calendar's own time zone. Each definition is placed at
/// local midnight plus its offset; local times that do not exist because of a
/// DST gap are skipped and ambiguous ones use the earlier instant. A candidate is
/// dropped when its minimum-length span intersects a busy range.
///
/// The result is chronological. Candidates sharing a start keep template order.
pub fn generate_slots(
    template: &WeeklyTemplate,
    cls: &CalendarLinkSettings,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    busy_ranges: &[BusyRange],
) -> Result<Vec<CandidateSlot>, BookingError> {
    if cls.time_source_mode != TimeSourceMode::Template {
        return Err(BookingError::Config(format!(
            "time source mode {:?} is not supported by the slot generator",
            cls.time_source_mode
        )));
    }
    let tz = cls.tz()?;

    if window_end <= window_start {
        return Ok(Vec::new());
    }

    let merged = merge_busy_ranges(busy_ranges);
    let first_day = window_start.with_timezone(&tz).date_naive();
    let last_day = window_end.with_timezone(&tz).date_naive();
    debug!(
        "Generating slots {} - {} ({} .. {} in {})",
        window_start, window_end, first_day, last_day, tz
    );

    let mut slots = Vec::new();
    let mut day = first_day;
    while day <= last_day {
        let local_midnight = day.and_time(NaiveTime::MIN);
        for (index, definition) in template.day(day.weekday()).iter().enumerate() {
            let local_start =
                local_midnight + Duration::seconds(i64::from(definition.start_offset_seconds));
            let Some(start) = tz.from_local_datetime(&local_start).earliest() else {
                debug!("Skipping {} on {}: not a valid local time", local_start, tz);
                continue;
            };
            let start = start.with_timezone(&Utc);
            if start < window_start || start >= window_end {
                continue;
            }

            let min_minutes = definition.duration_range.min_minutes();
            let end = start + Duration::minutes(i64::from(min_minutes));
            if overlaps_any(&merged, start, end) {
                continue;
            }

            slots.push(CandidateSlot {
                datetime_start: start,
                duration_minutes: min_minutes,
                max_duration_minutes: definition.duration_range.max_minutes(),
                title: definition.title.clone(),
                definition_index: index,
            });
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }

    // Stable: equal starts stay in day-bucket order
    slots.sort_by_key(|slot| slot.datetime_start);
    Ok(slots)
}

/// Chooses the appointment length for a booking.
///
/// No request (or 0) binds the minimum; an explicit request must lie within the
/// slot's range.
pub fn bind_duration(slot: &CandidateSlot, requested: Option<u32>) -> Result<u32, BookingError> {
    match requested {
        None | Some(0) => Ok(slot.duration_minutes),
        Some(minutes) if slot.allows_duration(minutes) => Ok(minutes),
        Some(minutes) => Err(BookingError::Validation(format!(
            "duration of {} minutes is outside {}..={}",
            minutes, slot.duration_minutes, slot.max_duration_minutes
        ))),
    }
}
