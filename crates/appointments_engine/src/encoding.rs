// --- File: crates/appointments_engine/src/encoding.rs ---
//! Delimited slot listing used by the booking page.
//!
//! Records are separated by RS (0x1E) and fields by US (0x1F):
//! `title US duration US local-datetime`, where duration is `"15"` or `"15-45"`
//! and the datetime is ISO 8601 with the calendar's UTC offset.

use chrono::{DateTime, FixedOffset, Utc};
use chrono_tz::Tz;

use crate::error::BookingError;
use crate::logic::CandidateSlot;

pub const RECORD_SEPARATOR: char = '\u{1e}';
pub const FIELD_SEPARATOR: char = '\u{1f}';

const LOCAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";

/// One decoded record of a slot listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotListingEntry {
    pub title: String,
    pub min_minutes: u32,
    pub max_minutes: u32,
    pub start: DateTime<FixedOffset>,
}

impl SlotListingEntry {
    pub fn start_utc(&self) -> DateTime<Utc> {
        self.start.with_timezone(&Utc)
    }
}

/// Titles are organizer input; control characters would break the framing.
pub fn sanitize_title(title: &str) -> String {
    title.chars().filter(|c| !c.is_control()).collect()
}

pub fn encode_slot_listing(slots: &[CandidateSlot], tz: Tz) -> String {
    let mut out = String::new();
    for (i, slot) in slots.iter().enumerate() {
        if i > 0 {
            out.push(RECORD_SEPARATOR);
        }
        out.push_str(&sanitize_title(&slot.title));
        out.push(FIELD_SEPARATOR);
        out.push_str(&slot.duration_token());
        out.push(FIELD_SEPARATOR);
        out.push_str(
            &slot
                .datetime_start
                .with_timezone(&tz)
                .format(LOCAL_FORMAT)
                .to_string(),
        );
    }
    out
}

fn parse_duration_token(token: &str) -> Result<(u32, u32), BookingError> {
    let invalid = || BookingError::Validation(format!("invalid duration token '{}'", token));
    let (min, max) = match token.split_once('-') {
        Some((min, max)) => (min, max),
        None => (token, token),
    };
    let min: u32 = min.trim().parse().map_err(|_| invalid())?;
    let max: u32 = max.trim().parse().map_err(|_| invalid())?;
    if min == 0 || min > max {
        return Err(invalid());
    }
    Ok((min, max))
}

pub fn decode_slot_listing(raw: &str) -> Result<Vec<SlotListingEntry>, BookingError> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    raw.split(RECORD_SEPARATOR)
        .map(|record| {
            let fields: Vec<&str> = record.split(FIELD_SEPARATOR).collect();
            let [title, duration, start] = fields.as_slice() else {
                return Err(BookingError::Validation(format!(
                    "slot record has {} fields, expected 3",
                    fields.len()
                )));
            };
            let (min_minutes, max_minutes) = parse_duration_token(duration)?;
            let start = DateTime::parse_from_rfc3339(start).map_err(|e| {
                BookingError::Validation(format!("invalid slot start '{}': {}", start, e))
            })?;
            Ok(SlotListingEntry {
                title: title.to_string(),
                min_minutes,
                max_minutes,
                start,
            })
        })
        .collect()
}
