// --- File: crates/appointments_engine/src/template.rs ---
//! Weekly availability templates.
//!
//! A template has exactly seven day buckets, Monday first. Each bucket lists
//! slot definitions in the order the organizer entered them. Definitions are
//! validated on every write so the slot generator can trust what it reads.

use chrono::Weekday;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::error::BookingError;

pub const SECONDS_PER_DAY: u32 = 86_400;
pub const MAX_DURATION_MINUTES: u32 = 1_440;
pub const DAYS_PER_WEEK: usize = 7;

/// Allowed appointment length for a slot, in minutes.
///
/// On the wire either a single number (fixed length) or a `[min, max]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationRange {
    min_minutes: u32,
    max_minutes: u32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DurationWire {
    Fixed(u32),
    Range(u32, u32),
}

impl DurationRange {
    pub fn new(min_minutes: u32, max_minutes: u32) -> Result<Self, BookingError> {
        if min_minutes == 0 {
            return Err(BookingError::Validation(
                "minimum duration must be positive".to_string(),
            ));
        }
        if min_minutes > max_minutes {
            return Err(BookingError::Validation(format!(
                "minimum duration {} exceeds maximum {}",
                min_minutes, max_minutes
            )));
        }
        if max_minutes > MAX_DURATION_MINUTES {
            return Err(BookingError::Validation(format!(
                "maximum duration {} exceeds one day",
                max_minutes
            )));
        }
        Ok(Self {
            min_minutes,
            max_minutes,
        })
    }

    pub fn fixed(minutes: u32) -> Result<Self, BookingError> {
        Self::new(minutes, minutes)
    }

    pub fn min_minutes(&self) -> u32 {
        self.min_minutes
    }

    pub fn max_minutes(&self) -> u32 {
        self.max_minutes
    }

    pub fn contains(&self, minutes: u32) -> bool {
        (self.min_minutes..=self.max_minutes).contains(&minutes)
    }

    pub fn is_fixed(&self) -> bool {
        self.min_minutes == self.max_minutes
    }
}

impl Serialize for DurationRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.min_minutes, self.max_minutes).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DurationRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let range = match DurationWire::deserialize(deserializer)? {
            DurationWire::Fixed(minutes) => DurationRange::fixed(minutes),
            DurationWire::Range(min, max) => DurationRange::new(min, max),
        };
        range.map_err(serde::de::Error::custom)
    }
}

/// One bookable offering inside a day bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDefinition {
    /// Seconds after local midnight.
    #[serde(rename = "start")]
    pub start_offset_seconds: u32,
    #[serde(rename = "dur")]
    pub duration_range: DurationRange,
    #[serde(default)]
    pub title: String,
}

impl SlotDefinition {
    pub fn new(
        start_offset_seconds: u32,
        duration_range: DurationRange,
        title: impl Into<String>,
    ) -> Result<Self, BookingError> {
        let definition = Self {
            start_offset_seconds,
            duration_range,
            title: title.into(),
        };
        definition.validate()?;
        Ok(definition)
    }

    pub fn validate(&self) -> Result<(), BookingError> {
        if self.start_offset_seconds >= SECONDS_PER_DAY {
            return Err(BookingError::Validation(format!(
                "slot start offset {} is outside the day",
                self.start_offset_seconds
            )));
        }
        // Range invariants are enforced by DurationRange's constructors
        Ok(())
    }
}

/// Seven day buckets, Monday = 0 through Sunday = 6.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeeklyTemplate {
    days: [Vec<SlotDefinition>; DAYS_PER_WEEK],
}

impl WeeklyTemplate {
    pub fn new(days: [Vec<SlotDefinition>; DAYS_PER_WEEK]) -> Result<Self, BookingError> {
        let template = Self { days };
        template.validate()?;
        Ok(template)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Parses the `[[{"start":..,"dur":[..],"title":".."}], ...]` form.
    pub fn from_json(raw: &str) -> Result<Self, BookingError> {
        let template: WeeklyTemplate = serde_json::from_str(raw)
            .map_err(|e| BookingError::Validation(format!("invalid template: {}", e)))?;
        template.validate()?;
        Ok(template)
    }

    pub fn to_json(&self) -> Result<String, BookingError> {
        serde_json::to_string(self)
            .map_err(|e| BookingError::Validation(format!("template not serializable: {}", e)))
    }

    pub fn validate(&self) -> Result<(), BookingError> {
        self.days
            .iter()
            .flatten()
            .try_for_each(SlotDefinition::validate)
    }

    pub fn day(&self, weekday: Weekday) -> &[SlotDefinition] {
        &self.days[weekday.num_days_from_monday() as usize]
    }

    pub fn day_by_index(&self, index: usize) -> Option<&[SlotDefinition]> {
        self.days.get(index).map(Vec::as_slice)
    }

    pub fn replace_day(
        &mut self,
        index: usize,
        definitions: Vec<SlotDefinition>,
    ) -> Result<(), BookingError> {
        if index >= DAYS_PER_WEEK {
            return Err(BookingError::Validation(format!(
                "day index {} is not in 0..7",
                index
            )));
        }
        definitions.iter().try_for_each(SlotDefinition::validate)?;
        self.days[index] = definitions;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.days.iter().all(Vec::is_empty)
    }

    pub fn definition_count(&self) -> usize {
        self.days.iter().map(Vec::len).sum()
    }
}

/// Templates keyed by booking page.
#[derive(Debug, Default)]
pub struct TemplateStore {
    templates: RwLock<HashMap<String, WeeklyTemplate>>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A page with no stored template behaves like an empty week.
    pub fn get(&self, page_id: &str) -> WeeklyTemplate {
        self.templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(page_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn contains(&self, page_id: &str) -> bool {
        self.templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(page_id)
    }

    pub fn replace_template(
        &self,
        page_id: &str,
        template: WeeklyTemplate,
    ) -> Result<(), BookingError> {
        template.validate()?;
        self.templates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(page_id.to_string(), template);
        Ok(())
    }

    pub fn replace_day(
        &self,
        page_id: &str,
        index: usize,
        definitions: Vec<SlotDefinition>,
    ) -> Result<(), BookingError> {
        let mut templates = self.templates.write().unwrap_or_else(PoisonError::into_inner);
        let template = templates.entry(page_id.to_string()).or_default();
        template.replace_day(index, definitions)
    }
}
