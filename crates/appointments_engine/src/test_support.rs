// --- File: crates/appointments_engine/src/test_support.rs ---
//! Builders shared by the unit tests.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

use crate::booking::{BookingEngine, BookingPolicy, VisitorFields};
use crate::memory::InMemoryCalendar;
use crate::notify::mock::MockNotificationSender;
use crate::reminders::{ReminderPolicy, ReminderScheduler};
use crate::settings::{CalendarLinkSettings, SettingsStore};
use crate::template::{DurationRange, SlotDefinition, TemplateStore, WeeklyTemplate};

pub const PAGE: &str = "p0";
pub const CALENDAR: &str = "cal-1";
pub const ZONE: &str = "Europe/Zurich";

pub fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

/// Local Zurich wall time as a UTC instant.
pub fn zurich(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    chrono_tz::Europe::Zurich
        .with_ymd_and_hms(y, mo, d, h, mi, 0)
        .unwrap()
        .with_timezone(&Utc)
}

pub fn definition(hour: u32, minute: u32, min: u32, max: u32, title: &str) -> SlotDefinition {
    SlotDefinition::new(
        hour * 3600 + minute * 60,
        DurationRange::new(min, max).unwrap(),
        title,
    )
    .unwrap()
}

/// Monday 09:00 (30 min) and 10:00 (15-45 min); Tuesday 09:00 (30 min).
pub fn week_template() -> WeeklyTemplate {
    let mut template = WeeklyTemplate::empty();
    template
        .replace_day(
            0,
            vec![
                definition(9, 0, 30, 30, "Consultation"),
                definition(10, 0, 15, 45, "Flexible"),
            ],
        )
        .unwrap();
    template
        .replace_day(1, vec![definition(9, 0, 30, 30, "Consultation")])
        .unwrap();
    template
}

pub fn cls() -> CalendarLinkSettings {
    CalendarLinkSettings::new(CALENDAR, ZONE)
}

pub fn visitor(name: &str) -> VisitorFields {
    VisitorFields {
        name: name.to_string(),
        email: format!("{}@example.org", name.to_lowercase()),
        phone: None,
        time_zone: Some(ZONE.to_string()),
    }
}

pub struct Harness {
    pub engine: Arc<BookingEngine>,
    pub calendar: Arc<InMemoryCalendar>,
    pub sender: Arc<MockNotificationSender>,
}

pub fn harness(policy: BookingPolicy) -> Harness {
    harness_with(policy, ReminderPolicy::default())
}

pub fn harness_with(policy: BookingPolicy, reminder_policy: ReminderPolicy) -> Harness {
    let calendar = Arc::new(InMemoryCalendar::new());
    let sender = Arc::new(MockNotificationSender::new());
    let reminders = Arc::new(ReminderScheduler::new(sender.clone(), reminder_policy));
    let templates = Arc::new(TemplateStore::new());
    let settings = Arc::new(SettingsStore::new());
    templates.replace_template(PAGE, week_template()).unwrap();
    settings.set_calendar_link(PAGE, cls()).unwrap();

    let engine = Arc::new(BookingEngine::new(
        calendar.clone(),
        sender.clone(),
        reminders,
        templates,
        settings,
        policy,
        Some("test-secret"),
    ));
    Harness {
        engine,
        calendar,
        sender,
    }
}
