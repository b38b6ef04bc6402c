// --- File: crates/appointments_engine/src/settings.rs ---
//! Per-page organizer settings and the `a`/`p`/`d` settings actions.

use appointments_config::{AppConfig, OrganizationConfig, PageConfig};
use chrono::Duration;
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

use crate::error::BookingError;
use crate::template::TemplateStore;

/// Reminder lead times an organizer may pick, in seconds (1h to 7 days).
pub const ALLOWED_REMINDER_OFFSETS: [u64; 11] = [
    3_600, 7_200, 14_400, 28_800, 86_400, 172_800, 259_200, 345_600, 432_000, 518_400, 604_800,
];

/// Where candidate start times come from.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSourceMode {
    #[default]
    Template,
    /// Organizer-defined fixed range. Not handled by the slot generator.
    FixedRange,
}

/// Settings linking a booking page to its destination calendar.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarLinkSettings {
    #[serde(default)]
    pub prep_time_minutes: i64,
    pub destination_calendar_id: String,
    #[serde(default)]
    pub time_source_mode: TimeSourceMode,
    /// IANA zone of the organizer's calendar.
    pub time_zone: String,
}

impl CalendarLinkSettings {
    pub fn new(destination_calendar_id: impl Into<String>, time_zone: impl Into<String>) -> Self {
        Self {
            prep_time_minutes: 0,
            destination_calendar_id: destination_calendar_id.into(),
            time_source_mode: TimeSourceMode::Template,
            time_zone: time_zone.into(),
        }
    }

    pub fn with_prep_time(mut self, minutes: i64) -> Self {
        self.prep_time_minutes = minutes;
        self
    }

    pub fn tz(&self) -> Result<Tz, BookingError> {
        self.time_zone
            .parse::<Tz>()
            .map_err(|_| BookingError::Config(format!("unknown time zone '{}'", self.time_zone)))
    }

    pub fn prep_time(&self) -> Duration {
        Duration::minutes(self.prep_time_minutes.max(0))
    }

    pub fn validate(&self) -> Result<(), BookingError> {
        if self.destination_calendar_id.trim().is_empty() {
            return Err(BookingError::Validation(
                "destination calendar id is required".to_string(),
            ));
        }
        if self.prep_time_minutes < 0 {
            return Err(BookingError::Validation(
                "prep time cannot be negative".to_string(),
            ));
        }
        self.tz().map(|_| ()).map_err(|_| {
            BookingError::Validation(format!("unknown time zone '{}'", self.time_zone))
        })
    }
}

impl From<&PageConfig> for CalendarLinkSettings {
    fn from(page: &PageConfig) -> Self {
        CalendarLinkSettings::new(page.calendar_id.clone(), page.time_zone.clone())
            .with_prep_time(page.prep_time_minutes)
    }
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReminderOffset {
    pub lead_seconds: u64,
    /// Whether the reminder carries confirm/cancel actions.
    pub include_actions: bool,
}

/// Which reminders to send for each appointment on a page.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReminderSpec {
    offsets: Vec<ReminderOffset>,
    more_text: String,
}

impl ReminderSpec {
    pub fn new(
        offsets: Vec<ReminderOffset>,
        more_text: impl Into<String>,
    ) -> Result<Self, BookingError> {
        let spec = Self {
            offsets,
            more_text: more_text.into(),
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn offsets(&self) -> &[ReminderOffset] {
        &self.offsets
    }

    pub fn more_text(&self) -> &str {
        &self.more_text
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn validate(&self) -> Result<(), BookingError> {
        let mut seen = BTreeSet::new();
        for offset in &self.offsets {
            if !ALLOWED_REMINDER_OFFSETS.contains(&offset.lead_seconds) {
                return Err(BookingError::InvalidReminderOffset(offset.lead_seconds));
            }
            if !seen.insert(offset.lead_seconds) {
                return Err(BookingError::Validation(format!(
                    "reminder offset {} listed twice",
                    offset.lead_seconds
                )));
            }
        }
        Ok(())
    }

    /// Parses `{"data":[{"seconds":"3600","actions":true}],"more_text":"..."}`.
    pub fn from_json(raw: &str) -> Result<Self, BookingError> {
        let wire: ReminderSpecWire = serde_json::from_str(raw)
            .map_err(|e| BookingError::Validation(format!("invalid reminder settings: {}", e)))?;
        let offsets = wire
            .data
            .into_iter()
            .map(|entry| {
                Ok(ReminderOffset {
                    lead_seconds: entry.seconds.into_seconds()?,
                    include_actions: entry.actions.is_set(),
                })
            })
            .collect::<Result<Vec<_>, BookingError>>()?;
        ReminderSpec::new(offsets, wire.more_text)
    }
}

#[derive(Deserialize)]
struct ReminderSpecWire {
    #[serde(default)]
    data: Vec<ReminderEntryWire>,
    #[serde(default)]
    more_text: String,
}

#[derive(Deserialize)]
struct ReminderEntryWire {
    seconds: SecondsWire,
    #[serde(default)]
    actions: FlagWire,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SecondsWire {
    Number(u64),
    Text(String),
}

impl SecondsWire {
    fn into_seconds(self) -> Result<u64, BookingError> {
        match self {
            SecondsWire::Number(n) => Ok(n),
            SecondsWire::Text(s) => s.trim().parse().map_err(|_| {
                BookingError::Validation(format!("reminder offset '{}' is not a number", s))
            }),
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(untagged)]
enum FlagWire {
    Bool(bool),
    Number(u64),
    Text(String),
    #[default]
    Unset,
}

impl FlagWire {
    fn is_set(&self) -> bool {
        match self {
            FlagWire::Bool(b) => *b,
            FlagWire::Number(n) => *n != 0,
            FlagWire::Text(s) => matches!(s.trim(), "1" | "true" | "on" | "yes"),
            FlagWire::Unset => false,
        }
    }
}

impl Serialize for ReminderSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let data: Vec<Value> = self
            .offsets
            .iter()
            .map(|o| json!({ "seconds": o.lead_seconds.to_string(), "actions": o.include_actions }))
            .collect();
        json!({ "data": data, "more_text": self.more_text }).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ReminderSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        ReminderSpec::from_json(&value.to_string()).map_err(serde::de::Error::custom)
    }
}

/// Organizer identity shown to visitors.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationInfo {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub address: Option<String>,
}

impl From<&OrganizationConfig> for OrganizationInfo {
    fn from(config: &OrganizationConfig) -> Self {
        Self {
            name: config.name.clone(),
            email: config.email.clone(),
            address: config.address.clone(),
        }
    }
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailValidationSettings {
    /// When false, the confirmation link is mailed instead of shown.
    pub skip_validation_step: bool,
}

impl Default for EmailValidationSettings {
    fn default() -> Self {
        Self {
            skip_validation_step: true,
        }
    }
}

/// All organizer settings, keyed by booking page where they are page specific.
#[derive(Debug, Default)]
pub struct SettingsStore {
    organization: RwLock<OrganizationInfo>,
    calendar_links: RwLock<HashMap<String, CalendarLinkSettings>>,
    email_validation: RwLock<HashMap<String, EmailValidationSettings>>,
    default_reminders: RwLock<ReminderSpec>,
    page_reminders: RwLock<HashMap<String, ReminderSpec>>,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds organization info and the configured pages.
    pub fn from_config(config: &AppConfig) -> Result<Self, BookingError> {
        let store = SettingsStore::new();
        if let Some(org) = &config.organization {
            store.set_organization(OrganizationInfo::from(org));
        }
        for page in &config.pages {
            store.set_calendar_link(&page.page_id, CalendarLinkSettings::from(page))?;
            info!("Seeded booking page '{}' -> {}", page.page_id, page.calendar_id);
        }
        Ok(store)
    }

    pub fn organization(&self) -> OrganizationInfo {
        self.organization
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_organization(&self, info: OrganizationInfo) {
        *self.organization.write().unwrap_or_else(PoisonError::into_inner) = info;
    }

    pub fn calendar_link(&self, page_id: &str) -> Result<CalendarLinkSettings, BookingError> {
        self.calendar_links
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(page_id)
            .cloned()
            .ok_or_else(|| BookingError::NotFound(format!("booking page '{}'", page_id)))
    }

    pub fn set_calendar_link(
        &self,
        page_id: &str,
        settings: CalendarLinkSettings,
    ) -> Result<(), BookingError> {
        settings.validate()?;
        self.calendar_links
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(page_id.to_string(), settings);
        Ok(())
    }

    pub fn email_validation(&self, page_id: &str) -> EmailValidationSettings {
        self.email_validation
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(page_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_email_validation(&self, page_id: &str, settings: EmailValidationSettings) {
        self.email_validation
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(page_id.to_string(), settings);
    }

    /// The page's own reminder spec, falling back to the organization-wide one.
    pub fn reminder_spec(&self, page_id: &str) -> ReminderSpec {
        let pages = self.page_reminders.read().unwrap_or_else(PoisonError::into_inner);
        match pages.get(page_id) {
            Some(spec) => spec.clone(),
            None => self
                .default_reminders
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    pub fn set_reminder_spec(
        &self,
        page_id: Option<&str>,
        spec: ReminderSpec,
    ) -> Result<(), BookingError> {
        spec.validate()?;
        match page_id {
            Some(page) => {
                self.page_reminders
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(page.to_string(), spec);
            }
            None => {
                *self
                    .default_reminders
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = spec;
            }
        }
        Ok(())
    }
}

/// Actions accepted by the settings endpoint's `a` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsAction {
    GetOrganization,
    GetCalendarLink,
    GetEmailValidation,
    GetTemplate,
    GetReminder,
    SetTemplate,
    SetReminder,
    SetCalendarLink,
    SetEmailValidation,
}

impl std::str::FromStr for SettingsAction {
    type Err = BookingError;

    fn from_str(action: &str) -> Result<Self, Self::Err> {
        match action {
            "get_uci" => Ok(SettingsAction::GetOrganization),
            "get_cls" => Ok(SettingsAction::GetCalendarLink),
            "get_eml" => Ok(SettingsAction::GetEmailValidation),
            "get_t_data" => Ok(SettingsAction::GetTemplate),
            "get_reminder" => Ok(SettingsAction::GetReminder),
            "set_t_data" => Ok(SettingsAction::SetTemplate),
            "set_reminder" => Ok(SettingsAction::SetReminder),
            "set_cls" => Ok(SettingsAction::SetCalendarLink),
            "set_eml" => Ok(SettingsAction::SetEmailValidation),
            other => Err(BookingError::Validation(format!("unknown action '{}'", other))),
        }
    }
}

fn require<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, BookingError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| BookingError::Validation(format!("missing field '{}'", name)))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, BookingError> {
    serde_json::to_value(value).map_err(|e| BookingError::Config(e.to_string()))
}

/// Runs one settings action. Reads return the stored value, writes `{"status":"ok"}`.
pub fn apply_settings_action(
    settings: &SettingsStore,
    templates: &TemplateStore,
    action: SettingsAction,
    page: Option<&str>,
    data: Option<&str>,
) -> Result<Value, BookingError> {
    debug!("Settings action {:?} for page {:?}", action, page);
    let ok = || json!({ "status": "ok" });
    match action {
        SettingsAction::GetOrganization => to_value(&settings.organization()),
        SettingsAction::GetCalendarLink => to_value(&settings.calendar_link(require(page, "p")?)?),
        SettingsAction::GetEmailValidation => {
            to_value(&settings.email_validation(require(page, "p")?))
        }
        SettingsAction::GetTemplate => to_value(&templates.get(require(page, "p")?)),
        SettingsAction::GetReminder => {
            let spec = match page.filter(|p| !p.is_empty()) {
                Some(page) => settings.reminder_spec(page),
                None => settings
                    .default_reminders
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone(),
            };
            to_value(&spec)
        }
        SettingsAction::SetTemplate => {
            let page = require(page, "p")?;
            let template = crate::template::WeeklyTemplate::from_json(require(data, "d")?)?;
            templates.replace_template(page, template)?;
            info!("Stored weekly template for page '{}'", page);
            Ok(ok())
        }
        SettingsAction::SetReminder => {
            let spec = ReminderSpec::from_json(require(data, "d")?)?;
            let page = page.filter(|p| !p.is_empty());
            settings.set_reminder_spec(page, spec)?;
            Ok(ok())
        }
        SettingsAction::SetCalendarLink => {
            let page = require(page, "p")?;
            let cls: CalendarLinkSettings = serde_json::from_str(require(data, "d")?)
                .map_err(|e| BookingError::Validation(format!("invalid calendar link: {}", e)))?;
            settings.set_calendar_link(page, cls)?;
            Ok(ok())
        }
        SettingsAction::SetEmailValidation => {
            let page = require(page, "p")?;
            let eml: EmailValidationSettings = serde_json::from_str(require(data, "d")?)
                .map_err(|e| BookingError::Validation(format!("invalid email settings: {}", e)))?;
            settings.set_email_validation(page, eml);
            Ok(ok())
        }
    }
}
