// --- File: crates/appointments_config/src/models.rs ---

use serde::{Deserialize, Serialize};

// --- General Server Config ---
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Absolute base used when building confirmation links, e.g. "https://book.example.org".
    #[serde(default)]
    pub public_base_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            public_base_url: None,
        }
    }
}

// --- Booking Config ---
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct BookingConfig {
    /// How long a reservation holds its slot before the token expires.
    pub reservation_ttl_minutes: i64,
    pub sweep_interval_seconds: u64,
    /// Terminal booking attempts are forgotten after this many hours.
    pub attempt_retention_hours: i64,
    /// Whether a live reservation hides its slot from other visitors.
    pub hold_reserved_slots: bool,
    /// Send confirmation / cancellation notices to attendees.
    pub send_notices: bool,
    pub link_secret: Option<String>, // "secret_from_env" -> BOOKING_LINK_SECRET
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            reservation_ttl_minutes: 30,
            sweep_interval_seconds: 60,
            attempt_retention_hours: 24,
            hold_reserved_slots: true,
            send_notices: true,
            link_secret: None,
        }
    }
}

// --- Reminder Config ---
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ReminderConfig {
    pub tick_interval_seconds: u64,
    /// Send attempts per dispatch before it is abandoned.
    pub max_attempts: u32,
    pub retry_base_seconds: u64,
    pub retry_max_seconds: u64,
    pub send_timeout_ms: u64,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 60,
            max_attempts: 5,
            retry_base_seconds: 60,
            retry_max_seconds: 3600,
            send_timeout_ms: 10_000,
        }
    }
}

// --- Calendar Backend Config ---
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CalendarConfig {
    pub timeout_ms: u64,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self { timeout_ms: 5_000 }
    }
}

// --- Organization Info ---
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct OrganizationConfig {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub address: Option<String>,
}

// --- Notification Delivery ---
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct NotificationConfig {
    /// When set, notifications are POSTed as JSON to this URL. Otherwise they are only logged.
    pub webhook_url: Option<String>,
}

// --- Google Calendar Config ---
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GcalConfig {
    pub key_path: Option<String>, // Mandatory when use_gcal is set
}

// --- Booking Pages seeded at startup ---
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PageConfig {
    pub page_id: String,
    pub calendar_id: String,
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
    #[serde(default)]
    pub prep_time_minutes: i64,
}

fn default_time_zone() -> String {
    "Europe/Zurich".to_string()
}

// --- Unified App Configuration ---
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    // --- Runtime Flags (optional in config file, default to false) ---
    #[serde(default)]
    pub use_gcal: bool,

    #[serde(default)]
    pub booking: BookingConfig,
    #[serde(default)]
    pub reminders: ReminderConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,

    // --- Optional Sections ---
    #[serde(default)]
    pub organization: Option<OrganizationConfig>,
    #[serde(default)]
    pub notifications: Option<NotificationConfig>,
    #[serde(default)]
    pub gcal: Option<GcalConfig>,
    #[serde(default)]
    pub pages: Vec<PageConfig>,
}
