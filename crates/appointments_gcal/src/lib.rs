// --- File: crates/appointments_gcal/src/lib.rs ---
// Declare modules within this crate
pub mod auth;
pub mod service;

pub use auth::{create_calendar_hub, HubType};
pub use service::GoogleCalendarBackend;
