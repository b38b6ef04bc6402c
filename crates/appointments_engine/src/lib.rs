// --- File: crates/appointments_engine/src/lib.rs ---
// Declare modules within this crate
pub mod booking;
#[cfg(test)]
mod booking_test;
pub mod doc;
pub mod encoding;
pub mod error;
pub mod handlers;
pub mod logic;
#[cfg(test)]
mod logic_proptest;
pub mod memory;
pub mod notify;
pub mod reminders;
pub mod routes;
pub mod settings;
pub mod template;
#[cfg(test)]
mod test_support;

pub use booking::{BookingEngine, BookingPolicy, Reservation, VisitorFields};
pub use error::BookingError;
pub use handlers::BookingState;
pub use memory::InMemoryCalendar;
pub use reminders::{ReminderPolicy, ReminderScheduler};
pub use settings::SettingsStore;
pub use template::TemplateStore;
