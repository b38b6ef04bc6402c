// --- File: crates/appointments_common/src/lib.rs ---

// Declare modules within this crate
pub mod error;    // Error handling
pub mod http;     // HTTP utilities
pub mod logging;  // Logging utilities
pub mod services; // Service abstractions

// Re-export error types and utilities for easier access
pub use error::{
    AppointmentsError,
    HttpStatusCode,
    Context,
    config_error,
    validation_error,
    not_found,
    conflict,
    external_service_error,
    internal_error,
};

// Re-export HTTP utilities for easier access
pub use http::{
    IntoHttpResponse,
    client::create_client,
};

// Re-export logging utilities for easier access
pub use logging::{init, init_with_level, log_error, log_result};

pub use services::{
    Appointment, AppointmentRequest, AttendeeContact, BoxFuture, BusyRange, CalendarBackend,
    CalendarError, NotificationError, NotificationSender, TemplateKind,
};
