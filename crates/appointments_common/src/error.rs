// --- File: crates/appointments_common/src/error.rs ---
use crate::services::{CalendarError, NotificationError};
use std::fmt;
use thiserror::Error;

/// The base error type for all Appointments errors.
///
/// This enum provides a common set of error variants that can be used across all crates.
/// Each crate can extend this by implementing From<SpecificError> for AppointmentsError.
#[derive(Error, Debug)]
pub enum AppointmentsError {
    /// Error occurred during an HTTP request
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    /// Error occurred while parsing data
    #[error("Failed to parse data: {0}")]
    ParseError(String),

    /// Error occurred due to missing or invalid configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Error occurred during validation
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Error occurred during external service call
    #[error("External service error: {service_name} - {message}")]
    ExternalServiceError {
        service_name: String,
        message: String,
    },

    /// Error occurred due to a conflict (e.g., slot already taken)
    #[error("Conflict: {0}")]
    ConflictError(String),

    /// Error occurred due to a resource not being found
    #[error("Not found: {0}")]
    NotFoundError(String),

    /// The resource existed but can no longer be used (spent or expired links)
    #[error("Gone: {0}")]
    GoneError(String),

    /// Error occurred due to a timeout
    #[error("Timeout: {0}")]
    TimeoutError(String),

    /// A dependency is temporarily unavailable; the request may be retried
    #[error("Service unavailable: {0}")]
    UnavailableError(String),

    /// Error occurred due to an internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// A trait for converting errors to HTTP status codes.
///
/// This trait can be implemented by error types to provide a consistent way
/// to convert errors to HTTP status codes.
pub trait HttpStatusCode {
    /// Returns the HTTP status code for this error.
    fn status_code(&self) -> u16;
}

impl HttpStatusCode for AppointmentsError {
    fn status_code(&self) -> u16 {
        match self {
            AppointmentsError::HttpError(_) => 500,
            AppointmentsError::ParseError(_) => 400,
            AppointmentsError::ConfigError(_) => 500,
            AppointmentsError::ValidationError(_) => 400,
            AppointmentsError::ExternalServiceError { .. } => 502,
            AppointmentsError::ConflictError(_) => 409,
            AppointmentsError::NotFoundError(_) => 404,
            AppointmentsError::GoneError(_) => 410,
            AppointmentsError::TimeoutError(_) => 504,
            AppointmentsError::UnavailableError(_) => 503,
            AppointmentsError::InternalError(_) => 500,
        }
    }
}

/// A trait for adding context to errors.
pub trait Context<T, E> {
    /// Adds context to an error.
    fn context<C>(self, context: C) -> Result<T, AppointmentsError>
    where
        C: fmt::Display + Send + Sync + 'static;

    /// Adds context to an error with a lazy context provider.
    fn with_context<C, F>(self, f: F) -> Result<T, AppointmentsError>
    where
        C: fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E: std::error::Error + Send + Sync + 'static> Context<T, E> for Result<T, E> {
    fn context<C>(self, context: C) -> Result<T, AppointmentsError>
    where
        C: fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|error| AppointmentsError::InternalError(format!("{}: {}", context, error)))
    }

    fn with_context<C, F>(self, f: F) -> Result<T, AppointmentsError>
    where
        C: fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|error| AppointmentsError::InternalError(format!("{}: {}", f(), error)))
    }
}

// Common error conversions
impl From<reqwest::Error> for AppointmentsError {
    fn from(err: reqwest::Error) -> Self {
        AppointmentsError::HttpError(err.to_string())
    }
}

impl From<serde_json::Error> for AppointmentsError {
    fn from(err: serde_json::Error) -> Self {
        AppointmentsError::ParseError(err.to_string())
    }
}

impl From<CalendarError> for AppointmentsError {
    fn from(err: CalendarError) -> Self {
        match err {
            CalendarError::Conflict => conflict("Requested time slot is no longer available"),
            CalendarError::NotFound(id) => not_found(format!("appointment {}", id)),
            CalendarError::Transient(msg) => AppointmentsError::UnavailableError(msg),
            CalendarError::Permanent(msg) => external_service_error("Calendar", msg),
        }
    }
}

impl From<NotificationError> for AppointmentsError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::Transient(msg) => AppointmentsError::UnavailableError(msg),
            NotificationError::Permanent(msg) => external_service_error("Notification", msg),
        }
    }
}

// Utility functions for error handling
pub fn config_error<T: fmt::Display>(message: T) -> AppointmentsError {
    AppointmentsError::ConfigError(message.to_string())
}

pub fn validation_error<T: fmt::Display>(message: T) -> AppointmentsError {
    AppointmentsError::ValidationError(message.to_string())
}

pub fn not_found<T: fmt::Display>(message: T) -> AppointmentsError {
    AppointmentsError::NotFoundError(message.to_string())
}

pub fn conflict<T: fmt::Display>(message: T) -> AppointmentsError {
    AppointmentsError::ConflictError(message.to_string())
}

pub fn external_service_error<T: fmt::Display>(service_name: &str, message: T) -> AppointmentsError {
    AppointmentsError::ExternalServiceError {
        service_name: service_name.to_string(),
        message: message.to_string(),
    }
}

pub fn internal_error<T: fmt::Display>(message: T) -> AppointmentsError {
    AppointmentsError::InternalError(message.to_string())
}
