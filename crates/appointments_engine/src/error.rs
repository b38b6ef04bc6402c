// --- File: crates/appointments_engine/src/error.rs ---
use appointments_common::{AppointmentsError, CalendarError, HttpStatusCode};
use thiserror::Error;

/// Errors produced by slot generation, booking and reminder scheduling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// Page or calendar-link settings the engine cannot work with.
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Requested time slot is no longer available")]
    SlotUnavailable,
    #[error("Unknown confirmation token")]
    TokenNotFound,
    #[error("Confirmation token has expired")]
    TokenExpired,
    #[error("Confirmation token was already used")]
    TokenAlreadyUsed,
    #[error("Reminder offset of {0} seconds is not supported")]
    InvalidReminderOffset(u64),
    #[error("Validation error: {0}")]
    Validation(String),
    /// A collaborator timed out or is unreachable; the same call may succeed later.
    #[error("Temporarily unavailable: {0}")]
    Transient(String),
    #[error("Request rejected by backend: {0}")]
    Permanent(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl BookingError {
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            BookingError::TokenNotFound | BookingError::TokenExpired | BookingError::TokenAlreadyUsed
        )
    }
}

impl From<CalendarError> for BookingError {
    fn from(err: CalendarError) -> Self {
        match err {
            CalendarError::Conflict => BookingError::SlotUnavailable,
            CalendarError::NotFound(id) => BookingError::NotFound(id),
            CalendarError::Transient(msg) => BookingError::Transient(msg),
            CalendarError::Permanent(msg) => BookingError::Permanent(msg),
        }
    }
}

impl HttpStatusCode for BookingError {
    fn status_code(&self) -> u16 {
        match self {
            BookingError::Config(_) => 500,
            BookingError::SlotUnavailable => 409,
            BookingError::TokenNotFound
            | BookingError::TokenExpired
            | BookingError::TokenAlreadyUsed => 410,
            BookingError::InvalidReminderOffset(_) | BookingError::Validation(_) => 400,
            BookingError::Transient(_) => 503,
            BookingError::Permanent(_) => 502,
            BookingError::NotFound(_) => 404,
        }
    }
}

impl From<BookingError> for AppointmentsError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::Config(msg) => AppointmentsError::ConfigError(msg),
            BookingError::SlotUnavailable => {
                AppointmentsError::ConflictError("please pick another slot".to_string())
            }
            BookingError::TokenNotFound
            | BookingError::TokenExpired
            | BookingError::TokenAlreadyUsed => {
                AppointmentsError::GoneError("this link is no longer valid".to_string())
            }
            BookingError::InvalidReminderOffset(seconds) => AppointmentsError::ValidationError(
                format!("reminder offset of {} seconds is not supported", seconds),
            ),
            BookingError::Validation(msg) => AppointmentsError::ValidationError(msg),
            BookingError::Transient(msg) => AppointmentsError::UnavailableError(msg),
            BookingError::Permanent(msg) => AppointmentsError::ExternalServiceError {
                service_name: "Calendar".to_string(),
                message: msg,
            },
            BookingError::NotFound(msg) => AppointmentsError::NotFoundError(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_errors_share_one_public_message() {
        for err in [
            BookingError::TokenNotFound,
            BookingError::TokenExpired,
            BookingError::TokenAlreadyUsed,
        ] {
            assert!(err.is_token_error());
            let public: AppointmentsError = err.into();
            assert_eq!(public.status_code(), 410);
            assert_eq!(public.to_string(), "Gone: this link is no longer valid");
        }
    }

    #[test]
    fn test_status_codes_match_between_engine_and_http_errors() {
        let cases = vec![
            BookingError::Config("mode".into()),
            BookingError::SlotUnavailable,
            BookingError::InvalidReminderOffset(60),
            BookingError::Validation("email".into()),
            BookingError::Transient("timeout".into()),
            BookingError::NotFound("page".into()),
        ];
        for err in cases {
            let code = err.status_code();
            let public: AppointmentsError = err.into();
            assert_eq!(public.status_code(), code);
        }
    }

    #[test]
    fn test_calendar_conflict_becomes_slot_unavailable() {
        assert_eq!(
            BookingError::from(CalendarError::Conflict),
            BookingError::SlotUnavailable
        );
        assert_eq!(
            BookingError::from(CalendarError::Transient("503".into())),
            BookingError::Transient("503".into())
        );
    }
}
