// --- File: crates/appointments_common/src/http/client.rs ---
use reqwest::{Client, Error as ReqwestError};
use std::time::Duration;

/// Creates a new HTTP client with custom configuration.
///
/// # Arguments
///
/// * `timeout` - The overall request timeout
/// * `follow_redirects` - Whether the client should follow redirects
pub fn create_client(timeout: Duration, follow_redirects: bool) -> Result<Client, ReqwestError> {
    Client::builder()
        .timeout(timeout)
        .redirect(if follow_redirects {
            reqwest::redirect::Policy::default()
        } else {
            reqwest::redirect::Policy::none()
        })
        .build()
}

/// Returns true for failures worth retrying: timeouts, connection problems and 5xx/429 answers.
pub fn is_transient(err: &ReqwestError) -> bool {
    if err.is_timeout() || err.is_connect() {
        return true;
    }
    match err.status() {
        Some(status) => status.is_server_error() || status.as_u16() == 429,
        None => err.is_request(),
    }
}
