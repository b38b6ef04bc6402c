// --- File: crates/appointments_engine/src/notify.rs ---
//! Notification senders: a tracing-only sender and a JSON webhook.

use appointments_common::http::client::{create_client, is_transient};
use appointments_common::{AttendeeContact, BoxFuture, NotificationError, NotificationSender, TemplateKind};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default, Clone)]
pub struct LogNotificationSender;

impl NotificationSender for LogNotificationSender {
    fn send(
        &self,
        contact: &AttendeeContact,
        kind: TemplateKind,
        payload: Value,
    ) -> BoxFuture<'_, (), NotificationError> {
        let email = contact.email.clone();
        Box::pin(async move {
            info!("Notification {:?} for {}: {}", kind, email, payload);
            Ok(())
        })
    }
}

/// POSTs `{"kind", "contact", "payload"}` to a configured URL.
///
/// Server errors, rate limiting and network failures are transient; any other
/// non-success status is permanent.
#[derive(Debug, Clone)]
pub struct WebhookNotificationSender {
    client: Client,
    url: String,
}

impl WebhookNotificationSender {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotificationError> {
        let client = create_client(timeout, false)
            .map_err(|e| NotificationError::Permanent(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

pub fn classify_status(status: reqwest::StatusCode) -> Result<(), NotificationError> {
    if status.is_success() {
        Ok(())
    } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Err(NotificationError::Transient(format!("webhook answered {}", status)))
    } else {
        Err(NotificationError::Permanent(format!("webhook answered {}", status)))
    }
}

impl NotificationSender for WebhookNotificationSender {
    fn send(
        &self,
        contact: &AttendeeContact,
        kind: TemplateKind,
        payload: Value,
    ) -> BoxFuture<'_, (), NotificationError> {
        let body = json!({
            "kind": kind,
            "contact": contact,
            "payload": payload,
        });
        Box::pin(async move {
            debug!("POST {} ({:?})", self.url, kind);
            let response = self.client.post(&self.url).json(&body).send().await.map_err(|e| {
                if is_transient(&e) {
                    warn!("Webhook delivery failed, will retry: {}", e);
                    NotificationError::Transient(e.to_string())
                } else {
                    NotificationError::Permanent(e.to_string())
                }
            })?;
            classify_status(response.status())
        })
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// A delivered notification as recorded by the mock.
    #[derive(Debug, Clone)]
    pub struct SentNotification {
        pub email: String,
        pub kind: TemplateKind,
        pub payload: Value,
    }

    /// Records every successful send; scripted failures are consumed first.
    #[derive(Default)]
    pub struct MockNotificationSender {
        pub sent: Mutex<Vec<SentNotification>>,
        pub failures: Mutex<VecDeque<NotificationError>>,
        pub calls: Mutex<usize>,
    }

    impl MockNotificationSender {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_next(&self, error: NotificationError) {
            self.failures.lock().unwrap().push_back(error);
        }

        pub fn sent(&self) -> Vec<SentNotification> {
            self.sent.lock().unwrap().clone()
        }

        pub fn sent_of(&self, kind: TemplateKind) -> Vec<SentNotification> {
            self.sent().into_iter().filter(|n| n.kind == kind).collect()
        }

        pub fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl NotificationSender for MockNotificationSender {
        fn send(
            &self,
            contact: &AttendeeContact,
            kind: TemplateKind,
            payload: Value,
        ) -> BoxFuture<'_, (), NotificationError> {
            let email = contact.email.clone();
            Box::pin(async move {
                *self.calls.lock().unwrap() += 1;
                if let Some(error) = self.failures.lock().unwrap().pop_front() {
                    return Err(error);
                }
                self.sent.lock().unwrap().push(SentNotification {
                    email,
                    kind,
                    payload,
                });
                Ok(())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(classify_status(reqwest::StatusCode::OK).is_ok());
        assert!(classify_status(reqwest::StatusCode::ACCEPTED).is_ok());
        assert!(matches!(
            classify_status(reqwest::StatusCode::BAD_GATEWAY),
            Err(NotificationError::Transient(_))
        ));
        assert!(matches!(
            classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS),
            Err(NotificationError::Transient(_))
        ));
        assert!(matches!(
            classify_status(reqwest::StatusCode::UNPROCESSABLE_ENTITY),
            Err(NotificationError::Permanent(_))
        ));
    }

    #[tokio::test]
    async fn test_log_sender_always_succeeds() {
        let contact = AttendeeContact {
            name: "Ada".into(),
            email: "ada@example.org".into(),
            phone: None,
        };
        let result = LogNotificationSender
            .send(&contact, TemplateKind::Reminder, json!({"lead_seconds": 3600}))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_connection_refused_is_transient() {
        // Port 9 on localhost is not expected to accept connections
        let sender =
            WebhookNotificationSender::new("http://127.0.0.1:9/hook", Duration::from_secs(2)).unwrap();
        let contact = AttendeeContact {
            name: "Ada".into(),
            email: "ada@example.org".into(),
            phone: None,
        };
        let result = sender.send(&contact, TemplateKind::Confirmation, json!({})).await;
        assert!(matches!(result, Err(NotificationError::Transient(_))));
    }
}
