// --- File: crates/services/appointments_backend/src/service_factory.rs ---
//! Builds the engine and its collaborators from the loaded configuration.
use appointments_common::{log_result, AppointmentsError, CalendarBackend, NotificationSender};
use appointments_config::AppConfig;
use appointments_engine::notify::{LogNotificationSender, WebhookNotificationSender};
use appointments_engine::{
    BookingEngine, BookingPolicy, BookingState, InMemoryCalendar, ReminderPolicy,
    ReminderScheduler, SettingsStore, TemplateStore,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Google Calendar when compiled in and enabled, the in-memory calendar otherwise.
pub async fn build_calendar(
    config: &AppConfig,
) -> Result<Arc<dyn CalendarBackend>, AppointmentsError> {
    if config.use_gcal {
        return build_gcal_calendar(config).await;
    }
    info!("Using in-memory calendar backend");
    Ok(Arc::new(InMemoryCalendar::new()))
}

#[cfg(feature = "gcal")]
async fn build_gcal_calendar(
    config: &AppConfig,
) -> Result<Arc<dyn CalendarBackend>, AppointmentsError> {
    let gcal_config = config
        .gcal
        .as_ref()
        .ok_or_else(|| {
            appointments_common::config_error("use_gcal is set but the gcal section is missing")
        })?;
    let hub = appointments_gcal::create_calendar_hub(gcal_config)
        .await
        .map_err(|e| {
            appointments_common::config_error(format!("Google Calendar setup failed: {}", e))
        })?;
    info!("Using Google Calendar backend");
    Ok(Arc::new(appointments_gcal::GoogleCalendarBackend::new(
        Arc::new(hub),
    )))
}

#[cfg(not(feature = "gcal"))]
async fn build_gcal_calendar(
    _config: &AppConfig,
) -> Result<Arc<dyn CalendarBackend>, AppointmentsError> {
    tracing::warn!(
        "use_gcal is set but the gcal feature is not compiled in, using the in-memory calendar"
    );
    Ok(Arc::new(InMemoryCalendar::new()))
}

pub fn build_notifier(
    config: &AppConfig,
) -> Result<Arc<dyn NotificationSender>, AppointmentsError> {
    let webhook = config
        .notifications
        .as_ref()
        .and_then(|n| n.webhook_url.as_deref())
        .filter(|url| !url.trim().is_empty());
    match webhook {
        Some(url) => {
            let timeout = Duration::from_millis(config.reminders.send_timeout_ms);
            let sender = WebhookNotificationSender::new(url, timeout)?;
            info!("Delivering notifications to webhook {}", url);
            Ok(Arc::new(sender))
        }
        None => {
            info!("No notification webhook configured, notifications are logged only");
            Ok(Arc::new(LogNotificationSender))
        }
    }
}

/// Wires stores, scheduler and engine into the state the routes share.
pub fn build_state(
    config: Arc<AppConfig>,
    calendar: Arc<dyn CalendarBackend>,
    notifier: Arc<dyn NotificationSender>,
) -> Result<Arc<BookingState>, AppointmentsError> {
    let settings = Arc::new(log_result(
        SettingsStore::from_config(&config),
        "Booking page settings loaded",
        "Invalid booking page settings",
    )?);
    let templates = Arc::new(TemplateStore::new());
    let reminders = Arc::new(ReminderScheduler::new(
        notifier.clone(),
        ReminderPolicy::from(&config.reminders),
    ));
    let engine = Arc::new(BookingEngine::new(
        calendar,
        notifier,
        reminders,
        templates,
        settings,
        BookingPolicy::from_config(&config),
        config.booking.link_secret.as_deref(),
    ));
    Ok(Arc::new(BookingState { config, engine }))
}

/// Periodic reminder ticks and reservation sweeps. Both run until the runtime stops.
pub fn spawn_background_tasks(
    engine: Arc<BookingEngine>,
    config: &AppConfig,
) -> (JoinHandle<()>, JoinHandle<()>) {
    let tick_every = Duration::from_secs(config.reminders.tick_interval_seconds.max(1));
    let sweep_every = Duration::from_secs(config.booking.sweep_interval_seconds.max(1));

    let reminders = engine.reminders().clone();
    let tick_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let report = reminders.tick(Utc::now()).await;
            debug!("Reminder tick: {:?}", report);
        }
    });

    let sweep_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let report = engine.sweep(Utc::now()).await;
            debug!("Booking sweep: {:?}", report);
        }
    });

    (tick_task, sweep_task)
}
