// --- File: crates/appointments_engine/src/booking.rs ---
//! Two-phase booking: reserve a slot against a one-time token, then confirm.
//!
//! ```text
//! RESERVED --confirm--> CONFIRMED --cancel--> CANCELLED
//!     |--expire--> EXPIRED
//!     |--cancel / lost race--> CANCELLED
//! ```
//!
//! Confirmation is the authoritative step: it re-reads the calendar and writes
//! the appointment while holding the destination calendar's commit lock.

use appointments_common::{
    Appointment, AppointmentRequest, AttendeeContact, BusyRange, CalendarBackend, CalendarError,
    NotificationSender, TemplateKind,
};
use appointments_config::AppConfig;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::error::BookingError;
use crate::logic::{bind_duration, effective_window_start, generate_slots, CandidateSlot};
use crate::reminders::ReminderScheduler;
use crate::settings::{CalendarLinkSettings, SettingsStore};
use crate::template::TemplateStore;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_BYTES: usize = 32;

// --- Data Structures ---

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptState {
    Reserved,
    Confirmed,
    Expired,
    Cancelled,
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptState::Reserved)
    }
}

/// What the visitor typed into the booking form.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorFields {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    /// Visitor's own IANA zone, kept for display purposes.
    #[serde(default)]
    pub time_zone: Option<String>,
}

impl VisitorFields {
    pub fn validate(&self) -> Result<(), BookingError> {
        if self.name.trim().is_empty() {
            return Err(BookingError::Validation("name is required".to_string()));
        }
        let email = self.email.trim();
        let valid_email = email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
        if !valid_email {
            return Err(BookingError::Validation(format!(
                "'{}' is not a valid email address",
                self.email
            )));
        }
        Ok(())
    }

    fn contact(&self) -> AttendeeContact {
        AttendeeContact {
            name: self.name.trim().to_string(),
            email: self.email.trim().to_string(),
            phone: self.phone.clone().filter(|p| !p.trim().is_empty()),
        }
    }
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingAttempt {
    pub token: String,
    pub page_id: String,
    pub calendar_id: String,
    pub slot: CandidateSlot,
    pub bound_duration_minutes: u32,
    pub visitor: VisitorFields,
    pub state: AttemptState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub appointment_id: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BookingAttempt {
    pub fn start(&self) -> DateTime<Utc> {
        self.slot.datetime_start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.slot.end_for(self.bound_duration_minutes)
    }

    fn is_live_hold(&self, now: DateTime<Utc>) -> bool {
        self.state == AttemptState::Reserved && now <= self.expires_at
    }

    fn finish(&mut self, state: AttemptState, now: DateTime<Utc>) {
        self.state = state;
        self.finished_at = Some(now);
    }
}

/// Returned by `reserve`: what the visitor needs for step two.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reservation {
    pub token: String,
    /// Signature binding the token to its page; must accompany the confirm link.
    pub link_blob: String,
    pub page_id: String,
    pub expires_at: DateTime<Utc>,
    pub datetime_start: DateTime<Utc>,
    pub duration_minutes: u32,
    pub title: String,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelOutcome {
    pub token: String,
    /// Set when a confirmed appointment was withdrawn.
    pub appointment_id: Option<String>,
    /// False when the calendar entry could not be removed yet and is queued.
    pub calendar_cleared: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    pub deletions_retried: usize,
    pub deletions_pending: usize,
    pub pruned: usize,
}

/// Tunables for the state machine, usually taken from `AppConfig`.
#[derive(Debug, Clone)]
pub struct BookingPolicy {
    pub reservation_ttl: Duration,
    pub attempt_retention: Duration,
    pub hold_reserved_slots: bool,
    pub send_notices: bool,
    pub calendar_timeout: std::time::Duration,
    pub notice_timeout: std::time::Duration,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        BookingPolicy::from_config(&AppConfig::default())
    }
}

impl BookingPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            reservation_ttl: Duration::minutes(config.booking.reservation_ttl_minutes.max(1)),
            attempt_retention: Duration::hours(config.booking.attempt_retention_hours.max(0)),
            hold_reserved_slots: config.booking.hold_reserved_slots,
            send_notices: config.booking.send_notices,
            calendar_timeout: std::time::Duration::from_millis(config.calendar.timeout_ms),
            notice_timeout: std::time::Duration::from_millis(config.reminders.send_timeout_ms),
        }
    }
}

struct AttemptRecord {
    attempt: BookingAttempt,
    /// A confirm for this token is talking to the calendar.
    confirming: bool,
    appointment: Option<Appointment>,
}

struct PendingDeletion {
    calendar_id: String,
    appointment_id: String,
    attempts: u32,
}

#[derive(Default)]
struct EngineState {
    attempts: HashMap<String, AttemptRecord>,
    /// appointment id -> token
    by_appointment: HashMap<String, String>,
    pending_deletions: Vec<PendingDeletion>,
}

// --- Engine ---

pub struct BookingEngine {
    calendar: Arc<dyn CalendarBackend>,
    notifier: Arc<dyn NotificationSender>,
    reminders: Arc<ReminderScheduler>,
    templates: Arc<TemplateStore>,
    settings: Arc<SettingsStore>,
    policy: BookingPolicy,
    link_key: Vec<u8>,
    state: Mutex<EngineState>,
    commit_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl BookingEngine {
    /// `link_secret` keys the confirmation-link signature. Without one a random
    /// per-process key is used, so links do not survive a restart.
    pub fn new(
        calendar: Arc<dyn CalendarBackend>,
        notifier: Arc<dyn NotificationSender>,
        reminders: Arc<ReminderScheduler>,
        templates: Arc<TemplateStore>,
        settings: Arc<SettingsStore>,
        policy: BookingPolicy,
        link_secret: Option<&str>,
    ) -> Self {
        let link_key = match link_secret.filter(|s| !s.is_empty()) {
            Some(secret) => secret.as_bytes().to_vec(),
            None => {
                debug!("No link secret configured, using a random key");
                random_bytes().to_vec()
            }
        };
        Self {
            calendar,
            notifier,
            reminders,
            templates,
            settings,
            policy,
            link_key,
            state: Mutex::new(EngineState::default()),
            commit_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn templates(&self) -> &Arc<TemplateStore> {
        &self.templates
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn reminders(&self) -> &Arc<ReminderScheduler> {
        &self.reminders
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn commit_lock(&self, calendar_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.commit_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(calendar_id.to_string())
            .or_default()
            .clone()
    }

    async fn with_calendar_timeout<T, F>(&self, operation: F) -> Result<T, BookingError>
    where
        F: Future<Output = Result<T, CalendarError>>,
    {
        match tokio::time::timeout(self.policy.calendar_timeout, operation).await {
            Ok(result) => result.map_err(BookingError::from),
            Err(_) => Err(BookingError::Transient(
                "calendar did not answer in time".to_string(),
            )),
        }
    }

    fn live_holds(&self, calendar_id: &str, now: DateTime<Utc>) -> Vec<BusyRange> {
        self.lock()
            .attempts
            .values()
            .map(|r| &r.attempt)
            .filter(|a| a.calendar_id == calendar_id && a.is_live_hold(now))
            .map(|a| BusyRange::new(a.start(), a.end()))
            .collect()
    }

    /// Bookable slots for a page, as shown to visitors.
    ///
    /// `window_start` is clamped to now + prep time. Live reservations hide
    /// their slots when holds are enabled.
    pub async fn available_slots(
        &self,
        page_id: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<CandidateSlot>, BookingError> {
        let cls = self.settings.calendar_link(page_id)?;
        let template = self.templates.get(page_id);
        let start = effective_window_start(&cls, now, window_start);
        if start >= window_end || template.is_empty() {
            return Ok(Vec::new());
        }

        // Widen by the longest slot so busy ranges reaching into the window count
        let mut busy = self
            .with_calendar_timeout(self.calendar.query_busy_ranges(
                &cls.destination_calendar_id,
                start,
                window_end + Duration::days(1),
            ))
            .await?;
        if self.policy.hold_reserved_slots {
            busy.extend(self.live_holds(&cls.destination_calendar_id, now));
        }
        generate_slots(&template, &cls, start, window_end, &busy)
    }

    /// Finds the template slot starting exactly at `slot_start`.
    fn template_slot(
        &self,
        page_id: &str,
        cls: &CalendarLinkSettings,
        slot_start: DateTime<Utc>,
        requested: Option<u32>,
    ) -> Result<CandidateSlot, BookingError> {
        let template = self.templates.get(page_id);
        let candidates = generate_slots(
            &template,
            cls,
            slot_start,
            slot_start + Duration::seconds(1),
            &[],
        )?;
        let wanted = requested.filter(|m| *m > 0);
        let chosen = match wanted {
            Some(minutes) => candidates
                .iter()
                .find(|c| c.allows_duration(minutes))
                .or(candidates.first()),
            None => candidates.first(),
        };
        chosen
            .filter(|c| c.datetime_start == slot_start)
            .cloned()
            .ok_or(BookingError::SlotUnavailable)
    }

    /// Holds a slot and issues a confirmation token.
    pub async fn reserve(
        &self,
        page_id: &str,
        slot_start: DateTime<Utc>,
        requested_duration: Option<u32>,
        visitor: VisitorFields,
        now: DateTime<Utc>,
    ) -> Result<Reservation, BookingError> {
        visitor.validate()?;
        self.expire_stale(now);

        let cls = self.settings.calendar_link(page_id)?;
        if slot_start < effective_window_start(&cls, now, slot_start) {
            debug!("Slot {} is inside the preparation window", slot_start);
            return Err(BookingError::SlotUnavailable);
        }
        let slot = self.template_slot(page_id, &cls, slot_start, requested_duration)?;
        let duration = bind_duration(&slot, requested_duration)?;
        let end = slot.end_for(duration);

        let busy = self
            .with_calendar_timeout(self.calendar.query_busy_ranges(
                &cls.destination_calendar_id,
                slot_start,
                end,
            ))
            .await?;
        if busy.iter().any(|b| b.overlaps(slot_start, end)) {
            info!("Slot {} on page {} is already taken", slot_start, page_id);
            return Err(BookingError::SlotUnavailable);
        }

        let mut state = self.lock();
        if self.policy.hold_reserved_slots {
            let held = state.attempts.values().any(|r| {
                r.attempt.calendar_id == cls.destination_calendar_id
                    && r.attempt.is_live_hold(now)
                    && BusyRange::new(r.attempt.start(), r.attempt.end()).overlaps(slot_start, end)
            });
            if held {
                info!("Slot {} on page {} is held by another visitor", slot_start, page_id);
                return Err(BookingError::SlotUnavailable);
            }
        }

        let token = mint_token();
        let attempt = BookingAttempt {
            token: token.clone(),
            page_id: page_id.to_string(),
            calendar_id: cls.destination_calendar_id.clone(),
            slot: slot.clone(),
            bound_duration_minutes: duration,
            visitor,
            state: AttemptState::Reserved,
            created_at: now,
            expires_at: now + self.policy.reservation_ttl,
            appointment_id: None,
            finished_at: None,
        };
        let reservation = Reservation {
            link_blob: self.sign_link(&token, page_id)?,
            token: token.clone(),
            page_id: page_id.to_string(),
            expires_at: attempt.expires_at,
            datetime_start: slot_start,
            duration_minutes: duration,
            title: slot.title,
        };
        state.attempts.insert(
            token,
            AttemptRecord {
                attempt,
                confirming: false,
                appointment: None,
            },
        );
        info!(
            "Reserved {} ({} min) on page {} until {}",
            slot_start, duration, page_id, reservation.expires_at
        );
        Ok(reservation)
    }

    /// Signature over token and page, base64url without padding.
    pub fn sign_link(&self, token: &str, page_id: &str) -> Result<String, BookingError> {
        Ok(URL_SAFE_NO_PAD.encode(self.link_mac(token, page_id)?.finalize().into_bytes()))
    }

    fn link_mac(&self, token: &str, page_id: &str) -> Result<HmacSha256, BookingError> {
        let mut mac = HmacSha256::new_from_slice(&self.link_key)
            .map_err(|e| BookingError::Config(format!("invalid link key: {}", e)))?;
        mac.update(token.as_bytes());
        mac.update(b"\n");
        mac.update(page_id.as_bytes());
        Ok(mac)
    }

    /// A blob that does not match is reported like an unknown token.
    pub fn verify_link(&self, token: &str, page_id: &str, blob: &str) -> Result<(), BookingError> {
        let signature = URL_SAFE_NO_PAD
            .decode(blob.trim())
            .map_err(|_| BookingError::TokenNotFound)?;
        self.link_mac(token, page_id)?
            .verify_slice(&signature)
            .map_err(|_| BookingError::TokenNotFound)
    }

    /// Step two of the booking form: check the signed link, then confirm.
    pub async fn confirm_link(
        &self,
        page_id: &str,
        token: &str,
        blob: &str,
        now: DateTime<Utc>,
    ) -> Result<Appointment, BookingError> {
        self.verify_link(token, page_id, blob)?;
        let same_page = self
            .lock()
            .attempts
            .get(token)
            .map(|r| r.attempt.page_id == page_id);
        if same_page == Some(false) {
            return Err(BookingError::TokenNotFound);
        }
        self.confirm(token, now).await
    }

    /// Commits a reservation to the calendar.
    pub async fn confirm(&self, token: &str, now: DateTime<Utc>) -> Result<Appointment, BookingError> {
        let attempt = {
            let mut state = self.lock();
            let record = state
                .attempts
                .get_mut(token)
                .ok_or(BookingError::TokenNotFound)?;
            match record.attempt.state {
                AttemptState::Reserved if record.confirming => {
                    return Err(BookingError::TokenAlreadyUsed);
                }
                AttemptState::Reserved if now > record.attempt.expires_at => {
                    record.attempt.finish(AttemptState::Expired, now);
                    info!("Token for {} expired before confirmation", record.attempt.start());
                    return Err(BookingError::TokenExpired);
                }
                AttemptState::Reserved => {
                    record.confirming = true;
                    record.attempt.clone()
                }
                AttemptState::Expired => return Err(BookingError::TokenExpired),
                AttemptState::Confirmed | AttemptState::Cancelled => {
                    return Err(BookingError::TokenAlreadyUsed);
                }
            }
        };

        let result = self.commit(&attempt).await;

        let outcome = {
            let mut state = self.lock();
            let Some(record) = state.attempts.get_mut(token) else {
                return Err(BookingError::TokenNotFound);
            };
            record.confirming = false;
            match result {
                Ok(appointment) => {
                    record.attempt.finish(AttemptState::Confirmed, now);
                    record.attempt.appointment_id = Some(appointment.id.clone());
                    record.appointment = Some(appointment.clone());
                    state
                        .by_appointment
                        .insert(appointment.id.clone(), token.to_string());
                    // Registered before the lock is released so a cancel sees the reminders
                    let spec = self.settings.reminder_spec(&attempt.page_id);
                    self.reminders.register_or_queue(&appointment, &spec, now);
                    Ok(appointment)
                }
                Err(BookingError::SlotUnavailable) => {
                    record.attempt.finish(AttemptState::Cancelled, now);
                    info!("Confirmation for {} lost the slot to another booking", attempt.start());
                    Err(BookingError::SlotUnavailable)
                }
                Err(e) => {
                    // Still RESERVED: the visitor may try the same link again
                    warn!("Confirmation of {} failed: {}", attempt.start(), e);
                    Err(e)
                }
            }
        };
        let appointment = outcome?;

        info!(
            "Confirmed appointment {} at {} on {}",
            appointment.id, appointment.datetime_start, appointment.calendar_id
        );
        self.notify(&appointment.contact(), TemplateKind::Confirmation, &appointment)
            .await;
        Ok(appointment)
    }

    /// Authoritative conflict check and write, serialized per calendar.
    async fn commit(&self, attempt: &BookingAttempt) -> Result<Appointment, BookingError> {
        let lock = self.commit_lock(&attempt.calendar_id);
        let _guard = lock.lock().await;

        let (start, end) = (attempt.start(), attempt.end());
        let busy = self
            .with_calendar_timeout(self.calendar.query_busy_ranges(&attempt.calendar_id, start, end))
            .await?;
        if busy.iter().any(|b| b.overlaps(start, end)) {
            return Err(BookingError::SlotUnavailable);
        }

        let contact = attempt.visitor.contact();
        let mut metadata = BTreeMap::new();
        metadata.insert("page_id".to_string(), attempt.page_id.clone());
        if let Some(tz) = &attempt.visitor.time_zone {
            metadata.insert("visitor_time_zone".to_string(), tz.clone());
        }
        let request = AppointmentRequest {
            title: attempt.slot.title.clone(),
            datetime_start: start,
            duration_minutes: attempt.bound_duration_minutes,
            attendee_name: contact.name,
            attendee_email: contact.email,
            attendee_phone: contact.phone,
            metadata,
        };
        let id = self
            .with_calendar_timeout(self.calendar.write_appointment(&attempt.calendar_id, &request))
            .await?;
        Ok(Appointment::from_request(id, &attempt.calendar_id, request))
    }

    /// Cancels by confirmation token or by appointment id.
    ///
    /// For confirmed bookings reminders are stopped before the calendar entry
    /// is removed. A failed removal is queued for the sweep.
    pub async fn cancel(
        &self,
        token_or_appointment_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CancelOutcome, BookingError> {
        let (token, appointment) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let token = if state.attempts.contains_key(token_or_appointment_id) {
                token_or_appointment_id.to_string()
            } else {
                state
                    .by_appointment
                    .get(token_or_appointment_id)
                    .cloned()
                    .ok_or(BookingError::TokenNotFound)?
            };
            let record = state
                .attempts
                .get_mut(&token)
                .ok_or(BookingError::TokenNotFound)?;
            match record.attempt.state {
                AttemptState::Reserved if record.confirming => {
                    return Err(BookingError::TokenAlreadyUsed);
                }
                AttemptState::Reserved if now > record.attempt.expires_at => {
                    record.attempt.finish(AttemptState::Expired, now);
                    return Err(BookingError::TokenExpired);
                }
                AttemptState::Reserved => {
                    record.attempt.finish(AttemptState::Cancelled, now);
                    info!("Released reservation for {}", record.attempt.start());
                    return Ok(CancelOutcome {
                        token,
                        appointment_id: None,
                        calendar_cleared: true,
                    });
                }
                AttemptState::Confirmed => {
                    record.attempt.finish(AttemptState::Cancelled, now);
                    (token, record.appointment.clone())
                }
                AttemptState::Expired | AttemptState::Cancelled => {
                    return Err(BookingError::TokenAlreadyUsed);
                }
            }
        };

        let Some(appointment) = appointment else {
            return Ok(CancelOutcome {
                token,
                appointment_id: None,
                calendar_cleared: true,
            });
        };

        self.reminders.on_appointment_cancelled(&appointment.id).await;

        let deleted = self
            .with_calendar_timeout(
                self.calendar
                    .delete_appointment(&appointment.calendar_id, &appointment.id),
            )
            .await;
        let calendar_cleared = match deleted {
            Ok(()) | Err(BookingError::NotFound(_)) => true,
            Err(e) => {
                warn!(
                    "Could not remove appointment {} from calendar, queued: {}",
                    appointment.id, e
                );
                self.lock().pending_deletions.push(PendingDeletion {
                    calendar_id: appointment.calendar_id.clone(),
                    appointment_id: appointment.id.clone(),
                    attempts: 1,
                });
                false
            }
        };

        info!("Cancelled appointment {}", appointment.id);
        self.notify(&appointment.contact(), TemplateKind::Cancellation, &appointment)
            .await;
        Ok(CancelOutcome {
            token,
            appointment_id: Some(appointment.id),
            calendar_cleared,
        })
    }

    fn expire_stale(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.lock();
        let mut expired = 0;
        for record in state.attempts.values_mut() {
            if record.attempt.state == AttemptState::Reserved
                && !record.confirming
                && now > record.attempt.expires_at
            {
                record.attempt.finish(AttemptState::Expired, now);
                expired += 1;
            }
        }
        expired
    }

    /// Expires stale reservations, retries queued calendar deletions and
    /// forgets terminal attempts past the retention period.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport {
            expired: self.expire_stale(now),
            ..SweepReport::default()
        };

        let deletions = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let horizon = now - self.policy.attempt_retention;
            let before = state.attempts.len();
            state.attempts.retain(|_, r| {
                !(r.attempt.state.is_terminal()
                    && r.attempt.finished_at.is_some_and(|t| t < horizon))
            });
            let attempts = &state.attempts;
            state.by_appointment.retain(|_, token| attempts.contains_key(token));
            report.pruned = before - state.attempts.len();
            std::mem::take(&mut state.pending_deletions)
        };

        for mut deletion in deletions {
            report.deletions_retried += 1;
            let result = self
                .with_calendar_timeout(
                    self.calendar
                        .delete_appointment(&deletion.calendar_id, &deletion.appointment_id),
                )
                .await;
            match result {
                Ok(()) | Err(BookingError::NotFound(_)) => {
                    info!("Removed cancelled appointment {}", deletion.appointment_id);
                }
                Err(e) => {
                    deletion.attempts += 1;
                    warn!(
                        "Deletion of {} still failing after {} attempts: {}",
                        deletion.appointment_id, deletion.attempts, e
                    );
                    self.lock().pending_deletions.push(deletion);
                }
            }
        }
        report.deletions_pending = self.lock().pending_deletions.len();
        if report != SweepReport::default() {
            debug!("Booking sweep: {:?}", report);
        }
        report
    }

    pub fn attempt(&self, token: &str) -> Option<BookingAttempt> {
        self.lock().attempts.get(token).map(|r| r.attempt.clone())
    }

    pub fn appointment(&self, appointment_id: &str) -> Option<Appointment> {
        let state = self.lock();
        let token = state.by_appointment.get(appointment_id)?;
        state.attempts.get(token)?.appointment.clone()
    }

    pub fn pending_deletions(&self) -> usize {
        self.lock().pending_deletions.len()
    }

    /// Mails the confirmation link for a reservation (email validation flow).
    pub async fn send_confirmation_link(
        &self,
        reservation: &Reservation,
        visitor: &VisitorFields,
        confirm_url: &str,
    ) -> Result<(), BookingError> {
        let payload = json!({
            "confirm_url": confirm_url,
            "title": reservation.title,
            "start": reservation.datetime_start.to_rfc3339(),
            "duration_minutes": reservation.duration_minutes,
            "expires_at": reservation.expires_at.to_rfc3339(),
            "organization": self.settings.organization(),
        });
        let sent = tokio::time::timeout(
            self.policy.notice_timeout,
            self.notifier
                .send(&visitor.contact(), TemplateKind::ConfirmationLink, payload),
        )
        .await;
        match sent {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(BookingError::Transient(e.to_string())),
            Err(_) => Err(BookingError::Transient(
                "notification service did not answer in time".to_string(),
            )),
        }
    }

    /// Best-effort notice; failures are logged only.
    async fn notify(&self, contact: &AttendeeContact, kind: TemplateKind, appointment: &Appointment) {
        if !self.policy.send_notices {
            return;
        }
        let payload = json!({
            "appointment_id": appointment.id,
            "title": appointment.title,
            "start": appointment.datetime_start.to_rfc3339(),
            "duration_minutes": appointment.duration_minutes,
            "organization": self.settings.organization(),
        });
        match tokio::time::timeout(
            self.policy.notice_timeout,
            self.notifier.send(contact, kind, payload),
        )
        .await
        {
            Ok(Ok(())) => debug!("Sent {:?} notice for {}", kind, appointment.id),
            Ok(Err(e)) => warn!("{:?} notice for {} failed: {}", kind, appointment.id, e),
            Err(_) => warn!("{:?} notice for {} timed out", kind, appointment.id),
        }
    }
}

fn random_bytes() -> [u8; TOKEN_BYTES] {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// 256 bits from the OS generator, base64url encoded.
pub fn mint_token() -> String {
    URL_SAFE_NO_PAD.encode(random_bytes())
}
