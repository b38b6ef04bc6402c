// --- File: crates/appointments_engine/src/reminders.rs ---
//! Reminder scheduling for confirmed appointments.
//!
//! Each appointment gets one dispatch per configured lead time. `tick` claims
//! due dispatches under the bookkeeping lock (so overlapping ticks never claim
//! the same dispatch twice) and sends them while holding the appointment's gate
//! for reading. Cancellation takes the gate for writing, which waits for sends
//! already underway and blocks any later one; after it returns nothing more is
//! sent for that appointment.

use appointments_common::{Appointment, AttendeeContact, NotificationError, NotificationSender, TemplateKind};
use appointments_config::ReminderConfig;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::BookingError;
use crate::settings::{ReminderOffset, ReminderSpec};

/// Finished appointments are forgotten this long after they end.
const HISTORY_RETENTION_HOURS: i64 = 24;

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Pending,
    /// Claimed by a tick and being sent.
    InFlight,
    Sent,
    /// Fire time was already past when the dispatch was computed.
    Elapsed,
    /// Rejected permanently by the sender.
    Failed,
    /// Gave up after too many transient failures.
    Abandoned,
}

impl DispatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DispatchStatus::Sent
                | DispatchStatus::Elapsed
                | DispatchStatus::Failed
                | DispatchStatus::Abandoned
        )
    }
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReminderDispatch {
    pub appointment_id: String,
    pub lead_seconds: u64,
    pub include_actions: bool,
    pub fire_at: DateTime<Utc>,
    pub status: DispatchStatus,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl ReminderDispatch {
    fn new(appointment: &Appointment, offset: &ReminderOffset, now: DateTime<Utc>) -> Self {
        let fire_at = appointment.datetime_start - Duration::seconds(offset.lead_seconds as i64);
        let status = if fire_at <= now {
            DispatchStatus::Elapsed
        } else {
            DispatchStatus::Pending
        };
        Self {
            appointment_id: appointment.id.clone(),
            lead_seconds: offset.lead_seconds,
            include_actions: offset.include_actions,
            fire_at,
            status,
            attempts: 0,
            next_attempt_at: fire_at,
            sent_at: None,
        }
    }

    pub fn sent(&self) -> bool {
        self.status == DispatchStatus::Sent
    }
}

/// Retry and timeout behaviour for reminder delivery.
#[derive(Debug, Clone)]
pub struct ReminderPolicy {
    pub max_attempts: u32,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub send_timeout: std::time::Duration,
}

impl Default for ReminderPolicy {
    fn default() -> Self {
        ReminderPolicy::from(&ReminderConfig::default())
    }
}

impl From<&ReminderConfig> for ReminderPolicy {
    fn from(config: &ReminderConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            retry_base: Duration::seconds(config.retry_base_seconds as i64),
            retry_max: Duration::seconds(config.retry_max_seconds as i64),
            send_timeout: std::time::Duration::from_millis(config.send_timeout_ms),
        }
    }
}

impl ReminderPolicy {
    /// Delay before retry number `attempts` (1-based): base * 2^(attempts-1), capped.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(20);
        let delay = self.retry_base * (1i32 << exponent);
        delay.min(self.retry_max)
    }
}

/// What one `tick` did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub sent: usize,
    pub retry_scheduled: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub elapsed: usize,
    /// Claimed dispatches dropped because the appointment changed meanwhile.
    pub skipped: usize,
    pub registrations_recovered: usize,
}

struct Tracked {
    appointment: Appointment,
    spec: ReminderSpec,
    generation: u64,
    cancelled: bool,
    gate: Arc<RwLock<()>>,
    dispatches: Vec<ReminderDispatch>,
}

struct QueuedRegistration {
    appointment: Appointment,
    spec: ReminderSpec,
    attempts: u32,
}

#[derive(Default)]
struct SchedulerState {
    tracked: HashMap<String, Tracked>,
    queued: Vec<QueuedRegistration>,
    /// Cancelled before any reminder was registered; later registrations are refused.
    cancelled_early: HashSet<String>,
}

struct Claim {
    appointment_id: String,
    lead_seconds: u64,
    generation: u64,
    gate: Arc<RwLock<()>>,
    contact: AttendeeContact,
    payload: Value,
}

enum SendOutcome {
    Sent,
    Transient(String),
    Permanent(String),
}

pub struct ReminderScheduler {
    sender: Arc<dyn NotificationSender>,
    policy: ReminderPolicy,
    state: Mutex<SchedulerState>,
}

impl ReminderScheduler {
    pub fn new(sender: Arc<dyn NotificationSender>, policy: ReminderPolicy) -> Self {
        Self {
            sender,
            policy,
            state: Mutex::new(SchedulerState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates the dispatches for a newly confirmed appointment.
    ///
    /// Lead times whose fire time has already passed are recorded as `Elapsed`.
    /// Registering the same appointment again replaces its unsent dispatches;
    /// while one of its reminders is being sent that fails with `Transient`.
    pub fn on_appointment_confirmed(
        &self,
        appointment: &Appointment,
        spec: &ReminderSpec,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReminderDispatch>, BookingError> {
        self.install(appointment, spec, now, false)
    }

    fn install(
        &self,
        appointment: &Appointment,
        spec: &ReminderSpec,
        now: DateTime<Utc>,
        gate_held: bool,
    ) -> Result<Vec<ReminderDispatch>, BookingError> {
        spec.validate()?;
        let dispatches: Vec<ReminderDispatch> = spec
            .offsets()
            .iter()
            .map(|offset| ReminderDispatch::new(appointment, offset, now))
            .collect();

        let mut state = self.lock();
        if state.cancelled_early.contains(&appointment.id) {
            return Err(BookingError::Validation(format!(
                "appointment {} was cancelled",
                appointment.id
            )));
        }
        if !gate_held {
            let sending = state
                .tracked
                .get(&appointment.id)
                .is_some_and(|t| !t.cancelled && t.gate.try_write().is_err());
            if sending {
                return Err(BookingError::Transient(format!(
                    "a reminder for appointment {} is being sent",
                    appointment.id
                )));
            }
        }
        let tracked = state
            .tracked
            .entry(appointment.id.clone())
            .or_insert_with(|| Tracked {
                appointment: appointment.clone(),
                spec: spec.clone(),
                generation: 0,
                cancelled: false,
                gate: Arc::new(RwLock::new(())),
                dispatches: Vec::new(),
            });
        if tracked.cancelled {
            return Err(BookingError::Validation(format!(
                "appointment {} was cancelled",
                appointment.id
            )));
        }
        tracked.generation += 1;
        tracked.appointment = appointment.clone();
        tracked.spec = spec.clone();
        tracked.dispatches.retain(ReminderDispatch::sent);
        tracked.dispatches.extend(dispatches.iter().cloned());

        info!(
            "Registered {} reminder(s) for appointment {}",
            dispatches.len(),
            appointment.id
        );
        Ok(dispatches)
    }

    /// Registers reminders, queueing the registration for retry on failure.
    ///
    /// Used right after a calendar commit, where the appointment must stand
    /// even if its reminders cannot be set up yet.
    pub fn register_or_queue(&self, appointment: &Appointment, spec: &ReminderSpec, now: DateTime<Utc>) {
        if let Err(e) = self.on_appointment_confirmed(appointment, spec, now) {
            warn!(
                "Reminder registration for {} failed, queued for retry: {}",
                appointment.id, e
            );
            self.lock().queued.push(QueuedRegistration {
                appointment: appointment.clone(),
                spec: spec.clone(),
                attempts: 1,
            });
        }
    }

    /// Stops all unsent reminders of an appointment.
    ///
    /// Waits for sends already underway. Sent dispatches remain as history.
    pub async fn on_appointment_cancelled(&self, appointment_id: &str) {
        let gate = {
            let mut state = self.lock();
            state.queued.retain(|q| q.appointment.id != appointment_id);
            match state.tracked.get_mut(appointment_id) {
                Some(tracked) => {
                    tracked.cancelled = true;
                    tracked.generation += 1;
                    tracked.gate.clone()
                }
                None => {
                    state.cancelled_early.insert(appointment_id.to_string());
                    info!(
                        "Cancelled appointment {} before its reminders were registered",
                        appointment_id
                    );
                    return;
                }
            }
        };

        let _exclusive = gate.write().await;
        let mut state = self.lock();
        if let Some(tracked) = state.tracked.get_mut(appointment_id) {
            tracked.dispatches.retain(ReminderDispatch::sent);
        }
        info!("Cancelled reminders for appointment {}", appointment_id);
    }

    /// Recomputes reminders after an appointment moved.
    pub async fn on_appointment_rescheduled(
        &self,
        appointment: &Appointment,
        spec: &ReminderSpec,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReminderDispatch>, BookingError> {
        spec.validate()?;
        let gate = {
            let mut state = self.lock();
            match state.tracked.get_mut(&appointment.id) {
                Some(tracked) if tracked.cancelled => {
                    return Err(BookingError::Validation(format!(
                        "appointment {} was cancelled",
                        appointment.id
                    )));
                }
                Some(tracked) => {
                    tracked.generation += 1;
                    Some(tracked.gate.clone())
                }
                None => None,
            }
        };
        // Wait out sends for the old time before replacing the schedule
        let _exclusive = match &gate {
            Some(gate) => Some(gate.write().await),
            None => None,
        };
        self.install(appointment, spec, now, gate.is_some())
    }

    /// Snapshot of an appointment's dispatches.
    pub fn dispatches(&self, appointment_id: &str) -> Vec<ReminderDispatch> {
        self.lock()
            .tracked
            .get(appointment_id)
            .map(|t| t.dispatches.clone())
            .unwrap_or_default()
    }

    pub fn queued_registrations(&self) -> usize {
        self.lock().queued.len()
    }

    /// Fires every due reminder once.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        self.retry_registrations(now, &mut report);

        let claims = self.claim_due(now, &mut report);
        if !claims.is_empty() {
            debug!("Reminder tick at {} claimed {} dispatch(es)", now, claims.len());
        }
        for claim in claims {
            self.deliver(claim, now, &mut report).await;
        }

        self.prune(now);
        report
    }

    fn retry_registrations(&self, now: DateTime<Utc>, report: &mut TickReport) {
        let queued = std::mem::take(&mut self.lock().queued);
        for mut item in queued {
            match self.on_appointment_confirmed(&item.appointment, &item.spec, now) {
                Ok(_) => report.registrations_recovered += 1,
                Err(e) if item.attempts + 1 >= self.policy.max_attempts => {
                    error!(
                        "Giving up on reminders for appointment {}: {}",
                        item.appointment.id, e
                    );
                }
                Err(e) => {
                    debug!("Reminder registration retry failed: {}", e);
                    item.attempts += 1;
                    self.lock().queued.push(item);
                }
            }
        }
    }

    fn claim_due(&self, now: DateTime<Utc>, report: &mut TickReport) -> Vec<Claim> {
        let mut state = self.lock();
        let mut claims = Vec::new();
        for tracked in state.tracked.values_mut() {
            if tracked.cancelled {
                continue;
            }
            let appointment = &tracked.appointment;
            for dispatch in tracked.dispatches.iter_mut() {
                if dispatch.status != DispatchStatus::Pending || dispatch.next_attempt_at > now {
                    continue;
                }
                // Too late to be useful once the appointment has begun
                if now >= appointment.datetime_start {
                    dispatch.status = DispatchStatus::Elapsed;
                    report.elapsed += 1;
                    continue;
                }
                dispatch.status = DispatchStatus::InFlight;
                claims.push(Claim {
                    appointment_id: appointment.id.clone(),
                    lead_seconds: dispatch.lead_seconds,
                    generation: tracked.generation,
                    gate: tracked.gate.clone(),
                    contact: appointment.contact(),
                    payload: reminder_payload(appointment, dispatch, &tracked.spec),
                });
            }
        }
        claims
    }

    fn still_current(&self, claim: &Claim) -> bool {
        let state = self.lock();
        state.tracked.get(&claim.appointment_id).is_some_and(|t| {
            !t.cancelled
                && t.generation == claim.generation
                && t.dispatches.iter().any(|d| {
                    d.lead_seconds == claim.lead_seconds && d.status == DispatchStatus::InFlight
                })
        })
    }

    async fn deliver(&self, claim: Claim, now: DateTime<Utc>, report: &mut TickReport) {
        let gate = claim.gate.clone();
        let _shared = gate.read().await;
        if !self.still_current(&claim) {
            report.skipped += 1;
            return;
        }

        let outcome = match tokio::time::timeout(
            self.policy.send_timeout,
            self.sender
                .send(&claim.contact, TemplateKind::Reminder, claim.payload.clone()),
        )
        .await
        {
            Ok(Ok(())) => SendOutcome::Sent,
            Ok(Err(NotificationError::Transient(msg))) => SendOutcome::Transient(msg),
            Ok(Err(NotificationError::Permanent(msg))) => SendOutcome::Permanent(msg),
            Err(_) => SendOutcome::Transient("send timed out".to_string()),
        };

        let mut state = self.lock();
        let Some(dispatch) = state
            .tracked
            .get_mut(&claim.appointment_id)
            .and_then(|t| {
                t.dispatches
                    .iter_mut()
                    .find(|d| d.lead_seconds == claim.lead_seconds && d.status == DispatchStatus::InFlight)
            })
        else {
            return;
        };

        match outcome {
            SendOutcome::Sent => {
                dispatch.status = DispatchStatus::Sent;
                dispatch.attempts += 1;
                dispatch.sent_at = Some(now);
                report.sent += 1;
                info!(
                    "Sent {}s reminder for appointment {}",
                    claim.lead_seconds, claim.appointment_id
                );
            }
            SendOutcome::Transient(msg) => {
                dispatch.attempts += 1;
                if dispatch.attempts >= self.policy.max_attempts {
                    dispatch.status = DispatchStatus::Abandoned;
                    report.abandoned += 1;
                    error!(
                        "Abandoning {}s reminder for appointment {} after {} attempts: {}",
                        claim.lead_seconds, claim.appointment_id, dispatch.attempts, msg
                    );
                } else {
                    dispatch.status = DispatchStatus::Pending;
                    dispatch.next_attempt_at = now + self.policy.backoff(dispatch.attempts);
                    report.retry_scheduled += 1;
                    warn!(
                        "Reminder for {} failed ({}), retrying at {}",
                        claim.appointment_id, msg, dispatch.next_attempt_at
                    );
                }
            }
            SendOutcome::Permanent(msg) => {
                dispatch.attempts += 1;
                dispatch.status = DispatchStatus::Failed;
                report.failed += 1;
                error!(
                    "Reminder for appointment {} rejected: {}",
                    claim.appointment_id, msg
                );
            }
        }
    }

    fn prune(&self, now: DateTime<Utc>) {
        let horizon = now - Duration::hours(HISTORY_RETENTION_HOURS);
        self.lock().tracked.retain(|_, t| {
            let finished = t.appointment.end() < horizon
                && t.dispatches.iter().all(|d| d.status.is_terminal());
            !finished
        });
    }
}

fn reminder_payload(appointment: &Appointment, dispatch: &ReminderDispatch, spec: &ReminderSpec) -> Value {
    json!({
        "appointment_id": appointment.id,
        "title": appointment.title,
        "start": appointment.datetime_start.to_rfc3339(),
        "duration_minutes": appointment.duration_minutes,
        "lead_seconds": dispatch.lead_seconds,
        "include_actions": dispatch.include_actions,
        "more_text": spec.more_text(),
    })
}
