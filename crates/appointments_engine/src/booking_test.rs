#[cfg(test)]
mod tests {
    use crate::booking::{mint_token, AttemptState, BookingPolicy, VisitorFields};
    use crate::error::BookingError;
    use crate::settings::ReminderSpec;
    use crate::test_support::{cls, harness, visitor, zurich, Harness, CALENDAR, PAGE};
    use appointments_common::{BusyRange, CalendarError, NotificationError, TemplateKind};
    use chrono::{DateTime, Duration, Utc};

    fn now() -> DateTime<Utc> {
        zurich(2025, 5, 1, 12, 0)
    }

    fn monday_nine() -> DateTime<Utc> {
        zurich(2025, 5, 5, 9, 0)
    }

    fn no_holds() -> BookingPolicy {
        BookingPolicy {
            hold_reserved_slots: false,
            ..BookingPolicy::default()
        }
    }

    async fn week_slots(h: &Harness) -> Vec<DateTime<Utc>> {
        h.engine
            .available_slots(PAGE, zurich(2025, 5, 5, 0, 0), zurich(2025, 5, 12, 0, 0), now())
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.datetime_start)
            .collect()
    }

    #[tokio::test]
    async fn test_reserve_then_confirm_commits_to_calendar() {
        let h = harness(BookingPolicy::default());

        let reservation = h
            .engine
            .reserve(PAGE, monday_nine(), None, visitor("Ada"), now())
            .await
            .unwrap();
        assert_eq!(reservation.duration_minutes, 30);
        assert_eq!(reservation.title, "Consultation");
        assert_eq!(reservation.expires_at, now() + Duration::minutes(30));
        assert_eq!(
            h.engine.attempt(&reservation.token).unwrap().state,
            AttemptState::Reserved
        );
        // Nothing is written before confirmation
        assert!(h.calendar.appointments(CALENDAR).is_empty());

        let appointment = h
            .engine
            .confirm(&reservation.token, now() + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(appointment.datetime_start, monday_nine());
        assert_eq!(appointment.duration_minutes, 30);
        assert_eq!(appointment.attendee_email, "ada@example.org");
        assert_eq!(appointment.metadata.get("page_id").map(String::as_str), Some(PAGE));
        assert!(h.calendar.contains(CALENDAR, &appointment.id));

        let attempt = h.engine.attempt(&reservation.token).unwrap();
        assert_eq!(attempt.state, AttemptState::Confirmed);
        assert_eq!(attempt.appointment_id.as_deref(), Some(appointment.id.as_str()));
        assert_eq!(h.engine.appointment(&appointment.id), Some(appointment.clone()));

        let notices = h.sender.sent_of(TemplateKind::Confirmation);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].email, "ada@example.org");
        assert_eq!(notices[0].payload["appointment_id"], appointment.id.as_str());
    }

    #[tokio::test]
    async fn test_token_is_single_use() {
        let h = harness(BookingPolicy::default());
        let reservation = h
            .engine
            .reserve(PAGE, monday_nine(), None, visitor("Ada"), now())
            .await
            .unwrap();

        h.engine.confirm(&reservation.token, now()).await.unwrap();
        let again = h.engine.confirm(&reservation.token, now()).await;
        assert_eq!(again, Err(BookingError::TokenAlreadyUsed));
        assert_eq!(h.calendar.appointments(CALENDAR).len(), 1);
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected_and_stays_expired() {
        let h = harness(BookingPolicy::default());
        let reservation = h
            .engine
            .reserve(PAGE, monday_nine(), None, visitor("Ada"), now())
            .await
            .unwrap();

        let late = reservation.expires_at + Duration::seconds(1);
        assert_eq!(
            h.engine.confirm(&reservation.token, late).await,
            Err(BookingError::TokenExpired)
        );
        assert_eq!(
            h.engine.attempt(&reservation.token).unwrap().state,
            AttemptState::Expired
        );
        assert_eq!(
            h.engine.confirm(&reservation.token, late).await,
            Err(BookingError::TokenExpired)
        );
        assert!(h.calendar.appointments(CALENDAR).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let h = harness(BookingPolicy::default());
        assert_eq!(
            h.engine.confirm("no-such-token", now()).await,
            Err(BookingError::TokenNotFound)
        );
        assert_eq!(
            h.engine.cancel("no-such-token", now()).await,
            Err(BookingError::TokenNotFound)
        );
    }

    #[tokio::test]
    async fn test_live_reservation_hides_slot() {
        let h = harness(BookingPolicy::default());
        assert_eq!(week_slots(&h).await.len(), 3);

        let reservation = h
            .engine
            .reserve(PAGE, monday_nine(), None, visitor("Ada"), now())
            .await
            .unwrap();
        assert!(!week_slots(&h).await.contains(&monday_nine()));
        assert_eq!(
            h.engine.reserve(PAGE, monday_nine(), None, visitor("Bob"), now()).await,
            Err(BookingError::SlotUnavailable)
        );

        // Released holds free the slot again
        h.engine.cancel(&reservation.token, now()).await.unwrap();
        assert!(week_slots(&h).await.contains(&monday_nine()));
        assert!(h
            .engine
            .reserve(PAGE, monday_nine(), None, visitor("Bob"), now())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_expired_hold_no_longer_blocks() {
        let h = harness(BookingPolicy::default());
        h.engine
            .reserve(PAGE, monday_nine(), None, visitor("Ada"), now())
            .await
            .unwrap();

        let later = now() + Duration::hours(1);
        assert!(h
            .engine
            .reserve(PAGE, monday_nine(), None, visitor("Bob"), later)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_confirmed_slot_disappears_from_listing() {
        let h = harness(BookingPolicy::default());
        let reservation = h
            .engine
            .reserve(PAGE, monday_nine(), None, visitor("Ada"), now())
            .await
            .unwrap();
        h.engine.confirm(&reservation.token, now()).await.unwrap();

        let slots = week_slots(&h).await;
        assert_eq!(slots, vec![zurich(2025, 5, 5, 10, 0), zurich(2025, 5, 6, 9, 0)]);
    }

    #[tokio::test]
    async fn test_reserve_rejects_times_not_in_template() {
        let h = harness(BookingPolicy::default());
        let result = h
            .engine
            .reserve(PAGE, zurich(2025, 5, 5, 9, 15), None, visitor("Ada"), now())
            .await;
        assert_eq!(result, Err(BookingError::SlotUnavailable));

        // Wednesday has no definitions
        let result = h
            .engine
            .reserve(PAGE, zurich(2025, 5, 7, 9, 0), None, visitor("Ada"), now())
            .await;
        assert_eq!(result, Err(BookingError::SlotUnavailable));
    }

    #[tokio::test]
    async fn test_reserve_rejects_slot_inside_prep_window() {
        let h = harness(BookingPolicy::default());
        h.engine
            .settings()
            .set_calendar_link(PAGE, cls().with_prep_time(120))
            .unwrap();

        let early = zurich(2025, 5, 5, 8, 0);
        let result = h.engine.reserve(PAGE, monday_nine(), None, visitor("Ada"), early).await;
        assert_eq!(result, Err(BookingError::SlotUnavailable));

        // 10:00 is exactly two hours away
        assert!(h
            .engine
            .reserve(PAGE, zurich(2025, 5, 5, 10, 0), None, visitor("Ada"), early)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_reserve_rejects_busy_calendar() {
        let h = harness(BookingPolicy::default());
        h.calendar.add_busy(
            CALENDAR,
            BusyRange::new(zurich(2025, 5, 5, 9, 15), zurich(2025, 5, 5, 9, 45)),
        );
        let result = h.engine.reserve(PAGE, monday_nine(), None, visitor("Ada"), now()).await;
        assert_eq!(result, Err(BookingError::SlotUnavailable));
    }

    #[tokio::test]
    async fn test_reserve_validates_visitor() {
        let h = harness(BookingPolicy::default());
        let nameless = VisitorFields {
            name: " ".to_string(),
            ..visitor("Ada")
        };
        let bad_email = VisitorFields {
            email: "ada-at-example".to_string(),
            ..visitor("Ada")
        };
        for fields in [nameless, bad_email] {
            let result = h.engine.reserve(PAGE, monday_nine(), None, fields, now()).await;
            assert!(matches!(result, Err(BookingError::Validation(_))));
        }
        assert!(matches!(
            h.engine.reserve("unknown", monday_nine(), None, visitor("Ada"), now()).await,
            Err(BookingError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_requested_duration_within_range() {
        let h = harness(BookingPolicy::default());
        let ten = zurich(2025, 5, 5, 10, 0);

        let reservation = h
            .engine
            .reserve(PAGE, ten, Some(45), visitor("Ada"), now())
            .await
            .unwrap();
        assert_eq!(reservation.duration_minutes, 45);
        let appointment = h.engine.confirm(&reservation.token, now()).await.unwrap();
        assert_eq!(appointment.end(), zurich(2025, 5, 5, 10, 45));

        let result = h.engine.reserve(PAGE, ten, Some(60), visitor("Bob"), now()).await;
        assert!(matches!(result, Err(BookingError::Validation(_))));
    }

    #[tokio::test]
    async fn test_lost_race_cancels_the_later_attempt() {
        let h = harness(no_holds());
        let ada = h
            .engine
            .reserve(PAGE, monday_nine(), None, visitor("Ada"), now())
            .await
            .unwrap();
        let bob = h
            .engine
            .reserve(PAGE, monday_nine(), None, visitor("Bob"), now())
            .await
            .unwrap();

        h.engine.confirm(&ada.token, now()).await.unwrap();
        assert_eq!(
            h.engine.confirm(&bob.token, now()).await,
            Err(BookingError::SlotUnavailable)
        );
        assert_eq!(h.engine.attempt(&bob.token).unwrap().state, AttemptState::Cancelled);
        assert_eq!(
            h.engine.confirm(&bob.token, now()).await,
            Err(BookingError::TokenAlreadyUsed)
        );
        assert_eq!(h.calendar.appointments(CALENDAR).len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_confirms_commit_once() {
        let h = harness(no_holds());
        let ada = h
            .engine
            .reserve(PAGE, monday_nine(), None, visitor("Ada"), now())
            .await
            .unwrap();
        let bob = h
            .engine
            .reserve(PAGE, monday_nine(), None, visitor("Bob"), now())
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            h.engine.confirm(&ada.token, now()),
            h.engine.confirm(&bob.token, now())
        );
        let successes = [first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(successes, 1);
        assert_eq!(h.calendar.appointments(CALENDAR).len(), 1);
    }

    #[tokio::test]
    async fn test_transient_calendar_failure_keeps_reservation() {
        let h = harness(BookingPolicy::default());
        let reservation = h
            .engine
            .reserve(PAGE, monday_nine(), None, visitor("Ada"), now())
            .await
            .unwrap();

        h.calendar
            .set_failure(Some(CalendarError::Transient("backend down".to_string())));
        let result = h.engine.confirm(&reservation.token, now()).await;
        assert!(matches!(result, Err(BookingError::Transient(_))));
        assert_eq!(
            h.engine.attempt(&reservation.token).unwrap().state,
            AttemptState::Reserved
        );

        h.calendar.set_failure(None);
        assert!(h.engine.confirm(&reservation.token, now()).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_confirmed_removes_entry_and_reminders() {
        let h = harness(BookingPolicy::default());
        let spec = ReminderSpec::from_json(r#"{"data":[{"seconds":"86400"}]}"#).unwrap();
        h.engine.settings().set_reminder_spec(Some(PAGE), spec).unwrap();

        let reservation = h
            .engine
            .reserve(PAGE, monday_nine(), None, visitor("Ada"), now())
            .await
            .unwrap();
        let appointment = h.engine.confirm(&reservation.token, now()).await.unwrap();
        assert_eq!(h.engine.reminders().dispatches(&appointment.id).len(), 1);

        let outcome = h.engine.cancel(&reservation.token, now()).await.unwrap();
        assert_eq!(outcome.appointment_id.as_deref(), Some(appointment.id.as_str()));
        assert!(outcome.calendar_cleared);
        assert!(!h.calendar.contains(CALENDAR, &appointment.id));
        assert!(h.engine.reminders().dispatches(&appointment.id).is_empty());
        assert_eq!(
            h.engine.attempt(&reservation.token).unwrap().state,
            AttemptState::Cancelled
        );
        assert_eq!(h.sender.sent_of(TemplateKind::Cancellation).len(), 1);

        // Nothing fires at the old reminder time
        h.engine.reminders().tick(zurich(2025, 5, 4, 9, 0)).await;
        assert!(h.sender.sent_of(TemplateKind::Reminder).is_empty());

        assert_eq!(
            h.engine.cancel(&reservation.token, now()).await,
            Err(BookingError::TokenAlreadyUsed)
        );
    }

    #[tokio::test]
    async fn test_cancel_by_appointment_id() {
        let h = harness(BookingPolicy::default());
        let reservation = h
            .engine
            .reserve(PAGE, monday_nine(), None, visitor("Ada"), now())
            .await
            .unwrap();
        let appointment = h.engine.confirm(&reservation.token, now()).await.unwrap();

        let outcome = h.engine.cancel(&appointment.id, now()).await.unwrap();
        assert_eq!(outcome.token, reservation.token);
        assert!(h.calendar.appointments(CALENDAR).is_empty());
    }

    #[tokio::test]
    async fn test_cancel_reserved_and_expired() {
        let h = harness(BookingPolicy::default());
        let reservation = h
            .engine
            .reserve(PAGE, monday_nine(), None, visitor("Ada"), now())
            .await
            .unwrap();
        let outcome = h.engine.cancel(&reservation.token, now()).await.unwrap();
        assert_eq!(outcome.appointment_id, None);
        assert!(outcome.calendar_cleared);
        assert_eq!(
            h.engine.confirm(&reservation.token, now()).await,
            Err(BookingError::TokenAlreadyUsed)
        );

        let stale = h
            .engine
            .reserve(PAGE, monday_nine(), None, visitor("Bob"), now())
            .await
            .unwrap();
        assert_eq!(
            h.engine.cancel(&stale.token, stale.expires_at + Duration::seconds(1)).await,
            Err(BookingError::TokenExpired)
        );
    }

    #[tokio::test]
    async fn test_failed_deletion_is_retried_by_sweep() {
        let h = harness(BookingPolicy::default());
        let reservation = h
            .engine
            .reserve(PAGE, monday_nine(), None, visitor("Ada"), now())
            .await
            .unwrap();
        let appointment = h.engine.confirm(&reservation.token, now()).await.unwrap();

        h.calendar
            .set_failure(Some(CalendarError::Transient("backend down".to_string())));
        let outcome = h.engine.cancel(&reservation.token, now()).await.unwrap();
        assert!(!outcome.calendar_cleared);
        assert_eq!(h.engine.pending_deletions(), 1);

        let report = h.engine.sweep(now()).await;
        assert_eq!(report.deletions_retried, 1);
        assert_eq!(report.deletions_pending, 1);

        h.calendar.set_failure(None);
        let report = h.engine.sweep(now()).await;
        assert_eq!(report.deletions_retried, 1);
        assert_eq!(report.deletions_pending, 0);
        assert!(!h.calendar.contains(CALENDAR, &appointment.id));
    }

    #[tokio::test]
    async fn test_sweep_expires_then_prunes() {
        let h = harness(BookingPolicy::default());
        let reservation = h
            .engine
            .reserve(PAGE, monday_nine(), None, visitor("Ada"), now())
            .await
            .unwrap();

        let expired_at = reservation.expires_at + Duration::seconds(1);
        let report = h.engine.sweep(expired_at).await;
        assert_eq!(report.expired, 1);
        assert_eq!(report.pruned, 0);
        assert_eq!(
            h.engine.attempt(&reservation.token).unwrap().state,
            AttemptState::Expired
        );

        let report = h.engine.sweep(expired_at + Duration::hours(25)).await;
        assert_eq!(report.pruned, 1);
        assert!(h.engine.attempt(&reservation.token).is_none());
        assert_eq!(
            h.engine.confirm(&reservation.token, expired_at).await,
            Err(BookingError::TokenNotFound)
        );
    }

    #[tokio::test]
    async fn test_confirm_link_checks_signature_and_page() {
        let h = harness(BookingPolicy::default());
        let reservation = h
            .engine
            .reserve(PAGE, monday_nine(), None, visitor("Ada"), now())
            .await
            .unwrap();

        assert_eq!(
            h.engine
                .confirm_link(PAGE, &reservation.token, "not-a-signature", now())
                .await,
            Err(BookingError::TokenNotFound)
        );
        let other_page = h.engine.sign_link(&reservation.token, "p1").unwrap();
        assert_eq!(
            h.engine
                .confirm_link("p1", &reservation.token, &other_page, now())
                .await,
            Err(BookingError::TokenNotFound)
        );
        assert_eq!(
            h.engine.attempt(&reservation.token).unwrap().state,
            AttemptState::Reserved
        );

        assert!(h
            .engine
            .confirm_link(PAGE, &reservation.token, &reservation.link_blob, now())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_notice_failure_does_not_undo_confirmation() {
        let h = harness(BookingPolicy::default());
        h.sender
            .fail_next(NotificationError::Transient("smtp down".to_string()));
        let reservation = h
            .engine
            .reserve(PAGE, monday_nine(), None, visitor("Ada"), now())
            .await
            .unwrap();

        assert!(h.engine.confirm(&reservation.token, now()).await.is_ok());
        assert_eq!(h.sender.calls(), 1);
        assert!(h.sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_notices_can_be_disabled() {
        let h = harness(BookingPolicy {
            send_notices: false,
            ..BookingPolicy::default()
        });
        let reservation = h
            .engine
            .reserve(PAGE, monday_nine(), None, visitor("Ada"), now())
            .await
            .unwrap();
        h.engine.confirm(&reservation.token, now()).await.unwrap();
        h.engine.cancel(&reservation.token, now()).await.unwrap();
        assert_eq!(h.sender.calls(), 0);
    }

    #[tokio::test]
    async fn test_confirmation_link_notice() {
        let h = harness(BookingPolicy::default());
        let reservation = h
            .engine
            .reserve(PAGE, monday_nine(), None, visitor("Ada"), now())
            .await
            .unwrap();

        h.engine
            .send_confirmation_link(&reservation, &visitor("Ada"), "https://book.example.org/c")
            .await
            .unwrap();
        let sent = h.sender.sent_of(TemplateKind::ConfirmationLink);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload["confirm_url"], "https://book.example.org/c");

        h.sender
            .fail_next(NotificationError::Permanent("mailbox unknown".to_string()));
        let result = h
            .engine
            .send_confirmation_link(&reservation, &visitor("Ada"), "https://book.example.org/c")
            .await;
        assert!(matches!(result, Err(BookingError::Transient(_))));
    }

    #[tokio::test]
    async fn test_token_is_still_valid_at_its_expiry_instant() {
        let h = harness(BookingPolicy::default());
        let reservation = h
            .engine
            .reserve(PAGE, monday_nine(), None, visitor("Ada"), now())
            .await
            .unwrap();

        // The sweep at the expiry instant leaves the hold alone
        let report = h.engine.sweep(reservation.expires_at).await;
        assert_eq!(report.expired, 0);
        assert_eq!(
            h.engine.reserve(PAGE, monday_nine(), None, visitor("Bob"), reservation.expires_at).await,
            Err(BookingError::SlotUnavailable)
        );

        let appointment = h
            .engine
            .confirm(&reservation.token, reservation.expires_at)
            .await
            .unwrap();
        assert_eq!(appointment.datetime_start, monday_nine());
        assert_eq!(
            h.engine.attempt(&reservation.token).unwrap().state,
            AttemptState::Confirmed
        );
    }

    #[tokio::test]
    async fn test_other_slot_can_be_booked_while_one_is_reserved() {
        let h = harness(BookingPolicy::default());
        let tuesday_nine = zurich(2025, 5, 6, 9, 0);

        let first = h
            .engine
            .reserve(PAGE, monday_nine(), None, visitor("Ada"), now())
            .await
            .unwrap();
        let second = h
            .engine
            .reserve(PAGE, tuesday_nine, None, visitor("Bob"), now())
            .await
            .unwrap();
        let bob = h.engine.confirm(&second.token, now()).await.unwrap();
        assert_eq!(bob.datetime_start, tuesday_nine);
        assert_eq!(
            h.engine.attempt(&first.token).unwrap().state,
            AttemptState::Reserved
        );

        let ada = h
            .engine
            .confirm(&first.token, now() + Duration::minutes(10))
            .await
            .unwrap();
        assert_eq!(ada.datetime_start, monday_nine());
        assert_eq!(h.calendar.appointments(CALENDAR).len(), 2);
    }

    #[tokio::test]
    async fn test_reminders_exist_as_soon_as_confirm_returns() {
        let h = harness(BookingPolicy::default());
        let spec = ReminderSpec::from_json(r#"{"data":[{"seconds":"3600"}]}"#).unwrap();
        h.engine.settings().set_reminder_spec(Some(PAGE), spec).unwrap();
        // Confirmation notice fails; reminders are in place regardless
        h.sender
            .fail_next(NotificationError::Transient("smtp down".to_string()));

        let reservation = h
            .engine
            .reserve(PAGE, monday_nine(), None, visitor("Ada"), now())
            .await
            .unwrap();
        let appointment = h.engine.confirm(&reservation.token, now()).await.unwrap();
        assert_eq!(h.engine.reminders().dispatches(&appointment.id).len(), 1);
        assert_eq!(h.engine.reminders().queued_registrations(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancel_racing_confirm_never_leaves_reminders() {
        for _ in 0..200 {
            let h = harness(BookingPolicy::default());
            let spec = ReminderSpec::from_json(r#"{"data":[{"seconds":"3600"}]}"#).unwrap();
            h.engine.settings().set_reminder_spec(Some(PAGE), spec).unwrap();
            let reservation = h
                .engine
                .reserve(PAGE, monday_nine(), None, visitor("Ada"), now())
                .await
                .unwrap();

            let confirming = tokio::spawn({
                let engine = h.engine.clone();
                let token = reservation.token.clone();
                async move { engine.confirm(&token, now()).await }
            });
            // A cancel during the calendar write is refused; keep trying until it lands
            loop {
                match h.engine.cancel(&reservation.token, now()).await {
                    Err(BookingError::TokenAlreadyUsed) => tokio::task::yield_now().await,
                    _ => break,
                }
            }
            let _ = confirming.await.unwrap();

            h.engine.reminders().tick(zurich(2025, 5, 5, 8, 0)).await;
            assert!(h.sender.sent_of(TemplateKind::Reminder).is_empty());
            assert!(h.calendar.appointments(CALENDAR).is_empty());
        }
    }

    #[test]
    fn test_tokens_are_unique_and_url_safe() {
        let a = mint_token();
        let b = mint_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
