#[cfg(test)]
mod tests {
    use crate::logic::{generate_slots, merge_busy_ranges};
    use crate::template::WeeklyTemplate;
    use crate::test_support::{cls, definition, zurich};
    use appointments_common::BusyRange;
    use chrono::Duration;
    use proptest::prelude::*;

    // One template definition as (day, hour, minute, min duration, extra duration)
    fn definition_strategy() -> impl Strategy<Value = (usize, u32, u32, u32, u32)> {
        (0..7usize, 0..24u32, prop::sample::select(vec![0u32, 15, 30, 45]), 5..120u32, 0..60u32)
    }

    fn build_template(definitions: &[(usize, u32, u32, u32, u32)]) -> WeeklyTemplate {
        let mut days: [Vec<_>; 7] = Default::default();
        for (i, (day, hour, minute, min, extra)) in definitions.iter().enumerate() {
            days[*day].push(definition(*hour, *minute, *min, min + extra, &format!("d{}", i)));
        }
        WeeklyTemplate::new(days).unwrap()
    }

    // Busy ranges as (minutes after window start, length in minutes)
    fn build_busy(base: chrono::DateTime<chrono::Utc>, raw: &[(i64, i64)]) -> Vec<BusyRange> {
        raw.iter()
            .map(|(offset, len)| {
                let start = base + Duration::minutes(*offset);
                BusyRange::new(start, start + Duration::minutes(*len))
            })
            .collect()
    }

    proptest! {
        // Generated slots stay inside the window, are sorted and never touch busy time
        #[test]
        fn test_slots_respect_window_order_and_busy_ranges(
            definitions in prop::collection::vec(definition_strategy(), 0..12),
            start_offset_hours in 0..48i64,
            window_hours in 1..(24 * 21i64),
            busy in prop::collection::vec((0..(24 * 60 * 21i64), 1..240i64), 0..20),
        ) {
            let template = build_template(&definitions);
            let window_start = zurich(2025, 5, 5, 0, 0) + Duration::hours(start_offset_hours);
            let window_end = window_start + Duration::hours(window_hours);
            let busy = build_busy(window_start, &busy);

            let slots = generate_slots(&template, &cls(), window_start, window_end, &busy).unwrap();

            for slot in &slots {
                prop_assert!(slot.datetime_start >= window_start);
                prop_assert!(slot.datetime_start < window_end);
                prop_assert!(slot.duration_minutes <= slot.max_duration_minutes);
                for range in &busy {
                    prop_assert!(!range.overlaps(slot.datetime_start, slot.end()));
                }
            }
            for pair in slots.windows(2) {
                prop_assert!(pair[0].datetime_start <= pair[1].datetime_start);
                if pair[0].datetime_start == pair[1].datetime_start {
                    prop_assert!(pair[0].definition_index < pair[1].definition_index);
                }
            }
        }

        // Without busy time every definition yields one candidate per whole week
        #[test]
        fn test_free_calendar_yields_one_slot_per_definition_per_week(
            definitions in prop::collection::vec(definition_strategy(), 0..12),
            weeks in 1..4i64,
        ) {
            let template = build_template(&definitions);
            // Monday midnight to Monday midnight, away from DST transitions
            let window_start = zurich(2025, 5, 5, 0, 0);
            let window_end = window_start + Duration::weeks(weeks);

            let slots = generate_slots(&template, &cls(), window_start, window_end, &[]).unwrap();
            prop_assert_eq!(slots.len(), template.definition_count() * weeks as usize);
        }

        // Merging keeps coverage and leaves disjoint sorted ranges
        #[test]
        fn test_merge_busy_ranges_is_disjoint_and_sorted(
            raw in prop::collection::vec((0..10_000i64, 0..500i64), 0..30),
        ) {
            let base = zurich(2025, 5, 5, 0, 0);
            let busy = build_busy(base, &raw);
            let merged = merge_busy_ranges(&busy);

            for pair in merged.windows(2) {
                prop_assert!(pair[0].end < pair[1].start);
            }
            for range in busy.iter().filter(|r| r.end > r.start) {
                prop_assert!(merged.iter().any(|m| m.start <= range.start && m.end >= range.end));
            }
        }
    }
}
