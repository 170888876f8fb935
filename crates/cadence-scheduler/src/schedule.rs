use std::sync::Arc;

use cadence_core::types::DEFAULT_DAILY_TIME;
use cadence_core::{JitterSpec, ScheduleSpec};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::{
    clock::{next_occurrence, validate_expression},
    error::{Result, SchedulerError},
    random::RandomSource,
    types::{NextRun, ResolvedTrigger, TriggerSource, NON_DAILY_LABEL},
};

const MINUTES_PER_DAY: i64 = 24 * 60;

/// Turns a `ScheduleSpec` into a concrete daily trigger, drawing a fresh
/// jitter offset on every call.
pub struct ScheduleResolver {
    random: Arc<dyn RandomSource>,
}

impl ScheduleResolver {
    pub fn new(random: Arc<dyn RandomSource>) -> Self {
        Self { random }
    }

    /// Resolve `spec` into a validated trigger.
    ///
    /// `daily_time` always wins over `legacy_expression`; a malformed
    /// `daily_time` is an error even when a legacy expression is present.
    pub fn resolve(&self, spec: &ScheduleSpec) -> Result<ResolvedTrigger> {
        let trigger = match (&spec.daily_time, &spec.legacy_expression) {
            (Some(time), _) => {
                let (hour, minute) = parse_daily_time(time)?;
                self.daily_trigger(hour, minute, &spec.jitter, TriggerSource::DailyTime)
            }
            (None, Some(expression)) => legacy_trigger(expression),
            (None, None) => {
                let (hour, minute) = parse_daily_time(DEFAULT_DAILY_TIME)?;
                self.daily_trigger(hour, minute, &spec.jitter, TriggerSource::DefaultTime)
            }
        };

        validate_expression(&trigger.expression)?;
        debug!(
            expression = %trigger.expression,
            display_time = %trigger.display_time,
            offset_min = trigger.applied_offset_minutes,
            "schedule resolved"
        );
        Ok(trigger)
    }

    fn daily_trigger(
        &self,
        hour: u32,
        minute: u32,
        jitter: &JitterSpec,
        source: TriggerSource,
    ) -> ResolvedTrigger {
        let offset = if jitter.is_active() {
            self.random.int_in(
                -i64::from(jitter.min_minutes_before),
                i64::from(jitter.max_minutes_after),
            )
        } else {
            0
        };
        let (fire_hour, fire_minute) = shift_minutes(hour, minute, offset);

        ResolvedTrigger {
            expression: format!("{fire_minute} {fire_hour} * * *"),
            display_time: format!("{hour:02}:{minute:02}"),
            applied_offset_minutes: offset,
            source,
        }
    }
}

fn legacy_trigger(expression: &str) -> ResolvedTrigger {
    let display_time = crate::types::literal_time(expression)
        .map(|(hour, minute)| format!("{hour:02}:{minute:02}"))
        .unwrap_or_else(|| NON_DAILY_LABEL.to_string());

    ResolvedTrigger {
        expression: expression.to_string(),
        display_time,
        applied_offset_minutes: 0,
        source: TriggerSource::Legacy,
    }
}

/// Parse a strict `HH:MM` (two digits each, hour 0-23, minute 0-59).
pub fn parse_daily_time(time: &str) -> Result<(u32, u32)> {
    let invalid = || SchedulerError::InvalidScheduleFormat(format!("expected HH:MM, got {time:?}"));

    let (h, m) = time.split_once(':').ok_or_else(invalid)?;
    let two_digits = |s: &str| s.len() == 2 && s.bytes().all(|b| b.is_ascii_digit());
    if !two_digits(h) || !two_digits(m) {
        return Err(invalid());
    }
    let hour: u32 = h.parse().map_err(|_| invalid())?;
    let minute: u32 = m.parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok((hour, minute))
}

/// Add `offset` minutes to `hour:minute`, wrapping around midnight.
pub fn shift_minutes(hour: u32, minute: u32, offset: i64) -> (u32, u32) {
    let base = i64::from(hour) * 60 + i64::from(minute);
    let total = (base + offset).rem_euclid(MINUTES_PER_DAY);
    // total is within [0, 1440) so both parts fit in u32
    ((total / 60) as u32, (total % 60) as u32)
}

/// Next-run estimate for a status snapshot.
///
/// Evaluated with the same cron schedule and `not_before` rule the trigger
/// clock uses. Expressions that are not a literal time of day are reported
/// as undetermined.
pub fn estimate_next_run(
    trigger: &ResolvedTrigger,
    tz: &Tz,
    not_before: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> NextRun {
    if trigger.literal_time().is_none() {
        return NextRun::Undetermined;
    }
    validate_expression(&trigger.expression)
        .ok()
        .and_then(|schedule| next_occurrence(&schedule, tz, not_before, now))
        .map_or(NextRun::Undetermined, |at| NextRun::At { at })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::{FixedRandom, SeededRandom};
    use chrono::TimeZone;

    fn resolver(offset: i64) -> ScheduleResolver {
        ScheduleResolver::new(Arc::new(FixedRandom::new(offset, 0.0)))
    }

    #[test]
    fn plain_daily_time_has_no_offset() {
        for time in ["00:00", "09:00", "12:34", "23:59"] {
            let trigger = resolver(17).resolve(&ScheduleSpec::daily(time)).unwrap();
            assert_eq!(trigger.applied_offset_minutes, 0);
            assert_eq!(trigger.display_time, time);
            assert_eq!(trigger.source, TriggerSource::DailyTime);
        }
    }

    #[test]
    fn jittered_time_keeps_unjittered_label() {
        let spec = ScheduleSpec::daily("09:00").with_jitter(20, 30);
        let trigger = resolver(15).resolve(&spec).unwrap();

        assert_eq!(trigger.expression, "15 9 * * *");
        assert_eq!(trigger.display_time, "09:00");
        assert_eq!(trigger.applied_offset_minutes, 15);
    }

    #[test]
    fn negative_offset_wraps_to_previous_day() {
        let spec = ScheduleSpec::daily("00:10").with_jitter(20, 30);
        let trigger = resolver(-20).resolve(&spec).unwrap();

        assert_eq!(trigger.expression, "50 23 * * *");
        assert_eq!(trigger.literal_time(), Some((23, 50)));
        assert_eq!(trigger.applied_offset_minutes, -20);
    }

    #[test]
    fn positive_offset_wraps_past_midnight() {
        assert_eq!(shift_minutes(23, 45, 30), (0, 15));
        assert_eq!(shift_minutes(0, 0, -1), (23, 59));
        assert_eq!(shift_minutes(12, 0, 0), (12, 0));
    }

    #[test]
    fn wrapped_time_matches_modular_arithmetic() {
        let random = Arc::new(SeededRandom::new(3));
        let resolver = ScheduleResolver::new(random);
        for time in ["00:00", "00:10", "11:30", "23:55"] {
            let (hour, minute) = parse_daily_time(time).unwrap();
            let base = i64::from(hour * 60 + minute);
            let spec = ScheduleSpec::daily(time).with_jitter(90, 90);
            for _ in 0..200 {
                let trigger = resolver.resolve(&spec).unwrap();
                let offset = trigger.applied_offset_minutes;
                assert!((-90..=90).contains(&offset));
                let (h, m) = trigger.literal_time().unwrap();
                assert_eq!(i64::from(h * 60 + m), (base + offset).rem_euclid(1440));
            }
        }
    }

    #[test]
    fn degenerate_window_draws_nothing() {
        let spec = ScheduleSpec::daily("08:00").with_jitter(0, 0);
        let trigger = resolver(12).resolve(&spec).unwrap();
        assert_eq!(trigger.applied_offset_minutes, 0);
        assert_eq!(trigger.expression, "0 8 * * *");
    }

    #[test]
    fn malformed_daily_time_is_rejected() {
        for bad in ["9:00", "24:00", "12:60", "12-30", "ab:cd", "", "12:3", "+1:00"] {
            let err = resolver(0).resolve(&ScheduleSpec::daily(bad)).unwrap_err();
            assert!(
                matches!(err, SchedulerError::InvalidScheduleFormat(_)),
                "{bad}"
            );
        }
    }

    #[test]
    fn malformed_daily_time_does_not_fall_back_to_legacy() {
        let spec = ScheduleSpec {
            daily_time: Some("25:00".into()),
            legacy_expression: Some("0 9 * * *".into()),
            ..ScheduleSpec::default()
        };
        assert!(resolver(0).resolve(&spec).is_err());
    }

    #[test]
    fn legacy_expression_passes_through() {
        let spec = ScheduleSpec::legacy("30 7 * * *").with_jitter(20, 30);
        let trigger = resolver(10).resolve(&spec).unwrap();

        assert_eq!(trigger.expression, "30 7 * * *");
        assert_eq!(trigger.display_time, "07:30");
        assert_eq!(trigger.applied_offset_minutes, 0);
        assert_eq!(trigger.source, TriggerSource::Legacy);
    }

    #[test]
    fn legacy_wildcard_gets_placeholder_label() {
        let trigger = resolver(0)
            .resolve(&ScheduleSpec::legacy("*/15 * * * *"))
            .unwrap();
        assert_eq!(trigger.display_time, NON_DAILY_LABEL);
        assert_eq!(trigger.literal_time(), None);
    }

    #[test]
    fn invalid_legacy_expression_is_rejected() {
        for bad in ["not a cron", "0 9 * *", "61 9 * * *"] {
            let err = resolver(0).resolve(&ScheduleSpec::legacy(bad)).unwrap_err();
            assert!(matches!(err, SchedulerError::InvalidScheduleFormat(_)));
        }
    }

    #[test]
    fn missing_times_default_to_nine() {
        let spec = ScheduleSpec::default().with_jitter(20, 30);
        let trigger = resolver(-5).resolve(&spec).unwrap();

        assert_eq!(trigger.display_time, "09:00");
        assert_eq!(trigger.expression, "55 8 * * *");
        assert_eq!(trigger.source, TriggerSource::DefaultTime);
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn estimate_is_strictly_after_now() {
        let tz = chrono_tz::UTC;
        let now = at(2026, 3, 10, 9, 0);

        let same_minute = resolver(0).resolve(&ScheduleSpec::daily("09:00")).unwrap();
        assert_eq!(
            estimate_next_run(&same_minute, &tz, None, now),
            NextRun::At { at: at(2026, 3, 11, 9, 0) }
        );

        let later = resolver(0).resolve(&ScheduleSpec::daily("17:30")).unwrap();
        assert_eq!(
            estimate_next_run(&later, &tz, None, now),
            NextRun::At { at: at(2026, 3, 10, 17, 30) }
        );
    }

    #[test]
    fn estimate_respects_timezone() {
        let tz: Tz = "America/New_York".parse().unwrap();
        // 12:00 UTC is 08:00 EDT on this date
        let trigger = resolver(0).resolve(&ScheduleSpec::daily("09:00")).unwrap();
        assert_eq!(
            estimate_next_run(&trigger, &tz, None, at(2026, 6, 1, 12, 0)),
            NextRun::At { at: at(2026, 6, 1, 13, 0) }
        );
    }

    #[test]
    fn estimate_includes_slot_on_not_before() {
        let tz = chrono_tz::UTC;
        let trigger = resolver(0).resolve(&ScheduleSpec::daily("08:40")).unwrap();
        let not_before = at(2030, 4, 3, 8, 40);
        assert_eq!(
            estimate_next_run(&trigger, &tz, Some(not_before), at(2030, 4, 2, 9, 30)),
            NextRun::At { at: not_before }
        );
    }

    #[test]
    fn estimate_honours_restricted_weekday() {
        let tz = chrono_tz::UTC;
        let trigger = legacy_trigger("0 9 * * MON");
        // 2026-06-03 is a Wednesday; the next Monday is the 8th
        assert_eq!(
            estimate_next_run(&trigger, &tz, None, at(2026, 6, 3, 10, 0)),
            NextRun::At { at: at(2026, 6, 8, 9, 0) }
        );
    }

    #[test]
    fn estimate_agrees_with_clock_across_spring_forward() {
        let tz: Tz = "America/New_York".parse().unwrap();
        // 02:30 does not exist locally on 2026-03-08
        let trigger = legacy_trigger("30 2 * * *");
        let now = at(2026, 3, 7, 12, 0);
        let schedule = validate_expression(&trigger.expression).unwrap();
        let expected = next_occurrence(&schedule, &tz, None, now)
            .map_or(NextRun::Undetermined, |at| NextRun::At { at });
        assert_eq!(estimate_next_run(&trigger, &tz, None, now), expected);
    }

    #[test]
    fn estimate_is_undetermined_for_wildcards() {
        let tz: Tz = "UTC".parse().unwrap();
        let trigger = legacy_trigger("0 */2 * * *");
        assert_eq!(
            estimate_next_run(&trigger, &tz, None, Utc::now()),
            NextRun::Undetermined
        );
    }
}
