//! Trigger clock: fires a callback at every occurrence of a cron expression.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, SchedulerError};

/// Callback invoked with the occurrence time of each firing.
pub type FireHandler = Arc<dyn Fn(DateTime<Utc>) + Send + Sync>;

/// Check that `expression` is a five-field cron expression the clock can evaluate.
pub fn validate_expression(expression: &str) -> Result<CronSchedule> {
    let fields = expression.split_whitespace().count();
    if fields != 5 {
        return Err(SchedulerError::InvalidScheduleFormat(format!(
            "expected 5 fields, got {fields} in {expression:?}"
        )));
    }
    // The cron crate wants a leading seconds field.
    CronSchedule::from_str(&format!("0 {}", expression.trim()))
        .map_err(|e| SchedulerError::InvalidScheduleFormat(format!("{expression:?}: {e}")))
}

/// Live registration returned by [`TriggerClock::arm`].
///
/// Dropping the handle disarms it, so replacing the engine's handle can never
/// leave two triggers alive.
#[derive(Debug, Default)]
pub struct ClockHandle {
    cancel: CancellationToken,
    next_fire: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl ClockHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when the handle is disarmed or dropped.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Shared slot the clock updates with the upcoming occurrence.
    pub fn next_fire_slot(&self) -> Arc<Mutex<Option<DateTime<Utc>>>> {
        Arc::clone(&self.next_fire)
    }

    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        *self.next_fire.lock().expect("next-fire slot poisoned")
    }

    pub fn is_live(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub fn disarm(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ClockHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Recurring timer capability.
pub trait TriggerClock: Send + Sync {
    /// Schedule `on_fire` for every occurrence of `expression` in `tz`.
    ///
    /// Occurrences before `not_before` are skipped; one falling exactly on it fires.
    fn arm(
        &self,
        expression: &str,
        tz: Tz,
        not_before: Option<DateTime<Utc>>,
        on_fire: FireHandler,
    ) -> Result<ClockHandle>;
}

/// Production clock: one tokio task per armed handle.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTriggerClock;

impl TriggerClock for TokioTriggerClock {
    fn arm(
        &self,
        expression: &str,
        tz: Tz,
        not_before: Option<DateTime<Utc>>,
        on_fire: FireHandler,
    ) -> Result<ClockHandle> {
        let schedule = validate_expression(expression)?;
        let handle = ClockHandle::new();
        let token = handle.cancellation_token();
        let next_slot = handle.next_fire_slot();

        // Seed the slot synchronously so callers can read it right after arming.
        let first = next_occurrence(&schedule, &tz, not_before, Utc::now()).ok_or_else(|| {
            SchedulerError::Clock(format!("{expression:?} has no upcoming occurrence"))
        })?;
        *next_slot.lock().expect("next-fire slot poisoned") = Some(first);

        let expression = expression.to_string();
        tokio::spawn(async move {
            let mut next = first;
            loop {
                let wait = (next - Utc::now()).to_std().unwrap_or_default();
                debug!(%expression, next_run = %next, "trigger armed");
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                if token.is_cancelled() {
                    break;
                }
                on_fire(next);

                match next_after(&schedule, &tz, next.max(Utc::now())) {
                    Some(upcoming) => {
                        next = upcoming;
                        if let Ok(mut slot) = next_slot.lock() {
                            *slot = Some(upcoming);
                        }
                    }
                    None => {
                        warn!(%expression, "no further occurrences; trigger stopped");
                        break;
                    }
                }
            }
            if let Ok(mut slot) = next_slot.lock() {
                *slot = None;
            }
        });

        Ok(handle)
    }
}

/// First occurrence strictly after `now` and at or after `not_before`.
///
/// Shared by the clock and status estimates so both always agree.
pub fn next_occurrence(
    schedule: &CronSchedule,
    tz: &Tz,
    not_before: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    // cron yields instants strictly after its start; back off one second so
    // an occurrence exactly at `not_before` is kept.
    let start = not_before.map_or(now, |at| (at - Duration::seconds(1)).max(now));
    next_after(schedule, tz, start)
}

fn next_after(schedule: &CronSchedule, tz: &Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(tz))
        .next()
        .map(|dt| dt.with_timezone(&Utc))
}
