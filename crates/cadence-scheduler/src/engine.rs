use std::sync::{Arc, Mutex};

use cadence_core::{RetryPolicy, ScheduleSpec};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    clock::{ClockHandle, FireHandler, TokioTriggerClock, TriggerClock},
    error::Result,
    executor::{Executor, Sleeper, Task, TokioSleeper},
    random::{RandomSource, ThreadRandom},
    schedule::{estimate_next_run, ScheduleResolver},
    timezone::detect_timezone,
    types::{EngineStatus, NextRun, ResolvedTrigger, RunOutcome, RunReport, RunTrigger},
};

const MINUTES_PER_DAY: i64 = 24 * 60;

/// Daily scheduler: one schedule, one task, at most one run at a time.
///
/// Cheap to clone; clones share the same engine.
#[derive(Clone)]
pub struct SchedulerEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    spec: ScheduleSpec,
    policy: RetryPolicy,
    timezone: Tz,
    task: Arc<dyn Task>,
    resolver: ScheduleResolver,
    executor: Executor,
    clock: Box<dyn TriggerClock>,
    state: Mutex<EngineState>,
    /// If set, a report for every executed run is sent here.
    reports: Option<mpsc::Sender<RunReport>>,
}

#[derive(Default)]
struct EngineState {
    handle: Option<ClockHandle>,
    current_trigger: Option<ResolvedTrigger>,
    /// Lower bound passed to the clock on the last re-arm.
    not_before: Option<DateTime<Utc>>,
    last_run_at: Option<DateTime<Utc>>,
}

/// Builder for [`SchedulerEngine`]. Every capability has a production default.
pub struct EngineBuilder {
    spec: ScheduleSpec,
    policy: RetryPolicy,
    task: Arc<dyn Task>,
    timezone: Option<Tz>,
    random: Option<Arc<dyn RandomSource>>,
    clock: Option<Box<dyn TriggerClock>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    reports: Option<mpsc::Sender<RunReport>>,
}

impl EngineBuilder {
    pub fn timezone(mut self, tz: Tz) -> Self {
        self.timezone = Some(tz);
        self
    }

    /// Randomness for both the schedule jitter and the backoff jitter.
    pub fn random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = Some(random);
        self
    }

    pub fn clock(mut self, clock: Box<dyn TriggerClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Receive a [`RunReport`] after every run that executed the task.
    ///
    /// Delivery uses `try_send`, so a slow consumer never stalls the engine.
    pub fn reports(mut self, tx: mpsc::Sender<RunReport>) -> Self {
        self.reports = Some(tx);
        self
    }

    pub fn build(self) -> SchedulerEngine {
        let random = self.random.unwrap_or_else(|| Arc::new(ThreadRandom));
        let sleeper = self.sleeper.unwrap_or_else(|| Arc::new(TokioSleeper));
        let timezone = self.timezone.unwrap_or_else(|| detect_timezone(None));

        SchedulerEngine {
            inner: Arc::new(EngineInner {
                spec: self.spec,
                policy: self.policy,
                timezone,
                task: self.task,
                resolver: ScheduleResolver::new(Arc::clone(&random)),
                executor: Executor::new(random, sleeper),
                clock: self.clock.unwrap_or_else(|| Box::new(TokioTriggerClock)),
                state: Mutex::new(EngineState::default()),
                reports: self.reports,
            }),
        }
    }
}

impl SchedulerEngine {
    pub fn builder(spec: ScheduleSpec, policy: RetryPolicy, task: Arc<dyn Task>) -> EngineBuilder {
        EngineBuilder {
            spec,
            policy,
            task,
            timezone: None,
            random: None,
            clock: None,
            sleeper: None,
            reports: None,
        }
    }

    /// Engine with production defaults (host timezone, thread RNG, tokio clock).
    pub fn new(spec: ScheduleSpec, policy: RetryPolicy, task: Arc<dyn Task>) -> Self {
        Self::builder(spec, policy, task).build()
    }

    /// Resolve the schedule and arm the trigger clock.
    ///
    /// Fails closed: returns `false` and stays inert when the schedule is
    /// disabled or cannot be resolved. Calling it on an active engine is a no-op.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let inner = &self.inner;
        if !inner.spec.enabled {
            info!("schedule disabled; scheduler not started");
            return false;
        }
        if self.is_active() {
            debug!("scheduler already active");
            return true;
        }

        let trigger = match inner.resolver.resolve(&inner.spec) {
            Ok(trigger) => trigger,
            Err(e) => {
                error!(error = %e, "cannot start scheduler");
                return false;
            }
        };

        if let Err(e) = inner.arm(trigger, None, false) {
            error!(error = %e, "cannot start scheduler");
            return false;
        }

        let status = self.status();
        if let Some(trigger) = &status.trigger {
            info!(
                display_time = %trigger.display_time,
                expression = %trigger.expression,
                offset_min = trigger.applied_offset_minutes,
                timezone = %status.timezone,
                next_run = %DisplayNextRun(&status.next_run),
                "scheduler started"
            );
        }
        true
    }

    /// Disarm the trigger clock. Idempotent; an in-flight run is allowed to finish.
    pub fn stop(&self) {
        let handle = self.inner.lock_state().handle.take();
        match handle {
            Some(handle) => {
                handle.disarm();
                info!("scheduler stopped");
            }
            None => debug!("scheduler already stopped"),
        }
    }

    /// True while the trigger clock holds a live handle.
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    pub fn status(&self) -> EngineStatus {
        let inner = &self.inner;
        let state = inner.lock_state();
        let active = state.handle.as_ref().is_some_and(ClockHandle::is_live);

        let next_run = match (&state.current_trigger, active) {
            (Some(trigger), true) => {
                // the live clock knows the exact slot; estimate only when it can't say
                let live = state.handle.as_ref().and_then(ClockHandle::next_fire);
                match (trigger.literal_time(), live) {
                    (Some(_), Some(at)) => NextRun::At { at },
                    _ => {
                        estimate_next_run(trigger, &inner.timezone, state.not_before, Utc::now())
                    }
                }
            }
            _ => NextRun::Unscheduled,
        };

        EngineStatus {
            active,
            is_running: inner.executor.is_running(),
            last_run_at: state.last_run_at,
            next_run,
            trigger: state.current_trigger.clone(),
            timezone: inner.timezone.name().to_string(),
        }
    }

    /// Run the task now, through the same overlap guard as scheduled firings.
    ///
    /// Returns `Skipped` if a run is already in progress. Never re-jitters the schedule.
    pub async fn trigger_now(&self) -> RunOutcome {
        info!("manual run requested");
        self.inner.execute(RunTrigger::Manual, Utc::now()).await
    }

    /// Wait until no run is in progress.
    pub async fn wait_idle(&self) {
        self.inner.executor.wait_idle().await;
    }

    pub fn timezone(&self) -> Tz {
        self.inner.timezone
    }
}

impl EngineInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().expect("engine state poisoned")
    }

    fn is_active(&self) -> bool {
        self.lock_state()
            .handle
            .as_ref()
            .is_some_and(ClockHandle::is_live)
    }

    /// Arm the clock for `trigger`, replacing (and so disarming) any previous handle.
    ///
    /// With `only_if_active`, nothing happens when the engine has been stopped.
    fn arm(
        self: &Arc<Self>,
        trigger: ResolvedTrigger,
        not_before: Option<DateTime<Utc>>,
        only_if_active: bool,
    ) -> Result<bool> {
        let weak = Arc::downgrade(self);
        let on_fire: FireHandler = Arc::new(move |fired_at| {
            if let Some(inner) = weak.upgrade() {
                tokio::spawn(async move { inner.handle_firing(fired_at).await });
            }
        });

        let mut state = self.lock_state();
        if only_if_active && !state.handle.as_ref().is_some_and(ClockHandle::is_live) {
            return Ok(false);
        }
        let handle = self
            .clock
            .arm(&trigger.expression, self.timezone, not_before, on_fire)?;
        state.handle = Some(handle);
        state.current_trigger = Some(trigger);
        state.not_before = not_before;
        Ok(true)
    }

    async fn handle_firing(self: Arc<Self>, fired_at: DateTime<Utc>) {
        let display_time = self
            .lock_state()
            .current_trigger
            .as_ref()
            .map(|t| t.display_time.clone())
            .unwrap_or_default();
        info!(%display_time, fired_at = %fired_at, "scheduled run firing");

        let outcome = self.execute(RunTrigger::Scheduled, fired_at).await;
        if outcome.completed() {
            self.rejitter(fired_at);
        }
    }

    /// Shared run path for scheduled firings and manual triggers.
    async fn execute(&self, trigger: RunTrigger, started_at: DateTime<Utc>) -> RunOutcome {
        let outcome = self
            .executor
            .run_with(self.task.as_ref(), &self.policy, || {
                self.lock_state().last_run_at = Some(started_at);
            })
            .await;

        match &outcome {
            RunOutcome::Succeeded { attempts } => {
                info!(%trigger, attempts, "run succeeded");
            }
            RunOutcome::Failed {
                attempts,
                last_error,
            } => {
                error!(%trigger, attempts, error = %last_error, "run failed");
            }
            RunOutcome::Skipped => {
                info!(%trigger, "run skipped; previous run still in progress");
            }
        }
        if !outcome.completed() {
            return outcome;
        }

        if let Some(tx) = &self.reports {
            let report = RunReport {
                trigger,
                started_at,
                finished_at: Utc::now(),
                outcome: outcome.clone(),
            };
            if tx.try_send(report).is_err() {
                warn!(%trigger, "report channel full or closed; run report dropped");
            }
        }
        outcome
    }

    /// Draw a fresh jitter offset and re-arm for the following day.
    ///
    /// Only daily-time schedules with an active jitter window are re-jittered;
    /// legacy expressions keep their fixed recurrence.
    fn rejitter(self: &Arc<Self>, fired_at: DateTime<Utc>) {
        let jitter = &self.spec.jitter;
        let is_daily = self
            .lock_state()
            .current_trigger
            .as_ref()
            .is_some_and(|t| t.source.is_daily());
        if !jitter.is_active() || !is_daily {
            return;
        }

        let trigger = match self.resolver.resolve(&self.spec) {
            Ok(trigger) => trigger,
            Err(e) => {
                error!(error = %e, "re-jitter failed; keeping current trigger");
                return;
            }
        };

        // Far enough ahead that no slot of today's window can fire again; a
        // slot exactly on the bound still fires.
        let gap = (MINUTES_PER_DAY - i64::from(jitter.span_minutes())).max(1);
        let not_before = fired_at + Duration::minutes(gap);
        let expression = trigger.expression.clone();
        let offset = trigger.applied_offset_minutes;
        let next = estimate_next_run(&trigger, &self.timezone, Some(not_before), Utc::now());

        match self.arm(trigger, Some(not_before), true) {
            Ok(true) => info!(
                %expression,
                offset_min = offset,
                next_run = %DisplayNextRun(&next),
                "schedule re-jittered"
            ),
            Ok(false) => debug!("scheduler stopped during run; not re-arming"),
            Err(e) => error!(error = %e, "re-jitter could not re-arm the trigger clock"),
        }
    }
}

/// Log formatting for [`NextRun`].
struct DisplayNextRun<'a>(&'a NextRun);

impl std::fmt::Display for DisplayNextRun<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            NextRun::At { at } => write!(f, "{}", at.to_rfc3339()),
            NextRun::Undetermined => write!(f, "undetermined"),
            NextRun::Unscheduled => write!(f, "unscheduled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::task_fn;
    use crate::random::FixedRandom;
    use chrono::Datelike;

    fn ok_task() -> Arc<dyn Task> {
        Arc::new(task_fn("ok", || async { Ok(()) }))
    }

    fn engine(spec: ScheduleSpec) -> SchedulerEngine {
        SchedulerEngine::builder(spec, RetryPolicy::once(), ok_task())
            .timezone(chrono_tz::UTC)
            .random(Arc::new(FixedRandom::new(15, 0.0)))
            .build()
    }

    #[tokio::test]
    async fn disabled_spec_fails_closed() {
        let spec = ScheduleSpec {
            enabled: false,
            ..ScheduleSpec::daily("09:00")
        };
        let engine = engine(spec);
        assert!(!engine.start());
        assert!(!engine.is_active());
        assert!(engine.status().trigger.is_none());
    }

    #[tokio::test]
    async fn malformed_time_fails_closed() {
        let engine = engine(ScheduleSpec::daily("9am"));
        assert!(!engine.start());
        assert!(!engine.is_active());
        assert_eq!(engine.status().next_run, NextRun::Unscheduled);
    }

    #[tokio::test]
    async fn status_after_start() {
        let engine = engine(ScheduleSpec::daily("09:00").with_jitter(20, 30));
        assert!(engine.start());

        let status = engine.status();
        assert!(status.active);
        assert!(!status.is_running);
        assert!(status.last_run_at.is_none());
        assert_eq!(status.timezone, "UTC");
        let trigger = status.trigger.unwrap();
        assert_eq!(trigger.expression, "15 9 * * *");
        assert_eq!(trigger.display_time, "09:00");
        assert!(matches!(status.next_run, NextRun::At { .. }));

        engine.stop();
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let engine = engine(ScheduleSpec::daily("06:30"));
        assert!(engine.start());
        engine.stop();
        assert!(!engine.is_active());
        engine.stop();
        assert!(!engine.is_active());
        assert_eq!(engine.status().next_run, NextRun::Unscheduled);
    }

    #[tokio::test]
    async fn start_twice_keeps_one_trigger() {
        let engine = engine(ScheduleSpec::daily("06:30"));
        assert!(engine.start());
        assert!(engine.start());
        assert!(engine.is_active());
        engine.stop();
        assert!(!engine.is_active());
    }

    #[tokio::test]
    async fn status_reports_live_clock_slot_for_weekday_schedule() {
        let engine = engine(ScheduleSpec::legacy("0 9 * * MON"));
        assert!(engine.start());

        let handle_next = engine
            .inner
            .lock_state()
            .handle
            .as_ref()
            .and_then(ClockHandle::next_fire);
        let NextRun::At { at } = engine.status().next_run else {
            panic!("expected a concrete next run");
        };
        assert_eq!(Some(at), handle_next);
        assert_eq!(at.weekday(), chrono::Weekday::Mon);
        engine.stop();
    }

    #[tokio::test]
    async fn legacy_wildcard_has_undetermined_estimate() {
        let engine = engine(ScheduleSpec::legacy("*/10 * * * *"));
        assert!(engine.start());
        assert_eq!(engine.status().next_run, NextRun::Undetermined);
        engine.stop();
    }

    #[tokio::test]
    async fn trigger_now_records_last_run() {
        let engine = engine(ScheduleSpec::daily("09:00"));
        let before = Utc::now();
        let outcome = engine.trigger_now().await;

        assert_eq!(outcome, RunOutcome::Succeeded { attempts: 1 });
        let status = engine.status();
        assert!(status.last_run_at.unwrap() >= before);
        assert!(!status.is_running);
    }

    #[test]
    fn next_run_display() {
        assert_eq!(DisplayNextRun(&NextRun::Undetermined).to_string(), "undetermined");
        assert_eq!(DisplayNextRun(&NextRun::Unscheduled).to_string(), "unscheduled");
    }
}
