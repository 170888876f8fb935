//! Overlap-guarded retry loop around the host's task.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cadence_core::RetryPolicy;
use futures_util::FutureExt;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::{backoff::delay_for, error::SchedulerError, random::RandomSource, types::RunOutcome};

/// The unit of work the engine schedules. Opaque to the engine: it either
/// resolves to `Ok(())` or fails.
#[async_trait]
pub trait Task: Send + Sync {
    /// Name used in log lines.
    fn name(&self) -> &str {
        "task"
    }

    async fn run(&self) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into a [`Task`].
pub struct FnTask<F> {
    name: String,
    f: F,
}

/// Build a [`Task`] from an async closure.
pub fn task_fn<F, Fut>(name: impl Into<String>, f: F) -> FnTask<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    FnTask {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F, Fut> Task for FnTask<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> anyhow::Result<()> {
        (self.f)().await
    }
}

/// Suspension used between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Runs a task with retries, never more than one invocation at a time.
pub struct Executor {
    running: AtomicBool,
    idle: Notify,
    random: Arc<dyn RandomSource>,
    sleeper: Arc<dyn Sleeper>,
}

/// Clears the running flag on drop, whatever way the run ends.
struct RunGuard<'a> {
    executor: &'a Executor,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.executor.running.store(false, Ordering::Release);
        self.executor.idle.notify_waiters();
    }
}

impl Executor {
    pub fn new(random: Arc<dyn RandomSource>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            running: AtomicBool::new(false),
            idle: Notify::new(),
            random,
            sleeper,
        }
    }

    /// True strictly while a run (including backoff sleeps) is in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Resolves once no run is in progress.
    pub async fn wait_idle(&self) {
        loop {
            // Register before checking so a release in between is not missed.
            let notified = self.idle.notified();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }

    fn try_acquire(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard { executor: self })
    }

    /// Run `task` up to `policy.max_attempts` times.
    ///
    /// Returns `Skipped` without side effects when another run holds the guard.
    /// Individual attempt failures are logged, only the final outcome is returned.
    pub async fn run(&self, task: &dyn Task, policy: &RetryPolicy) -> RunOutcome {
        self.run_with(task, policy, || {}).await
    }

    /// Like [`Executor::run`], calling `on_acquired` once the guard is held and
    /// before the first attempt. Not called for skipped runs.
    pub async fn run_with<F>(
        &self,
        task: &dyn Task,
        policy: &RetryPolicy,
        on_acquired: F,
    ) -> RunOutcome
    where
        F: FnOnce() + Send,
    {
        let Some(_guard) = self.try_acquire() else {
            info!(task = %task.name(), "run already in progress; skipping");
            return RunOutcome::Skipped;
        };
        on_acquired();

        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let reason = match run_attempt(task).await {
                Ok(()) => {
                    info!(task = %task.name(), attempts = attempt, "task succeeded");
                    return RunOutcome::Succeeded { attempts: attempt };
                }
                Err(reason) => reason,
            };

            if attempt >= max_attempts {
                error!(
                    task = %task.name(),
                    attempts = attempt,
                    error = %reason,
                    "task failed; retries exhausted"
                );
                return RunOutcome::Failed {
                    attempts: attempt,
                    last_error: reason,
                };
            }

            let delay = delay_for(attempt, policy, self.random.as_ref());
            let failure = SchedulerError::TaskAttemptFailure { attempt, reason };
            warn!(
                task = %task.name(),
                delay_ms = delay.as_millis() as u64,
                "{failure}; retrying"
            );
            self.sleeper.sleep(delay).await;
            attempt += 1;
        }
    }
}

/// One invocation; panics are caught and reported like any other failure.
async fn run_attempt(task: &dyn Task) -> Result<(), String> {
    match AssertUnwindSafe(task.run()).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(panic) => Err(format!("task panicked: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
