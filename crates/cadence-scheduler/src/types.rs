use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Label used for triggers whose hour/minute are not both literal.
pub const NON_DAILY_LABEL: &str = "custom schedule";

/// Which configuration field produced a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// `daily_time` was set.
    DailyTime,
    /// Nothing was set; the 09:00 fallback applies.
    DefaultTime,
    /// `legacy_expression` passed through verbatim.
    Legacy,
}

impl TriggerSource {
    /// Daily-time triggers (explicit or fallback) are re-jittered after each run.
    pub fn is_daily(self) -> bool {
        matches!(self, TriggerSource::DailyTime | TriggerSource::DefaultTime)
    }
}

/// Concrete trigger derived from a `ScheduleSpec`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTrigger {
    /// Five-field cron expression handed to the trigger clock.
    pub expression: String,
    /// Unjittered `HH:MM` for logs, or [`NON_DAILY_LABEL`].
    pub display_time: String,
    /// Signed jitter offset in minutes; 0 when jitter is off.
    pub applied_offset_minutes: i64,
    pub source: TriggerSource,
}

impl ResolvedTrigger {
    /// Hour and minute of the expression when both fields are literal numbers.
    pub fn literal_time(&self) -> Option<(u32, u32)> {
        literal_time(&self.expression)
    }
}

/// Extract `(hour, minute)` from a five-field expression whose first two
/// fields are plain numbers in range.
pub(crate) fn literal_time(expression: &str) -> Option<(u32, u32)> {
    let mut fields = expression.split_whitespace();
    let minute: u32 = fields.next()?.parse().ok()?;
    let hour: u32 = fields.next()?.parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

/// Final result of one firing (or manual trigger).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded { attempts: u32 },
    Failed { attempts: u32, last_error: String },
    /// Another run was in progress; nothing happened.
    Skipped,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded { .. })
    }

    /// `true` for outcomes that actually ran the task.
    pub fn completed(&self) -> bool {
        !matches!(self, RunOutcome::Skipped)
    }

    /// The terminal error for a failed run, if any.
    pub fn error(&self) -> Option<SchedulerError> {
        match self {
            RunOutcome::Failed {
                attempts,
                last_error,
            } => Some(SchedulerError::RetriesExhausted {
                attempts: *attempts,
                last_error: last_error.clone(),
            }),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Succeeded { attempts } => write!(f, "succeeded after {attempts} attempt(s)"),
            RunOutcome::Failed { attempts, .. } => write!(f, "failed after {attempts} attempt(s)"),
            RunOutcome::Skipped => write!(f, "skipped"),
        }
    }
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Scheduled,
    Manual,
}

impl std::fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunTrigger::Scheduled => "scheduled",
            RunTrigger::Manual => "manual",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunTrigger {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(RunTrigger::Scheduled),
            "manual" => Ok(RunTrigger::Manual),
            other => Err(format!("unknown run trigger: {other}")),
        }
    }
}

/// Sent to the host after every run that actually executed the task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
}

/// Estimated time of the next firing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NextRun {
    /// The engine is not armed.
    Unscheduled,
    At { at: DateTime<Utc> },
    /// The expression is not a simple daily time.
    Undetermined,
}

/// Point-in-time snapshot returned by `SchedulerEngine::status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub active: bool,
    pub is_running: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run: NextRun,
    pub trigger: Option<ResolvedTrigger>,
    pub timezone: String,
}
