use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Malformed daily time, or an expression the trigger clock cannot evaluate.
    #[error("Invalid schedule format: {0}")]
    InvalidScheduleFormat(String),

    /// A single attempt failed. Recovered by the retry loop, never surfaced past the executor.
    #[error("Attempt {attempt} failed: {reason}")]
    TaskAttemptFailure { attempt: u32, reason: String },

    /// Every attempt of a firing failed.
    #[error("All {attempts} attempts failed, last error: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// The trigger clock could not compute or arm an occurrence.
    #[error("Trigger clock error: {0}")]
    Clock(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
