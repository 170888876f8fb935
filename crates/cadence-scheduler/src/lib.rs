//! `cadence-scheduler`: once-a-day task scheduler with retries and jitter.
//!
//! # Overview
//!
//! The [`engine::SchedulerEngine`] resolves a [`cadence_core::ScheduleSpec`]
//! into a daily trigger, arms a [`clock::TriggerClock`], and runs the host's
//! [`executor::Task`] on every firing through an overlap-guarded retry loop.
//! After each completed run a jittered daily schedule draws a fresh offset
//! and is re-armed for the following day.
//!
//! | Component          | Module      | Role                                          |
//! |--------------------|-------------|-----------------------------------------------|
//! | BackoffPolicy      | `backoff`   | Exponential, jittered delay between attempts  |
//! | ScheduleResolver   | `schedule`  | `HH:MM` / cron + jitter → concrete expression |
//! | TriggerClock       | `clock`     | Fires a callback at each occurrence           |
//! | Executor           | `executor`  | Overlap guard + retry loop                    |
//! | SchedulerEngine    | `engine`    | start / stop / status / trigger_now           |

pub mod backoff;
pub mod clock;
pub mod engine;
pub mod error;
pub mod executor;
pub mod random;
pub mod schedule;
pub mod timezone;
pub mod types;

pub use clock::{ClockHandle, FireHandler, TokioTriggerClock, TriggerClock};
pub use engine::{EngineBuilder, SchedulerEngine};
pub use error::{Result, SchedulerError};
pub use executor::{task_fn, Executor, Sleeper, Task, TokioSleeper};
pub use random::{FixedRandom, RandomSource, SeededRandom, ThreadRandom};
pub use schedule::ScheduleResolver;
pub use types::{EngineStatus, NextRun, ResolvedTrigger, RunOutcome, RunReport, RunTrigger};
