//! `cadence-core`: configuration and shared types for the cadence daily scheduler.

pub mod config;
pub mod error;
pub mod types;

pub use config::CadenceConfig;
pub use error::{CadenceError, Result};
pub use types::{JitterSpec, RetryPolicy, ScheduleSpec};
