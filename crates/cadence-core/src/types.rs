use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fallback daily time used when neither `daily_time` nor
/// `legacy_expression` is configured.
pub const DEFAULT_DAILY_TIME: &str = "09:00";

/// When the task should run. Supplied once at engine construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Daily trigger time as `HH:MM` (24-hour). Takes priority over
    /// `legacy_expression`.
    #[serde(default)]
    pub daily_time: Option<String>,
    /// Five-field cron expression, only consulted when `daily_time` is absent.
    #[serde(default)]
    pub legacy_expression: Option<String>,
    #[serde(default)]
    pub jitter: JitterSpec,
}

impl Default for ScheduleSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_time: None,
            legacy_expression: None,
            jitter: JitterSpec::default(),
        }
    }
}

impl ScheduleSpec {
    /// Daily schedule at `time` with jitter disabled.
    pub fn daily(time: impl Into<String>) -> Self {
        Self {
            daily_time: Some(time.into()),
            ..Self::default()
        }
    }

    /// Schedule driven by a raw five-field cron expression.
    pub fn legacy(expression: impl Into<String>) -> Self {
        Self {
            legacy_expression: Some(expression.into()),
            ..Self::default()
        }
    }

    /// Builder: enable jitter with the given window.
    pub fn with_jitter(mut self, min_minutes_before: u32, max_minutes_after: u32) -> Self {
        self.jitter = JitterSpec {
            enabled: true,
            min_minutes_before,
            max_minutes_after,
        };
        self
    }
}

/// Random offset window applied to the daily trigger time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JitterSpec {
    #[serde(default)]
    pub enabled: bool,
    /// Largest offset before the configured time, in minutes.
    #[serde(default = "default_minutes_before")]
    pub min_minutes_before: u32,
    /// Largest offset after the configured time, in minutes.
    #[serde(default = "default_minutes_after")]
    pub max_minutes_after: u32,
}

impl Default for JitterSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            min_minutes_before: default_minutes_before(),
            max_minutes_after: default_minutes_after(),
        }
    }
}

impl JitterSpec {
    /// True when jitter is on and the window is wider than a single point.
    pub fn is_active(&self) -> bool {
        self.enabled && (self.min_minutes_before > 0 || self.max_minutes_after > 0)
    }

    /// Total width of the window in minutes.
    pub fn span_minutes(&self) -> u32 {
        self.min_minutes_before.saturating_add(self.max_minutes_after)
    }
}

/// Retry behaviour for a single firing.
///
/// `max_attempts` counts every attempt, including the first one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(
        rename = "base_delay_ms",
        with = "duration_ms",
        default = "default_base_delay"
    )]
    pub base_delay: Duration,
    #[serde(
        rename = "max_delay_ms",
        with = "duration_ms",
        default = "default_max_delay"
    )]
    pub max_delay: Duration,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Multiplicative jitter applied to each backoff delay, in `[0, 1]`.
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            jitter_fraction: default_jitter_fraction(),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Exponential backoff without jitter.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            multiplier: 2.0,
            jitter_fraction: 0.0,
        }
    }

    /// Builder: set the backoff multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Builder: set the jitter fraction.
    pub fn with_jitter_fraction(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction;
        self
    }

    /// Check the policy invariants. Returns a description of the first violation.
    pub fn check(&self) -> std::result::Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".to_string());
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!(
                "retry.multiplier must be >= 1 (got {})",
                self.multiplier
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(format!(
                "retry.jitter_fraction must be within [0, 1] (got {})",
                self.jitter_fraction
            ));
        }
        Ok(())
    }
}

fn bool_true() -> bool {
    true
}
fn default_minutes_before() -> u32 {
    20
}
fn default_minutes_after() -> u32 {
    30
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> Duration {
    Duration::from_secs(30)
}
fn default_max_delay() -> Duration {
    Duration::from_secs(600)
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_jitter_fraction() -> f64 {
    0.2
}

/// Serde helper: `Duration` as whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
