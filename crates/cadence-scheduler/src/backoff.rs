use std::time::Duration;

use cadence_core::RetryPolicy;

use crate::random::RandomSource;

/// Delay before the next attempt, without jitter.
///
/// `attempt_index` is 1 for the delay before the second attempt, 2 before the
/// third, and so on. Index 0 (before the first attempt) is always zero.
/// The result is `base_delay * multiplier^(attempt_index - 1)` capped at
/// `max_delay`, so it never decreases as the index grows.
pub fn nominal_delay(attempt_index: u32, policy: &RetryPolicy) -> Duration {
    if attempt_index == 0 || policy.base_delay.is_zero() {
        return Duration::ZERO;
    }
    let max = policy.max_delay.as_secs_f64();
    let exponent = i32::try_from(attempt_index - 1).unwrap_or(i32::MAX);
    let raw = policy.base_delay.as_secs_f64() * policy.multiplier.max(1.0).powi(exponent);
    Duration::from_secs_f64(clamp_secs(raw, max))
}

/// Nominal delay scaled by `1 + U`, `U` uniform in `[-jitter_fraction, +jitter_fraction]`,
/// then re-clamped into `[0, max_delay]`.
pub fn delay_for(attempt_index: u32, policy: &RetryPolicy, random: &dyn RandomSource) -> Duration {
    let nominal = nominal_delay(attempt_index, policy);
    if nominal.is_zero() {
        return nominal;
    }
    let fraction = policy.jitter_fraction.clamp(0.0, 1.0);
    let factor = 1.0 + random.float_in(-fraction, fraction);
    let jittered = nominal.as_secs_f64() * factor;
    Duration::from_secs_f64(clamp_secs(jittered, policy.max_delay.as_secs_f64()))
}

/// Overflow and NaN collapse to the cap.
fn clamp_secs(value: f64, max: f64) -> f64 {
    if value.is_nan() || value > max {
        max
    } else {
        value.max(0.0)
    }
}
