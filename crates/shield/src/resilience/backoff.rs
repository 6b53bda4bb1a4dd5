//! Backoff strategies for retry delays
//!
//! A backoff strategy is a pure function from the attempt number that just
//! failed (1-based) to the delay before the next attempt. Every variant
//! carries its own parameters, so cloning a strategy never shares state.
//! The jittered variant draws from the thread-local RNG on each call.

use std::time::Duration;

use rand::Rng;

use crate::error::{ConfigError, ConfigResult};

/// Multiplier used when none is given
pub const DEFAULT_MULTIPLIER: f64 = 2.0;
/// Upper bound used when none is given
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);
/// Jitter factor used when none is given
pub const DEFAULT_JITTER_FACTOR: f64 = 0.1;
/// Initial delay of the default retry backoff
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(100);

/// Backoff strategy for calculating retry delays
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Same delay before every retry
    Fixed(Duration),
    /// `min(increment * attempt, max_delay)`
    Linear { increment: Duration, max_delay: Duration },
    /// `min(initial_delay * multiplier^(attempt - 1), max_delay)`
    Exponential { initial_delay: Duration, multiplier: f64, max_delay: Duration },
    /// Exponential delay scaled by `1 + U(-jitter_factor, jitter_factor)`
    JitteredExponential {
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
        jitter_factor: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::exponential(DEFAULT_INITIAL_DELAY)
    }
}

impl BackoffStrategy {
    pub fn fixed(delay: Duration) -> Self {
        BackoffStrategy::Fixed(delay)
    }

    /// Linear backoff capped at [`DEFAULT_MAX_DELAY`]
    pub fn linear(increment: Duration) -> Self {
        Self::linear_capped(increment, DEFAULT_MAX_DELAY)
    }

    pub fn linear_capped(increment: Duration, max_delay: Duration) -> Self {
        BackoffStrategy::Linear { increment, max_delay }
    }

    /// Exponential backoff doubling from `initial_delay`, capped at
    /// [`DEFAULT_MAX_DELAY`]
    pub fn exponential(initial_delay: Duration) -> Self {
        Self::exponential_with(initial_delay, DEFAULT_MULTIPLIER, DEFAULT_MAX_DELAY)
    }

    pub fn exponential_with(initial_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        BackoffStrategy::Exponential { initial_delay, multiplier, max_delay }
    }

    /// Jittered exponential backoff with the default multiplier, cap and
    /// jitter factor
    pub fn jittered(initial_delay: Duration) -> Self {
        Self::jittered_with(
            initial_delay,
            DEFAULT_MULTIPLIER,
            DEFAULT_MAX_DELAY,
            DEFAULT_JITTER_FACTOR,
        )
    }

    pub fn jittered_with(
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
        jitter_factor: f64,
    ) -> Self {
        BackoffStrategy::JitteredExponential { initial_delay, multiplier, max_delay, jitter_factor }
    }

    /// Delay before the retry that follows failed attempt `attempt`
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::JitteredExponential { max_delay, jitter_factor, .. } => {
                apply_jitter(self.base_delay(attempt), *jitter_factor, *max_delay)
            }
            _ => self.base_delay(attempt),
        }
    }

    /// Delay before jitter is applied
    pub fn base_delay(&self, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed(delay) => *delay,
            BackoffStrategy::Linear { increment, max_delay } => {
                increment.saturating_mul(attempt).min(*max_delay)
            }
            BackoffStrategy::Exponential { initial_delay, multiplier, max_delay }
            | BackoffStrategy::JitteredExponential {
                initial_delay, multiplier, max_delay, ..
            } => exponential_delay(*initial_delay, *multiplier, *max_delay, attempt),
        }
    }

    /// Upper bound on any delay this strategy returns, if it has one
    pub fn max_delay(&self) -> Option<Duration> {
        match self {
            BackoffStrategy::Fixed(_) => None,
            BackoffStrategy::Linear { max_delay, .. }
            | BackoffStrategy::Exponential { max_delay, .. }
            | BackoffStrategy::JitteredExponential { max_delay, .. } => Some(*max_delay),
        }
    }

    /// Reject parameters that cannot produce a sensible delay sequence
    pub fn validate(&self) -> ConfigResult<()> {
        match self {
            BackoffStrategy::Fixed(_) | BackoffStrategy::Linear { .. } => Ok(()),
            BackoffStrategy::Exponential { multiplier, .. } => validate_multiplier(*multiplier),
            BackoffStrategy::JitteredExponential { multiplier, jitter_factor, .. } => {
                validate_multiplier(*multiplier)?;
                if !(0.0..=1.0).contains(jitter_factor) {
                    return Err(ConfigError::invalid(format!(
                        "jitter_factor must be within [0, 1], got {jitter_factor}"
                    )));
                }
                Ok(())
            }
        }
    }
}

fn validate_multiplier(multiplier: f64) -> ConfigResult<()> {
    if multiplier.is_finite() && multiplier > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(format!("multiplier must be greater than 0, got {multiplier}")))
    }
}

fn exponential_delay(initial: Duration, multiplier: f64, max: Duration, attempt: u32) -> Duration {
    if attempt == 0 {
        return initial.min(max);
    }
    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    scale(initial, multiplier.powi(exponent), max)
}

/// Offsets are drawn from `[-min(j, 1), min(j, 1)]`; a non-finite or
/// non-positive factor disables jitter.
fn apply_jitter(delay: Duration, jitter_factor: f64, max: Duration) -> Duration {
    if !jitter_factor.is_finite() || jitter_factor <= 0.0 {
        return delay.min(max);
    }
    let spread = jitter_factor.min(1.0);
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    scale(delay, 1.0 + offset, max)
}

/// `delay * factor`, floored at zero and capped at `max`
fn scale(delay: Duration, factor: f64, max: Duration) -> Duration {
    let nanos = delay.as_nanos() as f64 * factor;
    if nanos.is_nan() || nanos <= 0.0 {
        return Duration::ZERO;
    }
    if nanos >= max.as_nanos() as f64 {
        return max;
    }
    Duration::from_nanos(nanos.round() as u64).min(max)
}
