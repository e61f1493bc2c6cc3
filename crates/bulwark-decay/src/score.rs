//! Exponentially decaying scalar accumulator.
//!
//! The effective value at time `t` is `value * 2^(-(t - last_updated) / half_life)`.
//! Updates first decay the stored value to `now`, then combine, so no
//! sliding window or per-event history is needed.

use std::num::NonZeroU64;
use std::time::Duration;

use bulwark_core::error::ConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A strictly positive half-life in whole seconds.
///
/// Construction is the only place a non-positive half-life can be rejected,
/// so configuration errors surface at startup rather than mid-decision.
/// Half-lives are configured and serialized as seconds, so a sub-second
/// part is rejected rather than silently dropped on the way out.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(try_from = "u64", into = "u64")]
pub struct HalfLife(Duration);

impl HalfLife {
    pub fn new(duration: Duration) -> Result<Self, ConfigError> {
        if duration.is_zero() {
            return Err(ConfigError::NonPositiveHalfLife(format!("{duration:?}")));
        }
        if duration.subsec_nanos() != 0 {
            return Err(ConfigError::InvalidValue {
                name: "half_life".into(),
                reason: format!("{duration:?} is not a whole number of seconds"),
            });
        }
        Ok(Self(duration))
    }

    pub fn from_secs(secs: u64) -> Result<Self, ConfigError> {
        Self::new(Duration::from_secs(secs))
    }

    /// Infallible constructor for compile-time defaults.
    pub const fn from_nonzero_secs(secs: NonZeroU64) -> Self {
        Self(Duration::from_secs(secs.get()))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    /// Multiplicative factor applied to a value after `elapsed` has passed.
    pub fn decay_factor(&self, elapsed: Duration) -> f64 {
        if elapsed.is_zero() {
            return 1.0;
        }
        let half_lives = elapsed.as_secs_f64() / self.0.as_secs_f64();
        0.5f64.powf(half_lives)
    }
}

impl TryFrom<u64> for HalfLife {
    type Error = ConfigError;

    fn try_from(secs: u64) -> Result<Self, Self::Error> {
        Self::from_secs(secs)
    }
}

impl From<HalfLife> for u64 {
    fn from(h: HalfLife) -> u64 {
        h.0.as_secs()
    }
}

/// A decaying score embedded in its owner (IP history, account).
///
/// Never clamps itself to zero; callers that need non-negativity enforce it.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct DecayingScore {
    value: f64,
    last_updated: DateTime<Utc>,
}

impl DecayingScore {
    pub fn new(value: f64, at: DateTime<Utc>) -> Self {
        Self {
            value,
            last_updated: at,
        }
    }

    pub fn zero(at: DateTime<Utc>) -> Self {
        Self::new(0.0, at)
    }

    /// Time of the last update.
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Decayed value at `now`. Pure.
    ///
    /// A `now` earlier than the last update is treated as no elapsed time.
    pub fn value(&self, half_life: HalfLife, now: DateTime<Utc>) -> f64 {
        let elapsed = (now - self.last_updated).to_std().unwrap_or(Duration::ZERO);
        self.value * half_life.decay_factor(elapsed)
    }

    /// Decay to `now`, then add `amount`.
    pub fn add_in_place(&mut self, half_life: HalfLife, amount: f64, now: DateTime<Utc>) {
        let decayed = self.value(half_life, now);
        self.value = decayed + amount;
        if now > self.last_updated {
            self.last_updated = now;
        }
    }

    /// Decay to `now`, then subtract `amount`.
    pub fn subtract_in_place(&mut self, half_life: HalfLife, amount: f64, now: DateTime<Utc>) {
        self.add_in_place(half_life, -amount, now);
    }
}
