//! Popularity curves: ladder height to threshold and penalty multipliers.
//!
//! Unseen keys sit near `H/2` on a ladder of height `H`. Keys at or above
//! `popular_height` are treated as popular passwords:
//!
//! | Height                     | Threshold multiplier          | Penalty multiplier            |
//! |----------------------------|-------------------------------|-------------------------------|
//! | `< popular_height`         | `unpopular_threshold_multiplier` | 1.0                        |
//! | `popular_height ..= H`     | 1.0                           | ramps linearly up to `max_penalty_multiplier` at `H` |
//!
//! Popular passwords therefore face a stricter block threshold and cost the
//! guessing IP more per failure.

use bulwark_core::constants::{
    DEFAULT_LADDER_HEIGHT, DEFAULT_MAX_PENALTY_MULTIPLIER, DEFAULT_POPULAR_HEIGHT,
    DEFAULT_UNPOPULAR_THRESHOLD_MULTIPLIER,
};
use bulwark_core::error::ConfigError;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PopularityCurve {
    /// Rungs per key (the ladder's `H`).
    pub ladder_height: u32,
    /// Height from which a password counts as popular.
    pub popular_height: u32,
    /// Threshold multiplier for unpopular passwords (>= 1).
    pub unpopular_threshold_multiplier: f64,
    /// Penalty multiplier at the top of the ladder (>= 1).
    pub max_penalty_multiplier: f64,
}

impl Default for PopularityCurve {
    fn default() -> Self {
        Self {
            ladder_height: DEFAULT_LADDER_HEIGHT,
            popular_height: DEFAULT_POPULAR_HEIGHT,
            unpopular_threshold_multiplier: DEFAULT_UNPOPULAR_THRESHOLD_MULTIPLIER,
            max_penalty_multiplier: DEFAULT_MAX_PENALTY_MULTIPLIER,
        }
    }
}

impl PopularityCurve {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ladder_height == 0 {
            return Err(ConfigError::InvalidSketchDimensions(
                "ladder height must be positive".into(),
            ));
        }
        if self.popular_height == 0 || self.popular_height > self.ladder_height {
            return Err(ConfigError::InvalidValue {
                name: "popular_height".into(),
                reason: format!("must be in 1..={}", self.ladder_height),
            });
        }
        if !(self.unpopular_threshold_multiplier >= 1.0) {
            return Err(ConfigError::InvalidValue {
                name: "unpopular_threshold_multiplier".into(),
                reason: "must be >= 1".into(),
            });
        }
        if !(self.max_penalty_multiplier >= 1.0) {
            return Err(ConfigError::InvalidValue {
                name: "max_penalty_multiplier".into(),
                reason: "must be >= 1".into(),
            });
        }
        Ok(())
    }

    pub fn is_popular(&self, height: u32) -> bool {
        height >= self.popular_height
    }

    /// Multiplier applied to the base block threshold.
    pub fn threshold_multiplier(&self, height: u32) -> f64 {
        if self.is_popular(height) {
            1.0
        } else {
            self.unpopular_threshold_multiplier
        }
    }

    /// Multiplier applied to failure penalties.
    pub fn penalty_multiplier(&self, height: u32) -> f64 {
        if !self.is_popular(height) {
            return 1.0;
        }
        let height = height.min(self.ladder_height);
        let span = (self.ladder_height - self.popular_height + 1) as f64;
        let above = (height - self.popular_height + 1) as f64;
        1.0 + (self.max_penalty_multiplier - 1.0) * above / span
    }
}
