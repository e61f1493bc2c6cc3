//! Sketch dimensions and keys.

use bulwark_core::constants::{
    DEFAULT_LADDER_BITS, DEFAULT_LADDER_HEIGHT, DEFAULT_LADDER_SHARDS, DEFAULT_MEMBERSHIP_COLUMNS,
    DEFAULT_MEMBERSHIP_HIGH_WATER, DEFAULT_MEMBERSHIP_LOW_WATER, DEFAULT_MEMBERSHIP_ROWS,
};
use bulwark_core::error::ConfigError;
use serde::{Deserialize, Serialize};

const RUNG_KEY_CONTEXT: &str = "bulwark-ladder-rung-key-v1";
const ROW_KEY_CONTEXT: &str = "bulwark-membership-row-key-v1";

/// Binomial ladder dimensions.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LadderConfig {
    /// Total bits across all shards (`N`).
    pub num_bits: usize,
    /// Rungs per key (`H`).
    pub height: u32,
    /// Number of shards the array is split into (`S`). Must divide `num_bits`.
    pub shard_count: u32,
    /// Fleet-wide secret the rung hash key is derived from.
    pub secret: String,
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            num_bits: DEFAULT_LADDER_BITS,
            height: DEFAULT_LADDER_HEIGHT,
            shard_count: DEFAULT_LADDER_SHARDS,
            secret: String::new(),
        }
    }
}

impl LadderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_bits == 0 || self.height == 0 || self.shard_count == 0 {
            return Err(ConfigError::InvalidSketchDimensions(format!(
                "ladder bits {}, height {}, shards {} must all be positive",
                self.num_bits, self.height, self.shard_count
            )));
        }
        if self.num_bits % self.shard_count as usize != 0 {
            return Err(ConfigError::InvalidSketchDimensions(format!(
                "ladder bits {} not divisible by shard count {}",
                self.num_bits, self.shard_count
            )));
        }
        if self.bits_per_shard() < self.height as usize {
            return Err(ConfigError::InvalidSketchDimensions(format!(
                "shard of {} bits cannot hold {} distinct rungs",
                self.bits_per_shard(),
                self.height
            )));
        }
        Ok(())
    }

    pub fn bits_per_shard(&self) -> usize {
        self.num_bits / self.shard_count.max(1) as usize
    }

    /// Key for the rung hash, identical on every host sharing `secret`.
    pub fn rung_key(&self) -> [u8; 32] {
        blake3::derive_key(RUNG_KEY_CONTEXT, self.secret.as_bytes())
    }
}

/// Aging membership sketch dimensions and water marks.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct MembershipConfig {
    pub rows: usize,
    pub columns: usize,
    /// Aging starts when a row's zero fraction falls below this.
    pub low_water: f64,
    /// Aging stops once a row's zero fraction rises above this.
    pub high_water: f64,
    /// Secret the per-row hash keys are derived from.
    pub secret: String,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            rows: DEFAULT_MEMBERSHIP_ROWS,
            columns: DEFAULT_MEMBERSHIP_COLUMNS,
            low_water: DEFAULT_MEMBERSHIP_LOW_WATER,
            high_water: DEFAULT_MEMBERSHIP_HIGH_WATER,
            secret: String::new(),
        }
    }
}

impl MembershipConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rows == 0 || self.columns == 0 {
            return Err(ConfigError::InvalidSketchDimensions(format!(
                "membership rows {} and columns {} must be positive",
                self.rows, self.columns
            )));
        }
        if !(0.0 < self.low_water && self.low_water < self.high_water && self.high_water < 1.0) {
            return Err(ConfigError::InvalidWaterMarks {
                low: self.low_water,
                high: self.high_water,
            });
        }
        Ok(())
    }

    /// Independent hash key for `row`.
    pub fn row_key(&self, row: usize) -> [u8; 32] {
        let mut material = Vec::with_capacity(self.secret.len() + 8);
        material.extend_from_slice(self.secret.as_bytes());
        material.extend_from_slice(&(row as u64).to_le_bytes());
        blake3::derive_key(ROW_KEY_CONTEXT, &material)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(LadderConfig::default().validate().is_ok());
        assert!(MembershipConfig::default().validate().is_ok());
    }

    #[test]
    fn ladder_bits_must_divide_into_shards() {
        let cfg = LadderConfig {
            num_bits: 1000,
            shard_count: 3,
            ..LadderConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidSketchDimensions(_))
        ));
    }

    #[test]
    fn shard_must_fit_all_rungs() {
        let cfg = LadderConfig {
            num_bits: 64,
            height: 48,
            shard_count: 2,
            ..LadderConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn inverted_water_marks_rejected() {
        let cfg = MembershipConfig {
            low_water: 0.6,
            high_water: 0.4,
            ..MembershipConfig::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::InvalidWaterMarks { low: 0.6, high: 0.4 })
        );
    }

    #[test]
    fn row_keys_differ() {
        let cfg = MembershipConfig::default();
        assert_ne!(cfg.row_key(0), cfg.row_key(1));
    }

    #[test]
    fn rung_key_depends_on_secret() {
        let a = LadderConfig::default();
        let b = LadderConfig {
            secret: "fleet-secret".into(),
            ..LadderConfig::default()
        };
        assert_eq!(a.rung_key(), LadderConfig::default().rung_key());
        assert_ne!(a.rung_key(), b.rung_key());
    }
}
