//! Node configuration.
//!
//! [`NodeConfig`] groups every tunable. Values come from defaults, then an
//! optional TOML file, then `BULWARK_`-prefixed environment variables with
//! `__` between nesting levels (`BULWARK_ENGINE__BLOCK_THRESHOLD=80`).
//! Half-lives are whole seconds; timeouts and intervals are milliseconds.

use std::num::NonZeroU64;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bulwark_core::constants::{
    DEFAULT_ACCOUNT_CACHE_CAPACITY, DEFAULT_ACCOUNT_CREDIT_LIMIT, DEFAULT_ATTEMPT_CACHE_CAPACITY,
    DEFAULT_BLOCK_SCORE_HALF_LIFE_SECS, DEFAULT_BLOCK_THRESHOLD, DEFAULT_CREDIT_HALF_LIFE_SECS,
    DEFAULT_DEVICE_COOKIE_TRUST_MULTIPLIER, DEFAULT_EVICTION_FRACTION,
    DEFAULT_INVALID_ACCOUNT_PENALTY, DEFAULT_INVALID_PASSWORD_PENALTY, DEFAULT_IP_CACHE_CAPACITY,
    DEFAULT_MAX_TYPO_EDIT_DISTANCE, DEFAULT_MEMORY_HIGH_WATER_BYTES,
    DEFAULT_MEMORY_LOW_WATER_BYTES, DEFAULT_MEMORY_CHECK_INTERVAL_MS,
    DEFAULT_REWARD_PER_SUCCESS, DEFAULT_TYPO_PENALTY_MULTIPLIER, DEFAULT_TYPO_RECORDS_PER_IP,
    RECENT_INCORRECT_WINDOW,
};
use bulwark_core::error::ConfigError;
use bulwark_credentials::HashParams;
use bulwark_decay::{HalfLife, PopularityCurve};
use bulwark_network::FleetConfig;
use bulwark_sketch::{LadderConfig, MembershipConfig};
use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "BULWARK";

const fn nonzero_secs(secs: u64) -> NonZeroU64 {
    match NonZeroU64::new(secs) {
        Some(n) => n,
        None => panic!("default half-life must be non-zero"),
    }
}

const DEFAULT_BLOCK_SCORE_HALF_LIFE: HalfLife =
    HalfLife::from_nonzero_secs(nonzero_secs(DEFAULT_BLOCK_SCORE_HALF_LIFE_SECS));
const DEFAULT_CREDIT_HALF_LIFE: HalfLife =
    HalfLife::from_nonzero_secs(nonzero_secs(DEFAULT_CREDIT_HALF_LIFE_SECS));

/// Scoring parameters of the decision engine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub block_score_half_life: HalfLife,
    pub credit_half_life: HalfLife,
    pub invalid_account_penalty: f64,
    pub invalid_password_penalty: f64,
    /// Fraction of a wrong-password penalty kept once it is shown to be a typo.
    pub typo_penalty_multiplier: f64,
    pub max_typo_edit_distance: usize,
    /// Threshold for popular passwords; the popularity curve scales it up for others.
    pub block_threshold: f64,
    pub account_credit_limit: f64,
    pub reward_per_success: f64,
    pub device_cookie_trust_multiplier: f64,
    pub recent_incorrect_window: usize,
    /// Secret mixed into the salt used for usernames with no account.
    pub username_salt_secret: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_score_half_life: DEFAULT_BLOCK_SCORE_HALF_LIFE,
            credit_half_life: DEFAULT_CREDIT_HALF_LIFE,
            invalid_account_penalty: DEFAULT_INVALID_ACCOUNT_PENALTY,
            invalid_password_penalty: DEFAULT_INVALID_PASSWORD_PENALTY,
            typo_penalty_multiplier: DEFAULT_TYPO_PENALTY_MULTIPLIER,
            max_typo_edit_distance: DEFAULT_MAX_TYPO_EDIT_DISTANCE,
            block_threshold: DEFAULT_BLOCK_THRESHOLD,
            account_credit_limit: DEFAULT_ACCOUNT_CREDIT_LIMIT,
            reward_per_success: DEFAULT_REWARD_PER_SUCCESS,
            device_cookie_trust_multiplier: DEFAULT_DEVICE_COOKIE_TRUST_MULTIPLIER,
            recent_incorrect_window: RECENT_INCORRECT_WINDOW,
            username_salt_secret: String::new(),
        }
    }
}

fn non_negative(name: &str, value: f64) -> Result<(), ConfigError> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            name: name.into(),
            reason: format!("must be a finite non-negative number, got {value}"),
        })
    }
}

fn unit_interval(name: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            name: name.into(),
            reason: format!("must be within [0, 1], got {value}"),
        })
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_negative("engine.invalid_account_penalty", self.invalid_account_penalty)?;
        non_negative("engine.invalid_password_penalty", self.invalid_password_penalty)?;
        non_negative("engine.account_credit_limit", self.account_credit_limit)?;
        non_negative("engine.reward_per_success", self.reward_per_success)?;
        unit_interval("engine.typo_penalty_multiplier", self.typo_penalty_multiplier)?;
        unit_interval(
            "engine.device_cookie_trust_multiplier",
            self.device_cookie_trust_multiplier,
        )?;
        if !(self.block_threshold > 0.0 && self.block_threshold.is_finite()) {
            return Err(ConfigError::InvalidValue {
                name: "engine.block_threshold".into(),
                reason: "must be positive".into(),
            });
        }
        if self.recent_incorrect_window == 0 {
            return Err(ConfigError::InvalidValue {
                name: "engine.recent_incorrect_window".into(),
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Capacities of the in-memory caches.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub ip_history_capacity: usize,
    pub account_capacity: usize,
    /// Decided attempts remembered for idempotent resubmission.
    pub attempt_capacity: usize,
    pub typo_records_per_ip: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ip_history_capacity: DEFAULT_IP_CACHE_CAPACITY,
            account_capacity: DEFAULT_ACCOUNT_CACHE_CAPACITY,
            attempt_capacity: DEFAULT_ATTEMPT_CACHE_CAPACITY,
            typo_records_per_ip: DEFAULT_TYPO_RECORDS_PER_IP,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("cache.ip_history_capacity", self.ip_history_capacity),
            ("cache.account_capacity", self.account_capacity),
            ("cache.attempt_capacity", self.attempt_capacity),
            ("cache.typo_records_per_ip", self.typo_records_per_ip),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    name: name.into(),
                    reason: "must be positive".into(),
                });
            }
        }
        Ok(())
    }
}

/// Memory-pressure eviction settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MemoryConfig {
    pub high_water_bytes: u64,
    pub low_water_bytes: u64,
    pub check_interval_ms: u64,
    /// Fraction of each cache's least-recently-used entries dropped per round.
    pub eviction_fraction: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            high_water_bytes: DEFAULT_MEMORY_HIGH_WATER_BYTES,
            low_water_bytes: DEFAULT_MEMORY_LOW_WATER_BYTES,
            check_interval_ms: DEFAULT_MEMORY_CHECK_INTERVAL_MS,
            eviction_fraction: DEFAULT_EVICTION_FRACTION,
        }
    }
}

impl MemoryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.low_water_bytes >= self.high_water_bytes {
            return Err(ConfigError::InvalidValue {
                name: "memory.low_water_bytes".into(),
                reason: format!(
                    "{} must be below high_water_bytes {}",
                    self.low_water_bytes, self.high_water_bytes
                ),
            });
        }
        if self.check_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                name: "memory.check_interval_ms".into(),
                reason: "must be positive".into(),
            });
        }
        if !(self.eviction_fraction > 0.0 && self.eviction_fraction <= 1.0) {
            return Err(ConfigError::InvalidValue {
                name: "memory.eviction_fraction".into(),
                reason: format!("must be within (0, 1], got {}", self.eviction_fraction),
            });
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

/// Complete configuration of one node.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct NodeConfig {
    pub engine: EngineConfig,
    pub popularity: PopularityCurve,
    pub ladder: LadderConfig,
    pub membership: MembershipConfig,
    pub cache: CacheConfig,
    pub memory: MemoryConfig,
    pub fleet: FleetConfig,
    pub hashing: HashParams,
}

impl NodeConfig {
    /// Load defaults, then `path` (if any), then the environment, and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.to_path_buf()));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: NodeConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Per-user config file location, if the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("bulwark").join("bulwark.toml"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        self.popularity.validate()?;
        self.ladder.validate()?;
        self.membership.validate()?;
        self.cache.validate()?;
        self.memory.validate()?;
        self.fleet.validate()?;
        self.hashing
            .validate()
            .map_err(|e| ConfigError::InvalidValue {
                name: "hashing".into(),
                reason: e.to_string(),
            })?;
        if self.popularity.ladder_height != self.ladder.height {
            return Err(ConfigError::InvalidValue {
                name: "popularity.ladder_height".into(),
                reason: format!(
                    "{} does not match ladder.height {}",
                    self.popularity.ladder_height, self.ladder.height
                ),
            });
        }
        Ok(())
    }
}
