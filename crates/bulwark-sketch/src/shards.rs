//! Shard-owner side of the distributed ladder.
//!
//! The logical array of `N` bits is split into `S` shards of `N / S` bits.
//! A key lives entirely inside one shard, chosen by hashing the key, so a
//! height query or step touches exactly one owner. All shards share the
//! fleet-wide rung key, so any host that takes over a shard interprets its
//! bits the same way.

use std::sync::Arc;

use bulwark_core::error::{ConfigError, NetworkError};
use dashmap::DashMap;
use tracing::debug;

use crate::config::LadderConfig;
use crate::ladder::BinomialLadderSketch;

const SHARD_KEY_CONTEXT: &str = "bulwark-ladder-shard-selector-v1";

/// Map a key to its shard in `0..shard_count`.
pub fn shard_for(key: &[u8], shard_count: u32) -> u32 {
    let digest = blake3::derive_key(SHARD_KEY_CONTEXT, key);
    let mut low = [0u8; 8];
    low.copy_from_slice(&digest[..8]);
    (u64::from_le_bytes(low) % shard_count.max(1) as u64) as u32
}

/// Ladders for the shards this host is responsible for, allocated on first use.
pub struct LadderShardStore {
    config: LadderConfig,
    rung_key: [u8; 32],
    shards: DashMap<u32, Arc<BinomialLadderSketch>>,
}

impl LadderShardStore {
    pub fn new(config: LadderConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let rung_key = config.rung_key();
        Ok(Self {
            config,
            rung_key,
            shards: DashMap::new(),
        })
    }

    pub fn config(&self) -> &LadderConfig {
        &self.config
    }

    pub fn shard_count(&self) -> u32 {
        self.config.shard_count
    }

    /// Shards allocated so far.
    pub fn allocated(&self) -> usize {
        self.shards.len()
    }

    fn shard(&self, shard: u32) -> Result<Arc<BinomialLadderSketch>, NetworkError> {
        if shard >= self.config.shard_count {
            return Err(NetworkError::ShardOutOfRange {
                shard,
                count: self.config.shard_count,
            });
        }
        if let Some(existing) = self.shards.get(&shard) {
            return Ok(Arc::clone(existing.value()));
        }
        let entry = self.shards.entry(shard).or_insert_with(|| {
            debug!(shard, bits = self.config.bits_per_shard(), "ladder: allocating shard");
            Arc::new(BinomialLadderSketch::build(
                self.config.bits_per_shard(),
                self.config.height,
                self.rung_key,
            ))
        });
        Ok(Arc::clone(entry.value()))
    }

    pub fn get_height(&self, shard: u32, key: &[u8]) -> Result<u32, NetworkError> {
        Ok(self.shard(shard)?.get_height(key))
    }

    /// Step `key` in `shard`. Returns the height before the step.
    pub fn step(&self, shard: u32, key: &[u8]) -> Result<u32, NetworkError> {
        Ok(self.shard(shard)?.step(key))
    }

    pub fn assign_random_bit(&self, shard: u32, value: bool) -> Result<(), NetworkError> {
        self.shard(shard)?.assign_random_bit(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> LadderShardStore {
        LadderShardStore::new(LadderConfig {
            num_bits: 1 << 20,
            height: 16,
            shard_count: 8,
            secret: "test".into(),
        })
        .unwrap()
    }

    #[test]
    fn invalid_config_rejected() {
        let cfg = LadderConfig {
            num_bits: 100,
            shard_count: 7,
            ..LadderConfig::default()
        };
        assert!(LadderShardStore::new(cfg).is_err());
    }

    #[test]
    fn shard_for_is_stable_and_in_range() {
        for i in 0..1_000u32 {
            let key = i.to_le_bytes();
            let s = shard_for(&key, 8);
            assert!(s < 8);
            assert_eq!(s, shard_for(&key, 8));
        }
    }

    #[test]
    fn shard_for_spreads_keys() {
        let mut counts = [0u32; 8];
        for i in 0..8_000u32 {
            counts[shard_for(&i.to_le_bytes(), 8) as usize] += 1;
        }
        assert!(counts.iter().all(|&c| c > 700), "skewed: {counts:?}");
    }

    #[test]
    fn out_of_range_shard_rejected() {
        let s = store();
        assert_eq!(
            s.get_height(8, b"k"),
            Err(NetworkError::ShardOutOfRange { shard: 8, count: 8 })
        );
    }

    #[test]
    fn shards_allocate_lazily() {
        let s = store();
        assert_eq!(s.allocated(), 0);
        s.step(3, b"k").unwrap();
        s.get_height(3, b"k").unwrap();
        assert_eq!(s.allocated(), 1);
        s.assign_random_bit(5, true).unwrap();
        assert_eq!(s.allocated(), 2);
    }

    #[test]
    fn steps_accumulate_within_shard() {
        let s = store();
        let key = b"password1";
        let shard = shard_for(key, s.shard_count());
        for _ in 0..40 {
            s.step(shard, key).unwrap();
        }
        assert_eq!(s.get_height(shard, key).unwrap(), 16);
    }
}
