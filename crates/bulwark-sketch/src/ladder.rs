//! Binomial ladder sketch.
//!
//! A bit array of `N` bits and a keyed hash mapping each key to `H` distinct
//! rung indices. A key's height is the number of its rungs currently set.
//!
//! Invariant: the array stays near 50% full. Every climb (one bit set) is
//! paired with clearing two uniformly random bits, which on a half-full array
//! clears one bit on average. Keys already at the top set two random bits
//! instead of climbing, still followed by the two compensating clears.
//!
//! Bits live in `AtomicU64` words, so concurrent steps race per bit rather
//! than through a lock. A lost update only perturbs the estimate.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bulwark_core::error::ConfigError;
use bulwark_core::traits::PasswordPopularity;
use bulwark_core::types::Hash256;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use tracing::trace;

const WORD_BITS: usize = 64;

pub struct BinomialLadderSketch {
    words: Vec<AtomicU64>,
    num_bits: usize,
    height: u32,
    rung_key: [u8; 32],
}

impl std::fmt::Debug for BinomialLadderSketch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinomialLadderSketch")
            .field("num_bits", &self.num_bits)
            .field("height", &self.height)
            .finish()
    }
}

impl BinomialLadderSketch {
    /// Create a sketch with a random rung key.
    pub fn new(num_bits: usize, height: u32) -> Result<Self, ConfigError> {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self::with_key(num_bits, height, key)
    }

    /// Create a sketch whose rung positions are derived from `rung_key`.
    ///
    /// The array starts randomly half full, so unseen keys already read as
    /// `Binomial(H, 0.5)`.
    pub fn with_key(num_bits: usize, height: u32, rung_key: [u8; 32]) -> Result<Self, ConfigError> {
        if num_bits == 0 || height == 0 {
            return Err(ConfigError::InvalidSketchDimensions(format!(
                "ladder bits {num_bits} and height {height} must be positive"
            )));
        }
        if (height as usize) > num_bits {
            return Err(ConfigError::InvalidSketchDimensions(format!(
                "ladder of {num_bits} bits cannot hold {height} distinct rungs"
            )));
        }
        Ok(Self::build(num_bits, height, rung_key))
    }

    /// Dimensions must already be validated.
    pub(crate) fn build(num_bits: usize, height: u32, rung_key: [u8; 32]) -> Self {
        let word_count = num_bits.div_ceil(WORD_BITS);
        let mut rng = rand::thread_rng();
        let mut words: Vec<AtomicU64> = (0..word_count)
            .map(|_| AtomicU64::new(rng.next_u64()))
            .collect();

        let tail = num_bits % WORD_BITS;
        if tail != 0 {
            if let Some(last) = words.last_mut() {
                *last.get_mut() &= (1u64 << tail) - 1;
            }
        }

        Self {
            words,
            num_bits,
            height,
            rung_key,
        }
    }

    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// The `H` distinct rung indices of `key`.
    pub fn rungs(&self, key: &[u8]) -> Vec<usize> {
        let mut hasher = blake3::Hasher::new_keyed(&self.rung_key);
        hasher.update(key);
        let mut xof = hasher.finalize_xof();

        let mut rungs = Vec::with_capacity(self.height as usize);
        let mut buf = [0u8; 8];
        while rungs.len() < self.height as usize {
            xof.fill(&mut buf);
            let index = (u64::from_le_bytes(buf) % self.num_bits as u64) as usize;
            if !rungs.contains(&index) {
                rungs.push(index);
            }
        }
        rungs
    }

    fn get_bit(&self, index: usize) -> bool {
        let word = self.words[index / WORD_BITS].load(Ordering::Relaxed);
        word & (1u64 << (index % WORD_BITS)) != 0
    }

    fn assign_bit(&self, index: usize, value: bool) {
        let mask = 1u64 << (index % WORD_BITS);
        let word = &self.words[index / WORD_BITS];
        if value {
            word.fetch_or(mask, Ordering::Relaxed);
        } else {
            word.fetch_and(!mask, Ordering::Relaxed);
        }
    }

    fn random_index<R: Rng>(&self, rng: &mut R) -> usize {
        rng.gen_range(0..self.num_bits)
    }

    /// Number of `key`'s rungs currently set. Read-only.
    pub fn get_height(&self, key: &[u8]) -> u32 {
        self.rungs(key)
            .into_iter()
            .filter(|&i| self.get_bit(i))
            .count() as u32
    }

    /// Observe `key` once. Returns its height before the step.
    pub fn step(&self, key: &[u8]) -> u32 {
        let zero_rungs: Vec<usize> = self
            .rungs(key)
            .into_iter()
            .filter(|&i| !self.get_bit(i))
            .collect();
        let before = self.height - zero_rungs.len() as u32;

        let mut rng = rand::thread_rng();
        match zero_rungs.choose(&mut rng) {
            Some(&rung) => self.assign_bit(rung, true),
            None => {
                for _ in 0..2 {
                    let index = self.random_index(&mut rng);
                    self.assign_bit(index, true);
                }
            }
        }
        for _ in 0..2 {
            let index = self.random_index(&mut rng);
            self.assign_bit(index, false);
        }

        trace!(before, "ladder: stepped key");
        before
    }

    /// Set or clear one uniformly random bit.
    ///
    /// Lets a client that already knows a key is at the top perform the
    /// compensating writes without contacting the key's owner.
    pub fn assign_random_bit(&self, value: bool) {
        let index = self.random_index(&mut rand::thread_rng());
        self.assign_bit(index, value);
    }

    /// Fraction of bits currently set.
    pub fn fill_fraction(&self) -> f64 {
        let ones: u64 = self
            .words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as u64)
            .sum();
        ones as f64 / self.num_bits as f64
    }
}

#[async_trait]
impl PasswordPopularity for BinomialLadderSketch {
    fn max_height(&self) -> u32 {
        self.height
    }

    async fn height(&self, key: &Hash256) -> Option<u32> {
        Some(self.get_height(key.as_bytes()))
    }

    async fn step(&self, key: &Hash256) -> u32 {
        BinomialLadderSketch::step(self, key.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sketch(bits: usize, height: u32) -> BinomialLadderSketch {
        BinomialLadderSketch::with_key(bits, height, [9u8; 32]).unwrap()
    }

    // --- construction ---

    #[test]
    fn zero_dimensions_rejected() {
        assert!(BinomialLadderSketch::new(0, 48).is_err());
        assert!(BinomialLadderSketch::new(1024, 0).is_err());
        assert!(BinomialLadderSketch::new(16, 48).is_err());
    }

    #[test]
    fn starts_roughly_half_full() {
        let s = sketch(1 << 16, 48);
        let fill = s.fill_fraction();
        assert!((0.45..0.55).contains(&fill), "initial fill {fill}");
    }

    #[test]
    fn tail_bits_are_masked() {
        let s = sketch(70, 4);
        let ones: u32 = s.words.iter().map(|w| w.load(Ordering::Relaxed).count_ones()).sum();
        assert!(ones as usize <= 70);
    }

    // --- rungs ---

    #[test]
    fn rungs_are_distinct_and_in_range() {
        let s = sketch(64, 48);
        let rungs = s.rungs(b"password");
        assert_eq!(rungs.len(), 48);
        let mut sorted = rungs.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 48);
        assert!(rungs.iter().all(|&i| i < 64));
    }

    #[test]
    fn rungs_deterministic_per_key() {
        let a = sketch(1 << 12, 16);
        let b = sketch(1 << 12, 16);
        assert_eq!(a.rungs(b"hunter2"), b.rungs(b"hunter2"));
        assert_ne!(a.rungs(b"hunter2"), a.rungs(b"hunter3"));
    }

    // --- step / height ---

    #[test]
    fn step_returns_height_before() {
        let s = sketch(1 << 16, 48);
        let before = s.get_height(b"123456");
        assert_eq!(s.step(b"123456"), before);
    }

    #[test]
    fn repeated_steps_reach_the_top() {
        let s = sketch(1 << 20, 48);
        for _ in 0..200 {
            s.step(b"123456");
        }
        assert_eq!(s.get_height(b"123456"), 48);
    }

    #[test]
    fn step_at_top_still_returns_full_height() {
        let s = sketch(1 << 20, 8);
        for _ in 0..64 {
            s.step(b"abc");
        }
        assert_eq!(s.step(b"abc"), 8);
    }

    #[test]
    fn fill_stays_near_half_under_load() {
        let s = sketch(1 << 14, 16);
        for i in 0..50_000u32 {
            s.step(&i.to_le_bytes());
        }
        let fill = s.fill_fraction();
        assert!((0.35..0.65).contains(&fill), "fill drifted to {fill}");
    }

    #[test]
    fn unseen_heights_look_binomial() {
        let s = sketch(1 << 20, 48);
        let n = 2_000u32;
        let total: u64 = (0..n).map(|i| s.get_height(&i.to_be_bytes()) as u64).sum();
        let mean = total as f64 / n as f64;
        // Binomial(48, 0.5): mean 24, sd ~3.46, sd of the sample mean ~0.08.
        assert!((23.0..25.0).contains(&mean), "mean height {mean}");
    }

    #[tokio::test]
    async fn popularity_trait_delegates() {
        let s = sketch(1 << 16, 16);
        let key = Hash256::digest(b"letmein");
        let p: &dyn PasswordPopularity = &s;
        assert_eq!(p.max_height(), 16);
        let before = p.height(&key).await;
        assert_eq!(Some(p.step(&key).await), before);
    }

    // --- proptest ---

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn own_height_never_decreases_on_sparse_array(key in proptest::collection::vec(any::<u8>(), 1..32)) {
            // On a large array the random clears almost never hit the key's own rungs.
            let s = sketch(1 << 22, 24);
            let mut last = s.get_height(&key);
            for _ in 0..30 {
                s.step(&key);
                let now = s.get_height(&key);
                prop_assert!(now >= last.saturating_sub(1), "height fell from {} to {}", last, now);
                last = now;
            }
            prop_assert_eq!(last, 24);
        }
    }
}
