//! Trait interfaces between crates.
//!
//! - [`PasswordPopularity`]: popularity estimate of a password key
//!   (bulwark-sketch implements it locally, bulwark-network across a fleet).

use async_trait::async_trait;

use crate::types::Hash256;

/// Frequency estimate of a key, backed by a binomial ladder.
///
/// Implementations never return errors. A backend that cannot answer reports
/// an unknown height (`None`) so callers can choose a conservative reading
/// rather than mistaking the silence for an unpopular password.
#[async_trait]
pub trait PasswordPopularity: Send + Sync {
    /// Number of rungs per key (the largest height [`height`](Self::height) can report).
    fn max_height(&self) -> u32;

    /// Current height of `key` without modifying the ladder, or `None` when
    /// the backend holding `key` could not be consulted.
    async fn height(&self, key: &Hash256) -> Option<u32>;

    /// Climb `key` one rung. Returns the height before the step, or 0 when
    /// the step could not be delivered.
    async fn step(&self, key: &Hash256) -> u32;

    /// Whether `key` has reached the top of the ladder.
    ///
    /// Default implementation compares [`height`](Self::height) with
    /// [`max_height`](Self::max_height).
    async fn is_at_top(&self, key: &Hash256) -> bool {
        self.height(key)
            .await
            .is_some_and(|height| height >= self.max_height())
    }
}
