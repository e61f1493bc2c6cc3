//! # bulwark-sketch — Bounded-memory probabilistic structures.
//!
//! - [`ladder::BinomialLadderSketch`]: frequency estimator over a shared bit
//!   array. Each key owns `H` hashed rungs; observing a key sets one of its
//!   unset rungs and clears random bits elsewhere, keeping the array near 50%
//!   full. A key's height (rungs set) follows `Binomial(H, 0.5)` until it is
//!   observed often, so frequent keys stand out without storing any key.
//! - [`shards::LadderShardStore`]: the shard-owner side of the distributed
//!   ladder, one lazily allocated ladder per owned shard.
//! - [`membership::AgingMembershipSketch`]: approximate "seen recently" test
//!   over a grid of 2-bit saturating counters that ages itself in the
//!   background instead of storing timestamps.

pub mod config;
pub mod ladder;
pub mod membership;
pub mod shards;

pub use config::{LadderConfig, MembershipConfig};
pub use ladder::BinomialLadderSketch;
pub use membership::AgingMembershipSketch;
pub use shards::LadderShardStore;
