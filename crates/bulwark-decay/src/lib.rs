//! # bulwark-decay — Decaying scores and popularity curves.
//!
//! - **Decaying scores**: a scalar whose effective value halves every
//!   half-life, stored as `(value, last_updated)` so reads and updates are O(1).
//! - **Popularity curves**: map a password's binomial-ladder height to the
//!   multipliers applied to the block threshold and to failure penalties.

pub mod popularity;
pub mod score;

pub use popularity::PopularityCurve;
pub use score::{DecayingScore, HalfLife};
