//! # bulwark-node — Decision engine and node composition.
//!
//! - [`engine::DecisionEngine`]: scores each login attempt against the
//!   client IP's block score, the password's popularity and the account's
//!   credit, and returns one definite [`Outcome`](bulwark_core::Outcome).
//! - [`cache::SelfLoadingCache`]: bounded LRU with single-flight loads.
//! - [`memory::MemoryMonitor`]: evicts from registered caches under memory pressure.
//! - [`store`]: account records and the [`AccountStore`](store::AccountStore) adapter.
//! - [`ip_history::IpHistory`]: per-IP block score and pending typo records.
//! - [`jobs::BackgroundJobs`]: fire-and-forget work off the request path.
//! - `metrics`: counters for caches, jobs and attempt routing, reported to
//!   whichever `metrics` recorder the deployment installs.
//! - [`node::Node`]: wires all of the above for one fleet member.
//! - [`config::NodeConfig`]: layered file and environment configuration.

pub mod cache;
pub mod config;
pub mod engine;
pub mod ip_history;
pub mod jobs;
pub mod memory;
mod metrics;
pub mod node;
pub mod store;

pub use cache::{Evictable, SelfLoadingCache};
pub use config::NodeConfig;
pub use engine::DecisionEngine;
pub use memory::{MemoryMonitor, MemoryReader, ProcessMemory};
pub use node::Node;
pub use store::{Account, AccountStore, MemoryAccountStore};
