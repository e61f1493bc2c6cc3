//! # bulwark-network — Fleet routing and the distributed ladder.
//!
//! - [`responsibility::ResponsibilityMap`]: highest-random-weight mapping
//!   from keys (IPs, accounts, ladder shards) to owning hosts.
//! - [`protocol`]: magic-prefixed bincode messages for shard calls and
//!   forwarded attempts.
//! - [`forward`]: routes an attempt to the host owning its client IP.
//! - [`server::ShardServer`]: shard-owner side, over a `LadderShardStore`.
//! - [`transport::ShardTransport`]: the seam a deployment plugs its wire
//!   transport into; [`transport::LoopbackTransport`] runs a fleet in-process.
//! - [`ladder_client::DistributedLadder`]: `PasswordPopularity` over the
//!   fleet, with per-call deadlines and a top-of-ladder cache.

pub mod config;
pub mod forward;
pub mod ladder_client;
pub mod protocol;
pub mod responsibility;
pub mod server;
pub mod transport;

pub use config::FleetConfig;
pub use ladder_client::DistributedLadder;
pub use forward::{AttemptForwarder, AttemptHandler, ip_routing_key};
pub use protocol::{FleetRequest, FleetResponse, ForwardedAttempt, ForwardedDecision, ShardRequest, ShardResponse};
pub use responsibility::ResponsibilityMap;
pub use server::ShardServer;
pub use transport::{LoopbackTransport, ShardTransport};
