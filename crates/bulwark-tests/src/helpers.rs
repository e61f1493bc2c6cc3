//! Shared fixtures for scenario and fleet tests.

use std::net::IpAddr;
use std::sync::Arc;

use bulwark_core::types::{Hash256, HostId, LoginAttempt};
use bulwark_credentials::HashParams;
use bulwark_network::{FleetConfig, LoopbackTransport, ip_routing_key};
use bulwark_node_lib::{DecisionEngine, MemoryAccountStore, Node, NodeConfig, ProcessMemory};
use bulwark_sketch::{AgingMembershipSketch, BinomialLadderSketch, LadderConfig, MembershipConfig};
use chrono::{DateTime, TimeZone, Utc};

/// Fixed clock so decay never interferes with score assertions.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Production tuning with cheap hashing and small sketches.
pub fn fast_config() -> NodeConfig {
    NodeConfig {
        hashing: HashParams::insecure_fast(),
        ladder: LadderConfig {
            num_bits: 1 << 24,
            shard_count: 8,
            secret: "test-fleet".into(),
            ..LadderConfig::default()
        },
        membership: MembershipConfig {
            columns: 1 << 16,
            secret: "test-fleet".into(),
            ..MembershipConfig::default()
        },
        fleet: FleetConfig::single("solo"),
        ..NodeConfig::default()
    }
}

/// An engine over a single in-process ladder.
pub struct LocalEngine {
    pub engine: DecisionEngine,
    pub ladder: Arc<BinomialLadderSketch>,
    pub store: Arc<MemoryAccountStore>,
}

/// Must be called inside a tokio runtime.
pub fn local_engine(config: &NodeConfig) -> LocalEngine {
    let store = Arc::new(MemoryAccountStore::new(
        config.engine.credit_half_life,
        config.engine.recent_incorrect_window,
    ));
    let ladder = Arc::new(BinomialLadderSketch::new(1 << 22, config.popularity.ladder_height).unwrap());
    let membership = Arc::new(AgingMembershipSketch::new(&config.membership).unwrap());
    let engine = DecisionEngine::new(config, store.clone(), ladder.clone(), membership).unwrap();
    LocalEngine {
        engine,
        ladder,
        store,
    }
}

/// Attempt with an id derived from `seq`, at [`t0`].
pub fn attempt(seq: u64, account: &str, ip: IpAddr) -> LoginAttempt {
    LoginAttempt {
        id: Hash256::digest(&seq.to_le_bytes()),
        account_id: account.into(),
        client_ip: ip,
        server_ip: None,
        timestamp: t0(),
        device_cookie_hash: None,
    }
}

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

/// In-process fleet sharing one transport and one durable account store.
pub struct Fleet {
    pub transport: Arc<LoopbackTransport>,
    pub store: Arc<MemoryAccountStore>,
    pub nodes: Vec<Arc<Node>>,
}

impl Fleet {
    pub fn host(i: usize) -> HostId {
        HostId::new(format!("host-{i}"))
    }

    /// Must be called inside a tokio runtime.
    pub fn start(size: usize) -> Self {
        let transport = Arc::new(LoopbackTransport::new());
        let base = fast_config();
        let store = Arc::new(MemoryAccountStore::new(
            base.engine.credit_half_life,
            base.engine.recent_incorrect_window,
        ));
        let hosts: Vec<String> = (0..size).map(|i| Self::host(i).0).collect();

        let nodes = (0..size)
            .map(|i| {
                let mut config = base.clone();
                config.fleet.hosts = hosts.clone();
                config.fleet.local_host = hosts[i].clone();
                config.fleet.salt = "fleet-salt".into();
                let node = Node::build(config, transport.clone(), store.clone(), Arc::new(ProcessMemory))
                    .unwrap();
                transport.register(Self::host(i), node.shard_server().clone());
                node
            })
            .collect();

        Self {
            transport,
            store,
            nodes,
        }
    }

    /// Index of the node owning `ip`'s block score.
    pub fn ip_owner_index(&self, ip: IpAddr) -> usize {
        let owner = self.nodes[0]
            .ladder()
            .responsibility()
            .find_member_responsible(&ip_routing_key(ip))
            .clone();
        self.index_of(&owner)
    }

    fn index_of(&self, host: &HostId) -> usize {
        self.nodes
            .iter()
            .position(|n| n.config().fleet.local_id() == *host)
            .unwrap()
    }

    /// Index of the node owning `key`'s ladder shard.
    pub fn owner_index(&self, key: &Hash256) -> usize {
        let ladder = self.nodes[0].ladder();
        let owner = ladder.owner_of_shard(ladder.shard_of(key));
        self.index_of(&owner)
    }
}
