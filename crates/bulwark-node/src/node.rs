//! Node composition.
//!
//! A [`Node`] owns everything one fleet member runs: the account store, the
//! ladder shards it is responsible for and the server that answers for them,
//! the distributed ladder client, the membership sketch, the decision engine
//! and the memory monitor. Nothing is global; several nodes can share one
//! process, which is how the fleet tests run.
//!
//! [`Node::decide`] is the entry point for login attempts: an attempt whose
//! client IP belongs to another host is forwarded there, so each IP's block
//! score lives on exactly one host.

use std::sync::{Arc, Weak};

use bulwark_core::error::{BulwarkError, NetworkError};
use bulwark_core::types::{AttemptRecord, LoginAttempt};
use bulwark_network::{
    AttemptForwarder, AttemptHandler, DistributedLadder, LoopbackTransport, ShardServer,
    ShardTransport, ip_routing_key,
};
use bulwark_sketch::{AgingMembershipSketch, LadderShardStore};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::Evictable;
use crate::config::NodeConfig;
use crate::engine::DecisionEngine;
use crate::memory::{MemoryMonitor, MemoryReader, ProcessMemory};
use crate::metrics::RoutingMetrics;
use crate::store::{AccountStore, MemoryAccountStore};

pub struct Node {
    config: NodeConfig,
    engine: Arc<DecisionEngine>,
    forwarder: AttemptForwarder,
    routing: RoutingMetrics,
    ladder: Arc<DistributedLadder>,
    shard_server: Arc<ShardServer>,
    store: Arc<dyn AccountStore>,
    memory: Arc<MemoryMonitor>,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    /// Single-process node. Every fleet host named in the config that is not
    /// this one is unreachable, so configure a one-host fleet.
    pub fn new(config: NodeConfig) -> Result<Arc<Self>, BulwarkError> {
        let transport = Arc::new(LoopbackTransport::new());
        let store = Arc::new(MemoryAccountStore::new(
            config.engine.credit_half_life,
            config.engine.recent_incorrect_window,
        ));
        let node = Self::build(config, transport.clone(), store, Arc::new(ProcessMemory))?;
        transport.register(node.config.fleet.local_id(), node.shard_server.clone());
        Ok(node)
    }

    /// Node wired to an existing transport and store. The caller registers
    /// [`shard_server`](Self::shard_server) with the transport under this
    /// node's host id; it answers shard verbs and attempts forwarded here.
    pub fn build(
        config: NodeConfig,
        transport: Arc<dyn ShardTransport>,
        store: Arc<dyn AccountStore>,
        reader: Arc<dyn MemoryReader>,
    ) -> Result<Arc<Self>, BulwarkError> {
        config.validate()?;

        let shards = Arc::new(LadderShardStore::new(config.ladder.clone())?);
        let shard_server = Arc::new(ShardServer::new(shards));
        let ladder = Arc::new(DistributedLadder::new(
            &config.fleet,
            &config.ladder,
            transport.clone(),
            Some(shard_server.clone()),
        )?);
        let membership = Arc::new(AgingMembershipSketch::new(&config.membership)?);
        let engine = Arc::new(DecisionEngine::new(
            &config,
            store.clone(),
            ladder.clone(),
            membership,
        )?);
        let handler: Weak<dyn AttemptHandler> = Arc::downgrade(&engine) as Weak<DecisionEngine>;
        shard_server.set_attempt_handler(handler);
        let forwarder = AttemptForwarder::new(transport, config.fleet.forward_timeout());

        let memory = Arc::new(MemoryMonitor::new(config.memory.clone(), reader));
        for cache in engine.evictables() {
            memory.register(cache);
        }

        info!(
            host = %config.fleet.local_host,
            fleet = config.fleet.hosts.len(),
            shards = config.ladder.shard_count,
            "node: built"
        );
        Ok(Arc::new(Self {
            config,
            engine,
            forwarder,
            routing: RoutingMetrics::default(),
            ladder,
            shard_server,
            store,
            memory,
            monitor_task: Mutex::new(None),
        }))
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<DecisionEngine> {
        &self.engine
    }

    pub fn ladder(&self) -> &Arc<DistributedLadder> {
        &self.ladder
    }

    pub fn shard_server(&self) -> &Arc<ShardServer> {
        &self.shard_server
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    pub fn memory(&self) -> &Arc<MemoryMonitor> {
        &self.memory
    }

    /// Decide `attempt` on the host that owns its client IP.
    ///
    /// Owned IPs are decided by this node's engine. Others are forwarded; if
    /// the owner cannot be reached in time the attempt is decided here so
    /// the caller still gets an answer, at the cost of that IP's score being
    /// split until the owner is back. An owner that received the attempt
    /// and failed to decide it reports an error.
    pub async fn decide(
        &self,
        attempt: &LoginAttempt,
        password: &str,
    ) -> Result<AttemptRecord, BulwarkError> {
        let owner = self
            .ladder
            .responsibility()
            .find_member_responsible(&ip_routing_key(attempt.client_ip))
            .clone();
        if owner == self.config.fleet.local_id() {
            return self.engine.decide(attempt, password).await;
        }

        self.routing.forwarded_total.increment(1);
        match self.forwarder.forward(&owner, attempt, password).await {
            Ok(record) => Ok(record),
            Err(e @ NetworkError::Rejected { .. }) => Err(e.into()),
            Err(e) => {
                self.routing.forward_fallbacks_total.increment(1);
                warn!(%owner, ip = %attempt.client_ip, "node: forwarding failed, deciding locally: {e}");
                self.engine.decide(attempt, password).await
            }
        }
    }

    /// Start the memory monitor. Idempotent.
    pub fn start(&self) {
        let mut task = self.monitor_task.lock();
        if task.is_none() {
            *task = Some(self.memory.clone().spawn());
            debug!("node: memory monitor started");
        }
    }

    /// Stop background tasks after draining queued jobs.
    pub async fn shutdown(&self) -> Result<(), BulwarkError> {
        self.engine.flush().await?;
        if let Some(task) = self.monitor_task.lock().take() {
            task.abort();
        }
        for cache in self.engine.evictables() {
            debug!(cache = cache.name(), entries = cache.len(), "node: cache at shutdown");
        }
        info!(host = %self.config.fleet.local_host, "node: shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_core::traits::PasswordPopularity;
    use bulwark_core::types::{Hash256, Outcome};
    use bulwark_credentials::HashParams;
    use bulwark_network::FleetConfig;
    use bulwark_sketch::{LadderConfig, MembershipConfig};
    use chrono::Utc;

    fn config() -> NodeConfig {
        NodeConfig {
            hashing: HashParams::insecure_fast(),
            ladder: LadderConfig {
                num_bits: 1 << 20,
                shard_count: 8,
                ..LadderConfig::default()
            },
            membership: MembershipConfig {
                columns: 1 << 12,
                ..MembershipConfig::default()
            },
            fleet: FleetConfig::single("solo"),
            ..NodeConfig::default()
        }
    }

    #[tokio::test]
    async fn standalone_node_decides() {
        let node = Node::new(config()).unwrap();
        node.start();
        node.start();
        node.engine()
            .create_account("alice".into(), "pw", Utc::now())
            .await
            .unwrap();
        let attempt = LoginAttempt {
            id: Hash256([1; 32]),
            account_id: "alice".into(),
            client_ip: "198.51.100.1".parse().unwrap(),
            server_ip: None,
            timestamp: Utc::now(),
            device_cookie_hash: None,
        };
        let record = node.decide(&attempt, "pw").await.unwrap();
        assert_eq!(record.outcome, Outcome::CredentialsValid);
        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_config_fails_fast() {
        let mut cfg = config();
        cfg.ladder.shard_count = 7;
        assert!(matches!(Node::new(cfg), Err(BulwarkError::Config(_))));
    }

    #[tokio::test]
    async fn local_shards_answer_without_transport() {
        let node = Node::new(config()).unwrap();
        let key = Hash256::digest(b"123456");
        let ladder = node.ladder();
        let before = ladder.step(&key).await;
        assert!(before <= ladder.max_height());
        assert!(ladder.height(&key).await.is_some_and(|after| after >= before));
        assert_eq!(node.shard_server().store().allocated(), 1);
    }
}
