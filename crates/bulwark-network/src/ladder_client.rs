//! Client side of the distributed binomial ladder.
//!
//! A key's shard is `shard_for(key, S)`; the shard's owner comes from the
//! current [`ResponsibilityMap`]. Each call carries the configured deadline.
//! An unreachable or slow owner leaves the key's height unknown (`None`)
//! instead of failing the caller; the decision engine reads an unknown
//! height as popular.
//!
//! Keys observed at the top of the ladder are remembered for a freshness
//! window. While fresh, a step skips the owner entirely and performs the
//! compensating random writes against random shards, so a popular password
//! does not pin one host.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bulwark_core::error::{ConfigError, NetworkError};
use bulwark_core::traits::PasswordPopularity;
use bulwark_core::types::{Hash256, HostId};
use bulwark_sketch::LadderConfig;
use bulwark_sketch::shards::shard_for;
use futures::future::join_all;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::FleetConfig;
use crate::protocol::{ShardRequest, ShardResponse};
use crate::responsibility::ResponsibilityMap;
use crate::server::ShardServer;
use crate::transport::ShardTransport;

const SHARD_ROUTING_PREFIX: &[u8] = b"ladder-shard:";

fn shard_routing_key(shard: u32) -> Vec<u8> {
    let mut key = SHARD_ROUTING_PREFIX.to_vec();
    key.extend_from_slice(&shard.to_le_bytes());
    key
}

pub struct DistributedLadder {
    local_host: HostId,
    local_server: Option<Arc<ShardServer>>,
    salt: Vec<u8>,
    map: RwLock<Arc<ResponsibilityMap>>,
    transport: Arc<dyn ShardTransport>,
    shard_count: u32,
    height: u32,
    call_timeout: Duration,
    freshness: Duration,
    top_of_ladder: Mutex<LruCache<Hash256, Instant>>,
}

impl DistributedLadder {
    /// `local_server`, when given, serves shards this host owns without
    /// going through the transport.
    pub fn new(
        fleet: &FleetConfig,
        ladder: &LadderConfig,
        transport: Arc<dyn ShardTransport>,
        local_server: Option<Arc<ShardServer>>,
    ) -> Result<Self, ConfigError> {
        fleet.validate()?;
        ladder.validate()?;
        let map = ResponsibilityMap::new(fleet.host_ids(), fleet.salt.as_bytes(), 0)?;
        let capacity =
            NonZeroUsize::new(fleet.top_of_ladder_cache_capacity).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            local_host: fleet.local_id(),
            local_server,
            salt: fleet.salt.as_bytes().to_vec(),
            map: RwLock::new(Arc::new(map)),
            transport,
            shard_count: ladder.shard_count,
            height: ladder.height,
            call_timeout: fleet.call_timeout(),
            freshness: fleet.top_of_ladder_freshness(),
            top_of_ladder: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// The routing map currently in force.
    pub fn responsibility(&self) -> Arc<ResponsibilityMap> {
        self.map.read().clone()
    }

    /// Replace the host set. In-flight calls finish against the map they
    /// started with. Returns the new generation.
    pub fn set_hosts(&self, hosts: Vec<HostId>) -> Result<u64, ConfigError> {
        let mut map = self.map.write();
        let next = ResponsibilityMap::new(hosts, &self.salt, map.generation() + 1)?;
        let generation = next.generation();
        info!(generation, hosts = next.len(), "ladder_client: host set changed");
        *map = Arc::new(next);
        Ok(generation)
    }

    pub fn owner_of_shard(&self, shard: u32) -> HostId {
        self.responsibility()
            .find_member_responsible(&shard_routing_key(shard))
            .clone()
    }

    pub fn shard_of(&self, key: &Hash256) -> u32 {
        shard_for(key.as_bytes(), self.shard_count)
    }

    async fn call_once(&self, request: ShardRequest) -> Result<ShardResponse, NetworkError> {
        let owner = self.owner_of_shard(request.shard());
        let response = match &self.local_server {
            Some(server) if owner == self.local_host => server.handle(&request),
            _ => {
                let reply = self.transport.call(&owner, request.encode()?).await?;
                ShardResponse::decode(&reply)?
            }
        };
        match response {
            ShardResponse::Error(msg) => Err(NetworkError::UnexpectedResponse(format!(
                "{} from {owner}: {msg}",
                request.verb()
            ))),
            other => Ok(other),
        }
    }

    async fn call(&self, request: ShardRequest) -> Result<ShardResponse, NetworkError> {
        let shard = request.shard();
        tokio::time::timeout(self.call_timeout, self.call_once(request))
            .await
            .map_err(|_| NetworkError::Timeout(format!("shard {shard}")))?
    }

    async fn call_for_height(&self, request: ShardRequest) -> Option<u32> {
        let verb = request.verb();
        match self.call(request).await {
            Ok(ShardResponse::Height(h)) => Some(h.min(self.height)),
            Ok(other) => {
                warn!(verb, "ladder_client: unexpected response {other:?}, height unknown");
                None
            }
            Err(e) => {
                warn!(verb, "ladder_client: shard call failed, height unknown: {e}");
                None
            }
        }
    }

    fn is_fresh_at_top(&self, key: &Hash256) -> bool {
        let mut cache = self.top_of_ladder.lock();
        match cache.get(key) {
            Some(expiry) if Instant::now() < *expiry => true,
            Some(_) => {
                cache.pop(key);
                false
            }
            None => false,
        }
    }

    fn mark_at_top(&self, key: &Hash256) {
        self.top_of_ladder
            .lock()
            .put(*key, Instant::now() + self.freshness);
    }

    /// Two random sets and two random clears on random shards, under one
    /// shared deadline.
    async fn compensate_randomly(&self) {
        let requests: Vec<ShardRequest> = {
            let mut rng = rand::thread_rng();
            [true, true, false, false]
                .into_iter()
                .map(|value| ShardRequest::AssignRandomBit {
                    shard: rng.gen_range(0..self.shard_count),
                    value,
                })
                .collect()
        };
        let calls = join_all(requests.into_iter().map(|r| self.call_once(r)));
        match tokio::time::timeout(self.call_timeout, calls).await {
            Ok(results) => {
                for e in results.into_iter().filter_map(Result::err) {
                    debug!("ladder_client: random write failed: {e}");
                }
            }
            Err(_) => debug!("ladder_client: random writes timed out"),
        }
    }
}

#[async_trait]
impl PasswordPopularity for DistributedLadder {
    fn max_height(&self) -> u32 {
        self.height
    }

    async fn height(&self, key: &Hash256) -> Option<u32> {
        if self.is_fresh_at_top(key) {
            return Some(self.height);
        }
        let shard = self.shard_of(key);
        self.call_for_height(ShardRequest::GetHeight { shard, key: *key })
            .await
    }

    async fn step(&self, key: &Hash256) -> u32 {
        if self.is_fresh_at_top(key) {
            self.compensate_randomly().await;
            return self.height;
        }
        let shard = self.shard_of(key);
        let Some(before) = self
            .call_for_height(ShardRequest::Step { shard, key: *key })
            .await
        else {
            return 0;
        };
        if before + 1 >= self.height {
            self.mark_at_top(key);
        }
        before
    }
}
