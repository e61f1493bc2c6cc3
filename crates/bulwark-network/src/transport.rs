//! Cross-host call seam.
//!
//! The wire transport is supplied by the deployment; the ladder client only
//! needs "send these bytes to that host and give me the reply", for shard
//! verbs and forwarded attempts alike.
//! [`LoopbackTransport`] routes calls to in-process servers and can simulate
//! unreachable or slow hosts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bulwark_core::error::NetworkError;
use bulwark_core::types::HostId;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::server::ShardServer;

#[async_trait]
pub trait ShardTransport: Send + Sync {
    /// Deliver an encoded request to `host` and return its encoded response.
    async fn call(&self, host: &HostId, request: Vec<u8>) -> Result<Vec<u8>, NetworkError>;
}

/// In-process transport over a table of [`ShardServer`]s.
#[derive(Default)]
pub struct LoopbackTransport {
    servers: RwLock<HashMap<HostId, Arc<ShardServer>>>,
    unreachable: DashMap<HostId, ()>,
    delays: DashMap<HostId, Duration>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, host: HostId, server: Arc<ShardServer>) {
        self.servers.write().insert(host, server);
    }

    pub fn deregister(&self, host: &HostId) {
        self.servers.write().remove(host);
    }

    /// Make calls to `host` fail as if it were down.
    pub fn set_unreachable(&self, host: &HostId, unreachable: bool) {
        if unreachable {
            self.unreachable.insert(host.clone(), ());
        } else {
            self.unreachable.remove(host);
        }
    }

    /// Delay every reply from `host`.
    pub fn set_delay(&self, host: &HostId, delay: Option<Duration>) {
        match delay {
            Some(d) => {
                self.delays.insert(host.clone(), d);
            }
            None => {
                self.delays.remove(host);
            }
        }
    }
}

#[async_trait]
impl ShardTransport for LoopbackTransport {
    async fn call(&self, host: &HostId, request: Vec<u8>) -> Result<Vec<u8>, NetworkError> {
        if self.unreachable.contains_key(host) {
            return Err(NetworkError::HostUnreachable(host.to_string()));
        }
        let delay = self.delays.get(host).map(|d| *d.value());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let server = self
            .servers
            .read()
            .get(host)
            .cloned()
            .ok_or_else(|| NetworkError::HostUnreachable(host.to_string()))?;
        server.handle_bytes(&request).await
    }
}
