//! Attempt forwarding.
//!
//! Each client IP has one owning host, chosen by the responsibility map over
//! [`ip_routing_key`]. The owner keeps that IP's block score, so every
//! attempt from the IP must be decided there. A host receiving an attempt
//! for an IP it does not own sends it to the owner with [`AttemptForwarder`];
//! the owner's [`ShardServer`](crate::server::ShardServer) hands it to the
//! registered [`AttemptHandler`].

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bulwark_core::error::{BulwarkError, NetworkError};
use bulwark_core::types::{AttemptRecord, HostId, LoginAttempt};
use tracing::debug;

use crate::protocol::{FleetRequest, FleetResponse, ForwardedAttempt};
use crate::transport::ShardTransport;

const IP_ROUTING_PREFIX: &[u8] = b"client-ip:";

/// Responsibility-map key for a client IP.
pub fn ip_routing_key(ip: IpAddr) -> Vec<u8> {
    let mut key = IP_ROUTING_PREFIX.to_vec();
    match ip {
        IpAddr::V4(v4) => key.extend_from_slice(&v4.octets()),
        IpAddr::V6(v6) => key.extend_from_slice(&v6.octets()),
    }
    key
}

/// Decides attempts this host owns. Implemented by the decision engine.
#[async_trait]
pub trait AttemptHandler: Send + Sync {
    async fn decide_attempt(
        &self,
        attempt: LoginAttempt,
        password: String,
    ) -> Result<AttemptRecord, BulwarkError>;
}

/// Sends attempts to their owning host and waits for the decision.
pub struct AttemptForwarder {
    transport: Arc<dyn ShardTransport>,
    timeout: Duration,
}

impl AttemptForwarder {
    pub fn new(transport: Arc<dyn ShardTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Ask `owner` to decide `attempt`.
    ///
    /// [`NetworkError::Rejected`] means the owner received the attempt and
    /// failed to decide it; every other error means it may never have
    /// arrived.
    pub async fn forward(
        &self,
        owner: &HostId,
        attempt: &LoginAttempt,
        password: &str,
    ) -> Result<AttemptRecord, NetworkError> {
        let request = FleetRequest::Decide(ForwardedAttempt::new(attempt, password)).encode()?;
        debug!(%owner, attempt = %attempt.id, "forward: sending attempt to owner");
        let reply = tokio::time::timeout(self.timeout, self.transport.call(owner, request))
            .await
            .map_err(|_| NetworkError::Timeout(owner.to_string()))??;
        match FleetResponse::decode(&reply)? {
            FleetResponse::Decided(decision) => Ok(decision.into_record(attempt.clone())),
            FleetResponse::Rejected(reason) => Err(NetworkError::Rejected {
                host: owner.to_string(),
                reason,
            }),
            FleetResponse::Shard(other) => Err(NetworkError::UnexpectedResponse(format!(
                "decide from {owner}: {other:?}"
            ))),
        }
    }
}
