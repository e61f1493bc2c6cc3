//! Receiving side of fleet calls: shard verbs and forwarded attempts.

use std::sync::{Arc, Weak};

use bulwark_core::error::NetworkError;
use bulwark_sketch::LadderShardStore;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::forward::AttemptHandler;
use crate::protocol::{
    FleetRequest, FleetResponse, ForwardedAttempt, ForwardedDecision, ShardRequest, ShardResponse,
};

/// Answers [`ShardRequest`]s against the shards this host owns, and passes
/// forwarded attempts to the registered [`AttemptHandler`].
pub struct ShardServer {
    store: Arc<LadderShardStore>,
    /// Weak so the engine, which reaches this server through the ladder,
    /// is not kept alive by it.
    attempts: RwLock<Option<Weak<dyn AttemptHandler>>>,
}

impl ShardServer {
    pub fn new(store: Arc<LadderShardStore>) -> Self {
        Self {
            store,
            attempts: RwLock::new(None),
        }
    }

    pub fn set_attempt_handler(&self, handler: Weak<dyn AttemptHandler>) {
        *self.attempts.write() = Some(handler);
    }

    pub fn store(&self) -> &Arc<LadderShardStore> {
        &self.store
    }

    /// Apply one decoded request.
    pub fn handle(&self, request: &ShardRequest) -> ShardResponse {
        let result = match request {
            ShardRequest::GetHeight { shard, key } => self
                .store
                .get_height(*shard, key.as_bytes())
                .map(ShardResponse::Height),
            ShardRequest::Step { shard, key } => self
                .store
                .step(*shard, key.as_bytes())
                .map(ShardResponse::Height),
            ShardRequest::AssignRandomBit { shard, value } => self
                .store
                .assign_random_bit(*shard, *value)
                .map(|()| ShardResponse::Ack),
        };
        result.unwrap_or_else(|e| {
            warn!(verb = request.verb(), "shard_server: rejected request: {e}");
            ShardResponse::Error(e.to_string())
        })
    }

    async fn decide(&self, forwarded: ForwardedAttempt) -> FleetResponse {
        let handler = self.attempts.read().as_ref().and_then(Weak::upgrade);
        let Some(handler) = handler else {
            warn!("shard_server: forwarded attempt but no handler registered");
            return FleetResponse::Rejected("no attempt handler on this host".into());
        };
        let (attempt, password) = match forwarded.into_parts() {
            Ok(parts) => parts,
            Err(e) => return FleetResponse::Rejected(e.to_string()),
        };
        let id = attempt.id;
        match handler.decide_attempt(attempt, password).await {
            Ok(record) => FleetResponse::Decided(ForwardedDecision::from_record(&record)),
            Err(e) => {
                warn!(attempt = %id, "shard_server: forwarded attempt failed: {e}");
                FleetResponse::Rejected(e.to_string())
            }
        }
    }

    /// Decode, apply, and encode. Undecodable input yields a rejection.
    pub async fn handle_bytes(&self, data: &[u8]) -> Result<Vec<u8>, NetworkError> {
        let response = match FleetRequest::decode(data) {
            Ok(FleetRequest::Shard(request)) => {
                debug!(verb = request.verb(), shard = request.shard(), "shard_server: request");
                FleetResponse::Shard(self.handle(&request))
            }
            Ok(FleetRequest::Decide(forwarded)) => {
                debug!(attempt = %forwarded.id, "shard_server: forwarded attempt");
                self.decide(forwarded).await
            }
            Err(e) => FleetResponse::Rejected(e.to_string()),
        };
        response.encode()
    }
}
