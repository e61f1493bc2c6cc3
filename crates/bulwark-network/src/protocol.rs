//! Wire messages between fleet members.
//!
//! All messages are serialized as MAGIC_BYTES prefix + bincode payload of a
//! [`FleetRequest`] or [`FleetResponse`]. Shard verbs are safe to retry:
//! reads are pure, and a duplicated step or random-bit write is absorbed by
//! the ladder's compensating clears. A forwarded attempt is idempotent by
//! its id on the receiving engine.

use std::fmt;
use std::net::IpAddr;

use bulwark_core::constants::{MAGIC_BYTES, MAX_MESSAGE_SIZE};
use bulwark_core::error::NetworkError;
use bulwark_core::types::{AttemptRecord, Hash256, LoginAttempt, Outcome};
use chrono::DateTime;

/// A request addressed to the owner of one ladder shard.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub enum ShardRequest {
    /// Read a key's height.
    GetHeight { shard: u32, key: Hash256 },
    /// Step a key. The owner answers with the height before the step.
    Step { shard: u32, key: Hash256 },
    /// Set or clear one random bit of the shard.
    AssignRandomBit { shard: u32, value: bool },
}

/// A shard owner's answer.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub enum ShardResponse {
    Height(u32),
    Ack,
    /// The owner rejected the request.
    Error(String),
}

/// A login attempt sent to the host that owns its client IP, together with
/// the submitted password. The transport is expected to be encrypted.
#[derive(Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct ForwardedAttempt {
    pub id: Hash256,
    pub account_id: String,
    pub client_ip: IpAddr,
    pub server_ip: Option<IpAddr>,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub device_cookie_hash: Option<Hash256>,
    pub password: String,
}

impl fmt::Debug for ForwardedAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwardedAttempt")
            .field("id", &self.id)
            .field("account_id", &self.account_id)
            .field("client_ip", &self.client_ip)
            .field("timestamp_ms", &self.timestamp_ms)
            .finish_non_exhaustive()
    }
}

impl ForwardedAttempt {
    pub fn new(attempt: &LoginAttempt, password: &str) -> Self {
        Self {
            id: attempt.id,
            account_id: attempt.account_id.to_string(),
            client_ip: attempt.client_ip,
            server_ip: attempt.server_ip,
            timestamp_ms: attempt.timestamp.timestamp_millis(),
            device_cookie_hash: attempt.device_cookie_hash,
            password: password.to_string(),
        }
    }

    /// Split back into the attempt and its password.
    pub fn into_parts(self) -> Result<(LoginAttempt, String), NetworkError> {
        let timestamp = DateTime::from_timestamp_millis(self.timestamp_ms).ok_or_else(|| {
            NetworkError::Decode(format!("timestamp {} out of range", self.timestamp_ms))
        })?;
        let attempt = LoginAttempt {
            id: self.id,
            account_id: self.account_id.into(),
            client_ip: self.client_ip,
            server_ip: self.server_ip,
            timestamp,
            device_cookie_hash: self.device_cookie_hash,
        };
        Ok((attempt, self.password))
    }
}

/// The owner's decision on a [`ForwardedAttempt`]. The attempt itself is
/// not echoed back; the forwarding host still holds it.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct ForwardedDecision {
    pub outcome: Outcome,
    pub password_height: Option<u32>,
    pub encrypted_incorrect_password: Option<Vec<u8>>,
}

impl ForwardedDecision {
    pub fn from_record(record: &AttemptRecord) -> Self {
        Self {
            outcome: record.outcome,
            password_height: record.password_height,
            encrypted_incorrect_password: record.encrypted_incorrect_password.clone(),
        }
    }

    pub fn into_record(self, attempt: LoginAttempt) -> AttemptRecord {
        AttemptRecord {
            attempt,
            outcome: self.outcome,
            password_height: self.password_height,
            encrypted_incorrect_password: self.encrypted_incorrect_password,
        }
    }
}

/// Any request one fleet member sends another.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub enum FleetRequest {
    Shard(ShardRequest),
    /// Decide an attempt on the host owning its client IP.
    Decide(ForwardedAttempt),
}

/// Answer to a [`FleetRequest`].
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub enum FleetResponse {
    Shard(ShardResponse),
    Decided(ForwardedDecision),
    /// The receiver could not decode or carry out the request.
    Rejected(String),
}

impl FleetRequest {
    /// Short verb name for logs.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Shard(request) => request.verb(),
            Self::Decide(_) => "decide",
        }
    }
}

impl ShardRequest {
    pub fn shard(&self) -> u32 {
        match self {
            Self::GetHeight { shard, .. }
            | Self::Step { shard, .. }
            | Self::AssignRandomBit { shard, .. } => *shard,
        }
    }

    /// Short verb name for logs.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::GetHeight { .. } => "get_height",
            Self::Step { .. } => "step",
            Self::AssignRandomBit { .. } => "assign_random_bit",
        }
    }
}

fn encode_framed<T: bincode::Encode>(msg: &T) -> Result<Vec<u8>, NetworkError> {
    let payload = bincode::encode_to_vec(msg, bincode::config::standard())
        .map_err(|e| NetworkError::Encode(e.to_string()))?;
    let total_size = MAGIC_BYTES.len() + payload.len();
    if total_size > MAX_MESSAGE_SIZE {
        return Err(NetworkError::MessageTooLarge { size: total_size });
    }
    let mut buf = Vec::with_capacity(total_size);
    buf.extend_from_slice(&MAGIC_BYTES);
    buf.extend_from_slice(&payload);
    Ok(buf)
}

fn decode_framed<T: bincode::Decode<()>>(data: &[u8]) -> Result<T, NetworkError> {
    // Size is checked before any deserialization work.
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(NetworkError::MessageTooLarge { size: data.len() });
    }
    if data.len() < MAGIC_BYTES.len() || data[..MAGIC_BYTES.len()] != MAGIC_BYTES {
        return Err(NetworkError::Decode("bad magic".into()));
    }
    let (msg, _): (T, usize) =
        bincode::decode_from_slice(&data[MAGIC_BYTES.len()..], bincode::config::standard())
            .map_err(|e| NetworkError::Decode(e.to_string()))?;
    Ok(msg)
}

impl FleetRequest {
    pub fn encode(&self) -> Result<Vec<u8>, NetworkError> {
        encode_framed(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self, NetworkError> {
        decode_framed(data)
    }
}

impl FleetResponse {
    pub fn encode(&self) -> Result<Vec<u8>, NetworkError> {
        encode_framed(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self, NetworkError> {
        decode_framed(data)
    }
}

impl ShardRequest {
    pub fn encode(&self) -> Result<Vec<u8>, NetworkError> {
        FleetRequest::Shard(self.clone()).encode()
    }

    pub fn decode(data: &[u8]) -> Result<Self, NetworkError> {
        match FleetRequest::decode(data)? {
            FleetRequest::Shard(request) => Ok(request),
            other => Err(NetworkError::Decode(format!("expected a shard verb, got {}", other.verb()))),
        }
    }
}

impl ShardResponse {
    pub fn encode(&self) -> Result<Vec<u8>, NetworkError> {
        FleetResponse::Shard(self.clone()).encode()
    }

    /// A rejection reads as [`ShardResponse::Error`].
    pub fn decode(data: &[u8]) -> Result<Self, NetworkError> {
        match FleetResponse::decode(data)? {
            FleetResponse::Shard(response) => Ok(response),
            FleetResponse::Rejected(reason) => Ok(Self::Error(reason)),
            FleetResponse::Decided(_) => {
                Err(NetworkError::Decode("expected a shard answer, got a decision".into()))
            }
        }
    }
}
