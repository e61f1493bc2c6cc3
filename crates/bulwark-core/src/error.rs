//! Error types for Bulwark.
//!
//! Each enum maps to one failure class of the decision path:
//! - [`ConfigError`]: invalid tuning, fail fast at startup.
//! - [`NetworkError`]: a remote host was unreachable or slow; callers degrade precision.
//! - [`CryptoError`]: hashing failed or a sealed record did not authenticate; skip the record.
//! - [`StoreError`]: account storage failures, including optimistic write conflicts.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("half-life must be positive: {0}")] NonPositiveHalfLife(String),
    #[error("invalid sketch dimensions: {0}")] InvalidSketchDimensions(String),
    #[error("water marks must satisfy 0 < low < high < 1: low {low}, high {high}")] InvalidWaterMarks { low: f64, high: f64 },
    #[error("invalid value for {name}: {reason}")] InvalidValue { name: String, reason: String },
    #[error("fleet has no hosts")] EmptyHostSet,
    #[error("load: {0}")] Load(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("host unreachable: {0}")] HostUnreachable(String),
    #[error("call to {0} timed out")] Timeout(String),
    #[error("message too large: {size}")] MessageTooLarge { size: usize },
    #[error("encode: {0}")] Encode(String),
    #[error("decode: {0}")] Decode(String),
    #[error("unexpected response to {0}")] UnexpectedResponse(String),
    #[error("shard {shard} out of range (shards: {count})")] ShardOutOfRange { shard: u32, count: u32 },
    #[error("{host} rejected the request: {reason}")] Rejected { host: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("password hashing: {0}")] Hashing(String),
    #[error("encryption: {0}")] Encryption(String),
    #[error("sealed data failed authentication")] IntegrityFailure,
    #[error("sealed data too short: {len} < {min}")] Truncated { len: usize, min: usize },
    #[error("invalid public key bytes")] InvalidPublicKey,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("account not found: {0}")] NotFound(String),
    #[error("account already exists: {0}")] AlreadyExists(String),
    #[error("write conflict on {account}: expected version {expected}, found {found}")] Conflict { account: String, expected: u64, found: u64 },
    #[error("backend: {0}")] Backend(String),
}

#[derive(Error, Debug)]
pub enum BulwarkError {
    #[error(transparent)] Config(#[from] ConfigError),
    #[error(transparent)] Network(#[from] NetworkError),
    #[error(transparent)] Crypto(#[from] CryptoError),
    #[error(transparent)] Store(#[from] StoreError),
    #[error("background queue closed")] QueueClosed,
}
