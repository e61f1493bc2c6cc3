//! Core types: hashes, identifiers, login attempts, and outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// A 32-byte hash value.
///
/// Used for password verifiers, ladder keys, attempt ids, and device-cookie hashes.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes).
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Hash256 from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// BLAKE3 digest of `data`.
    pub fn digest(data: &[u8]) -> Self {
        Self(blake3::hash(data).into())
    }

    /// Keyed BLAKE3 digest of `data`.
    pub fn keyed(key: &[u8; 32], data: &[u8]) -> Self {
        Self(blake3::keyed_hash(key, data).into())
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First eight bytes as a little-endian integer. Used to reduce a hash
    /// to an index.
    pub fn low_u64(&self) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(buf)
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Account identifier (the submitted username).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of a fleet member.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
#[serde(transparent)]
pub struct HostId(pub String);

impl HostId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Terminal outcome of a login attempt.
///
/// The engine always returns one of these; there is no undetermined state.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub enum Outcome {
    /// Password correct and the client IP is under its block threshold.
    CredentialsValid,
    /// Password correct but the client IP's block score exceeds its threshold.
    CredentialsValidButBlocked,
    /// Wrong password, first time this account has seen it recently.
    CredentialsInvalidIncorrectPassword,
    /// Wrong password the account has already seen recently.
    CredentialsInvalidRepeatedIncorrectPassword,
    /// Unknown account, first occurrence of this username/password pair.
    CredentialsInvalidNoSuchAccount,
    /// Unknown account, repeat of a recently seen username/password pair.
    CredentialsInvalidRepeatedNoSuchAccount,
}

impl Outcome {
    /// Whether the caller should be let in.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::CredentialsValid)
    }

    /// Whether this outcome carries a penalty and feeds the popularity sketch.
    pub fn is_first_failure(&self) -> bool {
        matches!(
            self,
            Self::CredentialsInvalidIncorrectPassword | Self::CredentialsInvalidNoSuchAccount
        )
    }

    /// Externally visible result. A correct-but-blocked attempt is reported
    /// exactly like a wrong password so the reason for denial does not leak.
    pub fn public_result(&self) -> &'static str {
        if self.is_success() { "accepted" } else { "rejected" }
    }
}

/// An authentication request as submitted by the login front end.
///
/// The plaintext password travels separately and is never part of this record.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LoginAttempt {
    /// Unique, client-chosen id. Resubmitting an id returns the recorded outcome.
    pub id: Hash256,
    /// Submitted username.
    pub account_id: AccountId,
    /// Address of the client making the attempt.
    pub client_ip: IpAddr,
    /// Address of the front-end server that received it.
    pub server_ip: Option<IpAddr>,
    /// When the attempt was received.
    pub timestamp: DateTime<Utc>,
    /// Hash of the device cookie presented by the client, if any.
    pub device_cookie_hash: Option<Hash256>,
}

/// A decided attempt, as persisted for audit.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AttemptRecord {
    pub attempt: LoginAttempt,
    pub outcome: Outcome,
    /// Ladder height of the submitted password before this attempt, or `None`
    /// when the owning shard could not be reached and the password was
    /// treated as popular.
    pub password_height: Option<u32>,
    /// Wrong password sealed under the account's log key, for later typo analysis.
    pub encrypted_incorrect_password: Option<Vec<u8>>,
}
