//! Two-phase password hashing.
//!
//! Phase 1 is argon2id over the password and a per-account salt: slow and
//! memory-hard, it is the only step that costs an attacker anything. Phase 2
//! is a fast BLAKE3 derivation of the phase-1 output and is what gets stored
//! and compared. Keys that must only be recoverable by someone who knows the
//! password (the account's log private key) are derived from phase 1 under a
//! separate context, so the stored verifier never unlocks them.

use argon2::{Algorithm, Argon2, Params, Version};
use bulwark_core::error::CryptoError;
use bulwark_core::types::Hash256;
use rand::RngCore;
use serde::{Deserialize, Serialize};

const VERIFIER_CONTEXT: &str = "bulwark-password-verifier-v1";
const LOG_KEY_CONTEXT: &str = "bulwark-log-key-encryption-v1";
const USERNAME_SALT_CONTEXT: &str = "bulwark-username-salt-v1";
const POPULARITY_CONTEXT: &str = "bulwark-password-popularity-v1";

/// Length of account and username salts.
pub const SALT_LEN: usize = 16;

/// argon2id cost parameters.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct HashParams {
    /// Memory in KiB.
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for HashParams {
    fn default() -> Self {
        Self {
            m_cost: 19 * 1024,
            t_cost: 2,
            p_cost: 1,
        }
    }
}

impl HashParams {
    /// Cheapest parameters argon2 accepts. For tests and local tooling.
    pub fn insecure_fast() -> Self {
        Self {
            m_cost: 8,
            t_cost: 1,
            p_cost: 1,
        }
    }

    fn hasher(&self) -> Result<Argon2<'static>, CryptoError> {
        let params = Params::new(self.m_cost, self.t_cost, self.p_cost, Some(32))
            .map_err(|e| CryptoError::Hashing(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    pub fn validate(&self) -> Result<(), CryptoError> {
        self.hasher().map(|_| ())
    }
}

/// Fresh random account salt.
pub fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Deterministic salt for a username that has no account.
///
/// Lets a missing account cost the same phase-1 work as a real one, and makes
/// repeated guesses against the same missing name hash identically.
pub fn username_salt(username: &str, secret: &[u8]) -> [u8; SALT_LEN] {
    let mut material = Vec::with_capacity(secret.len() + username.len());
    material.extend_from_slice(secret);
    material.extend_from_slice(username.as_bytes());
    let key = blake3::derive_key(USERNAME_SALT_CONTEXT, &material);
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&key[..SALT_LEN]);
    salt
}

/// The expensive salted hash.
pub fn phase1_hash(password: &str, salt: &[u8], params: &HashParams) -> Result<Hash256, CryptoError> {
    let mut out = [0u8; 32];
    params
        .hasher()?
        .hash_password_into(password.as_bytes(), salt, &mut out)
        .map_err(|e| CryptoError::Hashing(e.to_string()))?;
    Ok(Hash256(out))
}

/// The stored verifier, derived from phase 1.
pub fn phase2_hash(phase1: &Hash256) -> Hash256 {
    Hash256(blake3::derive_key(VERIFIER_CONTEXT, phase1.as_bytes()))
}

/// Constant-time comparison of two verifiers.
pub fn verifier_matches(stored: &Hash256, candidate: &Hash256) -> bool {
    blake3::Hash::from(stored.0) == blake3::Hash::from(candidate.0)
}

/// Symmetric key protecting the account's log private key.
pub fn log_key_encryption_key(phase1: &Hash256) -> [u8; 32] {
    blake3::derive_key(LOG_KEY_CONTEXT, phase1.as_bytes())
}

/// Unsalted ladder key for a password. Identical across accounts so the
/// ladder counts how common the password is fleet-wide.
pub fn popularity_key(password: &str) -> Hash256 {
    Hash256(blake3::derive_key(POPULARITY_CONTEXT, password.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> HashParams {
        HashParams::insecure_fast()
    }

    #[test]
    fn default_params_are_valid() {
        assert!(HashParams::default().validate().is_ok());
        assert!(params().validate().is_ok());
    }

    #[test]
    fn zero_memory_rejected() {
        let p = HashParams {
            m_cost: 0,
            ..params()
        };
        assert!(matches!(p.validate(), Err(CryptoError::Hashing(_))));
    }

    #[test]
    fn phase1_depends_on_salt_and_password() {
        let a = phase1_hash("hunter2", &[1; SALT_LEN], &params()).unwrap();
        let b = phase1_hash("hunter2", &[1; SALT_LEN], &params()).unwrap();
        let c = phase1_hash("hunter2", &[2; SALT_LEN], &params()).unwrap();
        let d = phase1_hash("hunter3", &[1; SALT_LEN], &params()).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn short_salt_rejected() {
        assert!(phase1_hash("pw", &[0; 4], &params()).is_err());
    }

    #[test]
    fn verifier_and_log_key_are_independent() {
        let p1 = phase1_hash("pw", &[3; SALT_LEN], &params()).unwrap();
        let verifier = phase2_hash(&p1);
        assert_ne!(verifier.0, log_key_encryption_key(&p1));
        assert_ne!(verifier, p1);
    }

    #[test]
    fn verifier_comparison() {
        let a = phase2_hash(&Hash256([1; 32]));
        let b = phase2_hash(&Hash256([2; 32]));
        assert!(verifier_matches(&a, &a));
        assert!(!verifier_matches(&a, &b));
    }

    #[test]
    fn username_salt_is_deterministic() {
        assert_eq!(username_salt("bob", b"s"), username_salt("bob", b"s"));
        assert_ne!(username_salt("bob", b"s"), username_salt("bob", b"t"));
        assert_ne!(username_salt("bob", b"s"), username_salt("rob", b"s"));
    }

    #[test]
    fn random_salts_differ() {
        assert_ne!(random_salt(), random_salt());
    }

    #[test]
    fn popularity_key_ignores_account() {
        assert_eq!(popularity_key("123456"), popularity_key("123456"));
        assert_ne!(popularity_key("123456"), popularity_key("1234567"));
    }

    #[test]
    fn params_deserialize_with_defaults() {
        let p: HashParams = serde_json::from_str(r#"{"t_cost": 3}"#).unwrap();
        assert_eq!(p.t_cost, 3);
        assert_eq!(p.m_cost, HashParams::default().m_cost);
    }
}
