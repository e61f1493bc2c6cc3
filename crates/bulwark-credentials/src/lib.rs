//! # bulwark-credentials — Password-derived secrets.
//!
//! - [`hashing`]: argon2id phase-1 hash, BLAKE3 phase-2 verifier, the
//!   username-derived salt for missing accounts, and the popularity key.
//! - [`encryption`]: AES-256-GCM sealing under a derived key.
//! - [`log_key`]: per-account Ristretto key pair wrong passwords are sealed
//!   to, with the private half locked under the correct password.
//! - [`typo`]: edit distance used for typo forgiveness.

pub mod encryption;
pub mod hashing;
pub mod log_key;
pub mod typo;

pub use hashing::{HashParams, phase1_hash, phase2_hash, popularity_key, random_salt, username_salt, verifier_matches};
pub use log_key::{LogKeyPair, LogPublicKey, seal_to};
pub use typo::{edit_distance, is_typo_of};
