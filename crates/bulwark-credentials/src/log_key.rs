//! Per-account log key pair.
//!
//! Wrong passwords are sealed to the account's public log key, which needs
//! no secret to use. The private half is stored encrypted under a key derived
//! from the phase-1 hash of the correct password, so typo records can only be
//! opened during a successful login.
//!
//! Sealing is ECIES over Ristretto: an ephemeral scalar `r`, the shared point
//! `r * P`, a BLAKE3-derived AES key, and AES-256-GCM.
//!
//! # Wire format
//! ```text
//! ephemeral point (32 bytes) || nonce (12 bytes) || ciphertext + auth_tag
//! ```

use std::fmt;

use bulwark_core::error::CryptoError;
use bulwark_core::types::Hash256;
use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::encryption::{self, MIN_SEALED_LEN};
use crate::hashing::log_key_encryption_key;

const SEAL_KDF_CONTEXT: &str = "bulwark-log-seal-v1";
const POINT_LEN: usize = 32;

/// Compressed Ristretto public key, safe to store in the clear.
pub type LogPublicKey = [u8; POINT_LEN];

fn random_scalar() -> Scalar {
    let mut wide = [0u8; 64];
    rand::rngs::OsRng.fill_bytes(&mut wide);
    let scalar = Scalar::from_bytes_mod_order_wide(&wide);
    wide.zeroize();
    scalar
}

fn seal_key(shared: &RistrettoPoint, ephemeral: &[u8; POINT_LEN]) -> [u8; 32] {
    let mut material = [0u8; 2 * POINT_LEN];
    material[..POINT_LEN].copy_from_slice(shared.compress().as_bytes());
    material[POINT_LEN..].copy_from_slice(ephemeral);
    let key = blake3::derive_key(SEAL_KDF_CONTEXT, &material);
    material.zeroize();
    key
}

/// Encrypt `plaintext` so only the holder of the matching private key can read it.
pub fn seal_to(public: &LogPublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let recipient = CompressedRistretto(*public)
        .decompress()
        .ok_or(CryptoError::InvalidPublicKey)?;

    let r = random_scalar();
    let ephemeral = (r * RISTRETTO_BASEPOINT_POINT).compress().to_bytes();
    let key = seal_key(&(r * recipient), &ephemeral);

    let body = encryption::seal(&key, plaintext)?;
    let mut out = Vec::with_capacity(POINT_LEN + body.len());
    out.extend_from_slice(&ephemeral);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Account log key pair. The private scalar is wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct LogKeyPair {
    secret: Scalar,
    #[zeroize(skip)]
    public: LogPublicKey,
}

impl fmt::Debug for LogKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogKeyPair")
            .field("public", &hex::encode(self.public))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl LogKeyPair {
    pub fn generate() -> Self {
        Self::from_scalar(random_scalar())
    }

    fn from_scalar(secret: Scalar) -> Self {
        let public = (secret * RISTRETTO_BASEPOINT_POINT).compress().to_bytes();
        Self { secret, public }
    }

    pub fn public_key(&self) -> LogPublicKey {
        self.public
    }

    /// Decrypt a record produced by [`seal_to`] for this key pair.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < POINT_LEN + MIN_SEALED_LEN {
            return Err(CryptoError::Truncated {
                len: sealed.len(),
                min: POINT_LEN + MIN_SEALED_LEN,
            });
        }
        let (point, body) = sealed.split_at(POINT_LEN);
        let mut ephemeral = [0u8; POINT_LEN];
        ephemeral.copy_from_slice(point);
        let sender = CompressedRistretto(ephemeral)
            .decompress()
            .ok_or(CryptoError::IntegrityFailure)?;

        let key = seal_key(&(self.secret * sender), &ephemeral);
        encryption::open(&key, body)
    }

    /// Private key sealed under the phase-1 hash of the account password.
    pub fn to_encrypted(&self, phase1: &Hash256) -> Result<Vec<u8>, CryptoError> {
        let key = log_key_encryption_key(phase1);
        encryption::seal(&key, self.secret.as_bytes())
    }

    /// Recover the key pair from [`to_encrypted`](Self::to_encrypted) output.
    pub fn from_encrypted(encrypted: &[u8], phase1: &Hash256) -> Result<Self, CryptoError> {
        let key = log_key_encryption_key(phase1);
        let mut bytes = encryption::open(&key, encrypted)?;
        if bytes.len() != 32 {
            bytes.zeroize();
            return Err(CryptoError::IntegrityFailure);
        }
        let mut raw = [0u8; 32];
        raw.copy_from_slice(&bytes);
        bytes.zeroize();
        let secret = Option::<Scalar>::from(Scalar::from_canonical_bytes(raw));
        raw.zeroize();
        secret
            .map(Self::from_scalar)
            .ok_or(CryptoError::IntegrityFailure)
    }
}
