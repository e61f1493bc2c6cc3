//! Account records and the storage adapter the engine consumes.
//!
//! The engine keeps hot accounts in memory and mutates them synchronously;
//! the same changes reach the [`AccountStore`] later through background
//! jobs. Durable writes are optimistic: every account carries a version,
//! a save against a stale version fails with [`StoreError::Conflict`], and
//! the read-modify-write helpers retry until the write commits.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use bulwark_core::error::{CryptoError, StoreError};
use bulwark_core::types::{AccountId, Hash256};
use bulwark_credentials::hashing::SALT_LEN;
use bulwark_credentials::{
    HashParams, LogKeyPair, LogPublicKey, phase1_hash, phase2_hash, random_salt, verifier_matches,
};
use bulwark_decay::{DecayingScore, HalfLife};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Attempts at a conflicting read-modify-write before giving up.
const MAX_WRITE_ATTEMPTS: usize = 64;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Account {
    pub id: AccountId,
    pub salt: [u8; SALT_LEN],
    /// Phase-2 hash of the password.
    pub password_verifier: Hash256,
    /// Cost parameters the verifier was produced with.
    pub hash_params: HashParams,
    pub credit_limit: f64,
    pub consumed_credits: DecayingScore,
    pub trusted_cookies: HashSet<Hash256>,
    /// Phase-2 hashes of recent wrong passwords, oldest first.
    pub recent_incorrect: VecDeque<Hash256>,
    pub log_public_key: LogPublicKey,
    /// Log private key sealed under the phase-1 hash of the password.
    pub encrypted_log_private_key: Vec<u8>,
    /// Bumped on every committed save.
    pub version: u64,
}

impl Account {
    /// New account with a fresh salt and log key pair.
    pub fn new(
        id: AccountId,
        password: &str,
        params: &HashParams,
        credit_limit: f64,
        now: DateTime<Utc>,
    ) -> Result<Self, CryptoError> {
        let salt = random_salt();
        let phase1 = phase1_hash(password, &salt, params)?;
        let log_keys = LogKeyPair::generate();
        Ok(Self {
            id,
            salt,
            password_verifier: phase2_hash(&phase1),
            hash_params: *params,
            credit_limit,
            consumed_credits: DecayingScore::zero(now),
            trusted_cookies: HashSet::new(),
            recent_incorrect: VecDeque::new(),
            log_public_key: log_keys.public_key(),
            encrypted_log_private_key: log_keys.to_encrypted(&phase1)?,
            version: 0,
        })
    }

    /// Whether `phase1` is the phase-1 hash of this account's password.
    pub fn verify(&self, phase1: &Hash256) -> bool {
        verifier_matches(&self.password_verifier, &phase2_hash(phase1))
    }

    /// Unlock the log key pair. Only succeeds with the correct password's phase-1 hash.
    pub fn log_key_pair(&self, phase1: &Hash256) -> Result<LogKeyPair, CryptoError> {
        LogKeyPair::from_encrypted(&self.encrypted_log_private_key, phase1)
    }

    pub fn has_device_cookie(&self, cookie: &Hash256) -> bool {
        self.trusted_cookies.contains(cookie)
    }

    /// Returns whether the cookie was new.
    pub fn record_device_cookie(&mut self, cookie: Hash256) -> bool {
        self.trusted_cookies.insert(cookie)
    }

    /// Remember a wrong password. Returns whether it was already in the window.
    pub fn add_incorrect_password_hash(&mut self, hash: Hash256, window: usize) -> bool {
        if self.recent_incorrect.contains(&hash) {
            return true;
        }
        self.recent_incorrect.push_back(hash);
        while self.recent_incorrect.len() > window {
            self.recent_incorrect.pop_front();
        }
        false
    }

    /// Credit still available at `now`, never negative.
    pub fn available_credit(&self, half_life: HalfLife, now: DateTime<Utc>) -> f64 {
        (self.credit_limit - self.consumed_credits.value(half_life, now)).max(0.0)
    }

    /// Draw up to `desired` credit. Returns the amount granted.
    pub fn consume_credit(&mut self, half_life: HalfLife, desired: f64, now: DateTime<Utc>) -> f64 {
        let granted = desired.max(0.0).min(self.available_credit(half_life, now));
        if granted > 0.0 {
            self.consumed_credits.add_in_place(half_life, granted, now);
        }
        granted
    }
}

/// Durable account storage.
///
/// Only [`load_account`](Self::load_account), [`insert_account`](Self::insert_account)
/// and [`save_account`](Self::save_account) touch the backend; the remaining
/// verbs are read-modify-write loops over them.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn load_account(&self, id: &AccountId) -> Result<Option<Account>, StoreError>;

    /// Store a new account. Fails with `AlreadyExists` if the id is taken.
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError>;

    /// Overwrite an account whose stored version still equals `account.version`.
    /// Returns the new version.
    async fn save_account(&self, account: &Account) -> Result<u64, StoreError>;

    /// Half-life applied to consumed credits.
    fn credit_half_life(&self) -> HalfLife;

    /// Number of wrong-password hashes kept per account.
    fn recent_incorrect_window(&self) -> usize;

    async fn has_device_cookie(&self, id: &AccountId, cookie: &Hash256) -> Result<bool, StoreError> {
        Ok(self
            .load_account(id)
            .await?
            .is_some_and(|account| account.has_device_cookie(cookie)))
    }

    async fn record_device_cookie(&self, id: &AccountId, cookie: Hash256) -> Result<(), StoreError> {
        update_account(self, id, |account| {
            account.record_device_cookie(cookie);
        })
        .await
    }

    /// Returns whether the hash was already present.
    async fn add_incorrect_password_hash(&self, id: &AccountId, hash: Hash256) -> Result<bool, StoreError> {
        let window = self.recent_incorrect_window();
        update_account(self, id, |account| account.add_incorrect_password_hash(hash, window)).await
    }

    /// Returns the amount granted.
    async fn try_consume_credit(
        &self,
        id: &AccountId,
        amount: f64,
        now: DateTime<Utc>,
    ) -> Result<f64, StoreError> {
        let half_life = self.credit_half_life();
        update_account(self, id, |account| account.consume_credit(half_life, amount, now)).await
    }
}

/// Load, apply `change`, save; repeat from a fresh load on a version conflict.
pub async fn update_account<S, T, F>(store: &S, id: &AccountId, mut change: F) -> Result<T, StoreError>
where
    S: AccountStore + ?Sized,
    F: FnMut(&mut Account) -> T + Send,
    T: Send,
{
    let mut last_conflict = None;
    for attempt in 0..MAX_WRITE_ATTEMPTS {
        let mut account = store
            .load_account(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let result = change(&mut account);
        match store.save_account(&account).await {
            Ok(_) => return Ok(result),
            Err(conflict @ StoreError::Conflict { .. }) => {
                debug!(account = %id, attempt, "store: write conflict, retrying");
                last_conflict = Some(conflict);
                tokio::task::yield_now().await;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_conflict.unwrap_or_else(|| StoreError::Backend("no write attempted".into())))
}

/// In-process [`AccountStore`].
pub struct MemoryAccountStore {
    accounts: RwLock<HashMap<AccountId, Account>>,
    credit_half_life: HalfLife,
    recent_incorrect_window: usize,
}

impl MemoryAccountStore {
    pub fn new(credit_half_life: HalfLife, recent_incorrect_window: usize) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            credit_half_life,
            recent_incorrect_window,
        }
    }

    pub fn len(&self) -> usize {
        self.accounts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.read().is_empty()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn load_account(&self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.read().get(id).cloned())
    }

    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write();
        if accounts.contains_key(&account.id) {
            return Err(StoreError::AlreadyExists(account.id.to_string()));
        }
        accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn save_account(&self, account: &Account) -> Result<u64, StoreError> {
        let mut accounts = self.accounts.write();
        let stored = accounts
            .get_mut(&account.id)
            .ok_or_else(|| StoreError::NotFound(account.id.to_string()))?;
        if stored.version != account.version {
            return Err(StoreError::Conflict {
                account: account.id.to_string(),
                expected: account.version,
                found: stored.version,
            });
        }
        *stored = account.clone();
        stored.version += 1;
        Ok(stored.version)
    }

    fn credit_half_life(&self) -> HalfLife {
        self.credit_half_life
    }

    fn recent_incorrect_window(&self) -> usize {
        self.recent_incorrect_window
    }
}
