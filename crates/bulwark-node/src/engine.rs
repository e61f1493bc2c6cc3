//! Per-attempt decision engine.
//!
//! [`DecisionEngine::decide`] fetches the client IP's history, the account
//! and the password's ladder height concurrently, runs the expensive phase-1
//! hash off the async workers, and settles on exactly one [`Outcome`].
//!
//! In-memory IP and account state changes before `decide` returns, so the
//! next request sees them. Durable account writes and ladder steps are
//! queued as background jobs.
//!
//! Locking: each `IpHistory` and `Account` sits behind its own mutex, never
//! held across an await. When both are needed the IP lock is taken first.

use std::convert::Infallible;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bulwark_core::error::{BulwarkError, ConfigError, CryptoError, StoreError};
use bulwark_core::traits::PasswordPopularity;
use bulwark_core::types::{AccountId, AttemptRecord, Hash256, LoginAttempt, Outcome};
use bulwark_credentials::{
    HashParams, is_typo_of, phase1_hash, phase2_hash, popularity_key, seal_to, username_salt,
};
use bulwark_credentials::hashing::SALT_LEN;
use bulwark_decay::{DecayingScore, PopularityCurve};
use bulwark_network::AttemptHandler;
use bulwark_sketch::AgingMembershipSketch;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::{Evictable, SelfLoadingCache};
use crate::config::{EngineConfig, NodeConfig};
use crate::ip_history::{IpHistory, TypoRecord};
use crate::jobs::{BackgroundJobs, Job};
use crate::store::{Account, AccountStore};

const JOB_QUEUE_CAPACITY: usize = 4096;

type SharedIpHistory = Arc<Mutex<IpHistory>>;
type SharedAccount = Arc<Mutex<Account>>;

pub struct DecisionEngine {
    config: EngineConfig,
    curve: PopularityCurve,
    hash_params: HashParams,
    typo_records_per_ip: usize,
    store: Arc<dyn AccountStore>,
    popularity: Arc<dyn PasswordPopularity>,
    membership: Arc<AgingMembershipSketch>,
    ip_histories: Arc<SelfLoadingCache<IpAddr, SharedIpHistory>>,
    /// `None` caches a confirmed absence.
    accounts: Arc<SelfLoadingCache<AccountId, Option<SharedAccount>>>,
    /// Decided attempts by id, for idempotent resubmission.
    attempts: Arc<SelfLoadingCache<Hash256, AttemptRecord>>,
    jobs: BackgroundJobs,
}

impl DecisionEngine {
    /// Must be called inside a tokio runtime; the background worker starts here.
    pub fn new(
        config: &NodeConfig,
        store: Arc<dyn AccountStore>,
        popularity: Arc<dyn PasswordPopularity>,
        membership: Arc<AgingMembershipSketch>,
    ) -> Result<Self, ConfigError> {
        config.engine.validate()?;
        config.popularity.validate()?;
        config.cache.validate()?;
        if popularity.max_height() != config.popularity.ladder_height {
            return Err(ConfigError::InvalidValue {
                name: "popularity.ladder_height".into(),
                reason: format!(
                    "{} does not match the ladder's height {}",
                    config.popularity.ladder_height,
                    popularity.max_height()
                ),
            });
        }

        let jobs = BackgroundJobs::start(Arc::clone(&store), Arc::clone(&popularity), JOB_QUEUE_CAPACITY);
        Ok(Self {
            config: config.engine.clone(),
            curve: config.popularity.clone(),
            hash_params: config.hashing,
            typo_records_per_ip: config.cache.typo_records_per_ip,
            store,
            popularity,
            membership,
            ip_histories: Arc::new(SelfLoadingCache::new("ip_history", config.cache.ip_history_capacity)),
            accounts: Arc::new(SelfLoadingCache::new("account", config.cache.account_capacity)),
            attempts: Arc::new(SelfLoadingCache::new("attempt", config.cache.attempt_capacity)),
            jobs,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Caches the memory monitor may shrink.
    pub fn evictables(&self) -> Vec<Arc<dyn Evictable>> {
        vec![
            self.ip_histories.clone() as Arc<dyn Evictable>,
            self.accounts.clone() as Arc<dyn Evictable>,
            self.attempts.clone() as Arc<dyn Evictable>,
        ]
    }

    /// Create an account and make it visible to the next decision.
    pub async fn create_account(
        &self,
        id: AccountId,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<(), BulwarkError> {
        let params = self.hash_params;
        let limit = self.config.account_credit_limit;
        let password = password.to_owned();
        let account_id = id.clone();
        let account = tokio::task::spawn_blocking(move || {
            Account::new(account_id, &password, &params, limit, now)
        })
        .await
        .map_err(|e| CryptoError::Hashing(e.to_string()))??;

        self.store.insert_account(&account).await?;
        debug!(account = %id, "engine: account created");
        self.accounts.insert(id, Some(Arc::new(Mutex::new(account))));
        Ok(())
    }

    /// Decay-adjusted block score of `ip` at `now`. Zero for an IP with no history.
    pub fn block_score(&self, ip: IpAddr, now: DateTime<Utc>) -> f64 {
        self.ip_histories
            .peek(&ip)
            .map(|history| history.lock().score(self.config.block_score_half_life, now))
            .unwrap_or(0.0)
    }

    /// Wait for all queued background jobs to finish.
    pub async fn flush(&self) -> Result<(), BulwarkError> {
        self.jobs.flush().await
    }

    /// Decide `attempt`. Resubmitting an id returns the recorded decision.
    ///
    /// Errors are infrastructure failures only (storage, hashing); a denied
    /// login is an `Ok` record with a non-success outcome.
    pub async fn decide(
        &self,
        attempt: &LoginAttempt,
        password: &str,
    ) -> Result<AttemptRecord, BulwarkError> {
        self.attempts
            .get_or_load(attempt.id, || self.decide_uncached(attempt, password))
            .await
    }

    async fn decide_uncached(
        &self,
        attempt: &LoginAttempt,
        password: &str,
    ) -> Result<AttemptRecord, BulwarkError> {
        let key = popularity_key(password);
        let (ip_history, account, height) = tokio::join!(
            self.ip_history(attempt.client_ip, attempt.timestamp),
            self.account(&attempt.account_id),
            self.popularity.height(&key),
        );
        if height.is_none() {
            warn!(attempt = %attempt.id, "engine: password popularity unknown, treating as popular");
        }

        let record = match account? {
            Some(account) => {
                let (salt, params) = {
                    let account = account.lock();
                    (account.salt, account.hash_params)
                };
                let phase1 = hash_off_thread(password, salt, params).await?;
                let correct = account.lock().verify(&phase1);
                if correct {
                    self.on_correct_password(attempt, password, &phase1, &ip_history, &account, height)
                } else {
                    self.on_incorrect_password(attempt, password, &phase1, &ip_history, &account, height)
                }
            }
            None => {
                let salt = username_salt(
                    attempt.account_id.as_str(),
                    self.config.username_salt_secret.as_bytes(),
                );
                let phase1 = hash_off_thread(password, salt, self.hash_params).await?;
                self.on_missing_account(attempt, &phase1, &ip_history, height)
            }
        };

        if record.outcome.is_first_failure() {
            self.jobs.submit(Job::StepPassword { key });
        }
        debug!(
            attempt = %attempt.id,
            account = %attempt.account_id,
            ip = %attempt.client_ip,
            outcome = ?record.outcome,
            height = ?height,
            "engine: decided attempt"
        );
        Ok(record)
    }

    /// Height that sets the threshold and penalty multipliers. An unknown
    /// height counts as the top of the ladder.
    fn rated_height(&self, height: Option<u32>) -> u32 {
        height.unwrap_or_else(|| self.popularity.max_height())
    }

    async fn ip_history(&self, ip: IpAddr, now: DateTime<Utc>) -> SharedIpHistory {
        let capacity = self.typo_records_per_ip;
        self.ip_histories
            .get_or_load(ip, || async move {
                Ok::<_, Infallible>(Arc::new(Mutex::new(IpHistory::new(capacity, now))))
            })
            .await
            .unwrap_or_else(|never| match never {})
    }

    async fn account(&self, id: &AccountId) -> Result<Option<SharedAccount>, StoreError> {
        self.accounts
            .get_or_load(id.clone(), || async {
                let loaded = self.store.load_account(id).await?;
                Ok::<_, StoreError>(loaded.map(|account| Arc::new(Mutex::new(account))))
            })
            .await
    }

    fn on_correct_password(
        &self,
        attempt: &LoginAttempt,
        password: &str,
        phase1: &Hash256,
        ip_history: &SharedIpHistory,
        account: &SharedAccount,
        height: Option<u32>,
    ) -> AttemptRecord {
        let now = attempt.timestamp;
        let block_half_life = self.config.block_score_half_life;

        let (log_keys, cookie_trusted) = {
            let account = account.lock();
            let trusted = attempt
                .device_cookie_hash
                .is_some_and(|cookie| account.has_device_cookie(&cookie));
            (account.log_key_pair(phase1), trusted)
        };

        let mut ip = ip_history.lock();

        match log_keys {
            Ok(keys) => {
                let max_distance = self.config.max_typo_edit_distance;
                let forgiven = ip.take_typos(&attempt.account_id, |record| {
                    match keys.open(&record.encrypted_password) {
                        Ok(bytes) => String::from_utf8(bytes)
                            .is_ok_and(|wrong| is_typo_of(&wrong, password, max_distance)),
                        Err(e) => {
                            debug!(account = %attempt.account_id, "engine: typo record unreadable: {e}");
                            false
                        }
                    }
                });
                for record in forgiven {
                    let refund = (1.0 - self.config.typo_penalty_multiplier)
                        * record.penalty.value(block_half_life, now);
                    ip.credit(block_half_life, refund, now);
                    debug!(account = %attempt.account_id, refund, "engine: forgave typo");
                }
            }
            Err(e) => warn!(account = %attempt.account_id, "engine: log key unavailable: {e}"),
        }

        let threshold =
            self.config.block_threshold * self.curve.threshold_multiplier(self.rated_height(height));
        let raw_score = ip.score(block_half_life, now);
        let score = if cookie_trusted {
            raw_score * self.config.device_cookie_trust_multiplier
        } else {
            raw_score
        };

        if score > threshold {
            debug!(score, threshold, "engine: correct password from blocked IP");
            return AttemptRecord {
                attempt: attempt.clone(),
                outcome: Outcome::CredentialsValidButBlocked,
                password_height: height,
                encrypted_incorrect_password: None,
            };
        }

        let mut account = account.lock();
        if let Some(cookie) = attempt.device_cookie_hash {
            if account.record_device_cookie(cookie) {
                self.jobs.submit(Job::RecordDeviceCookie {
                    account: attempt.account_id.clone(),
                    cookie,
                });
            }
        }
        if raw_score > 0.0 {
            let desired = self.config.reward_per_success.min(raw_score);
            let granted = account.consume_credit(self.config.credit_half_life, desired, now);
            if granted > 0.0 {
                ip.credit(block_half_life, granted, now);
                self.jobs.submit(Job::ConsumeCredit {
                    account: attempt.account_id.clone(),
                    amount: granted,
                    at: now,
                });
            }
        }

        AttemptRecord {
            attempt: attempt.clone(),
            outcome: Outcome::CredentialsValid,
            password_height: height,
            encrypted_incorrect_password: None,
        }
    }

    fn on_incorrect_password(
        &self,
        attempt: &LoginAttempt,
        password: &str,
        phase1: &Hash256,
        ip_history: &SharedIpHistory,
        account: &SharedAccount,
        height: Option<u32>,
    ) -> AttemptRecord {
        let now = attempt.timestamp;
        let wrong_hash = phase2_hash(phase1);

        let (public_key, repeated) = {
            let mut account = account.lock();
            let repeated =
                account.add_incorrect_password_hash(wrong_hash, self.config.recent_incorrect_window);
            (account.log_public_key, repeated)
        };

        let encrypted = match seal_to(&public_key, password.as_bytes()) {
            Ok(sealed) => Some(sealed),
            Err(e) => {
                warn!(account = %attempt.account_id, "engine: could not seal wrong password: {e}");
                None
            }
        };

        let outcome = if repeated {
            Outcome::CredentialsInvalidRepeatedIncorrectPassword
        } else {
            self.jobs.submit(Job::AddIncorrectPasswordHash {
                account: attempt.account_id.clone(),
                hash: wrong_hash,
            });
            let penalty = self.config.invalid_password_penalty
                * self.curve.penalty_multiplier(self.rated_height(height));
            let mut ip = ip_history.lock();
            ip.penalize(self.config.block_score_half_life, penalty, now);
            if let Some(sealed) = &encrypted {
                ip.push_typo(TypoRecord {
                    account_id: attempt.account_id.clone(),
                    encrypted_password: sealed.clone(),
                    penalty: DecayingScore::new(penalty, now),
                });
            }
            Outcome::CredentialsInvalidIncorrectPassword
        };

        AttemptRecord {
            attempt: attempt.clone(),
            outcome,
            password_height: height,
            encrypted_incorrect_password: encrypted,
        }
    }

    fn on_missing_account(
        &self,
        attempt: &LoginAttempt,
        phase1: &Hash256,
        ip_history: &SharedIpHistory,
        height: Option<u32>,
    ) -> AttemptRecord {
        let member = phase2_hash(phase1);
        let outcome = if self.membership.add_member(member.as_bytes()) {
            Outcome::CredentialsInvalidRepeatedNoSuchAccount
        } else {
            let penalty = self.config.invalid_account_penalty
                * self.curve.penalty_multiplier(self.rated_height(height));
            ip_history
                .lock()
                .penalize(self.config.block_score_half_life, penalty, attempt.timestamp);
            Outcome::CredentialsInvalidNoSuchAccount
        };

        AttemptRecord {
            attempt: attempt.clone(),
            outcome,
            password_height: height,
            encrypted_incorrect_password: None,
        }
    }
}

#[async_trait]
impl AttemptHandler for DecisionEngine {
    async fn decide_attempt(
        &self,
        attempt: LoginAttempt,
        password: String,
    ) -> Result<AttemptRecord, BulwarkError> {
        self.decide(&attempt, &password).await
    }
}

/// Phase-1 hash on the blocking pool.
async fn hash_off_thread(
    password: &str,
    salt: [u8; SALT_LEN],
    params: HashParams,
) -> Result<Hash256, CryptoError> {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || phase1_hash(&password, &salt, &params))
        .await
        .map_err(|e| CryptoError::Hashing(e.to_string()))?
}
