//! Default tuning constants. Every value here can be overridden through
//! configuration; these are the production defaults.

/// Half-life of an IP's block score, in seconds (12 hours).
pub const DEFAULT_BLOCK_SCORE_HALF_LIFE_SECS: u64 = 12 * 60 * 60;

/// Half-life of an account's consumed credits, in seconds (12 hours).
pub const DEFAULT_CREDIT_HALF_LIFE_SECS: u64 = 12 * 60 * 60;

/// Penalty added to an IP's block score for a first-seen unknown account.
pub const DEFAULT_INVALID_ACCOUNT_PENALTY: f64 = 2.0;

/// Penalty added to an IP's block score for a first-seen wrong password.
pub const DEFAULT_INVALID_PASSWORD_PENALTY: f64 = 5.0;

/// Fraction of a wrong-password penalty kept once the attempt is shown to be a typo.
pub const DEFAULT_TYPO_PENALTY_MULTIPLIER: f64 = 0.1;

/// Maximum edit distance between a failed and the correct password that
/// still counts as a typo.
pub const DEFAULT_MAX_TYPO_EDIT_DISTANCE: usize = 2;

/// Block threshold applied to popular passwords. Unpopular passwords get
/// this times [`DEFAULT_UNPOPULAR_THRESHOLD_MULTIPLIER`].
pub const DEFAULT_BLOCK_THRESHOLD: f64 = 50.0;

/// Threshold multiplier for passwords whose ladder height is below the
/// popularity cut-off.
pub const DEFAULT_UNPOPULAR_THRESHOLD_MULTIPLIER: f64 = 10.0;

/// Penalty multiplier reached at the top of the ladder.
pub const DEFAULT_MAX_PENALTY_MULTIPLIER: f64 = 5.0;

/// Credit limit of a newly created account.
pub const DEFAULT_ACCOUNT_CREDIT_LIMIT: f64 = 50.0;

/// Maximum credit drawn from an account on one successful login.
pub const DEFAULT_REWARD_PER_SUCCESS: f64 = 20.0;

/// Block-score discount applied when a trusted device cookie is presented.
pub const DEFAULT_DEVICE_COOKIE_TRUST_MULTIPLIER: f64 = 0.5;

/// Number of bits in the binomial ladder sketch (2^24).
pub const DEFAULT_LADDER_BITS: usize = 1 << 24;

/// Number of rungs per ladder key.
pub const DEFAULT_LADDER_HEIGHT: u32 = 48;

/// Ladder height at or above which a password is considered popular.
pub const DEFAULT_POPULAR_HEIGHT: u32 = 44;

/// Number of shards the distributed ladder is split into.
pub const DEFAULT_LADDER_SHARDS: u32 = 64;

/// Rows in the aging membership sketch.
pub const DEFAULT_MEMBERSHIP_ROWS: usize = 4;

/// Columns per row in the aging membership sketch.
pub const DEFAULT_MEMBERSHIP_COLUMNS: usize = 1 << 20;

/// Aging starts when a row's zero fraction drops below this.
pub const DEFAULT_MEMBERSHIP_LOW_WATER: f64 = 0.45;

/// Aging stops once a row's zero fraction rises above this.
pub const DEFAULT_MEMBERSHIP_HIGH_WATER: f64 = 0.55;

/// Largest value a membership sketch cell can hold (2-bit counters).
pub const MEMBERSHIP_CELL_MAX: u8 = 3;

/// Capacity of the IP history cache.
pub const DEFAULT_IP_CACHE_CAPACITY: usize = 100_000;

/// Capacity of the account cache.
pub const DEFAULT_ACCOUNT_CACHE_CAPACITY: usize = 100_000;

/// Capacity of the decided-attempt cache used for idempotent resubmission.
pub const DEFAULT_ATTEMPT_CACHE_CAPACITY: usize = 50_000;

/// Number of pending typo records retained per IP.
pub const DEFAULT_TYPO_RECORDS_PER_IP: usize = 16;

/// Number of recent wrong-password hashes retained per account.
pub const RECENT_INCORRECT_WINDOW: usize = 16;

/// Deadline for a single cross-host call, in milliseconds.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 250;

/// Deadline for a login attempt forwarded to the host owning its client IP.
/// Covers the owner's password hash, so it is far longer than a shard call.
pub const DEFAULT_FORWARD_TIMEOUT_MS: u64 = 5_000;

/// How long a key seen at the top of the ladder is assumed to stay there, in seconds.
pub const DEFAULT_TOP_OF_LADDER_FRESHNESS_SECS: u64 = 60;

/// Capacity of the client-side top-of-ladder cache.
pub const DEFAULT_TOP_OF_LADDER_CACHE_CAPACITY: usize = 10_000;

/// Resident memory (bytes) above which cache eviction starts (2 GiB).
pub const DEFAULT_MEMORY_HIGH_WATER_BYTES: u64 = 2 << 30;

/// Resident memory (bytes) eviction aims to get back under (1.5 GiB).
pub const DEFAULT_MEMORY_LOW_WATER_BYTES: u64 = 3 << 29;

/// Fraction of each cache's least-recently-used entries removed per eviction round.
pub const DEFAULT_EVICTION_FRACTION: f64 = 0.2;

/// Interval between resident-memory checks, in milliseconds.
pub const DEFAULT_MEMORY_CHECK_INTERVAL_MS: u64 = 1_000;

/// Four-byte prefix on every fleet wire message ("BWRK").
pub const MAGIC_BYTES: [u8; 4] = [0x42, 0x57, 0x52, 0x4B];

/// Upper bound on an encoded fleet message.
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024;
