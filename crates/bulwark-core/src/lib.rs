//! # bulwark-core
//! Foundation types, error taxonomy, and seam traits for the Bulwark login defense.

pub mod constants;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{BulwarkError, ConfigError, CryptoError, NetworkError, StoreError};
pub use traits::PasswordPopularity;
pub use types::{AccountId, Hash256, HostId, LoginAttempt, Outcome};
