//! Cross-crate test suite for Bulwark.
//!
//! The login scenarios, adversarial properties and fleet tests live under
//! `tests/`; this library only holds the fixtures they share.

pub mod helpers;
