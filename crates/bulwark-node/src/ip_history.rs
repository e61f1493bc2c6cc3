//! Per-IP block score and pending typo records.

use std::collections::VecDeque;

use bulwark_core::types::AccountId;
use bulwark_decay::{DecayingScore, HalfLife};
use chrono::{DateTime, Utc};

/// A wrong password that may later turn out to be a typo.
#[derive(Clone, Debug, PartialEq)]
pub struct TypoRecord {
    pub account_id: AccountId,
    /// Wrong password sealed to the account's log public key.
    pub encrypted_password: Vec<u8>,
    /// Penalty charged to the IP for this attempt, decaying alongside the block score.
    pub penalty: DecayingScore,
}

#[derive(Clone, Debug)]
pub struct IpHistory {
    block_score: DecayingScore,
    recent_potential_typos: VecDeque<TypoRecord>,
    typo_capacity: usize,
}

impl IpHistory {
    pub fn new(typo_capacity: usize, now: DateTime<Utc>) -> Self {
        Self {
            block_score: DecayingScore::zero(now),
            recent_potential_typos: VecDeque::with_capacity(typo_capacity.min(64)),
            typo_capacity,
        }
    }

    pub fn score(&self, half_life: HalfLife, now: DateTime<Utc>) -> f64 {
        self.block_score.value(half_life, now)
    }

    pub fn penalize(&mut self, half_life: HalfLife, amount: f64, now: DateTime<Utc>) {
        self.block_score.add_in_place(half_life, amount, now);
    }

    pub fn credit(&mut self, half_life: HalfLife, amount: f64, now: DateTime<Utc>) {
        self.block_score.subtract_in_place(half_life, amount, now);
    }

    /// Remember a possible typo, dropping the oldest record when full.
    pub fn push_typo(&mut self, record: TypoRecord) {
        if self.typo_capacity == 0 {
            return;
        }
        while self.recent_potential_typos.len() >= self.typo_capacity {
            self.recent_potential_typos.pop_front();
        }
        self.recent_potential_typos.push_back(record);
    }

    pub fn pending_typos(&self) -> usize {
        self.recent_potential_typos.len()
    }

    /// Remove and return `account`'s records that `is_typo` accepts.
    ///
    /// Records it rejects, and records for other accounts, stay pending.
    pub fn take_typos<F>(&mut self, account: &AccountId, mut is_typo: F) -> Vec<TypoRecord>
    where
        F: FnMut(&TypoRecord) -> bool,
    {
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.recent_potential_typos.len());
        for record in self.recent_potential_typos.drain(..) {
            if record.account_id == *account && is_typo(&record) {
                taken.push(record);
            } else {
                kept.push_back(record);
            }
        }
        self.recent_potential_typos = kept;
        taken
    }
}
