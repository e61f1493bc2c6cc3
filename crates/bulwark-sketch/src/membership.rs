//! Aging membership sketch.
//!
//! An `R x C` grid of 2-bit saturating counters. Each row has its own keyed
//! hash, so a member touches one cell per row. Membership is the minimum
//! over the member's cells, which never under-reports an increment that
//! happened: no false negatives until aging wears the counters down.
//!
//! Each row tracks how many of its cells are zero. When that count drops
//! below `low_water * C`, a background pass walks the row from a persistent
//! cursor decrementing nonzero cells until the count rises above
//! `high_water * C`. Old members therefore fade without any timestamps.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bulwark_core::constants::MEMBERSHIP_CELL_MAX;
use bulwark_core::error::ConfigError;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::MembershipConfig;

/// Cells decremented per lock acquisition during an aging pass.
const AGING_BATCH: usize = 1024;

struct RowState {
    cells: Vec<u8>,
    zero_count: usize,
    cursor: usize,
}

struct SketchRow {
    index: usize,
    key: [u8; 32],
    state: Mutex<RowState>,
    aging: AtomicBool,
    low_zeros: usize,
    high_zeros: usize,
}

impl SketchRow {
    fn column(&self, member: &[u8], columns: usize) -> usize {
        let hash = blake3::keyed_hash(&self.key, member);
        let mut low = [0u8; 8];
        low.copy_from_slice(&hash.as_bytes()[..8]);
        (u64::from_le_bytes(low) % columns as u64) as usize
    }

    /// Decrement cells from the cursor until the zero count exceeds the high mark.
    ///
    /// The aging flag is cleared under the row lock, so an add that finds the
    /// flag still set knows this pass will re-check the row.
    fn age(&self) {
        let mut decremented = 0usize;
        loop {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let columns = state.cells.len();
            for _ in 0..AGING_BATCH {
                if state.zero_count > self.high_zeros {
                    break;
                }
                let cursor = state.cursor;
                state.cursor = (cursor + 1) % columns;
                if state.cells[cursor] > 0 {
                    state.cells[cursor] -= 1;
                    decremented += 1;
                    if state.cells[cursor] == 0 {
                        state.zero_count += 1;
                    }
                }
            }
            if state.zero_count > self.high_zeros {
                self.aging.store(false, Ordering::Release);
                break;
            }
        }
        debug!(row = self.index, decremented, "membership: aging pass finished");
    }
}

pub struct AgingMembershipSketch {
    rows: Vec<Arc<SketchRow>>,
    columns: usize,
}

impl AgingMembershipSketch {
    pub fn new(config: &MembershipConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let columns = config.columns;
        let high_zeros = ((config.high_water * columns as f64) as usize).min(columns - 1);
        let low_zeros = ((config.low_water * columns as f64) as usize).min(high_zeros);

        let rows = (0..config.rows)
            .map(|index| {
                Arc::new(SketchRow {
                    index,
                    key: config.row_key(index),
                    state: Mutex::new(RowState {
                        cells: vec![0; columns],
                        zero_count: columns,
                        cursor: 0,
                    }),
                    aging: AtomicBool::new(false),
                    low_zeros,
                    high_zeros,
                })
            })
            .collect();

        Ok(Self { rows, columns })
    }

    pub fn rows(&self) -> usize {
        self.rows.len()
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Record `member`. Returns whether it was already a member.
    ///
    /// All rows are locked in index order for the read-min-then-increment,
    /// so concurrent adds of the same member see each other.
    pub fn add_member(&self, member: &[u8]) -> bool {
        let columns: Vec<usize> = self
            .rows
            .iter()
            .map(|row| row.column(member, self.columns))
            .collect();

        let mut needs_aging = Vec::new();
        let min_before = {
            let mut guards: Vec<_> = self.rows.iter().map(|row| row.state.lock()).collect();
            let min_before = guards
                .iter()
                .zip(&columns)
                .map(|(state, &col)| state.cells[col])
                .min()
                .unwrap_or(0);

            for (i, (guard, &col)) in guards.iter_mut().zip(&columns).enumerate() {
                let state = &mut **guard;
                if state.cells[col] == 0 {
                    state.zero_count -= 1;
                }
                state.cells[col] = (state.cells[col] + 1).min(MEMBERSHIP_CELL_MAX);
                if state.zero_count < self.rows[i].low_zeros {
                    needs_aging.push(i);
                }
            }
            min_before
        };

        for i in needs_aging {
            self.start_aging(i);
        }
        min_before > 0
    }

    /// Whether `member` is (approximately) present. Does not mutate.
    pub fn is_member(&self, member: &[u8]) -> bool {
        self.rows
            .iter()
            .all(|row| row.state.lock().cells[row.column(member, self.columns)] > 0)
    }

    /// Fraction of zero cells in `row`.
    pub fn zero_fraction(&self, row: usize) -> Option<f64> {
        let row = self.rows.get(row)?;
        let zeros = row.state.lock().zero_count;
        Some(zeros as f64 / self.columns as f64)
    }

    /// Whether any row has an aging pass in flight.
    pub fn is_aging(&self) -> bool {
        self.rows.iter().any(|row| row.aging.load(Ordering::Acquire))
    }

    fn start_aging(&self, index: usize) {
        let row = &self.rows[index];
        if row
            .aging
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        debug!(row = index, "membership: row below low water, aging");
        let worker = Arc::clone(row);
        let spawned = std::thread::Builder::new()
            .name(format!("membership-ager-{index}"))
            .spawn(move || worker.age());
        if let Err(e) = spawned {
            warn!(row = index, "membership: could not spawn ager ({e}), aging inline");
            row.age();
        }
    }
}
