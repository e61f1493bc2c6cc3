//! Memory-pressure eviction.
//!
//! A periodic check reads the process's resident set size. Once it crosses
//! the high-water mark every registered cache is asked, in parallel, to drop
//! a fraction of its least-recently-used entries. Rounds repeat until
//! resident memory falls under the low-water mark or nothing is left to evict.

use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::Evictable;
use crate::config::MemoryConfig;

/// Rounds per check before giving up until the next tick.
const MAX_EVICTION_ROUNDS: usize = 16;

/// Source of the current resident set size.
pub trait MemoryReader: Send + Sync {
    /// Resident bytes, or `None` if the platform cannot tell.
    fn resident_bytes(&self) -> Option<u64>;
}

/// Resident set size of this process from procfs, scaled by the kernel's
/// page size. Reports nothing off Linux.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessMemory;

impl MemoryReader for ProcessMemory {
    #[cfg(target_os = "linux")]
    fn resident_bytes(&self) -> Option<u64> {
        let statm = procfs::process::Process::myself()
            .and_then(|process| process.statm())
            .map_err(|e| debug!("memory: procfs read failed: {e}"))
            .ok()?;
        Some(statm.resident * procfs::page_size())
    }

    #[cfg(not(target_os = "linux"))]
    fn resident_bytes(&self) -> Option<u64> {
        None
    }
}

pub struct MemoryMonitor {
    config: MemoryConfig,
    reader: Arc<dyn MemoryReader>,
    evictors: RwLock<Vec<Arc<dyn Evictable>>>,
}

impl MemoryMonitor {
    pub fn new(config: MemoryConfig, reader: Arc<dyn MemoryReader>) -> Self {
        Self {
            config,
            reader,
            evictors: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, evictor: Arc<dyn Evictable>) {
        debug!(cache = evictor.name(), "memory: registered cache");
        self.evictors.write().push(evictor);
    }

    pub fn registered(&self) -> usize {
        self.evictors.read().len()
    }

    /// Read memory once and evict if above the high-water mark. Returns the number
    /// of entries evicted.
    pub async fn check_once(&self) -> usize {
        let Some(resident) = self.reader.resident_bytes() else {
            return 0;
        };
        if resident <= self.config.high_water_bytes {
            return 0;
        }
        info!(
            resident,
            high_water = self.config.high_water_bytes,
            "memory: above high water, evicting"
        );

        let mut total = 0;
        for round in 0..MAX_EVICTION_ROUNDS {
            let evicted = self.evict_round().await;
            total += evicted;
            let resident = self.reader.resident_bytes().unwrap_or(0);
            debug!(round, evicted, resident, "memory: eviction round");
            if evicted == 0 || resident <= self.config.low_water_bytes {
                break;
            }
        }
        total
    }

    async fn evict_round(&self) -> usize {
        let evictors = self.evictors.read().clone();
        let fraction = self.config.eviction_fraction;
        let tasks = evictors.into_iter().map(|evictor| {
            tokio::task::spawn_blocking(move || {
                let evicted = evictor.evict_fraction(fraction);
                (evictor, evicted)
            })
        });

        let mut total = 0;
        for joined in join_all(tasks).await {
            match joined {
                Ok((evictor, evicted)) => {
                    debug!(cache = evictor.name(), evicted, left = evictor.len(), "memory: cache shrunk");
                    total += evicted;
                }
                Err(e) => warn!("memory: eviction task failed: {e}"),
            }
        }
        total
    }

    /// Run [`check_once`](Self::check_once) on every check interval until the
    /// handle is aborted.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.check_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.check_once().await;
            }
        })
    }
}
