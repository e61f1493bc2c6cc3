//! Node metrics.
//!
//! Handles are registered against whatever `metrics` recorder is installed
//! when the owning component is built. With no recorder installed they are
//! no-ops.

use metrics::Counter;

/// Per-cache counters, labelled with the cache name.
#[derive(Clone, Debug)]
pub(crate) struct CacheMetrics {
    /// Lookups answered from the cache
    pub(crate) hits_total: Counter,
    /// Lookups that found nothing
    pub(crate) misses_total: Counter,
    /// Loads started on a miss
    pub(crate) loads_total: Counter,
    /// Entries dropped at the memory monitor's request
    pub(crate) evictions_total: Counter,
}

impl CacheMetrics {
    pub(crate) fn new(cache: &str) -> Self {
        let cache = cache.to_string();
        Self {
            hits_total: metrics::counter!("bulwark.cache.hits_total", "cache" => cache.clone()),
            misses_total: metrics::counter!("bulwark.cache.misses_total", "cache" => cache.clone()),
            loads_total: metrics::counter!("bulwark.cache.loads_total", "cache" => cache.clone()),
            evictions_total: metrics::counter!("bulwark.cache.evictions_total", "cache" => cache),
        }
    }
}

/// Background job queue counters.
#[derive(Clone, Debug)]
pub(crate) struct JobMetrics {
    /// Jobs refused because the queue was full or closed
    pub(crate) dropped_total: Counter,
    /// Jobs that ran and returned an error
    pub(crate) failed_total: Counter,
}

impl Default for JobMetrics {
    fn default() -> Self {
        Self {
            dropped_total: metrics::counter!("bulwark.jobs.dropped_total"),
            failed_total: metrics::counter!("bulwark.jobs.failed_total"),
        }
    }
}

/// Attempt routing counters.
#[derive(Clone, Debug)]
pub(crate) struct RoutingMetrics {
    /// Attempts sent to the host owning the client IP
    pub(crate) forwarded_total: Counter,
    /// Forwarded attempts decided locally after the owner failed to answer
    pub(crate) forward_fallbacks_total: Counter,
}

impl Default for RoutingMetrics {
    fn default() -> Self {
        Self {
            forwarded_total: metrics::counter!("bulwark.routing.forwarded_total"),
            forward_fallbacks_total: metrics::counter!("bulwark.routing.forward_fallbacks_total"),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};

    /// Run `build` with a local debugging recorder so every handle it
    /// registers reports into the returned snapshotter.
    pub(crate) fn recorded<T>(build: impl FnOnce() -> T) -> (T, Snapshotter) {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let value = metrics::with_local_recorder(&recorder, build);
        (value, snapshotter)
    }

    /// Current value of counter `name` whose labels include every pair in
    /// `labels`. Zero if it was never registered.
    pub(crate) fn counter(snapshotter: &Snapshotter, name: &str, labels: &[(&str, &str)]) -> u64 {
        snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter(|(key, ..)| key.key().name() == name)
            .filter(|(key, ..)| {
                labels.iter().all(|(k, v)| {
                    key.key()
                        .labels()
                        .any(|label| label.key() == *k && label.value() == *v)
                })
            })
            .map(|(.., value)| match value {
                DebugValue::Counter(n) => n,
                _ => 0,
            })
            .sum()
    }
}
