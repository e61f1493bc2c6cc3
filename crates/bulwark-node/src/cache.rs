//! Bounded LRU cache with single-flight loading.
//!
//! A miss starts exactly one load per key; concurrent requesters for the
//! same key await that load instead of issuing their own. Entries are
//! dropped least-recently-used first, either by capacity or when the memory
//! monitor asks for a fraction back.

use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::metrics::CacheMetrics;

/// Something the memory monitor can shrink.
pub trait Evictable: Send + Sync {
    fn name(&self) -> &str;

    fn len(&self) -> usize;

    /// Drop `fraction` of the entries, oldest first. Returns how many went.
    fn evict_fraction(&self, fraction: f64) -> usize;
}

pub struct SelfLoadingCache<K, V> {
    name: String,
    entries: Mutex<LruCache<K, V>>,
    in_flight: DashMap<K, Arc<OnceCell<V>>>,
    metrics: CacheMetrics,
}

impl<K, V> SelfLoadingCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    /// Counters are labelled `cache = name`.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let name = name.into();
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            metrics: CacheMetrics::new(&name),
            name,
            entries: Mutex::new(LruCache::new(capacity)),
            in_flight: DashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Cached value, promoting it to most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        let found = self.entries.lock().get(key).cloned();
        if found.is_some() {
            self.metrics.hits_total.increment(1);
        } else {
            self.metrics.misses_total.increment(1);
        }
        found
    }

    /// Cached value without touching recency or counters.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.entries.lock().peek(key).cloned()
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.lock().put(key, value);
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.lock().pop(key)
    }

    /// Cached value, or the result of `load`.
    ///
    /// At most one `load` runs per key at a time. If it fails, the error goes
    /// to the caller that ran it and the next waiter tries again.
    pub async fn get_or_load<F, Fut, E>(&self, key: K, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let cell = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell
            .get_or_try_init(|| {
                self.metrics.loads_total.increment(1);
                load()
            })
            .await
            .cloned();

        if let Ok(value) = &result {
            self.entries.lock().put(key.clone(), value.clone());
        }
        self.in_flight
            .remove_if(&key, |_, current| Arc::ptr_eq(current, &cell));
        result
    }
}

impl<K, V> Evictable for SelfLoadingCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn evict_fraction(&self, fraction: f64) -> usize {
        let mut entries = self.entries.lock();
        let target = (entries.len() as f64 * fraction.clamp(0.0, 1.0)).ceil() as usize;
        let mut evicted = 0;
        while evicted < target && entries.pop_lru().is_some() {
            evicted += 1;
        }
        drop(entries);
        self.metrics.evictions_total.increment(evicted as u64);
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::testing::{counter, recorded};
    use metrics_util::debugging::Snapshotter;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn cache(capacity: usize) -> SelfLoadingCache<u32, String> {
        SelfLoadingCache::new("test", capacity)
    }

    fn recorded_cache(capacity: usize) -> (SelfLoadingCache<u32, String>, Snapshotter) {
        recorded(|| cache(capacity))
    }

    fn count(snapshotter: &Snapshotter, name: &str) -> u64 {
        counter(snapshotter, name, &[("cache", "test")])
    }

    // --- basic ---

    #[test]
    fn zero_capacity_is_clamped() {
        assert_eq!(cache(0).capacity(), 1);
    }

    #[test]
    fn lru_order_respected() {
        let c = cache(2);
        c.insert(1, "a".into());
        c.insert(2, "b".into());
        assert!(c.get(&1).is_some());
        c.insert(3, "c".into());
        assert!(c.peek(&2).is_none());
        assert!(c.peek(&1).is_some());
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn counts_hits_and_misses() {
        let (c, metrics) = recorded_cache(4);
        c.insert(1, "a".into());
        c.get(&1);
        c.get(&2);
        c.peek(&1);
        assert_eq!(count(&metrics, "bulwark.cache.hits_total"), 1);
        assert_eq!(count(&metrics, "bulwark.cache.misses_total"), 1);
    }

    #[test]
    fn remove_returns_value() {
        let c = cache(4);
        c.insert(7, "x".into());
        assert_eq!(c.remove(&7).as_deref(), Some("x"));
        assert!(c.is_empty());
    }

    // --- eviction ---

    #[test]
    fn evict_fraction_drops_oldest() {
        let (c, metrics) = recorded_cache(100);
        for i in 0..10 {
            c.insert(i, i.to_string());
        }
        assert_eq!(c.evict_fraction(0.3), 3);
        assert_eq!(c.len(), 7);
        for i in 0..3 {
            assert!(c.peek(&i).is_none());
        }
        assert!(c.peek(&3).is_some());
        assert_eq!(count(&metrics, "bulwark.cache.evictions_total"), 3);
    }

    #[test]
    fn evict_fraction_on_empty_cache() {
        assert_eq!(cache(4).evict_fraction(0.5), 0);
    }

    // --- single-flight ---

    #[tokio::test]
    async fn load_result_is_cached() {
        let (c, metrics) = recorded_cache(4);
        let v = c
            .get_or_load(1, || async { Ok::<_, Infallible>("one".to_string()) })
            .await
            .unwrap();
        assert_eq!(v, "one");
        let again = c
            .get_or_load(1, || async { Ok::<_, Infallible>("other".to_string()) })
            .await
            .unwrap();
        assert_eq!(again, "one");
        assert_eq!(count(&metrics, "bulwark.cache.loads_total"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_share_one_load() {
        let c = Arc::new(cache(4));
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let c = Arc::clone(&c);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    c.get_or_load(9, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, Infallible>("nine".to_string())
                    })
                    .await
                    .unwrap()
                })
            })
            .collect();

        for t in tasks {
            assert_eq!(t.await.unwrap(), "nine");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn loads_stay_correct_while_evicting() {
        let c = Arc::new(SelfLoadingCache::<u32, u32>::new("racing", 8));
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let evictor = {
            let c = Arc::clone(&c);
            let stop = Arc::clone(&stop);
            tokio::spawn(async move {
                let mut rounds = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    c.evict_fraction(1.0);
                    rounds += 1;
                    tokio::task::yield_now().await;
                }
                rounds
            })
        };

        let tasks: Vec<_> = (0..32u32)
            .map(|task| {
                let c = Arc::clone(&c);
                tokio::spawn(async move {
                    for i in 0..200u32 {
                        let key = (task + i) % 16;
                        let value = c
                            .get_or_load(key, || async move {
                                tokio::task::yield_now().await;
                                Ok::<_, Infallible>(key * 10)
                            })
                            .await
                            .unwrap();
                        assert_eq!(value, key * 10);
                    }
                })
            })
            .collect();

        for t in tasks {
            t.await.unwrap();
        }
        stop.store(true, Ordering::Relaxed);
        assert!(evictor.await.unwrap() > 0);
        assert!(c.len() <= c.capacity());
        assert!(c.in_flight.is_empty());
    }

    #[tokio::test]
    async fn failed_load_is_not_cached() {
        let c = cache(4);
        let err = c
            .get_or_load(1, || async { Err::<String, _>("backend down") })
            .await;
        assert_eq!(err, Err("backend down"));
        assert!(c.peek(&1).is_none());

        let ok = c
            .get_or_load(1, || async { Ok::<_, &str>("up".to_string()) })
            .await;
        assert_eq!(ok.as_deref(), Ok("up"));
    }
}
