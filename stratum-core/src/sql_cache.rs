//! Bounded, segmented LRU cache for compiled templates.
//!
//! Keys hash to one of N segments, each holding at most its share of the
//! capacity. Lookups take the segment's read lock and bump an atomic recency
//! stamp, so concurrent readers never wait on each other. A miss inserts an
//! empty slot under the write lock and fills it outside the lock; callers
//! racing on the same key wait on that slot, so the value is computed once.

use std::collections::HashMap;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::OnceCell;
use parking_lot::RwLock;

use crate::template::{CompiledTemplate, TemplateKey};

/// Cache of compiled templates keyed by shape and dialect.
pub type TemplateCache = SegmentedCache<TemplateKey, CompiledTemplate>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub len: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
struct Slot<V> {
    value: OnceCell<Arc<V>>,
    stamp: AtomicU64,
}

#[derive(Debug)]
struct Segment<K, V> {
    entries: RwLock<HashMap<K, Arc<Slot<V>>>>,
    capacity: usize,
}

#[derive(Debug)]
pub struct SegmentedCache<K, V> {
    segments: Vec<Segment<K, V>>,
    hasher: RandomState,
    clock: AtomicU64,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K, V> SegmentedCache<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Cache holding at most `capacity` entries over `segments` segments.
    ///
    /// A capacity of zero disables caching; every lookup computes.
    pub fn new(capacity: usize, segments: usize) -> Self {
        let count = segments.clamp(1, capacity.max(1));
        let (base, extra) = (capacity / count, capacity % count);
        Self {
            segments: (0..count)
                .map(|index| Segment {
                    entries: RwLock::new(HashMap::new()),
                    capacity: base + usize::from(index < extra),
                })
                .collect(),
            hasher: RandomState::new(),
            clock: AtomicU64::new(0),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn segment(&self, key: &K) -> (usize, &Segment<K, V>) {
        let index = (self.hasher.hash_one(key) % self.segments.len() as u64) as usize;
        (index, &self.segments[index])
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn slot(&self, key: &K) -> Arc<Slot<V>> {
        let (index, segment) = self.segment(key);
        if let Some(slot) = segment.entries.read().get(key) {
            slot.stamp.store(self.tick(), Ordering::Relaxed);
            return slot.clone();
        }

        let mut entries = segment.entries.write();
        if let Some(slot) = entries.get(key) {
            slot.stamp.store(self.tick(), Ordering::Relaxed);
            return slot.clone();
        }
        if entries.len() >= segment.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, slot)| slot.stamp.load(Ordering::Relaxed))
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(segment = index, "stratum template cache eviction");
                #[cfg(feature = "metrics")]
                metrics::counter!("stratum.template_cache.evictions").increment(1);
            }
        }
        let slot = Arc::new(Slot {
            value: OnceCell::new(),
            stamp: AtomicU64::new(self.tick()),
        });
        entries.insert(key.clone(), slot.clone());
        slot
    }

    fn record(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("stratum template cache hit");
            #[cfg(feature = "metrics")]
            metrics::counter!("stratum.template_cache.hits").increment(1);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "metrics")]
            metrics::counter!("stratum.template_cache.misses").increment(1);
        }
    }

    pub fn get_or_compute<F>(&self, key: K, compute: F) -> Arc<V>
    where
        F: FnOnce() -> V,
    {
        match self.get_or_try_compute::<_, std::convert::Infallible>(key, || Ok(compute())) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Returns the cached value for `key`, computing it on a miss.
    ///
    /// A failed compute leaves no entry behind; the next caller computes again.
    pub fn get_or_try_compute<F, E>(&self, key: K, compute: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if self.capacity == 0 {
            self.record(false);
            return compute().map(Arc::new);
        }

        let slot = self.slot(&key);
        let mut computed = false;
        let result = slot.value.get_or_try_init(|| {
            computed = true;
            compute().map(Arc::new)
        });
        self.record(!computed);

        match result {
            Ok(value) => Ok(value.clone()),
            Err(err) => {
                let (_, segment) = self.segment(&key);
                let mut entries = segment.entries.write();
                if entries
                    .get(&key)
                    .is_some_and(|current| Arc::ptr_eq(current, &slot))
                {
                    entries.remove(&key);
                }
                Err(err)
            }
        }
    }

    /// Cached value without touching recency or statistics.
    pub fn peek(&self, key: &K) -> Option<Arc<V>> {
        let (_, segment) = self.segment(key);
        segment
            .entries
            .read()
            .get(key)
            .and_then(|slot| slot.value.get().cloned())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.peek(key).is_some()
    }

    pub fn remove(&self, key: &K) -> bool {
        let (_, segment) = self.segment(key);
        segment.entries.write().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.segments
            .iter()
            .map(|segment| segment.entries.read().len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        for segment in &self.segments {
            segment.entries.write().clear();
        }
        tracing::debug!("stratum template cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            len: self.len(),
            capacity: self.capacity,
        }
    }
}
