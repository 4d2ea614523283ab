//! In-Process Cache Tiers
//!
//! Bounded key/value stores with size accounting and a composite
//! LRU-plus-priority eviction policy. Two instances make up the in-process
//! hierarchy: Hot (small, promoted-to) and Warm (larger, fallback before
//! the distributed tier).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use super::entry::CacheEntry;
use super::{DEFAULT_EVICT_FRACTION, DEFAULT_MAX_AGE};

/// Tier configuration
#[derive(Debug, Clone)]
pub struct TierConfig {
    /// Tier name used in logs and stats
    pub name: &'static str,
    /// Maximum capacity in bytes
    pub capacity: u64,
    /// Staleness ceiling; entries older than this are evicted on read.
    /// Independent of the caller-supplied TTL, which governs only the
    /// distributed tier.
    pub max_age: Duration,
    /// Fraction of entries removed per eviction pass
    pub evict_fraction: f64,
}

impl TierConfig {
    /// Config for the hot tier
    pub fn hot(capacity: u64) -> Self {
        Self {
            name: "hot",
            capacity,
            max_age: DEFAULT_MAX_AGE,
            evict_fraction: DEFAULT_EVICT_FRACTION,
        }
    }

    /// Config for the warm tier
    pub fn warm(capacity: u64) -> Self {
        Self {
            name: "warm",
            capacity,
            max_age: DEFAULT_MAX_AGE,
            evict_fraction: DEFAULT_EVICT_FRACTION,
        }
    }
}

/// A bounded in-process cache tier
///
/// The running byte total always equals the sum of contained entries'
/// sizes; it is maintained incrementally and only resynchronized during
/// the maintenance sweep.
pub struct Tier {
    config: TierConfig,
    entries: DashMap<String, Arc<CacheEntry>>,
    current_size: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Tier {
    /// Create a new tier
    pub fn new(config: TierConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            current_size: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Tier name
    pub fn name(&self) -> &'static str {
        self.config.name
    }

    /// Get an entry, recording the access
    ///
    /// Entries past the staleness ceiling are removed and reported as a
    /// miss.
    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let entry = self.entries.get(key).map(|e| Arc::clone(e.value()));

        match entry {
            Some(e) => {
                if e.metadata.is_stale(self.config.max_age) {
                    self.remove(key);
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                e.record_access();
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(e)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert an entry, evicting first if the tier would overflow
    pub fn put(&self, key: impl Into<String>, entry: Arc<CacheEntry>) {
        let key = key.into();
        let size = entry.size();

        if self.current_size.load(Ordering::Relaxed) + size > self.config.capacity {
            self.evict_fraction(self.config.evict_fraction);
        }

        match self.entries.insert(key, entry) {
            Some(old) => {
                let old_size = old.size();
                if size >= old_size {
                    self.current_size.fetch_add(size - old_size, Ordering::Relaxed);
                } else {
                    self.current_size.fetch_sub(old_size - size, Ordering::Relaxed);
                }
            }
            None => {
                self.current_size.fetch_add(size, Ordering::Relaxed);
            }
        }
    }

    /// Remove an entry
    pub fn remove(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let removed = self.entries.remove(key).map(|(_, e)| e);
        if let Some(entry) = &removed {
            self.current_size.fetch_sub(entry.size(), Ordering::Relaxed);
        }
        removed
    }

    /// Check if the tier contains a key
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Evict the lowest-scoring fraction of entries
    ///
    /// Candidates are ranked ascending by the composite score
    /// `accessed_secs + priority_weight * 10_000`, so the least recently
    /// accessed entries among the lowest priorities go first.
    pub fn evict_fraction(&self, fraction: f64) -> usize {
        let mut candidates: Vec<(String, u64, u64)> = self
            .entries
            .iter()
            .map(|e| {
                (
                    e.key().clone(),
                    e.value().metadata.eviction_score(),
                    e.value().size(),
                )
            })
            .collect();

        if candidates.is_empty() {
            return 0;
        }

        candidates.sort_by_key(|(_, score, _)| *score);

        let target = ((candidates.len() as f64 * fraction).ceil() as usize).max(1);
        let mut evicted = 0;

        for (key, _, size) in candidates.into_iter().take(target) {
            if self.entries.remove(&key).is_some() {
                self.current_size.fetch_sub(size, Ordering::Relaxed);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                evicted += 1;
            }
        }

        tracing::debug!(tier = self.config.name, evicted, "eviction pass complete");
        evicted
    }

    /// Maintenance sweep: drop stale entries and resync the byte total
    pub fn evict_expired(&self) -> usize {
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().metadata.is_stale(self.config.max_age))
            .map(|e| e.key().clone())
            .collect();

        let mut evicted = 0;
        for key in stale {
            if self.remove(&key).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                evicted += 1;
            }
        }

        // Resync accounting against the surviving entries
        let actual: u64 = self.entries.iter().map(|e| e.value().size()).sum();
        self.current_size.store(actual, Ordering::Relaxed);

        evicted
    }

    /// Snapshot of the keys currently present
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshot of (key, entry) pairs currently present
    pub fn snapshot(&self) -> Vec<(String, Arc<CacheEntry>)> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect()
    }

    /// Current size in bytes
    pub fn size_bytes(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Byte capacity
    pub fn capacity(&self) -> u64 {
        self.config.capacity
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the tier is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Clear the tier
    pub fn clear(&self) {
        self.entries.clear();
        self.current_size.store(0, Ordering::Relaxed);
    }

    /// Get tier statistics
    pub fn stats(&self) -> TierStats {
        TierStats {
            name: self.config.name,
            size_bytes: self.size_bytes(),
            capacity: self.capacity(),
            entries: self.len(),
            hits: self.hits(),
            misses: self.misses(),
            evictions: self.evictions(),
        }
    }
}

/// Tier statistics snapshot
#[derive(Debug, Clone)]
pub struct TierStats {
    /// Tier name
    pub name: &'static str,
    /// Current size in bytes
    pub size_bytes: u64,
    /// Capacity in bytes
    pub capacity: u64,
    /// Number of entries
    pub entries: usize,
    /// Hit count
    pub hits: u64,
    /// Miss count
    pub misses: u64,
    /// Eviction count
    pub evictions: u64,
}

// =============================================================================
// Tests
// =============================================================================
