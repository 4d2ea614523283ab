//! Cache Entry Types
//!
//! Entries own one cached value plus the metadata driving eviction,
//! promotion, and invalidation decisions.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Write priority for a cache entry (higher = more valuable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CachePriority {
    /// Evicted first under pressure
    Low,
    /// Default priority
    #[default]
    Medium,
    /// Resists eviction, seeds the warming queue
    High,
}

impl CachePriority {
    /// Numeric weight used in the composite eviction score
    #[inline]
    pub fn weight(&self) -> u64 {
        match self {
            CachePriority::Low => 1,
            CachePriority::Medium => 2,
            CachePriority::High => 3,
        }
    }

    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CachePriority::Low => "low",
            CachePriority::Medium => "medium",
            CachePriority::High => "high",
        }
    }
}

impl std::fmt::Display for CachePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Current time as epoch milliseconds
#[inline]
pub(crate) fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Metadata for cache entries
///
/// `accessed` and `hits` are relaxed atomics mutated on every successful
/// read; an undercounted hit under race is tolerable, a corrupted map is
/// not.
#[derive(Debug)]
pub struct EntryMetadata {
    /// Creation timestamp (epoch ms)
    created_ms: u64,
    /// Last access timestamp (epoch ms); invariant: accessed >= created
    accessed_ms: AtomicU64,
    /// Read counter
    hits: AtomicU64,
    /// Estimated serialized size in bytes
    size: u64,
    /// Tags for TTL policy and tag-based invalidation
    tags: Vec<String>,
    /// Write priority
    priority: CachePriority,
    /// Whether the distributed copy is compressed
    compressed: bool,
    /// Region label of the writer
    region: String,
}

impl EntryMetadata {
    /// Create new entry metadata
    pub fn new(
        size: u64,
        tags: Vec<String>,
        priority: CachePriority,
        compressed: bool,
        region: impl Into<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            created_ms: now,
            accessed_ms: AtomicU64::new(now),
            hits: AtomicU64::new(0),
            size,
            tags,
            priority,
            compressed,
            region: region.into(),
        }
    }

    /// Get estimated size in bytes
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Get creation time (epoch ms)
    #[inline]
    pub fn created_ms(&self) -> u64 {
        self.created_ms
    }

    /// Get last access time (epoch ms)
    #[inline]
    pub fn accessed_ms(&self) -> u64 {
        self.accessed_ms.load(Ordering::Relaxed)
    }

    /// Get hit count
    #[inline]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get tags
    #[inline]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Check whether the entry carries a tag
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Get priority
    #[inline]
    pub fn priority(&self) -> CachePriority {
        self.priority
    }

    /// Whether the distributed copy is compressed
    #[inline]
    pub fn compressed(&self) -> bool {
        self.compressed
    }

    /// Get region label
    #[inline]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Record an access and return the new hit count
    #[inline]
    pub fn record_access(&self) -> u64 {
        self.accessed_ms.store(now_ms(), Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Entry age since creation
    pub fn age(&self) -> std::time::Duration {
        std::time::Duration::from_millis(now_ms().saturating_sub(self.created_ms))
    }

    /// Check if the entry exceeds the tier staleness ceiling
    pub fn is_stale(&self, max_age: std::time::Duration) -> bool {
        self.age() > max_age
    }

    /// Composite eviction score: `accessed_secs + priority_weight * 10_000`
    ///
    /// Lower scores are evicted first, blending LRU with priority so
    /// recently-used or high-priority entries resist eviction.
    pub fn eviction_score(&self) -> u64 {
        self.accessed_ms() / 1000 + self.priority.weight() * 10_000
    }
}

impl Clone for EntryMetadata {
    fn clone(&self) -> Self {
        Self {
            created_ms: self.created_ms,
            accessed_ms: AtomicU64::new(self.accessed_ms.load(Ordering::Relaxed)),
            hits: AtomicU64::new(self.hits.load(Ordering::Relaxed)),
            size: self.size,
            tags: self.tags.clone(),
            priority: self.priority,
            compressed: self.compressed,
            region: self.region.clone(),
        }
    }
}

/// Cache entry containing a JSON payload and its metadata
#[derive(Clone)]
pub struct CacheEntry {
    /// Entry metadata
    pub metadata: EntryMetadata,
    /// Cached payload
    data: serde_json::Value,
}

impl CacheEntry {
    /// Create a new cache entry
    ///
    /// Size is estimated from the serialized JSON length.
    pub fn new(
        data: serde_json::Value,
        tags: Vec<String>,
        priority: CachePriority,
        compressed: bool,
        region: impl Into<String>,
    ) -> Self {
        let size = estimate_size(&data);
        Self {
            metadata: EntryMetadata::new(size, tags, priority, compressed, region),
            data,
        }
    }

    /// Get the payload
    #[inline]
    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }

    /// Get estimated size in bytes
    #[inline]
    pub fn size(&self) -> u64 {
        self.metadata.size()
    }

    /// Record an access and return the new hit count
    #[inline]
    pub fn record_access(&self) -> u64 {
        self.metadata.record_access()
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("size", &self.metadata.size())
            .field("hits", &self.metadata.hits())
            .field("priority", &self.metadata.priority())
            .field("region", &self.metadata.region())
            .finish()
    }
}

/// Estimate the in-memory footprint of a payload via its serialized length
pub fn estimate_size(data: &serde_json::Value) -> u64 {
    serde_json::to_string(data).map(|s| s.len() as u64).unwrap_or(0)
}

// =============================================================================
// Tests
// =============================================================================
