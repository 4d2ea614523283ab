//! Tiered Cache Engine
//!
//! Multi-tier caching for geo-distributed read traffic, with tag-based
//! invalidation, background warming, and delayed cross-region replication.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          Cache Manager                              │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  Hot Tier (RAM)      │ Warm Tier (RAM)     │ Distributed Tier       │
//! │  ┌────────────────┐  │ ┌────────────────┐  │ ┌───────────────────┐  │
//! │  │ Bounded map    │  │ │ Bounded map    │  │ │ Remote KV service │  │
//! │  │ small, hottest │  │ │ larger, warm   │  │ │ shared, regional  │  │
//! │  └────────────────┘  │ └────────────────┘  │ └───────────────────┘  │
//! │          │                    │                      │              │
//! │          └────────────────────┴──────────────────────┘              │
//! │                               │                                     │
//! │   Invalidation Engine · Warming Queue · Replication · Metrics       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads walk Hot → Warm → Distributed → fallback generator, populating
//! higher tiers on the way up. Writes place by priority/size and always
//! write through to the distributed store. Maintenance tasks sweep
//! expired entries, drain the delayed-invalidation and warming queues,
//! and watch hit-rate/latency thresholds.
//!
//! # Design Principles
//!
//! - In-process tiers never fail; the distributed tier degrades to a miss
//! - Eviction blends LRU with priority so valuable entries survive
//! - Invalidation, warming, and replication are best-effort and eventual
//! - Background tasks are supervised and join cleanly on shutdown

mod entry;
mod invalidation;
mod manager;
mod metrics;
mod replication;
mod tier;
mod ttl;
mod warming;
pub mod compression;
pub mod distributed;

pub use compression::{CompressionAlgorithm, CompressionConfig, CompressionManager, Compressor};
pub use distributed::{DistributedBackend, DistributedCache, InMemoryBackend, StoredEnvelope};
pub use entry::{CacheEntry, CachePriority, EntryMetadata};
pub use invalidation::{
    InvalidationEngine, InvalidationOptions, InvalidationRule, RelatedKeyPolicy,
};
pub use manager::{CacheManager, Fallback, GetOptions, ManagerConfig, WriteConfig};
pub use metrics::{Alert, AlertThresholds, CacheMetrics, CacheStats, KeyStats, MissKind};
pub use replication::{GeographicScope, ReplicationConfig, ReplicationScheduler};
pub use tier::{Tier, TierConfig, TierStats};
pub use ttl::ttl_for;
pub use warming::{ValueGenerator, WarmingEntry, WarmingOptions, WarmingQueue};

/// Default hot tier capacity (64MB)
pub const DEFAULT_HOT_CAPACITY: u64 = 64 * 1024 * 1024;

/// Default warm tier capacity (256MB)
pub const DEFAULT_WARM_CAPACITY: u64 = 256 * 1024 * 1024;

/// Staleness ceiling for in-process entries (independent of the
/// distributed TTL)
pub const DEFAULT_MAX_AGE: std::time::Duration = std::time::Duration::from_secs(300);

/// Fraction of entries removed per eviction pass
pub const DEFAULT_EVICT_FRACTION: f64 = 0.10;

/// Writes below this size land in the hot tier (10KB)
pub const HOT_SIZE_THRESHOLD: u64 = 10 * 1024;

/// Writes below this size land in the warm tier (100KB)
pub const WARM_SIZE_THRESHOLD: u64 = 100 * 1024;

/// Warm-tier hits required before promotion to hot
pub const PROMOTION_HIT_THRESHOLD: u64 = 3;

// =============================================================================
// Tests
// =============================================================================
