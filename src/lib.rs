//! GeoTier - Tiered Cache and Invalidation Engine
//!
//! A multi-tier cache sitting in front of a geographically distributed
//! key/value store, serving location-based read traffic at low latency and
//! high hit rate.
//!
//! # Architecture
//!
//! ```text
//! get(key) ──► Hot (RAM) ──► Warm (RAM) ──► Distributed ──► fallback generator
//!                ▲  promote on     ▲ populate on              │ write-through
//!                └── repeat hits ──┴── distributed hit ◄──────┘
//! ```
//!
//! Writes land in the tier selected by priority/size heuristics and always
//! write through to the distributed store. Background tasks evict expired and
//! oversized tier contents, drain the warming and delayed-invalidation
//! queues, replicate tagged writes across regions, and watch hit-rate and
//! latency thresholds.
//!
//! # Features
//!
//! - Hot/Warm in-process tiers with size-bounded, priority-aware eviction
//! - Write-through to a pluggable distributed backend with LZ4 compression
//! - Tag-based, cascading, and delayed invalidation
//! - Priority-ordered cache warming under batch and concurrency caps
//! - Delayed cross-region replication for non-local writes
//! - Per-key and global statistics with advisory threshold alerts
//!
//! # Modules
//!
//! - [`cache`] - The tiered cache engine and all of its components
//! - [`error`] - Error types

pub mod cache;
pub mod error;

// Re-export commonly used types
pub use cache::{
    CacheEntry, CacheManager, CachePriority, CacheStats, DistributedBackend, GeographicScope,
    GetOptions, InMemoryBackend, InvalidationOptions, InvalidationRule, ManagerConfig, Tier,
    WarmingEntry, WarmingOptions, WriteConfig,
};
pub use error::{Error, Result};
