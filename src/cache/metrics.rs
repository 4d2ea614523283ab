//! Cache Metrics and Alerting
//!
//! Per-key hit/miss accounting, bounded response-time samples, and
//! advisory threshold checks for monitoring cache health.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use super::entry::now_ms;
use super::tier::TierStats;
use crate::error::{Error, Result};

/// Most recent samples retained per operation label
pub const MAX_LATENCY_SAMPLES: usize = 1000;

/// Why a get missed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissKind {
    /// Value produced by the fallback generator
    Generated,
    /// No value anywhere and no generator supplied
    NotFound,
}

/// Per-key counters
#[derive(Debug, Clone, Default)]
pub struct KeyStats {
    /// Cumulative hits
    pub hits: u64,
    /// Cumulative misses
    pub misses: u64,
    /// Last access time (epoch ms)
    pub last_access_ms: u64,
}

/// Advisory alert thresholds
#[derive(Debug, Clone)]
pub struct AlertThresholds {
    /// Hit-ratio floor
    pub min_hit_ratio: f64,
    /// Mean response-time ceiling in milliseconds
    pub max_avg_response_ms: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            min_hit_ratio: 0.80,
            max_avg_response_ms: 50.0,
        }
    }
}

/// Threshold breach raised by the periodic check
#[derive(Debug, Clone, PartialEq)]
pub enum Alert {
    /// Hit ratio fell below the floor
    LowHitRatio { ratio: f64, floor: f64 },
    /// Mean response time exceeded the ceiling
    SlowResponses { avg_ms: f64, ceiling_ms: f64 },
}

/// Metrics collector
///
/// Counters are relaxed atomics; a hit undercounted under race is
/// acceptable.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses_generated: AtomicU64,
    misses_not_found: AtomicU64,
    key_stats: DashMap<String, KeyStats>,
    samples: Mutex<HashMap<String, VecDeque<f64>>>,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a hit for a key
    pub fn record_hit(&self, key: &str) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        let mut entry = self.key_stats.entry(key.to_string()).or_default();
        entry.hits += 1;
        entry.last_access_ms = now_ms();
    }

    /// Record a miss for a key
    pub fn record_miss(&self, key: &str, kind: MissKind) {
        match kind {
            MissKind::Generated => self.misses_generated.fetch_add(1, Ordering::Relaxed),
            MissKind::NotFound => self.misses_not_found.fetch_add(1, Ordering::Relaxed),
        };
        let mut entry = self.key_stats.entry(key.to_string()).or_default();
        entry.misses += 1;
        entry.last_access_ms = now_ms();
    }

    /// Record an operation latency sample, keeping the most recent
    /// [`MAX_LATENCY_SAMPLES`] per label
    pub fn record_latency(&self, label: &str, elapsed: Duration) {
        let mut samples = self.samples.lock();
        let ring = samples.entry(label.to_string()).or_default();
        if ring.len() == MAX_LATENCY_SAMPLES {
            ring.pop_front();
        }
        ring.push_back(elapsed.as_secs_f64() * 1000.0);
    }

    /// Mean latency in milliseconds across every label's samples
    pub fn mean_latency_ms(&self) -> f64 {
        let samples = self.samples.lock();
        let (sum, count) = samples
            .values()
            .flatten()
            .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    /// Total hits
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Total misses (generated + not found)
    pub fn misses(&self) -> u64 {
        self.misses_generated.load(Ordering::Relaxed)
            + self.misses_not_found.load(Ordering::Relaxed)
    }

    /// Misses answered by the fallback generator
    pub fn misses_generated(&self) -> u64 {
        self.misses_generated.load(Ordering::Relaxed)
    }

    /// Misses with no value anywhere
    pub fn misses_not_found(&self) -> u64 {
        self.misses_not_found.load(Ordering::Relaxed)
    }

    /// Total requests observed
    pub fn total_requests(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Overall hit ratio (0.0 - 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    /// Stats for a single key
    ///
    /// Asking about a key that was never requested is a caller bug and
    /// surfaces as an error.
    pub fn key_stats(&self, key: &str) -> Result<KeyStats> {
        self.key_stats
            .get(key)
            .map(|s| s.clone())
            .ok_or_else(|| Error::StatsUnknownKey(key.to_string()))
    }

    /// Number of keys with recorded stats
    pub fn tracked_keys(&self) -> usize {
        self.key_stats.len()
    }

    /// Compare current aggregates against thresholds, logging a warning
    /// per breach; advisory only, never an error
    pub fn check_thresholds(&self, thresholds: &AlertThresholds) -> Vec<Alert> {
        let mut alerts = Vec::new();

        let ratio = self.hit_ratio();
        if self.total_requests() > 0 && ratio < thresholds.min_hit_ratio {
            tracing::warn!(
                hit_ratio = ratio,
                floor = thresholds.min_hit_ratio,
                "cache hit ratio below threshold"
            );
            alerts.push(Alert::LowHitRatio {
                ratio,
                floor: thresholds.min_hit_ratio,
            });
        }

        let avg_ms = self.mean_latency_ms();
        if avg_ms > thresholds.max_avg_response_ms {
            tracing::warn!(
                avg_response_ms = avg_ms,
                ceiling_ms = thresholds.max_avg_response_ms,
                "cache response time above threshold"
            );
            alerts.push(Alert::SlowResponses {
                avg_ms,
                ceiling_ms: thresholds.max_avg_response_ms,
            });
        }

        alerts
    }

    /// Reset all counters and samples
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses_generated.store(0, Ordering::Relaxed);
        self.misses_not_found.store(0, Ordering::Relaxed);
        self.key_stats.clear();
        self.samples.lock().clear();
    }
}

/// Aggregated statistics returned by the manager
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Overall hit ratio (0.0 - 1.0)
    pub hit_ratio: f64,
    /// Overall miss ratio (0.0 - 1.0)
    pub miss_ratio: f64,
    /// Total requests observed
    pub total_requests: u64,
    /// Misses answered by the fallback generator
    pub misses_generated: u64,
    /// Misses with no value anywhere
    pub misses_not_found: u64,
    /// Mean response time in milliseconds
    pub avg_response_time_ms: f64,
    /// Combined in-process tier memory usage in bytes
    pub memory_bytes: u64,
    /// Hot tier stats
    pub hot: TierStats,
    /// Warm tier stats
    pub warm: TierStats,
    /// In-process entry counts by region
    pub entries_by_region: HashMap<String, usize>,
    /// In-process entry counts by tag
    pub entries_by_tag: HashMap<String, usize>,
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    /// Start tracking latency
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

// =============================================================================
// Tests
// =============================================================================
