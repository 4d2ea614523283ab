//! Cache Manager - Tiered Cache Facade
//!
//! Composes the tiers, invalidation engine, warming queue, replication
//! scheduler, and metrics into the public `get` / `set` / `invalidate` /
//! `warm_cache` / `stats` surface, and supervises the periodic maintenance
//! tasks behind it.
//!
//! The manager is an explicitly constructed, explicitly owned object:
//! every collaborator is a named field resolved at compile time, and the
//! process-wide lifecycle is `start()` / `shutdown()`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::compression::{CompressionConfig, CompressionManager};
use super::distributed::{DistributedBackend, DistributedCache, InMemoryBackend, StoredEnvelope};
use super::entry::{estimate_size, CacheEntry, CachePriority};
use super::invalidation::{
    InvalidationEngine, InvalidationOptions, InvalidationRule, RelatedKeyPolicy,
};
use super::metrics::{AlertThresholds, CacheMetrics, CacheStats, KeyStats, LatencyTracker, MissKind};
use super::replication::{GeographicScope, ReplicationConfig, ReplicationScheduler};
use super::tier::{Tier, TierConfig};
use super::ttl::ttl_for;
use super::warming::{order_by_priority, WarmingEntry, WarmingOptions, WarmingQueue};
use super::{
    DEFAULT_HOT_CAPACITY, DEFAULT_WARM_CAPACITY, HOT_SIZE_THRESHOLD, PROMOTION_HIT_THRESHOLD,
    WARM_SIZE_THRESHOLD,
};
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Manager configuration
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Hot tier configuration
    pub hot: TierConfig,
    /// Warm tier configuration
    pub warm: TierConfig,
    /// Compression configuration for the distributed tier
    pub compression: CompressionConfig,
    /// Warm hits required before promotion to Hot
    pub promotion_hits: u64,
    /// Writes smaller than this land in Hot
    pub hot_size_threshold: u64,
    /// Writes smaller than this land in Warm
    pub warm_size_threshold: u64,
    /// Home region label for writes that do not specify one
    pub region: String,
    /// Replication configuration
    pub replication: ReplicationConfig,
    /// Defaults for warming runs and the queue drain
    pub warming: WarmingOptions,
    /// Advisory alert thresholds
    pub alerts: AlertThresholds,
    /// Static invalidation rules
    pub rules: Vec<InvalidationRule>,
    /// Cascade related-key heuristic
    pub related_keys: RelatedKeyPolicy,
    /// Interval of the expired/oversized eviction sweep
    pub eviction_interval: Duration,
    /// Interval of the delayed-invalidation sweep
    pub delayed_sweep_interval: Duration,
    /// Interval of the warming queue drain
    pub warming_drain_interval: Duration,
    /// Interval of the threshold alert check
    pub alert_check_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            hot: TierConfig::hot(DEFAULT_HOT_CAPACITY),
            warm: TierConfig::warm(DEFAULT_WARM_CAPACITY),
            compression: CompressionConfig::default(),
            promotion_hits: PROMOTION_HIT_THRESHOLD,
            hot_size_threshold: HOT_SIZE_THRESHOLD,
            warm_size_threshold: WARM_SIZE_THRESHOLD,
            region: "local".to_string(),
            replication: ReplicationConfig::default(),
            warming: WarmingOptions::default(),
            alerts: AlertThresholds::default(),
            rules: Vec::new(),
            related_keys: RelatedKeyPolicy::default(),
            eviction_interval: Duration::from_secs(60),
            delayed_sweep_interval: Duration::from_secs(1),
            warming_drain_interval: Duration::from_secs(30),
            alert_check_interval: Duration::from_secs(60),
        }
    }
}

/// Per-write configuration
#[derive(Debug, Clone)]
pub struct WriteConfig {
    /// TTL for the distributed copy; None computes one from the TTL policy
    pub ttl: Option<Duration>,
    /// Tags for TTL policy and invalidation
    pub tags: Vec<String>,
    /// Write priority
    pub priority: CachePriority,
    /// Compress the distributed copy when large enough
    pub compression: bool,
    /// Schedule geographic replication
    pub replication: bool,
    /// Geographic scope of the write
    pub scope: GeographicScope,
    /// Region label; None uses the manager's home region
    pub region: Option<String>,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            ttl: None,
            tags: Vec::new(),
            priority: CachePriority::Medium,
            compression: true,
            replication: false,
            scope: GeographicScope::Local,
            region: None,
        }
    }
}

/// Fallback generator invoked on a total miss
pub type Fallback<T> = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<T>> + Send>;

/// Options for a read
pub struct GetOptions<T> {
    /// Tags applied if the fallback result is written through
    pub tags: Vec<String>,
    /// Region label applied if the fallback result is written through
    pub region: Option<String>,
    /// Priority applied to tier copies made on the way up
    pub priority: CachePriority,
    /// Generator invoked when no tier has the value
    pub fallback: Option<Fallback<T>>,
}

impl<T> Default for GetOptions<T> {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            region: None,
            priority: CachePriority::Medium,
            fallback: None,
        }
    }
}

impl<T> GetOptions<T> {
    /// Attach a fallback generator
    pub fn with_fallback<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.fallback = Some(Box::new(move || Box::pin(f())));
        self
    }
}

// =============================================================================
// Cache Manager
// =============================================================================

/// Tiered cache manager
pub struct CacheManager {
    config: ManagerConfig,
    hot: Arc<Tier>,
    warm: Arc<Tier>,
    distributed: Arc<DistributedCache>,
    compression: Arc<CompressionManager>,
    invalidation: InvalidationEngine,
    warming: WarmingQueue,
    replication: ReplicationScheduler,
    metrics: Arc<CacheMetrics>,
    cancel: CancellationToken,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl CacheManager {
    /// Create a new manager over the given distributed backend
    pub fn new(config: ManagerConfig, backend: Arc<dyn DistributedBackend>) -> Self {
        let hot = Arc::new(Tier::new(config.hot.clone()));
        let warm = Arc::new(Tier::new(config.warm.clone()));
        let distributed = Arc::new(DistributedCache::new(Arc::clone(&backend)));
        let cancel = CancellationToken::new();

        let invalidation = InvalidationEngine::new(
            Arc::clone(&hot),
            Arc::clone(&warm),
            Arc::clone(&distributed),
            config.related_keys.clone(),
            config.rules.clone(),
        );
        let replication =
            ReplicationScheduler::new(backend, config.replication.clone(), cancel.clone());

        Self {
            compression: Arc::new(CompressionManager::with_config(config.compression.clone())),
            hot,
            warm,
            distributed,
            invalidation,
            warming: WarmingQueue::new(),
            replication,
            metrics: Arc::new(CacheMetrics::new()),
            cancel,
            config,
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Create with an in-memory backend (for tests and single-process use)
    pub fn in_memory() -> Self {
        Self::new(ManagerConfig::default(), Arc::new(InMemoryBackend::new()))
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Get a value, checking Hot, Warm, the distributed store, then the
    /// fallback generator
    ///
    /// Tier and distributed failures degrade to a miss; the only error a
    /// caller sees on the read path is a failed fallback generator on a
    /// total miss, or a payload that does not deserialize to `T`.
    pub async fn get<T>(&self, key: &str, opts: GetOptions<T>) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        let tracker = LatencyTracker::start();

        // Hot tier
        if let Some(entry) = self.hot.get(key) {
            self.metrics.record_hit(key);
            self.metrics.record_latency("get", tracker.elapsed());
            return Ok(Some(serde_json::from_value(entry.data().clone())?));
        }

        // Warm tier, promoting entries that keep getting hit
        if let Some(entry) = self.warm.get(key) {
            if entry.metadata.hits() >= self.config.promotion_hits {
                self.hot.put(key, Arc::clone(&entry));
                tracing::debug!(key, "promoted warm entry to hot tier");
            }
            self.metrics.record_hit(key);
            self.metrics.record_latency("get", tracker.elapsed());
            return Ok(Some(serde_json::from_value(entry.data().clone())?));
        }

        // Distributed tier; an unready or failing client is a miss
        if let Some(envelope) = self.distributed.fetch(key).await {
            match envelope.payload(&self.compression) {
                Ok(value) => {
                    let entry = Arc::new(CacheEntry::new(
                        value.clone(),
                        envelope.tags,
                        opts.priority,
                        envelope.compressed,
                        envelope.region,
                    ));
                    self.warm.put(key, entry);
                    self.metrics.record_hit(key);
                    self.metrics.record_latency("get", tracker.elapsed());
                    return Ok(Some(serde_json::from_value(value)?));
                }
                Err(e) => {
                    tracing::warn!(key, "stored payload unusable, treating as miss: {}", e);
                }
            }
        }

        // Fallback generator; still attempted after upstream degradation
        if let Some(generator) = opts.fallback {
            match generator().await {
                Ok(value) => {
                    let json = serde_json::to_value(&value)?;
                    let cfg = WriteConfig {
                        tags: opts.tags,
                        priority: opts.priority,
                        region: opts.region,
                        ..WriteConfig::default()
                    };
                    self.set_value(key, json, cfg).await?;
                    self.metrics.record_miss(key, MissKind::Generated);
                    self.metrics.record_latency("get", tracker.elapsed());
                    return Ok(Some(value));
                }
                Err(source) => {
                    return Err(Error::Generator {
                        key: key.to_string(),
                        source: source.into(),
                    });
                }
            }
        }

        self.metrics.record_miss(key, MissKind::NotFound);
        self.metrics.record_latency("get", tracker.elapsed());
        Ok(None)
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Store a value
    pub async fn set<T: Serialize>(&self, key: &str, data: T, cfg: WriteConfig) -> Result<()> {
        let value = serde_json::to_value(&data)?;
        self.set_value(key, value, cfg).await
    }

    /// Store an already-serialized payload
    ///
    /// Placement: High priority or < 10 KB goes Hot; Medium or < 100 KB
    /// goes Warm; everything always writes through to the distributed
    /// store.
    pub async fn set_value(
        &self,
        key: &str,
        value: serde_json::Value,
        cfg: WriteConfig,
    ) -> Result<()> {
        let tracker = LatencyTracker::start();

        let region = cfg.region.unwrap_or_else(|| self.config.region.clone());
        let ttl = cfg.ttl.unwrap_or_else(|| ttl_for(key, &cfg.tags));

        let (encoded, compressed) = StoredEnvelope::encode(
            &value,
            cfg.tags.clone(),
            &region,
            cfg.compression,
            &self.compression,
        )?;

        let size = estimate_size(&value);
        let entry = Arc::new(CacheEntry::new(
            value.clone(),
            cfg.tags,
            cfg.priority,
            compressed,
            &region,
        ));

        if cfg.priority == CachePriority::High || size < self.config.hot_size_threshold {
            self.hot.put(key, Arc::clone(&entry));
        } else if cfg.priority == CachePriority::Medium || size < self.config.warm_size_threshold {
            self.warm.put(key, Arc::clone(&entry));
        }

        // Write-through; a dropped write is already logged by the wrapper
        self.distributed.store(key, ttl, encoded.clone()).await;

        if cfg.replication && cfg.scope != GeographicScope::Local {
            self.replication.schedule(key, encoded, ttl, cfg.scope);
        }

        // High-priority values reseed quickly after an eviction
        if cfg.priority == CachePriority::High {
            self.warming
                .enqueue(WarmingEntry::replay(key, CachePriority::High, value));
        }

        self.metrics.record_latency("set", tracker.elapsed());
        Ok(())
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Invalidate every key matching a pattern; returns the synchronous
    /// removal count
    pub async fn invalidate(&self, pattern: &str, opts: InvalidationOptions) -> Result<usize> {
        let tracker = LatencyTracker::start();
        let count = self.invalidation.invalidate(pattern, &opts).await?;
        self.metrics.record_latency("invalidate", tracker.elapsed());
        Ok(count)
    }

    /// Fire every invalidation rule registered for a trigger name
    pub async fn apply_trigger(&self, trigger: &str) -> Result<usize> {
        self.invalidation.apply_trigger(trigger).await
    }

    // =========================================================================
    // Warming
    // =========================================================================

    /// Warm a set of entries now, priority-ordered, in capped batches
    ///
    /// Returns the number of entries successfully written. Failures are
    /// isolated per entry and never abort the batch.
    pub async fn warm_cache(&self, entries: Vec<WarmingEntry>, opts: &WarmingOptions) -> usize {
        let ordered = order_by_priority(entries);
        let batch_size = opts.batch_size.max(1);
        let concurrency = opts.concurrency.max(1);
        let batch_count = ordered.len().div_ceil(batch_size);
        let mut warmed = 0;

        for (i, batch) in ordered.chunks(batch_size).enumerate() {
            for group in batch.chunks(concurrency) {
                let generated = futures::future::join_all(group.iter().map(|item| {
                    let generator = Arc::clone(&item.generator);
                    async move { (item, generator().await) }
                }))
                .await;

                for (item, result) in generated {
                    match result {
                        Ok(value) => {
                            let cfg = WriteConfig {
                                priority: item.priority,
                                region: opts.region.clone(),
                                ..WriteConfig::default()
                            };
                            match self.set_value(&item.key, value, cfg).await {
                                Ok(()) => warmed += 1,
                                Err(e) => {
                                    tracing::warn!(key = %item.key, "warming write failed: {}", e)
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(key = %item.key, "warming generator failed: {}", e)
                        }
                    }
                }
            }

            if i + 1 < batch_count {
                tokio::time::sleep(opts.batch_delay).await;
            }
        }

        if warmed > 0 {
            tracing::info!(warmed, "cache warming pass complete");
        }
        warmed
    }

    /// Queue an entry for the background warming drain
    pub fn enqueue_warming(&self, entry: WarmingEntry) {
        self.warming.enqueue(entry);
    }

    /// Drain the warming queue now (also run by the background task)
    pub async fn drain_warming_queue(&self) -> usize {
        let items = self.warming.drain();
        if items.is_empty() {
            return 0;
        }
        let opts = self.config.warming.clone();
        self.warm_cache(items, &opts).await
    }

    // =========================================================================
    // Stats
    // =========================================================================

    /// Aggregate statistics across tiers and metrics
    pub fn stats(&self) -> CacheStats {
        let hot = self.hot.stats();
        let warm = self.warm.stats();

        let mut entries_by_region: HashMap<String, usize> = HashMap::new();
        let mut entries_by_tag: HashMap<String, usize> = HashMap::new();
        for (_, entry) in self.hot.snapshot().into_iter().chain(self.warm.snapshot()) {
            *entries_by_region
                .entry(entry.metadata.region().to_string())
                .or_default() += 1;
            for tag in entry.metadata.tags() {
                *entries_by_tag.entry(tag.clone()).or_default() += 1;
            }
        }

        let hit_ratio = self.metrics.hit_ratio();
        let total_requests = self.metrics.total_requests();
        CacheStats {
            hit_ratio,
            miss_ratio: if total_requests == 0 { 0.0 } else { 1.0 - hit_ratio },
            total_requests,
            misses_generated: self.metrics.misses_generated(),
            misses_not_found: self.metrics.misses_not_found(),
            avg_response_time_ms: self.metrics.mean_latency_ms(),
            memory_bytes: hot.size_bytes + warm.size_bytes,
            hot,
            warm,
            entries_by_region,
            entries_by_tag,
        }
    }

    /// Stats for a single key; an unknown key is a caller error
    pub fn key_stats(&self, key: &str) -> Result<KeyStats> {
        self.metrics.key_stats(key)
    }

    /// Access the metrics collector
    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Access the hot tier
    pub fn hot(&self) -> &Tier {
        &self.hot
    }

    /// Access the warm tier
    pub fn warm(&self) -> &Tier {
        &self.warm
    }

    /// Access the distributed tier
    pub fn distributed(&self) -> &DistributedCache {
        &self.distributed
    }

    /// Replications scheduled since startup
    pub fn replications_scheduled(&self) -> u64 {
        self.replication.scheduled()
    }

    /// Clear the in-process tiers
    pub fn clear(&self) {
        self.hot.clear();
        self.warm.clear();
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Evict expired entries and shrink oversized tiers
    ///
    /// Run periodically by the background sweep; exposed so tests can
    /// drive maintenance directly instead of waiting on wall-clock
    /// timers.
    pub fn run_eviction_sweep(&self) -> usize {
        let mut evicted = self.hot.evict_expired() + self.warm.evict_expired();
        let fractions = [
            (&self.hot, self.config.hot.evict_fraction),
            (&self.warm, self.config.warm.evict_fraction),
        ];
        for (tier, fraction) in fractions {
            if tier.size_bytes() > tier.capacity() {
                evicted += tier.evict_fraction(fraction);
            }
        }
        evicted
    }

    /// Execute delayed invalidations that have come due
    pub async fn run_delayed_invalidations(&self) -> usize {
        self.invalidation.process_due().await
    }

    /// Number of queued delayed invalidations
    pub fn pending_delayed_invalidations(&self) -> usize {
        self.invalidation.pending_delayed()
    }

    /// Compare aggregates against alert thresholds, logging breaches
    pub fn run_alert_check(&self) -> usize {
        self.metrics.check_thresholds(&self.config.alerts).len()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the supervised background maintenance tasks
    ///
    /// Idempotent; tasks run until `shutdown()`.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        tasks.push(self.spawn_periodic(self.config.eviction_interval, |mgr| async move {
            mgr.run_eviction_sweep();
        }));
        tasks.push(
            self.spawn_periodic(self.config.delayed_sweep_interval, |mgr| async move {
                mgr.run_delayed_invalidations().await;
            }),
        );
        tasks.push(
            self.spawn_periodic(self.config.warming_drain_interval, |mgr| async move {
                mgr.drain_warming_queue().await;
            }),
        );
        tasks.push(
            self.spawn_periodic(self.config.alert_check_interval, |mgr| async move {
                mgr.run_alert_check();
            }),
        );

        tracing::info!("cache manager background tasks started");
    }

    fn spawn_periodic<F, Fut>(self: &Arc<Self>, period: Duration, body: F) -> JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let mgr = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => body(Arc::clone(&mgr)).await,
                }
            }
        })
    }

    /// Stop background tasks and in-flight replication timers
    ///
    /// Cooperative: periodic tasks finish their current pass before
    /// exiting.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!("cache manager shut down");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn write_cfg(priority: CachePriority) -> WriteConfig {
        WriteConfig {
            priority,
            ..WriteConfig::default()
        }
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let manager = CacheManager::in_memory();

        manager
            .set("biz:123", json!({"name": "Joe's Pizza"}), WriteConfig::default())
            .await
            .unwrap();

        let value: Option<serde_json::Value> =
            manager.get("biz:123", GetOptions::default()).await.unwrap();
        assert_eq!(value.unwrap()["name"], "Joe's Pizza");
    }

    #[tokio::test]
    async fn test_small_write_lands_hot() {
        let manager = CacheManager::in_memory();

        manager
            .set("k", json!("small"), write_cfg(CachePriority::Low))
            .await
            .unwrap();
        assert!(manager.hot().contains("k"));
    }

    #[tokio::test]
    async fn test_high_priority_lands_hot_and_seeds_warming() {
        let manager = CacheManager::in_memory();

        manager
            .set("k", json!("v"), write_cfg(CachePriority::High))
            .await
            .unwrap();

        assert!(manager.hot().contains("k"));
        assert_eq!(manager.warming.len(), 1);
    }

    #[tokio::test]
    async fn test_medium_large_write_lands_warm() {
        let mut config = ManagerConfig::default();
        config.hot_size_threshold = 4; // force everything past Hot by size
        let manager = CacheManager::new(config, Arc::new(InMemoryBackend::new()));

        manager
            .set("k", json!("a larger payload"), write_cfg(CachePriority::Medium))
            .await
            .unwrap();

        assert!(!manager.hot().contains("k"));
        assert!(manager.warm().contains("k"));
    }

    #[tokio::test]
    async fn test_low_priority_large_write_is_distributed_only() {
        let mut config = ManagerConfig::default();
        config.hot_size_threshold = 4;
        config.warm_size_threshold = 4;
        let manager = CacheManager::new(config, Arc::new(InMemoryBackend::new()));

        manager
            .set("k", json!("a larger payload"), write_cfg(CachePriority::Low))
            .await
            .unwrap();

        assert!(!manager.hot().contains("k"));
        assert!(!manager.warm().contains("k"));
        assert!(manager.distributed().exists("k").await);
    }

    #[tokio::test]
    async fn test_distributed_hit_populates_warm() {
        let manager = CacheManager::in_memory();

        manager
            .set("k", json!(7), write_cfg(CachePriority::Low))
            .await
            .unwrap();
        manager.clear();
        assert!(!manager.hot().contains("k"));

        let value: Option<i64> = manager.get("k", GetOptions::default()).await.unwrap();
        assert_eq!(value, Some(7));
        assert!(manager.warm().contains("k"));
    }

    #[tokio::test]
    async fn test_promotion_after_repeated_warm_hits() {
        let manager = CacheManager::in_memory();

        manager
            .set("k", json!(1), write_cfg(CachePriority::Low))
            .await
            .unwrap();
        manager.clear();

        // First read repopulates Warm from the distributed store
        let _: Option<i64> = manager.get("k", GetOptions::default()).await.unwrap();
        assert!(manager.warm().contains("k"));
        assert!(!manager.hot().contains("k"));

        for _ in 0..3 {
            let _: Option<i64> = manager.get("k", GetOptions::default()).await.unwrap();
        }
        assert!(manager.hot().contains("k"));
    }

    #[tokio::test]
    async fn test_fallback_on_total_miss_then_cached() {
        let manager = CacheManager::in_memory();
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));

        let calls_in = Arc::clone(&calls);
        let opts = GetOptions::default().with_fallback(move || async move {
            calls_in.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(42i64)
        });

        let value = manager.get("k", opts).await.unwrap();
        assert_eq!(value, Some(42));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        // Second read comes from a tier, not the generator
        let value: Option<i64> = manager.get("k", GetOptions::default()).await.unwrap();
        assert_eq!(value, Some(42));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(manager.metrics().misses_generated(), 1);
    }

    #[tokio::test]
    async fn test_generator_failure_propagates_on_total_miss() {
        let manager = CacheManager::in_memory();

        let opts: GetOptions<i64> = GetOptions::default()
            .with_fallback(|| async { Err(anyhow::anyhow!("spatial engine down")) });

        assert_matches!(
            manager.get("absent", opts).await,
            Err(Error::Generator { .. })
        );
    }

    #[tokio::test]
    async fn test_miss_without_generator_is_none() {
        let manager = CacheManager::in_memory();

        let value: Option<i64> = manager.get("absent", GetOptions::default()).await.unwrap();
        assert_eq!(value, None);
        assert_eq!(manager.metrics().misses_not_found(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_pattern_counts_matches() {
        let manager = CacheManager::in_memory();

        for city in ["nyc", "sf", "la"] {
            manager
                .set(&format!("search:{}", city), json!(city), WriteConfig::default())
                .await
                .unwrap();
        }
        manager.set("biz:1", json!(1), WriteConfig::default()).await.unwrap();

        let count = manager
            .invalidate("search:*", InvalidationOptions::default())
            .await
            .unwrap();
        assert_eq!(count, 3);

        let gone: Option<String> = manager.get("search:nyc", GetOptions::default()).await.unwrap();
        assert_eq!(gone, None);
        let kept: Option<i64> = manager.get("biz:1", GetOptions::default()).await.unwrap();
        assert_eq!(kept, Some(1));
    }

    #[tokio::test]
    async fn test_delayed_invalidation_via_sweep() {
        let manager = CacheManager::in_memory();

        manager.set("search:nyc", json!(1), WriteConfig::default()).await.unwrap();

        let count = manager
            .invalidate(
                "search:*",
                InvalidationOptions {
                    delay: Some(Duration::from_millis(10)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(manager.pending_delayed_invalidations(), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.run_delayed_invalidations().await, 1);

        let gone: Option<i64> = manager.get("search:nyc", GetOptions::default()).await.unwrap();
        assert_eq!(gone, None);
    }

    #[tokio::test]
    async fn test_warm_cache_isolates_failures() {
        let manager = CacheManager::in_memory();

        let entries = vec![
            WarmingEntry::replay("good:1", CachePriority::High, json!(1)),
            WarmingEntry::new("bad:1", CachePriority::Medium, || {
                Box::pin(async { Err(anyhow::anyhow!("generator broke")) })
            }),
            WarmingEntry::replay("good:2", CachePriority::Low, json!(2)),
        ];

        let warmed = manager.warm_cache(entries, &WarmingOptions::default()).await;
        assert_eq!(warmed, 2);

        let v: Option<i64> = manager.get("good:1", GetOptions::default()).await.unwrap();
        assert_eq!(v, Some(1));
        let missing: Option<i64> = manager.get("bad:1", GetOptions::default()).await.unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn test_drain_warming_queue_repopulates_after_eviction() {
        let manager = CacheManager::in_memory();

        manager
            .set("k", json!("v"), write_cfg(CachePriority::High))
            .await
            .unwrap();
        manager.clear();
        assert!(!manager.hot().contains("k"));

        let warmed = manager.drain_warming_queue().await;
        assert_eq!(warmed, 1);
        assert!(manager.hot().contains("k"));
    }

    #[tokio::test]
    async fn test_stats_aggregation() {
        let manager = CacheManager::in_memory();

        manager
            .set(
                "search:nyc",
                json!(1),
                WriteConfig {
                    tags: vec!["search".into()],
                    ..WriteConfig::default()
                },
            )
            .await
            .unwrap();
        let _: Option<i64> = manager.get("search:nyc", GetOptions::default()).await.unwrap();
        let _: Option<i64> = manager.get("absent", GetOptions::default()).await.unwrap();

        let stats = manager.stats();
        assert_eq!(stats.total_requests, 2);
        assert!((stats.hit_ratio - 0.5).abs() < 1e-9);
        assert!((stats.miss_ratio - 0.5).abs() < 1e-9);
        assert!(stats.memory_bytes > 0);
        assert_eq!(stats.entries_by_tag.get("search"), Some(&1));
        assert_eq!(stats.entries_by_region.get("local"), Some(&1));
    }

    #[tokio::test]
    async fn test_key_stats_unknown_key_errors() {
        let manager = CacheManager::in_memory();
        assert_matches!(
            manager.key_stats("never-seen"),
            Err(Error::StatsUnknownKey(_))
        );
    }

    #[tokio::test]
    async fn test_replication_scheduled_for_global_writes() {
        let mut config = ManagerConfig::default();
        config.replication.regional_peers = vec!["eu-west".into()];
        config.replication.delay = Duration::from_millis(5);
        let backend = Arc::new(InMemoryBackend::new());
        let manager = CacheManager::new(config, backend.clone());

        manager
            .set(
                "k",
                json!("v"),
                WriteConfig {
                    replication: true,
                    scope: GeographicScope::Global,
                    ..WriteConfig::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(manager.replications_scheduled(), 1);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(backend.exists("sync:eu-west:k").await.unwrap());
    }

    #[tokio::test]
    async fn test_local_scope_never_replicates() {
        let mut config = ManagerConfig::default();
        config.replication.regional_peers = vec!["eu-west".into()];
        let manager = CacheManager::new(config, Arc::new(InMemoryBackend::new()));

        manager
            .set(
                "k",
                json!("v"),
                WriteConfig {
                    replication: true,
                    scope: GeographicScope::Local,
                    ..WriteConfig::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(manager.replications_scheduled(), 0);
    }

    #[tokio::test]
    async fn test_apply_trigger_runs_configured_rules() {
        let mut config = ManagerConfig::default();
        config.rules = vec![InvalidationRule {
            pattern: "search:*".into(),
            triggers: vec!["business_updated".into()],
            cascade: false,
            delay: None,
        }];
        let manager = CacheManager::new(config, Arc::new(InMemoryBackend::new()));

        manager.set("search:nyc", json!(1), WriteConfig::default()).await.unwrap();

        assert_eq!(manager.apply_trigger("business_updated").await.unwrap(), 1);
        assert!(!manager.hot().contains("search:nyc"));
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let mut config = ManagerConfig::default();
        config.delayed_sweep_interval = Duration::from_millis(5);
        let manager = Arc::new(CacheManager::new(config, Arc::new(InMemoryBackend::new())));

        manager.start();
        manager.start(); // idempotent

        manager.set("search:nyc", json!(1), WriteConfig::default()).await.unwrap();
        manager
            .invalidate(
                "search:*",
                InvalidationOptions {
                    delay: Some(Duration::from_millis(1)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // The background sweep executes the delayed invalidation
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.pending_delayed_invalidations(), 0);
        assert!(!manager.hot().contains("search:nyc"));

        manager.shutdown().await;
        assert!(manager.tasks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_alert_check_counts_breaches() {
        let manager = CacheManager::in_memory();

        // All misses: hit ratio 0.0
        let _: Option<i64> = manager.get("a", GetOptions::default()).await.unwrap();
        let _: Option<i64> = manager.get("b", GetOptions::default()).await.unwrap();

        assert_eq!(manager.run_alert_check(), 1);
    }
}
