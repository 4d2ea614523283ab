//! Integration tests for the tiered cache engine
//!
//! Exercises the public facade end-to-end: write-then-read across tiers,
//! placement and promotion, pattern and cascading invalidation, fallback
//! generation, degraded-store behavior, warming, replication, and stats.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use geotier::cache::{InvalidationOptions, TierConfig, WarmingOptions};
use geotier::{
    CacheManager, CachePriority, DistributedBackend, Error, GeographicScope, GetOptions,
    InMemoryBackend, ManagerConfig, Result, WarmingEntry, WriteConfig,
};

/// Backend that rejects every call, simulating a down distributed store
struct FailingBackend;

#[async_trait]
impl DistributedBackend for FailingBackend {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(Error::Distributed("connection refused".into()))
    }

    async fn set_ex(&self, _key: &str, _ttl: Duration, _value: String) -> Result<()> {
        Err(Error::Distributed("connection refused".into()))
    }

    async fn del(&self, _key: &str) -> Result<u64> {
        Err(Error::Distributed("connection refused".into()))
    }

    async fn keys(&self, _pattern: &str) -> Result<Vec<String>> {
        Err(Error::Distributed("connection refused".into()))
    }

    async fn exists(&self, _key: &str) -> Result<bool> {
        Err(Error::Distributed("connection refused".into()))
    }

    fn is_ready(&self) -> bool {
        true
    }
}

// =============================================================================
// End-to-End Scenarios
// =============================================================================

#[tokio::test]
async fn test_end_to_end_business_lifecycle() {
    let manager = CacheManager::in_memory();
    let payload = json!({"id": 123, "name": "Joe's Pizza", "rating": 4.5});

    manager
        .set(
            "biz:123",
            payload.clone(),
            WriteConfig {
                ttl: Some(Duration::from_secs(300)),
                tags: vec!["user".into()],
                priority: CachePriority::High,
                ..WriteConfig::default()
            },
        )
        .await
        .unwrap();

    // High priority: served from the hot tier
    assert!(manager.hot().contains("biz:123"));
    let value: Option<serde_json::Value> =
        manager.get("biz:123", GetOptions::default()).await.unwrap();
    assert_eq!(value, Some(payload));

    // Invalidate the prefix; the key is gone everywhere
    let count = manager
        .invalidate("biz:*", InvalidationOptions::default())
        .await
        .unwrap();
    assert_eq!(count, 1);

    let gone: Option<serde_json::Value> =
        manager.get("biz:123", GetOptions::default()).await.unwrap();
    assert_eq!(gone, None);
}

#[tokio::test]
async fn test_write_then_read_before_ttl() {
    let manager = CacheManager::in_memory();

    for i in 0..20 {
        let key = format!("item:{}", i);
        manager
            .set(&key, json!({"n": i}), WriteConfig::default())
            .await
            .unwrap();

        let value: Option<serde_json::Value> =
            manager.get(&key, GetOptions::default()).await.unwrap();
        assert_eq!(value.unwrap()["n"], i);
    }
}

#[tokio::test]
async fn test_compressed_payload_roundtrips_through_distributed_tier() {
    let manager = CacheManager::in_memory();

    // Well past the 1KB compression threshold
    let payload = json!(vec!["downtown coffee shops near union square"; 100]);
    manager
        .set("search:nyc:coffee", payload.clone(), WriteConfig::default())
        .await
        .unwrap();

    // Force the read to come from the distributed tier
    manager.clear();

    let value: Option<serde_json::Value> = manager
        .get("search:nyc:coffee", GetOptions::default())
        .await
        .unwrap();
    assert_eq!(value, Some(payload));
}

// =============================================================================
// Degraded Distributed Store
// =============================================================================

#[tokio::test]
async fn test_degraded_store_never_throws() {
    let manager = CacheManager::new(ManagerConfig::default(), Arc::new(FailingBackend));

    // set completes despite the dropped write-through
    manager
        .set("k", json!("v"), WriteConfig::default())
        .await
        .unwrap();

    // Hot tier still serves the value
    let value: Option<String> = manager.get("k", GetOptions::default()).await.unwrap();
    assert_eq!(value, Some("v".to_string()));

    // A full miss is still just a miss
    let missing: Option<String> = manager.get("absent", GetOptions::default()).await.unwrap();
    assert_eq!(missing, None);

    // Invalidation completes against the in-process tiers
    let count = manager
        .invalidate("k", InvalidationOptions::default())
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_degraded_store_still_runs_fallback() {
    let manager = CacheManager::new(ManagerConfig::default(), Arc::new(FailingBackend));

    let opts = GetOptions::default().with_fallback(|| async { Ok(json!(99)) });
    let value = manager.get("absent", opts).await.unwrap();
    assert_eq!(value, Some(json!(99)));
}

// =============================================================================
// Eviction
// =============================================================================

#[tokio::test]
async fn test_hot_tier_respects_byte_ceiling() {
    let payload = json!(vec!["x"; 64]);
    let mut config = ManagerConfig::default();
    config.hot = TierConfig::hot(4096);
    let manager = CacheManager::new(config, Arc::new(InMemoryBackend::new()));

    for i in 0..100 {
        manager
            .set(&format!("k{}", i), payload.clone(), WriteConfig::default())
            .await
            .unwrap();
    }

    manager.run_eviction_sweep();
    assert!(manager.hot().size_bytes() <= 4096);
    assert!(manager.hot().evictions() > 0);
}

#[tokio::test]
async fn test_high_priority_entries_survive_pressure() {
    let mut config = ManagerConfig::default();
    config.hot = TierConfig::hot(2048);
    let manager = CacheManager::new(config, Arc::new(InMemoryBackend::new()));

    manager
        .set(
            "keep-me",
            json!("important"),
            WriteConfig {
                priority: CachePriority::High,
                ..WriteConfig::default()
            },
        )
        .await
        .unwrap();

    for i in 0..60 {
        manager
            .set(
                &format!("filler:{}", i),
                json!(vec!["f"; 16]),
                WriteConfig {
                    priority: CachePriority::Low,
                    ..WriteConfig::default()
                },
            )
            .await
            .unwrap();
    }

    assert!(manager.hot().contains("keep-me"));
}

// =============================================================================
// Invalidation
// =============================================================================

#[tokio::test]
async fn test_pattern_invalidation_spans_all_tiers() {
    let manager = CacheManager::in_memory();

    manager
        .set("search:nyc", json!(1), WriteConfig::default())
        .await
        .unwrap();
    manager
        .set("search:sf", json!(2), WriteConfig::default())
        .await
        .unwrap();

    let count = manager
        .invalidate("search:*", InvalidationOptions::default())
        .await
        .unwrap();
    assert_eq!(count, 2);

    assert!(!manager.hot().contains("search:nyc"));
    assert!(!manager.distributed().exists("search:nyc").await);
    assert!(!manager.distributed().exists("search:sf").await);
}

#[tokio::test]
async fn test_cascading_invalidation_removes_hot_siblings() {
    let manager = CacheManager::in_memory();

    for city in ["nyc", "sf", "la"] {
        manager
            .set(&format!("search:{}", city), json!(city), WriteConfig::default())
            .await
            .unwrap();
    }
    manager
        .set("biz:1", json!("kept"), WriteConfig::default())
        .await
        .unwrap();

    let count = manager
        .invalidate(
            "search:nyc",
            InvalidationOptions {
                cascade: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(count, 3);
    assert!(!manager.hot().contains("search:sf"));
    assert!(!manager.hot().contains("search:la"));
    assert!(manager.hot().contains("biz:1"));
}

#[tokio::test]
async fn test_delayed_invalidation_completes_eventually() {
    let mut config = ManagerConfig::default();
    config.delayed_sweep_interval = Duration::from_millis(10);
    let manager = Arc::new(CacheManager::new(config, Arc::new(InMemoryBackend::new())));
    manager.start();

    manager
        .set("search:nyc", json!(1), WriteConfig::default())
        .await
        .unwrap();

    let count = manager
        .invalidate(
            "search:nyc",
            InvalidationOptions {
                delay: Some(Duration::from_millis(20)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(count, 0);
    assert!(manager.hot().contains("search:nyc"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!manager.hot().contains("search:nyc"));
    assert!(!manager.distributed().exists("search:nyc").await);

    manager.shutdown().await;
}

// =============================================================================
// Fallback Generation
// =============================================================================

#[tokio::test]
async fn test_fallback_generates_once_then_serves_from_tier() {
    let manager = CacheManager::in_memory();
    let calls = Arc::new(AtomicU32::new(0));

    let calls_in = Arc::clone(&calls);
    let opts = GetOptions::default().with_fallback(move || async move {
        calls_in.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"generated": true}))
    });

    let first = manager.get("search:austin", opts).await.unwrap();
    assert_eq!(first, Some(json!({"generated": true})));

    let second: Option<serde_json::Value> = manager
        .get("search:austin", GetOptions::default())
        .await
        .unwrap();
    assert_eq!(second, Some(json!({"generated": true})));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Warming
// =============================================================================

#[tokio::test]
async fn test_warming_populates_by_priority_with_partial_failures() {
    let manager = CacheManager::in_memory();

    let entries = vec![
        WarmingEntry::replay("warm:low", CachePriority::Low, json!("low")),
        WarmingEntry::new("warm:broken", CachePriority::High, || {
            Box::pin(async { Err(anyhow::anyhow!("upstream timeout")) })
        }),
        WarmingEntry::replay("warm:high", CachePriority::High, json!("high")),
    ];

    let warmed = manager
        .warm_cache(
            entries,
            &WarmingOptions {
                batch_size: 2,
                concurrency: 1,
                batch_delay: Duration::from_millis(1),
                region: None,
            },
        )
        .await;

    assert_eq!(warmed, 2);
    let high: Option<String> = manager.get("warm:high", GetOptions::default()).await.unwrap();
    assert_eq!(high, Some("high".to_string()));
    let low: Option<String> = manager.get("warm:low", GetOptions::default()).await.unwrap();
    assert_eq!(low, Some("low".to_string()));
    let broken: Option<String> =
        manager.get("warm:broken", GetOptions::default()).await.unwrap();
    assert_eq!(broken, None);
}

// =============================================================================
// Replication
// =============================================================================

#[tokio::test]
async fn test_global_write_replicates_to_peer_regions() {
    let mut config = ManagerConfig::default();
    config.replication.delay = Duration::from_millis(5);
    config.replication.regional_peers = vec!["eu-west".into()];
    config.replication.global_peers = vec!["ap-south".into()];
    let backend = Arc::new(InMemoryBackend::new());
    let manager = CacheManager::new(config, backend.clone());

    manager
        .set(
            "biz:global",
            json!("everywhere"),
            WriteConfig {
                replication: true,
                scope: GeographicScope::Global,
                ..WriteConfig::default()
            },
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(backend.exists("sync:eu-west:biz:global").await.unwrap());
    assert!(backend.exists("sync:ap-south:biz:global").await.unwrap());
}

// =============================================================================
// Stats & Alerting
// =============================================================================

#[tokio::test]
async fn test_stats_track_requests_and_distributions() {
    let manager = CacheManager::in_memory();

    manager
        .set(
            "search:nyc",
            json!(1),
            WriteConfig {
                tags: vec!["search".into()],
                region: Some("us-east".into()),
                ..WriteConfig::default()
            },
        )
        .await
        .unwrap();

    let _: Option<i64> = manager.get("search:nyc", GetOptions::default()).await.unwrap();
    let _: Option<i64> = manager.get("missing", GetOptions::default()).await.unwrap();

    let stats = manager.stats();
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.misses_not_found, 1);
    assert_eq!(stats.entries_by_region.get("us-east"), Some(&1));
    assert_eq!(stats.entries_by_tag.get("search"), Some(&1));

    let key_stats = manager.key_stats("search:nyc").unwrap();
    assert_eq!(key_stats.hits, 1);

    assert!(manager.key_stats("never-requested").is_err());
}

#[tokio::test]
async fn test_alert_check_is_advisory() {
    let manager = CacheManager::in_memory();

    for i in 0..10 {
        let _: Option<i64> = manager
            .get(&format!("miss:{}", i), GetOptions::default())
            .await
            .unwrap();
    }

    // Breaches are reported and logged, never raised as errors
    assert!(manager.run_alert_check() >= 1);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_shutdown_joins_background_tasks() {
    let manager = Arc::new(CacheManager::in_memory());
    manager.start();

    manager
        .set("k", json!("v"), WriteConfig::default())
        .await
        .unwrap();

    manager.shutdown().await;

    // The engine still serves in-process reads after shutdown
    let value: Option<String> = manager.get("k", GetOptions::default()).await.unwrap();
    assert_eq!(value, Some("v".to_string()));
}
