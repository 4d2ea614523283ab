//! Distributed Cache Tier
//!
//! Thin client interface to the remote key/value service plus the JSON
//! value envelope persisted there. The service is shared with other
//! processes and is assumed available but never guaranteed: every failure
//! or timeout is logged and degraded to a miss or no-op, so a slow or
//! unreachable store never fails a request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::compression::CompressionManager;
use super::entry::now_ms;
use super::invalidation::compile_pattern;
use crate::error::{Error, Result};

// =============================================================================
// Backend Trait
// =============================================================================

/// Client interface to the remote key/value service
///
/// All calls may fail or time out; callers treat both as equivalent to
/// "miss"/"no-op".
#[async_trait]
pub trait DistributedBackend: Send + Sync {
    /// Get the raw value stored for a key
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value with a TTL
    async fn set_ex(&self, key: &str, ttl: Duration, value: String) -> Result<()>;

    /// Delete a key, returning the number of keys removed
    async fn del(&self, key: &str) -> Result<u64>;

    /// Scan keys matching a `*`-glob pattern
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Check if a key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Whether the client currently has a usable connection
    fn is_ready(&self) -> bool;
}

// =============================================================================
// In-Memory Backend
// =============================================================================

struct StoredValue {
    value: String,
    expires_at: Instant,
}

/// In-memory backend for tests and single-process deployments
pub struct InMemoryBackend {
    storage: DashMap<String, StoredValue>,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self {
            storage: DashMap::new(),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }
}

impl InMemoryBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Read operation count
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Write operation count
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Delete operation count
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DistributedBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.reads.fetch_add(1, Ordering::Relaxed);

        if let Some(stored) = self.storage.get(key) {
            if stored.expires_at > Instant::now() {
                return Ok(Some(stored.value.clone()));
            }
        }
        // Lazy expiry, mirroring how the remote store reaps keys
        self.storage
            .remove_if(key, |_, v| v.expires_at <= Instant::now());
        Ok(None)
    }

    async fn set_ex(&self, key: &str, ttl: Duration, value: String) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.storage.insert(
            key.to_string(),
            StoredValue {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<u64> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(self.storage.remove(key).map_or(0, |_| 1))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let matcher = compile_pattern(pattern)?;
        let now = Instant::now();
        Ok(self
            .storage
            .iter()
            .filter(|e| e.value().expires_at > now && matcher.is_match(e.key()))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .storage
            .get(key)
            .map(|v| v.expires_at > Instant::now())
            .unwrap_or(false))
    }

    fn is_ready(&self) -> bool {
        true
    }
}

// =============================================================================
// Stored Envelope
// =============================================================================

/// Value envelope persisted in the distributed store
///
/// When `compressed` is set, `data` holds a base64 string of the
/// LZ4-compressed JSON payload; otherwise `data` is the payload itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEnvelope {
    /// Payload, or base64-encoded compressed payload
    pub data: serde_json::Value,
    /// Whether `data` is compressed
    pub compressed: bool,
    /// Tags carried for invalidation and TTL policy
    pub tags: Vec<String>,
    /// Region label of the writer
    pub region: String,
    /// Write time (epoch ms)
    pub created: u64,
}

impl StoredEnvelope {
    /// Build an envelope, compressing the payload when requested and
    /// large enough
    pub fn encode(
        value: &serde_json::Value,
        tags: Vec<String>,
        region: &str,
        compress: bool,
        compression: &CompressionManager,
    ) -> Result<(String, bool)> {
        let (data, compressed) = if compress {
            let raw = serde_json::to_vec(value)?;
            let (bytes, compressed) = compression.maybe_compress(&raw);
            if compressed {
                (serde_json::Value::String(BASE64.encode(&bytes)), true)
            } else {
                (value.clone(), false)
            }
        } else {
            (value.clone(), false)
        };

        let envelope = StoredEnvelope {
            data,
            compressed,
            tags,
            region: region.to_string(),
            created: now_ms(),
        };
        Ok((serde_json::to_string(&envelope)?, compressed))
    }

    /// Parse an envelope from its stored form
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Recover the original payload, decompressing when flagged
    pub fn payload(&self, compression: &CompressionManager) -> Result<serde_json::Value> {
        if !self.compressed {
            return Ok(self.data.clone());
        }

        let encoded = self.data.as_str().ok_or_else(|| Error::DecompressionFailed {
            algorithm: "LZ4".into(),
            reason: "compressed envelope data is not a string".into(),
        })?;
        let bytes = BASE64.decode(encoded).map_err(|e| Error::DecompressionFailed {
            algorithm: "LZ4".into(),
            reason: format!("base64 decode failed: {}", e),
        })?;
        let raw = compression.decompress(&bytes)?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

// =============================================================================
// Distributed Cache
// =============================================================================

/// Distributed tier wrapper
///
/// Catches and logs every backend failure so upstream code only ever sees
/// a miss or a no-op.
pub struct DistributedCache {
    backend: Arc<dyn DistributedBackend>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DistributedCache {
    /// Create a new distributed tier over the given backend
    pub fn new(backend: Arc<dyn DistributedBackend>) -> Self {
        Self {
            backend,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Access the raw backend (shared with the replication scheduler)
    pub fn backend(&self) -> Arc<dyn DistributedBackend> {
        Arc::clone(&self.backend)
    }

    /// Fetch and parse the envelope for a key
    ///
    /// An unready client, a failed call, or an unparseable value all
    /// degrade to `None`.
    pub async fn fetch(&self, key: &str) -> Option<StoredEnvelope> {
        if !self.backend.is_ready() {
            tracing::debug!(key, "distributed client not ready, treating as miss");
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let raw = match self.backend.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(e) => {
                tracing::warn!(key, "distributed get failed, treating as miss: {}", e);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        match StoredEnvelope::parse(&raw) {
            Ok(envelope) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(envelope)
            }
            Err(e) => {
                tracing::warn!(key, "unparseable distributed value, treating as miss: {}", e);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store an encoded envelope; returns false when the write was dropped
    pub async fn store(&self, key: &str, ttl: Duration, encoded: String) -> bool {
        if !self.backend.is_ready() {
            tracing::debug!(key, "distributed client not ready, dropping write");
            return false;
        }
        match self.backend.set_ex(key, ttl, encoded).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key, "distributed write dropped: {}", e);
                false
            }
        }
    }

    /// Remove a key; returns the number of keys removed (0 on failure)
    pub async fn remove(&self, key: &str) -> u64 {
        match self.backend.del(key).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(key, "distributed delete dropped: {}", e);
                0
            }
        }
    }

    /// Scan keys matching a pattern (empty on failure)
    pub async fn scan(&self, pattern: &str) -> Vec<String> {
        if !self.backend.is_ready() {
            return Vec::new();
        }
        match self.backend.keys(pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(pattern, "distributed scan failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Check if a key exists (false on failure)
    pub async fn exists(&self, key: &str) -> bool {
        match self.backend.exists(key).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(key, "distributed exists failed: {}", e);
                false
            }
        }
    }

    /// Hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================
