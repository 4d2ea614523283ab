//! Geographic Replication Scheduler
//!
//! Asynchronously propagates writes tagged for wider geographic scope to
//! the distributed store's other regions after a fixed delay. Best-effort
//! only: failures are logged and never retried, and nothing here blocks
//! the write path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::distributed::DistributedBackend;

/// Geographic scope of a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GeographicScope {
    /// Home region only; never replicated
    #[default]
    Local,
    /// Replicated to regional peers
    Regional,
    /// Replicated to regional and global peers
    Global,
}

/// Replication configuration
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Delay before the one-shot push
    pub delay: Duration,
    /// Peer regions receiving `Regional` writes
    pub regional_peers: Vec<String>,
    /// Additional peer regions receiving `Global` writes
    pub global_peers: Vec<String>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            regional_peers: Vec::new(),
            global_peers: Vec::new(),
        }
    }
}

/// Cross-region sync key for a replicated value
pub fn sync_key(region: &str, key: &str) -> String {
    format!("sync:{}:{}", region, key)
}

/// Schedules delayed, one-shot replication pushes
pub struct ReplicationScheduler {
    backend: Arc<dyn DistributedBackend>,
    config: ReplicationConfig,
    cancel: CancellationToken,
    scheduled: Arc<AtomicU64>,
    completed: Arc<AtomicU64>,
}

impl ReplicationScheduler {
    /// Create a new scheduler
    ///
    /// The cancellation token is shared with the manager so in-flight
    /// timers stop on shutdown.
    pub fn new(
        backend: Arc<dyn DistributedBackend>,
        config: ReplicationConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            backend,
            config,
            cancel,
            scheduled: Arc::new(AtomicU64::new(0)),
            completed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Peer regions a scope fans out to
    fn targets(&self, scope: GeographicScope) -> Vec<String> {
        match scope {
            GeographicScope::Local => Vec::new(),
            GeographicScope::Regional => self.config.regional_peers.clone(),
            GeographicScope::Global => self
                .config
                .regional_peers
                .iter()
                .chain(self.config.global_peers.iter())
                .cloned()
                .collect(),
        }
    }

    /// Schedule a one-shot replication of an already-encoded envelope
    ///
    /// Local scope is a no-op. Returns the number of peer regions the
    /// push will target.
    pub fn schedule(
        &self,
        key: &str,
        encoded: String,
        ttl: Duration,
        scope: GeographicScope,
    ) -> usize {
        let targets = self.targets(scope);
        if targets.is_empty() {
            return 0;
        }

        self.scheduled.fetch_add(1, Ordering::Relaxed);

        let backend = Arc::clone(&self.backend);
        let cancel = self.cancel.clone();
        let completed = Arc::clone(&self.completed);
        let delay = self.config.delay;
        let key = key.to_string();
        let count = targets.len();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(key = %key, "replication cancelled by shutdown");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            for region in targets {
                let target = sync_key(&region, &key);
                if let Err(e) = backend.set_ex(&target, ttl, encoded.clone()).await {
                    tracing::warn!(key = %key, region = %region, "replication push failed: {}", e);
                }
            }
            completed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %key, regions = count, "replication push complete");
        });

        count
    }

    /// Replications scheduled since startup
    pub fn scheduled(&self) -> u64 {
        self.scheduled.load(Ordering::Relaxed)
    }

    /// Replications whose push has run
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================
