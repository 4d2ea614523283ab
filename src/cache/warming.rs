//! Cache Warming
//!
//! Proactively populates entries before they are requested. Items queue as
//! (key, priority, generator) triples; the queue is FIFO but reordered by
//! priority at drain time. Duplicate keys may coexist; the most recent
//! successful write wins. Batch execution lives in the manager, which owns
//! the write path.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;

use super::entry::CachePriority;

/// Zero-argument async function producing a value to cache
pub type ValueGenerator =
    Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<serde_json::Value>> + Send + Sync>;

/// One queued warming item
#[derive(Clone)]
pub struct WarmingEntry {
    /// Key to populate
    pub key: String,
    /// Drain-time ordering priority
    pub priority: CachePriority,
    /// Generator invoked to produce the value
    pub generator: ValueGenerator,
}

impl WarmingEntry {
    /// Create a warming entry from a generator closure
    pub fn new<F>(key: impl Into<String>, priority: CachePriority, generator: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, anyhow::Result<serde_json::Value>> + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            priority,
            generator: Arc::new(generator),
        }
    }

    /// Create a warming entry that replays an already-known value
    pub fn replay(key: impl Into<String>, priority: CachePriority, value: serde_json::Value) -> Self {
        Self::new(key, priority, move || {
            let value = value.clone();
            Box::pin(async move { Ok(value) })
        })
    }
}

impl std::fmt::Debug for WarmingEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarmingEntry")
            .field("key", &self.key)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Options for a warming run
#[derive(Debug, Clone)]
pub struct WarmingOptions {
    /// Entries per batch
    pub batch_size: usize,
    /// Concurrent generators within a batch
    pub concurrency: usize,
    /// Pause between batches, bounding burst load on the generators and
    /// the distributed store
    pub batch_delay: Duration,
    /// Region label applied to warmed writes
    pub region: Option<String>,
}

impl Default for WarmingOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            concurrency: 3,
            batch_delay: Duration::from_millis(50),
            region: None,
        }
    }
}

/// Order entries by priority descending, preserving FIFO order within a
/// priority class
pub fn order_by_priority(mut entries: Vec<WarmingEntry>) -> Vec<WarmingEntry> {
    entries.sort_by(|a, b| b.priority.cmp(&a.priority));
    entries
}

/// FIFO warming queue drained by the background maintenance task
#[derive(Default)]
pub struct WarmingQueue {
    items: Mutex<Vec<WarmingEntry>>,
}

impl WarmingQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an item; duplicates are allowed
    pub fn enqueue(&self, entry: WarmingEntry) {
        self.items.lock().push(entry);
    }

    /// Drain all queued items, priority-ordered
    pub fn drain(&self) -> Vec<WarmingEntry> {
        let items = std::mem::take(&mut *self.items.lock());
        order_by_priority(items)
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
