//! Invalidation Engine
//!
//! Resolves a key or `*`-glob pattern to candidates across all tiers and
//! the distributed store, applies immediate or delayed removal, and
//! optionally cascades to related keys. Everything here is best-effort:
//! a failed distributed delete is logged and skipped, never surfaced.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use regex::Regex;

use super::distributed::DistributedCache;
use super::tier::Tier;
use crate::error::{Error, Result};

/// Translate a `*`-glob pattern into an anchored regex
///
/// `*` matches any substring; every other character matches literally.
/// A pattern without `*` is an exact-match test.
pub(crate) fn compile_pattern(pattern: &str) -> Result<Regex> {
    let escaped = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}$", escaped)).map_err(|e| Error::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// Options for an invalidation request
#[derive(Debug, Clone, Default)]
pub struct InvalidationOptions {
    /// Also invalidate keys related to each match (one level of fan-out)
    pub cascade: bool,
    /// Defer removal by this long; deferred removals are not counted
    pub delay: Option<Duration>,
    /// Restrict to entries written from this region
    pub region: Option<String>,
}

/// Declarative invalidation rule, read-only at runtime
#[derive(Debug, Clone)]
pub struct InvalidationRule {
    /// Key pattern the rule invalidates
    pub pattern: String,
    /// Trigger names that fire the rule
    pub triggers: Vec<String>,
    /// Cascade to related keys
    pub cascade: bool,
    /// Optional removal delay
    pub delay: Option<Duration>,
}

/// Heuristic for finding keys related to an invalidated key
///
/// Approximate by design: bounds the blast radius and prefers false
/// negatives over full scans. Both rules are tunable because the exact
/// substring choices are policy, not business logic.
#[derive(Debug, Clone)]
pub struct RelatedKeyPolicy {
    /// Keys sharing the prefix up to this separator are related
    pub prefix_separator: char,
    /// Entries carrying this tag are related when the invalidated key
    /// mentions it
    pub shared_tag: String,
}

impl Default for RelatedKeyPolicy {
    fn default() -> Self {
        Self {
            prefix_separator: ':',
            shared_tag: "user".to_string(),
        }
    }
}

impl RelatedKeyPolicy {
    /// Find keys in the hot tier related to `key`
    pub fn related_in(&self, key: &str, hot: &Tier) -> Vec<String> {
        let prefix = key.split(self.prefix_separator).next().unwrap_or(key);
        let tag_applies = key.contains(self.shared_tag.as_str());

        hot.snapshot()
            .into_iter()
            .filter(|(candidate, entry)| {
                if candidate == key {
                    return false;
                }
                let same_prefix = candidate
                    .split(self.prefix_separator)
                    .next()
                    .map(|p| p == prefix && candidate.contains(self.prefix_separator))
                    .unwrap_or(false)
                    && key.contains(self.prefix_separator);
                let shared_tag = tag_applies && entry.metadata.has_tag(&self.shared_tag);
                same_prefix || shared_tag
            })
            .map(|(candidate, _)| candidate)
            .collect()
    }
}

struct DelayedInvalidation {
    key: String,
    due: Instant,
}

/// Invalidation engine over the tier hierarchy
pub struct InvalidationEngine {
    hot: Arc<Tier>,
    warm: Arc<Tier>,
    distributed: Arc<DistributedCache>,
    related: RelatedKeyPolicy,
    rules: Vec<InvalidationRule>,
    delayed: Mutex<Vec<DelayedInvalidation>>,
}

impl InvalidationEngine {
    /// Create a new engine
    pub fn new(
        hot: Arc<Tier>,
        warm: Arc<Tier>,
        distributed: Arc<DistributedCache>,
        related: RelatedKeyPolicy,
        rules: Vec<InvalidationRule>,
    ) -> Self {
        Self {
            hot,
            warm,
            distributed,
            related,
            rules,
            delayed: Mutex::new(Vec::new()),
        }
    }

    /// Invalidate every key matching `pattern`
    ///
    /// Returns the number of keys invalidated synchronously; delayed
    /// removals are counted only when they execute.
    pub async fn invalidate(&self, pattern: &str, opts: &InvalidationOptions) -> Result<usize> {
        let mut candidates = self.resolve(pattern).await?;

        if let Some(region) = &opts.region {
            candidates = self.filter_by_region(candidates, region).await;
        }

        if let Some(delay) = opts.delay.filter(|d| !d.is_zero()) {
            let due = Instant::now() + delay;
            let mut queue = self.delayed.lock();
            for key in &candidates {
                queue.push(DelayedInvalidation {
                    key: key.clone(),
                    due,
                });
            }
            tracing::debug!(
                pattern,
                deferred = candidates.len(),
                delay_ms = delay.as_millis() as u64,
                "invalidation deferred"
            );
            return Ok(0);
        }

        let mut count = 0;
        let mut removed: BTreeSet<String> = BTreeSet::new();

        for key in candidates {
            // Already removed as a related key of an earlier match
            if !removed.insert(key.clone()) {
                continue;
            }
            self.remove_everywhere(&key).await;
            count += 1;

            // One level of fan-out only: related keys are removed with the
            // cascade flag cleared.
            if opts.cascade {
                for related in self.related.related_in(&key, &self.hot) {
                    if removed.insert(related.clone()) {
                        self.remove_everywhere(&related).await;
                        count += 1;
                    }
                }
            }
        }

        if count > 0 {
            tracing::info!(pattern, count, "invalidated cache keys");
        }
        Ok(count)
    }

    /// Fire every rule registered for a trigger name
    pub async fn apply_trigger(&self, trigger: &str) -> Result<usize> {
        let rules: Vec<InvalidationRule> = self
            .rules
            .iter()
            .filter(|r| r.triggers.iter().any(|t| t == trigger))
            .cloned()
            .collect();

        let mut count = 0;
        for rule in rules {
            let opts = InvalidationOptions {
                cascade: rule.cascade,
                delay: rule.delay,
                region: None,
            };
            count += self.invalidate(&rule.pattern, &opts).await?;
        }
        Ok(count)
    }

    /// Execute delayed invalidations that have come due
    ///
    /// Called from the ~1s maintenance sweep. Order is not guaranteed,
    /// only eventual completion.
    pub async fn process_due(&self) -> usize {
        let now = Instant::now();
        let due: Vec<String> = {
            let mut queue = self.delayed.lock();
            let (ready, pending): (Vec<_>, Vec<_>) =
                queue.drain(..).partition(|d| d.due <= now);
            *queue = pending;
            ready.into_iter().map(|d| d.key).collect()
        };

        let count = due.len();
        for key in due {
            self.remove_everywhere(&key).await;
        }
        if count > 0 {
            tracing::debug!(count, "executed delayed invalidations");
        }
        count
    }

    /// Number of queued delayed invalidations
    pub fn pending_delayed(&self) -> usize {
        self.delayed.lock().len()
    }

    /// Resolve a pattern to the union of keys across all tiers and the
    /// distributed store
    async fn resolve(&self, pattern: &str) -> Result<BTreeSet<String>> {
        let mut keys = BTreeSet::new();

        if pattern.contains('*') {
            let matcher = compile_pattern(pattern)?;
            keys.extend(self.hot.keys().into_iter().filter(|k| matcher.is_match(k)));
            keys.extend(self.warm.keys().into_iter().filter(|k| matcher.is_match(k)));
        } else if self.hot.contains(pattern) || self.warm.contains(pattern) {
            keys.insert(pattern.to_string());
        }
        // The distributed store interprets the same glob syntax; an exact
        // pattern scans as itself.
        keys.extend(self.distributed.scan(pattern).await);

        if !pattern.contains('*') && self.distributed.exists(pattern).await {
            keys.insert(pattern.to_string());
        }

        Ok(keys)
    }

    /// Keep only candidates written from `region`
    async fn filter_by_region(&self, candidates: BTreeSet<String>, region: &str) -> BTreeSet<String> {
        let hot_snapshot = self.hot.snapshot();
        let warm_snapshot = self.warm.snapshot();
        let mut kept = BTreeSet::new();
        for key in candidates {
            let tier_region = hot_snapshot
                .iter()
                .chain(warm_snapshot.iter())
                .find(|(k, _)| k == &key)
                .map(|(_, e)| e.metadata.region().to_string());

            let matches = match tier_region {
                Some(r) => r == region,
                // Not in-process: consult the stored envelope
                None => self
                    .distributed
                    .fetch(&key)
                    .await
                    .map(|env| env.region == region)
                    .unwrap_or(false),
            };
            if matches {
                kept.insert(key);
            }
        }
        kept
    }

    /// Remove a key from every tier and the distributed store
    async fn remove_everywhere(&self, key: &str) {
        self.hot.remove(key);
        self.warm.remove(key);
        self.distributed.remove(key).await;
    }
}

// =============================================================================
// Tests
// =============================================================================
